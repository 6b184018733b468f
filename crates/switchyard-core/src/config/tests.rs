use super::*;

#[test]
fn test_default_config() {
    let config = FabricConfig::default();
    assert_eq!(config.router.queue_capacity, 1000);
    assert_eq!(config.correlator.key_prefix, "reply:");
    assert_eq!(config.events.event_ttl(), Duration::from_secs(86_400));
    assert_eq!(config.health.snapshot_ttl(), Duration::from_secs(604_800));
    assert!((config.health.queue_high_water - 0.8).abs() < f64::EPSILON);
    assert!(config.validate().is_ok());
}

#[test]
fn test_partial_section_uses_defaults() {
    let json = r#"{ "router": { "queue_capacity": 8 } }"#;
    let config: FabricConfig = serde_json::from_str(json).unwrap();
    assert_eq!(config.router.queue_capacity, 8);
    assert_eq!(config.router.max_concurrent_deliveries, 32);
    assert_eq!(config.correlator.wait_timeout_secs, 120);
    assert!(!config.correlator.interim_patterns.is_empty());
}

#[test]
fn test_validate_rejects_zero_capacity() {
    let mut config = FabricConfig::default();
    config.router.queue_capacity = 0;
    assert!(matches!(config.validate(), Err(Error::Configuration(_))));
}

#[test]
fn test_validate_rejects_bad_high_water() {
    let mut config = FabricConfig::default();
    config.health.queue_high_water = 1.5;
    assert!(config.validate().is_err());
}

use super::*;
use crate::agent::AgentStatus;
use crate::config::CorrelatorConfig;
use crate::message::MessageType;
use crate::store::MemoryStore;
use crate::testing::ScriptedAgent;

fn config() -> FabricConfig {
    FabricConfig {
        correlator: CorrelatorConfig {
            recovery_interval_ms: 50,
            cleanup_grace_ms: 50,
            timeout_message: "still thinking".to_string(),
            ..Default::default()
        },
        ..Default::default()
    }
}

fn start() -> Arc<Coordinator> {
    Coordinator::start(config(), Arc::new(MemoryStore::new())).unwrap()
}

#[tokio::test]
async fn test_start_rejects_invalid_config() {
    let mut config = config();
    config.router.queue_capacity = 0;
    let err = Coordinator::start(config, Arc::new(MemoryStore::new())).unwrap_err();
    assert!(matches!(err, Error::Configuration(_)));
}

#[tokio::test]
async fn test_register_agent_starts_it() {
    let coordinator = start();
    let agent = Arc::new(ScriptedAgent::new("planner", "planning"));
    coordinator.register_agent(agent.clone()).await.unwrap();
    assert!(agent.is_started());

    let duplicate = Arc::new(ScriptedAgent::new("planner", "planning"));
    let err = coordinator
        .register_agent(duplicate.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::AlreadyRegistered(_)));
    assert!(!duplicate.is_started());
    assert!(!agent.is_stopped());
}

#[tokio::test]
async fn test_reregistering_same_instance_keeps_it_live() {
    let coordinator = start();
    let agent = Arc::new(ScriptedAgent::new("planner", "planning").with_capabilities(&["plan"]));
    coordinator.register_agent(agent.clone()).await.unwrap();

    let err = coordinator.register_agent(agent.clone()).await.unwrap_err();
    assert!(matches!(err, Error::AlreadyRegistered(_)));
    assert!(!agent.is_stopped());
    assert_eq!(agent.state().status, AgentStatus::Idle);
    assert_eq!(coordinator.registry().len().await, 1);

    let chosen = coordinator
        .assign_task(Task::new("plan", "plan the sprint", "user"))
        .await
        .unwrap();
    assert_eq!(chosen, "planner");
}

#[tokio::test]
async fn test_submit_returns_final_reply() {
    let coordinator = start();
    coordinator
        .register_agent(Arc::new(
            ScriptedAgent::new("planner", "planning").replying("Here is your plan."),
        ))
        .await
        .unwrap();

    let answer = coordinator
        .submit("conv-1", Message::request("user", "planner", "plan my week"))
        .await
        .unwrap();
    assert_eq!(answer, "Here is your plan.");
}

#[tokio::test]
async fn test_submit_soft_timeout() {
    let coordinator = start();
    coordinator
        .register_agent(Arc::new(ScriptedAgent::new("silent", "worker")))
        .await
        .unwrap();

    let answer = coordinator
        .submit_with_timeout(
            "conv-1",
            Message::request("user", "silent", "anyone?"),
            Duration::from_millis(100),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(answer, "still thinking");
}

#[tokio::test]
async fn test_request_timeout_then_recover() {
    let coordinator = start();
    coordinator
        .register_agent(Arc::new(
            ScriptedAgent::new("slow", "worker")
                .replying("worth the wait")
                .with_reply_delay(Duration::from_millis(200)),
        ))
        .await
        .unwrap();

    let err = coordinator
        .request(
            "conv-1",
            Message::request("user", "slow", "take your time"),
            Duration::from_millis(50),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
    let Error::Timeout(key) = err else {
        panic!("expected timeout, got {err:?}");
    };
    assert_eq!(coordinator.recover_reply(&key).unwrap(), None);

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(
        coordinator.recover_reply(&key).unwrap().as_deref(),
        Some("worth the wait")
    );
    assert!(matches!(
        coordinator.recover_reply(&key),
        Err(Error::HandlerNotFound(_))
    ));
}

#[tokio::test]
async fn test_submit_cancelled() {
    let coordinator = start();
    coordinator
        .register_agent(Arc::new(ScriptedAgent::new("silent", "worker")))
        .await
        .unwrap();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        trigger.cancel();
    });

    let err = coordinator
        .submit_with_timeout(
            "conv-1",
            Message::request("user", "silent", "hello"),
            Duration::from_secs(5),
            &cancel,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Cancelled));
}

#[tokio::test]
async fn test_submit_routing_error_releases_key() {
    let coordinator = start();
    let err = coordinator
        .submit(
            "conv-1",
            Message::new("user", vec![], MessageType::Request, "to nobody"),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidMessage(_)));
    assert_eq!(coordinator.correlator().pending_count(), 0);
}

#[tokio::test]
async fn test_health_and_events() {
    let coordinator = start();
    let mut events = coordinator.subscribe_events();
    coordinator
        .register_agent(Arc::new(ScriptedAgent::new("planner", "planning")))
        .await
        .unwrap();

    let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.name(), "agent_registered");

    let health = coordinator.health().await;
    assert_eq!(health.total_agents, 1);
}

#[tokio::test]
async fn test_shutdown_stops_agents_once() {
    let coordinator = start();
    let agent = Arc::new(ScriptedAgent::new("planner", "planning"));
    coordinator.register_agent(agent.clone()).await.unwrap();

    coordinator.shutdown().await;
    assert!(coordinator.is_shutting_down());
    assert!(agent.is_stopped());
    assert!(coordinator.router().is_closed());

    // Second call is a no-op.
    coordinator.shutdown().await;
    let err = coordinator
        .route(Message::request("user", "planner", "hello?"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Closed));
}

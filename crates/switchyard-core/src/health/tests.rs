use super::*;
use crate::config::{CorrelatorConfig, EventBusConfig, RouterConfig};
use crate::event_bus::EventProcessor;
use crate::message::Message;
use crate::router::Dispatcher;
use crate::store::MemoryStore;
use crate::testing::ScriptedAgent;
use std::time::Duration;

#[test]
fn test_classify() {
    assert_eq!(classify(0, 0, 0, 10, 0.8), HealthStatus::Healthy);
    assert_eq!(classify(4, 0, 8, 10, 0.8), HealthStatus::Healthy);
    assert_eq!(classify(4, 0, 9, 10, 0.8), HealthStatus::Degraded);
    assert_eq!(classify(4, 1, 0, 10, 0.8), HealthStatus::Degraded);
    // Exactly half is not a majority.
    assert_eq!(classify(4, 2, 0, 10, 0.8), HealthStatus::Degraded);
    assert_eq!(classify(4, 3, 0, 10, 0.8), HealthStatus::Critical);
    assert_eq!(classify(1, 1, 0, 10, 0.8), HealthStatus::Critical);
}

struct Fixture {
    monitor: HealthMonitor,
    registry: Arc<AgentRegistry>,
    router: MessageRouter,
    correlator: ResponseCorrelator,
    store: Arc<MemoryStore>,
    processor: EventProcessor,
    _dispatcher: Dispatcher,
}

fn fixture() -> Fixture {
    let store = Arc::new(MemoryStore::new());
    let tasks = Arc::new(TaskBoard::new());
    let (events, processor) = EventBus::new(&EventBusConfig::default(), store.clone(), tasks.clone());
    let registry = Arc::new(AgentRegistry::new(events.clone(), Duration::from_secs(1)));
    let correlator = ResponseCorrelator::new(CorrelatorConfig {
        orphan_ttl_secs: 0,
        ..Default::default()
    })
    .unwrap();
    let (router, dispatcher) = MessageRouter::new(
        RouterConfig {
            queue_capacity: 10,
            ..Default::default()
        },
        registry.clone(),
        correlator.clone(),
        events.clone(),
        store.clone(),
    );
    let monitor = HealthMonitor::new(
        HealthConfig::default(),
        registry.clone(),
        tasks,
        router.clone(),
        correlator.clone(),
        events,
        store.clone(),
    );
    Fixture {
        monitor,
        registry,
        router,
        correlator,
        store,
        processor,
        _dispatcher: dispatcher,
    }
}

#[tokio::test]
async fn test_check_counts_agents_and_queue() {
    let f = fixture();
    f.registry
        .register(Arc::new(ScriptedAgent::new("a", "w")))
        .await
        .unwrap();
    f.registry
        .register(Arc::new(
            ScriptedAgent::new("b", "w").with_status(AgentStatus::Busy),
        ))
        .await
        .unwrap();
    f.router
        .route(Message::request("user", "a", "hi"))
        .await
        .unwrap();

    let health = f.monitor.check().await;
    assert_eq!(health.status, HealthStatus::Healthy);
    assert_eq!(health.total_agents, 2);
    assert_eq!(health.agent_status.get(&AgentStatus::Busy), Some(&1));
    assert_eq!(health.message_queue_depth, 1);
    assert_eq!(health.message_queue_capacity, 10);
}

#[tokio::test]
async fn test_backlog_degrades() {
    let f = fixture();
    for _ in 0..9 {
        f.router
            .route(Message::request("user", "a", "hi"))
            .await
            .unwrap();
    }
    assert_eq!(f.monitor.check().await.status, HealthStatus::Degraded);
}

#[tokio::test]
async fn test_tick_persists_and_reports_transitions() {
    let f = fixture();
    let faulty = Arc::new(ScriptedAgent::new("a", "w"));
    f.registry.register(faulty.clone()).await.unwrap();

    assert_eq!(f.monitor.tick().await.status, HealthStatus::Healthy);
    assert_eq!(f.monitor.last_status().await, Some(HealthStatus::Healthy));

    faulty.set_status(AgentStatus::Error);
    assert_eq!(f.monitor.tick().await.status, HealthStatus::Critical);

    let snapshots = f.store.list_by_prefix("health:", 10).await.unwrap();
    assert_eq!(snapshots.len(), 2);
    assert_eq!(snapshots[1].value["status"], "critical");

    let cancel = CancellationToken::new();
    cancel.cancel();
    f.processor.run(cancel).await;
    let changes = f
        .store
        .list_by_prefix("event:", 100)
        .await
        .unwrap()
        .into_iter()
        .filter(|r| r.value["kind"]["type"] == "health_changed")
        .count();
    assert_eq!(changes, 1);
}

#[tokio::test]
async fn test_tick_sweeps_correlator() {
    let f = fixture();
    f.correlator
        .deliver("reply:gone", &Message::request("agent", "reply:gone", "final"));
    assert_eq!(f.correlator.orphan_count(), 1);

    f.monitor.tick().await;
    assert_eq!(f.correlator.orphan_count(), 0);
}

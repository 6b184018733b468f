use super::*;
use crate::config::{CorrelatorConfig, EventBusConfig};
use crate::correlator::WaitOutcome;
use crate::event_bus::EventProcessor;
use crate::message::MessageType;
use crate::store::MemoryStore;
use crate::task::TaskBoard;
use crate::testing::ScriptedAgent;
use std::time::Duration;

struct Harness {
    router: MessageRouter,
    dispatcher: Option<Dispatcher>,
    processor: Option<EventProcessor>,
    registry: Arc<AgentRegistry>,
    correlator: ResponseCorrelator,
    events: EventBus,
    store: Arc<MemoryStore>,
}

fn harness(config: RouterConfig) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let (events, processor) = EventBus::new(
        &EventBusConfig::default(),
        store.clone(),
        Arc::new(TaskBoard::new()),
    );
    let registry = Arc::new(AgentRegistry::new(events.clone(), Duration::from_secs(1)));
    let correlator = ResponseCorrelator::new(CorrelatorConfig {
        recovery_interval_ms: 50,
        cleanup_grace_ms: 50,
        ..Default::default()
    })
    .unwrap();
    let (router, dispatcher) = MessageRouter::new(
        config,
        registry.clone(),
        correlator.clone(),
        events.clone(),
        store.clone(),
    );
    Harness {
        router,
        dispatcher: Some(dispatcher),
        processor: Some(processor),
        registry,
        correlator,
        events,
        store,
    }
}

impl Harness {
    fn start(&mut self) -> CancellationToken {
        let cancel = CancellationToken::new();
        if let Some(dispatcher) = self.dispatcher.take() {
            tokio::spawn(dispatcher.run(cancel.clone()));
        }
        if let Some(processor) = self.processor.take() {
            tokio::spawn(processor.run(cancel.clone()));
        }
        cancel
    }
}

#[tokio::test]
async fn test_route_assigns_id_and_persists() {
    let h = harness(RouterConfig::default());
    let id = h
        .router
        .route(Message::request("user", "planner", "hello"))
        .await
        .unwrap();

    assert!(!id.is_nil());
    let stored = h.store.get(&format!("message:{}", id)).await.unwrap().unwrap();
    assert_eq!(stored["content"], "hello");
    assert!(stored["timestamp"].is_string());
    assert_eq!(h.router.queue_depth(), 1);
    assert_eq!(h.events.queue_depth(), 1);
}

#[tokio::test]
async fn test_route_without_recipients_is_rejected() {
    let h = harness(RouterConfig::default());
    let err = h
        .router
        .route(Message::new("user", vec![], MessageType::Request, "x"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidMessage(_)));
    assert_eq!(h.router.queue_depth(), 0);
}

#[tokio::test]
async fn test_full_queue_fails_fast() {
    let h = harness(RouterConfig {
        queue_capacity: 2,
        ..Default::default()
    });
    for _ in 0..2 {
        h.router
            .route(Message::request("user", "planner", "x"))
            .await
            .unwrap();
    }

    let started = std::time::Instant::now();
    let err = h
        .router
        .route(Message::request("user", "planner", "x"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::QueueFull { capacity: 2 }));
    assert!(started.elapsed() < Duration::from_millis(100));
}

#[tokio::test]
async fn test_closed_after_dispatcher_stops() {
    let mut h = harness(RouterConfig::default());
    let cancel = h.start();
    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(1), async {
        while !h.router.is_closed() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    let err = h
        .router
        .route(Message::request("user", "planner", "x"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Closed));
}

#[tokio::test]
async fn test_delivers_and_routes_reply_back() {
    let mut h = harness(RouterConfig::default());
    let echo = Arc::new(ScriptedAgent::new("echo", "echo").replying("pong"));
    let caller = Arc::new(ScriptedAgent::new("caller", "user"));
    h.registry.register(echo.clone()).await.unwrap();
    h.registry.register(caller.clone()).await.unwrap();
    let _cancel = h.start();

    h.router
        .route(Message::request("caller", "echo", "ping"))
        .await
        .unwrap();

    assert!(caller.wait_for_messages(1, Duration::from_secs(2)).await);
    let reply = &caller.received()[0];
    assert_eq!(reply.content, "pong");
    assert_eq!(reply.from, "echo");
    assert_eq!(reply.message_type, MessageType::Response);
}

#[tokio::test]
async fn test_reply_to_correlation_key_reaches_waiter() {
    let mut h = harness(RouterConfig::default());
    h.registry
        .register(Arc::new(ScriptedAgent::new("echo", "echo").replying("pong")))
        .await
        .unwrap();
    let _cancel = h.start();

    let key = h.correlator.new_key("conv");
    h.correlator.register(&key);
    h.router
        .route(
            Message::request("user", "echo", "ping")
                .with_reply_to(key.clone())
                .with_context(CORRELATION_KEY, serde_json::json!(key.clone())),
        )
        .await
        .unwrap();

    let outcome = h
        .correlator
        .wait(&key, Duration::from_secs(2), &CancellationToken::new())
        .await;
    assert_eq!(outcome, WaitOutcome::Reply("pong".to_string()));
}

#[tokio::test]
async fn test_replies_pass_busy_workers() {
    let mut h = harness(RouterConfig {
        max_concurrent_deliveries: 1,
        ..Default::default()
    });
    let slow = Arc::new(
        ScriptedAgent::new("slow", "worker").with_reply_delay(Duration::from_millis(500)),
    );
    h.registry.register(slow.clone()).await.unwrap();
    let _cancel = h.start();

    let key = h.correlator.new_key("conv");
    h.correlator.register(&key);
    h.router
        .route(Message::request("user", "slow", "first"))
        .await
        .unwrap();
    h.router
        .route(Message::request("user", "slow", "second"))
        .await
        .unwrap();
    assert!(slow.wait_for_messages(1, Duration::from_secs(1)).await);

    h.router
        .route(Message::new(
            "other",
            vec![key.clone()],
            MessageType::Response,
            "done",
        ))
        .await
        .unwrap();

    let outcome = h
        .correlator
        .wait(&key, Duration::from_millis(250), &CancellationToken::new())
        .await;
    assert_eq!(outcome, WaitOutcome::Reply("done".to_string()));
    assert_eq!(slow.received_count(), 1);
    assert!(slow.wait_for_messages(2, Duration::from_secs(2)).await);
}

#[tokio::test]
async fn test_unknown_and_failing_recipients_do_not_block_others() {
    let mut h = harness(RouterConfig::default());
    let good = Arc::new(ScriptedAgent::new("good", "worker"));
    h.registry.register(good.clone()).await.unwrap();
    h.registry
        .register(Arc::new(ScriptedAgent::new("broken", "worker").failing("boom")))
        .await
        .unwrap();
    let mut events = h.events.subscribe();
    let _cancel = h.start();

    h.router
        .route(Message::new(
            "user",
            vec!["ghost".into(), "broken".into(), "good".into()],
            MessageType::Command,
            "go",
        ))
        .await
        .unwrap();

    assert!(good.wait_for_messages(1, Duration::from_secs(2)).await);

    let mut failed = Vec::new();
    tokio::time::timeout(Duration::from_secs(2), async {
        while failed.len() < 2 {
            if let Ok(event) = events.recv().await {
                if let EventKind::DeliveryFailed { recipient, .. } = event.kind {
                    failed.push(recipient);
                }
            }
        }
    })
    .await
    .unwrap();
    failed.sort();
    assert_eq!(failed, vec!["broken", "ghost"]);
}

#[tokio::test]
async fn test_slow_agent_times_out() {
    let mut h = harness(RouterConfig {
        delivery_timeout_secs: 0,
        ..Default::default()
    });
    let slow = Arc::new(
        ScriptedAgent::new("slow", "worker")
            .replying("late")
            .with_reply_delay(Duration::from_millis(200)),
    );
    let caller = Arc::new(ScriptedAgent::new("caller", "user"));
    h.registry.register(slow.clone()).await.unwrap();
    h.registry.register(caller.clone()).await.unwrap();
    let _cancel = h.start();

    h.router
        .route(Message::request("caller", "slow", "work"))
        .await
        .unwrap();

    assert!(slow.wait_for_messages(1, Duration::from_secs(1)).await);
    assert!(!caller.wait_for_messages(1, Duration::from_millis(400)).await);
}

#[tokio::test]
async fn test_broadcast_reaches_every_agent() {
    let mut h = harness(RouterConfig::default());
    let agents: Vec<_> = ["a", "b", "c"]
        .iter()
        .map(|id| Arc::new(ScriptedAgent::new(*id, "worker")))
        .collect();
    for agent in &agents {
        h.registry.register(agent.clone()).await.unwrap();
    }
    let _cancel = h.start();

    h.router
        .broadcast(Message::new("ops", vec![], MessageType::Broadcast, "maintenance"))
        .await
        .unwrap();

    for agent in &agents {
        assert!(agent.wait_for_messages(1, Duration::from_secs(2)).await);
        assert_eq!(agent.received()[0].content, "maintenance");
    }
}

#[tokio::test]
async fn test_broadcast_without_agents_is_rejected() {
    let h = harness(RouterConfig::default());
    let err = h
        .router
        .broadcast(Message::new("ops", vec![], MessageType::Broadcast, "x"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidMessage(_)));
}

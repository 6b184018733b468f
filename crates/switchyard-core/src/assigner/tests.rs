use super::*;
use crate::agent::AgentStatus;
use crate::config::{CorrelatorConfig, EventBusConfig, RouterConfig};
use crate::correlator::ResponseCorrelator;
use crate::event_bus::EventProcessor;
use crate::router::Dispatcher;
use crate::store::MemoryStore;
use crate::testing::ScriptedAgent;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

struct Fixture {
    assigner: TaskAssigner,
    registry: Arc<AgentRegistry>,
    tasks: Arc<TaskBoard>,
    processor: EventProcessor,
    _dispatcher: Dispatcher,
}

fn fixture(queue_capacity: usize) -> Fixture {
    let store = Arc::new(MemoryStore::new());
    let tasks = Arc::new(TaskBoard::new());
    let (events, processor) = EventBus::new(&EventBusConfig::default(), store.clone(), tasks.clone());
    let registry = Arc::new(AgentRegistry::new(events.clone(), Duration::from_secs(1)));
    let correlator = ResponseCorrelator::new(CorrelatorConfig::default()).unwrap();
    let (router, dispatcher) = MessageRouter::new(
        RouterConfig {
            queue_capacity,
            ..Default::default()
        },
        registry.clone(),
        correlator,
        events.clone(),
        store,
    );
    Fixture {
        assigner: TaskAssigner::new(registry.clone(), router, tasks.clone(), events),
        registry,
        tasks,
        processor,
        _dispatcher: dispatcher,
    }
}

async fn add(registry: &AgentRegistry, agent: ScriptedAgent) {
    registry.register(Arc::new(agent)).await.unwrap();
}

#[tokio::test]
async fn test_picks_lowest_workload() {
    let f = fixture(16);
    add(&f.registry, ScriptedAgent::new("a", "w").with_capabilities(&["research"]).with_workload(10)).await;
    add(&f.registry, ScriptedAgent::new("b", "w").with_capabilities(&["research"]).with_workload(50)).await;

    let chosen = f
        .assigner
        .assign_task(Task::new("research", "find sources", "user"))
        .await
        .unwrap();
    assert_eq!(chosen, "a");

    let tasks = f.assigner.list_tasks().await;
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].status, TaskStatus::Assigned);
    assert_eq!(tasks[0].assignee.as_deref(), Some("a"));
    assert!(tasks[0].created_at.is_some());
}

#[tokio::test]
async fn test_tie_breaks_by_agent_id() {
    let f = fixture(16);
    add(&f.registry, ScriptedAgent::new("zeta", "w").with_capabilities(&["plan"]).with_workload(20)).await;
    add(&f.registry, ScriptedAgent::new("alpha", "w").with_capabilities(&["plan"]).with_workload(20)).await;

    let chosen = f
        .assigner
        .assign_task(Task::new("plan", "weekly plan", "user"))
        .await
        .unwrap();
    assert_eq!(chosen, "alpha");
}

#[tokio::test]
async fn test_skips_unavailable_agents() {
    let f = fixture(16);
    add(
        &f.registry,
        ScriptedAgent::new("offline", "w")
            .with_capabilities(&["plan"])
            .with_status(AgentStatus::Offline),
    )
    .await;
    add(
        &f.registry,
        ScriptedAgent::new("faulted", "w")
            .with_capabilities(&["plan"])
            .with_status(AgentStatus::Error),
    )
    .await;
    add(
        &f.registry,
        ScriptedAgent::new("busy", "w")
            .with_capabilities(&["plan"])
            .with_status(AgentStatus::Busy)
            .with_workload(90),
    )
    .await;

    let chosen = f
        .assigner
        .assign_task(Task::new("plan", "weekly plan", "user"))
        .await
        .unwrap();
    assert_eq!(chosen, "busy");
}

#[tokio::test]
async fn test_no_capable_agent_stores_nothing() {
    let f = fixture(16);
    add(&f.registry, ScriptedAgent::new("a", "w").with_capabilities(&["research"])).await;

    let err = f
        .assigner
        .assign_task(Task::new("translation", "translate", "user"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NoSuitableAgent { task_type } if task_type == "translation"));
    assert!(f.tasks.is_empty().await);
}

#[tokio::test]
async fn test_dispatch_carries_serialized_task() {
    let f = fixture(16);
    add(&f.registry, ScriptedAgent::new("a", "w").with_capabilities(&["research"])).await;

    let task = Task::new("research", "find sources", "user").with_input(serde_json::json!({"topic": "rust"}));
    f.assigner.assign_task(task).await.unwrap();

    let stored = &f.assigner.list_tasks().await[0];
    let fetched = f.assigner.get_task(stored.id).await.unwrap();
    assert_eq!(fetched.input["topic"], "rust");
    assert!(matches!(
        f.assigner.get_task(Uuid::new_v4()).await,
        Err(Error::TaskNotFound(_))
    ));
}

#[tokio::test]
async fn test_routing_failure_marks_task_failed() {
    let f = fixture(1);
    add(&f.registry, ScriptedAgent::new("a", "w").with_capabilities(&["research"])).await;

    f.assigner
        .assign_task(Task::new("research", "first", "user"))
        .await
        .unwrap();
    let err = f
        .assigner
        .assign_task(Task::new("research", "second", "user"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::QueueFull { .. }));

    let tasks = f.assigner.list_tasks().await;
    let failed = tasks.iter().find(|t| t.description == "second").unwrap();
    assert_eq!(failed.status, TaskStatus::Failed);
    assert!(failed.error.as_deref().unwrap().contains("queue full"));
}

#[tokio::test]
async fn test_reports_drive_task_lifecycle() {
    let f = fixture(16);
    add(&f.registry, ScriptedAgent::new("a", "w").with_capabilities(&["research"])).await;
    f.assigner
        .assign_task(Task::new("research", "find sources", "user"))
        .await
        .unwrap();
    let task_id = f.assigner.list_tasks().await[0].id;

    f.assigner.report_started(task_id);
    f.assigner
        .report_completed(task_id, Some(serde_json::json!("three sources")));
    // Ignored: the task is already terminal.
    f.assigner.report_failed(task_id, "too late");

    let cancel = CancellationToken::new();
    cancel.cancel();
    f.processor.run(cancel).await;

    let task = f.assigner.get_task(task_id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert!(task.started_at.is_some());
    assert!(task.completed_at.is_some());
    assert_eq!(task.output, Some(serde_json::json!("three sources")));
    assert!(task.error.is_none());
}

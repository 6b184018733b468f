use super::*;

#[test]
fn test_status_accepts_tasks() {
    assert!(AgentStatus::Idle.accepts_tasks());
    assert!(AgentStatus::Busy.accepts_tasks());
    assert!(!AgentStatus::Error.accepts_tasks());
    assert!(!AgentStatus::Offline.accepts_tasks());
    assert!(!AgentStatus::Stopped.accepts_tasks());
}

#[test]
fn test_workload_is_clamped() {
    let state = AgentState::idle().with_workload(250);
    assert_eq!(state.workload, MAX_WORKLOAD);

    let cell = StateCell::new(AgentState::idle());
    cell.update(|s| s.workload = 180);
    assert_eq!(cell.get().workload, MAX_WORKLOAD);
}

#[test]
fn test_state_cell_bumps_activity() {
    let mut initial = AgentState::idle();
    initial.last_activity = Utc::now() - chrono::Duration::minutes(5);
    let cell = StateCell::new(initial.clone());

    cell.set_status(AgentStatus::Busy);
    let state = cell.get();
    assert_eq!(state.status, AgentStatus::Busy);
    assert!(state.last_activity > initial.last_activity);
}

#[test]
fn test_status_serialization() {
    let json = serde_json::to_string(&AgentStatus::Busy).unwrap();
    assert_eq!(json, "\"busy\"");
}

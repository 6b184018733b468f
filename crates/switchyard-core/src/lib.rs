//! Switchyard Core - Agent Coordination Fabric
//!
//! This crate lets a set of autonomous agents cooperate, including:
//! - Registry: Agent lookup by ID and type
//! - Assigner: Capability- and workload-based task assignment
//! - Router: Bounded, non-blocking message routing with isolated delivery
//! - Event Bus: Lifecycle events, audit persistence and task bookkeeping
//! - Correlator: Waiting for exactly one final reply to a request
//! - Health: Periodic system health snapshots
//! - Coordinator: A facade that wires everything together

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod agent;
pub mod assigner;
pub mod config;
pub mod coordinator;
pub mod correlator;
pub mod error;
pub mod event_bus;
pub mod health;
pub mod message;
pub mod registry;
pub mod router;
pub mod store;
pub mod task;
pub mod testing;

pub use agent::{Agent, AgentId, AgentState, AgentStatus, AgentType, StateCell, MAX_WORKLOAD};
pub use assigner::TaskAssigner;
pub use config::{
    CorrelatorConfig, EventBusConfig, FabricConfig, HealthConfig, RegistryConfig, RouterConfig,
};
pub use coordinator::Coordinator;
pub use correlator::{
    DeliveryOutcome, PatternClassifier, ReplyClassifier, ResponseCorrelator, SlotSnapshot,
    SweepStats, WaitOutcome,
};
pub use error::{format_error_for_cli, Error, Result, UserFriendlyError};
pub use event_bus::{Event, EventBus, EventKind, EventProcessor};
pub use health::{HealthMonitor, HealthStatus, SystemHealth};
pub use message::{Message, MessageType, Priority, CORRELATION_KEY, INTERIM_FLAG, TASK_KEY};
pub use registry::AgentRegistry;
pub use router::{Dispatcher, MessageRouter};
pub use store::{MemoryStore, PersistentStore, StoredRecord};
pub use task::{Task, TaskBoard, TaskStatus};

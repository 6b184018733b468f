//! EventBus - bounded, best-effort lifecycle events.
//!
//! Every component emits events fire-and-forget. A single processor persists
//! them, applies task state transitions and republishes them to internal
//! subscribers.

/// Event queue, processor and subscriber fan-out.
pub mod bus;
/// Event type definitions.
pub mod types;

pub use bus::{EventBus, EventProcessor};
pub use types::{Event, EventKind};

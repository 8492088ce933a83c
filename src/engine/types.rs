//! Engine state types.
//!
//! Defines the state machine for the replication engine lifecycle.
//!
//! # State Transitions
//!
//! ```text
//!                  start()
//! Created ───────────────────→ Running
//!    │                            │
//!    │ shutdown()                 │ shutdown()
//!    ↓                            ↓
//! Stopped ←──────────────── ShuttingDown
//! ```
//!
//! # State Descriptions
//!
//! - **Created**: Initial state after `ReplicationEngine::new()`. Nothing is watched.
//! - **Running**: The local dispatcher is synced; remote clusters can be attached.
//! - **ShuttingDown**: `shutdown()` called. Reflectors are being force-stopped.
//! - **Stopped**: All tasks cancelled. Safe to drop.

/// State of the replication engine.
///
/// See module docs for the state transition diagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Engine created but not started.
    ///
    /// Call [`start()`](super::ReplicationEngine::start) to begin watching.
    Created,

    /// Dispatcher running, remotes may be attached and detached.
    Running,

    /// Shutting down.
    ///
    /// Reflectors are stopped without waiting for their records to drain.
    ShuttingDown,

    /// Stopped.
    Stopped,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineState::Created => write!(f, "Created"),
            EngineState::Running => write!(f, "Running"),
            EngineState::ShuttingDown => write!(f, "ShuttingDown"),
            EngineState::Stopped => write!(f, "Stopped"),
        }
    }
}

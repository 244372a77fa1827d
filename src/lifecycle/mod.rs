//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → start the drain
//!
//! Shutdown (shutdown.rs):
//!     Stop accepting → wait for connections (bounded by the grace period)
//!     → wait for background tasks (tasks.rs, unbounded) → report outcome
//! ```
//!
//! # Design Decisions
//! - Signal handlers are armed before the first accept
//! - Only connections are subject to the grace period
//! - Nothing in flight is cancelled; shutdown only waits

pub mod counter;
pub mod shutdown;
pub mod signals;
pub mod tasks;

pub use counter::{CountGuard, WaitCounter};
pub use shutdown::{ServerState, ShutdownError, ShutdownOutcome};
pub use signals::{Signal, SignalWatcher};
pub use tasks::{BackgroundTasks, TaskGuard};

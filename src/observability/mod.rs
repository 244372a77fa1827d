//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Collaborators and the lifecycle orchestrator produce:
//!     → logging.rs (leveled JSON entries on stdout)
//!     → diagnostics.rs (tracing events on stderr)
//!     → metrics.rs (counters, gauges)
//! ```
//!
//! # Design Decisions
//! - One logger instance, passed explicitly to whoever needs it
//! - Only the sink write is serialized; formatting runs concurrently
//! - Metrics are cheap (atomic updates, no-op without a recorder)

pub mod diagnostics;
pub mod logging;
pub mod metrics;

pub use logging::{Fatal, Level, LogError, Logger, Properties};

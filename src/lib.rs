//! Greenlight API server core.
//!
//! Process lifecycle (accept loop, signal-driven graceful drain, background
//! task accounting) and the leveled JSON logger every other component
//! writes through.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;

pub use config::ServerConfig;
pub use http::{Server, ServerError};
pub use lifecycle::{BackgroundTasks, ServerState, ShutdownError, Signal};
pub use observability::{Level, Logger, Properties};

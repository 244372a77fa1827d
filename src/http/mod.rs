//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (hyper connection, request ID, timeout, trace layers)
//!     → application Router (handlers.rs or a caller-supplied router)
//!     → Send response
//! ```

pub mod handlers;
pub mod server;

pub use server::{Server, ServerError};

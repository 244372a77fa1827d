//! Configuration validation.
//!
//! # Design Decisions
//! - Returns all validation errors, not just the first
//! - Pure function: ServerConfig → Result<(), Vec<ValidationError>>
//! - Runs before the config is used to start anything

use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::ServerConfig;

pub const ENVIRONMENTS: [&str; 3] = ["development", "staging", "production"];

/// A single semantic problem with a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.host.trim().is_empty() {
        errors.push(ValidationError::new("host", "must be provided"));
    }
    if !ENVIRONMENTS.contains(&config.env.as_str()) {
        errors.push(ValidationError::new(
            "env",
            format!("must be one of {}", ENVIRONMENTS.join("|")),
        ));
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::new("listener.max_connections", "must be greater than zero"));
    }
    if config.timeouts.read_header_secs == 0 {
        errors.push(ValidationError::new("timeouts.read_header_secs", "must be greater than zero"));
    }
    if config.shutdown.grace_period_ms == 0 {
        errors.push(ValidationError::new("shutdown.grace_period_ms", "must be greater than zero"));
    }
    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            "must be a socket address",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

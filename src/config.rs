//! Server configuration
//!
//! Values come from command-line flags with environment fallbacks (see
//! `main.rs`); this type carries them into the library and checks them.

use std::time::Duration;

use thiserror::Error;

/// Errors in a server configuration
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{field} must be at least 1")]
    Zero { field: &'static str },

    #[error("{field} must be a non-zero duration")]
    ZeroDuration { field: &'static str },

    #[error("Invalid host: {0}")]
    InvalidHost(String),
}

/// Runtime settings of the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Requests allowed to execute at once across all sessions
    pub max_concurrency: usize,
    /// Requests allowed to wait for admission before new ones are rejected
    pub admission_queue_depth: usize,
    /// Exclusive requests of one session allowed to wait for its gate
    pub exclusive_queue_depth: usize,
    pub idle_timeout: Duration,
    /// How long a closed session may wait for its cancelled requests
    pub close_grace: Duration,
    /// Responses buffered per session before partials are evicted
    pub outbound_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8017,
            max_concurrency: 16,
            admission_queue_depth: 64,
            exclusive_queue_depth: 32,
            idle_timeout: Duration::from_secs(1800),
            close_grace: Duration::from_secs(10),
            outbound_capacity: 256,
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::InvalidHost(self.host.clone()));
        }
        if self.max_concurrency == 0 {
            return Err(ConfigError::Zero { field: "max_concurrency" });
        }
        if self.outbound_capacity == 0 {
            return Err(ConfigError::Zero { field: "outbound_capacity" });
        }
        if self.idle_timeout.is_zero() {
            return Err(ConfigError::ZeroDuration { field: "idle_timeout" });
        }
        if self.close_grace.is_zero() {
            return Err(ConfigError::ZeroDuration { field: "close_grace" });
        }
        Ok(())
    }

    /// `host:port` to bind the listener to
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

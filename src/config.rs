//! Server configuration
//!
//! All bounds are fixed when the server starts.

use std::time::Duration;

use crate::error::ConfigError;

/// Default listen address
pub const DEFAULT_ADDR: &str = "127.0.0.1:8080";

/// Default maximum number of concurrently registered clients
pub const DEFAULT_MAX_CLIENTS: usize = 50;

/// Default broadcast queue capacity
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Default per-client outbound buffer (frames)
pub const DEFAULT_CLIENT_BUFFER: usize = 32;

/// Runtime settings for a `ChatServer`
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the listener to
    pub bind_addr: String,
    /// Registry capacity
    pub max_clients: usize,
    /// Message queue capacity
    pub queue_capacity: usize,
    /// Frames buffered per client before broadcast writes start waiting
    pub client_buffer: usize,
    /// How long the broadcast loop waits on one client's buffer
    pub write_timeout: Duration,
    /// How long shutdown waits for connection handlers to finish
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_ADDR.to_string(),
            max_clients: DEFAULT_MAX_CLIENTS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            client_buffer: DEFAULT_CLIENT_BUFFER,
            write_timeout: Duration::from_secs(5),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

impl ServerConfig {
    /// Reject settings the server cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_clients == 0 {
            return Err(ConfigError::Zero("max_clients"));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::Zero("queue_capacity"));
        }
        if self.client_buffer == 0 {
            return Err(ConfigError::Zero("client_buffer"));
        }
        Ok(())
    }
}

//! Connection and listener configuration
//!
//! Plain data with defaults matching the protocol conventions (port 502,
//! 5-second master timeout, backlog of 10 pending connections).

use std::time::Duration;

use serde::Deserialize;

use crate::{DEFAULT_TCP_PORT, DEFAULT_TIMEOUT_MS};

/// Master connection parameters
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Remote slave host
    pub host: String,
    /// Remote slave port
    pub port: u16,
    /// Connect and receive timeout in milliseconds
    pub timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_TCP_PORT,
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

impl ClientConfig {
    /// Timeout as a [`Duration`]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Slave listener parameters
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Local address to bind
    pub bind_address: String,
    /// Local port to bind
    pub port: u16,
    /// Maximum pending connections on the listening socket
    pub backlog: u32,
    /// When set, requests for unit ids outside this list are silently
    /// discarded
    pub allowed_units: Option<Vec<u8>>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: DEFAULT_TCP_PORT,
            backlog: 10,
            allowed_units: None,
        }
    }
}

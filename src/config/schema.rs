//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the relay.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

use crate::net::endpoint::Family;

/// Default relay buffer size in bytes (per direction, per connection).
pub const DEFAULT_BUFFER_SIZE: usize = 10 * 1024;

/// Root configuration for the relay.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct RelayConfig {
    /// Relay buffer size in bytes. Each connection allocates two buffers
    /// of this size, one per flow direction.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Upper bound on concurrently open relay connections. Zero disables
    /// the cap.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Logging settings.
    pub log: LogConfig,

    /// Listener definitions.
    pub listen: Vec<ListenSpec>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
            max_connections: default_max_connections(),
            log: LogConfig::default(),
            listen: Vec::new(),
        }
    }
}

fn default_buffer_size() -> usize {
    DEFAULT_BUFFER_SIZE
}

fn default_max_connections() -> usize {
    4096
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error).
    pub level: String,

    /// Log targets: "stdout", "stderr" or "file:/path/to/log".
    pub targets: Vec<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            targets: vec!["stdout".to_string()],
        }
    }
}

/// One listener definition: a local endpoint spec plus the remote endpoint
/// accepted connections are relayed to.
///
/// The port and remote fields are optional at the schema level so that a
/// missing value surfaces as a resolution error, matching the single-listener
/// command line mode where each of them is a separate flag.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default, rename_all = "kebab-case")]
pub struct ListenSpec {
    /// Local address to bind; wildcard when omitted.
    pub local_addr: Option<String>,

    /// Local port to listen on.
    pub local_port: Option<u16>,

    /// Address family constraint for local resolution.
    pub local_family: Family,

    /// Remote address to relay to.
    pub remote_addr: Option<String>,

    /// Remote port to relay to.
    pub remote_port: Option<u16>,

    /// Address family constraint for remote and source resolution.
    pub remote_family: Family,

    /// Optional source address for the outbound side of each relay
    /// connection.
    pub source_addr: Option<String>,
}

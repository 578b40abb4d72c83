//! Socket configuration.
//!
//! # Example
//!
//! ```
//! use tool_sync::{SocketConfig, TiePolicy};
//!
//! // In code
//! let config = SocketConfig::new("inspector");
//! assert_eq!(config.protocol, "ToolRendererV1");
//!
//! // From a file
//! let config = SocketConfig::from_toml_str(r#"
//!     tool_id = "inspector"
//!     version_ties = "accept-remote"
//! "#).unwrap();
//! assert_eq!(config.version_ties, TiePolicy::AcceptRemote);
//! assert!(config.stop_pump_on_error);
//! ```

use serde::Deserialize;
use tool_sync_wire::PROTOCOL;

use crate::tree::TiePolicy;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid socket config: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("socket config has an empty tool_id")]
    EmptyToolId,
}

/// Configuration for one [`ToolSocket`](crate::ToolSocket).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SocketConfig {
    /// Protocol id stamped on outgoing messages and required on incoming ones.
    #[serde(default = "default_protocol")]
    pub protocol: String,

    /// Tool id this socket answers to; messages for other ids are ignored.
    pub tool_id: String,

    /// Stop `pump()` at the first failing message (default: true). When false,
    /// failures are logged and the inbox is drained anyway.
    #[serde(default = "default_stop_pump_on_error")]
    pub stop_pump_on_error: bool,

    /// Outcome of an incoming versioned delta that carries the local version.
    #[serde(default)]
    pub version_ties: TiePolicy,
}

fn default_protocol() -> String {
    PROTOCOL.to_string()
}

fn default_stop_pump_on_error() -> bool {
    true
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            protocol: default_protocol(),
            tool_id: String::new(),
            stop_pump_on_error: default_stop_pump_on_error(),
            version_ties: TiePolicy::default(),
        }
    }
}

impl SocketConfig {
    pub fn new(tool_id: impl Into<String>) -> Self {
        Self { tool_id: tool_id.into(), ..Self::default() }
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: SocketConfig = toml::from_str(text)?;
        if config.tool_id.is_empty() {
            return Err(ConfigError::EmptyToolId);
        }
        Ok(config)
    }

    pub fn with_version_ties(mut self, ties: TiePolicy) -> Self {
        self.version_ties = ties;
        self
    }

    pub fn with_stop_pump_on_error(mut self, stop: bool) -> Self {
        self.stop_pump_on_error = stop;
        self
    }
}

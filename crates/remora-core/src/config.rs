//! Agent configuration
//!
//! The runtime configuration is assembled from stored credentials plus
//! command-line overrides; there is no config file. `validate` clamps
//! the heartbeat interval into its supported window rather than
//! rejecting out-of-range values.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Minimum allowed heartbeat interval in seconds
pub const MIN_HEARTBEAT_SECS: u64 = 5;
/// Maximum allowed heartbeat interval in seconds
pub const MAX_HEARTBEAT_SECS: u64 = 300;

/// Configuration for the running agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// WebSocket server address (host:port)
    pub server_addr: String,
    /// Unique device identifier
    pub device_id: String,
    /// Authentication token (bearer)
    pub token: String,
    /// Use TLS for the connection
    pub tls: bool,
    /// Skip TLS certificate verification
    pub insecure: bool,
    /// Reconnect automatically when the connection is lost
    pub reconnect: bool,
    /// Application heartbeat interval in seconds
    pub heartbeat_secs: u64,
    /// Enable debug logging
    pub debug: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            server_addr: "localhost:30007".to_string(),
            device_id: hostname(),
            token: String::new(),
            tls: true,
            insecure: false,
            reconnect: true,
            heartbeat_secs: 30,
            debug: false,
        }
    }
}

impl AgentConfig {
    /// Check required fields and clamp the heartbeat interval
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        if self.server_addr.is_empty() {
            return Err(ConfigError::MissingField("server address"));
        }
        if self.device_id.is_empty() {
            return Err(ConfigError::MissingField("device ID"));
        }

        self.heartbeat_secs = self
            .heartbeat_secs
            .clamp(MIN_HEARTBEAT_SECS, MAX_HEARTBEAT_SECS);

        Ok(())
    }

    /// Full WebSocket URL for the control channel
    pub fn websocket_url(&self) -> String {
        let scheme = if self.tls { "wss" } else { "ws" };
        format!("{}://{}/ws/agent", scheme, self.server_addr)
    }
}

/// Hostname of this machine, "unknown" if it cannot be determined
pub fn hostname() -> String {
    let name = gethostname::gethostname().to_string_lossy().into_owned();
    if name.is_empty() {
        "unknown".to_string()
    } else {
        name
    }
}

/// Current platform string (e.g. "linux", "macos", "windows")
pub fn platform() -> &'static str {
    std::env::consts::OS
}

/// Current CPU architecture string
pub fn arch() -> &'static str {
    std::env::consts::ARCH
}

/// Combined OS/arch info reported at registration
pub fn os_info() -> String {
    format!("{}/{}", std::env::consts::OS, std::env::consts::ARCH)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heartbeat_clamped_low() {
        let mut config = AgentConfig {
            heartbeat_secs: 1,
            ..Default::default()
        };
        config.validate().unwrap();
        assert_eq!(config.heartbeat_secs, MIN_HEARTBEAT_SECS);
    }

    #[test]
    fn test_heartbeat_clamped_high() {
        let mut config = AgentConfig {
            heartbeat_secs: 100_000,
            ..Default::default()
        };
        config.validate().unwrap();
        assert_eq!(config.heartbeat_secs, MAX_HEARTBEAT_SECS);
    }

    #[test]
    fn test_heartbeat_in_range_untouched() {
        let mut config = AgentConfig {
            heartbeat_secs: 30,
            ..Default::default()
        };
        config.validate().unwrap();
        assert_eq!(config.heartbeat_secs, 30);
    }

    #[test]
    fn test_missing_server_rejected() {
        let mut config = AgentConfig {
            server_addr: String::new(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_websocket_url_schemes() {
        let mut config = AgentConfig {
            server_addr: "example.com:30007".to_string(),
            ..Default::default()
        };
        config.tls = true;
        assert_eq!(config.websocket_url(), "wss://example.com:30007/ws/agent");
        config.tls = false;
        assert_eq!(config.websocket_url(), "ws://example.com:30007/ws/agent");
    }
}

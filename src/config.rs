//! # Agent Configuration
//!
//! Startup parameters for the tunnel agent. The agent never binds a local
//! socket; the only network surface is the relay endpoint built by
//! [`AgentConfig::relay_url`].

use serde_json::{Map, Value};

/// Default relay address.
pub const DEFAULT_RELAY_HOST: &str = "195.35.9.209";

/// Default relay port.
pub const DEFAULT_RELAY_PORT: u16 = 7000;

/// Default idle/request timeout in seconds. The keepalive ping interval is
/// a tenth of this value.
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Tunnel agent startup configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Relay host to dial.
    pub relay_host: String,

    /// Relay port to dial.
    pub relay_port: u16,

    /// Optional public name to claim on the relay. The relay answers with
    /// an `error` message when the name is already taken.
    pub name: Option<String>,

    /// Optional access token for extended session budgets.
    pub token: Option<String>,

    /// Security configuration forwarded verbatim in the `register` message.
    pub security: Map<String, Value>,

    /// Log every inbound request at info level.
    pub debug: bool,

    /// Run the advisory version check before connecting.
    pub check_updates: bool,

    /// Idle/request timeout in seconds, as negotiated with the relay.
    pub timeout_secs: u64,

    /// Directory served by [`TunnelAgent::static_dir`](crate::TunnelAgent::static_dir).
    pub static_folder: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        AgentConfig {
            relay_host: DEFAULT_RELAY_HOST.to_string(),
            relay_port: DEFAULT_RELAY_PORT,
            name: None,
            token: None,
            security: Map::new(),
            debug: false,
            check_updates: true,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            static_folder: "static".to_string(),
        }
    }
}

impl AgentConfig {
    /// The WebSocket endpoint of the relay.
    pub fn relay_url(&self) -> String {
        format!("ws://{}:{}/ws", self.relay_host, self.relay_port)
    }

    /// Keepalive ping interval: a tenth of the timeout, at least a second.
    pub fn keepalive_interval_secs(&self) -> u64 {
        (self.timeout_secs / 10).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relay_url_uses_host_and_port() {
        let config = AgentConfig {
            relay_host: "relay.example".to_string(),
            relay_port: 7070,
            ..AgentConfig::default()
        };
        assert_eq!(config.relay_url(), "ws://relay.example:7070/ws");
    }

    #[test]
    fn keepalive_interval_is_a_tenth_of_the_timeout() {
        let mut config = AgentConfig::default();
        assert_eq!(config.keepalive_interval_secs(), 30);
        config.timeout_secs = 5;
        assert_eq!(config.keepalive_interval_secs(), 1);
    }
}

//! Relay service configuration.
//!
//! Configuration is loaded from environment variables with sensible defaults.

use std::collections::HashMap;
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Default WebSocket bind address.
pub const DEFAULT_WS_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Default health endpoint bind address.
pub const DEFAULT_HEALTH_BIND_ADDRESS: &str = "0.0.0.0:8081";

/// Default waiting-queue capacity.
pub const DEFAULT_MAX_WAITING: usize = 256;

/// Default expiry for an invite stuck in `forwarded`, in seconds.
///
/// Policy decision: the relay owns this default; collaborators may tune it.
pub const DEFAULT_INVITE_EXPIRY_SECONDS: u64 = 45;

/// Default expiry for a room stuck in `ringing`, in seconds.
pub const DEFAULT_RING_EXPIRY_SECONDS: u64 = 45;

/// Default relay instance ID prefix.
pub const DEFAULT_RELAY_ID_PREFIX: &str = "relay";

/// Relay service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// WebSocket server bind address (default: "0.0.0.0:8080").
    pub ws_bind_address: String,

    /// Health endpoint bind address (default: "0.0.0.0:8081").
    pub health_bind_address: String,

    /// Unique identifier for this relay instance.
    pub relay_id: String,

    /// Maximum seekers held in the waiting queue.
    pub max_waiting: usize,

    /// Expiry for an invite stuck in `forwarded`, in seconds.
    pub invite_expiry_seconds: u64,

    /// Expiry for a room stuck in `ringing`, in seconds.
    pub ring_expiry_seconds: u64,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let ws_bind_address = vars
            .get("RELAY_WS_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_WS_BIND_ADDRESS.to_string());

        let health_bind_address = vars
            .get("RELAY_HEALTH_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_HEALTH_BIND_ADDRESS.to_string());

        let max_waiting = match vars.get("RELAY_MAX_WAITING") {
            Some(s) => s.parse().map_err(|_| {
                ConfigError::InvalidValue(format!("RELAY_MAX_WAITING: {s}"))
            })?,
            None => DEFAULT_MAX_WAITING,
        };

        let invite_expiry_seconds = match vars.get("RELAY_INVITE_EXPIRY_SECONDS") {
            Some(s) => s.parse().map_err(|_| {
                ConfigError::InvalidValue(format!("RELAY_INVITE_EXPIRY_SECONDS: {s}"))
            })?,
            None => DEFAULT_INVITE_EXPIRY_SECONDS,
        };

        let ring_expiry_seconds = match vars.get("RELAY_RING_EXPIRY_SECONDS") {
            Some(s) => s.parse().map_err(|_| {
                ConfigError::InvalidValue(format!("RELAY_RING_EXPIRY_SECONDS: {s}"))
            })?,
            None => DEFAULT_RING_EXPIRY_SECONDS,
        };

        if max_waiting == 0 {
            return Err(ConfigError::InvalidValue(
                "RELAY_MAX_WAITING must be at least 1".to_string(),
            ));
        }

        // Generate relay instance ID
        let relay_id = vars.get("RELAY_ID").cloned().unwrap_or_else(|| {
            let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
            let uuid_suffix = uuid::Uuid::new_v4().to_string();
            let short_suffix = uuid_suffix.get(..8).unwrap_or("00000000");
            format!("{DEFAULT_RELAY_ID_PREFIX}-{hostname}-{short_suffix}")
        });

        Ok(Config {
            ws_bind_address,
            health_bind_address,
            relay_id,
            max_waiting,
            invite_expiry_seconds,
            ring_expiry_seconds,
        })
    }

    /// Invite expiry as a [`Duration`].
    #[must_use]
    pub fn invite_expiry(&self) -> Duration {
        Duration::from_secs(self.invite_expiry_seconds)
    }

    /// Ringing-room expiry as a [`Duration`].
    #[must_use]
    pub fn ring_expiry(&self) -> Duration {
        Duration::from_secs(self.ring_expiry_seconds)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_from_vars_success_with_defaults() {
        let vars = HashMap::new();
        let config = Config::from_vars(&vars).expect("Config should load successfully");

        assert_eq!(config.ws_bind_address, DEFAULT_WS_BIND_ADDRESS);
        assert_eq!(config.health_bind_address, DEFAULT_HEALTH_BIND_ADDRESS);
        assert_eq!(config.max_waiting, DEFAULT_MAX_WAITING);
        assert_eq!(config.invite_expiry_seconds, DEFAULT_INVITE_EXPIRY_SECONDS);
        assert_eq!(config.ring_expiry_seconds, DEFAULT_RING_EXPIRY_SECONDS);
        // Relay ID should be auto-generated
        assert!(config.relay_id.starts_with("relay-"));
    }

    #[test]
    fn test_from_vars_success_with_custom_values() {
        let vars = HashMap::from([
            (
                "RELAY_WS_BIND_ADDRESS".to_string(),
                "127.0.0.1:9090".to_string(),
            ),
            (
                "RELAY_HEALTH_BIND_ADDRESS".to_string(),
                "127.0.0.1:9091".to_string(),
            ),
            ("RELAY_MAX_WAITING".to_string(), "16".to_string()),
            ("RELAY_INVITE_EXPIRY_SECONDS".to_string(), "30".to_string()),
            ("RELAY_RING_EXPIRY_SECONDS".to_string(), "60".to_string()),
            ("RELAY_ID".to_string(), "relay-custom-001".to_string()),
        ]);

        let config = Config::from_vars(&vars).expect("Config should load successfully");

        assert_eq!(config.ws_bind_address, "127.0.0.1:9090");
        assert_eq!(config.health_bind_address, "127.0.0.1:9091");
        assert_eq!(config.max_waiting, 16);
        assert_eq!(config.invite_expiry(), Duration::from_secs(30));
        assert_eq!(config.ring_expiry(), Duration::from_secs(60));
        assert_eq!(config.relay_id, "relay-custom-001");
    }

    #[test]
    fn test_from_vars_rejects_unparseable_number() {
        let vars = HashMap::from([("RELAY_MAX_WAITING".to_string(), "lots".to_string())]);
        let result = Config::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::InvalidValue(_))));
    }

    #[test]
    fn test_from_vars_rejects_zero_queue_capacity() {
        let vars = HashMap::from([("RELAY_MAX_WAITING".to_string(), "0".to_string())]);
        let result = Config::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::InvalidValue(_))));
    }
}

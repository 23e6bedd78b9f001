//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the
//! dispatcher. All types derive Serde traits for deserialization from
//! config files.

use serde::Deserialize;

use crate::rules::RuleConfig;

/// Root configuration for the webhook dispatcher.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Outbound connection pool bounds.
    pub forwarder: ForwarderConfig,

    /// Request limits.
    pub limits: LimitsConfig,

    /// Routing rules, evaluated in declaration order.
    pub rules: Vec<RuleConfig>,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Total time budget for one inbound request in seconds.
    pub request_secs: u64,

    /// Outbound connect + TLS handshake timeout in seconds.
    pub connect_secs: u64,

    /// Idle pooled-connection timeout in seconds.
    pub idle_secs: u64,

    /// Per-rule condition evaluation budget in milliseconds.
    pub condition_eval_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_secs: 30,
            connect_secs: 10,
            idle_secs: 30,
            condition_eval_ms: 100,
        }
    }
}

/// Outbound connection pool bounds. The destination set is
/// attacker-influenced in content (path identifiers), so the number of
/// idle downstream connections is capped.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ForwarderConfig {
    /// Maximum idle connections kept per downstream host.
    pub max_idle_per_host: usize,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            max_idle_per_host: 10,
        }
    }
}

/// Request limits.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum inbound body size in bytes.
    pub max_body_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: 2 * 1024 * 1024, // 2MB
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DispatcherConfig::default();
        assert_eq!(config.listener.bind_address, "0.0.0.0:8080");
        assert_eq!(config.timeouts.condition_eval_ms, 100);
        assert_eq!(config.forwarder.max_idle_per_host, 10);
        assert!(config.rules.is_empty());
    }

    #[test]
    fn test_parse_minimal_toml() {
        let config: DispatcherConfig = toml::from_str(
            r#"
            [listener]
            bind_address = "127.0.0.1:9000"

            [[rules]]
            name = "service1"
            condition = 'payload.text contains "[service1]"'
            destination = "https://hooks.slack.com/services/T0/B0/XXX"
            "#,
        )
        .unwrap();
        assert_eq!(config.listener.bind_address, "127.0.0.1:9000");
        assert_eq!(config.rules.len(), 1);
        assert_eq!(config.rules[0].name, "service1");
        // Unspecified sections keep their defaults.
        assert_eq!(config.timeouts.request_secs, 30);
    }
}

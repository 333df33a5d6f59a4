//! Core configuration structures for the gridbroker agent

use crate::{ConfigError, Result};
use serde::{Deserialize, Serialize};

/// Top-level agent configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AgentConfig {
    /// Edge-node settings: endpoints and agreement timing
    pub edge: EdgeConfig,

    /// Governance loop cadences
    #[serde(default)]
    pub governance: GovernanceConfig,

    /// Default log filter directive, overridable via RUST_LOG
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Endpoints and agreement timing for this edge node
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EdgeConfig {
    /// Ethereum node RPC endpoint
    pub geth_url: String,

    /// Producer registry (exchange) base URL
    pub exchange_url: String,

    /// How long an accepted agreement may stay unrecorded on chain, seconds
    #[serde(default = "default_agreement_timeout_s")]
    pub agreement_timeout_s: u64,

    /// Stable device identifier; when unset, falls back to the persisted
    /// exchange registration and finally a generated id
    #[serde(default)]
    pub device_id: Option<String>,
}

/// Cadences for the governance worker. Defaults are the production values;
/// tests shrink them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GovernanceConfig {
    /// Agreement-finalization scan interval, milliseconds
    #[serde(default = "default_finalization_interval_ms")]
    pub finalization_interval_ms: u64,

    /// Container-health scan interval, milliseconds
    #[serde(default = "default_maintenance_interval_ms")]
    pub maintenance_interval_ms: u64,

    /// How often the command processor re-checks the funding barrier,
    /// milliseconds
    #[serde(default = "default_barrier_poll_ms")]
    pub barrier_poll_ms: u64,

    /// Delay before retrying a transient registry failure, milliseconds
    #[serde(default = "default_registry_retry_delay_ms")]
    pub registry_retry_delay_ms: u64,
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        Self {
            finalization_interval_ms: default_finalization_interval_ms(),
            maintenance_interval_ms: default_maintenance_interval_ms(),
            barrier_poll_ms: default_barrier_poll_ms(),
            registry_retry_delay_ms: default_registry_retry_delay_ms(),
        }
    }
}

fn default_log_level() -> String {
    "info,gridbroker=debug".to_string()
}

fn default_agreement_timeout_s() -> u64 {
    3600
}

fn default_finalization_interval_ms() -> u64 {
    10_000
}

fn default_maintenance_interval_ms() -> u64 {
    60_000
}

fn default_barrier_poll_ms() -> u64 {
    5_000
}

fn default_registry_retry_delay_ms() -> u64 {
    10_000
}

/// Validate the loaded configuration before the agent starts
pub fn validate_config(config: &AgentConfig) -> Result<()> {
    let mut errors = Vec::new();

    if config.edge.geth_url.is_empty() {
        errors.push("edge.geth_url: must not be empty".to_string());
    } else if !is_url(&config.edge.geth_url) {
        errors.push("edge.geth_url: must be an http(s) URL".to_string());
    }

    if config.edge.exchange_url.is_empty() {
        errors.push("edge.exchange_url: must not be empty".to_string());
    } else if !is_url(&config.edge.exchange_url) {
        errors.push("edge.exchange_url: must be an http(s) URL".to_string());
    }

    if config.edge.agreement_timeout_s == 0 {
        errors.push("edge.agreement_timeout_s: must be greater than 0".to_string());
    }

    let gov = &config.governance;
    for (field, value) in [
        ("finalization_interval_ms", gov.finalization_interval_ms),
        ("maintenance_interval_ms", gov.maintenance_interval_ms),
        ("barrier_poll_ms", gov.barrier_poll_ms),
        ("registry_retry_delay_ms", gov.registry_retry_delay_ms),
    ] {
        if value == 0 {
            errors.push(format!("governance.{}: must be greater than 0", field));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationError(errors.join("; ")))
    }
}

fn is_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> AgentConfig {
        AgentConfig {
            edge: EdgeConfig {
                geth_url: "http://localhost:8545".to_string(),
                exchange_url: "https://exchange.example.com/api/v1".to_string(),
                agreement_timeout_s: 3600,
                device_id: None,
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_governance_defaults_match_production_cadences() {
        let gov = GovernanceConfig::default();
        assert_eq!(gov.finalization_interval_ms, 10_000);
        assert_eq!(gov.maintenance_interval_ms, 60_000);
        assert_eq!(gov.barrier_poll_ms, 5_000);
        assert_eq!(gov.registry_retry_delay_ms, 10_000);
    }

    #[test]
    fn test_validate_accepts_valid_config() {
        assert!(validate_config(&valid_config()).is_ok());
    }

    #[test]
    fn test_validate_rejects_missing_urls() {
        let mut config = valid_config();
        config.edge.geth_url = String::new();
        config.edge.exchange_url = "not a url".to_string();

        let err = validate_config(&config).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("edge.geth_url"));
        assert!(message.contains("edge.exchange_url"));
    }

    #[test]
    fn test_validate_rejects_zero_intervals() {
        let mut config = valid_config();
        config.edge.agreement_timeout_s = 0;
        config.governance.barrier_poll_ms = 0;

        let err = validate_config(&config).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("agreement_timeout_s"));
        assert!(message.contains("barrier_poll_ms"));
    }
}

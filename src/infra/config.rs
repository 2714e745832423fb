//! Process configuration, read from `SEEDBOX_`-prefixed environment
//! variables.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::application::services::ProvisioningAvailability;
use crate::domain::error::OrchestratorError;

fn default_sandbox_enabled() -> bool {
    true
}

fn default_max_parallel() -> usize {
    5
}

fn default_timeout_per_unit_secs() -> u64 {
    300
}

fn default_export_dir() -> PathBuf {
    PathBuf::from("./exports")
}

fn default_demo_ttl_secs() -> u64 {
    1800
}

fn default_reaper_interval_secs() -> u64 {
    30
}

fn default_event_ring_capacity() -> usize {
    256
}

fn default_model() -> String {
    "default".to_string()
}

fn default_temperature() -> f64 {
    0.7
}

/// Orchestrator configuration.
///
/// Every field has a default; only credentials are genuinely optional.
/// With `SEEDBOX_SANDBOX_ENABLED=false` or no API key, batch execution
/// silently selects the local fallback.
#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default = "default_sandbox_enabled")]
    pub sandbox_enabled: bool,
    #[serde(default)]
    pub provisioner_api_key: Option<String>,
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
    #[serde(default = "default_timeout_per_unit_secs")]
    pub timeout_per_unit_secs: u64,
    #[serde(default = "default_export_dir")]
    pub export_dir: PathBuf,
    #[serde(default = "default_demo_ttl_secs")]
    pub demo_ttl_secs: u64,
    #[serde(default)]
    pub webhook_signing_secret: Option<String>,
    #[serde(default = "default_reaper_interval_secs")]
    pub reaper_interval_secs: u64,
    #[serde(default = "default_event_ring_capacity")]
    pub event_ring_capacity: usize,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            sandbox_enabled: default_sandbox_enabled(),
            provisioner_api_key: None,
            max_parallel: default_max_parallel(),
            timeout_per_unit_secs: default_timeout_per_unit_secs(),
            export_dir: default_export_dir(),
            demo_ttl_secs: default_demo_ttl_secs(),
            webhook_signing_secret: None,
            reaper_interval_secs: default_reaper_interval_secs(),
            event_ring_capacity: default_event_ring_capacity(),
            model: default_model(),
            temperature: default_temperature(),
        }
    }
}

impl OrchestratorConfig {
    /// Read configuration from `SEEDBOX_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` when a variable is present but unparsable.
    pub fn from_env() -> Result<Self, OrchestratorError> {
        envy::prefixed("SEEDBOX_")
            .from_env::<Self>()
            .map_err(|err| OrchestratorError::Configuration(err.to_string()))
    }

    /// Decide, once, whether remote provisioning can be used.
    #[must_use]
    pub fn availability(&self) -> ProvisioningAvailability {
        if !self.sandbox_enabled {
            return ProvisioningAvailability::Unavailable {
                reason: "sandbox provisioning disabled by configuration".to_string(),
            };
        }
        if self.provisioner_api_key.as_deref().is_none_or(str::is_empty) {
            return ProvisioningAvailability::Unavailable {
                reason: "no provisioner API key configured".to_string(),
            };
        }
        ProvisioningAvailability::Available
    }

    #[must_use]
    pub fn timeout_per_unit(&self) -> Duration {
        Duration::from_secs(self.timeout_per_unit_secs)
    }

    #[must_use]
    pub fn demo_ttl(&self) -> Duration {
        Duration::from_secs(self.demo_ttl_secs)
    }

    #[must_use]
    pub fn reaper_interval(&self) -> Duration {
        Duration::from_secs(self.reaper_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_usable_without_any_environment() {
        let config = OrchestratorConfig::default();
        assert!(config.sandbox_enabled);
        assert_eq!(config.max_parallel, 5);
        assert_eq!(config.timeout_per_unit(), Duration::from_secs(300));
        assert_eq!(config.demo_ttl(), Duration::from_secs(1800));
    }

    #[test]
    fn availability_requires_enabled_flag_and_api_key() {
        let mut config = OrchestratorConfig::default();
        assert!(matches!(
            config.availability(),
            ProvisioningAvailability::Unavailable { .. }
        ));

        config.provisioner_api_key = Some("key-123".to_string());
        assert_eq!(config.availability(), ProvisioningAvailability::Available);

        config.sandbox_enabled = false;
        let ProvisioningAvailability::Unavailable { reason } = config.availability() else {
            panic!("disabled flag must win over the key");
        };
        assert!(reason.contains("disabled"));
    }

    #[test]
    fn empty_api_key_counts_as_missing() {
        let config = OrchestratorConfig {
            provisioner_api_key: Some(String::new()),
            ..OrchestratorConfig::default()
        };
        assert!(matches!(
            config.availability(),
            ProvisioningAvailability::Unavailable { .. }
        ));
    }
}

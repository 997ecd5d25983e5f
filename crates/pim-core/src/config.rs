//! Configuration types and persisted keys
//!
//! This module defines the configuration structures used throughout the
//! crate and the keys under which state is kept in the [`ConfigStore`].
//!
//! [`ConfigStore`]: crate::traits::ConfigStore

use serde::{Deserialize, Serialize};

/// Namespace of the keys owned by this package
pub const NAMESPACE: &str = "proxy_ip_manager";

/// Provider table: handle -> `{abstract, enabled, configuration?, lastIPs?}`
pub const PROVIDERS_KEY: &str = "proxy_ip_manager::providers";

/// Whether automatic updates are enabled
pub const AUTO_UPDATING_ENABLED_KEY: &str = "proxy_ip_manager::updates.auto_updating.enabled";

/// Interval between automatic updates, in seconds
pub const AUTO_UPDATING_INTERVAL_KEY: &str = "proxy_ip_manager::updates.auto_updating.interval";

/// Unix timestamp of the last update cycle (0 or absent = never run)
pub const LAST_RUN_KEY: &str = "proxy_ip_manager::updates.last_run";

/// Host-owned list of trusted proxy addresses
pub const TRUSTED_PROXIES_KEY: &str = "concrete.security.trusted_proxies.ips";

/// Updater settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdaterConfig {
    /// Keep processing the remaining providers when one of them faults
    ///
    /// When `false` (the default) a fault raised by a provider aborts the
    /// rest of the cycle; the cycle-level guard still logs it and records
    /// the run timestamp.
    #[serde(default)]
    pub isolate_provider_faults: bool,
}

impl UpdaterConfig {
    /// Enable or disable per-provider fault isolation
    pub fn with_isolate_provider_faults(mut self, isolate: bool) -> Self {
        self.isolate_provider_faults = isolate;
        self
    }
}

/// Automatic update settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoUpdateSettings {
    /// Whether callers should trigger cycles on their own
    #[serde(default)]
    pub enabled: bool,

    /// Minimum number of seconds between two cycles
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

impl AutoUpdateSettings {
    /// Validate the settings
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.interval_secs == 0 {
            return Err(crate::Error::config(
                "Auto-update interval must be greater than 0 seconds",
            ));
        }
        Ok(())
    }
}

impl Default for AutoUpdateSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: default_interval_secs(),
        }
    }
}

/// One day
pub(crate) fn default_interval_secs() -> u64 {
    86_400
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_share_namespace() {
        for key in [
            PROVIDERS_KEY,
            AUTO_UPDATING_ENABLED_KEY,
            AUTO_UPDATING_INTERVAL_KEY,
            LAST_RUN_KEY,
        ] {
            assert!(key.starts_with(&format!("{}::", NAMESPACE)));
        }
        assert!(!TRUSTED_PROXIES_KEY.contains("::"));
    }

    #[test]
    fn test_updater_config_defaults() {
        let config: UpdaterConfig = serde_json::from_str("{}").unwrap();
        assert!(!config.isolate_provider_faults);
        assert!(config.with_isolate_provider_faults(true).isolate_provider_faults);
    }

    #[test]
    fn test_auto_update_settings_validation() {
        assert!(AutoUpdateSettings::default().validate().is_ok());

        let settings = AutoUpdateSettings {
            enabled: true,
            interval_secs: 0,
        };
        assert!(settings.validate().is_err());
    }
}

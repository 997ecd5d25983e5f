//! Trusted proxy list updater
//!
//! The Updater is responsible for:
//! - Invoking every enabled provider, one after the other
//! - Normalizing and deduplicating the returned addresses
//! - Reporting what changed since the provider's previous fetch
//! - Writing the merged list to the host's trusted proxy configuration
//! - Recording when the cycle ran, whatever happened
//!
//! ## Cycle
//!
//! ```text
//! Start ─► ListingProviders ─► ( Invoking ─► Normalizing ─► Diffing )* ─► Merging ─► Persisting ─► Done
//!                 │                          │                                  │
//!                 └──────────────────────────┴───── fault ──► Failed ◄──────────┘
//!
//! last_run is recorded after Done and after Failed
//! ```
//!
//! ## Fault Handling
//!
//! Soft errors reported by providers are logged and the cycle goes on. An
//! `Err` from a provider, the registry or the store aborts the cycle; it is
//! logged at critical level and never propagated to the caller. With
//! [`UpdaterConfig::isolate_provider_faults`] a provider fault only skips
//! that provider.

pub mod console;

pub use console::{BufferedConsole, ConsoleSink, LogLevel, Verbosity};

use crate::address::{dedup_preserving_order, normalize_list};
use crate::config::{TRUSTED_PROXIES_KEY, UpdaterConfig};
use crate::error::{Error, Result};
use crate::registry::ProviderRegistry;
use crate::schedule::UpdateSchedule;
use crate::traits::{ConfigStore, Provider};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Result of probing a single provider
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProbeResult {
    /// Normalized, deduplicated addresses
    pub addresses: Vec<String>,
    /// Provider errors followed by rejected entries
    pub errors: Vec<String>,
}

/// Updater of the host's trusted proxy list
///
/// ## Lifecycle
///
/// 1. Create with [`Updater::new()`]
/// 2. Optionally tune with [`Updater::with_config()`] and
///    [`Updater::attach_console()`]
/// 3. Call [`Updater::process_enabled_providers()`] whenever a cycle should run
///
/// ## Concurrency
///
/// Cycles are not mutually exclusive. Two overlapping cycles both write
/// their results and the last one wins.
pub struct Updater {
    registry: Arc<ProviderRegistry>,
    store: Arc<dyn ConfigStore>,
    schedule: UpdateSchedule,
    config: UpdaterConfig,
    console: Option<Arc<dyn ConsoleSink>>,
}

impl Updater {
    /// Create an updater
    ///
    /// `store` holds the host's trusted proxy list and the last-run
    /// timestamp; it is normally the same store that backs `registry`.
    pub fn new(registry: Arc<ProviderRegistry>, store: Arc<dyn ConfigStore>) -> Self {
        Self {
            registry,
            schedule: UpdateSchedule::new(Arc::clone(&store)),
            store,
            config: UpdaterConfig::default(),
            console: None,
        }
    }

    /// Replace the updater settings
    pub fn with_config(mut self, config: UpdaterConfig) -> Self {
        self.config = config;
        self
    }

    /// Mirror log events to `console`
    pub fn attach_console(mut self, console: Arc<dyn ConsoleSink>) -> Self {
        self.console = Some(console);
        self
    }

    /// Run one full update cycle over the enabled providers
    ///
    /// Never fails: faults are logged at critical level. The run timestamp
    /// is recorded in every case so a failing provider is not retried on
    /// every request by callers that auto-update.
    pub async fn process_enabled_providers(&self) {
        if let Err(e) = self.run_cycle().await {
            self.write(LogLevel::Critical, &e.to_string());
        }

        self.write(LogLevel::Debug, "# Saving date/time of current execution");
        if let Err(e) = self.schedule.record_run(chrono::Utc::now()).await {
            self.write(
                LogLevel::Critical,
                &format!("Failed to record the execution time: {}", e),
            );
        }
    }

    /// Fetch and normalize the addresses of one provider
    ///
    /// Nothing is persisted: the provider's last addresses and the host's
    /// trusted proxy list are left alone.
    pub async fn probe_provider(&self, handle: &str) -> Result<ProbeResult> {
        let provider = self
            .registry
            .get_by_handle(handle)
            .await?
            .ok_or_else(|| Error::UnregisteredHandle(handle.to_string()))?;
        let configuration = self.registry.get_configuration(handle).await?;

        let outcome = provider
            .fetch_addresses(configuration.as_ref())
            .await
            .map_err(|e| Error::provider(handle, e.to_string()))?;

        let normalized = normalize_list(&outcome.addresses);
        let mut errors = outcome.errors;
        errors.extend(
            normalized
                .invalid
                .iter()
                .map(|ip| format!("Invalid IP address: {}", ip)),
        );

        Ok(ProbeResult {
            addresses: normalized.addresses,
            errors,
        })
    }

    async fn run_cycle(&self) -> Result<()> {
        self.write(LogLevel::Debug, "# Listing enabled providers");
        let providers: Vec<(String, Result<Provider>)> = if self.config.isolate_provider_faults {
            // Resolution failures are handled per provider below
            self.registry.list_resolved(Some(true)).await?
        } else {
            self.registry
                .list(Some(true))
                .await?
                .into_iter()
                .map(|(handle, provider)| (handle, Ok(provider)))
                .collect()
        };

        let mut ips = Vec::new();
        if providers.is_empty() {
            self.write(LogLevel::Debug, "No enabled providers found.");
        }
        for (handle, provider) in &providers {
            let result = match provider {
                Ok(provider) => self.process_provider(handle, provider).await,
                Err(e) => Err(Error::provider(handle.as_str(), e.to_string())),
            };
            match result {
                Ok(provider_ips) => ips.extend(provider_ips),
                Err(e) if self.config.isolate_provider_faults => {
                    self.write(
                        LogLevel::Error,
                        &format!("Provider \"{}\" skipped: {}", handle, e),
                    );
                }
                Err(e) => return Err(e),
            }
        }

        self.write(LogLevel::Debug, "# Saving final list of IPs");
        self.apply_ips(dedup_preserving_order(ips)).await
    }

    /// Fetch, normalize, diff and persist the addresses of one provider
    async fn process_provider(&self, handle: &str, provider: &Provider) -> Result<Vec<String>> {
        self.write(LogLevel::Info, &format!("> Invoking provider \"{}\"", handle));

        let old_ips = self.registry.get_last_ips(handle).await?;
        let configuration = self.registry.get_configuration(handle).await?;

        let outcome = provider
            .fetch_addresses(configuration.as_ref())
            .await
            .map_err(|e| Error::provider(handle, e.to_string()))?;
        for error in &outcome.errors {
            self.write(LogLevel::Error, error);
        }
        self.write(
            LogLevel::Debug,
            &format!("Resulting IPs: {}", outcome.addresses.join(" ")),
        );

        let ips = self.check_ip_list(&outcome.addresses);
        self.write(
            LogLevel::Debug,
            &format!("Resulting IPs after normalization: {}", ips.join(" ")),
        );

        self.check_changed_ips(handle, &old_ips, &ips);
        self.registry.set_last_ips(handle, &ips).await?;

        Ok(ips)
    }

    /// Normalize a list of addresses, logging the rejected ones
    fn check_ip_list(&self, ips: &[String]) -> Vec<String> {
        let normalized = normalize_list(ips);
        for ip in &normalized.invalid {
            self.write(LogLevel::Error, &format!("Invalid IP address: {}", ip));
        }
        normalized.addresses
    }

    /// Log the differences between two fetches of a provider
    fn check_changed_ips(&self, handle: &str, old_ips: &[String], new_ips: &[String]) {
        let added = difference(new_ips, old_ips);
        let removed = difference(old_ips, new_ips);

        if !added.is_empty() {
            self.write(
                LogLevel::Notice,
                &format!(
                    "New IPs from proxy IP provider \"{}\": {}",
                    handle,
                    added.join(" ")
                ),
            );
        }
        if !removed.is_empty() {
            self.write(
                LogLevel::Notice,
                &format!(
                    "IPs no longer provided by proxy IP provider \"{}\": {}",
                    handle,
                    removed.join(" ")
                ),
            );
        }
        if added.is_empty() && removed.is_empty() {
            self.write(LogLevel::Debug, "No IP changes detected.");
        }
    }

    /// Write the merged list to the host configuration, if it changed
    async fn apply_ips(&self, new_ips: Vec<String>) -> Result<()> {
        let old_ips: Vec<String> = match self.store.get(TRUSTED_PROXIES_KEY).await? {
            Some(Value::Array(values)) => values
                .iter()
                .filter_map(|value| value.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        };

        let old_set: HashSet<&String> = old_ips.iter().collect();
        let new_set: HashSet<&String> = new_ips.iter().collect();
        if old_set == new_set {
            self.write(LogLevel::Info, "No changes in the final proxy IP list.");
            return Ok(());
        }

        self.store
            .set(TRUSTED_PROXIES_KEY, serde_json::to_value(&new_ips)?)
            .await?;
        self.write(
            LogLevel::Notice,
            "Changes to the final proxy IP list have been persisted.",
        );
        Ok(())
    }

    /// Log `message` and mirror it to the attached console
    fn write(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Debug => debug!("{}", message),
            LogLevel::Info | LogLevel::Notice => info!("{}", message),
            LogLevel::Error => error!("{}", message),
            LogLevel::Critical => error!(critical = true, "{}", message),
        }

        if let Some(console) = &self.console
            && console.verbosity().shows(level)
        {
            console.write_line(message);
        }
    }
}

/// Entries of `left` missing from `right`, in `left` order
fn difference<'a>(left: &'a [String], right: &[String]) -> Vec<&'a str> {
    let right: HashSet<&str> = right.iter().map(String::as_str).collect();
    left.iter()
        .map(String::as_str)
        .filter(|ip| !right.contains(ip))
        .collect()
}

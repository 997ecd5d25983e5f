// # Manual Proxy IP Provider
//
// A configurable provider whose addresses are typed in by an administrator.
//
// ## Configuration
//
// ```json
// { "ips": ["10.0.0.1", "192.168.0.0/16", "2001:db8::/32"] }
// ```
//
// Submitted input may be either an array of strings or a single string with
// whitespace-separated entries (the shape produced by a textarea). Validation
// normalizes every entry, drops duplicates and rejects anything that is not
// an address or a CIDR range.
//
// ## Fetch
//
// The saved `ips` are returned verbatim. Normalization of the result is the
// updater's job, so a configuration saved without validation still goes
// through the same checks.

use async_trait::async_trait;
use pim_core::address;
use pim_core::registry::ProviderCatalog;
use pim_core::traits::{
    Configuration, ConfigurableProvider, FetchOutcome, Provider, ProxyIpProvider,
    ValidatedConfiguration,
};
use pim_core::Result;
use serde_json::Value;

/// Reference under which [`register`] makes the provider available
pub const MANUAL_PROVIDER_REFERENCE: &str = "manual";

/// Configuration key holding the address list
const IPS_KEY: &str = "ips";

/// Manually maintained list of proxy addresses
#[derive(Debug, Clone, Copy, Default)]
pub struct ManualProvider;

impl ManualProvider {
    /// Create a new manual provider
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProxyIpProvider for ManualProvider {
    fn name(&self) -> String {
        "Manual list of IP addresses".to_string()
    }

    async fn fetch_addresses(&self, configuration: Option<&Configuration>) -> Result<FetchOutcome> {
        let mut outcome = FetchOutcome::default();

        match configuration.and_then(|c| c.get(IPS_KEY)) {
            None | Some(Value::Null) => {}
            Some(Value::Array(ips)) => {
                for ip in ips {
                    match ip.as_str() {
                        Some(ip) => outcome.addresses.push(ip.to_string()),
                        None => outcome
                            .errors
                            .push(format!("Ignoring non-string entry {} in \"ips\"", ip)),
                    }
                }
            }
            Some(other) => outcome
                .errors
                .push(format!("\"ips\" must be a list, found {}", other)),
        }

        tracing::debug!(
            "Manual provider returned {} entries",
            outcome.addresses.len()
        );
        Ok(outcome)
    }
}

impl ConfigurableProvider for ManualProvider {
    fn default_configuration(&self) -> Configuration {
        let mut configuration = Configuration::new();
        configuration.insert(IPS_KEY.to_string(), Value::Array(Vec::new()));
        configuration
    }

    fn validate_configuration(&self, raw: &Configuration) -> ValidatedConfiguration {
        let mut errors = Vec::new();

        let tokens: Vec<String> = match raw.get(IPS_KEY) {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::String(text)) => text.split_whitespace().map(str::to_string).collect(),
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|item| match item {
                    Value::String(ip) => Some(ip.trim().to_string()),
                    other => {
                        errors.push(format!("The IP address \"{}\" is not valid.", other));
                        None
                    }
                })
                .filter(|ip| !ip.is_empty())
                .collect(),
            Some(other) => {
                errors.push(format!(
                    "\"ips\" must be a list of IP addresses, found {}",
                    other
                ));
                Vec::new()
            }
        };

        let normalized = address::normalize_list(&tokens);
        errors.extend(
            normalized
                .invalid
                .iter()
                .map(|ip| format!("The IP address \"{}\" is not valid.", ip)),
        );

        let mut configuration = Configuration::new();
        configuration.insert(
            IPS_KEY.to_string(),
            Value::Array(normalized.addresses.into_iter().map(Value::String).collect()),
        );

        ValidatedConfiguration {
            configuration,
            errors,
        }
    }
}

/// Register the manual provider with a catalog
///
/// # Example
///
/// ```rust
/// use pim_core::registry::ProviderCatalog;
///
/// let mut catalog = ProviderCatalog::new();
/// pim_provider_manual::register(&mut catalog);
/// assert!(catalog.has_factory(pim_provider_manual::MANUAL_PROVIDER_REFERENCE));
/// ```
pub fn register(catalog: &mut ProviderCatalog) {
    catalog.register_fn(MANUAL_PROVIDER_REFERENCE, || {
        Ok(Provider::configurable(ManualProvider::new()))
    });
}

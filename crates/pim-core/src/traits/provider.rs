// # Proxy IP Provider Traits
//
// Defines the contract every source of trusted proxy addresses implements.
//
// ## Variants
//
// - `ProxyIpProvider`: a basic provider, fetched without configuration
// - `ConfigurableProvider`: additionally owns a default configuration and
//   validates configuration submitted by an administrator
//
// The registry never duck-types: a resolved provider is a `Provider` value
// that says which of the two contracts it implements.
//
// ## Usage
//
// ```rust,ignore
// use pim_core::traits::{Provider, ProxyIpProvider};
//
// let outcome = provider.fetch_addresses(configuration.as_ref()).await?;
// for error in &outcome.errors {
//     tracing::error!("{}", error);
// }
// ```

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Provider configuration (a JSON object)
pub type Configuration = serde_json::Map<String, serde_json::Value>;

/// Addresses returned by a provider together with soft errors
///
/// Errors are collected rather than raised so a partial success (some
/// addresses plus some messages) can be reported.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchOutcome {
    /// Addresses or CIDR ranges, not yet normalized
    pub addresses: Vec<String>,
    /// Problems detected while fetching
    pub errors: Vec<String>,
}

impl FetchOutcome {
    /// Create an outcome without errors
    pub fn new(addresses: Vec<String>) -> Self {
        Self {
            addresses,
            errors: Vec::new(),
        }
    }

    /// Create an outcome that carries a single error and no addresses
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            addresses: Vec::new(),
            errors: vec![error.into()],
        }
    }
}

/// Configuration produced by [`ConfigurableProvider::validate_configuration`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidatedConfiguration {
    /// Normalized configuration, ready to be persisted
    pub configuration: Configuration,
    /// Validation messages; a non-empty list blocks the save
    pub errors: Vec<String>,
}

/// Trait for trusted proxy IP providers
///
/// # Contract
///
/// - `fetch_addresses` receives `None` if and only if the provider is not
///   configurable.
/// - Problems that only affect part of the result go into
///   [`FetchOutcome::errors`].
/// - Returning `Err` signals an unexpected fault. The updater treats it as
///   fatal for the running cycle.
/// - Providers own their own time bounds; the updater never cancels them.
#[async_trait]
pub trait ProxyIpProvider: Send + Sync {
    /// Human-readable name of the provider
    fn name(&self) -> String;

    /// Retrieve the proxy addresses (single IPs or CIDR ranges, v4 or v6)
    async fn fetch_addresses(
        &self,
        configuration: Option<&Configuration>,
    ) -> Result<FetchOutcome, crate::Error>;
}

/// Trait for providers that accept an administrator-supplied configuration
pub trait ConfigurableProvider: ProxyIpProvider {
    /// Configuration used until one is explicitly saved
    fn default_configuration(&self) -> Configuration;

    /// Check and normalize raw configuration input
    fn validate_configuration(&self, raw: &Configuration) -> ValidatedConfiguration;
}

/// A resolved provider instance
#[derive(Clone)]
pub enum Provider {
    /// Provider without configuration
    Plain(Arc<dyn ProxyIpProvider>),
    /// Provider with configuration support
    Configurable(Arc<dyn ConfigurableProvider>),
}

impl Provider {
    /// Wrap a basic provider
    pub fn plain<P: ProxyIpProvider + 'static>(provider: P) -> Self {
        Self::Plain(Arc::new(provider))
    }

    /// Wrap a configurable provider
    pub fn configurable<P: ConfigurableProvider + 'static>(provider: P) -> Self {
        Self::Configurable(Arc::new(provider))
    }

    /// Human-readable name of the provider
    pub fn name(&self) -> String {
        match self {
            Self::Plain(provider) => provider.name(),
            Self::Configurable(provider) => provider.name(),
        }
    }

    /// Whether the provider implements [`ConfigurableProvider`]
    pub fn is_configurable(&self) -> bool {
        matches!(self, Self::Configurable(_))
    }

    /// Access the configurable contract, if implemented
    pub fn as_configurable(&self) -> Option<&Arc<dyn ConfigurableProvider>> {
        match self {
            Self::Plain(_) => None,
            Self::Configurable(provider) => Some(provider),
        }
    }

    /// Retrieve the proxy addresses
    pub async fn fetch_addresses(
        &self,
        configuration: Option<&Configuration>,
    ) -> Result<FetchOutcome, crate::Error> {
        match self {
            Self::Plain(provider) => provider.fetch_addresses(configuration).await,
            Self::Configurable(provider) => provider.fetch_addresses(configuration).await,
        }
    }
}

impl fmt::Debug for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Provider")
            .field("name", &self.name())
            .field("configurable", &self.is_configurable())
            .finish()
    }
}

/// Helper trait for constructing providers
///
/// Factories are registered in a [`ProviderCatalog`](crate::registry::ProviderCatalog)
/// under a reference name; the registry persists only that name and resolves
/// the instance lazily.
pub trait ProviderFactory: Send + Sync {
    /// Create a provider instance
    fn create(&self) -> Result<Provider, crate::Error>;
}

impl<F> ProviderFactory for F
where
    F: Fn() -> Result<Provider, crate::Error> + Send + Sync,
{
    fn create(&self) -> Result<Provider, crate::Error> {
        self()
    }
}

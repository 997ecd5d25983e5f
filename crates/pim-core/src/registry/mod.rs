//! Provider registry
//!
//! The registry tracks which providers are registered, whether they are
//! enabled, their configuration and the addresses they returned last time.
//!
//! ## Two tiers
//!
//! - A persisted table in the [`ConfigStore`], under
//!   [`PROVIDERS_KEY`](crate::config::PROVIDERS_KEY), mapping each handle to
//!   a factory reference plus its state.
//! - A runtime-only cache of resolved [`Provider`] instances, filled on first
//!   lookup and never persisted.
//!
//! Factory references are resolved through a [`ProviderCatalog`] supplied by
//! the caller.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use pim_core::registry::{ProviderCatalog, ProviderRegistry};
//!
//! let mut catalog = ProviderCatalog::new();
//! pim_provider_manual::register(&mut catalog);
//!
//! let registry = ProviderRegistry::new(store, catalog);
//! registry.register("manual", "manual", true).await?;
//! ```
//!
//! ## Persistence
//!
//! Every mutating call is a read-modify-write of the provider table followed
//! by one store write. Nothing is batched across calls.

use crate::config::PROVIDERS_KEY;
use crate::error::{Error, Result};
use crate::traits::{Configuration, ConfigStore, Provider, ProviderFactory};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Factories available to resolve provider references
///
/// The catalog maps a reference name (the `abstract` persisted with each
/// provider record) to the factory that builds the instance.
#[derive(Default)]
pub struct ProviderCatalog {
    factories: HashMap<String, Box<dyn ProviderFactory>>,
}

impl ProviderCatalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider factory under `reference`
    ///
    /// A later registration under the same reference replaces the earlier one.
    pub fn register_factory(
        &mut self,
        reference: impl Into<String>,
        factory: Box<dyn ProviderFactory>,
    ) {
        self.factories.insert(reference.into(), factory);
    }

    /// Register a closure as the factory for `reference`
    pub fn register_fn<F>(&mut self, reference: impl Into<String>, factory: F)
    where
        F: Fn() -> Result<Provider> + Send + Sync + 'static,
    {
        self.register_factory(reference, Box::new(factory));
    }

    /// Check if a factory is registered under `reference`
    pub fn has_factory(&self, reference: &str) -> bool {
        self.factories.contains_key(reference)
    }

    /// List all registered references, sorted
    pub fn references(&self) -> Vec<String> {
        let mut references: Vec<String> = self.factories.keys().cloned().collect();
        references.sort();
        references
    }

    /// Build the provider registered under `reference`
    fn resolve(&self, reference: &str) -> Result<Provider> {
        let factory = self
            .factories
            .get(reference)
            .ok_or_else(|| Error::NotAProvider(reference.to_string()))?;

        debug!("Resolving provider reference {}", reference);
        factory
            .create()
            .map_err(|e| Error::resolution_failed(reference, e))
    }
}

/// Persisted state of one registered provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderRecord {
    /// Catalog reference used to build the provider
    #[serde(rename = "abstract")]
    pub factory: String,

    /// Whether the provider takes part in update cycles
    #[serde(default)]
    pub enabled: bool,

    /// Saved configuration (configurable providers only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration: Option<Configuration>,

    /// Normalized addresses returned by the last fetch
    #[serde(default, rename = "lastIPs", skip_serializing_if = "Option::is_none")]
    pub last_ips: Option<Vec<String>>,
}

impl ProviderRecord {
    fn new(factory: impl Into<String>, enabled: bool) -> Self {
        Self {
            factory: factory.into(),
            enabled,
            configuration: None,
            last_ips: None,
        }
    }
}

/// Provider table in registration order
#[derive(Debug, Default)]
struct ProviderTable {
    records: Vec<(String, ProviderRecord)>,
}

impl ProviderTable {
    fn from_value(value: Option<Value>) -> Result<Self> {
        let map = match value {
            None | Some(Value::Null) => return Ok(Self::default()),
            Some(Value::Object(map)) => map,
            Some(other) => {
                return Err(Error::config_store(format!(
                    "{} must be an object, found {}",
                    PROVIDERS_KEY, other
                )));
            }
        };

        let records = map
            .into_iter()
            .map(|(handle, record)| Ok((handle, serde_json::from_value::<ProviderRecord>(record)?)))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { records })
    }

    fn to_value(&self) -> Result<Value> {
        let mut map = serde_json::Map::with_capacity(self.records.len());
        for (handle, record) in &self.records {
            map.insert(handle.clone(), serde_json::to_value(record)?);
        }
        Ok(Value::Object(map))
    }

    fn get(&self, handle: &str) -> Option<&ProviderRecord> {
        self.records
            .iter()
            .find(|(h, _)| h == handle)
            .map(|(_, record)| record)
    }

    fn get_mut(&mut self, handle: &str) -> Option<&mut ProviderRecord> {
        self.records
            .iter_mut()
            .find(|(h, _)| h == handle)
            .map(|(_, record)| record)
    }

    fn require_mut(&mut self, handle: &str) -> Result<&mut ProviderRecord> {
        self.get_mut(handle)
            .ok_or_else(|| Error::UnregisteredHandle(handle.to_string()))
    }

    fn insert(&mut self, handle: &str, record: ProviderRecord) {
        self.records.push((handle.to_string(), record));
    }

    fn remove(&mut self, handle: &str) -> bool {
        let before = self.records.len();
        self.records.retain(|(h, _)| h != handle);
        self.records.len() != before
    }
}

/// Display-oriented description of a registered provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderSummary {
    /// Unique handle
    pub handle: String,
    /// Human-readable name
    pub name: String,
    /// Whether the provider takes part in update cycles
    pub enabled: bool,
    /// Whether the provider accepts a configuration
    pub configurable: bool,
}

/// Registry of trusted proxy IP providers
///
/// ## Thread Safety
///
/// The instance cache sits behind an async `RwLock`; persisted state is only
/// touched through the config store. Concurrent mutations of the provider
/// table are last-write-wins.
pub struct ProviderRegistry {
    store: Arc<dyn ConfigStore>,
    catalog: ProviderCatalog,
    instances: RwLock<HashMap<String, Provider>>,
}

impl ProviderRegistry {
    /// Create a registry backed by `store`, resolving references via `catalog`
    pub fn new(store: Arc<dyn ConfigStore>, catalog: ProviderCatalog) -> Self {
        Self {
            store,
            catalog,
            instances: RwLock::new(HashMap::new()),
        }
    }

    /// The factory catalog used for resolution
    pub fn catalog(&self) -> &ProviderCatalog {
        &self.catalog
    }

    /// Register a new provider
    ///
    /// The provider is resolved eagerly to make sure `reference` denotes a
    /// working provider, then the record is persisted.
    ///
    /// # Errors
    ///
    /// - [`Error::DuplicateHandle`]: `handle` is already registered (the
    ///   existing record is left untouched)
    /// - [`Error::NotAProvider`]: `reference` is unknown to the catalog
    /// - [`Error::ResolutionFailed`]: the factory failed
    pub async fn register(&self, handle: &str, reference: &str, enabled: bool) -> Result<()> {
        if handle.is_empty() {
            return Err(Error::config("Provider handle cannot be empty"));
        }

        let mut table = self.load_table().await?;
        if table.get(handle).is_some() {
            return Err(Error::DuplicateHandle(handle.to_string()));
        }

        let provider = self.catalog.resolve(reference)?;

        table.insert(handle, ProviderRecord::new(reference, enabled));
        self.save_table(&table).await?;
        self.instances
            .write()
            .await
            .insert(handle.to_string(), provider);

        info!(
            "Registered provider {} ({}), enabled: {}",
            handle, reference, enabled
        );
        Ok(())
    }

    /// Unregister a provider
    ///
    /// Unknown handles are ignored.
    pub async fn unregister(&self, handle: &str) -> Result<()> {
        let mut table = self.load_table().await?;
        if table.remove(handle) {
            self.save_table(&table).await?;
            info!("Unregistered provider {}", handle);
        }
        self.instances.write().await.remove(handle);
        Ok(())
    }

    /// Get a registered provider given its handle
    ///
    /// # Returns
    ///
    /// - `Ok(Some(Provider))`: The resolved (and now cached) provider
    /// - `Ok(None)`: No provider registered with `handle`
    /// - `Err(Error)`: Resolution failed
    pub async fn get_by_handle(&self, handle: &str) -> Result<Option<Provider>> {
        let table = self.load_table().await?;
        match table.get(handle) {
            Some(record) => Ok(Some(self.instance_for(handle, record).await?)),
            None => Ok(None),
        }
    }

    /// List providers in registration order
    ///
    /// `None` returns every provider, `Some(true)` only the enabled ones and
    /// `Some(false)` only the disabled ones.
    pub async fn list(&self, enabled: Option<bool>) -> Result<Vec<(String, Provider)>> {
        self.list_resolved(enabled)
            .await?
            .into_iter()
            .map(|(handle, provider)| Ok((handle, provider?)))
            .collect()
    }

    /// Like [`list`](Self::list), but resolution failures are reported per
    /// handle instead of failing the whole listing
    ///
    /// Only a failure to read the provider table is returned as the outer
    /// error.
    pub async fn list_resolved(
        &self,
        enabled: Option<bool>,
    ) -> Result<Vec<(String, Result<Provider>)>> {
        let table = self.load_table().await?;
        let mut providers = Vec::new();

        for (handle, record) in &table.records {
            if enabled.is_some_and(|wanted| wanted != record.enabled) {
                continue;
            }
            let provider = self.instance_for(handle, record).await;
            providers.push((handle.clone(), provider));
        }

        Ok(providers)
    }

    /// Describe every registered provider
    pub async fn summaries(&self) -> Result<Vec<ProviderSummary>> {
        let table = self.load_table().await?;
        let mut summaries = Vec::with_capacity(table.records.len());

        for (handle, record) in &table.records {
            let provider = self.instance_for(handle, record).await?;
            summaries.push(ProviderSummary {
                handle: handle.clone(),
                name: provider.name(),
                enabled: record.enabled,
                configurable: provider.is_configurable(),
            });
        }

        Ok(summaries)
    }

    /// Check if a provider is enabled
    ///
    /// Returns `None` if no provider is registered with `handle`.
    pub async fn is_enabled(&self, handle: &str) -> Result<Option<bool>> {
        let table = self.load_table().await?;
        Ok(table.get(handle).map(|record| record.enabled))
    }

    /// Enable or disable a provider
    pub async fn set_enabled(&self, handle: &str, enabled: bool) -> Result<()> {
        let mut table = self.load_table().await?;
        table.require_mut(handle)?.enabled = enabled;
        self.save_table(&table).await?;

        info!(
            "Provider {} {}",
            handle,
            if enabled { "enabled" } else { "disabled" }
        );
        Ok(())
    }

    /// Get the configuration of a provider
    ///
    /// Returns `None` for providers that are not configurable. When nothing
    /// has been saved yet the provider's defaults are returned (and not
    /// persisted).
    pub async fn get_configuration(&self, handle: &str) -> Result<Option<Configuration>> {
        let table = self.load_table().await?;
        let record = table
            .get(handle)
            .ok_or_else(|| Error::UnregisteredHandle(handle.to_string()))?;

        let provider = self.instance_for(handle, record).await?;
        let Some(configurable) = provider.as_configurable() else {
            return Ok(None);
        };

        Ok(Some(match &record.configuration {
            Some(configuration) => configuration.clone(),
            None => configurable.default_configuration(),
        }))
    }

    /// Save the configuration of a configurable provider
    ///
    /// The configuration is stored as given; use
    /// [`configure`](Self::configure) to validate raw input first.
    pub async fn set_configuration(&self, handle: &str, configuration: Configuration) -> Result<()> {
        let mut table = self.load_table().await?;
        let record = table.require_mut(handle)?;

        let provider = self.instance_for(handle, record).await?;
        if !provider.is_configurable() {
            return Err(Error::NotConfigurable(handle.to_string()));
        }

        record.configuration = Some(configuration);
        self.save_table(&table).await?;

        debug!("Saved configuration of provider {}", handle);
        Ok(())
    }

    /// Validate raw configuration input and save the result
    ///
    /// # Errors
    ///
    /// - [`Error::UnregisteredHandle`] / [`Error::NotConfigurable`]
    /// - [`Error::InvalidConfiguration`]: the provider reported errors; nothing
    ///   is saved
    pub async fn configure(&self, handle: &str, raw: &Configuration) -> Result<Configuration> {
        let provider = self
            .get_by_handle(handle)
            .await?
            .ok_or_else(|| Error::UnregisteredHandle(handle.to_string()))?;
        let configurable = provider
            .as_configurable()
            .ok_or_else(|| Error::NotConfigurable(handle.to_string()))?;

        let validated = configurable.validate_configuration(raw);
        if !validated.errors.is_empty() {
            return Err(Error::InvalidConfiguration {
                handle: handle.to_string(),
                errors: validated.errors,
            });
        }

        self.set_configuration(handle, validated.configuration.clone())
            .await?;
        Ok(validated.configuration)
    }

    /// Get the addresses a provider returned during the last cycle
    ///
    /// Empty if the provider was never fetched.
    pub async fn get_last_ips(&self, handle: &str) -> Result<Vec<String>> {
        let table = self.load_table().await?;
        let record = table
            .get(handle)
            .ok_or_else(|| Error::UnregisteredHandle(handle.to_string()))?;
        Ok(record.last_ips.clone().unwrap_or_default())
    }

    /// Replace the addresses a provider returned during the last cycle
    pub async fn set_last_ips(&self, handle: &str, ips: &[String]) -> Result<()> {
        let mut table = self.load_table().await?;
        table.require_mut(handle)?.last_ips = Some(ips.to_vec());
        self.save_table(&table).await
    }

    /// Cached instance for `handle`, resolving it on first access
    async fn instance_for(&self, handle: &str, record: &ProviderRecord) -> Result<Provider> {
        if let Some(provider) = self.instances.read().await.get(handle) {
            return Ok(provider.clone());
        }

        let provider = self.catalog.resolve(&record.factory)?;
        let mut instances = self.instances.write().await;
        Ok(instances
            .entry(handle.to_string())
            .or_insert(provider)
            .clone())
    }

    async fn load_table(&self) -> Result<ProviderTable> {
        ProviderTable::from_value(self.store.get(PROVIDERS_KEY).await?)
    }

    async fn save_table(&self, table: &ProviderTable) -> Result<()> {
        self.store.set(PROVIDERS_KEY, table.to_value()?).await
    }
}

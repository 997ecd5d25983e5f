//! Test doubles and common utilities for contract tests
//!
//! Providers here return canned data and count their invocations so tests
//! can assert on what the registry and the updater actually called.

#![allow(dead_code)]

use async_trait::async_trait;
use pim_core::error::{Error, Result};
use pim_core::registry::{ProviderCatalog, ProviderRegistry};
use pim_core::state::MemoryConfigStore;
use pim_core::traits::{
    ConfigStore, Configuration, ConfigurableProvider, FetchOutcome, Provider, ProxyIpProvider,
    ValidatedConfiguration,
};
use pim_core::updater::Updater;
use serde_json::{Value, json};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// A provider returning a fixed list of addresses
pub struct StaticProvider {
    name: String,
    addresses: Vec<String>,
    errors: Vec<String>,
    fetch_count: Arc<AtomicUsize>,
}

impl StaticProvider {
    pub fn new(name: &str, addresses: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            addresses: strings(addresses),
            errors: Vec::new(),
            fetch_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Add soft errors to every fetch
    pub fn with_errors(mut self, errors: &[&str]) -> Self {
        self.errors = strings(errors);
        self
    }

    /// Get the number of times fetch_addresses() was called
    pub fn fetch_count(&self) -> usize {
        self.fetch_count.load(Ordering::SeqCst)
    }

    /// Create a copy that shares the fetch counter
    pub fn sharing_counters_with(other: &Self) -> Self {
        Self {
            name: other.name.clone(),
            addresses: other.addresses.clone(),
            errors: other.errors.clone(),
            fetch_count: Arc::clone(&other.fetch_count),
        }
    }
}

#[async_trait]
impl ProxyIpProvider for StaticProvider {
    fn name(&self) -> String {
        self.name.clone()
    }

    async fn fetch_addresses(&self, configuration: Option<&Configuration>) -> Result<FetchOutcome> {
        assert!(
            configuration.is_none(),
            "plain providers are fetched without configuration"
        );
        self.fetch_count.fetch_add(1, Ordering::SeqCst);
        Ok(FetchOutcome {
            addresses: self.addresses.clone(),
            errors: self.errors.clone(),
        })
    }
}

/// A provider whose fetch always faults
pub struct FailingProvider;

#[async_trait]
impl ProxyIpProvider for FailingProvider {
    fn name(&self) -> String {
        "Failing provider".to_string()
    }

    async fn fetch_addresses(&self, _configuration: Option<&Configuration>) -> Result<FetchOutcome> {
        Err(Error::Other("upstream exploded".to_string()))
    }
}

/// A configurable provider that returns the `ips` array of its configuration
pub struct ListProvider;

#[async_trait]
impl ProxyIpProvider for ListProvider {
    fn name(&self) -> String {
        "Configured list".to_string()
    }

    async fn fetch_addresses(&self, configuration: Option<&Configuration>) -> Result<FetchOutcome> {
        let configuration = configuration.expect("configurable providers get a configuration");
        let addresses = configuration
            .get("ips")
            .and_then(Value::as_array)
            .map(|ips| {
                ips.iter()
                    .filter_map(|ip| ip.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        Ok(FetchOutcome::new(addresses))
    }
}

impl ConfigurableProvider for ListProvider {
    fn default_configuration(&self) -> Configuration {
        object(json!({"ips": []}))
    }

    fn validate_configuration(&self, raw: &Configuration) -> ValidatedConfiguration {
        let mut validated = ValidatedConfiguration {
            configuration: self.default_configuration(),
            errors: Vec::new(),
        };
        match raw.get("ips") {
            Some(Value::Array(ips)) if ips.iter().all(Value::is_string) => {
                validated
                    .configuration
                    .insert("ips".to_string(), Value::Array(ips.clone()));
            }
            _ => validated
                .errors
                .push("\"ips\" must be an array of strings".to_string()),
        }
        validated
    }
}

/// A store that fails writes to selected keys
pub struct FlakyStore {
    inner: MemoryConfigStore,
    failing_keys: Mutex<HashSet<String>>,
}

impl FlakyStore {
    pub fn new(inner: MemoryConfigStore) -> Self {
        Self {
            inner,
            failing_keys: Mutex::new(HashSet::new()),
        }
    }

    /// Make every subsequent write to `key` fail
    pub fn fail_writes_to(&self, key: &str) {
        self.failing_keys.lock().unwrap().insert(key.to_string());
    }
}

#[async_trait]
impl ConfigStore for FlakyStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        if self.failing_keys.lock().unwrap().contains(key) {
            return Err(Error::config_store(format!("write to {} refused", key)));
        }
        self.inner.set(key, value).await
    }
}

/// Catalog with the doubles above registered under fixed references
///
/// - `static-a` returns `1.1.1.1` and `2.2.2.2`
/// - `static-b` returns `2.2.2.2` and `3.3.3.3`
/// - `failing` faults on every fetch
/// - `list` is configurable
pub fn test_catalog() -> ProviderCatalog {
    let mut catalog = ProviderCatalog::new();
    catalog.register_fn("static-a", || {
        Ok(Provider::plain(StaticProvider::new(
            "Static A",
            &["1.1.1.1", "2.2.2.2"],
        )))
    });
    catalog.register_fn("static-b", || {
        Ok(Provider::plain(StaticProvider::new(
            "Static B",
            &["2.2.2.2", "3.3.3.3"],
        )))
    });
    catalog.register_fn("failing", || Ok(Provider::plain(FailingProvider)));
    catalog.register_fn("list", || Ok(Provider::configurable(ListProvider)));
    catalog
}

/// Registry and updater over a fresh memory store
pub fn setup(catalog: ProviderCatalog) -> (MemoryConfigStore, Arc<ProviderRegistry>, Updater) {
    let store = MemoryConfigStore::new();
    let shared: Arc<dyn ConfigStore> = Arc::new(store.clone());
    let registry = Arc::new(ProviderRegistry::new(Arc::clone(&shared), catalog));
    let updater = Updater::new(Arc::clone(&registry), shared);
    (store, registry, updater)
}

pub fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

pub fn object(value: Value) -> Configuration {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {}", other),
    }
}

// # Memory Config Store
//
// In-memory implementation of ConfigStore.
//
// ## Purpose
//
// Keeps every key in a HashMap. Nothing survives a restart, which makes it
// the store of choice for tests and for hosts that seed configuration at
// startup.
//
// ## Write Accounting
//
// Each `set` bumps a per-key counter so callers can assert that a write
// did (or did not) happen, e.g. that an unchanged trusted proxy list is not
// rewritten.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::Error;
use crate::traits::config_store::ConfigStore;

/// In-memory config store implementation
///
/// # Example
///
/// ```rust,no_run
/// use pim_core::state::MemoryConfigStore;
/// use pim_core::traits::ConfigStore;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = MemoryConfigStore::new();
///
///     store.set("concrete.security.trusted_proxies.ips", serde_json::json!(["10.0.0.1"])).await?;
///     let ips = store.get("concrete.security.trusted_proxies.ips").await?;
///     assert_eq!(ips, Some(serde_json::json!(["10.0.0.1"])));
///
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryConfigStore {
    inner: Arc<RwLock<MemoryState>>,
}

#[derive(Debug, Default)]
struct MemoryState {
    values: HashMap<String, Value>,
    writes: HashMap<String, usize>,
}

impl MemoryConfigStore {
    /// Create a new empty memory config store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with `values`
    ///
    /// Seeding does not count as a write.
    pub fn with_values<I, K>(values: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let state = MemoryState {
            values: values.into_iter().map(|(k, v)| (k.into(), v)).collect(),
            writes: HashMap::new(),
        };
        Self {
            inner: Arc::new(RwLock::new(state)),
        }
    }

    /// Number of writes performed on `key`
    pub async fn write_count(&self, key: &str) -> usize {
        self.inner.read().await.writes.get(key).copied().unwrap_or(0)
    }

    /// Number of writes performed on all keys
    pub async fn total_writes(&self) -> usize {
        self.inner.read().await.writes.values().sum()
    }

    /// Get the number of keys in the store
    pub async fn len(&self) -> usize {
        self.inner.read().await.values.len()
    }

    /// Check if the store is empty
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.values.is_empty()
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, Error> {
        let guard = self.inner.read().await;
        Ok(guard.values.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), Error> {
        let mut guard = self.inner.write().await;
        guard.values.insert(key.to_string(), value);
        *guard.writes.entry(key.to_string()).or_insert(0) += 1;
        Ok(())
    }
}

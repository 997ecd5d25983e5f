// # Config Store Trait
//
// Defines the interface for the key-value configuration repository shared
// with the host application.
//
// ## Purpose
//
// The store keeps:
// - The provider table (handle, factory reference, enabled flag,
//   configuration and last fetched addresses)
// - Auto-update settings and the last run timestamp
// - The host's trusted proxy list, which the updater overwrites
//
// Keys are namespace-qualified strings such as `proxy_ip_manager::providers`.
//
// ## Usage
//
// ```rust,ignore
// use pim_core::traits::ConfigStore;
//
// let ips = store.get("concrete.security.trusted_proxies.ips").await?;
// store.set("proxy_ip_manager::updates.last_run", serde_json::json!(1700000000)).await?;
// ```

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Trait for config store implementations
///
/// # Durability
///
/// Every `set` is its own durable commit. Callers never batch writes across
/// operations, so a crash can lose at most the write in flight.
///
/// # Concurrency
///
/// Writes are last-write-wins. No transaction spans several keys.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Read the value stored under `key`
    ///
    /// # Returns
    ///
    /// - `Ok(Some(Value))`: The stored value
    /// - `Ok(None)`: Nothing stored under this key
    /// - `Err(Error)`: Storage error
    async fn get(&self, key: &str) -> Result<Option<Value>, crate::Error>;

    /// Store `value` under `key` and persist it immediately
    async fn set(&self, key: &str, value: Value) -> Result<(), crate::Error>;
}

/// Read a value and deserialize it into `T`
///
/// A missing key or a JSON `null` yields `Ok(None)`.
pub async fn read_json<T: DeserializeOwned>(
    store: &dyn ConfigStore,
    key: &str,
) -> Result<Option<T>, crate::Error> {
    match store.get(key).await? {
        None | Some(Value::Null) => Ok(None),
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
    }
}

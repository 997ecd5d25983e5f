// # pim-core
//
// Core library for managing a host's list of trusted proxy IP addresses.
//
// ## Architecture Overview
//
// - **ProxyIpProvider / ConfigurableProvider**: Traits for sources of proxy addresses
// - **ConfigStore**: Trait for the persistent key/value configuration
// - **ProviderRegistry**: Handle-keyed table of registered provider instances
// - **Updater**: Runs the fetch → normalize → merge → persist cycle
// - **UpdateSchedule**: Auto-update settings and last-run bookkeeping
//
// ## Design Principles
//
// 1. **Plugin-Based**: Provider implementations are registered by reference
//    in a catalog, the core never names them
// 2. **Library-First**: The CLI is a thin shell over this crate
// 3. **Idempotency**: Unchanged results never rewrite the host configuration

pub mod address;
pub mod config;
pub mod error;
pub mod registry;
pub mod schedule;
pub mod state;
pub mod traits;
pub mod updater;

// Re-export core types for convenience
pub use config::{AutoUpdateSettings, UpdaterConfig};
pub use error::{Error, Result};
pub use registry::{ProviderCatalog, ProviderRecord, ProviderRegistry, ProviderSummary};
pub use schedule::UpdateSchedule;
pub use state::{FileConfigStore, MemoryConfigStore};
pub use traits::{
    ConfigStore, Configuration, ConfigurableProvider, FetchOutcome, Provider, ProxyIpProvider,
    ValidatedConfiguration,
};
pub use updater::{ProbeResult, Updater};

//! Core traits for the proxy IP manager
//!
//! - [`ProxyIpProvider`] / [`ConfigurableProvider`]: sources of trusted proxy addresses
//! - [`ConfigStore`]: key-value configuration repository

pub mod config_store;
pub mod provider;

pub use config_store::{ConfigStore, read_json};
pub use provider::{
    Configuration, ConfigurableProvider, FetchOutcome, Provider, ProviderFactory, ProxyIpProvider,
    ValidatedConfiguration,
};

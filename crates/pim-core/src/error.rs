//! Error types for the proxy IP manager
//!
//! Registry contract failures get their own variants so callers can match on
//! them instead of parsing messages.

use thiserror::Error;

/// Result type alias for proxy IP manager operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the proxy IP manager
#[derive(Error, Debug)]
pub enum Error {
    /// A provider with this handle is already registered
    #[error("A provider with handle \"{0}\" is already registered")]
    DuplicateHandle(String),

    /// No provider is registered with this handle
    #[error("No provider is registered with handle \"{0}\"")]
    UnregisteredHandle(String),

    /// The factory reference does not resolve to a provider
    #[error("\"{0}\" does not resolve to a proxy IP provider")]
    NotAProvider(String),

    /// The provider does not accept a configuration
    #[error("The provider \"{0}\" is not configurable")]
    NotConfigurable(String),

    /// The provider factory failed to build an instance
    #[error("Unable to create the provider \"{reference}\": {source}")]
    ResolutionFailed {
        /// Factory reference that was being resolved
        reference: String,
        /// Underlying cause reported by the factory
        #[source]
        source: Box<Error>,
    },

    /// The provider rejected a configuration
    #[error("Invalid configuration for provider \"{handle}\": {}", errors.join("; "))]
    InvalidConfiguration {
        /// Handle of the provider being configured
        handle: String,
        /// Messages reported by the provider
        errors: Vec<String>,
    },

    /// Config store errors
    #[error("Config store error: {0}")]
    ConfigStore(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Provider-specific error
    #[error("Provider error ({provider}): {message}")]
    Provider {
        /// Provider handle or name
        provider: String,
        /// Error message
        message: String,
    },

    /// HTTP client errors (from network providers)
    #[error("HTTP error: {0}")]
    Http(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a config store error
    pub fn config_store(msg: impl Into<String>) -> Self {
        Self::ConfigStore(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an HTTP error
    pub fn http(msg: impl Into<String>) -> Self {
        Self::Http(msg.into())
    }

    /// Create a provider-specific error
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Wrap a factory failure
    pub fn resolution_failed(reference: impl Into<String>, source: Error) -> Self {
        Self::ResolutionFailed {
            reference: reference.into(),
            source: Box::new(source),
        }
    }

    /// Whether this error belongs to the registry contract taxonomy
    pub fn is_registry_contract(&self) -> bool {
        matches!(
            self,
            Self::DuplicateHandle(_)
                | Self::UnregisteredHandle(_)
                | Self::NotAProvider(_)
                | Self::NotConfigurable(_)
                | Self::ResolutionFailed { .. }
        )
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}

// # HTTP Proxy IP Provider
//
// A configurable provider that downloads a plain-text list of proxy
// addresses, such as the ranges published by CDNs and load balancer vendors.
//
// ## Configuration
//
// ```json
// { "url": "https://www.cloudflare.com/ips-v4", "timeout_secs": 10 }
// ```
//
// ## Body Format
//
// One or more addresses or CIDR ranges separated by whitespace. Anything
// after a `#` on a line is a comment.
//
// ## Failure Model
//
// Transport failures and non-2xx statuses are reported as soft errors in the
// fetch outcome: the provider then contributes no addresses to the cycle, but
// the other providers are still processed. The request is bounded by the
// configured timeout.

use async_trait::async_trait;
use pim_core::registry::ProviderCatalog;
use pim_core::traits::{
    Configuration, ConfigurableProvider, FetchOutcome, Provider, ProxyIpProvider,
    ValidatedConfiguration,
};
use pim_core::{Error, Result};
use serde_json::{Value, json};
use std::time::Duration;

/// Reference under which [`register`] makes the provider available
pub const HTTP_PROVIDER_REFERENCE: &str = "http";

/// Default request timeout
const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Largest accepted request timeout
const MAX_TIMEOUT_SECS: u64 = 300;

/// Provider downloading address lists over HTTP(S)
#[derive(Debug, Clone)]
pub struct HttpListProvider {
    client: reqwest::Client,
}

impl HttpListProvider {
    /// Create a new HTTP list provider
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("pim-provider-http/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::http(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    /// Download `url` and return the response body
    async fn download(&self, url: &str, timeout: Duration) -> std::result::Result<String, String> {
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| format!("Request to {} failed: {}", url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("Request to {} returned HTTP {}", url, status));
        }

        response
            .text()
            .await
            .map_err(|e| format!("Failed to read the response of {}: {}", url, e))
    }
}

#[async_trait]
impl ProxyIpProvider for HttpListProvider {
    fn name(&self) -> String {
        "IP addresses downloaded from a URL".to_string()
    }

    async fn fetch_addresses(&self, configuration: Option<&Configuration>) -> Result<FetchOutcome> {
        let settings = match configuration.map(Settings::from_configuration) {
            Some(Ok(settings)) => settings,
            Some(Err(errors)) => {
                return Ok(FetchOutcome {
                    addresses: Vec::new(),
                    errors,
                });
            }
            None => return Ok(FetchOutcome::failed("No URL configured")),
        };

        tracing::debug!("Downloading proxy IPs from {}", settings.url);
        match self
            .download(&settings.url, Duration::from_secs(settings.timeout_secs))
            .await
        {
            Ok(body) => {
                let addresses = parse_body(&body);
                tracing::debug!(
                    "Downloaded {} entries from {}",
                    addresses.len(),
                    settings.url
                );
                Ok(FetchOutcome::new(addresses))
            }
            Err(message) => {
                tracing::warn!("{}", message);
                Ok(FetchOutcome::failed(message))
            }
        }
    }
}

impl ConfigurableProvider for HttpListProvider {
    fn default_configuration(&self) -> Configuration {
        Settings {
            url: String::new(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
        .to_configuration()
    }

    fn validate_configuration(&self, raw: &Configuration) -> ValidatedConfiguration {
        match Settings::from_configuration(raw) {
            Ok(settings) => ValidatedConfiguration {
                configuration: settings.to_configuration(),
                errors: Vec::new(),
            },
            Err(errors) => ValidatedConfiguration {
                configuration: self.default_configuration(),
                errors,
            },
        }
    }
}

/// Checked provider configuration
#[derive(Debug, Clone, PartialEq, Eq)]
struct Settings {
    url: String,
    timeout_secs: u64,
}

impl Settings {
    fn from_configuration(configuration: &Configuration) -> std::result::Result<Self, Vec<String>> {
        let mut errors = Vec::new();

        let url = match configuration.get("url") {
            Some(Value::String(url)) => url.trim().to_string(),
            None | Some(Value::Null) => String::new(),
            Some(other) => {
                errors.push(format!("The URL must be a string, found {}", other));
                String::new()
            }
        };
        if url.is_empty() {
            if errors.is_empty() {
                errors.push("The URL is required".to_string());
            }
        } else {
            match reqwest::Url::parse(&url) {
                Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {}
                Ok(parsed) => errors.push(format!(
                    "The URL \"{}\" uses the unsupported scheme \"{}\"",
                    url,
                    parsed.scheme()
                )),
                Err(e) => errors.push(format!("The URL \"{}\" is not valid: {}", url, e)),
            }
        }

        let timeout_secs = match configuration.get("timeout_secs") {
            None | Some(Value::Null) => Some(DEFAULT_TIMEOUT_SECS),
            Some(Value::Number(n)) => n.as_u64(),
            // Form submissions carry numbers as strings
            Some(Value::String(s)) => s.trim().parse::<u64>().ok(),
            Some(_) => None,
        };
        let timeout_secs = match timeout_secs {
            Some(secs) if (1..=MAX_TIMEOUT_SECS).contains(&secs) => secs,
            _ => {
                errors.push(format!(
                    "The timeout must be a whole number of seconds between 1 and {}",
                    MAX_TIMEOUT_SECS
                ));
                DEFAULT_TIMEOUT_SECS
            }
        };

        if errors.is_empty() {
            Ok(Self { url, timeout_secs })
        } else {
            Err(errors)
        }
    }

    fn to_configuration(&self) -> Configuration {
        let mut configuration = Configuration::new();
        configuration.insert("url".to_string(), json!(self.url));
        configuration.insert("timeout_secs".to_string(), json!(self.timeout_secs));
        configuration
    }
}

/// Split a downloaded list into entries, dropping comments
fn parse_body(body: &str) -> Vec<String> {
    body.lines()
        .map(|line| line.split('#').next().unwrap_or_default())
        .flat_map(str::split_whitespace)
        .map(str::to_string)
        .collect()
}

/// Register the HTTP provider with a catalog
pub fn register(catalog: &mut ProviderCatalog) {
    catalog.register_fn(HTTP_PROVIDER_REFERENCE, || {
        Ok(Provider::configurable(HttpListProvider::new()?))
    });
}

//! Address normalization
//!
//! Turns free-form address tokens (`127.0.0.1`, `::1`, `10.0.0.0/8`, `::/8`)
//! into a canonical string usable for exact-match comparison and
//! deduplication. Wildcard patterns such as `192.168.*.*` are rejected: only
//! concrete addresses and CIDR ranges can be trusted proxies.

use ipnet::IpNet;
use std::collections::HashSet;
use std::net::IpAddr;
use thiserror::Error;

/// Reasons an address token is rejected
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    /// Nothing left after trimming
    #[error("empty address")]
    Empty,

    /// Wildcard patterns are not supported
    #[error("wildcard patterns are not supported: {0}")]
    Wildcard(String),

    /// Neither an address nor a CIDR range
    #[error("not an IP address or range: {0}")]
    Unparseable(String),
}

/// Normalize a single address or CIDR range
///
/// Ranges are truncated to their network address, so `10.1.2.3/8` becomes
/// `10.0.0.0/8`. IPv6 addresses use the compressed lowercase form.
pub fn normalize(raw: &str) -> Result<String, AddressError> {
    let token = raw.trim();
    if token.is_empty() {
        return Err(AddressError::Empty);
    }
    if token.contains('*') {
        return Err(AddressError::Wildcard(token.to_string()));
    }

    if token.contains('/') {
        return token
            .parse::<IpNet>()
            .map(|net| net.trunc().to_string())
            .map_err(|_| AddressError::Unparseable(token.to_string()));
    }

    token
        .parse::<IpAddr>()
        .map(|ip| ip.to_string())
        .map_err(|_| AddressError::Unparseable(token.to_string()))
}

/// Outcome of normalizing a list of tokens
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NormalizedList {
    /// Canonical entries, deduplicated, first occurrence wins
    pub addresses: Vec<String>,
    /// Raw tokens that failed normalization, in input order
    pub invalid: Vec<String>,
}

/// Normalize every token, dropping invalid ones and duplicates
pub fn normalize_list<I, S>(raw: I) -> NormalizedList
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut list = NormalizedList::default();
    let mut seen = HashSet::new();

    for token in raw {
        let token = token.as_ref();
        match normalize(token) {
            Ok(address) => {
                if seen.insert(address.clone()) {
                    list.addresses.push(address);
                }
            }
            Err(_) => list.invalid.push(token.to_string()),
        }
    }

    list
}

/// Drop repeated entries while keeping the first occurrence in place
pub fn dedup_preserving_order(entries: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::with_capacity(entries.len());
    entries
        .into_iter()
        .filter(|entry| seen.insert(entry.clone()))
        .collect()
}

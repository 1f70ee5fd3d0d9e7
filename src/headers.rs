//! Outbound-request header aligner
//!
//! Builds the override set merged over every request the session issues.
//! The set starts from the configured `Accept-Language`, then the free-form
//! `CUSTOM_HEADERS` JSON object is merged over it. Unlike the policy
//! overlay, a malformed header blob is recovered locally: whatever parsed
//! so far still ships, on the grounds that a partially aligned header set
//! is still better than an unaligned one.

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::warn;

use crate::config::{keys, Config};

/// Header overrides applied to every outbound request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderOverrides {
    headers: BTreeMap<String, String>,
}

impl HeaderOverrides {
    /// True when no override is configured
    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    /// Number of override headers
    pub fn len(&self) -> usize {
        self.headers.len()
    }

    /// Iterate over the override entries
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Merge the overrides over a request's existing headers.
    ///
    /// Overrides win on collision (header names compare case-insensitively,
    /// per HTTP); every existing header without a colliding override is
    /// preserved.
    pub fn merge_over(&self, existing: &BTreeMap<String, String>) -> BTreeMap<String, String> {
        let mut merged = existing.clone();
        for (name, value) in &self.headers {
            merged.retain(|k, _| !k.eq_ignore_ascii_case(name));
            merged.insert(name.clone(), value.clone());
        }
        merged
    }
}

/// Build the header-override policy from the merged configuration.
///
/// Returns `None` (inactive, no interception installed) unless the
/// `USE_CUSTOM_HEADERS` flag is set.
pub fn build(config: &Config) -> Option<HeaderOverrides> {
    if !config.flag(keys::USE_CUSTOM_HEADERS) {
        return None;
    }

    let mut headers = BTreeMap::new();

    if let Some(lang) = config.str_value(keys::ACCEPT_LANGUAGE) {
        headers.insert("Accept-Language".to_string(), lang);
    }

    if let Some(raw) = config.str_value(keys::CUSTOM_HEADERS) {
        match serde_json::from_str::<BTreeMap<String, Value>>(&raw) {
            Ok(extra) => {
                for (name, value) in extra {
                    let value = match value {
                        Value::String(s) => s,
                        Value::Bool(b) => b.to_string(),
                        Value::Number(n) => n.to_string(),
                        other => {
                            warn!("CUSTOM_HEADERS value for {name:?} is not a scalar, skipping: {other}");
                            continue;
                        }
                    };
                    headers.insert(name, value);
                }
            }
            Err(e) => warn!("CUSTOM_HEADERS is invalid JSON, proceeding without it: {e}"),
        }
    }

    Some(HeaderOverrides { headers })
}

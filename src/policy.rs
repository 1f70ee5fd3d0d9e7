//! Per-site policy overlay
//!
//! A site policy is a flat JSON object at `{POLICY_DIR}/{hostname}.json`
//! patched into the configuration before any other component reads it.
//! Absence of the directory or the file is a no-op; a file that exists but
//! does not parse as a flat scalar object is fatal, since continuing with a
//! partial policy would produce an inconsistent spoofed identity.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, info};
use url::Url;

use crate::config::{keys, Config};
use crate::error::{ConfigError, Result};

/// Resolve the hostname of a target URL
pub fn hostname(target_url: &str) -> Result<String> {
    let url = Url::parse(target_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("{target_url}: {e}")))?;
    url.host_str()
        .map(str::to_string)
        .ok_or_else(|| ConfigError::InvalidUrl(format!("{target_url}: no host")).into())
}

/// Path of the policy file for a host under a policy directory
pub fn policy_path(policy_dir: &Path, host: &str) -> PathBuf {
    policy_dir.join(format!("{host}.json"))
}

/// Apply the site policy for `target_url` to the configuration.
///
/// Every key of the policy object is written into the configuration,
/// overwriting any prior value. This is the single authorized mutation of
/// the configuration after environment bootstrap.
pub fn apply(target_url: &str, config: &mut Config) -> Result<()> {
    let Some(dir) = config.str_value(keys::POLICY_DIR) else {
        debug!("no policy directory configured, skipping overlay");
        return Ok(());
    };

    let host = hostname(target_url)?;
    let path = policy_path(Path::new(&dir), &host);
    if !path.exists() {
        debug!("no site policy for {host}");
        return Ok(());
    }

    let raw = std::fs::read_to_string(&path)?;
    let malformed = |detail: String| ConfigError::PolicyMalformed {
        host: host.clone(),
        detail,
    };

    let patch: Value = serde_json::from_str(&raw).map_err(|e| malformed(e.to_string()))?;
    let Value::Object(entries) = patch else {
        return Err(malformed("policy root is not an object".to_string()).into());
    };

    for (key, value) in entries {
        if value.is_object() || value.is_array() {
            return Err(malformed(format!("value for {key:?} is not a scalar")).into());
        }
        config.set(key, value);
    }

    info!("site policy applied for {host}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_hostname() {
        assert_eq!(hostname("https://example.com/login").unwrap(), "example.com");
        assert_eq!(hostname("http://sub.host.io:8443/x").unwrap(), "sub.host.io");
        assert!(hostname("not a url").is_err());
    }

    #[test]
    fn test_policy_path() {
        assert_eq!(
            policy_path(Path::new("policies"), "example.com"),
            PathBuf::from("policies/example.com.json")
        );
    }

    #[test]
    fn test_no_policy_dir_is_noop() {
        let mut config = Config::new();
        config.set("X", "keep");
        apply("https://example.com", &mut config).unwrap();
        assert_eq!(config.str_value("X"), Some("keep".to_string()));
    }

    #[test]
    fn test_missing_file_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::new();
        config.set(keys::POLICY_DIR, dir.path().to_str().unwrap());
        config.set("X", "keep");
        apply("https://unknown-host.example", &mut config).unwrap();
        assert_eq!(config.str_value("X"), Some("keep".to_string()));
    }

    #[test]
    fn test_overlay_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("example.com.json"),
            r#"{"X": "5", "FP_WEBGL": true, "WINDOW_WIDTH": 1280}"#,
        )
        .unwrap();

        let mut config = Config::new();
        config.set(keys::POLICY_DIR, dir.path().to_str().unwrap());
        config.set("X", "old");
        apply("https://example.com/path", &mut config).unwrap();

        assert_eq!(config.str_value("X"), Some("5".to_string()));
        assert!(config.flag("FP_WEBGL"));
        assert_eq!(config.u32_value("WINDOW_WIDTH").unwrap(), Some(1280));
    }

    #[test]
    fn test_malformed_policy_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("example.com.json"), "{not json").unwrap();

        let mut config = Config::new();
        config.set(keys::POLICY_DIR, dir.path().to_str().unwrap());
        let err = apply("https://example.com", &mut config).unwrap_err();
        assert!(err.to_string().contains("example.com"));
    }

    #[test]
    fn test_nested_value_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("example.com.json"),
            r#"{"nested": {"a": 1}}"#,
        )
        .unwrap();

        let mut config = Config::new();
        config.set(keys::POLICY_DIR, dir.path().to_str().unwrap());
        assert!(apply("https://example.com", &mut config).is_err());
    }

    #[test]
    fn test_non_object_root_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("example.com.json"), "[1, 2]").unwrap();

        let mut config = Config::new();
        config.set(keys::POLICY_DIR, dir.path().to_str().unwrap());
        assert!(apply("https://example.com", &mut config).is_err());
    }
}

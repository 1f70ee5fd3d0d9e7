//! Storage-state snapshots for session reuse
//!
//! A snapshot holds the cookies and per-origin localStorage of an
//! authenticated session. It is read once when the context is created and
//! written once at teardown. Cookies are only preloaded when they would
//! legitimately apply to the target URL: domain suffix match, path prefix
//! match, and no secure cookies over plain http.

use std::collections::BTreeMap;
use std::path::Path;

use chromiumoxide::cdp::browser_protocol::network::{Cookie, CookieParam};
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::error::Result;

/// Serialized cookie, CDP-shaped
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredCookie {
    /// Cookie name
    pub name: String,
    /// Cookie value
    pub value: String,
    /// Cookie domain, possibly with a leading dot
    pub domain: String,
    /// Cookie path
    #[serde(default = "root_path")]
    pub path: String,
    /// Secure attribute
    #[serde(default)]
    pub secure: bool,
    /// HttpOnly attribute
    #[serde(default)]
    pub http_only: bool,
    /// SameSite attribute, when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub same_site: Option<String>,
    /// Expiry as seconds since epoch; `None` for session cookies
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<f64>,
}

fn root_path() -> String {
    "/".to_string()
}

/// localStorage entries for one origin
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OriginState {
    /// ASCII origin, e.g. `https://example.com`
    pub origin: String,
    /// Key-value entries
    #[serde(default)]
    pub local_storage: BTreeMap<String, String>,
}

/// Serialized authentication/cookie/local-storage state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageState {
    /// All cookies of the session
    #[serde(default)]
    pub cookies: Vec<StoredCookie>,
    /// Per-origin localStorage
    #[serde(default)]
    pub origins: Vec<OriginState>,
}

impl StorageState {
    /// Load a snapshot if one exists at `path`
    pub fn load_if_exists(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            debug!("no storage state at {}", path.display());
            return Ok(None);
        }
        let raw = std::fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&raw)?))
    }

    /// Write the snapshot, overwriting any existing file.
    ///
    /// The document is serialized fully before the file is touched, so a
    /// serialization failure never leaves a partial snapshot behind.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Cookies admissible for the target URL, plus the count of rejected
    /// ones.
    pub fn admissible_cookies(&self, target: &Url) -> (Vec<&StoredCookie>, usize) {
        let host = target.host_str().unwrap_or_default();
        let request_path = if target.path().is_empty() {
            "/"
        } else {
            target.path()
        };
        let https = target.scheme() == "https";

        let mut admitted = Vec::new();
        let mut skipped = 0;
        for cookie in &self.cookies {
            let ok = domain_match(&cookie.domain, host)
                && path_match(&cookie.path, request_path)
                && (!cookie.secure || https);
            if ok {
                admitted.push(cookie);
            } else {
                skipped += 1;
            }
        }
        (admitted, skipped)
    }

    /// localStorage entries recorded for an origin, if any
    pub fn origin_storage(&self, origin: &str) -> Option<&BTreeMap<String, String>> {
        self.origins
            .iter()
            .find(|o| o.origin == origin)
            .map(|o| &o.local_storage)
    }
}

/// RFC 6265 style domain match: exact host or a dot-boundary suffix
pub fn domain_match(cookie_domain: &str, host: &str) -> bool {
    if cookie_domain.is_empty() {
        return false;
    }
    let cookie_domain = cookie_domain.trim_start_matches('.').to_ascii_lowercase();
    let host = host.to_ascii_lowercase();
    host == cookie_domain || host.ends_with(&format!(".{cookie_domain}"))
}

/// Cookie path prefix match; an empty cookie path matches everything
pub fn path_match(cookie_path: &str, request_path: &str) -> bool {
    if cookie_path.is_empty() {
        return true;
    }
    if cookie_path.starts_with('/') {
        request_path.starts_with(cookie_path)
    } else {
        request_path.starts_with(&format!("/{cookie_path}"))
    }
}

/// Convert engine cookies into stored form.
///
/// The CDP `Cookie` document is a superset of [`StoredCookie`], so the
/// conversion goes through serde; the engine's `-1` session-cookie expiry
/// becomes `None`.
pub fn from_cdp_cookies(cookies: Vec<Cookie>) -> Result<Vec<StoredCookie>> {
    cookies
        .into_iter()
        .map(|cookie| {
            let mut stored: StoredCookie =
                serde_json::from_value(serde_json::to_value(&cookie)?)?;
            stored.expires = stored.expires.filter(|e| *e > 0.0);
            Ok(stored)
        })
        .collect()
}

/// Convert admitted stored cookies into engine set-cookie parameters
pub fn to_cookie_params(cookies: &[&StoredCookie]) -> Result<Vec<CookieParam>> {
    cookies
        .iter()
        .map(|cookie| Ok(serde_json::from_value(serde_json::to_value(cookie)?)?))
        .collect()
}

/// Init script restoring localStorage for the target origin.
///
/// Guarded on `location.origin` so a cross-origin frame never receives the
/// entries. Returns `None` when the snapshot has nothing for the origin.
pub fn local_storage_script(state: &StorageState, origin: &str) -> Option<String> {
    let entries = state.origin_storage(origin)?;
    if entries.is_empty() {
        return None;
    }

    let origin_literal = serde_json::to_string(origin).ok()?;
    let mut script = format!(
        "(() => {{\n  if (location.origin !== {origin_literal}) return;\n  try {{\n"
    );
    for (key, value) in entries {
        let key = serde_json::to_string(key).ok()?;
        let value = serde_json::to_string(value).ok()?;
        script.push_str(&format!("    localStorage.setItem({key}, {value});\n"));
    }
    script.push_str("  } catch (e) {}\n})();");
    Some(script)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn cookie(name: &str, domain: &str, path: &str, secure: bool) -> StoredCookie {
        StoredCookie {
            name: name.to_string(),
            value: "v".to_string(),
            domain: domain.to_string(),
            path: path.to_string(),
            secure,
            http_only: false,
            same_site: None,
            expires: None,
        }
    }

    #[test]
    fn test_domain_match_rules() {
        assert!(domain_match("example.com", "example.com"));
        assert!(domain_match(".example.com", "example.com"));
        assert!(domain_match(".example.com", "app.example.com"));
        assert!(domain_match("example.com", "app.EXAMPLE.com"));
        assert!(!domain_match("example.com", "badexample.com"));
        assert!(!domain_match("other.com", "example.com"));
        assert!(!domain_match("", "example.com"));
    }

    #[test]
    fn test_path_match_rules() {
        assert!(path_match("/", "/login"));
        assert!(path_match("/app", "/app/settings"));
        assert!(path_match("app", "/app/settings"));
        assert!(path_match("", "/anything"));
        assert!(!path_match("/admin", "/login"));
    }

    #[test]
    fn test_admissible_cookies() {
        let state = StorageState {
            cookies: vec![
                cookie("good", ".example.com", "/", false),
                cookie("wrong-domain", "other.com", "/", false),
                cookie("wrong-path", "example.com", "/admin", false),
                cookie("secure-only", "example.com", "/", true),
            ],
            origins: Vec::new(),
        };

        let http_target = Url::parse("http://app.example.com/login").unwrap();
        let (admitted, skipped) = state.admissible_cookies(&http_target);
        assert_eq!(
            admitted.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
            vec!["good"]
        );
        assert_eq!(skipped, 3);

        let https_target = Url::parse("https://app.example.com/login").unwrap();
        let (admitted, skipped) = state.admissible_cookies(&https_target);
        assert_eq!(admitted.len(), 2);
        assert_eq!(skipped, 2);
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let state = StorageState {
            cookies: vec![cookie("sid", "example.com", "/", true)],
            origins: vec![OriginState {
                origin: "https://example.com".to_string(),
                local_storage: [("token".to_string(), "abc".to_string())]
                    .into_iter()
                    .collect(),
            }],
        };

        state.save(&path).unwrap();
        let loaded = StorageState::load_if_exists(&path).unwrap().unwrap();
        assert_eq!(loaded, state);
    }

    #[test]
    fn test_load_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = StorageState::load_if_exists(&dir.path().join("nope.json")).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_to_cookie_params() {
        let c = cookie("sid", "example.com", "/", true);
        let params = to_cookie_params(&[&c]).unwrap();
        assert_eq!(params.len(), 1);
        assert_eq!(params[0].name, "sid");
        assert_eq!(params[0].value, "v");
        assert_eq!(params[0].domain.as_deref(), Some("example.com"));
        assert_eq!(params[0].secure, Some(true));
    }

    #[test]
    fn test_local_storage_script() {
        let state = StorageState {
            cookies: Vec::new(),
            origins: vec![OriginState {
                origin: "https://example.com".to_string(),
                local_storage: [("token".to_string(), "a\"b".to_string())]
                    .into_iter()
                    .collect(),
            }],
        };

        let script = local_storage_script(&state, "https://example.com").unwrap();
        assert!(script.contains(r#"location.origin !== "https://example.com""#));
        assert!(script.contains(r#"localStorage.setItem("token", "a\"b");"#));

        assert!(local_storage_script(&state, "https://other.com").is_none());
    }
}

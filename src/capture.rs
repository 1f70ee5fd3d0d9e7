//! Outbound-request capture
//!
//! Records a normalized view of every request the session issues and dumps
//! it as a JSON artifact at teardown. Two captures can be diffed to see
//! which requests a configuration change added or removed.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::Result;

/// Normalized record of one outbound request
///
/// Header names are lowercased so captures compare stably across runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturedRequest {
    /// Request URL
    pub url: String,
    /// HTTP method
    pub method: String,
    /// Request headers, names lowercased
    pub headers: BTreeMap<String, String>,
    /// Request body, empty when absent
    #[serde(default)]
    pub post_data: String,
}

impl CapturedRequest {
    /// Normalize a raw request record
    pub fn new(
        url: impl Into<String>,
        method: impl Into<String>,
        headers: &BTreeMap<String, String>,
        post_data: Option<String>,
    ) -> Self {
        Self {
            url: url.into(),
            method: method.into(),
            headers: headers
                .iter()
                .map(|(k, v)| (k.to_ascii_lowercase(), v.clone()))
                .collect(),
            post_data: post_data.unwrap_or_default(),
        }
    }

    fn identity(&self) -> String {
        // BTreeMap keys and fixed field order make this canonical
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Accumulates captured requests for the lifetime of one session
#[derive(Debug, Default)]
pub struct RequestCapture {
    requests: Mutex<Vec<CapturedRequest>>,
}

impl RequestCapture {
    /// Create an empty capture
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one request
    pub fn record(&self, request: CapturedRequest) {
        self.requests.lock().expect("capture lock poisoned").push(request);
    }

    /// Number of requests recorded so far
    pub fn len(&self) -> usize {
        self.requests.lock().expect("capture lock poisoned").len()
    }

    /// True when nothing was recorded
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the recorded requests
    pub fn snapshot(&self) -> Vec<CapturedRequest> {
        self.requests.lock().expect("capture lock poisoned").clone()
    }

    /// Write the capture as pretty-printed JSON
    pub fn dump(&self, path: &Path) -> Result<()> {
        let snapshot = self.snapshot();
        let json = serde_json::to_string_pretty(&snapshot)?;
        std::fs::write(path, json)?;
        info!("captured {} requests to {}", snapshot.len(), path.display());
        Ok(())
    }
}

/// Requests present in one capture but not the other
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestDiff {
    /// In `after` but not `before`
    pub added: Vec<CapturedRequest>,
    /// In `before` but not `after`
    pub removed: Vec<CapturedRequest>,
}

/// Diff two captures by canonical-JSON identity
pub fn diff(before: &[CapturedRequest], after: &[CapturedRequest]) -> RequestDiff {
    let before_ids: BTreeMap<String, &CapturedRequest> =
        before.iter().map(|r| (r.identity(), r)).collect();
    let after_ids: BTreeMap<String, &CapturedRequest> =
        after.iter().map(|r| (r.identity(), r)).collect();

    RequestDiff {
        added: after_ids
            .iter()
            .filter(|(id, _)| !before_ids.contains_key(*id))
            .map(|(_, r)| (*r).clone())
            .collect(),
        removed: before_ids
            .iter()
            .filter(|(id, _)| !after_ids.contains_key(*id))
            .map(|(_, r)| (*r).clone())
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn req(url: &str, header: (&str, &str)) -> CapturedRequest {
        let headers = [(header.0.to_string(), header.1.to_string())]
            .into_iter()
            .collect();
        CapturedRequest::new(url, "GET", &headers, None)
    }

    #[test]
    fn test_header_names_lowercased() {
        let r = req("https://example.com", ("Accept-Language", "en-US"));
        assert_eq!(r.headers.get("accept-language").unwrap(), "en-US");
        assert!(!r.headers.contains_key("Accept-Language"));
    }

    #[test]
    fn test_diff_added_removed() {
        let a = req("https://example.com/a", ("x", "1"));
        let b = req("https://example.com/b", ("x", "1"));
        let c = req("https://example.com/c", ("x", "1"));

        let d = diff(&[a.clone(), b.clone()], &[b.clone(), c.clone()]);
        assert_eq!(d.added, vec![c]);
        assert_eq!(d.removed, vec![a]);
    }

    #[test]
    fn test_diff_identical_is_empty() {
        let a = req("https://example.com/a", ("x", "1"));
        let d = diff(&[a.clone()], &[a]);
        assert!(d.added.is_empty());
        assert!(d.removed.is_empty());
    }

    #[test]
    fn test_header_value_distinguishes_requests() {
        let a = req("https://example.com", ("accept-language", "en-US"));
        let b = req("https://example.com", ("accept-language", "fr-FR"));
        let d = diff(&[a], &[b]);
        assert_eq!(d.added.len(), 1);
        assert_eq!(d.removed.len(), 1);
    }

    #[test]
    fn test_dump_writes_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("requests.json");

        let capture = RequestCapture::new();
        capture.record(req("https://example.com", ("x", "1")));
        capture.dump(&path).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        let parsed: Vec<CapturedRequest> = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed, capture.snapshot());
    }
}

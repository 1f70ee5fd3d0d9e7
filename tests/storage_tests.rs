//! Storage-state snapshot tests

use std::collections::BTreeMap;

use url::Url;

use veilgate::session::{OriginState, StorageState, StoredCookie};

fn cookie(name: &str, domain: &str, secure: bool) -> StoredCookie {
    StoredCookie {
        name: name.to_string(),
        value: "v".to_string(),
        domain: domain.to_string(),
        path: "/".to_string(),
        secure,
        http_only: false,
        same_site: Some("Lax".to_string()),
        expires: Some(2_000_000_000.0),
    }
}

#[test]
fn test_snapshot_roundtrip_through_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");

    let state = StorageState {
        cookies: vec![cookie("sid", ".example.com", true)],
        origins: vec![OriginState {
            origin: "https://example.com".to_string(),
            local_storage: BTreeMap::from([("token".to_string(), "abc123".to_string())]),
        }],
    };

    state.save(&path).unwrap();

    // re-running with the file present preloads it without error
    let loaded = StorageState::load_if_exists(&path).unwrap().unwrap();
    assert_eq!(loaded, state);
}

#[test]
fn test_no_prior_snapshot_is_not_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let loaded = StorageState::load_if_exists(&dir.path().join("absent.json")).unwrap();
    assert!(loaded.is_none());
}

#[test]
fn test_snapshot_uses_camel_case_wire_format() {
    let state = StorageState {
        cookies: vec![cookie("sid", "example.com", false)],
        origins: vec![OriginState {
            origin: "https://example.com".to_string(),
            local_storage: BTreeMap::new(),
        }],
    };

    let json = serde_json::to_value(&state).unwrap();
    let first = &json["cookies"][0];
    assert!(first.get("httpOnly").is_some());
    assert!(first.get("sameSite").is_some());
    assert!(json["origins"][0].get("localStorage").is_some());
}

#[test]
fn test_secure_cookies_not_admitted_over_http() {
    let state = StorageState {
        cookies: vec![cookie("secure", "example.com", true)],
        origins: Vec::new(),
    };

    let http = Url::parse("http://example.com/").unwrap();
    let (admitted, skipped) = state.admissible_cookies(&http);
    assert!(admitted.is_empty());
    assert_eq!(skipped, 1);

    let https = Url::parse("https://example.com/").unwrap();
    let (admitted, skipped) = state.admissible_cookies(&https);
    assert_eq!(admitted.len(), 1);
    assert_eq!(skipped, 0);
}

#[test]
fn test_subdomain_cookie_admission() {
    let state = StorageState {
        cookies: vec![
            cookie("parent", ".example.com", false),
            cookie("other", "unrelated.org", false),
        ],
        origins: Vec::new(),
    };

    let target = Url::parse("https://app.example.com/dashboard").unwrap();
    let (admitted, skipped) = state.admissible_cookies(&target);
    assert_eq!(admitted.len(), 1);
    assert_eq!(admitted[0].name, "parent");
    assert_eq!(skipped, 1);
}

//! Property-based testing for the header merge contract.
//!
//! Uses proptest to generate arbitrary request header sets and override
//! blobs and verify the merge invariants: overrides always win, nothing is
//! dropped, and nothing appears from nowhere.

use std::collections::BTreeMap;

use proptest::prelude::*;

use veilgate::config::{keys, Config};
use veilgate::headers;

/// Strategy for header names (token characters, mixed case)
fn arb_header_name() -> impl Strategy<Value = String> {
    "[A-Za-z][A-Za-z0-9-]{0,15}"
}

/// Strategy for header values
fn arb_header_value() -> impl Strategy<Value = String> {
    "[ -~]{0,32}"
}

fn arb_header_map(max: usize) -> impl Strategy<Value = BTreeMap<String, String>> {
    prop::collection::btree_map(arb_header_name(), arb_header_value(), 0..max)
}

/// Override blobs are kept case-insensitively unique; colliding override
/// names within one blob have no defined winner.
fn arb_override_blob(max: usize) -> impl Strategy<Value = BTreeMap<String, String>> {
    arb_header_map(max).prop_map(|m| {
        let mut seen = std::collections::BTreeSet::new();
        m.into_iter()
            .filter(|(k, _)| seen.insert(k.to_ascii_lowercase()))
            .collect()
    })
}

fn build_overrides(blob: &BTreeMap<String, String>) -> headers::HeaderOverrides {
    let mut config = Config::new();
    config.set(keys::USE_CUSTOM_HEADERS, "1");
    config.set(
        keys::CUSTOM_HEADERS,
        serde_json::to_string(blob).expect("header blob serializes"),
    );
    headers::build(&config).expect("aligner active")
}

proptest! {
    #[test]
    fn prop_override_values_always_win(
        existing in arb_header_map(8),
        blob in arb_override_blob(8),
    ) {
        let overrides = build_overrides(&blob);
        let merged = overrides.merge_over(&existing);

        for (name, value) in &blob {
            prop_assert_eq!(merged.get(name), Some(value));
        }
    }

    #[test]
    fn prop_no_existing_header_dropped(
        existing in arb_header_map(8),
        blob in arb_override_blob(8),
    ) {
        let overrides = build_overrides(&blob);
        let merged = overrides.merge_over(&existing);

        for name in existing.keys() {
            let collides = blob.keys().any(|k| k.eq_ignore_ascii_case(name));
            prop_assert!(
                merged.contains_key(name) || collides,
                "header {} disappeared without a colliding override",
                name
            );
        }
    }

    #[test]
    fn prop_merged_comes_only_from_inputs(
        existing in arb_header_map(8),
        blob in arb_override_blob(8),
    ) {
        let overrides = build_overrides(&blob);
        let merged = overrides.merge_over(&existing);

        for name in merged.keys() {
            prop_assert!(
                existing.contains_key(name) || blob.contains_key(name),
                "header {} appeared from nowhere",
                name
            );
        }
    }

    #[test]
    fn prop_merge_is_deterministic(
        existing in arb_header_map(8),
        blob in arb_override_blob(8),
    ) {
        let overrides = build_overrides(&blob);
        prop_assert_eq!(
            overrides.merge_over(&existing),
            overrides.merge_over(&existing)
        );
    }
}

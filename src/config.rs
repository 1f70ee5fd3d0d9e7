//! Session configuration
//!
//! The configuration is a flat map from option name to scalar value. It is
//! populated once from the process environment, patched exactly once by the
//! policy overlay, and read-only for every other component. Last writer wins.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::error::ConfigError;

/// Recognized configuration keys
///
/// Key names follow the environment surface of the tool; site policy files
/// patch the same names.
pub mod keys {
    /// Destination URL for the session
    pub const TARGET_URL: &str = "TARGET_URL";
    /// Run the browser headless
    pub const HEADLESS: &str = "HEADLESS";
    /// CI mode: headless, close immediately after settling
    pub const CI: &str = "CI";
    /// Context user agent
    pub const USER_AGENT: &str = "USER_AGENT";
    /// Context locale (e.g. `en-US`)
    pub const LOCALE: &str = "LOCALE";
    /// Context timezone id (e.g. `Europe/Berlin`)
    pub const TIMEZONE: &str = "TIMEZONE";
    /// Viewport width in px
    pub const WINDOW_WIDTH: &str = "WINDOW_WIDTH";
    /// Viewport height in px
    pub const WINDOW_HEIGHT: &str = "WINDOW_HEIGHT";
    /// Device scale factor
    pub const DEVICE_SCALE_FACTOR: &str = "DEVICE_SCALE_FACTOR";
    /// Emulate a mobile device
    pub const IS_MOBILE: &str = "IS_MOBILE";
    /// Emulate touch input
    pub const HAS_TOUCH: &str = "HAS_TOUCH";
    /// Storage state snapshot path
    pub const STORAGE_STATE: &str = "STORAGE_STATE";
    /// Write the snapshot at teardown
    pub const EXPORT_STORAGE: &str = "EXPORT_STORAGE";
    /// Token injected into localStorage for re-authentication
    pub const LOGIN_TOKEN: &str = "LOGIN_TOKEN";
    /// Activate the header aligner
    pub const USE_CUSTOM_HEADERS: &str = "USE_CUSTOM_HEADERS";
    /// Free-form JSON object of additional override headers
    pub const CUSTOM_HEADERS: &str = "CUSTOM_HEADERS";
    /// Base Accept-Language override
    pub const ACCEPT_LANGUAGE: &str = "ACCEPT_LANGUAGE";
    /// Hide `navigator.webdriver`
    pub const REMOVE_NAVIGATOR_WEBDRIVER: &str = "REMOVE_NAVIGATOR_WEBDRIVER";
    /// Spoofed `navigator.hardwareConcurrency` (presence enables)
    pub const FAKE_HARDWARE_CONCURRENCY: &str = "FAKE_HARDWARE_CONCURRENCY";
    /// Spoofed `navigator.deviceMemory` (presence enables)
    pub const FAKE_DEVICE_MEMORY: &str = "FAKE_DEVICE_MEMORY";
    /// Spoof the WebGL vendor/renderer identity
    pub const FP_WEBGL: &str = "FP_WEBGL";
    /// Spoofed WebGL vendor string
    pub const WEBGL_VENDOR: &str = "WEBGL_VENDOR";
    /// Spoofed WebGL renderer string
    pub const WEBGL_RENDERER: &str = "WEBGL_RENDERER";
    /// Perturb canvas pixel exports
    pub const FP_CANVAS: &str = "FP_CANVAS";
    /// Perturb audio channel-data reads
    pub const FP_AUDIO: &str = "FP_AUDIO";
    /// Observe which fingerprint probes the page exercises
    pub const FP_DETECT: &str = "FP_DETECT";
    /// Write a fingerprint usage report after settling
    pub const FP_LOG: &str = "FP_LOG";
    /// Directory for fingerprint usage reports
    pub const FP_LOG_DIR: &str = "FP_LOG_DIR";
    /// Directory of per-host policy files (unset disables the overlay)
    pub const POLICY_DIR: &str = "POLICY_DIR";
    /// Record every outbound request
    pub const CAPTURE_REQUESTS: &str = "CAPTURE_REQUESTS";
    /// Directory for capture artifacts
    pub const CAPTURE_DIR: &str = "CAPTURE_DIR";
    /// Selector to wait for after navigation
    pub const WAIT_FOR_SELECTOR: &str = "WAIT_FOR_SELECTOR";
    /// Seconds to hold the session open outside CI mode
    pub const SESSION_IDLE_SECS: &str = "SESSION_IDLE_SECS";
    /// Bound on navigation and settle waits, in seconds
    pub const NAV_TIMEOUT_SECS: &str = "NAV_TIMEOUT_SECS";

    /// Every key read from the process environment at startup.
    pub const RECOGNIZED: &[&str] = &[
        TARGET_URL,
        HEADLESS,
        CI,
        USER_AGENT,
        LOCALE,
        TIMEZONE,
        WINDOW_WIDTH,
        WINDOW_HEIGHT,
        DEVICE_SCALE_FACTOR,
        IS_MOBILE,
        HAS_TOUCH,
        STORAGE_STATE,
        EXPORT_STORAGE,
        LOGIN_TOKEN,
        USE_CUSTOM_HEADERS,
        CUSTOM_HEADERS,
        ACCEPT_LANGUAGE,
        REMOVE_NAVIGATOR_WEBDRIVER,
        FAKE_HARDWARE_CONCURRENCY,
        FAKE_DEVICE_MEMORY,
        FP_WEBGL,
        WEBGL_VENDOR,
        WEBGL_RENDERER,
        FP_CANVAS,
        FP_AUDIO,
        FP_DETECT,
        FP_LOG,
        FP_LOG_DIR,
        POLICY_DIR,
        CAPTURE_REQUESTS,
        CAPTURE_DIR,
        WAIT_FOR_SELECTOR,
        SESSION_IDLE_SECS,
        NAV_TIMEOUT_SECS,
    ];
}

/// Flat option-name → scalar-value configuration
#[derive(Debug, Clone, Default)]
pub struct Config {
    values: BTreeMap<String, Value>,
}

impl Config {
    /// Create an empty configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Populate from the process environment.
    ///
    /// Only recognized keys are read; unset and empty variables are skipped.
    pub fn from_env() -> Self {
        let mut config = Self::new();
        for &key in keys::RECOGNIZED {
            if let Ok(value) = std::env::var(key) {
                if !value.is_empty() {
                    config.set(key, value);
                }
            }
        }
        config
    }

    /// Set a value, overwriting any prior one
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
    }

    /// Raw value lookup
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// String form of a scalar value. Numbers and booleans are stringified
    /// (a policy file may patch a string option with a JSON number).
    /// Empty strings read as absent.
    pub fn str_value(&self, key: &str) -> Option<String> {
        match self.values.get(key)? {
            Value::String(s) if s.is_empty() => None,
            Value::String(s) => Some(s.clone()),
            Value::Bool(b) => Some(b.to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Boolean toggle: `"1"`, `"true"` (any case), JSON `true`, or a nonzero
    /// JSON number. Anything else, including absence, is off.
    pub fn flag(&self, key: &str) -> bool {
        match self.values.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => s == "1" || s.eq_ignore_ascii_case("true"),
            Some(Value::Number(n)) => n.as_i64().map(|n| n != 0).unwrap_or(false),
            _ => false,
        }
    }

    /// Integer option. Absence is `None`; a present but non-numeric value is
    /// a fatal [`ConfigError::SpoofValueInvalid`], never a silent zero.
    pub fn u32_value(&self, key: &str) -> Result<Option<u32>, ConfigError> {
        let Some(value) = self.values.get(key) else {
            return Ok(None);
        };
        let invalid = || ConfigError::SpoofValueInvalid {
            key: key.to_string(),
            value: value.to_string(),
        };
        match value {
            Value::String(s) if s.is_empty() => Ok(None),
            Value::String(s) => s.trim().parse::<u32>().map(Some).map_err(|_| invalid()),
            Value::Number(n) => n
                .as_u64()
                .and_then(|n| u32::try_from(n).ok())
                .map(Some)
                .ok_or_else(invalid),
            _ => Err(invalid()),
        }
    }

    /// Floating-point option, same absence/malformation contract as
    /// [`Config::u32_value`].
    pub fn f64_value(&self, key: &str) -> Result<Option<f64>, ConfigError> {
        let Some(value) = self.values.get(key) else {
            return Ok(None);
        };
        let invalid = || ConfigError::SpoofValueInvalid {
            key: key.to_string(),
            value: value.to_string(),
        };
        match value {
            Value::String(s) if s.is_empty() => Ok(None),
            Value::String(s) => s.trim().parse::<f64>().map(Some).map_err(|_| invalid()),
            Value::Number(n) => n.as_f64().map(Some).ok_or_else(invalid),
            _ => Err(invalid()),
        }
    }
}

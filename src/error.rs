//! Error types for Veilgate
//!
//! This module provides the error type hierarchy using `thiserror`.
//! Configuration malformation that would produce an inconsistent spoofed
//! identity is fatal; recoverable malformation (the custom-header blob)
//! is handled locally by the header aligner and never surfaces here.

use thiserror::Error;

/// The main error type for Veilgate operations
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration and policy errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Browser lifecycle errors
    #[error("Browser error: {0}")]
    Browser(#[from] BrowserError),

    /// Navigation errors
    #[error("Navigation error: {0}")]
    Navigation(#[from] NavigationError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// ChromiumOxide errors
    #[error("CDP error: {0}")]
    Cdp(String),
}

/// Configuration errors
///
/// These are all fatal: partial identity spoofing is worse than none, so a
/// malformed policy file or a non-numeric spoof value aborts the session
/// before the browser ever launches.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// No target URL configured
    #[error("No target URL configured (set TARGET_URL)")]
    MissingTarget,

    /// Target URL could not be parsed
    #[error("Invalid target URL: {0}")]
    InvalidUrl(String),

    /// Site policy file exists but is not a flat JSON object
    #[error("Malformed site policy for {host}: {detail}")]
    PolicyMalformed {
        /// Hostname the policy was resolved for
        host: String,
        /// Parse or shape failure description
        detail: String,
    },

    /// A spoof value that must be numeric is not
    #[error("Spoof value for {key} is not numeric: {value:?}")]
    SpoofValueInvalid {
        /// Configuration key holding the value
        key: String,
        /// The offending value
        value: String,
    },
}

/// Browser lifecycle and control errors
#[derive(Error, Debug)]
pub enum BrowserError {
    /// Failed to launch the browser process
    #[error("Failed to launch browser: {0}")]
    LaunchFailed(String),

    /// Launch configuration rejected by the engine
    #[error("Invalid browser configuration: {0}")]
    ConfigRejected(String),

    /// Failed to create the session page
    #[error("Failed to create page: {0}")]
    PageCreationFailed(String),
}

/// Navigation errors
#[derive(Error, Debug)]
pub enum NavigationError {
    /// Navigation or settling exceeded the configured bound
    #[error("Navigation timed out after {0}s")]
    Timeout(u64),

    /// Page load failed
    #[error("Page load failed: {0}")]
    LoadFailed(String),
}

/// Result type alias for Veilgate operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a CDP error from a string
    pub fn cdp<S: Into<String>>(msg: S) -> Self {
        Error::Cdp(msg.into())
    }
}

/// Convert chromiumoxide errors
impl From<chromiumoxide::error::CdpError> for Error {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        Error::Cdp(err.to_string())
    }
}

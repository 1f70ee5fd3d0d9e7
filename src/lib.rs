//! Veilgate - Stealth Browser Session Driver
//!
//! This crate drives a single browser session toward a target site while
//! suppressing automation fingerprints and applying per-site behavioral
//! policy, over CDP via ChromiumOxide.
//!
//! # Features
//!
//! - **Evasion Composer**: ordered, self-contained init script patching
//!   identity-revealing APIs (webdriver, hardware, WebGL, canvas, audio)
//! - **Policy Overlay**: per-host configuration patches applied before
//!   anything else reads settings
//! - **Header Aligner**: override headers merged over every outbound request
//! - **Session Orchestrator**: strict state machine from launch to teardown,
//!   with storage-state persistence for authenticated reuse
//!
//! # Architecture
//!
//! ```text
//! Environment ──▶ Config ──▶ Policy Overlay (single mutation)
//!                              │
//!                ┌─────────────┼──────────────┐
//!                ▼             ▼              ▼
//!         Evasion Script   Header        Session
//!           Composer      Overrides    Orchestrator ──▶ ChromiumOxide (CDP)
//!                │             │              │
//!                └─────────────┴──────────────┘
//!                        init script, interception,
//!                        usage report, storage state
//! ```
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use veilgate::config::{keys, Config};
//!
//! #[tokio::main]
//! async fn main() -> veilgate::Result<()> {
//!     let mut config = Config::from_env();
//!     config.set(keys::TARGET_URL, "https://example.com");
//!     config.set(keys::CI, "1");
//!
//!     veilgate::session::run(config).await
//! }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod capture;
pub mod config;
pub mod error;
pub mod evasion;
pub mod headers;
pub mod policy;
pub mod session;

// Re-exports for convenience
pub use capture::{CapturedRequest, RequestCapture, RequestDiff};
pub use config::Config;
pub use error::{Error, Result};
pub use evasion::{compose, Directive, FingerprintUsageReport};
pub use headers::HeaderOverrides;
pub use session::{OriginState, StorageState, StoredCookie};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

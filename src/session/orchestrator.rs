//! Session lifecycle state machine
//!
//! Drives one browser session from policy resolution to teardown, in strict
//! order: resolve, prepare filesystem, launch, create context, inject
//! evasion, install header policy, navigate, optional re-auth, settle,
//! collect fingerprint usage, export storage state, idle-or-close. There
//! are no backward transitions; every failure before the terminal fork is
//! fatal and propagates to the process exit code.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::emulation::{
    SetDeviceMetricsOverrideParams, SetLocaleOverrideParams, SetTimezoneOverrideParams,
    SetTouchEmulationEnabledParams,
};
use chromiumoxide::cdp::browser_protocol::fetch::{
    self, ContinueRequestParams, EventRequestPaused, HeaderEntry, RequestPattern,
};
use chromiumoxide::cdp::browser_protocol::network::{
    self, EventRequestWillBeSent, SetCookiesParams, SetUserAgentOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::Page;
use futures::StreamExt;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::capture::{CapturedRequest, RequestCapture};
use crate::config::{keys, Config};
use crate::error::{BrowserError, ConfigError, Error, NavigationError, Result};
use crate::evasion::{self, FingerprintUsageReport};
use crate::headers::{self, HeaderOverrides};
use crate::policy;
use crate::session::storage::{self, StorageState};

const DEFAULT_WIDTH: u32 = 1920;
const DEFAULT_HEIGHT: u32 = 1080;
const DEFAULT_NAV_TIMEOUT_SECS: u32 = 30;
const DEFAULT_IDLE_SECS: u32 = 3600;

/// Run one full session against the configured target.
///
/// This is the only entry point: it applies the policy overlay (the single
/// configuration mutation), composes the evasion and header artifacts from
/// the merged configuration, and then sequences the session to completion.
pub async fn run(mut config: Config) -> Result<()> {
    let target_raw = config
        .str_value(keys::TARGET_URL)
        .ok_or(ConfigError::MissingTarget)?;

    // State 1: per-site policy overlay.
    policy::apply(&target_raw, &mut config)?;

    let target = Url::parse(&target_raw)
        .map_err(|e| ConfigError::InvalidUrl(format!("{target_raw}: {e}")))?;
    let host = target
        .host_str()
        .ok_or_else(|| ConfigError::InvalidUrl(format!("{target_raw}: no host")))?
        .to_string();

    // Artifacts are built from the merged configuration; it is read-only
    // from here on.
    let evasion_script = evasion::compose(&config)?;
    let overrides = headers::build(&config);

    // State 2: artifact directories.
    let paths = SessionPaths::resolve(&config);
    paths.prepare()?;

    // State 3: browser process.
    let mut session =
        Session::launch(config, target, host, evasion_script, overrides, paths).await?;

    // States 4-11, then the terminal fork. A fatal error still tears the
    // browser down before propagating.
    match session.drive().await {
        Ok(()) => session.idle_or_close().await,
        Err(e) => {
            let _ = session.close().await;
            Err(e)
        }
    }
}

/// The live browser session: one process, one page, owned here for the
/// whole process lifetime.
pub(crate) struct Session {
    config: Config,
    target: Url,
    host: String,
    evasion_script: String,
    overrides: Option<HeaderOverrides>,
    capture: Option<Arc<RequestCapture>>,
    paths: SessionPaths,
    context: ContextParams,
    nav_timeout: Duration,
    browser: Browser,
    handler: JoinHandle<()>,
    page: Page,
}

impl Session {
    /// State 3: launch the browser and open the session page.
    #[instrument(skip_all, fields(host = %host))]
    async fn launch(
        config: Config,
        target: Url,
        host: String,
        evasion_script: String,
        overrides: Option<HeaderOverrides>,
        paths: SessionPaths,
    ) -> Result<Self> {
        let headless = headless_mode(&config);
        let context = ContextParams::resolve(&config)?;
        let capture = config
            .flag(keys::CAPTURE_REQUESTS)
            .then(|| Arc::new(RequestCapture::new()));
        let nav_timeout = Duration::from_secs(u64::from(
            config
                .u32_value(keys::NAV_TIMEOUT_SECS)?
                .unwrap_or(DEFAULT_NAV_TIMEOUT_SECS),
        ));
        info!("launching browser (headless={headless})");

        let mut builder = BrowserConfig::builder().viewport(Viewport {
            width: context.width,
            height: context.height,
            device_scale_factor: context.device_scale_factor,
            emulating_mobile: context.is_mobile,
            is_landscape: context.width >= context.height,
            has_touch: context.has_touch,
        });

        if !headless {
            builder = builder.with_head();
        }

        builder = builder.arg("--disable-blink-features=AutomationControlled");
        if let Some(locale) = config.str_value(keys::LOCALE) {
            builder = builder.arg(format!("--lang={locale}"));
        }

        let cdp_config = builder.build().map_err(BrowserError::ConfigRejected)?;
        let (browser, mut handler) = Browser::launch(cdp_config)
            .await
            .map_err(|e| BrowserError::LaunchFailed(e.to_string()))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    warn!("browser handler event error");
                    break;
                }
            }
            debug!("browser handler finished");
        });

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| BrowserError::PageCreationFailed(e.to_string()))?;

        info!("browser launched");

        Ok(Self {
            config,
            target,
            host,
            evasion_script,
            overrides,
            capture,
            paths,
            context,
            nav_timeout,
            browser,
            handler: handler_task,
            page,
        })
    }

    /// States 4-11 in order.
    async fn drive(&mut self) -> Result<()> {
        self.create_context().await?;
        self.inject_evasion().await?;
        self.install_header_policy().await?;
        self.install_capture().await?;
        self.navigate().await?;
        self.reauthenticate().await?;
        self.await_selector().await?;
        self.settle().await?;
        self.collect_fingerprint_usage().await?;
        self.export_state().await?;
        Ok(())
    }

    /// State 4: context identity overrides and storage-state preload.
    #[instrument(skip(self))]
    async fn create_context(&self) -> Result<()> {
        if let Some(user_agent) = self.config.str_value(keys::USER_AGENT) {
            let mut params = SetUserAgentOverrideParams::builder().user_agent(user_agent);
            if let Some(lang) = self.config.str_value(keys::ACCEPT_LANGUAGE) {
                params = params.accept_language(lang);
            }
            let params = params
                .build()
                .map_err(|e| Error::cdp(format!("user agent override: {e}")))?;
            self.page.execute(params).await?;
        }

        if let Some(timezone) = self.config.str_value(keys::TIMEZONE) {
            let params = SetTimezoneOverrideParams::builder()
                .timezone_id(timezone)
                .build()
                .map_err(|e| Error::cdp(format!("timezone override: {e}")))?;
            self.page.execute(params).await?;
        }

        if let Some(locale) = self.config.str_value(keys::LOCALE) {
            let params = SetLocaleOverrideParams::builder().locale(locale).build();
            self.page.execute(params).await?;
        }

        let metrics = SetDeviceMetricsOverrideParams::builder()
            .width(i64::from(self.context.width))
            .height(i64::from(self.context.height))
            .device_scale_factor(self.context.device_scale_factor.unwrap_or(1.0))
            .mobile(self.context.is_mobile)
            .build()
            .map_err(|e| Error::cdp(format!("device metrics override: {e}")))?;
        self.page.execute(metrics).await?;

        if self.context.has_touch {
            let params = SetTouchEmulationEnabledParams::builder()
                .enabled(true)
                .build()
                .map_err(|e| Error::cdp(format!("touch emulation: {e}")))?;
            self.page.execute(params).await?;
        }

        self.preload_storage_state().await
    }

    async fn preload_storage_state(&self) -> Result<()> {
        let Some(state) = StorageState::load_if_exists(&self.paths.storage_state)? else {
            return Ok(());
        };

        let (admitted, skipped) = state.admissible_cookies(&self.target);
        if !admitted.is_empty() {
            let cookies = storage::to_cookie_params(&admitted)?;
            let params = SetCookiesParams::builder()
                .cookies(cookies)
                .build()
                .map_err(|e| Error::cdp(format!("set cookies: {e}")))?;
            self.page.execute(params).await?;
        }
        info!(
            "storage state preloaded: {} cookies admitted, {} skipped",
            admitted.len(),
            skipped
        );

        let origin = self.target.origin().ascii_serialization();
        if let Some(script) = storage::local_storage_script(&state, &origin) {
            self.add_init_script(&script).await?;
        }
        Ok(())
    }

    /// State 5: register the evasion script ahead of any page script.
    #[instrument(skip(self))]
    async fn inject_evasion(&self) -> Result<()> {
        if self.evasion_script.is_empty() {
            debug!("no evasion directives enabled");
            return Ok(());
        }
        self.add_init_script(&self.evasion_script).await?;
        info!(
            "evasion script registered ({} bytes)",
            self.evasion_script.len()
        );
        Ok(())
    }

    /// State 6: universal request interception with merged headers.
    ///
    /// Every paused request must be continued or it stalls, so the spawned
    /// loop does nothing beyond the header merge.
    #[instrument(skip(self))]
    async fn install_header_policy(&self) -> Result<()> {
        let Some(overrides) = self.overrides.clone() else {
            return Ok(());
        };

        let pattern = RequestPattern::builder().url_pattern("*").build();
        let enable = fetch::EnableParams::builder().patterns(vec![pattern]).build();
        self.page.execute(enable).await?;

        let mut paused = self.page.event_listener::<EventRequestPaused>().await?;
        let page = self.page.clone();
        let override_count = overrides.len();
        tokio::spawn(async move {
            while let Some(event) = paused.next().await {
                let existing = headers_to_map(&event.request.headers);
                let merged = overrides.merge_over(&existing);
                let entries: Vec<HeaderEntry> = merged
                    .into_iter()
                    .map(|(name, value)| HeaderEntry { name, value })
                    .collect();

                let params = match ContinueRequestParams::builder()
                    .request_id(event.request_id.clone())
                    .headers(entries)
                    .build()
                {
                    Ok(params) => params,
                    Err(e) => {
                        warn!("continueRequest params: {e}");
                        continue;
                    }
                };
                if let Err(e) = page.execute(params).await {
                    debug!("continueRequest failed: {e}");
                }
            }
        });

        info!("header alignment installed ({} overrides)", override_count);
        Ok(())
    }

    /// Passive request capture, independent of header interception.
    #[instrument(skip(self))]
    async fn install_capture(&self) -> Result<()> {
        let Some(capture) = self.capture.clone() else {
            return Ok(());
        };

        self.page
            .execute(network::EnableParams::builder().build())
            .await?;
        let mut requests = self.page.event_listener::<EventRequestWillBeSent>().await?;
        tokio::spawn(async move {
            while let Some(event) = requests.next().await {
                let headers = headers_to_map(&event.request.headers);
                capture.record(CapturedRequest::new(
                    event.request.url.clone(),
                    event.request.method.clone(),
                    &headers,
                    event.request.post_data.clone(),
                ));
            }
        });

        info!("request capture installed");
        Ok(())
    }

    /// State 7: open the target, waiting only for DOM content.
    #[instrument(skip(self), fields(url = %self.target))]
    async fn navigate(&self) -> Result<()> {
        info!("navigating to {}", self.target);
        tokio::time::timeout(self.nav_timeout, self.page.goto(self.target.as_str()))
            .await
            .map_err(|_| NavigationError::Timeout(self.nav_timeout.as_secs()))?
            .map_err(|e| NavigationError::LoadFailed(e.to_string()))?;
        self.wait_dom_content_loaded().await
    }

    /// State 8: token re-auth through persistent client-side storage.
    #[instrument(skip(self))]
    async fn reauthenticate(&self) -> Result<()> {
        let Some(token) = self.config.str_value(keys::LOGIN_TOKEN) else {
            return Ok(());
        };
        info!("injecting login token and reloading");
        let script = format!(
            "localStorage.setItem('token', {});",
            serde_json::to_string(&token)?
        );
        self.page
            .evaluate(script)
            .await
            .map_err(|e| Error::cdp(e.to_string()))?;
        self.page
            .reload()
            .await
            .map_err(|e| NavigationError::LoadFailed(e.to_string()))?;
        self.wait_dom_content_loaded().await
    }

    /// Optional post-navigation selector wait.
    #[instrument(skip(self))]
    async fn await_selector(&self) -> Result<()> {
        let Some(selector) = self.config.str_value(keys::WAIT_FOR_SELECTOR) else {
            return Ok(());
        };
        debug!("waiting for selector {selector:?}");
        let script = format!(
            r#"
                new Promise((resolve, reject) => {{
                    const timeout = {};
                    const start = Date.now();

                    function check() {{
                        const el = document.querySelector('{}');
                        if (el) {{
                            resolve(true);
                        }} else if (Date.now() - start > timeout) {{
                            reject(new Error('Timeout waiting for selector'));
                        }} else {{
                            requestAnimationFrame(check);
                        }}
                    }}
                    check();
                }})
            "#,
            self.nav_timeout.as_millis(),
            selector.replace('\'', "\\'")
        );

        tokio::time::timeout(
            self.nav_timeout + Duration::from_secs(1),
            self.page.evaluate(script),
        )
        .await
        .map_err(|_| NavigationError::Timeout(self.nav_timeout.as_secs()))?
        .map_err(|e| Error::cdp(e.to_string()))?;
        Ok(())
    }

    /// State 9: network-idle settling. Observation and export both depend
    /// on the page being fully initialized, so this always runs first.
    #[instrument(skip(self))]
    async fn settle(&self) -> Result<()> {
        const SCRIPT: &str = r#"
            new Promise(resolve => {
                const settled = () => setTimeout(() => resolve(true), 500);
                if (document.readyState === 'complete') {
                    settled();
                } else {
                    window.addEventListener('load', settled);
                }
            })
        "#;
        info!("waiting for network idle");
        self.bounded_evaluate(SCRIPT).await
    }

    /// State 10: read back the probe flags and write the usage report.
    #[instrument(skip(self))]
    async fn collect_fingerprint_usage(&self) -> Result<()> {
        if !(self.config.flag(keys::FP_DETECT) && self.config.flag(keys::FP_LOG)) {
            return Ok(());
        }

        // The in-page flag structure is untrusted; anything unreadable
        // counts as not probed.
        let report: FingerprintUsageReport = self
            .page
            .evaluate("window.__fp_used || {}")
            .await
            .map_err(|e| Error::cdp(e.to_string()))?
            .into_value()
            .unwrap_or_else(|e| {
                warn!("fingerprint flags unreadable, assuming none: {e}");
                FingerprintUsageReport::default()
            });

        let path = self.paths.report_path(&self.host);
        let json = serde_json::to_string_pretty(&report)?;
        std::fs::write(&path, json)?;
        info!(
            "fingerprint usage for {}: webgl={} canvas={} audio={}",
            self.host, report.webgl, report.canvas, report.audio
        );
        Ok(())
    }

    /// State 11: export storage state and dump the request capture.
    #[instrument(skip(self))]
    async fn export_state(&self) -> Result<()> {
        if let Some(capture) = &self.capture {
            capture.dump(&self.paths.capture_dir.join("requests.json"))?;
        }

        if !self.config.flag(keys::EXPORT_STORAGE) {
            return Ok(());
        }

        let cookies = storage::from_cdp_cookies(self.page.get_cookies().await?)?;
        let local_storage: BTreeMap<String, String> = self
            .page
            .evaluate(LOCAL_STORAGE_DUMP)
            .await
            .map_err(|e| Error::cdp(e.to_string()))?
            .into_value()
            .unwrap_or_else(|e| {
                warn!("localStorage unreadable, exporting cookies only: {e}");
                BTreeMap::new()
            });

        let state = StorageState {
            cookies,
            origins: vec![storage::OriginState {
                origin: self.target.origin().ascii_serialization(),
                local_storage,
            }],
        };
        state.save(&self.paths.storage_state)?;
        info!(
            "storage state exported to {}",
            self.paths.storage_state.display()
        );
        Ok(())
    }

    /// State 12: terminal fork. CI closes immediately; otherwise the
    /// session is held open for the configured idle window.
    async fn idle_or_close(self) -> Result<()> {
        if self.config.flag(keys::CI) {
            info!("CI mode: closing session");
            return self.close().await;
        }

        let idle = idle_duration(&self.config)?;
        info!("session settled; holding open for {}s", idle.as_secs());
        tokio::time::sleep(idle).await;
        self.close().await
    }

    /// Tear down the browser process.
    async fn close(mut self) -> Result<()> {
        info!("closing browser");
        self.browser
            .close()
            .await
            .map_err(|e| Error::cdp(e.to_string()))?;
        let _ = tokio::time::timeout(Duration::from_secs(5), self.handler).await;
        info!("browser closed");
        Ok(())
    }

    async fn add_init_script(&self, source: &str) -> Result<()> {
        let params = AddScriptToEvaluateOnNewDocumentParams::builder()
            .source(source)
            .build()
            .map_err(|e| Error::cdp(format!("failed to build init script params: {e}")))?;
        self.page.execute(params).await?;
        Ok(())
    }

    async fn wait_dom_content_loaded(&self) -> Result<()> {
        const SCRIPT: &str = r#"
            new Promise(resolve => {
                if (document.readyState !== 'loading') {
                    resolve(true);
                } else {
                    document.addEventListener('DOMContentLoaded', () => resolve(true));
                }
            })
        "#;
        self.bounded_evaluate(SCRIPT).await
    }

    async fn bounded_evaluate(&self, script: &str) -> Result<()> {
        tokio::time::timeout(self.nav_timeout, self.page.evaluate(script))
            .await
            .map_err(|_| NavigationError::Timeout(self.nav_timeout.as_secs()))?
            .map_err(|e| Error::cdp(e.to_string()))?;
        Ok(())
    }
}

const LOCAL_STORAGE_DUMP: &str = r#"
    (() => {
        const entries = {};
        for (let i = 0; i < localStorage.length; i++) {
            const key = localStorage.key(i);
            entries[key] = localStorage.getItem(key);
        }
        return entries;
    })()
"#;

/// Headless iff configured headless or running under CI
pub(crate) fn headless_mode(config: &Config) -> bool {
    config.flag(keys::HEADLESS) || config.flag(keys::CI)
}

pub(crate) fn idle_duration(config: &Config) -> Result<Duration> {
    Ok(Duration::from_secs(u64::from(
        config
            .u32_value(keys::SESSION_IDLE_SECS)?
            .unwrap_or(DEFAULT_IDLE_SECS),
    )))
}

/// Context parameters resolved once from the merged configuration
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ContextParams {
    width: u32,
    height: u32,
    device_scale_factor: Option<f64>,
    is_mobile: bool,
    has_touch: bool,
}

impl ContextParams {
    fn resolve(config: &Config) -> Result<Self> {
        Ok(Self {
            width: config
                .u32_value(keys::WINDOW_WIDTH)?
                .unwrap_or(DEFAULT_WIDTH),
            height: config
                .u32_value(keys::WINDOW_HEIGHT)?
                .unwrap_or(DEFAULT_HEIGHT),
            device_scale_factor: config.f64_value(keys::DEVICE_SCALE_FACTOR)?,
            is_mobile: config.flag(keys::IS_MOBILE),
            has_touch: config.flag(keys::HAS_TOUCH),
        })
    }
}

/// Artifact locations, created up front so later writes cannot fail on a
/// missing directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SessionPaths {
    fp_log_dir: PathBuf,
    capture_dir: PathBuf,
    storage_state: PathBuf,
}

impl SessionPaths {
    fn resolve(config: &Config) -> Self {
        Self {
            fp_log_dir: config
                .str_value(keys::FP_LOG_DIR)
                .unwrap_or_else(|| "fp_logs".to_string())
                .into(),
            capture_dir: config
                .str_value(keys::CAPTURE_DIR)
                .unwrap_or_else(|| "artifacts".to_string())
                .into(),
            storage_state: config
                .str_value(keys::STORAGE_STATE)
                .unwrap_or_else(|| "profiles/state.json".to_string())
                .into(),
        }
    }

    fn prepare(&self) -> Result<()> {
        std::fs::create_dir_all(&self.fp_log_dir)?;
        std::fs::create_dir_all(&self.capture_dir)?;
        if let Some(parent) = self.storage_state.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(())
    }

    fn report_path(&self, host: &str) -> PathBuf {
        self.fp_log_dir.join(format!("{host}.json"))
    }
}

fn headers_to_map(headers: &network::Headers) -> BTreeMap<String, String> {
    match serde_json::to_value(headers) {
        Ok(Value::Object(entries)) => entries
            .into_iter()
            .filter_map(|(name, value)| match value {
                Value::String(s) => Some((name, s)),
                Value::Number(n) => Some((name, n.to_string())),
                Value::Bool(b) => Some((name, b.to_string())),
                _ => None,
            })
            .collect(),
        _ => BTreeMap::new(),
    }
}

//! Fingerprint-evasion script composer
//!
//! Builds the init script that patches identity-revealing browser APIs
//! before any page script runs. Each evasion directive independently
//! contributes zero or one JavaScript fragment, driven by the merged
//! configuration. The directive table is iterated in declared order;
//! [`Directive::ProbeDetect`] is declared last so its wrappers capture the
//! already-spoofed function references rather than the native originals.

use serde::{Deserialize, Serialize};

use crate::config::{keys, Config};
use crate::error::Result;

const DEFAULT_WEBGL_VENDOR: &str = "Intel Inc.";
const DEFAULT_WEBGL_RENDERER: &str = "Intel Iris OpenGL Engine";

/// A single togglable browser-identity patch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    /// Make `navigator.webdriver` read as absent
    WebdriverHide,
    /// Fix `navigator.hardwareConcurrency` to a configured integer
    HardwareConcurrency,
    /// Fix `navigator.deviceMemory` to a configured integer
    DeviceMemory,
    /// Return configured vendor/renderer strings for the two WebGL
    /// identity parameter codes; delegate everything else
    WebglSpoof,
    /// Perturb canvas pixel exports by a sub-visible amount
    CanvasSpoof,
    /// Perturb audio channel-data reads by a sub-audible amount
    AudioSpoof,
    /// Observe which fingerprint probes the page actually calls
    ProbeDetect,
}

impl Directive {
    /// All directives, in emission order. ProbeDetect must stay last: its
    /// wrappers must see the outermost (already-patched) functions.
    pub const ALL: [Directive; 7] = [
        Directive::WebdriverHide,
        Directive::HardwareConcurrency,
        Directive::DeviceMemory,
        Directive::WebglSpoof,
        Directive::CanvasSpoof,
        Directive::AudioSpoof,
        Directive::ProbeDetect,
    ];

    /// Build this directive's script fragment, or `None` when the
    /// configuration does not enable it.
    fn fragment(self, config: &Config) -> Result<Option<String>> {
        let fragment = match self {
            Directive::WebdriverHide => config.flag(keys::REMOVE_NAVIGATOR_WEBDRIVER).then(|| {
                r#"Object.defineProperty(navigator, 'webdriver', {
  get: () => undefined,
  configurable: true
});"#
                    .to_string()
            }),
            Directive::HardwareConcurrency => config
                .u32_value(keys::FAKE_HARDWARE_CONCURRENCY)?
                .map(|n| navigator_int_fragment("hardwareConcurrency", n)),
            Directive::DeviceMemory => config
                .u32_value(keys::FAKE_DEVICE_MEMORY)?
                .map(|n| navigator_int_fragment("deviceMemory", n)),
            Directive::WebglSpoof => config.flag(keys::FP_WEBGL).then(|| {
                let vendor = config
                    .str_value(keys::WEBGL_VENDOR)
                    .unwrap_or_else(|| DEFAULT_WEBGL_VENDOR.to_string());
                let renderer = config
                    .str_value(keys::WEBGL_RENDERER)
                    .unwrap_or_else(|| DEFAULT_WEBGL_RENDERER.to_string());
                webgl_fragment(&vendor, &renderer)
            }),
            Directive::CanvasSpoof => config
                .flag(keys::FP_CANVAS)
                .then(|| CANVAS_FRAGMENT.to_string()),
            Directive::AudioSpoof => config
                .flag(keys::FP_AUDIO)
                .then(|| AUDIO_FRAGMENT.to_string()),
            Directive::ProbeDetect => config
                .flag(keys::FP_DETECT)
                .then(|| PROBE_DETECT_FRAGMENT.to_string()),
        };
        Ok(fragment)
    }
}

/// Compose the evasion init script from the merged configuration.
///
/// Pure: identical configuration yields byte-identical script text. Returns
/// an empty string when no directive is enabled. Each fragment is wrapped in
/// its own block so fragments cannot collide on local bindings.
pub fn compose(config: &Config) -> Result<String> {
    let mut fragments = Vec::new();
    for directive in Directive::ALL {
        if let Some(fragment) = directive.fragment(config)? {
            fragments.push(format!("{{\n{fragment}\n}}"));
        }
    }

    if fragments.is_empty() {
        return Ok(String::new());
    }

    Ok(format!("(() => {{\n{}\n}})();", fragments.join("\n")))
}

fn navigator_int_fragment(property: &str, value: u32) -> String {
    format!(
        r#"Object.defineProperty(navigator, '{property}', {{
  get: () => {value},
  configurable: true
}});"#
    )
}

fn webgl_fragment(vendor: &str, renderer: &str) -> String {
    let vendor = serde_json::to_string(vendor).unwrap_or_default();
    let renderer = serde_json::to_string(renderer).unwrap_or_default();
    format!(
        r#"const spoofWebgl = (proto) => {{
  const getParameter = proto.getParameter;
  proto.getParameter = function (parameter) {{
    // UNMASKED_VENDOR_WEBGL
    if (parameter === 37445) {{
      return {vendor};
    }}
    // UNMASKED_RENDERER_WEBGL
    if (parameter === 37446) {{
      return {renderer};
    }}
    return getParameter.call(this, parameter);
  }};
}};
spoofWebgl(WebGLRenderingContext.prototype);
if (typeof WebGL2RenderingContext !== 'undefined') {{
  spoofWebgl(WebGL2RenderingContext.prototype);
}}"#
    )
}

const CANVAS_FRAGMENT: &str = r#"const toDataUrl = HTMLCanvasElement.prototype.toDataURL;
HTMLCanvasElement.prototype.toDataURL = function () {
  const ctx = this.getContext('2d');
  if (ctx) {
    ctx.globalAlpha = 0.999999;
  }
  return toDataUrl.apply(this, arguments);
};"#;

const AUDIO_FRAGMENT: &str = r#"const getChannelData = AudioBuffer.prototype.getChannelData;
AudioBuffer.prototype.getChannelData = function () {
  const data = getChannelData.apply(this, arguments);
  for (let i = 0; i < data.length; i += 100) {
    data[i] += 1e-7;
  }
  return data;
};"#;

// Re-wraps whatever the spoof fragments left installed, so usage is observed
// through the evasion layer. Each wrap is guarded: a probe API missing from
// this browser build skips only that probe.
const PROBE_DETECT_FRAGMENT: &str = r#"if (!window.__fp_used) {
  window.__fp_used = { webgl: false, canvas: false, audio: false };
  try {
    const wrapGl = (proto) => {
      const getParameter = proto.getParameter;
      proto.getParameter = function () {
        window.__fp_used.webgl = true;
        return getParameter.apply(this, arguments);
      };
    };
    wrapGl(WebGLRenderingContext.prototype);
    if (typeof WebGL2RenderingContext !== 'undefined') {
      wrapGl(WebGL2RenderingContext.prototype);
    }
  } catch (e) {}
  try {
    const toDataUrl = HTMLCanvasElement.prototype.toDataURL;
    HTMLCanvasElement.prototype.toDataURL = function () {
      window.__fp_used.canvas = true;
      return toDataUrl.apply(this, arguments);
    };
  } catch (e) {}
  try {
    const getChannelData = AudioBuffer.prototype.getChannelData;
    AudioBuffer.prototype.getChannelData = function () {
      window.__fp_used.audio = true;
      return getChannelData.apply(this, arguments);
    };
  } catch (e) {}
}"#;

/// Which fingerprint probes the page exercised during the session.
///
/// Read back from the page after settling; the in-page flag structure is
/// untrusted, so missing or partial data decodes as all-false.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FingerprintUsageReport {
    /// WebGL parameter queries observed
    #[serde(default)]
    pub webgl: bool,
    /// Canvas pixel exports observed
    #[serde(default)]
    pub canvas: bool,
    /// Audio channel-data reads observed
    #[serde(default)]
    pub audio: bool,
}

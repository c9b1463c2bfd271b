//! Runtime Config Injector
//!
//! Stamps the runtime configuration and bootstrap script into a built page.
//! Preview pages are signed first so the client guard can verify them.

use serde::de::Deserialize;
use std::path::Path;
use tracing::debug;

use crate::error::{BuildError, IoContext};
use crate::guard::{render_bootstrap, BootstrapParams, RUNTIME_SCRIPT_ATTR};
use crate::hashing::{guard_signature, new_guard_salt, GUARD_VERSION};
use crate::order::RuntimeConfig;

const CONFIG_MARKER: &str = "window.__USER_CONFIG__=";
const HEAD_CLOSE: &str = "</head>";
const SCRIPT_CLOSE: &str = "</script>";

/// Byte range of the first tagged bootstrap script, trailing newline included.
fn tagged_script_range(html: &str) -> Option<std::ops::Range<usize>> {
    let open = format!("<script {RUNTIME_SCRIPT_ATTR}=");
    let start = html.find(&open)?;
    let close = html[start..].find(SCRIPT_CLOSE)? + start + SCRIPT_CLOSE.len();
    let end = if html[close..].starts_with('\n') { close + 1 } else { close };
    Some(start..end)
}

/// Attach a fresh salt and signature to preview configs; clear them otherwise.
pub fn sign(config: &mut RuntimeConfig) {
    config.guard_sig = None;
    config.guard_ver = None;
    config.guard_salt = None;
    if !config.is_watermarked {
        return;
    }
    let salt = new_guard_salt();
    config.guard_sig = Some(guard_signature(config, &salt));
    config.guard_ver = Some(GUARD_VERSION.to_string());
    config.guard_salt = Some(salt);
}

/// JSON that cannot close its script element or open a comment.
pub fn script_safe_json(config: &RuntimeConfig) -> Result<String, BuildError> {
    let json = serde_json::to_string(config)?;
    let mut out = String::with_capacity(json.len());
    for c in json.chars() {
        match c {
            '<' => out.push_str("\\u003c"),
            '>' => out.push_str("\\u003e"),
            '&' => out.push_str("\\u0026"),
            '\u{2028}' => out.push_str("\\u2028"),
            '\u{2029}' => out.push_str("\\u2029"),
            other => out.push(other),
        }
    }
    Ok(out)
}

/// Drop any previously injected bootstrap.
pub fn strip_runtime_script(html: &str) -> String {
    let mut page = html.to_string();
    while let Some(range) = tagged_script_range(&page) {
        page.replace_range(range, "");
    }
    page
}

/// Insert `script` right before `</head>`, or at the very top if there is none.
fn insert_early(html: &str, script: &str) -> String {
    match html.find(HEAD_CLOSE) {
        Some(idx) => {
            let mut out = String::with_capacity(html.len() + script.len());
            out.push_str(&html[..idx]);
            out.push_str(script);
            out.push_str(&html[idx..]);
            out
        }
        None => format!("{script}{html}"),
    }
}

/// Stamp `config` into `html`. Returns the page and the config as embedded.
pub fn stamp(html: &str, mut config: RuntimeConfig) -> Result<(String, RuntimeConfig), BuildError> {
    sign(&mut config);
    let json = script_safe_json(&config)?;
    let script = render_bootstrap(BootstrapParams {
        config_json: &json,
        preview: config.is_watermarked,
    });
    let page = insert_early(&strip_runtime_script(html), &script);
    Ok((page, config))
}

/// Read back the config embedded by [`stamp`].
pub fn extract_runtime_config(html: &str) -> Option<RuntimeConfig> {
    let script = &html[tagged_script_range(html)?];
    let start = script.find(CONFIG_MARKER)? + CONFIG_MARKER.len();
    let mut de = serde_json::Deserializer::from_str(&script[start..]);
    RuntimeConfig::deserialize(&mut de).ok()
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RuntimeConfigInjector;

impl RuntimeConfigInjector {
    pub fn new() -> Self {
        Self
    }

    pub async fn inject(&self, html_path: &Path, config: RuntimeConfig) -> Result<RuntimeConfig, BuildError> {
        let html = tokio::fs::read_to_string(html_path)
            .await
            .context(|| format!("reading {}", html_path.display()))?;
        let (page, embedded) = stamp(&html, config)?;
        tokio::fs::write(html_path, page)
            .await
            .context(|| format!("writing {}", html_path.display()))?;
        debug!(
            file = %html_path.display(),
            signed = embedded.guard_sig.is_some(),
            "Injected runtime config"
        );
        Ok(embedded)
    }
}

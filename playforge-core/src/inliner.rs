//! Asset Inliner
//!
//! Rewrites local asset references in a built page into data URIs. Final
//! pages embed the real bytes; preview pages swap artwork for a watermark
//! graphic and mute audio. Unresolved references are reported, never fatal.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use regex::{Captures, Regex};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::OnceLock;
use tracing::{info, warn};

use crate::error::{BuildError, IoContext};
use crate::order::Variant;

const UNRESOLVED_SAMPLE: usize = 5;

/// 1x1 transparent PNG.
const NEUTRAL_PIXEL_URI: &str =
    "data:image/png;base64,iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAQAAAC1HAwCAAAAC0lEQVR4nGNgYAAAAAMAASsJTYQAAAAASUVORK5CYII=";

const WATERMARK_SVG: &str = r##"<?xml version="1.0" encoding="UTF-8"?>
<svg xmlns="http://www.w3.org/2000/svg" width="1080" height="1920" viewBox="0 0 1080 1920">
  <defs>
    <pattern id="noise" width="16" height="16" patternUnits="userSpaceOnUse">
      <rect width="16" height="16" fill="#161616"/>
      <rect width="8" height="8" fill="#1f1f1f"/>
      <rect x="8" y="8" width="8" height="8" fill="#1f1f1f"/>
    </pattern>
  </defs>
  <rect width="1080" height="1920" fill="url(#noise)"/>
  <g opacity="0.28" fill="#ff2d2d" font-size="132" font-family="Arial, sans-serif" text-anchor="middle" dominant-baseline="middle">
    <text x="50%" y="32%" transform="rotate(-24 540 615)">PREVIEW</text>
    <text x="50%" y="50%" transform="rotate(-24 540 960)">PREVIEW</text>
    <text x="50%" y="68%" transform="rotate(-24 540 1305)">PREVIEW</text>
  </g>
</svg>"##;

const ASSET_REFERENCE: &str = r#"(?i)(?:\./|/)?[^"'`()<>\s]+\.(?:png|jpe?g|webp|gif|svg|mp3|ogg|wav|m4a|webm|json|woff2?|ttf)(?:\?[a-zA-Z0-9=%&._-]+)?(?:#[a-zA-Z0-9=%&._-]+)?"#;

fn asset_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| match Regex::new(ASSET_REFERENCE) {
        Ok(re) => Some(re),
        Err(e) => {
            warn!(error = %e, "Invalid asset reference pattern, inlining disabled");
            None
        }
    })
    .as_ref()
}

/// The fixed trial-watermark image every preview image reference becomes.
pub fn watermark_data_uri() -> &'static str {
    static URI: OnceLock<String> = OnceLock::new();
    URI.get_or_init(|| format!("data:image/svg+xml;base64,{}", STANDARD.encode(WATERMARK_SVG)))
}

pub fn mime_type(path: &str) -> Option<&'static str> {
    let ext = path.rsplit_once('.')?.1.to_ascii_lowercase();
    Some(match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "mp3" => "audio/mpeg",
        "ogg" => "audio/ogg",
        "wav" => "audio/wav",
        "m4a" => "audio/mp4",
        "webm" => "video/webm",
        "json" => "application/json",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        _ => return None,
    })
}

fn empty_data_uri(path: &str) -> String {
    format!("data:{};base64,", mime_type(path).unwrap_or("application/octet-stream"))
}

fn is_audio(path: &str) -> bool {
    mime_type(path).map_or(false, |m| m.starts_with("audio/"))
}

/// Allow-lists that bend the default preview/final substitution.
#[derive(Debug, Clone)]
pub struct InlinePolicy {
    /// Games whose preview audio gets a neutral placeholder.
    pub high_value_audio_games: Vec<String>,
    /// Path prefixes that may be absent and degrade to an empty placeholder.
    pub optional_prefixes: Vec<String>,
    /// Exact paths that may be absent and degrade to an empty placeholder.
    pub optional_paths: Vec<String>,
}

impl Default for InlinePolicy {
    fn default() -> Self {
        Self {
            high_value_audio_games: vec!["olympus".to_string()],
            optional_prefixes: vec!["assets/cyber/".to_string(), "assets/audio/cyber_".to_string()],
            optional_paths: vec![
                "assets/audio/laser_jump.ogg".to_string(),
                "assets/audio/glitch.ogg".to_string(),
            ],
        }
    }
}

impl InlinePolicy {
    fn is_high_value(&self, path: &str, game: &str) -> bool {
        is_audio(path) && self.high_value_audio_games.iter().any(|g| g == game)
    }

    fn is_optional(&self, path: &str) -> bool {
        self.optional_prefixes.iter().any(|p| path.starts_with(p.as_str()))
            || self.optional_paths.iter().any(|p| p == path)
    }

    fn preview_placeholder(path: &str) -> String {
        match mime_type(path) {
            Some(m) if m.starts_with("image/") => NEUTRAL_PIXEL_URI.to_string(),
            _ => empty_data_uri(path),
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct InlineReport {
    pub replaced: usize,
    pub unresolved: Vec<String>,
}

pub struct AssetInliner {
    policy: InlinePolicy,
}

impl AssetInliner {
    pub fn new(policy: InlinePolicy) -> Self {
        Self { policy }
    }

    /// Rewrite `html_path` in place.
    pub async fn inline(
        &self,
        html_path: &Path,
        work_dir: &Path,
        variant: Variant,
        game: &str,
    ) -> Result<InlineReport, BuildError> {
        let html = tokio::fs::read_to_string(html_path)
            .await
            .context(|| format!("reading {}", html_path.display()))?;

        let Some(pattern) = asset_regex() else {
            return Ok(InlineReport::default());
        };
        let refs: BTreeSet<&str> = pattern.find_iter(&html).map(|m| m.as_str()).collect();
        if refs.is_empty() {
            return Ok(InlineReport::default());
        }

        let mut roots = vec![work_dir];
        if let Some(page_dir) = html_path.parent().filter(|d| *d != work_dir) {
            roots.push(page_dir);
        }

        let mut report = InlineReport::default();
        let mut substitutions: HashMap<&str, String> = HashMap::new();
        for reference in refs {
            match self.resolve(reference, &roots, variant, game).await {
                Resolution::Replace(uri) => {
                    substitutions.insert(reference, uri);
                }
                Resolution::Unresolved => report.unresolved.push(reference.to_string()),
                Resolution::Skip => {}
            }
        }
        report.replaced = substitutions.len();

        if !substitutions.is_empty() {
            let updated = pattern.replace_all(&html, |caps: &Captures<'_>| {
                let matched = &caps[0];
                substitutions
                    .get(matched)
                    .cloned()
                    .unwrap_or_else(|| matched.to_string())
            });
            tokio::fs::write(html_path, updated.as_bytes())
                .await
                .context(|| format!("writing {}", html_path.display()))?;
            info!(
                file = %html_path.display(),
                variant = variant.as_str(),
                replaced = report.replaced,
                "Inlined local asset references"
            );
        }

        if !report.unresolved.is_empty() {
            let sample = report
                .unresolved
                .iter()
                .take(UNRESOLVED_SAMPLE)
                .cloned()
                .collect::<Vec<_>>()
                .join(", ");
            warn!(count = report.unresolved.len(), sample = %sample, "Unresolved asset references");
        }

        Ok(report)
    }

    /// Assets resolve against the work dir first, then the page's directory.
    async fn resolve(&self, reference: &str, roots: &[&Path], variant: Variant, game: &str) -> Resolution {
        let clean = reference.split('#').next().unwrap_or_default();
        let clean = clean.split('?').next().unwrap_or_default();
        let normalized = clean.strip_prefix("./").or_else(|| clean.strip_prefix('/')).unwrap_or(clean);
        let lower = normalized.to_ascii_lowercase();
        if normalized.is_empty()
            || normalized.contains("..")
            || lower.starts_with("http:")
            || lower.starts_with("https:")
            || lower.starts_with("//")
            || lower.starts_with("data:")
        {
            return Resolution::Skip;
        }

        let preview = variant == Variant::Preview;
        if preview && self.policy.is_high_value(normalized, game) {
            return Resolution::Replace(InlinePolicy::preview_placeholder(normalized));
        }

        let mut found = None;
        for root in roots {
            let candidate = root.join(normalized);
            if tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
                found = Some(candidate);
                break;
            }
        }
        let mime = mime_type(normalized);
        let (Some(asset_path), Some(mime)) = (found, mime) else {
            if self.policy.is_optional(normalized) {
                return Resolution::Replace(empty_data_uri(normalized));
            }
            return Resolution::Unresolved;
        };

        if preview && mime.starts_with("image/") {
            return Resolution::Replace(watermark_data_uri().to_string());
        }
        if preview && mime.starts_with("audio/") {
            return Resolution::Replace(empty_data_uri(normalized));
        }

        match tokio::fs::read(&asset_path).await {
            Ok(bytes) => Resolution::Replace(format!("data:{mime};base64,{}", STANDARD.encode(bytes))),
            Err(e) => {
                warn!(asset = %asset_path.display(), error = %e, "Failed to read asset");
                Resolution::Unresolved
            }
        }
    }
}

impl Default for AssetInliner {
    fn default() -> Self {
        Self::new(InlinePolicy::default())
    }
}

enum Resolution {
    Replace(String),
    Unresolved,
    Skip,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const PNG_BYTES: &[u8] = b"\x89PNG\r\n\x1a\nREALART";

    fn setup(html: &str) -> (TempDir, std::path::PathBuf) {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("assets/audio")).unwrap();
        fs::write(dir.path().join("assets/hero.png"), PNG_BYTES).unwrap();
        fs::write(dir.path().join("assets/audio/theme.ogg"), b"OggS-audio").unwrap();
        let page = dir.path().join("index.html");
        fs::write(&page, html).unwrap();
        (dir, page)
    }

    #[tokio::test]
    async fn final_variant_embeds_real_bytes() {
        let (dir, page) = setup(r#"<img src="./assets/hero.png"><audio src="assets/audio/theme.ogg">"#);
        let report = AssetInliner::default()
            .inline(&page, dir.path(), Variant::Final, "matching")
            .await
            .unwrap();

        let out = fs::read_to_string(&page).unwrap();
        assert_eq!(report.replaced, 2);
        assert!(out.contains(&format!("data:image/png;base64,{}", STANDARD.encode(PNG_BYTES))));
        assert!(out.contains(&format!("data:audio/ogg;base64,{}", STANDARD.encode(b"OggS-audio"))));
        assert!(!out.contains(watermark_data_uri()));
    }

    #[tokio::test]
    async fn preview_variant_never_embeds_artwork() {
        let (dir, page) = setup(r#"<img src="./assets/hero.png"><audio src="assets/audio/theme.ogg">"#);
        AssetInliner::default()
            .inline(&page, dir.path(), Variant::Preview, "matching")
            .await
            .unwrap();

        let out = fs::read_to_string(&page).unwrap();
        assert!(!out.contains(&STANDARD.encode(PNG_BYTES)));
        assert!(out.contains(watermark_data_uri()));
        assert!(out.contains(r#"src="data:audio/ogg;base64,""#));
    }

    #[tokio::test]
    async fn high_value_preview_audio_uses_placeholder_even_when_missing() {
        let (dir, page) = setup(r#"<audio src="assets/audio/zeus.mp3">"#);
        let report = AssetInliner::default()
            .inline(&page, dir.path(), Variant::Preview, "olympus")
            .await
            .unwrap();
        assert!(report.unresolved.is_empty());
        assert!(fs::read_to_string(&page).unwrap().contains("data:audio/mpeg;base64,"));
    }

    #[tokio::test]
    async fn optional_assets_degrade_and_others_are_reported() {
        let (dir, page) = setup(
            r#"<img src="assets/cyber/robot_idle.png"><img src="assets/missing.webp"><a href="https://cdn.example.com/x.png">"#,
        );
        let report = AssetInliner::default()
            .inline(&page, dir.path(), Variant::Final, "railroad")
            .await
            .unwrap();

        let out = fs::read_to_string(&page).unwrap();
        assert!(out.contains(r#"src="data:image/png;base64,""#));
        assert!(out.contains("assets/missing.webp"));
        assert!(out.contains("https://cdn.example.com/x.png"));
        assert_eq!(report.unresolved, vec!["assets/missing.webp".to_string()]);
    }

    #[tokio::test]
    async fn overlapping_references_are_replaced_independently() {
        let (dir, page) = setup(r#"a="./assets/hero.png" b="assets/hero.png?v=2""#);
        AssetInliner::default()
            .inline(&page, dir.path(), Variant::Final, "matching")
            .await
            .unwrap();
        let out = fs::read_to_string(&page).unwrap();
        assert!(!out.contains("hero.png"));
        assert_eq!(out.matches("data:image/png;base64,").count(), 2);
    }

    #[test]
    fn mime_lookup_is_case_insensitive() {
        assert_eq!(mime_type("A/B.PNG"), Some("image/png"));
        assert_eq!(mime_type("font.woff2"), Some("font/woff2"));
        assert_eq!(mime_type("notes.txt"), None);
    }
}

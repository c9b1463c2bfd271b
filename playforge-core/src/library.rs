//! Library Fast Path
//!
//! Prebuilt artifacts live at `<library>/<game-id>/<geo>_{preview|final}.html`.
//! A hit skips staging, provisioning and building; only the runtime config is
//! re-injected. Orders with a click-through override always take the full
//! build since a library page cannot carry a per-order redirect.

use std::path::{Path, PathBuf};
use tracing::{error, info};

use crate::error::{BuildError, IoContext};
use crate::inject::RuntimeConfigInjector;
use crate::order::{BuildOrder, OrderConfig, RuntimeConfig, Variant, DEFAULT_STARTING_BALANCE};
use crate::pipeline::PlayablePipeline;

/// A geography the library is prebuilt for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geo {
    pub id: &'static str,
    pub language: &'static str,
    pub currency: &'static str,
}

pub const GEOS: [Geo; 3] = [
    Geo { id: "en_usd", language: "en", currency: "$" },
    Geo { id: "pt_brl", language: "pt", currency: "R$" },
    Geo { id: "es_eur", language: "es", currency: "€" },
];

pub struct LibraryFastPath {
    library_dir: PathBuf,
    injector: RuntimeConfigInjector,
}

impl LibraryFastPath {
    pub fn new(library_dir: PathBuf) -> Self {
        Self {
            library_dir,
            injector: RuntimeConfigInjector::new(),
        }
    }

    pub fn artifact_path(&self, library_game_id: &str, geo_id: &str, variant: Variant) -> PathBuf {
        self.library_dir
            .join(library_game_id)
            .join(format!("{geo_id}_{}.html", variant.as_str()))
    }

    /// Copy the prebuilt page to `output` and re-inject `runtime`.
    /// `Ok(None)` means no usable library artifact.
    pub async fn try_fast_path(
        &self,
        order: &BuildOrder,
        library_game_id: Option<&str>,
        output: &Path,
        runtime: RuntimeConfig,
    ) -> Result<Option<PathBuf>, BuildError> {
        if order.click_url().is_some() {
            return Ok(None);
        }
        let Some(game_id) = library_game_id else {
            return Ok(None);
        };
        let source = self.artifact_path(game_id, order.geo_id(), order.variant());
        if !tokio::fs::try_exists(&source).await.unwrap_or(false) {
            return Ok(None);
        }

        tokio::fs::copy(&source, output)
            .await
            .context(|| format!("copying library artifact {}", source.display()))?;
        self.injector.inject(output, runtime).await?;
        info!(order_id = %order.id, source = %source.display(), "Served from library");
        Ok(Some(output.to_path_buf()))
    }
}

/// Outcome of one library prebuild entry.
#[derive(Debug, Clone)]
pub struct PrebuiltEntry {
    pub game_id: String,
    pub geo_id: &'static str,
    pub variant: Variant,
    pub path: Option<PathBuf>,
}

/// Build preview and final artifacts for every library game across [`GEOS`].
/// Individual failures are logged and recorded with `path: None`.
pub async fn prebuild_library(pipeline: &PlayablePipeline) -> Result<Vec<PrebuiltEntry>, BuildError> {
    let library = pipeline.library();
    let mut entries = Vec::new();

    for descriptor in pipeline.registry().list() {
        let Some(game_id) = descriptor.library_game_id.clone() else {
            continue;
        };
        let game_dir = library.library_dir.join(&game_id);
        tokio::fs::create_dir_all(&game_dir)
            .await
            .context(|| format!("creating {}", game_dir.display()))?;
        let theme = descriptor.theme_assets.as_ref().map(|t| t.default_theme.clone());

        for geo in GEOS {
            for variant in [Variant::Preview, Variant::Final] {
                let order = BuildOrder::new(
                    format!("lib_{game_id}_{}_{}", geo.id, variant.as_str()),
                    OrderConfig {
                        game: Some(descriptor.game_key.clone()),
                        theme_id: theme.clone(),
                        language: Some(geo.language.to_string()),
                        currency: Some(geo.currency.to_string()),
                        starting_balance: Some(DEFAULT_STARTING_BALANCE),
                        is_watermarked: variant == Variant::Preview,
                        geo_id: Some(geo.id.to_string()),
                        ..Default::default()
                    },
                );

                let path = match pipeline.build_fresh(&order).await {
                    Ok(artifact) => {
                        let dest = library.artifact_path(&game_id, geo.id, variant);
                        tokio::fs::copy(&artifact.path, &dest)
                            .await
                            .context(|| format!("saving library artifact {}", dest.display()))?;
                        info!(game = %game_id, geo = geo.id, variant = variant.as_str(), "Saved library artifact");
                        Some(dest)
                    }
                    Err(e) => {
                        error!(game = %game_id, geo = geo.id, variant = variant.as_str(), error = %e, "Library prebuild failed");
                        None
                    }
                };
                entries.push(PrebuiltEntry {
                    game_id: game_id.clone(),
                    geo_id: geo.id,
                    variant,
                    path,
                });
            }
        }
    }
    Ok(entries)
}

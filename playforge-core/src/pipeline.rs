//! Playable Pipeline - Single Entry Point
//!
//! Turns one order into one self-contained page: library fast path first,
//! otherwise stage, build, inline and stamp. The workspace is removed on
//! every path out of a template build.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::assembler::TemplateAssembler;
use crate::config::{BuilderConfig, DEPS_CACHE_DIR_NAME};
use crate::deps::{CommandInstaller, DependencyInstaller, DependencyProvisioner};
use crate::error::{BuildError, IoContext};
use crate::inject::RuntimeConfigInjector;
use crate::inliner::AssetInliner;
use crate::library::LibraryFastPath;
use crate::order::{BuildOrder, RuntimeConfig, Variant};
use crate::postprocess::apply_post_processing;
use crate::staging::{remove_path, DirectoryStager};
use crate::templates::{TemplateDescriptor, TemplateRegistry};
use crate::workspace::Workspace;

const STUB_PAGE: &str =
    "<!doctype html><html><head><meta charset=\"utf-8\"></head><body></body></html>";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactSource {
    Library,
    Template,
    Stub,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildArtifact {
    pub order_id: String,
    pub path: PathBuf,
    pub variant: Variant,
    pub source: ArtifactSource,
    pub built_at: DateTime<Utc>,
}

/// Anything the scheduler can hand an admitted order to.
pub trait PlayableBuilder: Send + Sync {
    fn build(&self, order: BuildOrder) -> impl Future<Output = Result<BuildArtifact, BuildError>> + Send;
}

pub struct PlayablePipeline {
    config: BuilderConfig,
    registry: TemplateRegistry,
    assembler: TemplateAssembler,
    inliner: AssetInliner,
    injector: RuntimeConfigInjector,
    library: LibraryFastPath,
}

impl PlayablePipeline {
    /// Pipeline installing dependencies with the configured shell command.
    pub fn from_config(config: BuilderConfig) -> Self {
        let installer = Arc::new(CommandInstaller::new(
            config.install_command.clone(),
            config.max_output_bytes,
        ));
        Self::with_installer(config, installer)
    }

    pub fn with_installer(config: BuilderConfig, installer: Arc<dyn DependencyInstaller>) -> Self {
        let provisioner = Arc::new(DependencyProvisioner::new(
            config.deps_cache_dir(),
            installer,
            config.install_timeout(),
        ));
        let stager = Arc::new(DirectoryStager::probe(&config.temp_dir));
        let assembler = TemplateAssembler::new(
            config.templates_dir.clone(),
            provisioner,
            stager,
            config.build_timeout(),
            config.max_output_bytes,
        );
        Self {
            library: LibraryFastPath::new(config.library_dir.clone()),
            registry: TemplateRegistry::builtin(),
            assembler,
            inliner: AssetInliner::default(),
            injector: RuntimeConfigInjector::new(),
            config,
        }
    }

    pub fn with_registry(mut self, registry: TemplateRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn config(&self) -> &BuilderConfig {
        &self.config
    }

    pub fn registry(&self) -> &TemplateRegistry {
        &self.registry
    }

    pub fn library(&self) -> &LibraryFastPath {
        &self.library
    }

    /// Produce the artifact for `order`, using the library when possible.
    pub async fn generate(&self, order: &BuildOrder) -> Result<BuildArtifact, BuildError> {
        self.run(order, true).await.map_err(|e| log_failure(order, e))
    }

    /// Produce the artifact without consulting the library.
    pub async fn build_fresh(&self, order: &BuildOrder) -> Result<BuildArtifact, BuildError> {
        self.run(order, false).await.map_err(|e| log_failure(order, e))
    }

    async fn run(&self, order: &BuildOrder, use_library: bool) -> Result<BuildArtifact, BuildError> {
        order.validate()?;
        if order.id == DEPS_CACHE_DIR_NAME {
            return Err(BuildError::InvalidOrder(format!("order id {:?} is reserved", order.id)));
        }

        let variant = order.variant();
        info!(order_id = %order.id, variant = variant.as_str(), "Processing order");
        tokio::fs::create_dir_all(&self.config.output_dir)
            .await
            .context(|| format!("creating {}", self.config.output_dir.display()))?;
        let output = self.config.output_dir.join(order.output_filename());
        let runtime = RuntimeConfig::from_order(order, self.config.preview_max_interactions);

        if use_library {
            let library_id = self
                .registry
                .get(order.game_key())
                .and_then(|d| d.library_game_id.as_deref());
            match self.library.try_fast_path(order, library_id, &output, runtime.clone()).await {
                Ok(Some(path)) => return Ok(self.finish(order, path, ArtifactSource::Library).await),
                Ok(None) => {}
                Err(e) => {
                    discard(&output).await;
                    return Err(e);
                }
            }
        }

        let descriptor = self
            .registry
            .resolve(order.game_key())
            .ok_or_else(|| BuildError::UnknownTemplate(order.game_key().to_string()))?;

        if self.config.stub_builds {
            tokio::fs::write(&output, STUB_PAGE)
                .await
                .context(|| format!("writing {}", output.display()))?;
            self.injector.inject(&output, runtime).await?;
            return Ok(artifact(order, output, ArtifactSource::Stub));
        }

        let workspace = Workspace::create(&self.config.temp_dir, &order.id).await?;
        let result = self
            .build_from_template(descriptor, order, &workspace, &output, runtime)
            .await;
        workspace.remove().await;
        result?;

        Ok(self.finish(order, output, ArtifactSource::Template).await)
    }

    /// Everything up to the finished page happens inside the workspace; the
    /// output location is only written by the final copy.
    async fn build_from_template(
        &self,
        descriptor: &TemplateDescriptor,
        order: &BuildOrder,
        workspace: &Workspace,
        output: &Path,
        runtime: RuntimeConfig,
    ) -> Result<(), BuildError> {
        let built = self.assembler.assemble(descriptor, order, workspace).await?;

        let variant = order.variant();
        if variant == Variant::Preview || self.config.inline_final_assets {
            self.inliner
                .inline(&built, workspace.path(), variant, order.game_key())
                .await?;
        }
        self.injector.inject(&built, runtime).await?;

        tokio::fs::copy(&built, output)
            .await
            .context(|| format!("copying artifact to {}", output.display()))?;
        Ok(())
    }

    async fn finish(&self, order: &BuildOrder, path: PathBuf, source: ArtifactSource) -> BuildArtifact {
        if !self.config.post_processing.is_empty() {
            let cwd = path.parent().unwrap_or(Path::new("."));
            apply_post_processing(
                &self.config.post_processing,
                &path,
                cwd,
                self.config.post_process_timeout(),
                self.config.max_output_bytes,
            )
            .await;
        }
        info!(order_id = %order.id, path = %path.display(), ?source, "Artifact ready");
        artifact(order, path, source)
    }

    /// Remove all transient working state, keeping the dependency cache.
    /// Returns how many entries were removed.
    pub async fn cleanup_transient(&self) -> Result<usize, BuildError> {
        let temp = &self.config.temp_dir;
        let mut entries = match tokio::fs::read_dir(temp).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(BuildError::io(format!("listing {}", temp.display()), e)),
        };

        let mut removed = 0;
        while let Some(entry) = entries
            .next_entry()
            .await
            .context(|| format!("listing {}", temp.display()))?
        {
            if entry.file_name() == DEPS_CACHE_DIR_NAME {
                continue;
            }
            let path = entry.path();
            let target = path.clone();
            tokio::task::spawn_blocking(move || remove_path(&target))
                .await
                .map_err(|e| BuildError::io("cleanup task", std::io::Error::other(e)))?
                .context(|| format!("removing {}", path.display()))?;
            removed += 1;
        }
        info!(removed, "Transient working state cleaned up");
        Ok(removed)
    }
}

impl PlayableBuilder for PlayablePipeline {
    fn build(&self, order: BuildOrder) -> impl Future<Output = Result<BuildArtifact, BuildError>> + Send {
        async move { self.generate(&order).await }
    }
}

fn artifact(order: &BuildOrder, path: PathBuf, source: ArtifactSource) -> BuildArtifact {
    BuildArtifact {
        order_id: order.id.clone(),
        path,
        variant: order.variant(),
        source,
        built_at: Utc::now(),
    }
}

fn log_failure(order: &BuildOrder, e: BuildError) -> BuildError {
    if e.is_timeout() {
        error!(order_id = %order.id, kind = e.kind(), "BUILD_TIMEOUT: {e}");
    } else {
        error!(order_id = %order.id, kind = e.kind(), "Build failed: {e}");
    }
    e
}

async fn discard(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Failed to remove partial output");
        }
    }
}

//! Dependency Provisioning
//!
//! One shared dependency directory per `(template, executables)` key. The
//! first caller installs; concurrent callers for the same key await the same
//! in-flight operation. Jobs never install on the hot path.

use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::OnceCell;
use tracing::{info, warn};

use crate::error::{BuildError, IoContext};
use crate::exec::{run_shell, CommandError};

pub const DEPS_DIR_NAME: &str = "node_modules";
pub const MANIFEST_NAME: &str = "package.json";
const LOCKFILE_NAME: &str = "package-lock.json";
const BIN_SUFFIXES: [&str; 4] = ["", ".cmd", ".ps1", ".exe"];

pub type InstallFuture<'a> = Pin<Box<dyn Future<Output = Result<(), BuildError>> + Send + 'a>>;

/// Performs the actual package install into a cache directory.
pub trait DependencyInstaller: Send + Sync {
    fn install<'a>(&'a self, cache_dir: &'a Path, deadline: Duration) -> InstallFuture<'a>;
}

/// Shell-command installer (`npm install ...` by default).
pub struct CommandInstaller {
    command: String,
    max_output: usize,
}

impl CommandInstaller {
    pub fn new(command: impl Into<String>, max_output: usize) -> Self {
        Self {
            command: command.into(),
            max_output,
        }
    }
}

impl DependencyInstaller for CommandInstaller {
    fn install<'a>(&'a self, cache_dir: &'a Path, deadline: Duration) -> InstallFuture<'a> {
        Box::pin(async move {
            run_shell(&self.command, cache_dir, deadline, self.max_output)
                .await
                .map(|_| ())
                .map_err(|e| BuildError::DependencyInstall {
                    key: cache_dir.display().to_string(),
                    reason: match e {
                        CommandError::TimedOut { after, .. } => {
                            format!("install timed out after {}s", after.as_secs())
                        }
                        other => other.to_string(),
                    },
                })
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    template: String,
    executables: Vec<String>,
}

impl CacheKey {
    pub fn new(template: &str, executables: &[String]) -> Self {
        let mut executables = executables.to_vec();
        executables.sort();
        executables.dedup();
        Self {
            template: template.to_string(),
            executables,
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.executables.is_empty() {
            write!(f, "{}__none", self.template)
        } else {
            write!(f, "{}__{}", self.template, self.executables.join("_"))
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PackageManifest {
    #[serde(default)]
    dependencies: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    dev_dependencies: BTreeMap<String, serde_json::Value>,
}

/// Declared packages absent from `deps_dir`, plus missing `bin:<name>` entries.
///
/// An unreadable manifest counts as fully missing.
pub fn missing_dependencies(deps_dir: &Path, manifest_path: &Path, executables: &[String]) -> Vec<String> {
    let manifest = std::fs::read_to_string(manifest_path)
        .ok()
        .and_then(|raw| serde_json::from_str::<PackageManifest>(&raw).ok());
    let Some(manifest) = manifest else {
        return vec![format!("unreadable {}", manifest_path.display())];
    };

    let mut missing: Vec<String> = manifest
        .dependencies
        .keys()
        .chain(manifest.dev_dependencies.keys())
        .filter(|name| {
            let dir = name.split('/').fold(deps_dir.to_path_buf(), |p, seg| p.join(seg));
            !dir.join(MANIFEST_NAME).exists()
        })
        .cloned()
        .collect();

    missing.extend(
        executables
            .iter()
            .filter(|bin| !has_bin(deps_dir, bin))
            .map(|bin| format!("bin:{bin}")),
    );
    missing.dedup();
    missing
}

fn has_bin(deps_dir: &Path, bin: &str) -> bool {
    BIN_SUFFIXES
        .iter()
        .any(|suffix| deps_dir.join(".bin").join(format!("{bin}{suffix}")).exists())
}

/// Whether `deps_dir` satisfies the manifest and executable list.
pub fn is_complete(deps_dir: &Path, manifest_path: &Path, executables: &[String]) -> bool {
    deps_dir.exists() && missing_dependencies(deps_dir, manifest_path, executables).is_empty()
}

/// [`missing_dependencies`] on the blocking pool.
pub async fn find_missing(deps_dir: &Path, manifest_path: &Path, executables: &[String]) -> Vec<String> {
    let (deps, manifest, bins) = (deps_dir.to_path_buf(), manifest_path.to_path_buf(), executables.to_vec());
    tokio::task::spawn_blocking(move || missing_dependencies(&deps, &manifest, &bins))
        .await
        .unwrap_or_else(|e| vec![format!("dependency check aborted: {e}")])
}

/// [`is_complete`] on the blocking pool.
pub async fn check_complete(deps_dir: &Path, manifest_path: &Path, executables: &[String]) -> bool {
    tokio::fs::try_exists(deps_dir).await.unwrap_or(false)
        && find_missing(deps_dir, manifest_path, executables).await.is_empty()
}

/// Shared cache service: `ensure(key)` resolves to the cache's dependency dir.
pub struct DependencyProvisioner {
    cache_root: PathBuf,
    installer: Arc<dyn DependencyInstaller>,
    install_timeout: Duration,
    entries: Mutex<HashMap<CacheKey, Arc<OnceCell<PathBuf>>>>,
}

impl DependencyProvisioner {
    pub fn new(cache_root: PathBuf, installer: Arc<dyn DependencyInstaller>, install_timeout: Duration) -> Self {
        Self {
            cache_root,
            installer,
            install_timeout,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn cache_dir(&self, key: &CacheKey) -> PathBuf {
        self.cache_root.join(key.to_string())
    }

    /// Return the shared dependency directory for this template, provisioning
    /// it at most once across concurrent callers.
    pub async fn ensure(
        &self,
        template_name: &str,
        template_dir: &Path,
        executables: &[String],
    ) -> Result<PathBuf, BuildError> {
        let key = CacheKey::new(template_name, executables);
        let manifest = self.cache_dir(&key).join(MANIFEST_NAME);
        let mut cell = self.entry(&key);

        // A completed entry is trusted until its directory stops validating.
        if let Some(done) = cell.get().cloned() {
            if check_complete(&done, &manifest, &key.executables).await {
                return Ok(done);
            }
            warn!(cache_key = %key, "Dependency cache no longer valid, re-provisioning");
            cell = self.invalidate(&key, &cell);
        }

        cell.get_or_try_init(|| self.provision(&key, template_dir))
            .await
            .cloned()
    }

    fn entry(&self, key: &CacheKey) -> Arc<OnceCell<PathBuf>> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.entry(key.clone()).or_default().clone()
    }

    /// Swap in a fresh cell unless another caller already did.
    fn invalidate(&self, key: &CacheKey, stale: &Arc<OnceCell<PathBuf>>) -> Arc<OnceCell<PathBuf>> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let current = entries.entry(key.clone()).or_default();
        if Arc::ptr_eq(current, stale) {
            *current = Arc::new(OnceCell::new());
        }
        current.clone()
    }

    async fn provision(&self, key: &CacheKey, template_dir: &Path) -> Result<PathBuf, BuildError> {
        let cache_dir = self.cache_dir(key);
        tokio::fs::create_dir_all(&cache_dir)
            .await
            .context(|| format!("creating dependency cache {}", cache_dir.display()))?;

        for name in [MANIFEST_NAME, LOCKFILE_NAME] {
            let src = template_dir.join(name);
            if name == MANIFEST_NAME || tokio::fs::try_exists(&src).await.unwrap_or(false) {
                tokio::fs::copy(&src, cache_dir.join(name))
                    .await
                    .context(|| format!("copying {} into dependency cache", src.display()))?;
            }
        }

        let deps_dir = cache_dir.join(DEPS_DIR_NAME);
        let manifest = cache_dir.join(MANIFEST_NAME);
        if check_complete(&deps_dir, &manifest, &key.executables).await {
            return Ok(deps_dir);
        }

        info!(cache_key = %key, "Installing dependency cache");
        self.installer.install(&cache_dir, self.install_timeout).await?;

        let missing = find_missing(&deps_dir, &manifest, &key.executables).await;
        if !missing.is_empty() {
            return Err(BuildError::DependencyInstall {
                key: key.to_string(),
                reason: format!("still missing after install: {}", missing.join(", ")),
            });
        }
        info!(cache_key = %key, "Dependency cache ready");
        Ok(deps_dir)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Installer that materializes every declared package and executable.
    pub struct FakeInstaller {
        pub calls: AtomicUsize,
        pub executables: Vec<String>,
        pub delay: Duration,
    }

    impl FakeInstaller {
        pub fn new(executables: &[&str]) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                executables: executables.iter().map(|s| s.to_string()).collect(),
                delay: Duration::from_millis(50),
            }
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl DependencyInstaller for FakeInstaller {
        fn install<'a>(&'a self, cache_dir: &'a Path, _deadline: Duration) -> InstallFuture<'a> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(self.delay).await;
                materialize(cache_dir, &self.executables);
                Ok(())
            })
        }
    }

    pub fn materialize(cache_dir: &Path, executables: &[String]) {
        let raw = std::fs::read_to_string(cache_dir.join(MANIFEST_NAME)).unwrap_or_default();
        let manifest: PackageManifest = serde_json::from_str(&raw).unwrap_or_default();
        let deps = cache_dir.join(DEPS_DIR_NAME);
        for name in manifest.dependencies.keys().chain(manifest.dev_dependencies.keys()) {
            let dir = name.split('/').fold(deps.clone(), |p, seg| p.join(seg));
            std::fs::create_dir_all(&dir).unwrap();
            std::fs::write(dir.join(MANIFEST_NAME), "{}").unwrap();
        }
        std::fs::create_dir_all(deps.join(".bin")).unwrap();
        for bin in executables {
            std::fs::write(deps.join(".bin").join(bin), "#!/bin/sh\n").unwrap();
        }
    }
}

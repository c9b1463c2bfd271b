//! Directory Staging Strategies
//!
//! Shared dependency trees reach a job's private working copy either as a
//! symlink or as a recursive copy. The strategy is picked by probing the
//! filesystem once; a failed link still falls back to a copy.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

pub trait StagingStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    fn stage(&self, shared: &Path, dest: &Path) -> io::Result<()>;
}

/// Directory symlink pointing at the shared tree.
pub struct LinkStrategy;

impl StagingStrategy for LinkStrategy {
    fn name(&self) -> &'static str { "link" }

    fn stage(&self, shared: &Path, dest: &Path) -> io::Result<()> {
        symlink_dir(shared, dest)
    }
}

/// Full recursive copy of the shared tree.
pub struct CopyStrategy;

impl StagingStrategy for CopyStrategy {
    fn name(&self) -> &'static str { "copy" }

    fn stage(&self, shared: &Path, dest: &Path) -> io::Result<()> {
        copy_tree(shared, dest, |_| false)
    }
}

#[cfg(unix)]
fn symlink_dir(src: &Path, dest: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(src, dest)
}

#[cfg(windows)]
fn symlink_dir(src: &Path, dest: &Path) -> io::Result<()> {
    std::os::windows::fs::symlink_dir(src, dest)
}

#[cfg(not(any(unix, windows)))]
fn symlink_dir(_src: &Path, _dest: &Path) -> io::Result<()> {
    Err(io::Error::new(io::ErrorKind::Unsupported, "symlinks unsupported"))
}

/// Stager holding the probed strategy plus the copy fallback.
pub struct DirectoryStager {
    preferred: Box<dyn StagingStrategy>,
    fallback: CopyStrategy,
}

impl DirectoryStager {
    pub fn new(preferred: Box<dyn StagingStrategy>) -> Self {
        Self {
            preferred,
            fallback: CopyStrategy,
        }
    }

    /// Probe whether directory symlinks work under `scratch_root`.
    pub fn probe(scratch_root: &Path) -> Self {
        let probe_dir = scratch_root.join(format!(".link-probe-{}", uuid::Uuid::new_v4().simple()));
        let target = probe_dir.join("target");
        let link = probe_dir.join("link");

        let linked = fs::create_dir_all(&target)
            .and_then(|_| symlink_dir(&target, &link))
            .is_ok();
        let _ = fs::remove_dir_all(&probe_dir);

        let preferred: Box<dyn StagingStrategy> = if linked {
            Box::new(LinkStrategy)
        } else {
            Box::new(CopyStrategy)
        };
        debug!(strategy = preferred.name(), "Probed dependency staging strategy");
        Self::new(preferred)
    }

    pub fn strategy_name(&self) -> &'static str {
        self.preferred.name()
    }

    /// Stage `shared` at `dest`, replacing whatever was there.
    pub fn stage(&self, shared: &Path, dest: &Path) -> io::Result<&'static str> {
        remove_path(dest)?;
        match self.preferred.stage(shared, dest) {
            Ok(()) => Ok(self.preferred.name()),
            Err(e) if self.preferred.name() != self.fallback.name() => {
                warn!(
                    error = %e,
                    dest = %dest.display(),
                    "Staging with {} failed, copying instead",
                    self.preferred.name()
                );
                remove_path(dest)?;
                self.fallback.stage(shared, dest)?;
                Ok(self.fallback.name())
            }
            Err(e) => Err(e),
        }
    }
}

/// Remove a file, symlink or directory tree if present.
pub fn remove_path(path: &Path) -> io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Recursively copy `src` into `dest`, skipping entries `exclude` accepts.
/// Symlinks inside the tree are followed.
pub fn copy_tree(src: &Path, dest: &Path, exclude: impl Fn(&Path) -> bool) -> io::Result<()> {
    fs::create_dir_all(dest)?;
    let walker = WalkDir::new(src)
        .follow_links(true)
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !exclude(entry.path()));

    for entry in walker {
        let entry = entry.map_err(io::Error::from)?;
        let rel: PathBuf = match entry.path().strip_prefix(src) {
            Ok(rel) => rel.to_path_buf(),
            Err(_) => continue,
        };
        if rel.as_os_str().is_empty() {
            continue;
        }
        let target = dest.join(&rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

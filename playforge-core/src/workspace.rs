//! Per-order working directories
//!
//! A workspace is owned by exactly one job. It is removed explicitly at job
//! end; dropping an unremoved workspace removes it synchronously.

use std::path::{Path, PathBuf};
use tracing::warn;

use crate::error::{BuildError, IoContext};
use crate::staging::remove_path;

#[derive(Debug)]
pub struct Workspace {
    path: PathBuf,
    removed: bool,
}

impl Workspace {
    /// Create `<temp_root>/<order_id>`, clearing leftovers from a crashed run.
    pub async fn create(temp_root: &Path, order_id: &str) -> Result<Self, BuildError> {
        let path = temp_root.join(order_id);
        let stale = path.clone();
        tokio::task::spawn_blocking(move || remove_path(&stale))
            .await
            .map_err(|e| BuildError::io("clearing stale workspace", std::io::Error::other(e)))?
            .context(|| format!("clearing stale workspace {}", path.display()))?;
        tokio::fs::create_dir_all(&path)
            .await
            .context(|| format!("creating workspace {}", path.display()))?;
        Ok(Self { path, removed: false })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn remove(mut self) {
        self.removed = true;
        let path = self.path.clone();
        let result = tokio::task::spawn_blocking(move || remove_path(&path)).await;
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(path = %self.path.display(), error = %e, "Failed to remove workspace"),
            Err(e) => warn!(path = %self.path.display(), error = %e, "Workspace removal task failed"),
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if !self.removed {
            if let Err(e) = remove_path(&self.path) {
                warn!(path = %self.path.display(), error = %e, "Failed to remove workspace on drop");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn remove_deletes_directory() {
        let root = TempDir::new().unwrap();
        let ws = Workspace::create(root.path(), "order-1").await.unwrap();
        std::fs::write(ws.path().join("index.html"), "x").unwrap();
        let path = ws.path().to_path_buf();
        ws.remove().await;
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn drop_deletes_directory() {
        let root = TempDir::new().unwrap();
        let path = {
            let ws = Workspace::create(root.path(), "order-2").await.unwrap();
            ws.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn create_clears_leftovers() {
        let root = TempDir::new().unwrap();
        std::fs::create_dir_all(root.path().join("order-3/dist")).unwrap();
        let ws = Workspace::create(root.path(), "order-3").await.unwrap();
        assert!(!ws.path().join("dist").exists());
        ws.remove().await;
    }
}

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Path-addressed byte store rooted at the configured data directory.
///
/// All callers hand in paths relative to the root; parent directories are
/// created on demand.
#[derive(Debug, Clone)]
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Absolute path for a relative artifact path.
    #[must_use]
    pub fn resolve(&self, relative: &Path) -> PathBuf {
        self.root.join(relative)
    }

    /// Write bytes, creating parent directories as needed.
    ///
    /// Returns the resolved absolute path.
    pub async fn save_bytes(&self, relative: &Path, data: &[u8]) -> Result<PathBuf> {
        let abs = self.resolve(relative);
        if let Some(parent) = abs.parent() {
            tokio::fs::create_dir_all(parent).await.with_context(|| {
                format!("Failed to create artifact directory: {}", parent.display())
            })?;
        }
        tokio::fs::write(&abs, data)
            .await
            .with_context(|| format!("Failed to write artifact: {}", abs.display()))?;
        Ok(abs)
    }

    /// Read an artifact's bytes.
    pub async fn read(&self, relative: &Path) -> Result<Vec<u8>> {
        let abs = self.resolve(relative);
        tokio::fs::read(&abs)
            .await
            .with_context(|| format!("Failed to read artifact: {}", abs.display()))
    }

    /// Whether an artifact exists on disk.
    pub async fn exists(&self, relative: &Path) -> bool {
        tokio::fs::try_exists(self.resolve(relative))
            .await
            .unwrap_or(false)
    }

    /// Delete an artifact if present. A missing file is not an error.
    pub async fn delete(&self, relative: &Path) -> Result<()> {
        let abs = self.resolve(relative);
        match tokio::fs::remove_file(&abs).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(anyhow::Error::new(e))
                .context(format!("Failed to delete artifact: {}", abs.display())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[tokio::test]
    async fn test_save_read_delete_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = FileStorage::new(dir.path());
        let rel = Path::new("jobs/abc/raw/1.html");

        assert!(!storage.exists(rel).await);

        let abs = storage.save_bytes(rel, b"<html></html>").await.expect("save");
        assert!(abs.ends_with("jobs/abc/raw/1.html"));
        assert!(storage.exists(rel).await);
        assert_eq!(storage.read(rel).await.expect("read"), b"<html></html>");

        storage.delete(rel).await.expect("delete");
        assert!(!storage.exists(rel).await);
        // Deleting again is a no-op.
        storage.delete(rel).await.expect("delete twice");
    }
}

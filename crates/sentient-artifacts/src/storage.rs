//! Durable file area holding the generated images.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sentient_core::StorageError;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// A file in artifact storage and when it was created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredArtifact {
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[cfg_attr(any(test, feature = "mocks"), mockall::automock)]
#[async_trait]
pub trait ArtifactStorage: Send + Sync {
    /// Write `bytes` under `name`, replacing any existing file atomically.
    async fn write(&self, name: &str, bytes: &[u8]) -> Result<(), StorageError>;

    async fn exists(&self, name: &str) -> Result<bool, StorageError>;

    /// Delete `name`. Deleting a file that is already gone succeeds.
    async fn delete(&self, name: &str) -> Result<(), StorageError>;

    /// All stored artifacts, in no particular order.
    async fn list(&self) -> Result<Vec<StoredArtifact>, StorageError>;

    /// Location of `name` for callers that serve or display the file.
    fn path(&self, name: &str) -> PathBuf;
}

/// Artifact storage backed by a single directory.
///
/// Writes go to a hidden temporary file that is renamed into place, so a
/// crash never leaves a partially written artifact under its final name.
/// Hidden files are excluded from [`ArtifactStorage::list`].
#[derive(Debug, Clone)]
pub struct FsArtifactStorage {
    dir: PathBuf,
}

impl FsArtifactStorage {
    /// Open (and create if needed) the storage directory.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await.map_err(|e| {
            StorageError::Unavailable(format!("{}: {}", dir.display(), e))
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn checked_path(&self, name: &str) -> Result<PathBuf, StorageError> {
        let valid = !name.is_empty()
            && !name.starts_with('.')
            && !name.contains(['/', '\\'])
            && name != "..";
        if valid {
            Ok(self.dir.join(name))
        } else {
            Err(StorageError::Io(format!("invalid artifact name: {:?}", name)))
        }
    }
}

/// Removes the temporary file on drop unless the write completed.
struct TempFileGuard {
    path: PathBuf,
    armed: bool,
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        if self.armed {
            if let Err(e) = std::fs::remove_file(&self.path) {
                if e.kind() != ErrorKind::NotFound {
                    tracing::warn!("Failed to remove temp file {}: {}", self.path.display(), e);
                }
            }
        }
    }
}

#[async_trait]
impl ArtifactStorage for FsArtifactStorage {
    async fn write(&self, name: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let final_path = self.checked_path(name)?;
        let temp_path = self
            .dir
            .join(format!(".{}.{}.tmp", name, uuid::Uuid::new_v4()));

        let mut guard = TempFileGuard {
            path: temp_path.clone(),
            armed: true,
        };

        tokio::fs::write(&temp_path, bytes).await?;
        tokio::fs::rename(&temp_path, &final_path).await?;
        guard.armed = false;

        tracing::debug!("Wrote artifact {} ({} bytes)", name, bytes.len());
        Ok(())
    }

    async fn exists(&self, name: &str) -> Result<bool, StorageError> {
        let path = self.checked_path(name)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, name: &str) -> Result<(), StorageError> {
        let path = self.checked_path(name)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self) -> Result<Vec<StoredArtifact>, StorageError> {
        let mut artifacts = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let name = match entry.file_name().into_string() {
                Ok(name) if !name.starts_with('.') => name,
                _ => continue,
            };

            // Files can vanish between read_dir and metadata under concurrent eviction
            let meta = match entry.metadata().await {
                Ok(meta) => meta,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            if !meta.is_file() {
                continue;
            }

            let created = meta.created().or_else(|_| meta.modified())?;
            artifacts.push(StoredArtifact {
                name,
                created_at: DateTime::<Utc>::from(created),
            });
        }

        Ok(artifacts)
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn storage() -> (tempfile::TempDir, FsArtifactStorage) {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsArtifactStorage::open(dir.path().join("images")).await.unwrap();
        (dir, storage)
    }

    #[tokio::test]
    async fn test_write_exists_delete() {
        let (_dir, storage) = storage().await;

        storage.write("paris_clear_sky_1.png", b"png").await.unwrap();
        assert!(storage.exists("paris_clear_sky_1.png").await.unwrap());
        assert_eq!(
            std::fs::read(storage.path("paris_clear_sky_1.png")).unwrap(),
            b"png"
        );

        storage.delete("paris_clear_sky_1.png").await.unwrap();
        assert!(!storage.exists("paris_clear_sky_1.png").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_missing_is_ok() {
        let (_dir, storage) = storage().await;
        storage.delete("never_written.png").await.unwrap();
    }

    #[tokio::test]
    async fn test_list_skips_hidden_files() {
        let (_dir, storage) = storage().await;

        storage.write("a.png", b"a").await.unwrap();
        storage.write("b.png", b"b").await.unwrap();
        std::fs::write(storage.dir().join(".b.png.partial.tmp"), b"x").unwrap();

        let mut names: Vec<_> = storage.list().await.unwrap().into_iter().map(|a| a.name).collect();
        names.sort();
        assert_eq!(names, vec!["a.png", "b.png"]);
    }

    #[tokio::test]
    async fn test_write_leaves_no_temp_files() {
        let (_dir, storage) = storage().await;
        storage.write("a.png", b"first").await.unwrap();
        storage.write("a.png", b"second").await.unwrap();

        let entries: Vec<_> = std::fs::read_dir(storage.dir()).unwrap().collect();
        assert_eq!(entries.len(), 1);
        assert_eq!(std::fs::read(storage.path("a.png")).unwrap(), b"second");
    }

    #[tokio::test]
    async fn test_rejects_path_traversal() {
        let (_dir, storage) = storage().await;
        assert!(storage.write("../escape.png", b"x").await.is_err());
        assert!(storage.write(".hidden", b"x").await.is_err());
        assert!(storage.exists("a/b.png").await.is_err());
    }
}

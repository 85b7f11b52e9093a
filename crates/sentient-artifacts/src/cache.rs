//! Time-boxed, size-bounded cache of generated images.

use chrono::{DateTime, Utc};
use sentient_core::CacheConfig;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use crate::clock::Clock;
use crate::error::CacheError;
use crate::key::CacheKey;
use crate::metadata::{CacheEntry, CacheMetadataStore};
use crate::storage::ArtifactStorage;

/// File extension of stored images.
pub const ARTIFACT_EXTENSION: &str = "png";

/// Unreferenced files younger than this may belong to a store in progress.
const ORPHAN_FILE_GRACE_SECS: i64 = 300;

/// Upper bound for the TTL so duration arithmetic cannot overflow.
const MAX_TTL_HOURS: u64 = 24 * 365 * 100;

/// Validity window and retention bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    pub ttl: chrono::Duration,
    pub max_retained: usize,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            ttl: chrono::Duration::hours(24),
            max_retained: 20,
        }
    }
}

impl CachePolicy {
    pub fn from_config(config: &CacheConfig) -> Self {
        let hours = config.ttl_hours.min(MAX_TTL_HOURS) as i64;
        Self {
            ttl: chrono::Duration::hours(hours),
            max_retained: config.max_retained,
        }
    }
}

/// A valid cached image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactRef {
    pub key: CacheKey,
    /// File name in artifact storage
    pub name: String,
    pub path: PathBuf,
    pub created_at: DateTime<Utc>,
}

/// What one eviction pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvictionReport {
    /// Artifacts left on disk
    pub retained: usize,
    /// Artifacts removed for exceeding the retention bound
    pub evicted: Vec<String>,
    /// Files no entry referenced, removed after the grace period
    pub orphan_files: usize,
    /// Entries whose file was gone, removed
    pub orphan_entries: usize,
    /// Individual deletions that failed and were skipped
    pub failures: usize,
}

impl EvictionReport {
    pub fn is_clean(&self) -> bool {
        self.failures == 0
    }
}

/// Image cache over an [`ArtifactStorage`] and a [`CacheMetadataStore`].
///
/// Created once per process and shared between requests.
pub struct ArtifactCache {
    storage: Arc<dyn ArtifactStorage>,
    metadata: Arc<dyn CacheMetadataStore>,
    clock: Arc<dyn Clock>,
    policy: CachePolicy,
}

impl ArtifactCache {
    pub fn new(
        storage: Arc<dyn ArtifactStorage>,
        metadata: Arc<dyn CacheMetadataStore>,
        clock: Arc<dyn Clock>,
        policy: CachePolicy,
    ) -> Self {
        Self {
            storage,
            metadata,
            clock,
            policy,
        }
    }

    pub fn policy(&self) -> CachePolicy {
        self.policy
    }

    /// Return the cached image for `key` if it is still valid.
    ///
    /// Expired entries and entries whose file has disappeared are reported as
    /// misses and left in place; the next `store` for the key replaces them.
    #[tracing::instrument(skip(self), fields(key = %key))]
    pub async fn lookup(&self, key: &CacheKey) -> Result<Option<ArtifactRef>, CacheError> {
        let Some(entry) = self.metadata.get(key).await? else {
            tracing::debug!("Cache miss");
            return Ok(None);
        };

        let age = self.clock.now() - entry.created_at;
        if age >= self.policy.ttl {
            tracing::debug!("Cache entry expired ({} minutes old)", age.num_minutes());
            return Ok(None);
        }

        if !self.storage.exists(&entry.artifact).await? {
            tracing::warn!("Cache entry references missing file {}", entry.artifact);
            return Ok(None);
        }

        tracing::info!("Using cached image {}", entry.artifact);
        Ok(Some(self.to_ref(entry)))
    }

    /// Store a freshly generated image for `key`, replacing any previous one,
    /// then enforce the retention bound.
    ///
    /// If the metadata write fails the new file is removed again and the error
    /// returned, so a failed store never leaves a valid-looking entry.
    #[tracing::instrument(skip(self, bytes), fields(key = %key, size = bytes.len()))]
    pub async fn store(&self, key: &CacheKey, bytes: &[u8]) -> Result<ArtifactRef, CacheError> {
        let created_at = self.clock.now();
        let name = format!(
            "{}_{}.{}",
            key,
            created_at.timestamp_millis(),
            ARTIFACT_EXTENSION
        );

        let previous = match self.metadata.get(key).await {
            Ok(previous) => previous,
            Err(e) => {
                tracing::warn!("Could not read previous entry: {}", e);
                None
            }
        };

        self.storage.write(&name, bytes).await?;

        let entry = CacheEntry {
            key: key.clone(),
            artifact: name.clone(),
            created_at,
        };
        if let Err(e) = self.metadata.put(&entry).await {
            if let Err(cleanup) = self.storage.delete(&name).await {
                tracing::warn!("Failed to remove {} after metadata error: {}", name, cleanup);
            }
            return Err(e.into());
        }

        if let Some(previous) = previous.filter(|p| p.artifact != name) {
            match self.storage.delete(&previous.artifact).await {
                Ok(()) => tracing::debug!("Removed superseded image {}", previous.artifact),
                Err(e) => tracing::warn!(
                    "Failed to remove superseded image {}: {}",
                    previous.artifact,
                    e
                ),
            }
        }

        tracing::info!("Cached new image {}", name);
        self.evict_excess().await;

        Ok(self.to_ref(entry))
    }

    /// Keep only the `max_retained` newest artifacts, deleting older files
    /// together with their entries.
    ///
    /// Best effort: individual failures are logged and counted, never returned.
    pub async fn evict_excess(&self) -> EvictionReport {
        let mut report = EvictionReport::default();

        let files = match self.storage.list().await {
            Ok(files) => files,
            Err(e) => {
                tracing::warn!("Eviction skipped, cannot list artifacts: {}", e);
                report.failures += 1;
                return report;
            }
        };
        let entries = match self.metadata.list_all().await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!("Eviction skipped, cannot list cache entries: {}", e);
                report.failures += 1;
                return report;
            }
        };

        let mut referenced: HashMap<&str, Vec<&CacheEntry>> = HashMap::new();
        for entry in &entries {
            referenced.entry(entry.artifact.as_str()).or_default().push(entry);
        }

        let now = self.clock.now();
        let grace = chrono::Duration::seconds(ORPHAN_FILE_GRACE_SECS);
        let mut candidates: Vec<(DateTime<Utc>, &str)> = Vec::with_capacity(files.len());

        for file in &files {
            match referenced.get(file.name.as_str()) {
                Some(refs) => {
                    let created_at = refs
                        .iter()
                        .map(|e| e.created_at)
                        .max()
                        .unwrap_or(file.created_at);
                    candidates.push((created_at, file.name.as_str()));
                }
                None if now - file.created_at >= grace => {
                    match self.storage.delete(&file.name).await {
                        Ok(()) => {
                            tracing::debug!("Removed unreferenced file {}", file.name);
                            report.orphan_files += 1;
                        }
                        Err(e) => {
                            tracing::warn!("Failed to remove unreferenced file {}: {}", file.name, e);
                            report.failures += 1;
                        }
                    }
                }
                None => candidates.push((file.created_at, file.name.as_str())),
            }
        }

        // Newest first; equal timestamps fall back to name order
        candidates.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(b.1)));

        let mut kept = candidates.len().min(self.policy.max_retained);
        for &(_, name) in candidates.iter().skip(self.policy.max_retained) {
            if let Err(e) = self.storage.delete(name).await {
                tracing::warn!("Failed to evict {}: {}", name, e);
                report.failures += 1;
                kept += 1;
                continue;
            }

            for entry in referenced.get(name).into_iter().flatten() {
                if let Err(e) = self.metadata.remove_artifact(&entry.key, name).await {
                    tracing::warn!("Failed to remove entry {} for {}: {}", entry.key, name, e);
                    report.failures += 1;
                }
            }
            report.evicted.push(name.to_string());
        }
        report.retained = kept;

        let listed: HashSet<&str> = files.iter().map(|f| f.name.as_str()).collect();
        for entry in entries.iter().filter(|e| !listed.contains(e.artifact.as_str())) {
            // The file may have been written after the listing was taken
            match self.storage.exists(&entry.artifact).await {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!("Cannot check {}: {}", entry.artifact, e);
                    report.failures += 1;
                    continue;
                }
            }

            match self.metadata.remove_artifact(&entry.key, &entry.artifact).await {
                Ok(true) => {
                    tracing::debug!("Removed entry {} for missing file", entry.key);
                    report.orphan_entries += 1;
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!("Failed to remove orphaned entry {}: {}", entry.key, e);
                    report.failures += 1;
                }
            }
        }

        if !report.evicted.is_empty() || report.orphan_files > 0 || report.orphan_entries > 0 {
            tracing::info!(
                "Eviction kept {} images, evicted {}, removed {} orphan files and {} orphan entries",
                report.retained,
                report.evicted.len(),
                report.orphan_files,
                report.orphan_entries
            );
        }

        report
    }

    /// All entries with whether each is currently valid, newest first.
    pub async fn entries(&self) -> Result<Vec<(CacheEntry, bool)>, CacheError> {
        let now = self.clock.now();
        let mut out = Vec::new();
        for entry in self.metadata.list_all().await? {
            let fresh = now - entry.created_at < self.policy.ttl
                && self.storage.exists(&entry.artifact).await?;
            out.push((entry, fresh));
        }
        Ok(out)
    }

    /// Delete every cached image and entry. Returns the number of files removed.
    pub async fn purge(&self) -> Result<usize, CacheError> {
        for entry in self.metadata.list_all().await? {
            self.metadata.delete(&entry.key).await?;
        }

        let files = self.storage.list().await?;
        for file in &files {
            self.storage.delete(&file.name).await?;
        }
        tracing::info!("Purged {} cached images", files.len());
        Ok(files.len())
    }

    fn to_ref(&self, entry: CacheEntry) -> ArtifactRef {
        ArtifactRef {
            path: self.storage.path(&entry.artifact),
            key: entry.key,
            name: entry.artifact,
            created_at: entry.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::metadata::MockCacheMetadataStore;
    use crate::storage::{MockArtifactStorage, StoredArtifact};
    use chrono::TimeZone;
    use mockall::predicate::eq;
    use sentient_core::StorageError;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 1, 12, 0, 0).unwrap()
    }

    fn cache(
        storage: MockArtifactStorage,
        metadata: MockCacheMetadataStore,
        max_retained: usize,
    ) -> ArtifactCache {
        ArtifactCache::new(
            Arc::new(storage),
            Arc::new(metadata),
            Arc::new(ManualClock::new(start())),
            CachePolicy {
                ttl: chrono::Duration::hours(24),
                max_retained,
            },
        )
    }

    fn entry(key: &str, artifact: &str, minutes_ago: i64) -> CacheEntry {
        CacheEntry {
            key: CacheKey::from_stored(key),
            artifact: artifact.to_string(),
            created_at: start() - chrono::Duration::minutes(minutes_ago),
        }
    }

    #[test]
    fn test_policy_from_config() {
        let config = CacheConfig {
            ttl_hours: 2,
            max_retained: 5,
            ..Default::default()
        };
        let policy = CachePolicy::from_config(&config);
        assert_eq!(policy.ttl, chrono::Duration::hours(2));
        assert_eq!(policy.max_retained, 5);
        assert_eq!(CachePolicy::default().max_retained, 20);
    }

    #[tokio::test]
    async fn test_lookup_expired_entry_skips_storage() {
        let mut storage = MockArtifactStorage::new();
        storage.expect_exists().times(0);

        let mut metadata = MockCacheMetadataStore::new();
        metadata
            .expect_get()
            .returning(|_| Ok(Some(entry("paris__clear_sky", "paris__clear_sky_1.png", 24 * 60))));

        let cache = cache(storage, metadata, 20);
        let key = CacheKey::new("Paris", "Clear sky");
        assert!(cache.lookup(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_lookup_propagates_metadata_errors() {
        let mut metadata = MockCacheMetadataStore::new();
        metadata
            .expect_get()
            .returning(|_| Err(StorageError::Unavailable("locked".into())));

        let cache = cache(MockArtifactStorage::new(), metadata, 20);
        let result = cache.lookup(&CacheKey::new("Paris", "Clear sky")).await;
        assert!(matches!(result, Err(CacheError::Storage(StorageError::Unavailable(_)))));
    }

    #[tokio::test]
    async fn test_failed_metadata_write_removes_new_file() {
        let expected_name = format!("paris__clear_sky_{}.png", start().timestamp_millis());

        let mut storage = MockArtifactStorage::new();
        storage
            .expect_write()
            .withf({
                let expected = expected_name.clone();
                move |name: &str, bytes: &[u8]| name == expected && bytes == b"png"
            })
            .times(1)
            .returning(|_, _| Ok(()));
        storage
            .expect_delete()
            .with(eq(expected_name.clone()))
            .times(1)
            .returning(|_| Ok(()));
        storage.expect_list().times(0);

        let mut metadata = MockCacheMetadataStore::new();
        metadata.expect_get().returning(|_| Ok(None));
        metadata
            .expect_put()
            .times(1)
            .returning(|_| Err(StorageError::QueryFailed("disk I/O error".into())));

        let cache = cache(storage, metadata, 20);
        let result = cache.store(&CacheKey::new("Paris", "Clear sky"), b"png").await;
        assert!(matches!(result, Err(CacheError::Storage(StorageError::QueryFailed(_)))));
    }

    #[tokio::test]
    async fn test_store_deletes_superseded_file() {
        let mut storage = MockArtifactStorage::new();
        storage.expect_write().returning(|_, _| Ok(()));
        storage
            .expect_delete()
            .with(eq("paris__clear_sky_1.png".to_string()))
            .times(1)
            .returning(|_| Ok(()));
        storage.expect_list().returning(|| Ok(Vec::new()));
        storage.expect_path().returning(|name| PathBuf::from("/cache").join(name));

        let mut metadata = MockCacheMetadataStore::new();
        metadata
            .expect_get()
            .returning(|_| Ok(Some(entry("paris__clear_sky", "paris__clear_sky_1.png", 60))));
        metadata.expect_put().times(1).returning(|_| Ok(()));
        metadata.expect_list_all().returning(|| Ok(Vec::new()));

        let cache = cache(storage, metadata, 20);
        let stored = cache.store(&CacheKey::new("Paris", "Clear sky"), b"png").await.unwrap();
        assert_eq!(stored.created_at, start());
        assert_eq!(stored.path, PathBuf::from("/cache").join(&stored.name));
    }

    #[tokio::test]
    async fn test_eviction_skips_failed_deletes() {
        let files = vec![
            StoredArtifact { name: "a.png".into(), created_at: start() },
            StoredArtifact { name: "b.png".into(), created_at: start() },
            StoredArtifact { name: "c.png".into(), created_at: start() },
        ];
        let entries = vec![entry("a", "a.png", 1), entry("b", "b.png", 2), entry("c", "c.png", 3)];

        let mut storage = MockArtifactStorage::new();
        storage.expect_list().returning(move || Ok(files.clone()));
        storage
            .expect_delete()
            .with(eq("b.png".to_string()))
            .returning(|_| Err(StorageError::Io("permission denied".into())));
        storage
            .expect_delete()
            .with(eq("c.png".to_string()))
            .returning(|_| Ok(()));

        let mut metadata = MockCacheMetadataStore::new();
        metadata.expect_list_all().returning(move || Ok(entries.clone()));
        metadata
            .expect_remove_artifact()
            .withf(|key: &CacheKey, artifact: &str| key.as_str() == "c" && artifact == "c.png")
            .times(1)
            .returning(|_, _| Ok(true));

        let report = cache(storage, metadata, 1).evict_excess().await;
        assert_eq!(report.evicted, vec!["c.png".to_string()]);
        assert_eq!(report.failures, 1);
        assert_eq!(report.retained, 2);
        assert!(!report.is_clean());
    }

    #[tokio::test]
    async fn test_eviction_aborts_when_listing_fails() {
        let mut storage = MockArtifactStorage::new();
        storage
            .expect_list()
            .returning(|| Err(StorageError::Unavailable("gone".into())));
        storage.expect_delete().times(0);

        let report = cache(storage, MockCacheMetadataStore::new(), 1).evict_excess().await;
        assert_eq!(report.failures, 1);
        assert!(report.evicted.is_empty());
    }
}

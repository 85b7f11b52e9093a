//! Generated image cache for Sentient
//!
//! Images are stored as files keyed by (city, weather description), with one
//! SQLite record per key. Entries expire after a TTL and the number of files
//! kept on disk is bounded; the oldest are evicted after every insertion.

pub mod cache;
pub mod clock;
pub mod error;
pub mod key;
pub mod metadata;
pub mod storage;

pub use cache::{ArtifactCache, ArtifactRef, CachePolicy, EvictionReport, ARTIFACT_EXTENSION};
pub use clock::{Clock, SystemClock};
pub use error::CacheError;
pub use key::CacheKey;
pub use metadata::{CacheEntry, CacheMetadataStore, SqliteMetadataStore};
pub use storage::{ArtifactStorage, FsArtifactStorage, StoredArtifact};

#[cfg(any(test, feature = "mocks"))]
pub use clock::ManualClock;
#[cfg(any(test, feature = "mocks"))]
pub use metadata::MockCacheMetadataStore;
#[cfg(any(test, feature = "mocks"))]
pub use storage::MockArtifactStorage;

use sentient_core::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache storage error: {0}")]
    Storage(#[from] StorageError),
}

impl CacheError {
    /// User-friendly error message for UI display.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Storage(e) => e.user_message(),
        }
    }
}

//! Storage abstraction trait
//!
//! This module defines the Storage trait that all storage backends must implement.

use crate::StorageBackend;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;

/// Storage operation errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("Delete failed: {0}")]
    DeleteFailed(String),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("Storage backend error: {0}")]
    BackendError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl StorageError {
    /// The object does not exist (yet). Direct uploads may still be in flight.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// A time-limited URL that permits one direct HTTP PUT of a single object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresignedUpload {
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

/// Storage abstraction trait
///
/// Clients upload originals straight to storage through a presigned PUT; the
/// worker then reads them back and writes variants under derived keys. A
/// presigned PUT has no completion callback, so readers must treat
/// [`StorageError::NotFound`] as possibly transient.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Generate a presigned PUT URL for a direct upload to `storage_key`.
    ///
    /// `content_type` and `content_length` describe the expected upload. No
    /// backend binds them into the URL: the signature covers method, key and
    /// expiry only, so a client may PUT any type or size. Consumers must not
    /// trust the declared values over the stored object.
    async fn presigned_put(
        &self,
        storage_key: &str,
        expires_in: Duration,
        content_type: Option<&str>,
        content_length: Option<u64>,
    ) -> StorageResult<PresignedUpload>;

    /// Download a file by its storage key
    async fn download(&self, storage_key: &str) -> StorageResult<Vec<u8>>;

    /// Upload data to a specific storage key, overwriting any existing object.
    /// Returns the URL of the stored object.
    async fn upload_with_key(
        &self,
        storage_key: &str,
        data: Vec<u8>,
        content_type: &str,
    ) -> StorageResult<String>;

    /// Check if a file exists
    async fn exists(&self, storage_key: &str) -> StorageResult<bool>;

    /// Delete a file by its storage key. Deleting a missing key succeeds.
    async fn delete(&self, storage_key: &str) -> StorageResult<()>;

    /// Get the storage backend type
    fn backend_type(&self) -> StorageBackend;
}

/// Expiry instant for a URL issued now and valid for `expires_in`.
pub(crate) fn expiry_from_now(expires_in: Duration) -> StorageResult<DateTime<Utc>> {
    let ttl = chrono::Duration::from_std(expires_in)
        .map_err(|e| StorageError::ConfigError(format!("Invalid URL lifetime: {}", e)))?;
    Ok(Utc::now() + ttl)
}

//! In-process storage for tests and single-process demos.

use crate::keys::validate_key;
use crate::traits::{expiry_from_now, PresignedUpload, Storage, StorageError, StorageResult};
use crate::StorageBackend;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// HashMap-backed storage. Clones share the same objects.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    objects: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place an object directly, as a client's presigned upload would.
    pub fn insert(&self, storage_key: impl Into<String>, data: impl Into<Vec<u8>>) {
        self.lock().insert(storage_key.into(), data.into());
    }

    pub fn get(&self, storage_key: &str) -> Option<Vec<u8>> {
        self.lock().get(storage_key).cloned()
    }

    /// Stored keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<u8>>> {
        self.objects.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn url(storage_key: &str) -> String {
        format!("memory://{}", storage_key)
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn presigned_put(
        &self,
        storage_key: &str,
        expires_in: Duration,
        _content_type: Option<&str>,
        _content_length: Option<u64>,
    ) -> StorageResult<PresignedUpload> {
        validate_key(storage_key)?;
        let expires_at = expiry_from_now(expires_in)?;
        Ok(PresignedUpload {
            url: format!("{}?expires={}", Self::url(storage_key), expires_at.timestamp()),
            expires_at,
        })
    }

    async fn download(&self, storage_key: &str) -> StorageResult<Vec<u8>> {
        self.get(storage_key)
            .ok_or_else(|| StorageError::NotFound(storage_key.to_string()))
    }

    async fn upload_with_key(
        &self,
        storage_key: &str,
        data: Vec<u8>,
        _content_type: &str,
    ) -> StorageResult<String> {
        validate_key(storage_key)?;
        self.lock().insert(storage_key.to_string(), data);
        Ok(Self::url(storage_key))
    }

    async fn exists(&self, storage_key: &str) -> StorageResult<bool> {
        Ok(self.lock().contains_key(storage_key))
    }

    async fn delete(&self, storage_key: &str) -> StorageResult<()> {
        self.lock().remove(storage_key);
        Ok(())
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::Memory
    }
}

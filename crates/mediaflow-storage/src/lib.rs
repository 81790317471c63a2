//! Mediaflow Storage Library
//!
//! This crate provides the object storage abstraction used by the upload
//! issuer and the transcoding worker, with S3, local filesystem and in-memory
//! implementations.
//!
//! # Storage key format
//!
//! - **Uploads**: `uploads/{owner_id}/{processing_id}/{file_name}`
//! - **Variants**: `processed/{owner_id}/{processing_id}/{stem}_{tier}.{ext}`
//!
//! Keys must not contain `..` or a leading `/`. Key generation is centralized in the
//! `keys` module so all backends and components stay consistent.

pub mod factory;
pub mod keys;
#[cfg(feature = "storage-local")]
pub mod local;
pub mod memory;
#[cfg(feature = "storage-s3")]
pub mod s3;
pub mod traits;

// Re-export commonly used types
pub use factory::create_storage;
#[cfg(feature = "storage-local")]
pub use local::LocalStorage;
pub use mediaflow_core::StorageBackend;
pub use memory::MemoryStorage;
#[cfg(feature = "storage-s3")]
pub use s3::S3Storage;
pub use traits::{PresignedUpload, Storage, StorageError, StorageResult};

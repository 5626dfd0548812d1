//! Object storage used for raw and staged payloads
//!
//! [`ObjectStore`] is the seam the handlers depend on. [`S3Storage`] talks to
//! S3 (or MinIO), [`MemoryStorage`] keeps objects in process.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use thiserror::Error;

pub mod config;
pub mod memory;
mod s3;

pub use memory::MemoryStorage;
pub use s3::S3Storage;

/// User metadata key on a staged object that holds the raw path it came from.
pub const RAW_OBJECT_METADATA_KEY: &str = "raw-object";

pub type StorageResult<T> = std::result::Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Object not found: {container}/{key}")]
    NotFound { container: String, key: String },

    #[error("Storage {operation} failed for {container}/{key}: {message}")]
    Request {
        operation: &'static str,
        container: String,
        key: String,
        message: String,
    },

    #[error("Storage configuration error: {0}")]
    Config(String),
}

impl StorageError {
    pub(crate) fn request(
        operation: &'static str,
        container: &str,
        key: &str,
        message: impl ToString,
    ) -> Self {
        StorageError::Request {
            operation,
            container: container.to_string(),
            key: key.to_string(),
            message: message.to_string(),
        }
    }

    pub(crate) fn not_found(container: &str, key: &str) -> Self {
        StorageError::NotFound {
            container: container.to_string(),
            key: key.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectMetadata {
    pub key: String,
    pub size: i64,
    pub content_type: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
    pub metadata: HashMap<String, String>,
}

/// Body and attributes of an object to write.
#[derive(Debug, Clone, Default)]
pub struct PutObject {
    pub data: Vec<u8>,
    pub content_type: Option<String>,
    pub metadata: HashMap<String, String>,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Size, type, modification time and user metadata of an object.
    async fn head(&self, container: &str, key: &str) -> StorageResult<ObjectMetadata>;

    async fn get(&self, container: &str, key: &str) -> StorageResult<Vec<u8>>;

    async fn put(&self, container: &str, key: &str, object: PutObject) -> StorageResult<()>;

    /// Server-side copy that replaces the user metadata on the destination.
    async fn copy(
        &self,
        source_container: &str,
        source_key: &str,
        dest_container: &str,
        dest_key: &str,
        metadata: HashMap<String, String>,
    ) -> StorageResult<()>;

    /// Deleting a missing object is not an error.
    async fn delete(&self, container: &str, key: &str) -> StorageResult<()>;
}

//! In-process object storage

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

use super::{ObjectMetadata, ObjectStore, PutObject, StorageError, StorageResult};

#[derive(Debug, Clone)]
struct StoredObject {
    data: Vec<u8>,
    content_type: Option<String>,
    last_modified: DateTime<Utc>,
    metadata: HashMap<String, String>,
}

/// Objects keyed by `(container, key)`.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    objects: RwLock<BTreeMap<(String, String), StoredObject>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn contains(&self, container: &str, key: &str) -> bool {
        self.objects
            .read()
            .await
            .contains_key(&(container.to_string(), key.to_string()))
    }

    /// Keys currently held in `container`, sorted.
    pub async fn keys(&self, container: &str) -> Vec<String> {
        self.objects
            .read()
            .await
            .keys()
            .filter(|(c, _)| c == container)
            .map(|(_, k)| k.clone())
            .collect()
    }
}

#[async_trait]
impl ObjectStore for MemoryStorage {
    async fn head(&self, container: &str, key: &str) -> StorageResult<ObjectMetadata> {
        let objects = self.objects.read().await;
        let object = objects
            .get(&(container.to_string(), key.to_string()))
            .ok_or_else(|| StorageError::not_found(container, key))?;

        Ok(ObjectMetadata {
            key: key.to_string(),
            size: i64::try_from(object.data.len()).unwrap_or(i64::MAX),
            content_type: object.content_type.clone(),
            last_modified: Some(object.last_modified),
            metadata: object.metadata.clone(),
        })
    }

    async fn get(&self, container: &str, key: &str) -> StorageResult<Vec<u8>> {
        self.objects
            .read()
            .await
            .get(&(container.to_string(), key.to_string()))
            .map(|o| o.data.clone())
            .ok_or_else(|| StorageError::not_found(container, key))
    }

    async fn put(&self, container: &str, key: &str, object: PutObject) -> StorageResult<()> {
        self.objects.write().await.insert(
            (container.to_string(), key.to_string()),
            StoredObject {
                data: object.data,
                content_type: object.content_type,
                last_modified: Utc::now(),
                metadata: object.metadata,
            },
        );
        Ok(())
    }

    async fn copy(
        &self,
        source_container: &str,
        source_key: &str,
        dest_container: &str,
        dest_key: &str,
        metadata: HashMap<String, String>,
    ) -> StorageResult<()> {
        let mut objects = self.objects.write().await;
        let source = objects
            .get(&(source_container.to_string(), source_key.to_string()))
            .cloned()
            .ok_or_else(|| StorageError::not_found(source_container, source_key))?;

        objects.insert(
            (dest_container.to_string(), dest_key.to_string()),
            StoredObject {
                last_modified: Utc::now(),
                metadata,
                ..source
            },
        );
        Ok(())
    }

    async fn delete(&self, container: &str, key: &str) -> StorageResult<()> {
        self.objects
            .write()
            .await
            .remove(&(container.to_string(), key.to_string()));
        Ok(())
    }
}

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::{
    config::{Credentials, Region},
    error::DisplayErrorContext,
    primitives::ByteStream,
    types::MetadataDirective,
    Client,
};
use std::collections::HashMap;
use tracing::{debug, info, instrument};

use super::{
    config::StorageConfig, ObjectMetadata, ObjectStore, PutObject, StorageError, StorageResult,
};

#[derive(Clone)]
pub struct S3Storage {
    client: Client,
}

impl S3Storage {
    pub async fn new(config: StorageConfig) -> StorageResult<Self> {
        debug!(endpoint = ?config.endpoint, region = %config.region, "Initializing S3 storage");

        let mut builder = match config.static_keys() {
            Some((access, secret)) => aws_sdk_s3::Config::builder()
                .behavior_version(BehaviorVersion::latest())
                .credentials_provider(Credentials::new(
                    access,
                    secret,
                    None,
                    None,
                    "dlctl-storage",
                )),
            None => {
                let shared = aws_config::defaults(BehaviorVersion::latest())
                    .region(Region::new(config.region.clone()))
                    .load()
                    .await;
                aws_sdk_s3::config::Builder::from(&shared)
            }
        };

        builder = builder
            .region(Region::new(config.region.clone()))
            .force_path_style(config.path_style);

        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        info!(region = %config.region, "S3 storage client initialized");

        Ok(Self {
            client: Client::from_conf(builder.build()),
        })
    }
}

/// `container/key` with each key segment percent-encoded, as copy requests expect.
fn copy_source(container: &str, key: &str) -> String {
    let encoded: Vec<_> = key.split('/').map(urlencoding::encode).collect();
    format!("{}/{}", container, encoded.join("/"))
}

fn to_chrono(dt: &aws_sdk_s3::primitives::DateTime) -> Option<chrono::DateTime<chrono::Utc>> {
    chrono::DateTime::from_timestamp(dt.secs(), dt.subsec_nanos())
}

#[async_trait]
impl ObjectStore for S3Storage {
    #[instrument(skip(self))]
    async fn head(&self, container: &str, key: &str) -> StorageResult<ObjectMetadata> {
        let response = self
            .client
            .head_object()
            .bucket(container)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().is_some_and(|se| se.is_not_found()) {
                    StorageError::not_found(container, key)
                } else {
                    StorageError::request("head", container, key, DisplayErrorContext(&e))
                }
            })?;

        Ok(ObjectMetadata {
            key: key.to_string(),
            size: response.content_length().unwrap_or(0),
            content_type: response.content_type().map(str::to_string),
            last_modified: response.last_modified().and_then(to_chrono),
            metadata: response.metadata().cloned().unwrap_or_default(),
        })
    }

    #[instrument(skip(self))]
    async fn get(&self, container: &str, key: &str) -> StorageResult<Vec<u8>> {
        let response = self
            .client
            .get_object()
            .bucket(container)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().is_some_and(|se| se.is_no_such_key()) {
                    StorageError::not_found(container, key)
                } else {
                    StorageError::request("get", container, key, DisplayErrorContext(&e))
                }
            })?;

        let data = response
            .body
            .collect()
            .await
            .map_err(|e| StorageError::request("get", container, key, e))?
            .into_bytes()
            .to_vec();

        debug!(bytes = data.len(), "Downloaded s3://{}/{}", container, key);

        Ok(data)
    }

    #[instrument(skip(self, object), fields(bytes = object.data.len()))]
    async fn put(&self, container: &str, key: &str, object: PutObject) -> StorageResult<()> {
        self.client
            .put_object()
            .bucket(container)
            .key(key)
            .body(ByteStream::from(object.data))
            .set_content_type(object.content_type)
            .set_metadata(Some(object.metadata))
            .send()
            .await
            .map_err(|e| StorageError::request("put", container, key, DisplayErrorContext(&e)))?;

        info!("Uploaded s3://{}/{}", container, key);

        Ok(())
    }

    #[instrument(skip(self, metadata))]
    async fn copy(
        &self,
        source_container: &str,
        source_key: &str,
        dest_container: &str,
        dest_key: &str,
        metadata: HashMap<String, String>,
    ) -> StorageResult<()> {
        // Replacing metadata also replaces the content type.
        let source = self.head(source_container, source_key).await?;

        self.client
            .copy_object()
            .copy_source(copy_source(source_container, source_key))
            .bucket(dest_container)
            .key(dest_key)
            .metadata_directive(MetadataDirective::Replace)
            .set_metadata(Some(metadata))
            .set_content_type(source.content_type)
            .send()
            .await
            .map_err(|e| {
                StorageError::request("copy", source_container, source_key, DisplayErrorContext(&e))
            })?;

        info!(
            "Copied s3://{}/{} to s3://{}/{}",
            source_container, source_key, dest_container, dest_key
        );

        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete(&self, container: &str, key: &str) -> StorageResult<()> {
        self.client
            .delete_object()
            .bucket(container)
            .key(key)
            .send()
            .await
            .map_err(|e| StorageError::request("delete", container, key, DisplayErrorContext(&e)))?;

        info!("Deleted s3://{}/{}", container, key);

        Ok(())
    }
}

//! Ingestion router
//!
//! Takes raw arrivals, picks a matcher, copies the payload into staging and
//! writes the `INITIAL_LOAD` control record.

use chrono::Utc;
use dlctl_common::types::{ControlRecord, FileStatus, ObjectUri};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

pub mod matchers;

pub use matchers::{MatcherKind, MatcherRegistry, Route, StagingPlan, Transform};

use crate::notify::{Alert, Notifier};
use crate::outcome::Outcome;
use crate::storage::{
    ObjectMetadata, ObjectStore, PutObject, StorageError, RAW_OBJECT_METADATA_KEY,
};
use crate::store::{ControlStore, StoreError};

const COMPONENT: &str = "ingestion-router";

/// Content type recorded when neither the source nor the matcher gives one.
const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Object is {size} bytes, above the {limit} byte limit")]
    TooLarge { size: i64, limit: i64 },

    #[error("{raw_path} is already past INITIAL_LOAD")]
    AlreadyTracked { raw_path: String },
}

/// One object in a storage arrival event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectRef {
    pub container: String,
    pub key: String,
    #[serde(default)]
    pub size: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageEvent {
    pub records: Vec<ObjectRef>,
}

/// Decode a key as delivered by storage notifications (`+` for spaces,
/// percent-encoding). Keys that fail to decode are used as given.
pub fn decode_key(key: &str) -> String {
    let spaced = key.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|k| k.into_owned())
        .unwrap_or(spaced)
}

/// Drop the first `lines` lines of `data`.
pub fn drop_header_lines(data: &[u8], lines: usize) -> Vec<u8> {
    let mut rest = data;
    for _ in 0..lines {
        match rest.iter().position(|b| *b == b'\n') {
            Some(idx) => rest = &rest[idx + 1..],
            None => return Vec::new(),
        }
    }
    rest.to_vec()
}

pub struct IngestionRouter {
    registry: MatcherRegistry,
    storage: Arc<dyn ObjectStore>,
    store: Arc<dyn ControlStore>,
    notifier: Arc<dyn Notifier>,
    staging_container: String,
    concurrency: usize,
}

impl IngestionRouter {
    pub fn new(
        registry: MatcherRegistry,
        storage: Arc<dyn ObjectStore>,
        store: Arc<dyn ControlStore>,
        notifier: Arc<dyn Notifier>,
        staging_container: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            storage,
            store,
            notifier,
            staging_container: staging_container.into(),
            concurrency: 1,
        }
    }

    /// Maximum arrivals of one batch handled at the same time.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Route every object of a batch; outcomes are returned in input order.
    pub async fn route_batch(&self, records: Vec<ObjectRef>) -> Vec<Outcome> {
        let routes = records
            .into_iter()
            .map(move |object| async move { self.route(&object).await });
        stream::iter(routes).buffered(self.concurrency).collect().await
    }

    #[instrument(skip(self, object), fields(container = %object.container, key = %object.key))]
    pub async fn route(&self, object: &ObjectRef) -> Outcome {
        let key = decode_key(&object.key);
        let raw_path = ObjectUri::new(&object.container, &key).to_string();

        let Some((kind, route)) = self.registry.resolve(&key) else {
            warn!("No matcher for arriving object");
            self.notifier
                .notify(&Alert::failure(
                    COMPONENT,
                    &raw_path,
                    &format!(
                        "Error processing object {} from container {}. The file path/format is unknown.",
                        key, object.container
                    ),
                    "no matcher accepts this key",
                ))
                .await;
            return Outcome::skipped(format!("Unknown path format: {raw_path}"));
        };

        debug!(matcher = kind.name(), "Matched arriving object");

        let plan = match route {
            Route::Ignore(reason) => {
                info!(matcher = kind.name(), %reason, "Arrival ignored");
                return Outcome::skipped(reason);
            }
            Route::Stage(plan) => plan,
        };

        match self.stage(&object.container, &key, &plan).await {
            Ok(record) => {
                info!(
                    raw_path = %record.raw_path,
                    staged_path = %record.staged_path,
                    matcher = kind.name(),
                    "Control record written"
                );
                Outcome::done(format!("Staged {} as {}", record.raw_path, record.staged_path))
            }
            Err(IngestError::AlreadyTracked { raw_path }) => {
                info!(%raw_path, "Arrival for a file already in the lifecycle");
                Outcome::skipped(format!("{raw_path} is already being processed"))
            }
            Err(e) => {
                Outcome::failed(
                    self.notifier.as_ref(),
                    Alert::failure(
                        COMPONENT,
                        &raw_path,
                        &format!(
                            "Error processing object {} from container {}.",
                            key, object.container
                        ),
                        &e,
                    ),
                    format!("Unable to stage {raw_path}: {e}"),
                )
                .await
            }
        }
    }

    async fn stage(
        &self,
        container: &str,
        key: &str,
        plan: &StagingPlan,
    ) -> Result<ControlRecord, IngestError> {
        let raw_path = ObjectUri::new(container, key).to_string();

        if let Some(existing) = self.store.get_control(&raw_path).await? {
            if existing.status != FileStatus::InitialLoad {
                return Err(IngestError::AlreadyTracked { raw_path });
            }
        }

        let meta = if plan.probe {
            self.storage.head(container, key).await?
        } else {
            ObjectMetadata {
                key: key.to_string(),
                size: 0,
                content_type: Some("text/plain".to_string()),
                ..Default::default()
            }
        };

        if let Some(limit) = plan.max_size {
            if meta.size > limit {
                return Err(IngestError::TooLarge {
                    size: meta.size,
                    limit,
                });
            }
        }

        let metadata = HashMap::from([(RAW_OBJECT_METADATA_KEY.to_string(), raw_path.clone())]);

        match plan.transform {
            Transform::Copy => {
                self.storage
                    .copy(container, key, &self.staging_container, &plan.staged_key, metadata)
                    .await?;
            }
            Transform::DropHeaderLines(lines) => {
                let data = self.storage.get(container, key).await?;
                self.storage
                    .put(
                        &self.staging_container,
                        &plan.staged_key,
                        PutObject {
                            data: drop_header_lines(&data, lines),
                            content_type: meta.content_type.clone(),
                            metadata,
                        },
                    )
                    .await?;
            }
        }

        let record = ControlRecord {
            raw_path: raw_path.clone(),
            status: FileStatus::InitialLoad,
            staged_path: ObjectUri::new(&self.staging_container, &plan.staged_key).to_string(),
            staging_dir: ObjectUri::new(&self.staging_container, &plan.staging_dir).to_string(),
            data_source: plan.data_source.clone(),
            container: container.to_string(),
            object_name: plan.object_name.clone(),
            size: meta.size,
            content_type: meta
                .content_type
                .unwrap_or_else(|| FALLBACK_CONTENT_TYPE.to_string()),
            arrived_at: Utc::now(),
            file_modified_at: meta.last_modified,
            staged_at: None,
            job_finished_at: None,
            partition: plan.partition.clone(),
            target: None,
        };

        if !self.store.insert_control(&record).await? {
            return Err(IngestError::AlreadyTracked { raw_path });
        }

        Ok(record)
    }
}

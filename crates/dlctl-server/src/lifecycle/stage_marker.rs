//! Stage marker
//!
//! Reacts to objects landing in the staging container. The raw path travels
//! on the staged object's metadata; the matching control record is moved from
//! `INITIAL_LOAD` to `STAGE` and the change is published to the promoter.

use chrono::Utc;
use dlctl_common::types::{ControlPatch, FileStatus, ObjectUri};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

use super::events::ControlChangeEvent;
use super::feed::ChangeFeed;
use crate::ingest::{decode_key, ObjectRef};
use crate::notify::{Alert, Notifier};
use crate::outcome::Outcome;
use crate::storage::{ObjectStore, RAW_OBJECT_METADATA_KEY};
use crate::store::{CasResult, ControlStore};

const COMPONENT: &str = "stage-marker";

pub struct StageMarker {
    storage: Arc<dyn ObjectStore>,
    store: Arc<dyn ControlStore>,
    notifier: Arc<dyn Notifier>,
    feed: ChangeFeed,
    lookup_retries: u32,
    lookup_delay: Duration,
    concurrency: usize,
}

impl StageMarker {
    pub fn new(
        storage: Arc<dyn ObjectStore>,
        store: Arc<dyn ControlStore>,
        notifier: Arc<dyn Notifier>,
        feed: ChangeFeed,
    ) -> Self {
        Self {
            storage,
            store,
            notifier,
            feed,
            lookup_retries: 0,
            lookup_delay: Duration::ZERO,
            concurrency: 1,
        }
    }

    /// The staged copy can land before the router has written the control
    /// record; retry a missing record this many times.
    pub fn with_lookup_retry(mut self, retries: u32, delay: Duration) -> Self {
        self.lookup_retries = retries;
        self.lookup_delay = delay;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub async fn handle_batch(&self, records: Vec<ObjectRef>) -> Vec<Outcome> {
        let marks = records
            .into_iter()
            .map(move |object| async move { self.handle(&object).await });
        stream::iter(marks).buffered(self.concurrency).collect().await
    }

    #[instrument(skip(self, object), fields(container = %object.container, key = %object.key))]
    pub async fn handle(&self, object: &ObjectRef) -> Outcome {
        let key = decode_key(&object.key);
        let staged_path = ObjectUri::new(&object.container, &key).to_string();

        let meta = match self.storage.head(&object.container, &key).await {
            Ok(meta) => meta,
            Err(e) => {
                return Outcome::failed(
                    self.notifier.as_ref(),
                    Alert::failure(COMPONENT, &staged_path, "Unable to read staged object", &e),
                    format!("Unable to read {staged_path}"),
                )
                .await;
            }
        };

        let Some(raw_path) = meta.metadata.get(RAW_OBJECT_METADATA_KEY) else {
            self.notifier
                .notify(&Alert::failure(
                    COMPONENT,
                    &staged_path,
                    "Staged object has no raw path metadata",
                    format!("missing '{RAW_OBJECT_METADATA_KEY}'"),
                ))
                .await;
            return Outcome::skipped(format!("{staged_path} has no raw path"));
        };

        let patch = ControlPatch::status(FileStatus::Stage).staged_at(Utc::now());
        let mut attempt = 0;

        let record = loop {
            let result = self
                .store
                .update_control_if(raw_path, &[FileStatus::InitialLoad], &patch)
                .await;

            match result {
                Ok(CasResult::Applied(record)) => break record,
                Ok(CasResult::NotFound) if attempt < self.lookup_retries => {
                    attempt += 1;
                    tokio::time::sleep(self.lookup_delay).await;
                }
                Ok(CasResult::NotFound) => {
                    warn!(%raw_path, "No control record for staged object");
                    return Outcome::skipped(format!("No control record for {raw_path}"));
                }
                Ok(CasResult::StatusMismatch { actual }) => {
                    info!(%raw_path, %actual, "Control record already past INITIAL_LOAD");
                    return Outcome::skipped(format!("{raw_path} is already {actual}"));
                }
                Err(e) => {
                    return Outcome::failed(
                        self.notifier.as_ref(),
                        Alert::failure(
                            COMPONENT,
                            raw_path,
                            "Unable to mark control record STAGE",
                            &e,
                        ),
                        format!("Unable to mark {raw_path} STAGE"),
                    )
                    .await;
                }
            }
        };

        info!(%raw_path, %staged_path, "Control record moved to STAGE");

        if let Err(e) = self.feed.publish(ControlChangeEvent::modified(&record)).await {
            return Outcome::failed(
                self.notifier.as_ref(),
                Alert::failure(COMPONENT, raw_path, "Unable to publish control change", &e),
                format!("{raw_path} is STAGE but was not handed to the promoter"),
            )
            .await;
        }

        Outcome::done(format!("{raw_path} staged"))
    }
}

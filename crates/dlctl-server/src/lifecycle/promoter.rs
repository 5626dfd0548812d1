//! Stage promoter: turns a control record that reached `STAGE` into a unit of
//! work for the submitter.

use chrono::Utc;
use futures::stream::{self, StreamExt};
use dlctl_common::types::{FileStatus, StageRecord};
use std::sync::Arc;
use tracing::{debug, info, instrument};

use super::events::{ChangeType, ControlChangeEvent};
use crate::notify::{Alert, Notifier};
use crate::outcome::Outcome;
use crate::store::ControlStore;

const COMPONENT: &str = "stage-promoter";

pub struct StagePromoter {
    store: Arc<dyn ControlStore>,
    notifier: Arc<dyn Notifier>,
    stage_table: String,
}

impl StagePromoter {
    pub fn new(
        store: Arc<dyn ControlStore>,
        notifier: Arc<dyn Notifier>,
        stage_table: impl Into<String>,
    ) -> Self {
        Self {
            store,
            notifier,
            stage_table: stage_table.into(),
        }
    }

    /// Handle a batch of change records, `concurrency` at a time, keeping
    /// input order.
    pub async fn handle_batch(
        &self,
        events: Vec<ControlChangeEvent>,
        concurrency: usize,
    ) -> Vec<Outcome> {
        let promotions = events
            .into_iter()
            .map(move |event| async move { self.handle(&event).await });
        stream::iter(promotions)
            .buffered(concurrency.max(1))
            .collect()
            .await
    }

    #[instrument(skip(self, event), fields(raw_path = %event.keys.raw_path))]
    pub async fn handle(&self, event: &ControlChangeEvent) -> Outcome {
        if event.event_type != ChangeType::Modify {
            return Outcome::skipped(format!("Ignoring {:?} event", event.event_type));
        }
        let Some(image) = event
            .new_image
            .as_ref()
            .filter(|image| image.status == FileStatus::Stage)
        else {
            debug!("Change is not a move to STAGE");
            return Outcome::skipped("Status is not STAGE");
        };

        let record = StageRecord::new(
            &image.staged_path,
            &image.raw_path,
            &image.staging_dir,
            image.partition.clone(),
            Utc::now(),
        );

        match self.store.insert_stage(&record).await {
            Ok(true) => {
                info!(staged_path = %record.staged_path, "Stage record written");
                Outcome::done(format!("Staged {}", record.staged_path))
            }
            Ok(false) => Outcome::skipped(format!("{} is already staged", record.staged_path)),
            Err(e) => {
                let summary = format!("Unable to write stage record to table {}", self.stage_table);
                Outcome::failed(
                    self.notifier.as_ref(),
                    Alert::failure(COMPONENT, &record.staged_path, &summary, &e),
                    summary,
                )
                .await
            }
        }
    }
}

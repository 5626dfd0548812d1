//! Job validator: finalizes files when their cluster step ends.

use chrono::Utc;
use dlctl_common::types::{ControlPatch, FileStatus, ObjectUri, StagePatch, StageRecord};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use super::events::StepEvent;
use crate::cluster::{ClusterClient, StepState};
use crate::notify::{Alert, Notifier};
use crate::outcome::Outcome;
use crate::storage::ObjectStore;
use crate::store::{CasResult, ControlStore};

const COMPONENT: &str = "job-validator";

pub const NO_ITEMS: &str = "No items to process";

pub struct JobValidator {
    store: Arc<dyn ControlStore>,
    storage: Arc<dyn ObjectStore>,
    cluster: Arc<dyn ClusterClient>,
    notifier: Arc<dyn Notifier>,
}

impl JobValidator {
    pub fn new(
        store: Arc<dyn ControlStore>,
        storage: Arc<dyn ObjectStore>,
        cluster: Arc<dyn ClusterClient>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            storage,
            cluster,
            notifier,
        }
    }

    #[instrument(
        skip(self, event),
        fields(step_id = %event.step_id, step_name = %event.step_name, state = %event.state)
    )]
    pub async fn handle(&self, event: &StepEvent) -> Outcome {
        let Some(staged) = ObjectUri::parse(&event.step_name) else {
            debug!("Step is not a staged file");
            return Outcome::skipped(format!("Step {} is not a staged file", event.step_name));
        };

        match &event.state {
            StepState::Completed => self.completed(event, &staged).await,
            StepState::Failed => self.finish(event, FileStatus::Failed).await,
            StepState::Cancelled => self.finish(event, FileStatus::Canceled).await,
            other => Outcome::skipped(format!("Nothing to do for state {other}")),
        }
    }

    async fn completed(&self, event: &StepEvent, staged: &ObjectUri) -> Outcome {
        let staged_path = event.step_name.as_str();

        let record = match self.store.get_stage(staged_path).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                info!("{NO_ITEMS}");
                return Outcome::skipped(NO_ITEMS);
            }
            Err(e) => {
                return self
                    .fail(staged_path, "Unable to read stage record", e)
                    .await;
            }
        };

        if let Err(outcome) = self.mark_loaded(&record).await {
            return outcome;
        }

        let mut problems = 0;

        if let Err(e) = self.store.delete_stage(staged_path).await {
            self.alert(staged_path, "Unable to delete stage record", e).await;
            problems += 1;
        }

        if let Err(e) = self.storage.delete(&staged.container, &staged.key).await {
            self.alert(staged_path, "Unable to delete staged payload", e).await;
            problems += 1;
        }

        if let Err(message) = self.idle_check(&event.cluster_id).await {
            self.alert(&event.cluster_id, "Idle check failed", message).await;
            problems += 1;
        }

        if problems > 0 {
            Outcome::Failed(format!(
                "{} loaded with {problems} cleanup error(s)",
                record.raw_path
            ))
        } else {
            Outcome::done(format!("{} loaded", record.raw_path))
        }
    }

    /// Move the control record to `LOADED`. A record that is already
    /// `LOADED` counts as success; anything else is fatal for this event and
    /// the stage record is kept.
    async fn mark_loaded(&self, record: &StageRecord) -> Result<(), Outcome> {
        let patch = ControlPatch::status(FileStatus::Loaded)
            .job_finished_at(Utc::now())
            .target(record.target.clone());

        let result = self
            .store
            .update_control_if(
                &record.raw_path,
                &FileStatus::predecessors(FileStatus::Loaded),
                &patch,
            )
            .await;

        match result {
            Ok(CasResult::Applied(_)) => {
                info!(raw_path = %record.raw_path, "Control record loaded");
                Ok(())
            }
            Ok(CasResult::StatusMismatch {
                actual: FileStatus::Loaded,
            }) => {
                warn!(raw_path = %record.raw_path, "Control record was already loaded");
                Ok(())
            }
            Ok(CasResult::StatusMismatch { actual }) => Err(self
                .fail(
                    &record.raw_path,
                    "Unable to update control record to LOADED",
                    format!("record is {actual}"),
                )
                .await),
            Ok(CasResult::NotFound) => Err(self
                .fail(
                    &record.raw_path,
                    "Unable to update control record to LOADED",
                    "control record not found",
                )
                .await),
            Err(e) => Err(self
                .fail(
                    &record.raw_path,
                    "Unable to update control record to LOADED",
                    e,
                )
                .await),
        }
    }

    /// Terminate the cluster when no stage record is left waiting or running.
    async fn idle_check(&self, cluster_id: &str) -> Result<(), String> {
        let remaining = self
            .store
            .scan_stage(&FileStatus::TERMINAL)
            .await
            .map_err(|e| e.to_string())?;

        if !remaining.is_empty() {
            debug!(remaining = remaining.len(), "Cluster still has work");
            return Ok(());
        }

        info!(cluster_id, "No pending work, terminating cluster");
        self.cluster
            .terminate(cluster_id)
            .await
            .map_err(|e| e.to_string())
    }

    async fn finish(&self, event: &StepEvent, status: FileStatus) -> Outcome {
        let staged_path = event.step_name.as_str();
        let patch = StagePatch::finished(status, Utc::now());

        match self.store.update_stage(staged_path, &patch).await {
            Ok(Some(_)) => {
                warn!(%status, message = ?event.message, "Step ended without loading");
                Outcome::done(format!("{staged_path} marked {status}"))
            }
            Ok(None) => Outcome::skipped(NO_ITEMS),
            Err(e) => {
                self.fail(
                    staged_path,
                    &format!("Unable to mark stage record {status}"),
                    e,
                )
                .await
            }
        }
    }

    async fn alert(&self, item: &str, summary: &str, error: impl std::fmt::Display) {
        self.notifier
            .notify(&Alert::failure(COMPONENT, item, summary, error))
            .await;
    }

    async fn fail(&self, item: &str, summary: &str, error: impl std::fmt::Display) -> Outcome {
        Outcome::failed(
            self.notifier.as_ref(),
            Alert::failure(COMPONENT, item, summary, error),
            format!("{summary}: {item}"),
        )
        .await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::cluster::MemoryCluster;
    use crate::notify::MemoryNotifier;
    use crate::storage::MemoryStorage;
    use crate::store::MemoryStore;

    struct Harness {
        store: Arc<MemoryStore>,
        cluster: Arc<MemoryCluster>,
        notifier: Arc<MemoryNotifier>,
        validator: JobValidator,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryStore::new());
        let cluster = Arc::new(MemoryCluster::new(10));
        let notifier = Arc::new(MemoryNotifier::new());
        let validator = JobValidator::new(
            store.clone(),
            Arc::new(MemoryStorage::new()),
            cluster.clone(),
            notifier.clone(),
        );
        Harness {
            store,
            cluster,
            notifier,
            validator,
        }
    }

    fn event(name: &str, state: StepState) -> StepEvent {
        StepEvent {
            step_id: "s-1".into(),
            step_name: name.into(),
            cluster_id: "j-1".into(),
            state,
            message: None,
        }
    }

    #[tokio::test]
    async fn test_setup_step_is_ignored() {
        let h = harness();
        let outcome = h
            .validator
            .handle(&event("dlctl-setup", StepState::Completed))
            .await;
        assert!(outcome.is_skipped());
    }

    #[tokio::test]
    async fn test_completed_without_stage_record() {
        let h = harness();
        let outcome = h
            .validator
            .handle(&event("s3://staging/dummy/a.txt", StepState::Completed))
            .await;
        assert_eq!(outcome, Outcome::skipped(NO_ITEMS));
        assert!(h.store.control_records().await.is_empty());
        assert!(h.notifier.alerts().is_empty());
    }

    #[tokio::test]
    async fn test_running_is_a_no_op() {
        let h = harness();
        let outcome = h
            .validator
            .handle(&event("s3://staging/dummy/a.txt", StepState::Running))
            .await;
        assert!(outcome.is_skipped());
    }

    #[tokio::test]
    async fn test_completed_with_missing_control_record_keeps_stage() {
        let h = harness();
        let cluster_id = h.cluster.launch("dlctl-cluster").await;
        let stage = StageRecord::new(
            "s3://staging/dummy/a.txt",
            "s3://raw/dummy/a.txt",
            "s3://staging/dummy",
            None,
            Utc::now(),
        );
        h.store.insert_stage(&stage).await.unwrap();

        let mut completed = event("s3://staging/dummy/a.txt", StepState::Completed);
        completed.cluster_id = cluster_id.clone();
        let outcome = h.validator.handle(&completed).await;

        assert!(outcome.is_failed());
        assert_eq!(h.store.stage_records().await.len(), 1);
        assert_eq!(h.notifier.alerts().len(), 1);
        assert!(!h.cluster.is_terminated(&cluster_id).await);
    }
}

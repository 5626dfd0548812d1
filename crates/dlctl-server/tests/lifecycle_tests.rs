//! End-to-end lifecycle tests on the in-process backend
#![allow(clippy::unwrap_used)]

mod common;

use common::{
    catalog_entry, raw_arrival, FaultyStore, Harness, UnreachableCatalog, CLUSTER_NAME,
    LATEST_KEY, LATEST_STAGING_DIR, REGION,
};
use dlctl_common::types::{ControlPatch, FileStatus};
use dlctl_server::{
    cluster::{ClusterClient, StepState},
    lifecycle::{SubmitRequest, SETUP_STEP_NAME},
    scheduler::RetryScheduler,
    storage::ObjectStore,
    store::{CasResult, ControlStore, MemoryStore},
};
use std::sync::Arc;
use std::time::Duration;

const RAW_PATH: &str = "s3://raw/sales/region/sys/orders/latest/file.csv";
const STAGED_PATH: &str = "s3://staging/sales/region/sys/orders/latest/file.csv";

#[tokio::test]
async fn test_arrival_creates_initial_load_record() {
    let h = Harness::new().await;
    h.upload_raw(LATEST_KEY, &vec![b'x'; 1024]).await;

    let outcome = h.pipeline.router.route(&raw_arrival(LATEST_KEY)).await;
    assert!(outcome.is_done(), "{outcome:?}");

    let record = h.store.get_control(RAW_PATH).await.unwrap().unwrap();
    assert_eq!(record.status, FileStatus::InitialLoad);
    assert_eq!(record.staged_path, STAGED_PATH);
    assert_eq!(record.staging_dir, LATEST_STAGING_DIR);
    assert_eq!(record.size, 1024);
    assert!(h.storage.contains("staging", LATEST_KEY).await);
}

#[tokio::test]
async fn test_stage_event_creates_stage_record() {
    let mut h = Harness::new().await;
    let staged_path = h.ingest(LATEST_KEY).await;

    let control = h.store.get_control(RAW_PATH).await.unwrap().unwrap();
    assert_eq!(control.status, FileStatus::Stage);
    assert!(control.staged_at.is_some());

    let stage = h.store.get_stage(&staged_path).await.unwrap().unwrap();
    assert_eq!(stage.raw_path, RAW_PATH);
    assert_eq!(stage.staging_dir, LATEST_STAGING_DIR);
    assert_eq!(stage.status, FileStatus::Stage);
    assert_eq!(stage.partition, None);
}

#[tokio::test]
async fn test_submit_moves_stage_record_to_processing() {
    let mut h = Harness::new().await;
    h.add_catalog_entry(LATEST_STAGING_DIR, true).await;
    let staged_path = h.ingest(LATEST_KEY).await;

    let outcome = h.pipeline.submitter.run(&SubmitRequest::default()).await;
    assert_eq!(
        outcome.message(),
        "Submission complete: submitted 1, skipped 0, failed 0"
    );

    assert_eq!(h.steps_for(&staged_path).await.len(), 1);
    let stage = h.store.get_stage(&staged_path).await.unwrap().unwrap();
    assert_eq!(stage.status, FileStatus::Processing);
    assert!(stage.submitted_at.is_some());
    assert_eq!(stage.target.unwrap().location, "s3://analytics/orders");
    assert!(!h.trigger.is_enabled());
}

#[tokio::test]
async fn test_capacity_rejection_enables_retry_trigger() {
    // Setup step takes the only slot
    let mut h = Harness::builder().capacity(1).build().await;
    h.add_catalog_entry(LATEST_STAGING_DIR, true).await;
    let staged_path = h.ingest(LATEST_KEY).await;

    assert!(!h.trigger.is_enabled());
    let outcome = h.pipeline.submitter.run(&SubmitRequest::default()).await;

    assert!(outcome.is_done(), "{outcome:?}");
    assert!(outcome.message().contains("queued for retry"));
    assert!(h.trigger.is_enabled());
    assert!(h.steps_for(&staged_path).await.is_empty());

    let stage = h.store.get_stage(&staged_path).await.unwrap().unwrap();
    assert_eq!(stage.status, FileStatus::Stage);
}

#[tokio::test]
async fn test_completed_without_stage_record_is_a_no_op() {
    let h = Harness::new().await;

    let outcome = h
        .pipeline
        .validator
        .handle(&h.step_event(STAGED_PATH, StepState::Completed))
        .await;

    assert!(outcome.is_skipped());
    assert_eq!(outcome.message(), "No items to process");
    assert!(h.store.control_records().await.is_empty());
    assert!(!h.cluster.is_terminated(&h.cluster_id).await);
    assert!(h.notifier.alerts().is_empty());
}

#[tokio::test]
async fn test_failed_step_keeps_stage_record() {
    let mut h = Harness::new().await;
    h.add_catalog_entry(LATEST_STAGING_DIR, true).await;
    let staged_path = h.ingest(LATEST_KEY).await;
    h.pipeline.submitter.run(&SubmitRequest::default()).await;

    let outcome = h
        .pipeline
        .validator
        .handle(&h.step_event(&staged_path, StepState::Failed))
        .await;
    assert!(outcome.is_done(), "{outcome:?}");

    let stage = h.store.get_stage(&staged_path).await.unwrap().unwrap();
    assert_eq!(stage.status, FileStatus::Failed);
    assert!(stage.finished_at.is_some());

    let control = h.store.get_control(RAW_PATH).await.unwrap().unwrap();
    assert_eq!(control.status, FileStatus::Stage);
    assert!(h.storage.contains("staging", LATEST_KEY).await);
}

#[tokio::test]
async fn test_failed_records_are_not_resubmitted() {
    let mut h = Harness::new().await;
    h.add_catalog_entry(LATEST_STAGING_DIR, true).await;
    let staged_path = h.ingest(LATEST_KEY).await;
    h.pipeline.submitter.run(&SubmitRequest::default()).await;
    h.pipeline
        .validator
        .handle(&h.step_event(&staged_path, StepState::Cancelled))
        .await;

    let outcome = h.pipeline.submitter.run(&SubmitRequest::default()).await;

    assert_eq!(
        outcome.message(),
        "Submission complete: submitted 0, skipped 0, failed 0"
    );
    assert_eq!(h.steps_for(&staged_path).await.len(), 1);
    let stage = h.store.get_stage(&staged_path).await.unwrap().unwrap();
    assert_eq!(stage.status, FileStatus::Canceled);
}

#[tokio::test]
async fn test_full_lifecycle_loads_and_cleans_up() {
    let mut h = Harness::new().await;
    h.add_catalog_entry(LATEST_STAGING_DIR, true).await;
    let staged_path = h.ingest(LATEST_KEY).await;
    h.pipeline.submitter.run(&SubmitRequest::default()).await;
    h.finish_all_steps().await;

    let outcome = h
        .pipeline
        .validator
        .handle(&h.step_event(&staged_path, StepState::Completed))
        .await;
    assert_eq!(outcome.message(), format!("{RAW_PATH} loaded"));

    let control = h.store.get_control(RAW_PATH).await.unwrap().unwrap();
    assert_eq!(control.status, FileStatus::Loaded);
    assert!(control.job_finished_at.is_some());
    assert_eq!(control.target.unwrap().table, "orders");

    assert!(h.store.get_stage(&staged_path).await.unwrap().is_none());
    assert!(!h.storage.contains("staging", LATEST_KEY).await);
    assert!(h.storage.contains("raw", LATEST_KEY).await);
    assert!(h.cluster.is_terminated(&h.cluster_id).await);
    assert!(h.notifier.alerts().is_empty());
}

#[tokio::test]
async fn test_cluster_stays_up_while_work_remains() {
    let mut h = Harness::new().await;
    h.add_catalog_entry(LATEST_STAGING_DIR, true).await;
    let first = h.ingest(LATEST_KEY).await;
    h.ingest("sales/region/sys/orders/latest/second.csv").await;
    h.pipeline.submitter.run(&SubmitRequest::default()).await;

    let outcome = h
        .pipeline
        .validator
        .handle(&h.step_event(&first, StepState::Completed))
        .await;

    assert!(outcome.is_done(), "{outcome:?}");
    assert!(!h.cluster.is_terminated(&h.cluster_id).await);
}

#[tokio::test]
async fn test_duplicate_completion_is_idempotent() {
    let mut h = Harness::new().await;
    h.add_catalog_entry(LATEST_STAGING_DIR, true).await;
    let staged_path = h.ingest(LATEST_KEY).await;
    h.pipeline.submitter.run(&SubmitRequest::default()).await;

    let event = h.step_event(&staged_path, StepState::Completed);
    assert!(h.pipeline.validator.handle(&event).await.is_done());

    let outcome = h.pipeline.validator.handle(&event).await;
    assert!(outcome.is_skipped());
    assert_eq!(outcome.message(), "No items to process");

    let control = h.store.get_control(RAW_PATH).await.unwrap().unwrap();
    assert_eq!(control.status, FileStatus::Loaded);
    assert!(h.notifier.alerts().is_empty());
}

#[tokio::test]
async fn test_loaded_record_never_regresses() {
    let mut h = Harness::new().await;
    h.add_catalog_entry(LATEST_STAGING_DIR, true).await;
    let staged_path = h.ingest(LATEST_KEY).await;
    h.pipeline.submitter.run(&SubmitRequest::default()).await;
    h.pipeline
        .validator
        .handle(&h.step_event(&staged_path, StepState::Completed))
        .await;

    // Redelivered arrival
    h.upload_raw(LATEST_KEY, b"id,amount\n2,20\n").await;
    let outcome = h.pipeline.router.route(&raw_arrival(LATEST_KEY)).await;
    assert!(outcome.is_skipped(), "{outcome:?}");

    let result = h
        .store
        .update_control_if(
            RAW_PATH,
            &[FileStatus::InitialLoad],
            &ControlPatch::status(FileStatus::Stage),
        )
        .await
        .unwrap();
    assert_eq!(
        result,
        CasResult::StatusMismatch {
            actual: FileStatus::Loaded
        }
    );

    let control = h.store.get_control(RAW_PATH).await.unwrap().unwrap();
    assert_eq!(control.status, FileStatus::Loaded);
}

#[tokio::test]
async fn test_no_stage_records_outlive_their_load() {
    let mut h = Harness::new().await;
    h.add_catalog_entry(LATEST_STAGING_DIR, true).await;
    let mut staged = Vec::new();
    for name in ["a", "b", "c"] {
        staged.push(h.ingest(&format!("sales/region/sys/orders/latest/{name}.csv")).await);
    }
    h.pipeline.submitter.run(&SubmitRequest::default()).await;

    for staged_path in &staged {
        let outcome = h
            .pipeline
            .validator
            .handle(&h.step_event(staged_path, StepState::Completed))
            .await;
        assert!(outcome.is_done(), "{outcome:?}");
    }

    assert!(h.store.stage_records().await.is_empty());
    assert!(h
        .store
        .control_records()
        .await
        .iter()
        .all(|r| r.status == FileStatus::Loaded));
    assert!(h.cluster.is_terminated(&h.cluster_id).await);
}

#[tokio::test]
async fn test_backlog_drains_through_retry_scheduler() {
    let mut h = Harness::builder().capacity(3).build().await;
    h.add_catalog_entry(LATEST_STAGING_DIR, true).await;
    for name in ["a", "b", "c"] {
        h.ingest(&format!("sales/region/sys/orders/latest/{name}.csv")).await;
    }

    // Setup plus two jobs fill the queue
    let outcome = h.pipeline.submitter.run(&SubmitRequest::default()).await;
    assert!(outcome.message().contains("queued for retry"), "{outcome:?}");
    assert!(outcome.message().contains("submitted 2"));
    assert!(h.trigger.is_enabled());

    h.finish_all_steps().await;
    let scheduler = RetryScheduler::new(
        h.pipeline.submitter.clone(),
        h.trigger.clone(),
        Duration::from_secs(60),
        CLUSTER_NAME,
    );
    let outcome = scheduler.tick().await.unwrap();

    assert_eq!(
        outcome.message(),
        "Submission complete: submitted 1, skipped 0, failed 0"
    );
    assert!(!h.trigger.is_enabled());
    assert_eq!(h.trigger.disable_calls(), 1);
    assert!(h
        .store
        .stage_records()
        .await
        .iter()
        .all(|r| r.status == FileStatus::Processing));

    // Disabled trigger means no further retries
    assert!(scheduler.tick().await.is_none());
}

#[tokio::test]
async fn test_retry_already_scheduled_is_not_rescheduled() {
    let mut h = Harness::builder().capacity(1).build().await;
    h.add_catalog_entry(LATEST_STAGING_DIR, true).await;
    h.ingest(LATEST_KEY).await;

    h.pipeline.submitter.run(&SubmitRequest::default()).await;
    let outcome = h.pipeline.submitter.run(&SubmitRequest::default()).await;

    assert!(outcome.is_done());
    assert!(outcome.message().contains("retry already scheduled"));
    assert_eq!(h.trigger.enable_calls(), 1);
}

#[tokio::test]
async fn test_unknown_key_alerts_operator() {
    let h = Harness::new().await;
    h.upload_raw("misc/readme.md", b"hello").await;

    let outcome = h.pipeline.router.route(&raw_arrival("misc/readme.md")).await;

    assert!(outcome.is_skipped());
    let alerts = h.notifier.alerts();
    assert_eq!(alerts.len(), 1);
    assert!(alerts[0].body.contains("The file path/format is unknown"));
    assert!(h.store.control_records().await.is_empty());
}

#[tokio::test]
async fn test_stage_write_failure_alerts_with_table_name() {
    let store = Arc::new(MemoryStore::new());
    let mut h = Harness::builder()
        .store(Arc::new(FaultyStore::new(store.clone()).failing_insert_stage()))
        .build_on(store)
        .await;
    h.upload_raw(LATEST_KEY, b"id\n1\n").await;
    h.pipeline.router.route(&raw_arrival(LATEST_KEY)).await;
    h.pipeline
        .marker
        .handle(&common::staged_arrival(LATEST_KEY))
        .await;

    let event = h.changes.try_recv().unwrap();
    let outcome = h.pipeline.promoter.handle(&event).await;

    assert!(outcome.is_failed());
    let alerts = h.notifier.alerts();
    assert_eq!(alerts.len(), 1);
    assert!(alerts[0]
        .body
        .contains("Unable to write stage record to table stage_records"));
    assert!(h.store.stage_records().await.is_empty());
}

#[tokio::test]
async fn test_disabled_catalog_entry_is_skipped() {
    let mut h = Harness::new().await;
    h.add_catalog_entry(LATEST_STAGING_DIR, false).await;
    let staged_path = h.ingest(LATEST_KEY).await;

    let outcome = h.pipeline.submitter.run(&SubmitRequest::default()).await;

    assert_eq!(
        outcome.message(),
        "Submission complete: submitted 0, skipped 1, failed 0"
    );
    assert!(h.steps_for(&staged_path).await.is_empty());
    let stage = h.store.get_stage(&staged_path).await.unwrap().unwrap();
    assert_eq!(stage.status, FileStatus::Stage);
}

#[tokio::test]
async fn test_catalog_error_is_reported_and_run_continues() {
    let mut h = Harness::builder()
        .catalog(Arc::new(UnreachableCatalog))
        .build()
        .await;
    h.ingest(LATEST_KEY).await;
    h.ingest("sales/region/sys/orders/latest/second.csv").await;

    let outcome = h.pipeline.submitter.run(&SubmitRequest::default()).await;

    assert!(outcome.is_done());
    assert_eq!(
        outcome.message(),
        "Submission complete: submitted 0, skipped 0, failed 2"
    );
    assert_eq!(h.notifier.alerts().len(), 2);
}

#[tokio::test]
async fn test_foreign_source_is_rejected() {
    let h = Harness::new().await;

    let outcome = h
        .pipeline
        .submitter
        .run(&SubmitRequest {
            source: Some("other-cluster".into()),
            skip: None,
        })
        .await;

    assert!(outcome.is_skipped());
    assert_eq!(outcome.message(), "No valid cluster");
    assert!(h.cluster.steps().await.is_empty());
}

#[tokio::test]
async fn test_no_active_cluster() {
    let h = Harness::new().await;
    h.cluster.terminate(&h.cluster_id).await.unwrap();

    let outcome = h.pipeline.submitter.run(&SubmitRequest::default()).await;

    assert!(outcome.is_skipped());
    assert_eq!(outcome.message(), "No valid cluster");
}

#[tokio::test]
async fn test_catalog_entries_are_keyed_by_staging_dir() {
    let mut h = Harness::new().await;
    h.store
        .put_catalog_entry(catalog_entry("s3://staging/sales/region/sys/other", true))
        .await;
    h.ingest(LATEST_KEY).await;

    let outcome = h.pipeline.submitter.run(&SubmitRequest::default()).await;

    assert_eq!(
        outcome.message(),
        "Submission complete: submitted 0, skipped 1, failed 0"
    );
}

#[tokio::test]
async fn test_staged_payload_is_deleted_from_its_container() {
    let mut h = Harness::new().await;
    h.add_catalog_entry(LATEST_STAGING_DIR, true).await;
    let staged_path = h.ingest(LATEST_KEY).await;
    h.pipeline.submitter.run(&SubmitRequest::default()).await;

    h.pipeline
        .validator
        .handle(&h.step_event(&staged_path, StepState::Completed))
        .await;

    assert!(h.storage.head("staging", LATEST_KEY).await.is_err());
}

#[tokio::test]
async fn test_cleanup_steps_run_independently() {
    let store = Arc::new(MemoryStore::new());
    let mut h = Harness::builder()
        .store(Arc::new(FaultyStore::new(store.clone()).failing_delete_stage()))
        .build_on(store)
        .await;
    h.add_catalog_entry(LATEST_STAGING_DIR, true).await;
    let staged_path = h.ingest(LATEST_KEY).await;
    h.pipeline.submitter.run(&SubmitRequest::default()).await;
    h.finish_all_steps().await;

    let outcome = h
        .pipeline
        .validator
        .handle(&h.step_event(&staged_path, StepState::Completed))
        .await;

    assert!(outcome.is_failed(), "{outcome:?}");
    assert_eq!(
        outcome.message(),
        format!("{RAW_PATH} loaded with 1 cleanup error(s)")
    );
    let alerts = h.notifier.alerts();
    assert_eq!(alerts.len(), 1);
    assert!(alerts[0].body.contains("Unable to delete stage record"));

    let control = h.store.get_control(RAW_PATH).await.unwrap().unwrap();
    assert_eq!(control.status, FileStatus::Loaded);
    assert!(h.store.get_stage(&staged_path).await.unwrap().is_some());
    assert!(!h.storage.contains("staging", LATEST_KEY).await);
    assert!(h.cluster.is_terminated(&h.cluster_id).await);
}

#[tokio::test]
async fn test_rejected_step_is_reported_and_run_continues() {
    let mut h = Harness::new().await;
    h.add_catalog_entry(LATEST_STAGING_DIR, true).await;
    let rejected = h.ingest(LATEST_KEY).await;
    let accepted = h.ingest("sales/region/sys/orders/latest/second.csv").await;
    h.cluster
        .reject_step(&rejected, "Access denied for jar location")
        .await;

    let outcome = h.pipeline.submitter.run(&SubmitRequest::default()).await;

    assert!(outcome.is_done(), "{outcome:?}");
    assert_eq!(
        outcome.message(),
        "Submission complete: submitted 1, skipped 0, failed 1"
    );
    let alerts = h.notifier.alerts();
    assert_eq!(alerts.len(), 1);
    assert!(alerts[0].body.contains("Unable to submit step"));
    assert!(alerts[0].body.contains("Access denied for jar location"));
    assert!(!h.trigger.is_enabled());

    let stage = h.store.get_stage(&rejected).await.unwrap().unwrap();
    assert_eq!(stage.status, FileStatus::Stage);
    let stage = h.store.get_stage(&accepted).await.unwrap().unwrap();
    assert_eq!(stage.status, FileStatus::Processing);
}

#[tokio::test]
async fn test_stage_update_failure_after_submission() {
    let store = Arc::new(MemoryStore::new());
    let mut h = Harness::builder()
        .store(Arc::new(FaultyStore::new(store.clone()).failing_update_stage()))
        .build_on(store)
        .await;
    h.add_catalog_entry(LATEST_STAGING_DIR, true).await;
    let staged_path = h.ingest(LATEST_KEY).await;

    let outcome = h.pipeline.submitter.run(&SubmitRequest::default()).await;

    assert_eq!(
        outcome.message(),
        "Submission complete: submitted 0, skipped 0, failed 1"
    );
    assert_eq!(h.steps_for(&staged_path).await.len(), 1);
    let alerts = h.notifier.alerts();
    assert_eq!(alerts.len(), 1);
    assert!(alerts[0]
        .body
        .contains("submitted but stage record not updated"));
    let stage = h.store.get_stage(&staged_path).await.unwrap().unwrap();
    assert_eq!(stage.status, FileStatus::Stage);
}

#[tokio::test]
async fn test_setup_step_uses_regional_script_runner() {
    let h = Harness::new().await;

    h.pipeline.submitter.run(&SubmitRequest::default()).await;

    let steps = h.cluster.steps().await;
    assert_eq!(steps.len(), 1);
    assert_eq!(steps[0].step.name, SETUP_STEP_NAME);
    assert_eq!(
        steps[0].step.jar,
        format!("s3://{REGION}.elasticmapreduce/libs/script-runner/script-runner.jar")
    );
}

//! Shared harness for lifecycle integration tests
//!
//! Wires every handler to in-process implementations and keeps typed handles
//! on them so tests can arrange state and inspect side effects.

#![allow(dead_code, clippy::unwrap_used)]

use async_trait::async_trait;
use dlctl_common::types::{
    ControlPatch, ControlRecord, FileStatus, JobCatalogEntry, ParamsMode, StagePatch, StageRecord,
};
use dlctl_server::{
    cluster::{MemoryCluster, StepState},
    config::PipelineConfig,
    ingest::ObjectRef,
    lifecycle::{ControlChangeEvent, StepEvent},
    notify::MemoryNotifier,
    runtime::{Pipeline, PipelineClients},
    storage::{MemoryStorage, ObjectStore, PutObject},
    store::{CasResult, ControlStore, JobCatalog, MemoryStore, StoreError, StoreResult},
    trigger::LocalTrigger,
};
use std::sync::Arc;
use tokio::sync::mpsc;

pub const CLUSTER_NAME: &str = "dlctl-cluster";
pub const REGION: &str = "sa-east-1";
pub const LATEST_KEY: &str = "sales/region/sys/orders/latest/file.csv";
pub const LATEST_STAGING_DIR: &str = "s3://staging/sales/region/sys/orders";

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub storage: Arc<MemoryStorage>,
    pub cluster: Arc<MemoryCluster>,
    pub cluster_id: String,
    pub trigger: Arc<LocalTrigger>,
    pub notifier: Arc<MemoryNotifier>,
    pub config: PipelineConfig,
    pub pipeline: Arc<Pipeline>,
    pub changes: mpsc::Receiver<ControlChangeEvent>,
}

pub struct HarnessBuilder {
    capacity: usize,
    store: Option<Arc<dyn ControlStore>>,
    catalog: Option<Arc<dyn JobCatalog>>,
}

impl HarnessBuilder {
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Put `store` in front of the handlers instead of the plain memory store.
    pub fn store(mut self, store: Arc<dyn ControlStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn catalog(mut self, catalog: Arc<dyn JobCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub async fn build(self) -> Harness {
        self.build_on(Arc::new(MemoryStore::new())).await
    }

    /// Build around an existing memory store, e.g. one a wrapper delegates to.
    pub async fn build_on(self, store: Arc<MemoryStore>) -> Harness {
        let config = PipelineConfig {
            cluster_name: CLUSTER_NAME.to_string(),
            aws_region: REGION.to_string(),
            stage_lookup_retries: 0,
            ..PipelineConfig::default()
        };

        let storage = Arc::new(MemoryStorage::new());
        let cluster = Arc::new(MemoryCluster::new(self.capacity));
        let cluster_id = cluster.launch(CLUSTER_NAME).await;
        let trigger = Arc::new(LocalTrigger::new());
        let notifier = Arc::new(MemoryNotifier::new());

        let control_store: Arc<dyn ControlStore> = match self.store {
            Some(wrapper) => wrapper,
            None => store.clone(),
        };
        let catalog: Arc<dyn JobCatalog> = match self.catalog {
            Some(catalog) => catalog,
            None => store.clone(),
        };

        let clients = PipelineClients {
            store: control_store,
            catalog,
            storage: storage.clone(),
            cluster: cluster.clone(),
            trigger: trigger.clone(),
            notifier: notifier.clone(),
        };
        let (pipeline, changes) = Pipeline::build(clients, &config).unwrap();

        Harness {
            store,
            storage,
            cluster,
            cluster_id,
            trigger,
            notifier,
            config,
            pipeline: Arc::new(pipeline),
            changes,
        }
    }
}

impl Harness {
    pub fn builder() -> HarnessBuilder {
        HarnessBuilder {
            capacity: 256,
            store: None,
            catalog: None,
        }
    }

    pub async fn new() -> Self {
        Self::builder().build().await
    }

    pub async fn upload_raw(&self, key: &str, data: &[u8]) {
        self.storage
            .put(
                "raw",
                key,
                PutObject {
                    data: data.to_vec(),
                    content_type: Some("text/csv".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
    }

    pub async fn add_catalog_entry(&self, staging_dir: &str, enabled: bool) {
        self.store
            .put_catalog_entry(catalog_entry(staging_dir, enabled))
            .await;
    }

    /// Upload, route, mark and promote one raw file whose staged key equals
    /// its raw key. Returns the staged path.
    pub async fn ingest(&mut self, key: &str) -> String {
        self.upload_raw(key, b"id,amount\n1,10\n").await;

        let outcome = self.pipeline.router.route(&raw_arrival(key)).await;
        assert!(outcome.is_done(), "router: {outcome:?}");

        let outcome = self.pipeline.marker.handle(&staged_arrival(key)).await;
        assert!(outcome.is_done(), "stage marker: {outcome:?}");

        assert_eq!(self.promote_pending().await, 1);
        format!("s3://staging/{key}")
    }

    /// Hand every queued change event to the promoter.
    pub async fn promote_pending(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.changes.try_recv() {
            self.pipeline.promoter.handle(&event).await;
            handled += 1;
        }
        handled
    }

    /// Steps submitted for `staged_path`.
    pub async fn steps_for(&self, staged_path: &str) -> Vec<String> {
        self.cluster
            .steps()
            .await
            .into_iter()
            .filter(|s| s.step.name == staged_path)
            .map(|s| s.step_id)
            .collect()
    }

    /// Mark every step on the cluster finished, freeing capacity.
    pub async fn finish_all_steps(&self) {
        for step in self.cluster.steps().await {
            self.cluster
                .set_step_state(&step.step_id, StepState::Completed)
                .await;
        }
    }

    pub fn step_event(&self, staged_path: &str, state: StepState) -> StepEvent {
        StepEvent {
            step_id: "s-test".into(),
            step_name: staged_path.into(),
            cluster_id: self.cluster_id.clone(),
            state,
            message: None,
        }
    }
}

pub fn raw_arrival(key: &str) -> ObjectRef {
    ObjectRef {
        container: "raw".into(),
        key: key.into(),
        size: None,
    }
}

pub fn staged_arrival(key: &str) -> ObjectRef {
    ObjectRef {
        container: "staging".into(),
        key: key.into(),
        size: None,
    }
}

pub fn catalog_entry(staging_dir: &str, enabled: bool) -> JobCatalogEntry {
    JobCatalogEntry {
        staging_dir: staging_dir.to_string(),
        program: "s3://programs/jobs/orders_load.py".into(),
        params_mode: ParamsMode::None,
        params: None,
        source_database: "raw_db".into(),
        source_table: "orders".into(),
        target_database: "analytics".into(),
        target_table: "orders".into(),
        target_location: "orders".into(),
        partition_key: None,
        enabled,
    }
}

/// Memory store whose stage-record writes can be made to fail.
pub struct FaultyStore {
    inner: Arc<MemoryStore>,
    fail_insert_stage: bool,
    fail_update_stage: bool,
    fail_delete_stage: bool,
}

impl FaultyStore {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            fail_insert_stage: false,
            fail_update_stage: false,
            fail_delete_stage: false,
        }
    }

    pub fn failing_insert_stage(mut self) -> Self {
        self.fail_insert_stage = true;
        self
    }

    pub fn failing_update_stage(mut self) -> Self {
        self.fail_update_stage = true;
        self
    }

    pub fn failing_delete_stage(mut self) -> Self {
        self.fail_delete_stage = true;
        self
    }

    fn reset() -> StoreError {
        StoreError::Unavailable("connection reset by peer".into())
    }
}

#[async_trait]
impl ControlStore for FaultyStore {
    async fn get_control(&self, raw_path: &str) -> StoreResult<Option<ControlRecord>> {
        self.inner.get_control(raw_path).await
    }

    async fn insert_control(&self, record: &ControlRecord) -> StoreResult<bool> {
        self.inner.insert_control(record).await
    }

    async fn update_control_if(
        &self,
        raw_path: &str,
        expected: &[FileStatus],
        patch: &ControlPatch,
    ) -> StoreResult<CasResult<ControlRecord>> {
        self.inner.update_control_if(raw_path, expected, patch).await
    }

    async fn get_stage(&self, staged_path: &str) -> StoreResult<Option<StageRecord>> {
        self.inner.get_stage(staged_path).await
    }

    async fn insert_stage(&self, record: &StageRecord) -> StoreResult<bool> {
        if self.fail_insert_stage {
            return Err(Self::reset());
        }
        self.inner.insert_stage(record).await
    }

    async fn update_stage(
        &self,
        staged_path: &str,
        patch: &StagePatch,
    ) -> StoreResult<Option<StageRecord>> {
        if self.fail_update_stage {
            return Err(Self::reset());
        }
        self.inner.update_stage(staged_path, patch).await
    }

    async fn delete_stage(&self, staged_path: &str) -> StoreResult<bool> {
        if self.fail_delete_stage {
            return Err(Self::reset());
        }
        self.inner.delete_stage(staged_path).await
    }

    async fn scan_stage(&self, exclude: &[FileStatus]) -> StoreResult<Vec<StageRecord>> {
        self.inner.scan_stage(exclude).await
    }
}

/// Catalog that is always unreachable.
pub struct UnreachableCatalog;

#[async_trait]
impl JobCatalog for UnreachableCatalog {
    async fn get_entry(&self, _staging_dir: &str) -> StoreResult<Option<JobCatalogEntry>> {
        Err(StoreError::Unavailable("catalog timed out".into()))
    }
}

//! In-memory control store

use async_trait::async_trait;
use dlctl_common::types::{
    ControlPatch, ControlRecord, FileStatus, JobCatalogEntry, StagePatch, StageRecord,
};
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{CasResult, ControlStore, JobCatalog, StoreResult};

#[derive(Debug, Default)]
pub struct MemoryStore {
    control: RwLock<HashMap<String, ControlRecord>>,
    stage: RwLock<HashMap<String, StageRecord>>,
    catalog: RwLock<HashMap<String, JobCatalogEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put_catalog_entry(&self, entry: JobCatalogEntry) {
        self.catalog
            .write()
            .await
            .insert(entry.staging_dir.clone(), entry);
    }

    pub async fn control_records(&self) -> Vec<ControlRecord> {
        let mut records: Vec<_> = self.control.read().await.values().cloned().collect();
        records.sort_by(|a, b| a.raw_path.cmp(&b.raw_path));
        records
    }

    pub async fn stage_records(&self) -> Vec<StageRecord> {
        let mut records: Vec<_> = self.stage.read().await.values().cloned().collect();
        records.sort_by(|a, b| a.staged_path.cmp(&b.staged_path));
        records
    }
}

#[async_trait]
impl ControlStore for MemoryStore {
    async fn get_control(&self, raw_path: &str) -> StoreResult<Option<ControlRecord>> {
        Ok(self.control.read().await.get(raw_path).cloned())
    }

    async fn insert_control(&self, record: &ControlRecord) -> StoreResult<bool> {
        let mut control = self.control.write().await;
        match control.get(&record.raw_path) {
            Some(existing) if existing.status != FileStatus::InitialLoad => Ok(false),
            _ => {
                control.insert(record.raw_path.clone(), record.clone());
                Ok(true)
            }
        }
    }

    async fn update_control_if(
        &self,
        raw_path: &str,
        expected: &[FileStatus],
        patch: &ControlPatch,
    ) -> StoreResult<CasResult<ControlRecord>> {
        let mut control = self.control.write().await;
        let Some(record) = control.get_mut(raw_path) else {
            return Ok(CasResult::NotFound);
        };
        if !expected.contains(&record.status) {
            return Ok(CasResult::StatusMismatch {
                actual: record.status,
            });
        }
        record.apply(patch);
        Ok(CasResult::Applied(record.clone()))
    }

    async fn get_stage(&self, staged_path: &str) -> StoreResult<Option<StageRecord>> {
        Ok(self.stage.read().await.get(staged_path).cloned())
    }

    async fn insert_stage(&self, record: &StageRecord) -> StoreResult<bool> {
        let mut stage = self.stage.write().await;
        if stage.contains_key(&record.staged_path) {
            return Ok(false);
        }
        stage.insert(record.staged_path.clone(), record.clone());
        Ok(true)
    }

    async fn update_stage(
        &self,
        staged_path: &str,
        patch: &StagePatch,
    ) -> StoreResult<Option<StageRecord>> {
        let mut stage = self.stage.write().await;
        Ok(stage.get_mut(staged_path).map(|record| {
            record.apply(patch);
            record.clone()
        }))
    }

    async fn delete_stage(&self, staged_path: &str) -> StoreResult<bool> {
        Ok(self.stage.write().await.remove(staged_path).is_some())
    }

    async fn scan_stage(&self, exclude: &[FileStatus]) -> StoreResult<Vec<StageRecord>> {
        let mut records: Vec<_> = self
            .stage
            .read()
            .await
            .values()
            .filter(|r| !exclude.contains(&r.status))
            .cloned()
            .collect();
        records.sort_by(|a, b| {
            a.staged_at
                .cmp(&b.staged_at)
                .then_with(|| a.staged_path.cmp(&b.staged_path))
        });
        Ok(records)
    }
}

#[async_trait]
impl JobCatalog for MemoryStore {
    async fn get_entry(&self, staging_dir: &str) -> StoreResult<Option<JobCatalogEntry>> {
        Ok(self.catalog.read().await.get(staging_dir).cloned())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, Utc};

    fn control(raw_path: &str, status: FileStatus) -> ControlRecord {
        ControlRecord {
            raw_path: raw_path.to_string(),
            status,
            staged_path: raw_path.replace("s3://raw", "s3://staging"),
            staging_dir: "s3://staging/dummy".to_string(),
            data_source: "dummy".to_string(),
            container: "raw".to_string(),
            object_name: "a.txt".to_string(),
            size: 0,
            content_type: "text/plain".to_string(),
            arrived_at: Utc::now(),
            file_modified_at: None,
            staged_at: None,
            job_finished_at: None,
            partition: None,
            target: None,
        }
    }

    fn stage(name: &str, staged_at: DateTime<Utc>) -> StageRecord {
        StageRecord::new(
            format!("s3://staging/{name}"),
            format!("s3://raw/{name}"),
            "s3://staging",
            None,
            staged_at,
        )
    }

    #[tokio::test]
    async fn test_insert_control_does_not_regress() {
        let store = MemoryStore::new();
        let raw = "s3://raw/dummy/a.txt";

        let initial = control(raw, FileStatus::InitialLoad);
        assert!(store.insert_control(&initial).await.unwrap());
        assert!(store.insert_control(&initial).await.unwrap());

        store
            .update_control_if(
                raw,
                &[FileStatus::InitialLoad],
                &ControlPatch::status(FileStatus::Stage),
            )
            .await
            .unwrap();

        assert!(!store.insert_control(&initial).await.unwrap());
        assert_eq!(
            store.get_control(raw).await.unwrap().unwrap().status,
            FileStatus::Stage
        );
    }

    #[tokio::test]
    async fn test_conditional_update() {
        let store = MemoryStore::new();
        let raw = "s3://raw/dummy/a.txt";
        store
            .insert_control(&control(raw, FileStatus::InitialLoad))
            .await
            .unwrap();

        let result = store
            .update_control_if(
                raw,
                &[FileStatus::Processing],
                &ControlPatch::status(FileStatus::Loaded),
            )
            .await
            .unwrap();
        assert_eq!(
            result,
            CasResult::StatusMismatch {
                actual: FileStatus::InitialLoad
            }
        );

        let missing = store
            .update_control_if(
                "s3://raw/other",
                &[FileStatus::InitialLoad],
                &ControlPatch::default(),
            )
            .await
            .unwrap();
        assert_eq!(missing, CasResult::NotFound);
    }

    #[tokio::test]
    async fn test_scan_excludes_and_orders() {
        let store = MemoryStore::new();
        let now = Utc::now();

        let older = stage("b", now - Duration::minutes(5));
        let newer = stage("a", now);
        let mut failed = stage("c", now);
        failed.status = FileStatus::Failed;

        for record in [&newer, &older, &failed] {
            assert!(store.insert_stage(record).await.unwrap());
        }
        assert!(!store.insert_stage(&newer).await.unwrap());

        let pending = store.scan_stage(&FileStatus::TERMINAL).await.unwrap();
        let paths: Vec<_> = pending.iter().map(|r| r.staged_path.as_str()).collect();
        assert_eq!(paths, vec!["s3://staging/b", "s3://staging/a"]);

        assert_eq!(store.scan_stage(&[]).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_update_and_delete_stage() {
        let store = MemoryStore::new();
        let record = stage("a", Utc::now());
        store.insert_stage(&record).await.unwrap();

        let updated = store
            .update_stage(
                "s3://staging/a",
                &StagePatch::finished(FileStatus::Failed, Utc::now()),
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.status, FileStatus::Failed);
        assert!(updated.finished_at.is_some());

        assert!(store
            .update_stage("s3://staging/zz", &StagePatch::default())
            .await
            .unwrap()
            .is_none());
        assert!(store.delete_stage("s3://staging/a").await.unwrap());
        assert!(!store.delete_stage("s3://staging/a").await.unwrap());
    }
}

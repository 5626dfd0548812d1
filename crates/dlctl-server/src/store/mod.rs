//! Control store: control records, stage records and the job catalog
//!
//! Handlers only see the traits here. Two implementations exist:
//! [`PgStore`] over PostgreSQL and [`MemoryStore`] for tests and local runs.

use async_trait::async_trait;
use dlctl_common::types::{
    ControlPatch, ControlRecord, FileStatus, JobCatalogEntry, StagePatch, StageRecord,
};
use thiserror::Error;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::{PgStore, TableNames};

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("Table {0} does not exist")]
    MissingTable(String),

    #[error("Corrupt row in {table}: {message}")]
    Decode { table: String, message: String },

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Result of a conditional update.
#[derive(Debug, Clone, PartialEq)]
pub enum CasResult<T> {
    /// The condition held; carries the updated value.
    Applied(T),
    /// No record under that key.
    NotFound,
    /// The record exists but its status was not one of the expected ones.
    StatusMismatch { actual: FileStatus },
}

/// Per-file lifecycle state.
#[async_trait]
pub trait ControlStore: Send + Sync {
    async fn get_control(&self, raw_path: &str) -> StoreResult<Option<ControlRecord>>;

    /// Insert a control record, or replace one that is still `INITIAL_LOAD`.
    ///
    /// Returns `false` and leaves the stored record alone when it has already
    /// moved past `INITIAL_LOAD`.
    async fn insert_control(&self, record: &ControlRecord) -> StoreResult<bool>;

    /// Apply `patch` only if the current status is one of `expected`.
    async fn update_control_if(
        &self,
        raw_path: &str,
        expected: &[FileStatus],
        patch: &ControlPatch,
    ) -> StoreResult<CasResult<ControlRecord>>;

    async fn get_stage(&self, staged_path: &str) -> StoreResult<Option<StageRecord>>;

    /// Insert a stage record if none exists for its staged path.
    async fn insert_stage(&self, record: &StageRecord) -> StoreResult<bool>;

    /// Keyed update; `None` when no record exists.
    async fn update_stage(
        &self,
        staged_path: &str,
        patch: &StagePatch,
    ) -> StoreResult<Option<StageRecord>>;

    /// Returns whether a record was removed.
    async fn delete_stage(&self, staged_path: &str) -> StoreResult<bool>;

    /// Stage records whose status is not in `exclude`, oldest first.
    async fn scan_stage(&self, exclude: &[FileStatus]) -> StoreResult<Vec<StageRecord>>;

    /// Connectivity check for the health endpoint.
    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}

/// Read-only job configuration.
#[async_trait]
pub trait JobCatalog: Send + Sync {
    async fn get_entry(&self, staging_dir: &str) -> StoreResult<Option<JobCatalogEntry>>;
}

//! PostgreSQL control store
//!
//! Table names come from configuration and are validated as plain
//! identifiers before they reach the SQL built here.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dlctl_common::types::{
    ControlPatch, ControlRecord, FileStatus, JobCatalogEntry, StagePatch, StageRecord, TargetTable,
};
use sqlx::PgPool;
use tracing::{debug, instrument};

use super::{CasResult, ControlStore, JobCatalog, StoreError, StoreResult};
use crate::config::{
    PipelineConfig, DEFAULT_CATALOG_TABLE, DEFAULT_CONTROL_TABLE, DEFAULT_STAGE_TABLE,
};

const CONTROL_COLUMNS: &str = "raw_path, status, staged_path, staging_dir, data_source, \
    container, object_name, size, content_type, partition_value, arrived_at, file_modified_at, \
    staged_at, job_finished_at, target_database, target_table, target_location";

const STAGE_COLUMNS: &str = "staged_path, raw_path, staging_dir, partition_value, status, \
    staged_at, submitted_at, finished_at, target_database, target_table, target_location";

const CATALOG_COLUMNS: &str = "staging_dir, program, params_mode, params, source_database, \
    source_table, target_database, target_table, target_location, partition_key, enabled";

/// Names of the three lifecycle tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableNames {
    pub control: String,
    pub stage: String,
    pub catalog: String,
}

impl From<&PipelineConfig> for TableNames {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            control: config.control_table.clone(),
            stage: config.stage_table.clone(),
            catalog: config.catalog_table.clone(),
        }
    }
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    tables: TableNames,
}

#[derive(sqlx::FromRow)]
struct ControlRow {
    raw_path: String,
    status: String,
    staged_path: String,
    staging_dir: String,
    data_source: String,
    container: String,
    object_name: String,
    size: i64,
    content_type: String,
    partition_value: Option<String>,
    arrived_at: DateTime<Utc>,
    file_modified_at: Option<DateTime<Utc>>,
    staged_at: Option<DateTime<Utc>>,
    job_finished_at: Option<DateTime<Utc>>,
    target_database: Option<String>,
    target_table: Option<String>,
    target_location: Option<String>,
}

#[derive(sqlx::FromRow)]
struct StageRow {
    staged_path: String,
    raw_path: String,
    staging_dir: String,
    partition_value: Option<String>,
    status: String,
    staged_at: DateTime<Utc>,
    submitted_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    target_database: Option<String>,
    target_table: Option<String>,
    target_location: Option<String>,
}

#[derive(sqlx::FromRow)]
struct CatalogRow {
    staging_dir: String,
    program: String,
    params_mode: String,
    params: Option<String>,
    source_database: String,
    source_table: String,
    target_database: String,
    target_table: String,
    target_location: String,
    partition_key: Option<String>,
    enabled: bool,
}

fn target_from_columns(
    database: Option<String>,
    table: Option<String>,
    location: Option<String>,
) -> Option<TargetTable> {
    Some(TargetTable {
        database: database?,
        table: table?,
        location: location?,
    })
}

fn decode_status(table: &str, value: &str) -> StoreResult<FileStatus> {
    value.parse().map_err(|e: dlctl_common::DlctlError| StoreError::Decode {
        table: table.to_string(),
        message: e.to_string(),
    })
}

impl ControlRow {
    fn into_record(self, table: &str) -> StoreResult<ControlRecord> {
        Ok(ControlRecord {
            status: decode_status(table, &self.status)?,
            raw_path: self.raw_path,
            staged_path: self.staged_path,
            staging_dir: self.staging_dir,
            data_source: self.data_source,
            container: self.container,
            object_name: self.object_name,
            size: self.size,
            content_type: self.content_type,
            partition: self.partition_value,
            arrived_at: self.arrived_at,
            file_modified_at: self.file_modified_at,
            staged_at: self.staged_at,
            job_finished_at: self.job_finished_at,
            target: target_from_columns(
                self.target_database,
                self.target_table,
                self.target_location,
            ),
        })
    }
}

impl StageRow {
    fn into_record(self, table: &str) -> StoreResult<StageRecord> {
        Ok(StageRecord {
            status: decode_status(table, &self.status)?,
            staged_path: self.staged_path,
            raw_path: self.raw_path,
            staging_dir: self.staging_dir,
            partition: self.partition_value,
            staged_at: self.staged_at,
            submitted_at: self.submitted_at,
            finished_at: self.finished_at,
            target: target_from_columns(
                self.target_database,
                self.target_table,
                self.target_location,
            ),
        })
    }
}

impl CatalogRow {
    fn into_entry(self, table: &str) -> StoreResult<JobCatalogEntry> {
        let params_mode = self.params_mode.parse().map_err(|e: dlctl_common::DlctlError| {
            StoreError::Decode {
                table: table.to_string(),
                message: e.to_string(),
            }
        })?;

        Ok(JobCatalogEntry {
            staging_dir: self.staging_dir,
            program: self.program,
            params_mode,
            params: self.params,
            source_database: self.source_database,
            source_table: self.source_table,
            target_database: self.target_database,
            target_table: self.target_table,
            target_location: self.target_location,
            partition_key: self.partition_key,
            enabled: self.enabled,
        })
    }
}

fn status_names(statuses: &[FileStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.as_str().to_string()).collect()
}

impl PgStore {
    pub fn new(pool: PgPool, tables: TableNames) -> Self {
        Self { pool, tables }
    }

    /// Apply the bundled migrations, then create any configured table that
    /// differs from the migrated one as a copy of its layout, and check that
    /// all three exist.
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;

        for (table, template) in [
            (&self.tables.control, DEFAULT_CONTROL_TABLE),
            (&self.tables.stage, DEFAULT_STAGE_TABLE),
            (&self.tables.catalog, DEFAULT_CATALOG_TABLE),
        ] {
            if table != template {
                debug!(%table, %template, "Creating configured table");
                let sql =
                    format!("CREATE TABLE IF NOT EXISTS {table} (LIKE {template} INCLUDING ALL)");
                sqlx::query(&sql).execute(&self.pool).await?;
            }

            let exists: bool = sqlx::query_scalar("SELECT to_regclass($1) IS NOT NULL")
                .bind(table)
                .fetch_one(&self.pool)
                .await?;
            if !exists {
                return Err(StoreError::MissingTable(table.clone()));
            }
        }

        Ok(())
    }

    /// Insert or replace a catalog entry. The lifecycle handlers never write
    /// the catalog; this exists for seeding and tests.
    pub async fn upsert_catalog_entry(&self, entry: &JobCatalogEntry) -> StoreResult<()> {
        let sql = format!(
            "INSERT INTO {} ({CATALOG_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
             ON CONFLICT (staging_dir) DO UPDATE SET program = EXCLUDED.program, \
             params_mode = EXCLUDED.params_mode, params = EXCLUDED.params, \
             source_database = EXCLUDED.source_database, source_table = EXCLUDED.source_table, \
             target_database = EXCLUDED.target_database, target_table = EXCLUDED.target_table, \
             target_location = EXCLUDED.target_location, partition_key = EXCLUDED.partition_key, \
             enabled = EXCLUDED.enabled",
            self.tables.catalog
        );

        sqlx::query(&sql)
            .bind(&entry.staging_dir)
            .bind(&entry.program)
            .bind(entry.params_mode.as_str())
            .bind(&entry.params)
            .bind(&entry.source_database)
            .bind(&entry.source_table)
            .bind(&entry.target_database)
            .bind(&entry.target_table)
            .bind(&entry.target_location)
            .bind(&entry.partition_key)
            .bind(entry.enabled)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn control_status(&self, raw_path: &str) -> StoreResult<Option<FileStatus>> {
        let sql = format!("SELECT status FROM {} WHERE raw_path = $1", self.tables.control);
        let status: Option<String> = sqlx::query_scalar(&sql)
            .bind(raw_path)
            .fetch_optional(&self.pool)
            .await?;

        status
            .map(|s| decode_status(&self.tables.control, &s))
            .transpose()
    }
}

#[async_trait]
impl ControlStore for PgStore {
    #[instrument(skip(self))]
    async fn get_control(&self, raw_path: &str) -> StoreResult<Option<ControlRecord>> {
        let sql = format!(
            "SELECT {CONTROL_COLUMNS} FROM {} WHERE raw_path = $1",
            self.tables.control
        );

        sqlx::query_as::<_, ControlRow>(&sql)
            .bind(raw_path)
            .fetch_optional(&self.pool)
            .await?
            .map(|row| row.into_record(&self.tables.control))
            .transpose()
    }

    #[instrument(skip(self, record), fields(raw_path = %record.raw_path))]
    async fn insert_control(&self, record: &ControlRecord) -> StoreResult<bool> {
        let t = &self.tables.control;
        let sql = format!(
            "INSERT INTO {t} ({CONTROL_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17) \
             ON CONFLICT (raw_path) DO UPDATE SET status = EXCLUDED.status, \
             staged_path = EXCLUDED.staged_path, staging_dir = EXCLUDED.staging_dir, \
             data_source = EXCLUDED.data_source, container = EXCLUDED.container, \
             object_name = EXCLUDED.object_name, size = EXCLUDED.size, \
             content_type = EXCLUDED.content_type, partition_value = EXCLUDED.partition_value, \
             arrived_at = EXCLUDED.arrived_at, file_modified_at = EXCLUDED.file_modified_at \
             WHERE {t}.status = 'INITIAL_LOAD'"
        );

        let target = record.target.as_ref();
        let result = sqlx::query(&sql)
            .bind(&record.raw_path)
            .bind(record.status.as_str())
            .bind(&record.staged_path)
            .bind(&record.staging_dir)
            .bind(&record.data_source)
            .bind(&record.container)
            .bind(&record.object_name)
            .bind(record.size)
            .bind(&record.content_type)
            .bind(&record.partition)
            .bind(record.arrived_at)
            .bind(record.file_modified_at)
            .bind(record.staged_at)
            .bind(record.job_finished_at)
            .bind(target.map(|t| t.database.as_str()))
            .bind(target.map(|t| t.table.as_str()))
            .bind(target.map(|t| t.location.as_str()))
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self, patch))]
    async fn update_control_if(
        &self,
        raw_path: &str,
        expected: &[FileStatus],
        patch: &ControlPatch,
    ) -> StoreResult<CasResult<ControlRecord>> {
        let sql = format!(
            "UPDATE {} SET status = COALESCE($2, status), \
             staged_at = COALESCE($3, staged_at), \
             job_finished_at = COALESCE($4, job_finished_at), \
             target_database = COALESCE($5, target_database), \
             target_table = COALESCE($6, target_table), \
             target_location = COALESCE($7, target_location) \
             WHERE raw_path = $1 AND status = ANY($8) \
             RETURNING {CONTROL_COLUMNS}",
            self.tables.control
        );

        let target = patch.target.as_ref();
        let row = sqlx::query_as::<_, ControlRow>(&sql)
            .bind(raw_path)
            .bind(patch.status.map(FileStatus::as_str))
            .bind(patch.staged_at)
            .bind(patch.job_finished_at)
            .bind(target.map(|t| t.database.as_str()))
            .bind(target.map(|t| t.table.as_str()))
            .bind(target.map(|t| t.location.as_str()))
            .bind(status_names(expected))
            .fetch_optional(&self.pool)
            .await?;

        if let Some(row) = row {
            return Ok(CasResult::Applied(row.into_record(&self.tables.control)?));
        }

        Ok(match self.control_status(raw_path).await? {
            None => CasResult::NotFound,
            Some(actual) => {
                debug!(%actual, "Conditional control update skipped");
                CasResult::StatusMismatch { actual }
            }
        })
    }

    #[instrument(skip(self))]
    async fn get_stage(&self, staged_path: &str) -> StoreResult<Option<StageRecord>> {
        let sql = format!(
            "SELECT {STAGE_COLUMNS} FROM {} WHERE staged_path = $1",
            self.tables.stage
        );

        sqlx::query_as::<_, StageRow>(&sql)
            .bind(staged_path)
            .fetch_optional(&self.pool)
            .await?
            .map(|row| row.into_record(&self.tables.stage))
            .transpose()
    }

    #[instrument(skip(self, record), fields(staged_path = %record.staged_path))]
    async fn insert_stage(&self, record: &StageRecord) -> StoreResult<bool> {
        let sql = format!(
            "INSERT INTO {} ({STAGE_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
             ON CONFLICT (staged_path) DO NOTHING",
            self.tables.stage
        );

        let target = record.target.as_ref();
        let result = sqlx::query(&sql)
            .bind(&record.staged_path)
            .bind(&record.raw_path)
            .bind(&record.staging_dir)
            .bind(&record.partition)
            .bind(record.status.as_str())
            .bind(record.staged_at)
            .bind(record.submitted_at)
            .bind(record.finished_at)
            .bind(target.map(|t| t.database.as_str()))
            .bind(target.map(|t| t.table.as_str()))
            .bind(target.map(|t| t.location.as_str()))
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self, patch))]
    async fn update_stage(
        &self,
        staged_path: &str,
        patch: &StagePatch,
    ) -> StoreResult<Option<StageRecord>> {
        let sql = format!(
            "UPDATE {} SET status = COALESCE($2, status), \
             submitted_at = COALESCE($3, submitted_at), \
             finished_at = COALESCE($4, finished_at), \
             target_database = COALESCE($5, target_database), \
             target_table = COALESCE($6, target_table), \
             target_location = COALESCE($7, target_location) \
             WHERE staged_path = $1 \
             RETURNING {STAGE_COLUMNS}",
            self.tables.stage
        );

        let target = patch.target.as_ref();
        sqlx::query_as::<_, StageRow>(&sql)
            .bind(staged_path)
            .bind(patch.status.map(FileStatus::as_str))
            .bind(patch.submitted_at)
            .bind(patch.finished_at)
            .bind(target.map(|t| t.database.as_str()))
            .bind(target.map(|t| t.table.as_str()))
            .bind(target.map(|t| t.location.as_str()))
            .fetch_optional(&self.pool)
            .await?
            .map(|row| row.into_record(&self.tables.stage))
            .transpose()
    }

    #[instrument(skip(self))]
    async fn delete_stage(&self, staged_path: &str) -> StoreResult<bool> {
        let sql = format!("DELETE FROM {} WHERE staged_path = $1", self.tables.stage);
        let result = sqlx::query(&sql)
            .bind(staged_path)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    async fn scan_stage(&self, exclude: &[FileStatus]) -> StoreResult<Vec<StageRecord>> {
        let sql = format!(
            "SELECT {STAGE_COLUMNS} FROM {} WHERE NOT (status = ANY($1)) \
             ORDER BY staged_at, staged_path",
            self.tables.stage
        );

        let rows = sqlx::query_as::<_, StageRow>(&sql)
            .bind(status_names(exclude))
            .fetch_all(&self.pool)
            .await?;

        debug!(count = rows.len(), "Scanned stage records");

        rows.into_iter()
            .map(|row| row.into_record(&self.tables.stage))
            .collect()
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl JobCatalog for PgStore {
    #[instrument(skip(self))]
    async fn get_entry(&self, staging_dir: &str) -> StoreResult<Option<JobCatalogEntry>> {
        let sql = format!(
            "SELECT {CATALOG_COLUMNS} FROM {} WHERE staging_dir = $1",
            self.tables.catalog
        );

        sqlx::query_as::<_, CatalogRow>(&sql)
            .bind(staging_dir)
            .fetch_optional(&self.pool)
            .await?
            .map(|row| row.into_entry(&self.tables.catalog))
            .transpose()
    }
}

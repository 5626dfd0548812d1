use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use super::FileStatus;

/// Partition value that upstream producers use to mean "no partition".
const PARTITION_SENTINEL: &str = "false";

/// Deserialize an optional partition, mapping the `"false"` sentinel and the
/// empty string to `None`.
pub fn deserialize_partition<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|v| !v.is_empty() && v != PARTITION_SENTINEL))
}

/// Resolved output of a job, copied from the catalog entry on submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetTable {
    pub database: String,
    pub table: String,
    pub location: String,
}

/// Lifecycle record of one raw file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlRecord {
    pub raw_path: String,
    pub status: FileStatus,
    pub staged_path: String,
    pub staging_dir: String,
    pub data_source: String,
    pub container: String,
    pub object_name: String,
    pub size: i64,
    pub content_type: String,
    pub arrived_at: DateTime<Utc>,
    pub file_modified_at: Option<DateTime<Utc>>,
    pub staged_at: Option<DateTime<Utc>>,
    pub job_finished_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "deserialize_partition")]
    pub partition: Option<String>,
    pub target: Option<TargetTable>,
}

impl ControlRecord {
    /// Apply the set fields of `patch`. Status checks are the caller's job.
    pub fn apply(&mut self, patch: &ControlPatch) {
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(at) = patch.staged_at {
            self.staged_at = Some(at);
        }
        if let Some(at) = patch.job_finished_at {
            self.job_finished_at = Some(at);
        }
        if let Some(target) = &patch.target {
            self.target = Some(target.clone());
        }
    }
}

/// Partial update of a [`ControlRecord`]; `None` fields are left alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ControlPatch {
    pub status: Option<FileStatus>,
    pub staged_at: Option<DateTime<Utc>>,
    pub job_finished_at: Option<DateTime<Utc>>,
    pub target: Option<TargetTable>,
}

impl ControlPatch {
    pub fn status(status: FileStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn staged_at(mut self, at: DateTime<Utc>) -> Self {
        self.staged_at = Some(at);
        self
    }

    pub fn job_finished_at(mut self, at: DateTime<Utc>) -> Self {
        self.job_finished_at = Some(at);
        self
    }

    pub fn target(mut self, target: Option<TargetTable>) -> Self {
        self.target = target;
        self
    }
}

/// A staged file that has work pending, in flight, or that failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    pub staged_path: String,
    pub raw_path: String,
    pub staging_dir: String,
    #[serde(default, deserialize_with = "deserialize_partition")]
    pub partition: Option<String>,
    pub status: FileStatus,
    pub staged_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub target: Option<TargetTable>,
}

impl StageRecord {
    pub fn new(
        staged_path: impl Into<String>,
        raw_path: impl Into<String>,
        staging_dir: impl Into<String>,
        partition: Option<String>,
        staged_at: DateTime<Utc>,
    ) -> Self {
        Self {
            staged_path: staged_path.into(),
            raw_path: raw_path.into(),
            staging_dir: staging_dir.into(),
            partition,
            status: FileStatus::Stage,
            staged_at,
            submitted_at: None,
            finished_at: None,
            target: None,
        }
    }

    pub fn apply(&mut self, patch: &StagePatch) {
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(at) = patch.submitted_at {
            self.submitted_at = Some(at);
        }
        if let Some(at) = patch.finished_at {
            self.finished_at = Some(at);
        }
        if let Some(target) = &patch.target {
            self.target = Some(target.clone());
        }
    }
}

/// Partial update of a [`StageRecord`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StagePatch {
    pub status: Option<FileStatus>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub target: Option<TargetTable>,
}

impl StagePatch {
    pub fn submitted(at: DateTime<Utc>, target: TargetTable) -> Self {
        Self {
            status: Some(FileStatus::Processing),
            submitted_at: Some(at),
            target: Some(target),
            ..Default::default()
        }
    }

    pub fn finished(status: FileStatus, at: DateTime<Utc>) -> Self {
        Self {
            status: Some(status),
            finished_at: Some(at),
            ..Default::default()
        }
    }
}

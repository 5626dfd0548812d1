//! Inbound event shapes

use dlctl_common::types::{deserialize_partition, ControlRecord, FileStatus};
use serde::{Deserialize, Serialize};

use crate::cluster::StepState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeType {
    Insert,
    Modify,
    Remove,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeKeys {
    pub raw_path: String,
}

/// The fields of a control record that the promoter reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlImage {
    pub raw_path: String,
    #[serde(alias = "file_status")]
    pub status: FileStatus,
    pub staged_path: String,
    pub staging_dir: String,
    #[serde(default, deserialize_with = "deserialize_partition")]
    pub partition: Option<String>,
}

impl From<&ControlRecord> for ControlImage {
    fn from(record: &ControlRecord) -> Self {
        Self {
            raw_path: record.raw_path.clone(),
            status: record.status,
            staged_path: record.staged_path.clone(),
            staging_dir: record.staging_dir.clone(),
            partition: record.partition.clone(),
        }
    }
}

/// One entry of the control-record change feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlChangeEvent {
    pub event_type: ChangeType,
    pub keys: ChangeKeys,
    /// Absent on removals.
    #[serde(default)]
    pub new_image: Option<ControlImage>,
}

impl ControlChangeEvent {
    pub fn modified(record: &ControlRecord) -> Self {
        Self {
            event_type: ChangeType::Modify,
            keys: ChangeKeys {
                raw_path: record.raw_path.clone(),
            },
            new_image: Some(ControlImage::from(record)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeBatch {
    pub records: Vec<ControlChangeEvent>,
}

/// Cluster step state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepEvent {
    pub step_id: String,
    pub step_name: String,
    pub cluster_id: String,
    pub state: StepState,
    #[serde(default)]
    pub message: Option<String>,
}

/// Submitter invocation. `source` is the name of the scheduled source that
/// fired it, if any; `skip` excludes one more status from the scan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitRequest {
    #[serde(default, alias = "cluster_name")]
    pub source: Option<String>,
    #[serde(default)]
    pub skip: Option<FileStatus>,
}

impl SubmitRequest {
    /// A run fired by the retry trigger.
    pub fn retry(source: impl Into<String>) -> Self {
        Self {
            source: Some(source.into()),
            skip: Some(FileStatus::Processing),
        }
    }
}

//! Domain types shared across dlctl
//!
//! The lifecycle revolves around three keyed records:
//!
//! - [`ControlRecord`]: one per raw file, keyed by raw path
//! - [`StageRecord`]: one per staged file awaiting or running a job, keyed by staged path
//! - [`JobCatalogEntry`]: job configuration, keyed by staging directory
//!
//! Paths are object URIs of the form `s3://container/key`, see [`ObjectUri`].

mod catalog;
mod records;
mod status;

pub use catalog::{JobCatalogEntry, ParamsMode};
pub use records::{
    deserialize_partition, ControlPatch, ControlRecord, StagePatch, StageRecord, TargetTable,
};
pub use status::FileStatus;

use serde::{Deserialize, Serialize};

/// URI scheme used for every raw, staged and staging-directory path.
pub const URI_SCHEME: &str = "s3://";

/// A `container` + `key` pair rendered as `s3://container/key`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectUri {
    pub container: String,
    pub key: String,
}

impl ObjectUri {
    pub fn new(container: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            key: key.into(),
        }
    }

    /// Parse `s3://container/key`. Returns `None` for anything without the
    /// scheme, an empty container or an empty key.
    pub fn parse(uri: &str) -> Option<Self> {
        let rest = uri.strip_prefix(URI_SCHEME)?;
        let (container, key) = rest.split_once('/')?;
        if container.is_empty() || key.is_empty() {
            return None;
        }
        Some(Self::new(container, key))
    }
}

impl std::fmt::Display for ObjectUri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}/{}", URI_SCHEME, self.container, self.key)
    }
}

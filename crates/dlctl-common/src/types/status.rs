use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::DlctlError;

/// Lifecycle status of a file.
///
/// Happy path: `INITIAL_LOAD -> STAGE -> PROCESSING -> LOADED`.
/// `FAILED` and `CANCELED` are only reachable from `PROCESSING`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileStatus {
    InitialLoad,
    Stage,
    Processing,
    Loaded,
    Failed,
    Canceled,
}

impl FileStatus {
    pub const ALL: [FileStatus; 6] = [
        FileStatus::InitialLoad,
        FileStatus::Stage,
        FileStatus::Processing,
        FileStatus::Loaded,
        FileStatus::Failed,
        FileStatus::Canceled,
    ];

    pub const TERMINAL: [FileStatus; 3] =
        [FileStatus::Loaded, FileStatus::Failed, FileStatus::Canceled];

    pub fn as_str(self) -> &'static str {
        match self {
            FileStatus::InitialLoad => "INITIAL_LOAD",
            FileStatus::Stage => "STAGE",
            FileStatus::Processing => "PROCESSING",
            FileStatus::Loaded => "LOADED",
            FileStatus::Failed => "FAILED",
            FileStatus::Canceled => "CANCELED",
        }
    }

    pub fn is_terminal(self) -> bool {
        Self::TERMINAL.contains(&self)
    }

    fn rank(self) -> u8 {
        match self {
            FileStatus::InitialLoad => 0,
            FileStatus::Stage => 1,
            FileStatus::Processing => 2,
            FileStatus::Loaded | FileStatus::Failed | FileStatus::Canceled => 3,
        }
    }

    /// Whether moving from `self` to `next` keeps the status monotonic.
    ///
    /// Skipping forward is allowed (a control record goes from `STAGE`
    /// straight to `LOADED`), going back or leaving a terminal state is not.
    pub fn can_advance_to(self, next: FileStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            FileStatus::Failed | FileStatus::Canceled => self == FileStatus::Processing,
            _ => next.rank() > self.rank(),
        }
    }

    /// Statuses `next` may be reached from. Used as the expected set of a
    /// conditional update.
    pub fn predecessors(next: FileStatus) -> Vec<FileStatus> {
        Self::ALL
            .into_iter()
            .filter(|s| s.can_advance_to(next))
            .collect()
    }
}

impl std::fmt::Display for FileStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileStatus {
    type Err = DlctlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s.trim()))
            // Cluster events spell it the American way
            .or_else(|| s.trim().eq_ignore_ascii_case("CANCELLED").then_some(FileStatus::Canceled))
            .ok_or_else(|| DlctlError::InvalidStatus(s.to_string()))
    }
}

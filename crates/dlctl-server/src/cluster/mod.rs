//! Execution cluster adapter
//!
//! The cluster runs one step per staged file. Its step queue has a hard
//! capacity; a submission over that limit comes back as
//! [`SubmitError::CapacityExceeded`], which callers treat as backpressure
//! rather than failure.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod emr;
pub mod memory;

pub use emr::EmrCluster;
pub use memory::MemoryCluster;

/// Message fragment the cluster uses when its active-step limit is reached.
pub const CAPACITY_MESSAGE: &str = "Maximum number of active steps";

/// Jar that runs an arbitrary command on the primary node.
pub const COMMAND_RUNNER_JAR: &str = "command-runner.jar";

/// Regional jar that runs a script fetched from object storage.
pub fn script_runner_jar(region: &str) -> String {
    format!("s3://{region}.elasticmapreduce/libs/script-runner/script-runner.jar")
}

pub type ClusterResult<T> = std::result::Result<T, ClusterError>;

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("Cluster request failed: {0}")]
    Api(String),
}

#[derive(Debug, Error)]
pub enum SubmitError {
    /// The step queue is full. Not an operator-facing failure.
    #[error("Cluster step capacity exceeded: {0}")]
    CapacityExceeded(String),

    #[error(transparent)]
    Cluster(#[from] ClusterError),
}

impl SubmitError {
    /// Classify a raw error message from the cluster API.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        if message.contains(CAPACITY_MESSAGE) {
            SubmitError::CapacityExceeded(message)
        } else {
            SubmitError::Cluster(ClusterError::Api(message))
        }
    }

    pub fn is_capacity(&self) -> bool {
        matches!(self, SubmitError::CapacityExceeded(_))
    }
}

/// One step to add to the cluster. Failing steps never stop the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStep {
    pub name: String,
    pub jar: String,
    pub args: Vec<String>,
}

/// Step state as reported by the cluster or carried by a lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum StepState {
    Pending,
    CancelPending,
    Running,
    Completed,
    Cancelled,
    Failed,
    Interrupted,
    Other(String),
}

impl StepState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepState::Completed | StepState::Cancelled | StepState::Failed | StepState::Interrupted
        )
    }

    pub fn as_str(&self) -> &str {
        match self {
            StepState::Pending => "PENDING",
            StepState::CancelPending => "CANCEL_PENDING",
            StepState::Running => "RUNNING",
            StepState::Completed => "COMPLETED",
            StepState::Cancelled => "CANCELLED",
            StepState::Failed => "FAILED",
            StepState::Interrupted => "INTERRUPTED",
            StepState::Other(other) => other,
        }
    }

    /// Counts against the cluster's active-step limit.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            StepState::Pending | StepState::Running | StepState::CancelPending
        )
    }
}

impl From<String> for StepState {
    fn from(value: String) -> Self {
        match value.to_ascii_uppercase().as_str() {
            "PENDING" => StepState::Pending,
            "CANCEL_PENDING" => StepState::CancelPending,
            "RUNNING" => StepState::Running,
            "COMPLETED" => StepState::Completed,
            "CANCELLED" | "CANCELED" => StepState::Cancelled,
            "FAILED" => StepState::Failed,
            "INTERRUPTED" => StepState::Interrupted,
            _ => StepState::Other(value),
        }
    }
}

impl From<StepState> for String {
    fn from(state: StepState) -> Self {
        state.as_str().to_string()
    }
}

impl std::fmt::Display for StepState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Id of the cluster named `name` in a starting, running or waiting state.
    async fn find_active_cluster(&self, name: &str) -> ClusterResult<Option<String>>;

    /// Add a step; returns the step id.
    async fn add_step(&self, cluster_id: &str, step: &JobStep) -> Result<String, SubmitError>;

    async fn step_state(&self, cluster_id: &str, step_id: &str) -> ClusterResult<StepState>;

    async fn terminate(&self, cluster_id: &str) -> ClusterResult<()>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_classification() {
        let err = SubmitError::from_message(
            "Maximum number of active steps(State = 'Running', 'Pending' or 'Cancel_Pending') \
             for cluster exceeded.",
        );
        assert!(err.is_capacity());
        assert!(!SubmitError::from_message("Access denied").is_capacity());
    }

    #[test]
    fn test_script_runner_jar_follows_region() {
        assert_eq!(
            script_runner_jar("sa-east-1"),
            "s3://sa-east-1.elasticmapreduce/libs/script-runner/script-runner.jar"
        );
    }

    #[test]
    fn test_step_state_wire_format() {
        let state: StepState = serde_json::from_str("\"CANCELLED\"").unwrap();
        assert_eq!(state, StepState::Cancelled);
        let state: StepState = serde_json::from_str("\"completed\"").unwrap();
        assert_eq!(state, StepState::Completed);
        let state: StepState = serde_json::from_str("\"WAITING\"").unwrap();
        assert_eq!(state, StepState::Other("WAITING".into()));
        assert_eq!(serde_json::to_string(&StepState::Failed).unwrap(), "\"FAILED\"");
    }
}

//! In-process cluster with a bounded step queue

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    ClusterClient, ClusterError, ClusterResult, JobStep, StepState, SubmitError, CAPACITY_MESSAGE,
};

#[derive(Debug, Clone)]
pub struct SubmittedStep {
    pub cluster_id: String,
    pub step_id: String,
    pub step: JobStep,
    pub state: StepState,
}

#[derive(Debug)]
struct Cluster {
    id: String,
    name: String,
    terminated: bool,
}

#[derive(Debug, Default)]
struct Inner {
    clusters: Vec<Cluster>,
    steps: Vec<SubmittedStep>,
    /// Step name to the error message `add_step` answers with
    rejections: HashMap<String, String>,
}

/// Accepts steps until `capacity` of them are active, then rejects with the
/// same message a real cluster uses.
#[derive(Debug)]
pub struct MemoryCluster {
    capacity: usize,
    inner: Mutex<Inner>,
}

impl MemoryCluster {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Register a running cluster and return its id.
    pub async fn launch(&self, name: &str) -> String {
        let id = format!("j-{}", Uuid::new_v4().simple());
        self.inner.lock().await.clusters.push(Cluster {
            id: id.clone(),
            name: name.to_string(),
            terminated: false,
        });
        id
    }

    pub async fn is_terminated(&self, cluster_id: &str) -> bool {
        self.inner
            .lock()
            .await
            .clusters
            .iter()
            .any(|c| c.id == cluster_id && c.terminated)
    }

    pub async fn steps(&self) -> Vec<SubmittedStep> {
        self.inner.lock().await.steps.clone()
    }

    /// Make every later `add_step` for a step named `name` fail with `message`.
    pub async fn reject_step(&self, name: &str, message: &str) {
        self.inner
            .lock()
            .await
            .rejections
            .insert(name.to_string(), message.to_string());
    }

    /// Move a step to `state`; returns whether the step exists.
    pub async fn set_step_state(&self, step_id: &str, state: StepState) -> bool {
        let mut inner = self.inner.lock().await;
        match inner.steps.iter_mut().find(|s| s.step_id == step_id) {
            Some(step) => {
                step.state = state;
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl ClusterClient for MemoryCluster {
    async fn find_active_cluster(&self, name: &str) -> ClusterResult<Option<String>> {
        Ok(self
            .inner
            .lock()
            .await
            .clusters
            .iter()
            .find(|c| c.name == name && !c.terminated)
            .map(|c| c.id.clone()))
    }

    async fn add_step(&self, cluster_id: &str, step: &JobStep) -> Result<String, SubmitError> {
        let mut inner = self.inner.lock().await;

        if !inner.clusters.iter().any(|c| c.id == cluster_id && !c.terminated) {
            return Err(ClusterError::Api(format!("Cluster {cluster_id} is not active")).into());
        }

        if let Some(message) = inner.rejections.get(&step.name) {
            return Err(SubmitError::from_message(message.clone()));
        }

        let active = inner
            .steps
            .iter()
            .filter(|s| s.cluster_id == cluster_id && s.state.is_active())
            .count();
        if active >= self.capacity {
            return Err(SubmitError::CapacityExceeded(format!(
                "{CAPACITY_MESSAGE}(State = 'Running', 'Pending' or 'Cancel_Pending') for cluster exceeded."
            )));
        }

        let step_id = format!("s-{}", Uuid::new_v4().simple());
        inner.steps.push(SubmittedStep {
            cluster_id: cluster_id.to_string(),
            step_id: step_id.clone(),
            step: step.clone(),
            state: StepState::Pending,
        });
        Ok(step_id)
    }

    async fn step_state(&self, cluster_id: &str, step_id: &str) -> ClusterResult<StepState> {
        self.inner
            .lock()
            .await
            .steps
            .iter()
            .find(|s| s.cluster_id == cluster_id && s.step_id == step_id)
            .map(|s| s.state.clone())
            .ok_or_else(|| ClusterError::Api(format!("Step {step_id} not found")))
    }

    async fn terminate(&self, cluster_id: &str) -> ClusterResult<()> {
        let mut inner = self.inner.lock().await;
        let cluster = inner
            .clusters
            .iter_mut()
            .find(|c| c.id == cluster_id)
            .ok_or_else(|| ClusterError::Api(format!("Cluster {cluster_id} not found")))?;
        cluster.terminated = true;
        Ok(())
    }
}

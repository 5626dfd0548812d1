//! Synchronous wait on a cluster step

use std::time::Duration;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::debug;

use crate::cluster::{ClusterClient, ClusterResult, StepState};

pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Shorter intervals are raised to this.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    pub timeout: Duration,
    pub interval: Duration,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_WAIT_TIMEOUT,
            interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Completed,
    Failed,
    Cancelled,
    /// The step was still active when the timeout ran out.
    Timeout,
}

impl WaitOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            WaitOutcome::Completed => "COMPLETED",
            WaitOutcome::Failed => "FAILED",
            WaitOutcome::Cancelled => "CANCELLED",
            WaitOutcome::Timeout => "TIMEOUT",
        }
    }
}

/// Poll the step's state until it ends or `policy.timeout` elapses.
pub async fn wait_for_step(
    cluster: &dyn ClusterClient,
    cluster_id: &str,
    step_id: &str,
    policy: WaitPolicy,
) -> ClusterResult<WaitOutcome> {
    let poll = async {
        let mut ticks = interval(policy.interval.max(MIN_POLL_INTERVAL));
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticks.tick().await;
            let state = cluster.step_state(cluster_id, step_id).await?;
            debug!(step_id, %state, "Polled step");
            match state {
                StepState::Completed => return Ok(WaitOutcome::Completed),
                StepState::Failed | StepState::Interrupted => return Ok(WaitOutcome::Failed),
                StepState::Cancelled => return Ok(WaitOutcome::Cancelled),
                _ => {}
            }
        }
    };

    match timeout(policy.timeout, poll).await {
        Ok(result) => result,
        Err(_) => Ok(WaitOutcome::Timeout),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::cluster::{MemoryCluster, JobStep};
    use std::sync::Arc;

    async fn running_step() -> (Arc<MemoryCluster>, String, String) {
        let cluster = Arc::new(MemoryCluster::new(5));
        let cluster_id = cluster.launch("dlctl-cluster").await;
        let step_id = cluster
            .add_step(
                &cluster_id,
                &JobStep {
                    name: "s3://staging/dummy/a.txt".into(),
                    jar: "command-runner.jar".into(),
                    args: vec![],
                },
            )
            .await
            .unwrap();
        (cluster, cluster_id, step_id)
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_sees_completion() {
        let (cluster, cluster_id, step_id) = running_step().await;

        let finisher = {
            let cluster = cluster.clone();
            let step_id = step_id.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(2)).await;
                cluster.set_step_state(&step_id, StepState::Completed).await;
            })
        };

        let outcome = wait_for_step(cluster.as_ref(), &cluster_id, &step_id, WaitPolicy::default())
            .await
            .unwrap();
        assert_eq!(outcome, WaitOutcome::Completed);
        finisher.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_times_out() {
        let (cluster, cluster_id, step_id) = running_step().await;
        let outcome = wait_for_step(
            cluster.as_ref(),
            &cluster_id,
            &step_id,
            WaitPolicy {
                timeout: Duration::from_secs(5),
                interval: Duration::from_millis(200),
            },
        )
        .await
        .unwrap();
        assert_eq!(outcome, WaitOutcome::Timeout);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupted_counts_as_failed() {
        let (cluster, cluster_id, step_id) = running_step().await;
        cluster.set_step_state(&step_id, StepState::Interrupted).await;
        let outcome = wait_for_step(cluster.as_ref(), &cluster_id, &step_id, WaitPolicy::default())
            .await
            .unwrap();
        assert_eq!(outcome, WaitOutcome::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_still_polls() {
        let (cluster, cluster_id, step_id) = running_step().await;
        cluster.set_step_state(&step_id, StepState::Completed).await;
        let outcome = wait_for_step(
            cluster.as_ref(),
            &cluster_id,
            &step_id,
            WaitPolicy {
                timeout: Duration::from_secs(1),
                interval: Duration::ZERO,
            },
        )
        .await
        .unwrap();
        assert_eq!(outcome, WaitOutcome::Completed);
    }
}

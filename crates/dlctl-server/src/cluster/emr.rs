use async_trait::async_trait;
use aws_sdk_emr::{
    error::{DisplayErrorContext, ProvideErrorMetadata},
    types::{ActionOnFailure, ClusterState, HadoopJarStepConfig, StepConfig},
    Client,
};
use tracing::{debug, info, instrument};

use super::{ClusterClient, ClusterError, ClusterResult, JobStep, StepState, SubmitError};

/// EMR-backed cluster client.
#[derive(Clone)]
pub struct EmrCluster {
    client: Client,
}

impl EmrCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn step_config(step: &JobStep) -> StepConfig {
        let jar_step = HadoopJarStepConfig::builder()
            .jar(&step.jar)
            .set_args(Some(step.args.clone()))
            .build();

        StepConfig::builder()
            .name(&step.name)
            .action_on_failure(ActionOnFailure::Continue)
            .hadoop_jar_step(jar_step)
            .build()
    }
}

#[async_trait]
impl ClusterClient for EmrCluster {
    #[instrument(skip(self))]
    async fn find_active_cluster(&self, name: &str) -> ClusterResult<Option<String>> {
        let mut marker: Option<String> = None;

        loop {
            let page = self
                .client
                .list_clusters()
                .set_cluster_states(Some(vec![
                    ClusterState::Starting,
                    ClusterState::Running,
                    ClusterState::Waiting,
                ]))
                .set_marker(marker.take())
                .send()
                .await
                .map_err(|e| ClusterError::Api(DisplayErrorContext(&e).to_string()))?;

            if let Some(id) = page
                .clusters()
                .iter()
                .find(|c| c.name() == Some(name))
                .and_then(|c| c.id())
            {
                debug!(cluster_id = %id, "Found active cluster");
                return Ok(Some(id.to_string()));
            }

            match page.marker() {
                Some(next) => marker = Some(next.to_string()),
                None => return Ok(None),
            }
        }
    }

    #[instrument(skip(self, step), fields(step = %step.name))]
    async fn add_step(&self, cluster_id: &str, step: &JobStep) -> Result<String, SubmitError> {
        let config = Self::step_config(step);

        let output = self
            .client
            .add_job_flow_steps()
            .job_flow_id(cluster_id)
            .steps(config)
            .send()
            .await
            .map_err(|e| {
                let message = e
                    .as_service_error()
                    .and_then(|se| se.message())
                    .map(str::to_string)
                    .unwrap_or_else(|| DisplayErrorContext(&e).to_string());
                SubmitError::from_message(message)
            })?;

        let step_id = output
            .step_ids()
            .first()
            .cloned()
            .ok_or_else(|| ClusterError::Api("Cluster returned no step id".to_string()))?;

        info!(%step_id, "Step submitted");
        Ok(step_id)
    }

    #[instrument(skip(self))]
    async fn step_state(&self, cluster_id: &str, step_id: &str) -> ClusterResult<StepState> {
        let output = self
            .client
            .describe_step()
            .cluster_id(cluster_id)
            .step_id(step_id)
            .send()
            .await
            .map_err(|e| ClusterError::Api(DisplayErrorContext(&e).to_string()))?;

        output
            .step()
            .and_then(|s| s.status())
            .and_then(|s| s.state())
            .map(|s| StepState::from(s.as_str().to_string()))
            .ok_or_else(|| ClusterError::Api(format!("No state reported for step {step_id}")))
    }

    #[instrument(skip(self))]
    async fn terminate(&self, cluster_id: &str) -> ClusterResult<()> {
        self.client
            .terminate_job_flows()
            .job_flow_ids(cluster_id)
            .send()
            .await
            .map_err(|e| ClusterError::Api(DisplayErrorContext(&e).to_string()))?;

        info!("Cluster termination requested");
        Ok(())
    }
}

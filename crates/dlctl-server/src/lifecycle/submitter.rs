//! Job submitter
//!
//! Scans pending stage records and adds one cluster step per record. The
//! cluster's step queue is bounded; when it rejects a step for capacity the
//! run stops and the retry trigger is switched on, so the remainder is picked
//! up by later retry runs. A retry run that gets through its whole scan
//! switches the trigger off again.

use chrono::Utc;
use dlctl_common::types::{
    FileStatus, JobCatalogEntry, ObjectUri, ParamsMode, StagePatch, StageRecord, TargetTable,
    URI_SCHEME,
};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use super::events::SubmitRequest;
use crate::cluster::{script_runner_jar, ClusterClient, JobStep, SubmitError, COMMAND_RUNNER_JAR};
use crate::config::PipelineConfig;
use crate::notify::{Alert, Notifier};
use crate::outcome::Outcome;
use crate::store::{ControlStore, JobCatalog};
use crate::trigger::{RetryTrigger, TriggerState};

const COMPONENT: &str = "job-submitter";

/// Name of the setup step; not a staged path, so the validator ignores it.
pub const SETUP_STEP_NAME: &str = "dlctl-setup";

pub const NO_VALID_CLUSTER: &str = "No valid cluster";

const SPARK_SUBMIT: &str = "/usr/bin/spark-submit";
const SPARK_ENCODING_CONF: &str = "spark.yarn.appMasterEnv.PYTHONIOENCODING=utf8";

/// Settings the submitter reads from the pipeline configuration.
#[derive(Debug, Clone)]
pub struct SubmitterSettings {
    pub cluster_name: String,
    pub target_container: String,
    pub program_prefix: String,
    pub setup_script: String,
    pub program_source: String,
    pub region: String,
}

impl From<&PipelineConfig> for SubmitterSettings {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            cluster_name: config.cluster_name.clone(),
            target_container: config.target_container.clone(),
            program_prefix: config.program_prefix.clone(),
            setup_script: config.setup_script.clone(),
            program_source: config.program_source.clone(),
            region: config.aws_region.clone(),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SubmitSummary {
    pub submitted: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl fmt::Display for SubmitSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "submitted {}, skipped {}, failed {}",
            self.submitted, self.skipped, self.failed
        )
    }
}

/// Resolve a catalog target location; bare paths live in the target container.
pub fn target_table(entry: &JobCatalogEntry, target_container: &str) -> TargetTable {
    let location = if entry.target_location.contains(URI_SCHEME) {
        entry.target_location.clone()
    } else {
        ObjectUri::new(target_container, entry.target_location.trim_start_matches('/')).to_string()
    };
    TargetTable {
        database: entry.target_database.clone(),
        table: entry.target_table.clone(),
        location,
    }
}

/// Arguments of the step that runs `entry`'s program for `record`.
pub fn build_step_args(
    entry: &JobCatalogEntry,
    record: &StageRecord,
    target: &TargetTable,
    program_prefix: &str,
) -> Vec<String> {
    let mut args = vec![
        SPARK_SUBMIT.to_string(),
        "--conf".to_string(),
        SPARK_ENCODING_CONF.to_string(),
        format!("{program_prefix}{}", entry.program_name()),
    ];

    match entry.params_mode {
        ParamsMode::Structured => {}
        ParamsMode::Positional => {
            if let Some(params) = &entry.params {
                args.extend(params.split(' ').filter(|p| !p.is_empty()).map(String::from));
            }
        }
        ParamsMode::None => {
            args.extend([
                entry.source_database.clone(),
                entry.source_table.clone(),
                record.staging_dir.clone(),
                target.database.clone(),
                target.table.clone(),
                target.location.clone(),
            ]);
            if let (Some(key), Some(value)) = (&entry.partition_key, &record.partition) {
                args.push(format!("{key}={value}"));
            }
        }
    }

    args
}

pub struct JobSubmitter {
    store: Arc<dyn ControlStore>,
    catalog: Arc<dyn JobCatalog>,
    cluster: Arc<dyn ClusterClient>,
    trigger: Arc<dyn RetryTrigger>,
    notifier: Arc<dyn Notifier>,
    settings: SubmitterSettings,
}

impl JobSubmitter {
    pub fn new(
        store: Arc<dyn ControlStore>,
        catalog: Arc<dyn JobCatalog>,
        cluster: Arc<dyn ClusterClient>,
        trigger: Arc<dyn RetryTrigger>,
        notifier: Arc<dyn Notifier>,
        settings: SubmitterSettings,
    ) -> Self {
        Self {
            store,
            catalog,
            cluster,
            trigger,
            notifier,
            settings,
        }
    }

    fn setup_step(&self) -> JobStep {
        JobStep {
            name: SETUP_STEP_NAME.to_string(),
            jar: script_runner_jar(&self.settings.region),
            args: vec![
                self.settings.setup_script.clone(),
                self.settings.program_source.clone(),
            ],
        }
    }

    async fn fail(&self, item: &str, summary: String, error: impl fmt::Display) -> Outcome {
        Outcome::failed(
            self.notifier.as_ref(),
            Alert::failure(COMPONENT, item, &summary, error),
            summary,
        )
        .await
    }

    #[instrument(skip(self, request), fields(source = ?request.source, skip = ?request.skip))]
    pub async fn run(&self, request: &SubmitRequest) -> Outcome {
        let cluster_name = self.settings.cluster_name.as_str();

        if request
            .source
            .as_deref()
            .is_some_and(|source| source != cluster_name)
        {
            warn!("Invocation source does not match the configured cluster");
            return Outcome::skipped(NO_VALID_CLUSTER);
        }

        let cluster_id = match self.cluster.find_active_cluster(cluster_name).await {
            Ok(Some(id)) => id,
            Ok(None) => {
                warn!(cluster_name, "No active cluster");
                return Outcome::skipped(NO_VALID_CLUSTER);
            }
            Err(e) => {
                return self
                    .fail(cluster_name, format!("Unable to look up cluster {cluster_name}"), e)
                    .await;
            }
        };

        match self.cluster.add_step(&cluster_id, &self.setup_step()).await {
            Ok(step_id) => debug!(%step_id, "Setup step added"),
            Err(SubmitError::CapacityExceeded(message)) => {
                info!(%message, "Cluster queue full before setup");
                return self.defer(SubmitSummary::default()).await;
            }
            Err(e) => {
                return self
                    .fail(&cluster_id, "Unable to add setup step".to_string(), e)
                    .await;
            }
        }

        let mut exclude = FileStatus::TERMINAL.to_vec();
        exclude.extend(request.skip);
        let pending = match self.store.scan_stage(&exclude).await {
            Ok(records) => records,
            Err(e) => {
                return self
                    .fail(&cluster_id, "Unable to scan stage records".to_string(), e)
                    .await;
            }
        };

        let mut summary = SubmitSummary::default();

        for record in pending {
            let entry = match self.catalog.get_entry(&record.staging_dir).await {
                Ok(Some(entry)) if entry.enabled => entry,
                Ok(Some(_)) => {
                    info!(staging_dir = %record.staging_dir, "Catalog entry disabled");
                    summary.skipped += 1;
                    continue;
                }
                Ok(None) => {
                    info!(staging_dir = %record.staging_dir, "No catalog entry");
                    summary.skipped += 1;
                    continue;
                }
                Err(e) => {
                    self.notifier
                        .notify(&Alert::failure(
                            COMPONENT,
                            &record.staged_path,
                            &format!("Unable to read catalog entry for {}", record.staging_dir),
                            &e,
                        ))
                        .await;
                    summary.failed += 1;
                    continue;
                }
            };

            let target = target_table(&entry, &self.settings.target_container);
            let step = JobStep {
                name: record.staged_path.clone(),
                jar: COMMAND_RUNNER_JAR.to_string(),
                args: build_step_args(&entry, &record, &target, &self.settings.program_prefix),
            };

            match self.cluster.add_step(&cluster_id, &step).await {
                Ok(step_id) => {
                    info!(%step_id, staged_path = %record.staged_path, "Step submitted");
                    let patch = StagePatch::submitted(Utc::now(), target);
                    match self.store.update_stage(&record.staged_path, &patch).await {
                        Ok(_) => summary.submitted += 1,
                        Err(e) => {
                            self.notifier
                                .notify(&Alert::failure(
                                    COMPONENT,
                                    &record.staged_path,
                                    &format!(
                                        "Step {step_id} submitted but stage record not updated"
                                    ),
                                    &e,
                                ))
                                .await;
                            summary.failed += 1;
                        }
                    }
                }
                Err(SubmitError::CapacityExceeded(message)) => {
                    info!(%message, staged_path = %record.staged_path, "Cluster queue full");
                    return self.defer(summary).await;
                }
                Err(e) => {
                    self.notifier
                        .notify(&Alert::failure(
                            COMPONENT,
                            &record.staged_path,
                            "Unable to submit step",
                            &e,
                        ))
                        .await;
                    summary.failed += 1;
                }
            }
        }

        if request.skip.is_some() {
            if let Err(e) = self.trigger.disable().await {
                return self
                    .fail(cluster_name, "Unable to disable retry trigger".to_string(), e)
                    .await;
            }
            info!("Backlog drained, retry trigger disabled");
        }

        Outcome::done(format!("Submission complete: {summary}"))
    }

    async fn defer(&self, summary: SubmitSummary) -> Outcome {
        match self.trigger.state().await {
            Ok(TriggerState::Enabled) => Outcome::done(format!(
                "Submitted partial batch, remainder queued for retry (retry already scheduled; {summary})"
            )),
            Ok(TriggerState::Disabled) => match self.trigger.enable().await {
                Ok(()) => {
                    info!("Retry trigger enabled");
                    Outcome::done(format!(
                        "Submitted partial batch, remainder queued for retry ({summary})"
                    ))
                }
                Err(e) => {
                    self.fail(
                        &self.settings.cluster_name,
                        "Unable to enable retry trigger".to_string(),
                        e,
                    )
                    .await
                }
            },
            Err(e) => {
                self.fail(
                    &self.settings.cluster_name,
                    "Unable to read retry trigger state".to_string(),
                    e,
                )
                .await
            }
        }
    }
}

//! Client construction and handler wiring
//!
//! Every handler receives its clients as `Arc<dyn Trait>`; this module is the
//! only place that decides which implementation sits behind each one.

use anyhow::{Context, Result};
use aws_config::{BehaviorVersion, Region};
use dlctl_common::types::JobCatalogEntry;
use sqlx::postgres::PgPoolOptions;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::info;

use crate::cluster::{ClusterClient, EmrCluster, MemoryCluster};
use crate::config::{Backend, Config, PipelineConfig};
use crate::ingest::{IngestionRouter, MatcherRegistry};
use crate::lifecycle::{
    ChangeFeed, ControlChangeEvent, JobSubmitter, JobValidator, StageMarker, StagePromoter,
    SubmitterSettings,
};
use crate::notify::{LogNotifier, Notifier, SnsNotifier};
use crate::storage::{config::StorageConfig, MemoryStorage, ObjectStore, S3Storage};
use crate::store::{ControlStore, JobCatalog, MemoryStore, PgStore, TableNames};
use crate::trigger::{EventBridgeTrigger, LocalTrigger, RetryTrigger};

/// Active-step limit of the in-process cluster, the same as EMR's default.
pub const MEMORY_CLUSTER_CAPACITY: usize = 256;

/// Queue depth between the stage marker and the promoter.
pub const CHANGE_FEED_CAPACITY: usize = 1024;

/// The external systems a pipeline talks to.
#[derive(Clone)]
pub struct PipelineClients {
    pub store: Arc<dyn ControlStore>,
    pub catalog: Arc<dyn JobCatalog>,
    pub storage: Arc<dyn ObjectStore>,
    pub cluster: Arc<dyn ClusterClient>,
    pub trigger: Arc<dyn RetryTrigger>,
    pub notifier: Arc<dyn Notifier>,
}

impl PipelineClients {
    pub async fn connect(config: &Config) -> Result<Self> {
        match config.backend {
            Backend::Aws => Self::aws(config).await,
            Backend::Memory => Self::memory(&config.pipeline).await,
        }
    }

    /// S3, SNS, EMR, EventBridge and PostgreSQL.
    pub async fn aws(config: &Config) -> Result<Self> {
        let pipeline = &config.pipeline;
        let shared = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(pipeline.aws_region.clone()))
            .load()
            .await;

        let pool = PgPoolOptions::new()
            .max_connections(config.database.max_connections)
            .min_connections(config.database.min_connections)
            .acquire_timeout(Duration::from_secs(config.database.connect_timeout_secs))
            .connect(&config.database.url)
            .await
            .context("Failed to connect to the control store database")?;
        info!("Database connection pool established");

        let store = Arc::new(PgStore::new(pool, TableNames::from(pipeline)));
        store
            .migrate()
            .await
            .context("Failed to run migrations")?;
        info!("Migrations completed");

        if let Some(path) = &pipeline.catalog_seed {
            for entry in load_catalog_seed(Path::new(path))? {
                store.upsert_catalog_entry(&entry).await?;
            }
        }

        let storage = S3Storage::new(StorageConfig::from_env()).await?;

        let notifier: Arc<dyn Notifier> = if pipeline.alert_channel.is_empty() {
            Arc::new(LogNotifier)
        } else {
            Arc::new(SnsNotifier::new(
                aws_sdk_sns::Client::new(&shared),
                &pipeline.alert_channel,
            ))
        };

        Ok(Self {
            store: store.clone(),
            catalog: store,
            storage: Arc::new(storage),
            cluster: Arc::new(EmrCluster::new(aws_sdk_emr::Client::new(&shared))),
            trigger: Arc::new(EventBridgeTrigger::new(
                aws_sdk_eventbridge::Client::new(&shared),
                &pipeline.retry_trigger,
            )),
            notifier,
        })
    }

    /// In-process implementations with one running cluster named after the
    /// configured cluster.
    pub async fn memory(pipeline: &PipelineConfig) -> Result<Self> {
        let store = Arc::new(MemoryStore::new());
        if let Some(path) = &pipeline.catalog_seed {
            for entry in load_catalog_seed(Path::new(path))? {
                store.put_catalog_entry(entry).await;
            }
        }

        let cluster = Arc::new(MemoryCluster::new(MEMORY_CLUSTER_CAPACITY));
        let cluster_id = cluster.launch(&pipeline.cluster_name).await;
        info!(%cluster_id, cluster_name = %pipeline.cluster_name, "In-process cluster launched");

        Ok(Self {
            store: store.clone(),
            catalog: store,
            storage: Arc::new(MemoryStorage::new()),
            cluster,
            trigger: Arc::new(LocalTrigger::new()),
            notifier: Arc::new(LogNotifier),
        })
    }
}

/// Read catalog entries from a JSON array.
pub fn load_catalog_seed(path: &Path) -> dlctl_common::Result<Vec<JobCatalogEntry>> {
    let raw = std::fs::read_to_string(path)?;
    let entries: Vec<JobCatalogEntry> = serde_json::from_str(&raw)?;
    info!(path = %path.display(), entries = entries.len(), "Loaded catalog seed");
    Ok(entries)
}

/// All lifecycle handlers, wired to one set of clients.
pub struct Pipeline {
    pub clients: PipelineClients,
    pub router: Arc<IngestionRouter>,
    pub marker: Arc<StageMarker>,
    pub promoter: Arc<StagePromoter>,
    pub submitter: Arc<JobSubmitter>,
    pub validator: Arc<JobValidator>,
    pub concurrency: usize,
}

impl Pipeline {
    /// Build the handlers. The returned receiver is the change feed the stage
    /// marker publishes to; hand it to
    /// [`spawn_promoter_worker`](crate::lifecycle::spawn_promoter_worker).
    pub fn build(
        clients: PipelineClients,
        config: &PipelineConfig,
    ) -> Result<(Self, mpsc::Receiver<ControlChangeEvent>)> {
        let (feed, changes) = ChangeFeed::channel(CHANGE_FEED_CAPACITY);
        let concurrency = config.handler_concurrency;

        let router = IngestionRouter::new(
            MatcherRegistry::builtin().context("Invalid built-in matcher pattern")?,
            clients.storage.clone(),
            clients.store.clone(),
            clients.notifier.clone(),
            &config.staging_container,
        )
        .with_concurrency(concurrency);

        let marker = StageMarker::new(
            clients.storage.clone(),
            clients.store.clone(),
            clients.notifier.clone(),
            feed,
        )
        .with_lookup_retry(
            config.stage_lookup_retries,
            Duration::from_millis(config.stage_lookup_delay_ms),
        )
        .with_concurrency(concurrency);

        let promoter = StagePromoter::new(
            clients.store.clone(),
            clients.notifier.clone(),
            &config.stage_table,
        );

        let submitter = JobSubmitter::new(
            clients.store.clone(),
            clients.catalog.clone(),
            clients.cluster.clone(),
            clients.trigger.clone(),
            clients.notifier.clone(),
            SubmitterSettings::from(config),
        );

        let validator = JobValidator::new(
            clients.store.clone(),
            clients.storage.clone(),
            clients.cluster.clone(),
            clients.notifier.clone(),
        );

        Ok((
            Self {
                clients,
                router: Arc::new(router),
                marker: Arc::new(marker),
                promoter: Arc::new(promoter),
                submitter: Arc::new(submitter),
                validator: Arc::new(validator),
                concurrency,
            },
            changes,
        ))
    }
}

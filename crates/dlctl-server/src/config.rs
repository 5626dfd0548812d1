//! Configuration management

use serde::{Deserialize, Serialize};
use std::str::FromStr;

// ============================================================================
// Server Configuration Constants
// ============================================================================

/// Default server host binding.
pub const DEFAULT_SERVER_HOST: &str = "127.0.0.1";

/// Default server port.
pub const DEFAULT_SERVER_PORT: u16 = 8080;

/// Default shutdown timeout in seconds.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

/// Default database URL for local development.
pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/dlctl";

/// Default maximum database connections in the pool.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 10;

/// Default minimum database connections in the pool.
pub const DEFAULT_DATABASE_MIN_CONNECTIONS: u32 = 1;

/// Default database connection timeout in seconds.
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;

// ============================================================================
// Pipeline Configuration Constants
// ============================================================================

pub const DEFAULT_CLUSTER_NAME: &str = "dlctl-cluster";
pub const DEFAULT_RAW_CONTAINER: &str = "raw";
pub const DEFAULT_STAGING_CONTAINER: &str = "staging";
pub const DEFAULT_TARGET_CONTAINER: &str = "analytics";
pub const DEFAULT_CONTROL_TABLE: &str = "control_records";
pub const DEFAULT_STAGE_TABLE: &str = "stage_records";
pub const DEFAULT_CATALOG_TABLE: &str = "job_catalog";
pub const DEFAULT_RETRY_TRIGGER: &str = "dlctl-submit-retry";

/// Where the setup step places job programs on cluster nodes.
pub const DEFAULT_PROGRAM_PREFIX: &str = "/home/hadoop/code/";

/// Script the setup step runs before any job step.
pub const DEFAULT_SETUP_SCRIPT: &str = "s3://programs/bootstrap/copy_programs.sh";

/// Location the setup script copies programs from.
pub const DEFAULT_PROGRAM_SOURCE: &str = "s3://programs/jobs/";

/// Interval of the in-process retry trigger.
pub const DEFAULT_RETRY_INTERVAL_SECS: u64 = 300;

/// Concurrent handlers per arrival batch or change feed.
pub const DEFAULT_HANDLER_CONCURRENCY: usize = 8;

/// Attempts to find a control record for an object that reached staging
/// before the record was written.
pub const DEFAULT_STAGE_LOOKUP_RETRIES: u32 = 5;
pub const DEFAULT_STAGE_LOOKUP_DELAY_MS: u64 = 500;

pub const DEFAULT_AWS_REGION: &str = "us-east-1";

/// Which adapters back the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// S3, SNS, EMR, EventBridge and PostgreSQL
    Aws,
    /// In-process implementations, for local runs
    #[default]
    Memory,
}

impl FromStr for Backend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "aws" => Ok(Backend::Aws),
            "memory" | "local" => Ok(Backend::Memory),
            other => Err(anyhow::anyhow!("Invalid backend: {}", other)),
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub pipeline: PipelineConfig,
    pub backend: Backend,
}

/// Server-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub shutdown_timeout_secs: u64,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
}

/// Names of the external resources the lifecycle handlers work against
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub cluster_name: String,
    pub raw_container: String,
    pub staging_container: String,
    /// Container relative catalog target locations resolve against
    pub target_container: String,
    /// Alert topic; empty means alerts only go to the log
    pub alert_channel: String,
    pub control_table: String,
    pub stage_table: String,
    pub catalog_table: String,
    pub retry_trigger: String,
    pub program_prefix: String,
    pub program_source: String,
    pub setup_script: String,
    pub retry_interval_secs: u64,
    pub handler_concurrency: usize,
    /// JSON file of catalog entries loaded at startup
    pub catalog_seed: Option<String>,
    pub stage_lookup_retries: u32,
    pub stage_lookup_delay_ms: u64,
    pub aws_region: String,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl PipelineConfig {
    /// Read the pipeline section from `DLCTL_*` variables
    pub fn from_env() -> Self {
        Self {
            cluster_name: env_or("DLCTL_CLUSTER_NAME", DEFAULT_CLUSTER_NAME),
            raw_container: env_or("DLCTL_RAW_CONTAINER", DEFAULT_RAW_CONTAINER),
            staging_container: env_or("DLCTL_STAGING_CONTAINER", DEFAULT_STAGING_CONTAINER),
            target_container: env_or("DLCTL_TARGET_CONTAINER", DEFAULT_TARGET_CONTAINER),
            alert_channel: env_or("DLCTL_ALERT_CHANNEL", ""),
            control_table: env_or("DLCTL_CONTROL_TABLE", DEFAULT_CONTROL_TABLE),
            stage_table: env_or("DLCTL_STAGE_TABLE", DEFAULT_STAGE_TABLE),
            catalog_table: env_or("DLCTL_CATALOG_TABLE", DEFAULT_CATALOG_TABLE),
            retry_trigger: env_or("DLCTL_RETRY_TRIGGER", DEFAULT_RETRY_TRIGGER),
            program_prefix: env_or("DLCTL_PROGRAM_PREFIX", DEFAULT_PROGRAM_PREFIX),
            program_source: env_or("DLCTL_PROGRAM_SOURCE", DEFAULT_PROGRAM_SOURCE),
            setup_script: env_or("DLCTL_SETUP_SCRIPT", DEFAULT_SETUP_SCRIPT),
            retry_interval_secs: env_parse(
                "DLCTL_RETRY_INTERVAL_SECS",
                DEFAULT_RETRY_INTERVAL_SECS,
            ),
            handler_concurrency: env_parse(
                "DLCTL_HANDLER_CONCURRENCY",
                DEFAULT_HANDLER_CONCURRENCY,
            ),
            catalog_seed: std::env::var("DLCTL_CATALOG_SEED").ok().filter(|p| !p.is_empty()),
            stage_lookup_retries: env_parse(
                "DLCTL_STAGE_LOOKUP_RETRIES",
                DEFAULT_STAGE_LOOKUP_RETRIES,
            ),
            stage_lookup_delay_ms: env_parse(
                "DLCTL_STAGE_LOOKUP_DELAY_MS",
                DEFAULT_STAGE_LOOKUP_DELAY_MS,
            ),
            aws_region: std::env::var("AWS_REGION")
                .unwrap_or_else(|_| DEFAULT_AWS_REGION.to_string()),
        }
    }

    /// Validate names and limits
    pub fn validate(&self) -> anyhow::Result<()> {
        for (name, value) in [
            ("cluster name", &self.cluster_name),
            ("raw container", &self.raw_container),
            ("staging container", &self.staging_container),
            ("target container", &self.target_container),
            ("retry trigger", &self.retry_trigger),
            ("program prefix", &self.program_prefix),
            ("setup script", &self.setup_script),
        ] {
            if value.trim().is_empty() {
                anyhow::bail!("Pipeline {} cannot be empty", name);
            }
        }

        if self.raw_container == self.staging_container {
            anyhow::bail!(
                "Raw and staging containers must differ (both are '{}')",
                self.raw_container
            );
        }

        for (name, table) in [
            ("control", &self.control_table),
            ("stage", &self.stage_table),
            ("catalog", &self.catalog_table),
        ] {
            if !is_identifier(table) {
                anyhow::bail!("Invalid {} table name '{}'", name, table);
            }
        }

        if self.retry_interval_secs == 0 {
            anyhow::bail!("Retry interval must be greater than 0");
        }

        if self.handler_concurrency == 0 {
            anyhow::bail!("Handler concurrency must be greater than 0");
        }

        if self.alert_channel.is_empty() {
            tracing::warn!("No alert channel configured - alerts will only be logged");
        }

        Ok(())
    }
}

/// Table names are interpolated into SQL, so only plain identifiers pass.
fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let backend = match std::env::var("DLCTL_BACKEND") {
            Ok(value) => value.parse()?,
            Err(_) => Backend::default(),
        };

        let config = Config {
            server: ServerConfig {
                host: env_or("DLCTL_HOST", DEFAULT_SERVER_HOST),
                port: env_parse("DLCTL_PORT", DEFAULT_SERVER_PORT),
                shutdown_timeout_secs: env_parse(
                    "DLCTL_SHUTDOWN_TIMEOUT",
                    DEFAULT_SHUTDOWN_TIMEOUT_SECS,
                ),
            },
            database: DatabaseConfig {
                url: env_or("DATABASE_URL", DEFAULT_DATABASE_URL),
                max_connections: env_parse(
                    "DATABASE_MAX_CONNECTIONS",
                    DEFAULT_DATABASE_MAX_CONNECTIONS,
                ),
                min_connections: env_parse(
                    "DATABASE_MIN_CONNECTIONS",
                    DEFAULT_DATABASE_MIN_CONNECTIONS,
                ),
                connect_timeout_secs: env_parse(
                    "DATABASE_CONNECT_TIMEOUT",
                    DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
                ),
            },
            pipeline: PipelineConfig::from_env(),
            backend,
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server.port == 0 {
            anyhow::bail!("Server port must be greater than 0");
        }

        if self.backend == Backend::Aws {
            if self.database.url.is_empty() {
                anyhow::bail!("Database URL cannot be empty");
            }

            if self.database.max_connections == 0 {
                anyhow::bail!("Database max_connections must be greater than 0");
            }

            if self.database.min_connections > self.database.max_connections {
                anyhow::bail!(
                    "Database min_connections ({}) cannot be greater than max_connections ({})",
                    self.database.min_connections,
                    self.database.max_connections
                );
            }
        }

        self.pipeline.validate()
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            cluster_name: DEFAULT_CLUSTER_NAME.to_string(),
            raw_container: DEFAULT_RAW_CONTAINER.to_string(),
            staging_container: DEFAULT_STAGING_CONTAINER.to_string(),
            target_container: DEFAULT_TARGET_CONTAINER.to_string(),
            alert_channel: String::new(),
            control_table: DEFAULT_CONTROL_TABLE.to_string(),
            stage_table: DEFAULT_STAGE_TABLE.to_string(),
            catalog_table: DEFAULT_CATALOG_TABLE.to_string(),
            retry_trigger: DEFAULT_RETRY_TRIGGER.to_string(),
            program_prefix: DEFAULT_PROGRAM_PREFIX.to_string(),
            program_source: DEFAULT_PROGRAM_SOURCE.to_string(),
            setup_script: DEFAULT_SETUP_SCRIPT.to_string(),
            retry_interval_secs: DEFAULT_RETRY_INTERVAL_SECS,
            handler_concurrency: DEFAULT_HANDLER_CONCURRENCY,
            catalog_seed: None,
            stage_lookup_retries: DEFAULT_STAGE_LOOKUP_RETRIES,
            stage_lookup_delay_ms: DEFAULT_STAGE_LOOKUP_DELAY_MS,
            aws_region: DEFAULT_AWS_REGION.to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: DEFAULT_SERVER_HOST.to_string(),
                port: DEFAULT_SERVER_PORT,
                shutdown_timeout_secs: DEFAULT_SHUTDOWN_TIMEOUT_SECS,
            },
            database: DatabaseConfig {
                url: DEFAULT_DATABASE_URL.to_string(),
                max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
                min_connections: DEFAULT_DATABASE_MIN_CONNECTIONS,
                connect_timeout_secs: DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
            },
            pipeline: PipelineConfig::default(),
            backend: Backend::default(),
        }
    }
}

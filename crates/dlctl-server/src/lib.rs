//! dlctl server library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Lifecycle control for files landing in a data lake: ingestion, staging,
//! job submission against a capacity-limited cluster, and completion.
//!
//! # Overview
//!
//! Each file gets a control record keyed by its raw path. Independent
//! handlers drive it forward:
//!
//! - **Ingestion router** ([`ingest`]): matches the raw key, copies the
//!   payload into staging, writes the record as `INITIAL_LOAD`
//! - **Stage marker** ([`lifecycle::StageMarker`]): moves the record to
//!   `STAGE` once the staged copy exists
//! - **Stage promoter** ([`lifecycle::StagePromoter`]): writes the stage record
//!   that the submitter works from
//! - **Job submitter** ([`lifecycle::JobSubmitter`]): adds one cluster step per
//!   pending stage record, with backpressure through the retry trigger
//! - **Job validator** ([`lifecycle::JobValidator`]): finalizes records when
//!   steps end and shuts the cluster down when idle
//!
//! Handlers share nothing but the control store and never return errors;
//! every invocation ends in an [`outcome::Outcome`].
//!
//! # Example
//!
//! ```no_run
//! use dlctl_server::{config::Config, runtime::{Pipeline, PipelineClients}};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     let clients = PipelineClients::connect(&config).await?;
//!     let (pipeline, _changes) = Pipeline::build(clients, &config.pipeline)?;
//!     let outcome = pipeline.submitter.run(&Default::default()).await;
//!     println!("{outcome}");
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod cluster;
pub mod config;
pub mod error;
pub mod ingest;
pub mod lifecycle;
pub mod middleware;
pub mod notify;
pub mod outcome;
pub mod runtime;
pub mod scheduler;
pub mod storage;
pub mod store;
pub mod trigger;
pub mod waiter;

pub use error::{AppError, AppResult};
pub use outcome::Outcome;

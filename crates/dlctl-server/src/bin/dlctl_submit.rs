//! dlctl-submit - one-shot submitter run, and synchronous step waits

use clap::{Parser, Subcommand};
use dlctl_common::logging::{init_logging, LogConfig, LogLevel, LogOutput};
use dlctl_common::types::FileStatus;
use std::process;
use std::time::Duration;
use tracing::error;

use dlctl_server::{
    config::Config,
    lifecycle::SubmitRequest,
    runtime::{Pipeline, PipelineClients},
    waiter::{wait_for_step, WaitOutcome, WaitPolicy, DEFAULT_POLL_INTERVAL, DEFAULT_WAIT_TIMEOUT},
};

#[derive(Parser, Debug)]
#[command(name = "dlctl-submit")]
#[command(author, version, about, long_about = None)]
#[command(arg_required_else_help = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Submit pending stage records to the cluster
    Run {
        /// Name of the scheduled source firing this run
        #[arg(long)]
        source: Option<String>,

        /// Also leave records in this status alone (PROCESSING for retry runs)
        #[arg(long)]
        skip: Option<FileStatus>,
    },

    /// Wait for a cluster step to finish
    Wait {
        cluster_id: String,
        step_id: String,

        #[arg(long, default_value_t = DEFAULT_WAIT_TIMEOUT.as_secs())]
        timeout_secs: u64,

        #[arg(
            long,
            default_value_t = DEFAULT_POLL_INTERVAL.as_millis() as u64,
            value_parser = clap::value_parser!(u64).range(1..)
        )]
        interval_ms: u64,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_config = LogConfig::builder()
        .level(if cli.verbose { LogLevel::Debug } else { LogLevel::Warn })
        .output(LogOutput::Console)
        .log_file_prefix("dlctl-submit")
        .build();
    let log_config = match log_config.clone().with_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Ignoring logging environment: {:#}", e);
            log_config
        }
    };
    let _log_guard = init_logging(&log_config);

    match execute(cli.command).await {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(e) => {
            error!(error = %e, "Command failed");
            eprintln!("Error: {:#}", e);
            process::exit(2);
        }
    }
}

/// Returns whether the command succeeded.
async fn execute(command: Commands) -> anyhow::Result<bool> {
    let config = Config::load()?;
    let clients = PipelineClients::connect(&config).await?;

    match command {
        Commands::Run { source, skip } => {
            let (pipeline, _changes) = Pipeline::build(clients, &config.pipeline)?;
            let outcome = pipeline.submitter.run(&SubmitRequest { source, skip }).await;
            println!("{outcome}");
            Ok(!outcome.is_failed())
        }
        Commands::Wait {
            cluster_id,
            step_id,
            timeout_secs,
            interval_ms,
        } => {
            let policy = WaitPolicy {
                timeout: Duration::from_secs(timeout_secs),
                interval: Duration::from_millis(interval_ms),
            };
            let outcome =
                wait_for_step(clients.cluster.as_ref(), &cluster_id, &step_id, policy).await?;
            println!("{}", outcome.as_str());
            Ok(outcome == WaitOutcome::Completed)
        }
    }
}

//! dlctl server - main entry point

use anyhow::Result;
use dlctl_common::logging::{init_logging, LogConfig};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::signal;
use tracing::info;

use dlctl_server::{
    api::{self, AppState},
    config::{Backend, Config},
    lifecycle::spawn_promoter_worker,
    runtime::{Pipeline, PipelineClients},
    scheduler::RetryScheduler,
};

#[tokio::main]
async fn main() -> Result<()> {
    let log_config = LogConfig::builder()
        .log_file_prefix("dlctl-server")
        .filter_directives("dlctl_server=debug,tower_http=debug,sqlx=info,aws_config=warn")
        .build()
        .with_env()?;

    let _log_guard = init_logging(&log_config)?;

    info!("Starting dlctl server");

    let config = Config::load()?;
    info!(
        backend = ?config.backend,
        cluster = %config.pipeline.cluster_name,
        "Configuration loaded - server will bind to {}:{}",
        config.server.host,
        config.server.port
    );

    let clients = PipelineClients::connect(&config).await?;
    let (pipeline, changes) = Pipeline::build(clients, &config.pipeline)?;
    let pipeline = Arc::new(pipeline);

    let promoter_worker =
        spawn_promoter_worker(changes, pipeline.promoter.clone(), pipeline.concurrency);

    // With AWS the retry rule fires the submitter through /submit.
    let scheduler = match config.backend {
        Backend::Memory => Some(
            RetryScheduler::new(
                pipeline.submitter.clone(),
                pipeline.clients.trigger.clone(),
                Duration::from_secs(config.pipeline.retry_interval_secs),
                &config.pipeline.cluster_name,
            )
            .start(),
        ),
        Backend::Aws => None,
    };

    let app = api::create_router(AppState {
        pipeline: pipeline.clone(),
    });

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(config.server.shutdown_timeout_secs))
        .await?;

    if let Some(scheduler) = scheduler {
        scheduler.abort();
    }
    // The stage marker owns the only sender; dropping the pipeline ends the
    // worker once the queue is drained.
    drop(pipeline);
    if let Err(e) = promoter_worker.await {
        tracing::error!("Promoter worker ended abnormally: {}", e);
    }

    info!("Server shutdown complete");

    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal(timeout_secs: u64) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        },
    }

    info!("Waiting up to {} seconds for connections to close", timeout_secs);
    tokio::time::sleep(Duration::from_secs(timeout_secs.min(5))).await;
}

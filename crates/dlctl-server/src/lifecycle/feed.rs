//! Control change feed
//!
//! The stage marker publishes a `MODIFY` event for every record it moves to
//! `STAGE`; a worker drains the queue into the promoter with bounded
//! concurrency.

use futures::stream::{self, StreamExt};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::events::ControlChangeEvent;
use super::promoter::StagePromoter;

#[derive(Debug, Error)]
#[error("Control change feed is closed")]
pub struct FeedClosed;

/// Sending half of the change feed.
#[derive(Debug, Clone)]
pub struct ChangeFeed {
    tx: mpsc::Sender<ControlChangeEvent>,
}

impl ChangeFeed {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ControlChangeEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    pub async fn publish(&self, event: ControlChangeEvent) -> Result<(), FeedClosed> {
        self.tx.send(event).await.map_err(|_| FeedClosed)
    }
}

/// Feed every queued event to `promoter`, at most `concurrency` at a time.
/// Returns once all senders are dropped and the queue is empty.
pub async fn drain(
    rx: mpsc::Receiver<ControlChangeEvent>,
    promoter: Arc<StagePromoter>,
    concurrency: usize,
) {
    let events = stream::unfold(rx, |mut rx| async move {
        let event = rx.recv().await?;
        Some((event, rx))
    });

    events
        .for_each_concurrent(concurrency.max(1), |event| {
            let promoter = promoter.clone();
            async move {
                let outcome = promoter.handle(&event).await;
                debug!(raw_path = %event.keys.raw_path, %outcome, "Change handled");
            }
        })
        .await;
}

pub fn spawn_promoter_worker(
    rx: mpsc::Receiver<ControlChangeEvent>,
    promoter: Arc<StagePromoter>,
    concurrency: usize,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(concurrency, "Promoter worker started");
        drain(rx, promoter, concurrency).await;
        info!("Promoter worker stopped");
    })
}

//! Retry trigger: the single on/off switch for backpressure
//!
//! While enabled, the submitter is re-run periodically with skip status
//! `PROCESSING`. The submitter enables it on a capacity rejection and disables
//! it after a retry run drains the backlog.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use thiserror::Error;
use tracing::info;

mod eventbridge;

pub use eventbridge::EventBridgeTrigger;

pub type TriggerResult<T> = std::result::Result<T, TriggerError>;

#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("Retry trigger '{name}' request failed: {message}")]
    Api { name: String, message: String },

    #[error("Retry trigger '{0}' does not exist")]
    NotFound(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerState {
    Enabled,
    Disabled,
}

#[async_trait]
pub trait RetryTrigger: Send + Sync {
    async fn state(&self) -> TriggerResult<TriggerState>;

    async fn enable(&self) -> TriggerResult<()>;

    async fn disable(&self) -> TriggerResult<()>;
}

/// In-process trigger, polled by the retry scheduler.
#[derive(Debug, Default)]
pub struct LocalTrigger {
    enabled: AtomicBool,
    enable_calls: AtomicUsize,
    disable_calls: AtomicUsize,
}

impl LocalTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Number of `enable` calls received, including redundant ones.
    pub fn enable_calls(&self) -> usize {
        self.enable_calls.load(Ordering::SeqCst)
    }

    pub fn disable_calls(&self) -> usize {
        self.disable_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RetryTrigger for LocalTrigger {
    async fn state(&self) -> TriggerResult<TriggerState> {
        Ok(if self.is_enabled() {
            TriggerState::Enabled
        } else {
            TriggerState::Disabled
        })
    }

    async fn enable(&self) -> TriggerResult<()> {
        self.enable_calls.fetch_add(1, Ordering::SeqCst);
        if !self.enabled.swap(true, Ordering::SeqCst) {
            info!("Retry trigger enabled");
        }
        Ok(())
    }

    async fn disable(&self) -> TriggerResult<()> {
        self.disable_calls.fetch_add(1, Ordering::SeqCst);
        if self.enabled.swap(false, Ordering::SeqCst) {
            info!("Retry trigger disabled");
        }
        Ok(())
    }
}

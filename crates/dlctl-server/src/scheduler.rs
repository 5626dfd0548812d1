//! Retry scheduler
//!
//! In-process stand-in for the scheduled retry rule: every period, if the
//! retry trigger is enabled, run the submitter as a retry run.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{error, info};

use crate::lifecycle::{JobSubmitter, SubmitRequest};
use crate::outcome::Outcome;
use crate::trigger::{RetryTrigger, TriggerState};

pub struct RetryScheduler {
    submitter: Arc<JobSubmitter>,
    trigger: Arc<dyn RetryTrigger>,
    period: Duration,
    source: String,
}

impl RetryScheduler {
    /// `source` is the name retry runs identify themselves with; it must match
    /// the configured cluster name for the submitter to act.
    pub fn new(
        submitter: Arc<JobSubmitter>,
        trigger: Arc<dyn RetryTrigger>,
        period: Duration,
        source: impl Into<String>,
    ) -> Self {
        Self {
            submitter,
            trigger,
            period,
            source: source.into(),
        }
    }

    /// Run one retry if the trigger is enabled.
    pub async fn tick(&self) -> Option<Outcome> {
        match self.trigger.state().await {
            Ok(TriggerState::Enabled) => {
                let outcome = self.submitter.run(&SubmitRequest::retry(&self.source)).await;
                info!(%outcome, "Retry run finished");
                Some(outcome)
            }
            Ok(TriggerState::Disabled) => None,
            Err(e) => {
                error!(error = %e, "Unable to read retry trigger state");
                None
            }
        }
    }

    pub fn start(self) -> JoinHandle<()> {
        info!(period_secs = self.period.as_secs(), "Starting retry scheduler");
        tokio::spawn(async move {
            let mut ticks = interval_at(Instant::now() + self.period, self.period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticks.tick().await;
                self.tick().await;
            }
        })
    }
}

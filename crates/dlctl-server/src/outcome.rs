//! Handler outcomes
//!
//! Lifecycle handlers never return errors to their caller. Every invocation
//! ends in an [`Outcome`]; failures have already been alerted by the time a
//! `Failed` outcome is produced.

use serde::{Deserialize, Serialize};

use crate::notify::{Alert, Notifier};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "message", rename_all = "snake_case")]
pub enum Outcome {
    /// The handler did its work.
    Done(String),
    /// Nothing to do for this input.
    Skipped(String),
    /// The handler hit an error and alerted the operator.
    Failed(String),
}

impl Outcome {
    pub fn done(message: impl Into<String>) -> Self {
        Outcome::Done(message.into())
    }

    pub fn skipped(message: impl Into<String>) -> Self {
        Outcome::Skipped(message.into())
    }

    /// Send `alert`, then return a failure carrying its summary.
    pub async fn failed(notifier: &dyn Notifier, alert: Alert, message: impl Into<String>) -> Self {
        notifier.notify(&alert).await;
        Outcome::Failed(message.into())
    }

    pub fn message(&self) -> &str {
        match self {
            Outcome::Done(m) | Outcome::Skipped(m) | Outcome::Failed(m) => m,
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, Outcome::Done(_))
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, Outcome::Skipped(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Outcome::Failed(_))
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            Outcome::Done(_) => "done",
            Outcome::Skipped(_) => "skipped",
            Outcome::Failed(_) => "failed",
        };
        write!(f, "{}: {}", kind, self.message())
    }
}

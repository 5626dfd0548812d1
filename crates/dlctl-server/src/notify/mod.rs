//! Operator alerts
//!
//! Delivery is best effort: one attempt, failures are logged and swallowed.

use async_trait::async_trait;
use std::fmt::Display;
use std::sync::Mutex;
use tracing::warn;

mod sns;

pub use sns::SnsNotifier;

/// Subjects longer than this are truncated; SNS rejects anything over 100.
pub const MAX_SUBJECT_LEN: usize = 100;

/// An alert for the operator channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub subject: String,
    pub body: String,
}

impl Alert {
    pub fn new(subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            subject: truncate(subject.into(), MAX_SUBJECT_LEN),
            body: body.into(),
        }
    }

    /// Alert naming the component that failed, the item it was working on and
    /// the error.
    pub fn failure(component: &str, item: &str, summary: &str, error: impl Display) -> Self {
        Self::new(
            format!("Data lake: {component} failure"),
            format!("Component: {component}\nItem: {item}\n{summary}\nError: {error}"),
        )
    }
}

fn truncate(mut value: String, max: usize) -> String {
    if value.len() > max {
        let mut end = max;
        while !value.is_char_boundary(end) {
            end -= 1;
        }
        value.truncate(end);
    }
    value
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, alert: &Alert);
}

/// Writes alerts to the log only. Used when no alert channel is configured.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, alert: &Alert) {
        warn!(subject = %alert.subject, body = %alert.body, "Operator alert");
    }
}

/// Keeps every alert in memory as well as logging it, so callers can
/// inspect what was sent.
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    alerts: Mutex<Vec<Alert>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().map(|a| a.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Notifier for MemoryNotifier {
    async fn notify(&self, alert: &Alert) {
        warn!(subject = %alert.subject, body = %alert.body, "Operator alert");
        if let Ok(mut alerts) = self.alerts.lock() {
            alerts.push(alert.clone());
        }
    }
}

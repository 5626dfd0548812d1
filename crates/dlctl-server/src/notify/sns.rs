use async_trait::async_trait;
use aws_sdk_sns::{error::DisplayErrorContext, Client};
use tracing::{error, info, instrument};

use super::{Alert, Notifier};

/// Publishes alerts to an SNS topic.
#[derive(Clone)]
pub struct SnsNotifier {
    client: Client,
    topic_arn: String,
}

impl SnsNotifier {
    pub fn new(client: Client, topic_arn: impl Into<String>) -> Self {
        Self {
            client,
            topic_arn: topic_arn.into(),
        }
    }
}

#[async_trait]
impl Notifier for SnsNotifier {
    #[instrument(skip(self, alert), fields(subject = %alert.subject))]
    async fn notify(&self, alert: &Alert) {
        let result = self
            .client
            .publish()
            .topic_arn(&self.topic_arn)
            .subject(&alert.subject)
            .message(&alert.body)
            .send()
            .await;

        match result {
            Ok(output) => info!(message_id = ?output.message_id(), "Alert published"),
            Err(e) => error!(
                topic = %self.topic_arn,
                error = %DisplayErrorContext(&e),
                body = %alert.body,
                "Failed to publish alert"
            ),
        }
    }
}

use async_trait::async_trait;
use aws_sdk_eventbridge::{error::DisplayErrorContext, types::RuleState, Client};
use tracing::{info, instrument};

use super::{RetryTrigger, TriggerError, TriggerResult, TriggerState};

/// Scheduled EventBridge rule whose target invokes the submitter.
#[derive(Clone)]
pub struct EventBridgeTrigger {
    client: Client,
    rule: String,
}

impl EventBridgeTrigger {
    pub fn new(client: Client, rule: impl Into<String>) -> Self {
        Self {
            client,
            rule: rule.into(),
        }
    }

    fn api_error(&self, message: impl ToString) -> TriggerError {
        TriggerError::Api {
            name: self.rule.clone(),
            message: message.to_string(),
        }
    }
}

#[async_trait]
impl RetryTrigger for EventBridgeTrigger {
    #[instrument(skip(self), fields(rule = %self.rule))]
    async fn state(&self) -> TriggerResult<TriggerState> {
        let output = self
            .client
            .describe_rule()
            .name(&self.rule)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error()
                    .is_some_and(|se| se.is_resource_not_found_exception())
                {
                    TriggerError::NotFound(self.rule.clone())
                } else {
                    self.api_error(DisplayErrorContext(&e))
                }
            })?;

        Ok(match output.state() {
            Some(RuleState::Disabled) | None => TriggerState::Disabled,
            Some(_) => TriggerState::Enabled,
        })
    }

    #[instrument(skip(self), fields(rule = %self.rule))]
    async fn enable(&self) -> TriggerResult<()> {
        self.client
            .enable_rule()
            .name(&self.rule)
            .send()
            .await
            .map_err(|e| self.api_error(DisplayErrorContext(&e)))?;

        info!("Retry rule enabled");
        Ok(())
    }

    #[instrument(skip(self), fields(rule = %self.rule))]
    async fn disable(&self) -> TriggerResult<()> {
        self.client
            .disable_rule()
            .name(&self.rule)
            .send()
            .await
            .map_err(|e| self.api_error(DisplayErrorContext(&e)))?;

        info!("Retry rule disabled");
        Ok(())
    }
}

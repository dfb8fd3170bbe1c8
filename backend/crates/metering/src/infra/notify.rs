//! Notifier implementations

use platform::slack::{SlackClient, SlackConfig};
use uuid::Uuid;

use crate::domain::services::Notifier;
use crate::error::MeteringResult;

/// Writes notifications to the log and hands out random message ids
#[derive(Debug, Clone, Default)]
pub struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    async fn send(&self, message: &str) -> MeteringResult<String> {
        let external_message_id = Uuid::new_v4().to_string();
        tracing::info!(external_message_id = %external_message_id, "{message}");
        Ok(external_message_id)
    }

    async fn update(&self, external_message_id: &str, message: &str) -> MeteringResult<()> {
        tracing::info!(external_message_id = %external_message_id, "Updated: {message}");
        Ok(())
    }
}

/// Posts alerts to a Slack channel and edits them on recovery
#[derive(Debug, Clone)]
pub struct SlackNotifier {
    client: SlackClient,
}

impl SlackNotifier {
    pub fn new(config: SlackConfig) -> MeteringResult<Self> {
        Ok(Self {
            client: SlackClient::new(config)?,
        })
    }
}

impl Notifier for SlackNotifier {
    async fn send(&self, message: &str) -> MeteringResult<String> {
        Ok(self.client.post_message(message).await?)
    }

    async fn update(&self, external_message_id: &str, message: &str) -> MeteringResult<()> {
        Ok(self
            .client
            .update_message(external_message_id, message)
            .await?)
    }
}

/// Notifier selected at startup
#[derive(Debug, Clone)]
pub enum NotificationChannel {
    Console(ConsoleNotifier),
    Slack(SlackNotifier),
}

impl Notifier for NotificationChannel {
    async fn send(&self, message: &str) -> MeteringResult<String> {
        match self {
            NotificationChannel::Console(n) => n.send(message).await,
            NotificationChannel::Slack(n) => n.send(message).await,
        }
    }

    async fn update(&self, external_message_id: &str, message: &str) -> MeteringResult<()> {
        match self {
            NotificationChannel::Console(n) => n.update(external_message_id, message).await,
            NotificationChannel::Slack(n) => n.update(external_message_id, message).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_console_ids_are_unique() {
        let notifier = NotificationChannel::Console(ConsoleNotifier);
        let a = notifier.send("first").await.unwrap();
        let b = notifier.send("second").await.unwrap();
        assert_ne!(a, b);
        notifier.update(&a, "edited").await.unwrap();
    }

    #[tokio::test]
    async fn test_slack_failure_maps_to_notification_error() {
        let mut config = SlackConfig::new("xoxb-test", "#alerts");
        // Nothing listens on the discard port.
        config.api_base = "http://127.0.0.1:9".to_string();
        let notifier = SlackNotifier::new(config).unwrap();

        let err = notifier.send("hello").await.unwrap_err();
        assert!(matches!(err, crate::MeteringError::Notification(_)));
    }
}

//! Alert Coordinator Use Case
//!
//! Consumes alert / recovery events and keeps at most one active alert per
//! key. Both directions are idempotent: a repeated alert for an active key
//! is suppressed, a recovery with nothing active is a no-op.

use std::sync::Arc;

use crate::domain::repository::AlertRepository;
use crate::domain::services::{breach_message, recovery_message, Notifier};
use crate::domain::value_objects::{MessageKind, QueueMessage};
use crate::error::MeteringResult;
use crate::infra::queue::{HandlerError, InMemoryQueue, QueueError, Subscription};

/// What handling one event did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlertOutcome {
    Raised { external_message_id: String },
    AlreadyActive,
    Resolved { external_message_id: String },
    NothingActive,
}

pub struct AlertCoordinator<A, N>
where
    A: AlertRepository,
    N: Notifier,
{
    alert_repo: Arc<A>,
    notifier: Arc<N>,
}

impl<A, N> AlertCoordinator<A, N>
where
    A: AlertRepository + Send + Sync + 'static,
    N: Notifier + Send + Sync + 'static,
{
    pub fn new(alert_repo: Arc<A>, notifier: Arc<N>) -> Self {
        Self {
            alert_repo,
            notifier,
        }
    }

    pub async fn handle(&self, message: &QueueMessage) -> MeteringResult<AlertOutcome> {
        match message.kind {
            MessageKind::Alert => self.raise(&message.key).await,
            MessageKind::Recovery => self.recover(&message.key).await,
        }
    }

    /// Notify and store a new active alert unless one already exists
    pub async fn raise(&self, key: &str) -> MeteringResult<AlertOutcome> {
        if self.alert_repo.is_active(key).await? {
            tracing::debug!(key = %key, "Alert already active, suppressed");
            return Ok(AlertOutcome::AlreadyActive);
        }

        let external_message_id = self.notifier.send(&breach_message(key)).await?;
        let alert = self
            .alert_repo
            .create_alert(key, &external_message_id)
            .await
            .inspect_err(|err| {
                tracing::error!(
                    key = %key,
                    external_message_id = %external_message_id,
                    error = %err,
                    "Alert sent but not stored"
                );
            })?;

        tracing::info!(
            alert_id = %alert.id,
            key = %key,
            external_message_id = %external_message_id,
            "Rate limit alert raised"
        );
        Ok(AlertOutcome::Raised {
            external_message_id,
        })
    }

    /// Resolve the active alert, then edit its notification
    pub async fn recover(&self, key: &str) -> MeteringResult<AlertOutcome> {
        let Some(alert) = self.alert_repo.resolve_active(key).await? else {
            tracing::debug!(key = %key, "No active alert to resolve");
            return Ok(AlertOutcome::NothingActive);
        };

        self.notifier
            .update(&alert.external_message_id, &recovery_message(key))
            .await?;

        tracing::info!(
            alert_id = %alert.id,
            key = %key,
            external_message_id = %alert.external_message_id,
            "Rate limit alert resolved"
        );
        Ok(AlertOutcome::Resolved {
            external_message_id: alert.external_message_id,
        })
    }

    /// Subscribe this coordinator to `topic` on `queue`
    pub fn attach(
        self: Arc<Self>,
        queue: &InMemoryQueue,
        topic: &str,
    ) -> Result<Subscription, QueueError> {
        queue.subscribe(topic, move |message: QueueMessage| {
            let coordinator = Arc::clone(&self);
            async move {
                coordinator
                    .handle(&message)
                    .await
                    .map(|_| ())
                    .map_err(HandlerError::from)
            }
        })
    }
}

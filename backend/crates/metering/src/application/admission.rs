//! Admission Use Case
//!
//! Decides whether a request for a key is admitted, and turns changes in
//! that decision into alert / recovery events on the queue.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use platform::rate_limit::{FixedWindowCounter, RateLimitResult};

use crate::application::config::{LimitTable, MeteringConfig};
use crate::domain::repository::RequestLogRepository;
use crate::domain::value_objects::{MessageKind, QueueMessage, RateLimitKey};
use crate::error::{MeteringError, MeteringResult};
use crate::infra::queue::{InMemoryQueue, QueueError};

/// Admission counter trait
#[trait_variant::make(AdmissionCounter: Send)]
pub trait LocalAdmissionCounter {
    /// Count one request for `key` and decide on it
    async fn check_limit(&self, key: &RateLimitKey) -> MeteringResult<RateLimitResult>;

    /// Forget all history for `key`
    async fn reset(&self, key: &RateLimitKey) -> MeteringResult<()>;
}

/// Counter implementation chosen at startup
pub enum CounterStrategy<R> {
    /// Fixed window in process memory
    Memory {
        counter: FixedWindowCounter,
        limits: LimitTable,
    },
    /// Sliding window in the request log, shared by every instance
    Persisted { log: Arc<R>, limits: LimitTable },
}

impl<R> CounterStrategy<R> {
    pub fn in_memory(limits: LimitTable) -> Self {
        Self::Memory {
            counter: FixedWindowCounter::new(),
            limits,
        }
    }

    pub fn persisted(log: Arc<R>, limits: LimitTable) -> Self {
        Self::Persisted { log, limits }
    }

    pub fn limits(&self) -> &LimitTable {
        match self {
            Self::Memory { limits, .. } | Self::Persisted { limits, .. } => limits,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Memory { .. } => "memory",
            Self::Persisted { .. } => "postgres",
        }
    }
}

impl<R> AdmissionCounter for CounterStrategy<R>
where
    R: RequestLogRepository + Send + Sync,
{
    async fn check_limit(&self, key: &RateLimitKey) -> MeteringResult<RateLimitResult> {
        match self {
            Self::Memory { counter, limits } => {
                Ok(counter.check(&key.to_string(), limits.for_kind(key.kind())))
            }
            Self::Persisted { log, limits } => {
                let config = limits.for_kind(key.kind());
                let now = Utc::now();
                let window_start = now
                    .checked_sub_signed(config.window_chrono())
                    .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);

                let step = log
                    .count_and_insert(key, window_start, now, config.limit())
                    .await
                    .map_err(|err| MeteringError::AdmissionStorage(Box::new(err)))?;

                let used = step.count.saturating_add(u32::from(step.inserted));
                Ok(RateLimitResult {
                    allowed: step.inserted,
                    remaining: config.limit().saturating_sub(used),
                    reset_at: config.window_end(step.oldest.unwrap_or(now)),
                })
            }
        }
    }

    async fn reset(&self, key: &RateLimitKey) -> MeteringResult<()> {
        match self {
            Self::Memory { counter, .. } => {
                counter.reset(&key.to_string());
                Ok(())
            }
            Self::Persisted { log, .. } => log.clear(key).await,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Admitted,
    Denied,
}

/// Keys remembered before admitted entries are forgotten
const TRACKED_KEYS_SOFT_CAP: usize = 100_000;

/// Last outcome recorded per key
///
/// Every denial pushes an alert; the coordinator keeps one active alert per
/// key, so a lost alert is made up by the next denial. Recoveries fire only
/// on the transition out of denial. A key with no history counts as
/// possibly-breached, so the first admission after a restart pushes one
/// recovery.
#[derive(Debug, Default)]
pub struct BreachTracker {
    last: Mutex<HashMap<String, Outcome>>,
}

impl BreachTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `allowed` for `key`, pushing the event it calls for.
    ///
    /// The push happens under the tracker lock so queue order matches the
    /// order outcomes were recorded in. An outcome whose push was rejected
    /// is not recorded.
    pub fn observe(
        &self,
        key: &RateLimitKey,
        allowed: bool,
        queue: &InMemoryQueue,
        topic: &str,
    ) -> Result<Option<MessageKind>, QueueError> {
        let rendered = key.to_string();
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        let previous = last.get(&rendered).copied();

        let (outcome, message) = match (allowed, previous) {
            (false, _) => (Outcome::Denied, Some(QueueMessage::alert(topic, key))),
            (true, Some(Outcome::Admitted)) => (Outcome::Admitted, None),
            (true, _) => (Outcome::Admitted, Some(QueueMessage::recovery(topic, key))),
        };

        let event = match message {
            Some(message) => {
                let kind = message.kind;
                queue.push(message)?;
                Some(kind)
            }
            None => None,
        };

        if last.len() >= TRACKED_KEYS_SOFT_CAP && previous.is_none() {
            // Forgetting an admitted key costs at most one spare recovery.
            last.retain(|_, outcome| *outcome == Outcome::Denied);
        }
        last.insert(rendered, outcome);
        Ok(event)
    }
}

/// Result of admitting one request
#[derive(Debug, Clone)]
pub struct AdmissionDecision {
    /// Key the decision is reported for
    pub key: RateLimitKey,
    pub limit: u32,
    pub result: RateLimitResult,
}

impl AdmissionDecision {
    pub fn allowed(&self) -> bool {
        self.result.allowed
    }
}

/// Admission Use Case
pub struct AdmissionService<C>
where
    C: AdmissionCounter,
{
    counter: Arc<C>,
    queue: InMemoryQueue,
    tracker: BreachTracker,
    config: Arc<MeteringConfig>,
}

impl<C> AdmissionService<C>
where
    C: AdmissionCounter + Send + Sync,
{
    pub fn new(counter: Arc<C>, queue: InMemoryQueue, config: Arc<MeteringConfig>) -> Self {
        Self {
            counter,
            queue,
            tracker: BreachTracker::new(),
            config,
        }
    }

    pub fn config(&self) -> &MeteringConfig {
        &self.config
    }

    pub fn counter(&self) -> &C {
        &self.counter
    }

    /// Decide on one request for `key`
    ///
    /// Storage failures either propagate (fail closed) or admit the request
    /// without counting it (fail open). Neither case emits an event.
    pub async fn admit(&self, key: &RateLimitKey) -> MeteringResult<AdmissionDecision> {
        let limits = self.config.limits.for_kind(key.kind());

        let result = match self.counter.check_limit(key).await {
            Ok(result) => result,
            Err(err) if self.config.fail_closed => {
                tracing::error!(key = %key, error = %err, "Admission check failed, denying");
                return Err(err);
            }
            Err(err) => {
                tracing::warn!(key = %key, error = %err, "Admission check failed, admitting");
                let now = Utc::now();
                return Ok(AdmissionDecision {
                    key: key.clone(),
                    limit: limits.limit(),
                    result: RateLimitResult {
                        allowed: true,
                        remaining: limits.limit(),
                        reset_at: limits.window_end(now),
                    },
                });
            }
        };

        match self
            .tracker
            .observe(key, result.allowed, &self.queue, &self.config.alert_topic)
        {
            Ok(Some(kind)) => {
                tracing::debug!(key = %key, kind = kind.as_str(), "Breach event enqueued");
            }
            Ok(None) => {}
            // The request itself is unaffected by a stopped alert pipeline.
            Err(err) => {
                tracing::warn!(key = %key, error = %err, "Breach event dropped");
            }
        }

        Ok(AdmissionDecision {
            key: key.clone(),
            limit: limits.limit(),
            result,
        })
    }

    /// Admit against every key in order, stopping at the first denial
    ///
    /// Returns the denying decision, or the decision for the last key.
    pub async fn admit_all(&self, keys: &[RateLimitKey]) -> MeteringResult<AdmissionDecision> {
        let mut last = None;
        for key in keys {
            let decision = self.admit(key).await?;
            if !decision.allowed() {
                return Ok(decision);
            }
            last = Some(decision);
        }
        last.ok_or_else(|| MeteringError::Internal("no rate limit keys supplied".to_string()))
    }

    /// Clear the counter history for `key`
    pub async fn reset(&self, key: &RateLimitKey) -> MeteringResult<()> {
        self.counter.reset(key).await?;
        tracing::info!(key = %key, "Rate limit reset");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOPIC: &str = "alerts";

    fn drain(queue: &InMemoryQueue) -> Vec<MessageKind> {
        std::iter::from_fn(|| queue.pop(TOPIC)).map(|m| m.kind).collect()
    }

    #[tokio::test]
    async fn test_tracker_alerts_every_denial_and_recovers_once() {
        let queue = InMemoryQueue::new();
        let tracker = BreachTracker::new();
        let key = RateLimitKey::account("acme");

        for allowed in [true, true, false, false, false, true, true, false] {
            tracker.observe(&key, allowed, &queue, TOPIC).unwrap();
        }

        assert_eq!(
            drain(&queue),
            vec![
                MessageKind::Recovery,
                MessageKind::Alert,
                MessageKind::Alert,
                MessageKind::Alert,
                MessageKind::Recovery,
                MessageKind::Alert
            ]
        );
    }

    #[tokio::test]
    async fn test_tracker_keys_are_independent() {
        let queue = InMemoryQueue::new();
        let tracker = BreachTracker::new();
        let a = RateLimitKey::account("a");
        let b = RateLimitKey::account("b");

        tracker.observe(&a, false, &queue, TOPIC).unwrap();
        tracker.observe(&b, true, &queue, TOPIC).unwrap();
        tracker.observe(&a, true, &queue, TOPIC).unwrap();
        tracker.observe(&b, true, &queue, TOPIC).unwrap();

        let events: Vec<(String, MessageKind)> = std::iter::from_fn(|| queue.pop(TOPIC))
            .map(|m| (m.key, m.kind))
            .collect();
        assert_eq!(
            events,
            vec![
                ("account:a".to_string(), MessageKind::Alert),
                ("account:b".to_string(), MessageKind::Recovery),
                ("account:a".to_string(), MessageKind::Recovery),
            ]
        );
    }

    #[tokio::test]
    async fn test_tracker_does_not_record_rejected_push() {
        let queue = InMemoryQueue::new();
        queue.shutdown().await;
        let tracker = BreachTracker::new();
        let key = RateLimitKey::account("acme");

        assert!(tracker.observe(&key, true, &queue, TOPIC).is_err());
        // Still unknown, so the next admission tries the recovery again.
        assert!(tracker.observe(&key, true, &queue, TOPIC).is_err());
    }
}

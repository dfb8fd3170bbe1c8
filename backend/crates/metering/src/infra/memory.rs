//! In-memory store
//!
//! Implements every repository trait on plain collections behind one mutex
//! per table. Same atomicity as the Postgres repository, no durability.
//! Used for local development and tests.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};

use crate::domain::entities::{AlertRecord, Usage};
use crate::domain::repository::{
    AlertRepository, RequestLogRepository, UsageRepository, WindowCount,
};
use crate::domain::value_objects::RateLimitKey;
use crate::error::{MeteringError, MeteringResult};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
pub struct InMemoryStore {
    alerts: Mutex<Vec<AlertRecord>>,
    usage: Mutex<Vec<Usage>>,
    requests: Mutex<HashMap<RateLimitKey, Vec<DateTime<Utc>>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every alert ever stored for `key`, oldest first
    pub fn alerts_for(&self, key: &str) -> Vec<AlertRecord> {
        lock(&self.alerts)
            .iter()
            .filter(|a| a.key == key)
            .cloned()
            .collect()
    }

    pub fn active_alert_count(&self, key: &str) -> usize {
        lock(&self.alerts)
            .iter()
            .filter(|a| a.key == key && a.is_active())
            .count()
    }

    pub fn usage(&self) -> Vec<Usage> {
        lock(&self.usage).clone()
    }

    /// Requests currently remembered for `key`
    pub fn logged_requests(&self, key: &RateLimitKey) -> usize {
        lock(&self.requests).get(key).map_or(0, Vec::len)
    }
}

impl AlertRepository for InMemoryStore {
    async fn create_alert(
        &self,
        key: &str,
        external_message_id: &str,
    ) -> MeteringResult<AlertRecord> {
        let mut alerts = lock(&self.alerts);
        if alerts.iter().any(|a| a.key == key && a.is_active()) {
            return Err(MeteringError::DuplicateActiveAlert(key.to_string()));
        }
        let record = AlertRecord::new_active(key, external_message_id);
        alerts.push(record.clone());
        Ok(record)
    }

    async fn is_active(&self, key: &str) -> MeteringResult<bool> {
        Ok(lock(&self.alerts)
            .iter()
            .any(|a| a.key == key && a.is_active()))
    }

    async fn resolve_active(&self, key: &str) -> MeteringResult<Option<AlertRecord>> {
        let mut alerts = lock(&self.alerts);
        let resolved = alerts
            .iter_mut()
            .find(|a| a.key == key && a.is_active())
            .map(|alert| {
                alert.resolve(Utc::now());
                alert.clone()
            });
        Ok(resolved)
    }
}

impl UsageRepository for InMemoryStore {
    async fn record(&self, usage: &Usage) -> MeteringResult<()> {
        lock(&self.usage).push(usage.clone());
        Ok(())
    }
}

impl RequestLogRepository for InMemoryStore {
    async fn count_and_insert(
        &self,
        key: &RateLimitKey,
        window_start: DateTime<Utc>,
        now: DateTime<Utc>,
        limit: u32,
    ) -> MeteringResult<WindowCount> {
        let mut requests = lock(&self.requests);
        let log = requests.entry(key.clone()).or_default();
        log.retain(|at| *at >= window_start);

        let count = u32::try_from(log.len()).unwrap_or(u32::MAX);
        let inserted = count < limit;
        if inserted {
            log.push(now);
        }
        let oldest = log.iter().min().copied();
        if log.is_empty() {
            requests.remove(key);
        }

        Ok(WindowCount {
            count,
            inserted,
            oldest,
        })
    }

    async fn clear(&self, key: &RateLimitKey) -> MeteringResult<()> {
        lock(&self.requests).remove(key);
        Ok(())
    }
}

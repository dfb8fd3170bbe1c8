//! Postgres-backed repository tests
//!
//! Run against the database in `DATABASE_URL`; skipped when it is unset.

use std::sync::Arc;

use chrono::{Duration, Utc};
use metering::PgMeteringRepository;
use metering::domain::entities::Usage;
use metering::domain::repository::{AlertRepository, RequestLogRepository, UsageRepository};
use metering::domain::value_objects::{AccountId, Endpoint, RateLimitKey};
use metering::error::MeteringError;
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

async fn repository() -> Option<PgMeteringRepository> {
    let Ok(url) = std::env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL not set, skipping");
        return None;
    };
    let pool = PgPoolOptions::new()
        .max_connections(8)
        .connect(&url)
        .await
        .expect("connect to DATABASE_URL");
    sqlx::migrate!("../../../database/migrations")
        .run(&pool)
        .await
        .expect("run migrations");
    Some(PgMeteringRepository::new(pool))
}

fn unique_key() -> RateLimitKey {
    RateLimitKey::account(format!("test-{}", Uuid::new_v4()))
}

#[tokio::test]
async fn test_concurrent_admissions_respect_limit() {
    let Some(repo) = repository().await else {
        return;
    };
    let repo = Arc::new(repo);
    let key = unique_key();
    let now = Utc::now();

    let mut tasks = Vec::new();
    for _ in 0..10 {
        let repo = Arc::clone(&repo);
        let key = key.clone();
        tasks.push(tokio::spawn(async move {
            repo.count_and_insert(&key, now - Duration::seconds(60), now, 3)
                .await
                .unwrap()
                .inserted
        }));
    }

    let mut admitted = 0;
    for task in tasks {
        if task.await.unwrap() {
            admitted += 1;
        }
    }
    assert_eq!(admitted, 3);

    repo.clear(&key).await.unwrap();
}

#[tokio::test]
async fn test_old_entries_leave_the_window() {
    let Some(repo) = repository().await else {
        return;
    };
    let key = unique_key();
    let t0 = Utc::now() - Duration::seconds(120);

    let first = repo
        .count_and_insert(&key, t0 - Duration::seconds(60), t0, 1)
        .await
        .unwrap();
    assert!(first.inserted);
    assert_eq!(first.count, 0);

    let now = Utc::now();
    let later = repo
        .count_and_insert(&key, now - Duration::seconds(60), now, 1)
        .await
        .unwrap();
    assert!(later.inserted);
    assert_eq!(later.count, 0);

    let denied = repo
        .count_and_insert(&key, now - Duration::seconds(60), now, 1)
        .await
        .unwrap();
    assert!(!denied.inserted);
    assert_eq!(denied.count, 1);

    repo.clear(&key).await.unwrap();
}

#[tokio::test]
async fn test_single_active_alert_per_key() {
    let Some(repo) = repository().await else {
        return;
    };
    let key = unique_key().to_string();

    let alert = repo.create_alert(&key, "msg-1").await.unwrap();
    assert!(alert.is_active());
    assert!(repo.is_active(&key).await.unwrap());

    let err = repo.create_alert(&key, "msg-2").await.unwrap_err();
    assert!(matches!(err, MeteringError::DuplicateActiveAlert(_)));

    let resolved = repo.resolve_active(&key).await.unwrap().unwrap();
    assert_eq!(resolved.id, alert.id);
    assert_eq!(resolved.external_message_id, "msg-1");
    assert!(!repo.is_active(&key).await.unwrap());
    assert!(repo.resolve_active(&key).await.unwrap().is_none());

    // History is kept and a new breach gets a new record
    let again = repo.create_alert(&key, "msg-3").await.unwrap();
    assert_ne!(again.id, alert.id);
    repo.resolve_active(&key).await.unwrap();
}

#[tokio::test]
async fn test_usage_is_recorded() {
    let Some(repo) = repository().await else {
        return;
    };
    let usage = Usage::new(
        &AccountId::parse("acme").unwrap(),
        &Endpoint::parse("/v1/items").unwrap(),
        Utc::now(),
    );
    repo.record(&usage).await.unwrap();
}

#[tokio::test]
async fn test_cleanup_removes_only_old_rows() {
    let Some(repo) = repository().await else {
        return;
    };
    let key = unique_key();
    let old = Utc::now() - Duration::days(2);
    repo.count_and_insert(&key, old - Duration::seconds(1), old, 5)
        .await
        .unwrap();

    let deleted = repo
        .cleanup_expired(Utc::now() - Duration::days(1))
        .await
        .unwrap();
    assert!(deleted >= 1);

    let now = Utc::now();
    let step = repo
        .count_and_insert(&key, old - Duration::seconds(1), now, 5)
        .await
        .unwrap();
    assert_eq!(step.count, 0);
    repo.clear(&key).await.unwrap();
}

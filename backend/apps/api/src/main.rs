//! API Server Entry Point
//!
//! Application entry point and server initialization.
//! Uses `anyhow` for startup errors; request errors go through
//! `metering::MeteringError` into `kernel::error::AppError`.

use anyhow::Context;
use axum::Router;
use metering::application::admission::{AdmissionService, CounterStrategy};
use metering::application::alert_coordinator::AlertCoordinator;
use metering::application::config::{CounterKind, LimitTable, MeteringConfig, NotifierKind};
use metering::infra::notify::{ConsoleNotifier, NotificationChannel, SlackNotifier};
use metering::{InMemoryQueue, PgMeteringRepository, metering_router};
use platform::rate_limit::RateLimitConfig;
use platform::slack::SlackConfig;
use sqlx::postgres::PgPoolOptions;
use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "api=info,metering=info,platform=info,tower_http=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Database connection
    let database_url = env::var("DATABASE_URL").context("DATABASE_URL must be set in environment")?;

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&database_url)
        .await?;

    tracing::info!("Connected to database");

    // Run migrations
    sqlx::migrate!("../../../database/migrations")
        .run(&pool)
        .await?;

    tracing::info!("Migrations completed");

    let metering_config = load_metering_config()?;
    let repo = Arc::new(PgMeteringRepository::new(pool.clone()));

    // Startup cleanup: drop request-log rows no window can see anymore
    // Errors here should not prevent server startup
    let horizon = chrono::Duration::from_std(metering_config.limits.longest_window())
        .ok()
        .and_then(|window| chrono::Utc::now().checked_sub_signed(window));
    if let Some(horizon) = horizon {
        if let Err(e) = repo.cleanup_expired(horizon).await {
            tracing::warn!(
                error = %e,
                "Rate limit cleanup failed, continuing anyway"
            );
        }
    }

    // Alert pipeline
    let queue = InMemoryQueue::new();
    let notifier = Arc::new(load_notifier()?);
    let coordinator = Arc::new(AlertCoordinator::new(Arc::clone(&repo), notifier));
    let _alert_subscription = coordinator.attach(&queue, &metering_config.alert_topic)?;

    // Admission
    let counter = match metering_config.counter {
        CounterKind::Memory => CounterStrategy::in_memory(metering_config.limits),
        CounterKind::Postgres => {
            CounterStrategy::persisted(Arc::clone(&repo), metering_config.limits)
        }
    };
    tracing::info!(
        strategy = counter.name(),
        fail_closed = metering_config.fail_closed,
        account_limit = metering_config.limits.account.limit(),
        ip_limit = metering_config.limits.ip.limit(),
        "Admission configured"
    );
    let admission = Arc::new(AdmissionService::new(
        Arc::new(counter),
        queue.clone(),
        Arc::new(metering_config),
    ));

    // Build router
    let app = Router::new()
        .nest("/api/v1", metering_router(repo, admission, queue.clone()))
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr: SocketAddr = env_parse("BIND_ADDR", SocketAddr::from(([0, 0, 0, 0], 3000)))?;
    tracing::info!("Listening on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    // Let in-flight alert work finish before exit
    queue.shutdown().await;
    tracing::info!("Server stopped");

    Ok(())
}

fn load_metering_config() -> anyhow::Result<MeteringConfig> {
    let account = RateLimitConfig::new(
        env_parse("ACCOUNT_RATE_LIMIT", 100)?,
        env_parse("ACCOUNT_RATE_WINDOW_SECS", 1)?,
    )
    .context("invalid account rate limit")?;
    let ip = RateLimitConfig::new(
        env_parse("IP_RATE_LIMIT", 1000)?,
        env_parse("IP_RATE_WINDOW_SECS", 60)?,
    )
    .context("invalid IP rate limit")?;

    let counter = match env::var("RATE_LIMIT_STRATEGY") {
        Ok(raw) => CounterKind::from_str(&raw)?,
        Err(_) => CounterKind::default(),
    };
    let fail_open: bool = env_parse("RATE_LIMIT_FAIL_OPEN", false)?;

    Ok(MeteringConfig {
        limits: LimitTable { account, ip },
        counter,
        fail_closed: !fail_open,
        ..MeteringConfig::default()
    })
}

fn load_notifier() -> anyhow::Result<NotificationChannel> {
    let kind = match env::var("NOTIFIER") {
        Ok(raw) => NotifierKind::from_str(&raw)?,
        Err(_) => NotifierKind::default(),
    };

    let channel = match kind {
        NotifierKind::Console => NotificationChannel::Console(ConsoleNotifier),
        NotifierKind::Slack => {
            let token = env::var("SLACK_BOT_TOKEN").context("SLACK_BOT_TOKEN must be set")?;
            let channel = env::var("SLACK_CHANNEL").context("SLACK_CHANNEL must be set")?;
            let mut config = SlackConfig::new(token, channel);
            if let Ok(api_base) = env::var("SLACK_API_BASE") {
                config.api_base = api_base;
            }
            NotificationChannel::Slack(SlackNotifier::new(config)?)
        }
    };

    tracing::info!(notifier = ?kind, "Notifier configured");
    Ok(channel)
}

/// Parse `name` from the environment, falling back to `default` when unset
fn env_parse<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {name}: {raw}")),
        Err(_) => Ok(default),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        return;
    }
    tracing::info!("Shutdown signal received");
}

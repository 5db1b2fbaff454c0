mod aggregator;
mod config;
mod db;
mod dispatcher;
mod error;
mod hub;
mod model;
mod notify;
mod probe;
mod scheduler;
mod ssrf;
mod store;
mod web;

use std::sync::Arc;

use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use trust_dns_resolver::TokioAsyncResolver;

use aggregator::{Aggregator, RetentionConfig};
use config::AppConfig;
use dispatcher::Dispatcher;
use hub::BroadcastHub;
use notify::NotificationRegistry;
use probe::ProbeRegistry;
use scheduler::Scheduler;
use store::HeartbeatStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "uptime_core=info,tower_http=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cfg = AppConfig::load()?;
    tracing::info!("starting with APP_ENV={:?}", cfg.app_env);

    let pool = db::connect(&cfg.database_url).await?;

    let resolver = Arc::new(TokioAsyncResolver::tokio_from_system_conf()?);
    let probes = Arc::new(ProbeRegistry::with_builtins());
    let notifiers = Arc::new(NotificationRegistry::with_builtins());
    let store = HeartbeatStore::new(pool.clone());
    let hub = BroadcastHub::new();
    let dispatcher = Arc::new(Dispatcher::new(pool.clone(), notifiers, cfg.base_url.clone()));
    let scheduler = Arc::new(Scheduler::new(probes.clone(), store.clone(), hub.clone(), dispatcher, resolver));

    scheduler.start_all().await?;
    tracing::info!("scheduler started {} monitor workers", scheduler.running_count().await);

    let aggregator = Arc::new(Aggregator::new(
        store.clone(),
        RetentionConfig {
            heartbeat_days: cfg.heartbeat_retention_days,
            stat_hourly_days: cfg.stat_hourly_retention_days,
            stat_daily_days: cfg.stat_daily_retention_days,
        },
    ));
    let aggregator_shutdown = tokio_util::sync::CancellationToken::new();
    let aggregator_handles = aggregator.spawn_all(aggregator_shutdown.clone());

    let cors = if cfg.cors_origins.is_empty() {
        CorsLayer::new()
    } else {
        let origins: Vec<_> = cfg.cors_origins.iter().filter_map(|o| o.parse().ok()).collect();
        CorsLayer::new().allow_origin(AllowOrigin::list(origins))
    };

    let state = web::AppState {
        store,
        hub,
        scheduler: scheduler.clone(),
        probes,
        metrics_token: cfg.metrics_token.clone(),
        health_token: cfg.health_token.clone(),
    };

    let app = web::app(state).layer(TraceLayer::new_for_http()).layer(cors);

    let listener = tokio::net::TcpListener::bind(&cfg.listen_addr).await?;
    tracing::info!("listening on {}", cfg.listen_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("shutting down: stopping scheduler workers and background jobs");
    scheduler.shutdown().await;
    aggregator_shutdown.cancel();
    for handle in aggregator_handles {
        let _ = handle.await;
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received");
}

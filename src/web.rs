//! Thin supplementary HTTP surface (§11). No business logic beyond
//! delegating to the core components — CRUD validation is the probe
//! registry's job, lifecycle side effects are the scheduler's job, reads are
//! the heartbeat store's job. Auth, status pages, and incident management
//! are out of scope and not modeled here.

use std::sync::Arc;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use crate::hub::BroadcastHub;
use crate::model::{NewMonitor, Status};
use crate::probe::ProbeRegistry;
use crate::scheduler::Scheduler;
use crate::store::HeartbeatStore;

#[derive(Clone)]
pub struct AppState {
    pub store: HeartbeatStore,
    pub hub: BroadcastHub,
    pub scheduler: Arc<Scheduler>,
    pub probes: Arc<ProbeRegistry>,
    pub metrics_token: Option<String>,
    pub health_token: Option<String>,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/api/monitors", get(list_monitors).post(create_monitor))
        .route(
            "/api/monitors/:id",
            get(get_monitor).put(update_monitor).delete(delete_monitor),
        )
        .route("/api/monitors/:id/heartbeats", get(monitor_heartbeats))
        .route("/api/monitors/:id/uptime", get(monitor_uptime))
        .route("/ws", get(ws_handler))
        .route("/metrics", get(metrics))
        .route("/health", get(health))
        .with_state(state)
}

#[derive(Deserialize)]
struct UserScope {
    user_id: i64,
}

async fn list_monitors(State(state): State<AppState>, Query(q): Query<UserScope>) -> impl IntoResponse {
    match state.store.list_monitors_for_user(q.user_id).await {
        Ok(monitors) => {
            let ids: Vec<i64> = monitors.iter().map(|m| m.id).collect();
            let latest = state.store.latest_for_monitors(&ids).await.unwrap_or_default();
            let by_monitor: std::collections::HashMap<i64, _> = latest.into_iter().map(|hb| (hb.monitor_id, hb)).collect();

            let payload: Vec<_> = monitors
                .into_iter()
                .map(|m| {
                    let hb = by_monitor.get(&m.id);
                    json!({ "monitor": m, "last_heartbeat": hb })
                })
                .collect();

            Json(payload).into_response()
        }
        Err(e) => internal_error(e).into_response(),
    }
}

async fn get_monitor(State(state): State<AppState>, Path(id): Path<i64>) -> impl IntoResponse {
    match state.store.fetch_monitor(id).await {
        Ok(Some(monitor)) => Json(monitor).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, "monitor not found").into_response(),
        Err(e) => internal_error(e).into_response(),
    }
}

async fn create_monitor(State(state): State<AppState>, Json(new): Json<NewMonitor>) -> impl IntoResponse {
    if let Err(e) = state.probes.validate(new.kind.as_str(), &new.config) {
        return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
    }

    match state.store.create_monitor(&new).await {
        Ok(monitor) => {
            state.scheduler.start(monitor.clone()).await;
            (StatusCode::CREATED, Json(monitor)).into_response()
        }
        Err(e) => internal_error(e).into_response(),
    }
}

async fn update_monitor(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(update): Json<NewMonitor>,
) -> impl IntoResponse {
    if let Err(e) = state.probes.validate(update.kind.as_str(), &update.config) {
        return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
    }

    match state.store.update_monitor(id, &update).await {
        Ok(monitor) => {
            // restart-as-config-change semantics (§4.3): stop then start,
            // whether or not the monitor is still active.
            state.scheduler.start(monitor.clone()).await;
            Json(monitor).into_response()
        }
        Err(crate::error::StoreError::MonitorNotFound(_)) => (StatusCode::NOT_FOUND, "monitor not found").into_response(),
        Err(e) => internal_error(e).into_response(),
    }
}

async fn delete_monitor(State(state): State<AppState>, Path(id): Path<i64>) -> impl IntoResponse {
    state.scheduler.stop(id).await;
    match state.store.delete_monitor(id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(crate::error::StoreError::MonitorNotFound(_)) => (StatusCode::NOT_FOUND, "monitor not found").into_response(),
        Err(e) => internal_error(e).into_response(),
    }
}

#[derive(Deserialize)]
struct HeartbeatQuery {
    #[serde(default)]
    hours: Option<i64>,
    #[serde(default)]
    limit: Option<i64>,
}

async fn monitor_heartbeats(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(q): Query<HeartbeatQuery>,
) -> impl IntoResponse {
    let end = Utc::now();
    let start = end - chrono::Duration::hours(q.hours.unwrap_or(24).max(1));
    let limit = q.limit.unwrap_or(500).clamp(1, 5000);

    match state.store.window(id, start, end, limit).await {
        Ok(heartbeats) => Json(heartbeats).into_response(),
        Err(e) => internal_error(e).into_response(),
    }
}

async fn monitor_uptime(State(state): State<AppState>, Path(id): Path<i64>, Query(q): Query<HeartbeatQuery>) -> impl IntoResponse {
    let end = Utc::now();
    let hours = q.hours.unwrap_or(24).max(1);
    let start = end - chrono::Duration::hours(hours);

    // §4.8: bound query cost by reading the hourly rollup table once the
    // window exceeds a day; raw heartbeats only for same-day windows.
    let totals = if hours > 24 {
        state.store.hourly_totals(id, start, end).await.map(|t| (t.total, t.up))
    } else {
        state
            .store
            .bucketed_counts(id, start, end, hours * 3600)
            .await
            .map(|buckets| (buckets.iter().map(|b| b.total).sum(), buckets.iter().map(|b| b.up_count).sum()))
    };

    match totals {
        Ok((total, up)) => {
            let pct = if total == 0 { None } else { Some(up as f64 / total as f64 * 100.0) };
            Json(json!({ "monitor_id": id, "window_hours": hours, "total": total, "up": up, "uptime_pct": pct })).into_response()
        }
        Err(e) => internal_error(e).into_response(),
    }
}

#[derive(Deserialize)]
struct WsSubscribeQuery {
    #[serde(default)]
    monitor_id: Option<i64>,
}

async fn ws_handler(State(state): State<AppState>, Query(q): Query<WsSubscribeQuery>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state.hub, q.monitor_id))
}

async fn handle_socket(socket: WebSocket, hub: BroadcastHub, initial_monitor: Option<i64>) {
    use futures::{SinkExt, StreamExt};

    let subscription = hub.subscribe_connection();
    if let Some(monitor_id) = initial_monitor {
        hub.subscribe(subscription.id, monitor_id).await;
    }

    let (mut sender, mut receiver) = socket.split();

    let recv_task = tokio::spawn(async move {
        loop {
            match subscription.recv().await {
                Some(frame) => {
                    let Ok(text) = serde_json::to_string(&frame) else { continue };
                    if sender.send(WsMessage::Text(text)).await.is_err() {
                        break;
                    }
                }
                None => break,
            }
        }
    });

    while let Some(Ok(msg)) = receiver.next().await {
        if matches!(msg, WsMessage::Close(_)) {
            break;
        }
    }

    recv_task.abort();
}

async fn metrics(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    if !authorized(&headers, &state.metrics_token) {
        return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
    }

    let running = state.scheduler.running_count().await;
    let subscribers = state.hub.subscriber_count();

    let body = format!(
        "# HELP uptime_core_active_workers Number of running monitor workers\n\
         # TYPE uptime_core_active_workers gauge\n\
         uptime_core_active_workers {running}\n\
         # HELP uptime_core_ws_subscribers Number of connected websocket subscribers\n\
         # TYPE uptime_core_ws_subscribers gauge\n\
         uptime_core_ws_subscribers {subscribers}\n"
    );

    ([(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")], body).into_response()
}

async fn health(headers: HeaderMap, State(state): State<AppState>) -> impl IntoResponse {
    if !authorized(&headers, &state.health_token) {
        return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
    }
    Json(json!({ "status": Status::Up.label() })).into_response()
}

fn authorized(headers: &HeaderMap, expected: &Option<String>) -> bool {
    let Some(expected) = expected else { return true };
    let Some(header) = headers.get(axum::http::header::AUTHORIZATION) else { return false };
    let Ok(value) = header.to_str() else { return false };
    value.strip_prefix("Bearer ").map(|token| token == expected).unwrap_or(false)
}

fn internal_error(e: impl std::fmt::Display) -> impl IntoResponse {
    tracing::error!("request failed: {}", e);
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

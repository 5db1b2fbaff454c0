//! Scheduler & worker pool (§4.3): one long-lived task per active monitor,
//! ticking on its own interval, independent of every other monitor.
//!
//! The live-worker map is guarded by a single mutex (teacher precedent:
//! `monitor.rs`'s single `DashMap<String, MonitorStatus>` driving the whole
//! probe loop) so that `apply` calls — add, remove, or restart a monitor —
//! never race a worker's own lifecycle. A config change is handled as
//! stop-then-start rather than in-place mutation: simpler to reason about,
//! and a monitor's "last status" is always reseeded from the store on
//! restart instead of carried across the config boundary.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use trust_dns_resolver::TokioAsyncResolver;

use crate::dispatcher::{Dispatcher, TransitionState};
use crate::hub::BroadcastHub;
use crate::model::Monitor;
use crate::probe::{ProbeContext, ProbeRegistry, DEADLINE_SLACK};
use crate::store::HeartbeatStore;

struct Worker {
    handle: tokio::task::JoinHandle<()>,
    cancel: CancellationToken,
}

pub struct Scheduler {
    probes: Arc<ProbeRegistry>,
    store: HeartbeatStore,
    hub: BroadcastHub,
    dispatcher: Arc<Dispatcher>,
    resolver: Arc<TokioAsyncResolver>,
    workers: Mutex<HashMap<i64, Worker>>,
    shutdown: CancellationToken,
}

impl Scheduler {
    pub fn new(
        probes: Arc<ProbeRegistry>,
        store: HeartbeatStore,
        hub: BroadcastHub,
        dispatcher: Arc<Dispatcher>,
        resolver: Arc<TokioAsyncResolver>,
    ) -> Self {
        Self {
            probes,
            store,
            hub,
            dispatcher,
            resolver,
            workers: Mutex::new(HashMap::new()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Start a worker for every active monitor currently in the store. Call
    /// once at process startup, after migrations have run.
    pub async fn start_all(&self) -> Result<(), crate::error::StoreError> {
        let monitors = self.store.active_monitors().await?;
        for monitor in monitors {
            self.start(monitor).await;
        }
        Ok(())
    }

    /// Start (or restart) the worker for a single monitor. Used by the CRUD
    /// layer after create/update; a monitor already running under this id is
    /// stopped first so config changes always take effect on the next tick.
    pub async fn start(&self, monitor: Monitor) {
        self.stop(monitor.id).await;

        if !monitor.active {
            return;
        }

        let monitor_id = monitor.id;
        let cancel = self.shutdown.child_token();
        let worker_cancel = cancel.clone();
        let probes = self.probes.clone();
        let store = self.store.clone();
        let hub = self.hub.clone();
        let dispatcher = self.dispatcher.clone();
        let resolver = self.resolver.clone();

        let handle = tokio::spawn(async move {
            run_worker(monitor, probes, store, hub, dispatcher, resolver, worker_cancel).await;
        });

        self.workers.lock().await.insert(monitor_id, Worker { handle, cancel });
    }

    /// Stop the worker for a monitor, if one is running. Used when a monitor
    /// is deactivated or deleted, and internally by `start` on restart.
    pub async fn stop(&self, monitor_id: i64) {
        if let Some(worker) = self.workers.lock().await.remove(&monitor_id) {
            worker.cancel.cancel();
            let _ = worker.handle.await;
        }
    }

    pub async fn running_count(&self) -> usize {
        self.workers.lock().await.len()
    }

    /// Cancel every worker and wait for them to finish their current tick.
    /// Called during graceful shutdown (§7).
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let mut workers = self.workers.lock().await;
        for (_, worker) in workers.drain() {
            let _ = worker.handle.await;
        }
    }
}

async fn run_worker(
    monitor: Monitor,
    probes: Arc<ProbeRegistry>,
    store: HeartbeatStore,
    hub: BroadcastHub,
    dispatcher: Arc<Dispatcher>,
    resolver: Arc<TokioAsyncResolver>,
    cancel: CancellationToken,
) {
    let monitor_id = monitor.id;
    let interval = Duration::from_secs(monitor.interval_secs.max(1) as u64);

    let seed = store.latest_for_monitor(monitor_id).await.unwrap_or(None);
    let mut state = TransitionState::seed(seed.as_ref());

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!("worker for monitor {} stopping", monitor_id);
                return;
            }
            _ = ticker.tick() => {}
        }

        let monitor = match store.fetch_monitor(monitor_id).await {
            Ok(Some(m)) => m,
            Ok(None) => {
                tracing::warn!("monitor {} disappeared, stopping worker", monitor_id);
                return;
            }
            Err(e) => {
                tracing::error!("monitor {} lookup failed: {}, skipping tick", monitor_id, e);
                continue;
            }
        };

        if !monitor.active {
            tracing::debug!("monitor {} deactivated, stopping worker", monitor_id);
            return;
        }

        let deadline = Instant::now() + Duration::from_secs(monitor.timeout_secs.max(1) as u64) + DEADLINE_SLACK;
        let ctx = ProbeContext {
            deadline,
            ip_version: monitor.ip_version,
            resolver: resolver.clone(),
            allow_private_targets: false,
        };

        let mut new_hb = probes.check(&ctx, &monitor).await;

        let (next_state, important, _outcome) = dispatcher
            .handle(&monitor, state, new_hb.status, monitor.resend_interval)
            .await;
        state = next_state;
        if important {
            new_hb = new_hb.important();
        }

        match store.insert(&new_hb).await {
            Ok(persisted) => hub.publish(&persisted).await,
            Err(e) => tracing::error!("failed to persist heartbeat for monitor {}: {}", monitor_id, e),
        }
    }
}

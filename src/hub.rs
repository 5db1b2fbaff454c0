//! Broadcast hub (§4.5): in-process pub/sub fanning live heartbeats out to
//! subscribed clients (typically WebSocket connections).
//!
//! Delivery is best-effort and non-blocking: a subscriber's outbound queue
//! has fixed capacity; on overflow the oldest queued message is dropped
//! (§9, design notes — "the hub MUST NOT block probes"). A subscriber whose
//! queue stays saturated across `DISCONNECT_GRACE` consecutive drops is
//! disconnected. `tokio::sync::mpsc` only offers drop-newest backpressure,
//! so the mailbox here is a small hand-rolled ring buffer behind a mutex,
//! woken by a `Notify` — the same shape `dashmap`-keyed fan-out structures
//! in this corpus use for per-connection state plus a wake signal.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::{Mutex, Notify};
use uuid::Uuid;

use crate::model::Heartbeat;

/// Per-subscriber outbound queue capacity before drop-oldest kicks in.
const QUEUE_CAPACITY: usize = 64;
/// Consecutive full-queue drops before a subscriber is disconnected.
const DISCONNECT_GRACE: u32 = 16;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    Heartbeat { payload: HeartbeatPayload },
    Connected,
    Pong,
}

#[derive(Debug, Clone, Serialize)]
pub struct HeartbeatPayload {
    pub id: i64,
    pub monitor_id: i64,
    pub status: i16,
    pub ping: i64,
    pub important: bool,
    pub message: String,
    pub time: chrono::DateTime<chrono::Utc>,
}

impl From<&Heartbeat> for HeartbeatPayload {
    fn from(hb: &Heartbeat) -> Self {
        Self {
            id: hb.id,
            monitor_id: hb.monitor_id,
            status: hb.status.as_i16(),
            ping: hb.ping_ms,
            important: hb.important,
            message: hb.message.clone(),
            time: hb.time,
        }
    }
}

struct Subscriber {
    mailbox: Mutex<VecDeque<Frame>>,
    notify: Notify,
    /// A subscriber starts with an empty set and opts in via `subscribe`.
    monitors: Mutex<HashSet<i64>>,
    overflow_streak: AtomicU32,
}

#[derive(Clone)]
pub struct BroadcastHub {
    subscribers: Arc<DashMap<Uuid, Arc<Subscriber>>>,
}

pub struct Subscription {
    pub id: Uuid,
    sub: Arc<Subscriber>,
    hub: BroadcastHub,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.hub.subscribers.remove(&self.id);
    }
}

impl Subscription {
    /// Wait for and return the next queued frame. `None` means the
    /// subscriber was disconnected by the hub (persistent overflow).
    pub async fn recv(&self) -> Option<Frame> {
        loop {
            if let Some(frame) = self.sub.mailbox.lock().await.pop_front() {
                return Some(frame);
            }
            if !self.hub.subscribers.contains_key(&self.id) {
                return None;
            }
            self.sub.notify.notified().await;
        }
    }

    /// Non-blocking drain, used by tests and by callers that poll.
    pub fn try_recv(&self) -> Option<Frame> {
        self.sub.mailbox.try_lock().ok().and_then(|mut q| q.pop_front())
    }
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(DashMap::new()),
        }
    }

    /// Register a new subscriber with an empty subscription set. The caller
    /// drives `Subscription::recv` and calls `subscribe`/`unsubscribe` as
    /// control frames arrive from the client.
    pub fn subscribe_connection(&self) -> Subscription {
        let id = Uuid::new_v4();
        let sub = Arc::new(Subscriber {
            mailbox: Mutex::new(VecDeque::with_capacity(QUEUE_CAPACITY)),
            notify: Notify::new(),
            monitors: Mutex::new(HashSet::new()),
            overflow_streak: AtomicU32::new(0),
        });
        self.subscribers.insert(id, sub.clone());
        Subscription { id, sub, hub: self.clone() }
    }

    pub async fn subscribe(&self, id: Uuid, monitor_id: i64) {
        if let Some(sub) = self.subscribers.get(&id) {
            sub.monitors.lock().await.insert(monitor_id);
        }
    }

    pub async fn unsubscribe(&self, id: Uuid, monitor_id: i64) {
        if let Some(sub) = self.subscribers.get(&id) {
            sub.monitors.lock().await.remove(&monitor_id);
        }
    }

    /// Publish a heartbeat to every subscriber whose set includes its
    /// monitor. Never blocks on a slow consumer: a full queue drops its
    /// oldest entry first. This must be callable from the scheduler's hot
    /// path without ever stalling a probe.
    pub async fn publish(&self, hb: &Heartbeat) {
        let frame = Frame::Heartbeat { payload: HeartbeatPayload::from(hb) };
        let mut to_drop = Vec::new();

        for entry in self.subscribers.iter() {
            let id = *entry.key();
            let sub = entry.value().clone();
            if !sub.monitors.lock().await.contains(&hb.monitor_id) {
                continue;
            }

            let mut mailbox = sub.mailbox.lock().await;
            let was_full = mailbox.len() >= QUEUE_CAPACITY;
            if was_full {
                mailbox.pop_front();
            }
            mailbox.push_back(frame.clone());
            drop(mailbox);
            sub.notify.notify_one();

            if was_full {
                let streak = sub.overflow_streak.fetch_add(1, Ordering::Relaxed) + 1;
                if streak >= DISCONNECT_GRACE {
                    to_drop.push(id);
                }
            } else {
                sub.overflow_streak.store(0, Ordering::Relaxed);
            }
        }

        for id in to_drop {
            if let Some((_, sub)) = self.subscribers.remove(&id) {
                sub.notify.notify_waiters();
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Heartbeat, Status};

    fn hb(monitor_id: i64, n: i64) -> Heartbeat {
        Heartbeat {
            id: n,
            monitor_id,
            status: Status::Up,
            ping_ms: 10,
            important: false,
            message: format!("n={n}"),
            time: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn delivers_only_to_subscribed_monitor() {
        let hub = BroadcastHub::new();
        let sub_a = hub.subscribe_connection();
        hub.subscribe(sub_a.id, 1).await;

        hub.publish(&hb(1, 1)).await;
        hub.publish(&hb(2, 2)).await;

        let Frame::Heartbeat { payload } = sub_a.try_recv().unwrap() else { panic!() };
        assert_eq!(payload.monitor_id, 1);
        assert!(sub_a.try_recv().is_none());
    }

    #[tokio::test]
    async fn drop_oldest_on_full_queue_preserves_newest() {
        let hub = BroadcastHub::new();
        let sub = hub.subscribe_connection();
        hub.subscribe(sub.id, 1).await;

        for n in 0..(QUEUE_CAPACITY as i64 + 5) {
            hub.publish(&hb(1, n)).await;
        }

        let mut last = None;
        while let Some(frame) = sub.try_recv() {
            if let Frame::Heartbeat { payload } = frame {
                last = Some(payload.id);
            }
        }
        assert_eq!(last, Some(QUEUE_CAPACITY as i64 + 4));
    }

    #[tokio::test]
    async fn persistent_overflow_disconnects_subscriber() {
        let hub = BroadcastHub::new();
        let sub = hub.subscribe_connection();
        hub.subscribe(sub.id, 1).await;

        // never drain: every publish past QUEUE_CAPACITY counts as an
        // overflow, so after DISCONNECT_GRACE of them the hub drops it.
        for n in 0..(QUEUE_CAPACITY as i64 + DISCONNECT_GRACE as i64 + 1) {
            hub.publish(&hb(1, n)).await;
        }

        assert_eq!(hub.subscriber_count(), 0);
        while sub.try_recv().is_some() {}
        assert!(sub.recv().await.is_none());
    }

    #[tokio::test]
    async fn per_monitor_order_preserved_for_single_subscriber() {
        let hub = BroadcastHub::new();
        let sub = hub.subscribe_connection();
        hub.subscribe(sub.id, 7).await;

        for n in 0..5 {
            hub.publish(&hb(7, n)).await;
        }

        let mut seen = Vec::new();
        while let Some(Frame::Heartbeat { payload }) = sub.try_recv() {
            seen.push(payload.id);
        }
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
    }
}

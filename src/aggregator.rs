//! Aggregator & retention (§4.8): four independent cron-like background
//! loops — hourly rollup, daily rollup, heartbeat retention, stat retention.
//!
//! Each loop computes the next wall-clock instant it's due (rather than
//! sleeping a fixed duration) so a slow tick, a paused process, or clock
//! drift never compounds into schedule skew — the next run is always
//! computed fresh off `Utc::now()`, matching the "missed run is simply
//! skipped, not queued" rule in §4.8.

use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, NaiveTime, TimeZone, Timelike, Utc};
use tokio_util::sync::CancellationToken;

use crate::store::HeartbeatStore;

pub struct RetentionConfig {
    pub heartbeat_days: i64,
    pub stat_hourly_days: i64,
    pub stat_daily_days: i64,
}

pub struct Aggregator {
    store: HeartbeatStore,
    retention: RetentionConfig,
}

impl Aggregator {
    pub fn new(store: HeartbeatStore, retention: RetentionConfig) -> Self {
        Self { store, retention }
    }

    /// Spawn the four background loops. Returns their join handles so the
    /// caller can await them during graceful shutdown.
    pub fn spawn_all(self: std::sync::Arc<Self>, cancel: CancellationToken) -> Vec<tokio::task::JoinHandle<()>> {
        let mut handles = Vec::new();

        let agg = self.clone();
        let c = cancel.clone();
        handles.push(tokio::spawn(async move { agg.hourly_rollup_loop(c).await }));

        let agg = self.clone();
        let c = cancel.clone();
        handles.push(tokio::spawn(async move { agg.daily_rollup_loop(c).await }));

        let agg = self.clone();
        let c = cancel.clone();
        handles.push(tokio::spawn(async move { agg.heartbeat_retention_loop(c).await }));

        let agg = self.clone();
        handles.push(tokio::spawn(async move { agg.stat_retention_loop(cancel).await }));

        handles
    }

    async fn hourly_rollup_loop(&self, cancel: CancellationToken) {
        loop {
            let next = next_hourly_at_minute(5);
            if !sleep_until(next, &cancel).await {
                return;
            }

            let hour_start = next.with_minute(0).unwrap().with_second(0).unwrap().with_nanosecond(0).unwrap() - ChronoDuration::hours(1);
            let hour_end = hour_start + ChronoDuration::hours(1);

            match self.store.monitor_ids_with_heartbeats_in(hour_start, hour_end).await {
                Ok(ids) => {
                    for monitor_id in ids {
                        if let Err(e) = self.rollup_hour(monitor_id, hour_start, hour_end).await {
                            tracing::error!("hourly rollup failed for monitor {}: {}", monitor_id, e);
                        }
                    }
                    tracing::info!("hourly rollup complete for bucket {}", hour_start);
                }
                Err(e) => tracing::error!("hourly rollup: failed to list monitors: {}", e),
            }
        }
    }

    async fn rollup_hour(&self, monitor_id: i64, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<(), crate::error::StoreError> {
        let buckets = self.store.bucketed_counts(monitor_id, start, end, 3600).await?;
        for counts in buckets {
            self.store.upsert_stat_hourly(monitor_id, start, &counts).await?;
        }
        Ok(())
    }

    async fn daily_rollup_loop(&self, cancel: CancellationToken) {
        loop {
            let next = next_daily_at(2, 0);
            if !sleep_until(next, &cancel).await {
                return;
            }

            let day_start = (next - ChronoDuration::days(1)).date_naive().and_hms_opt(0, 0, 0).unwrap();
            let day_start = Utc.from_utc_datetime(&day_start);
            let day_end = day_start + ChronoDuration::days(1);

            match self.store.monitor_ids_with_heartbeats_in(day_start, day_end).await {
                Ok(ids) => {
                    for monitor_id in ids {
                        if let Err(e) = self.rollup_day(monitor_id, day_start, day_end).await {
                            tracing::error!("daily rollup failed for monitor {}: {}", monitor_id, e);
                        }
                    }
                    tracing::info!("daily rollup complete for bucket {}", day_start);
                }
                Err(e) => tracing::error!("daily rollup: failed to list monitors: {}", e),
            }
        }
    }

    async fn rollup_day(&self, monitor_id: i64, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<(), crate::error::StoreError> {
        let buckets = self.store.bucketed_counts(monitor_id, start, end, 86_400).await?;
        for counts in buckets {
            self.store.upsert_stat_daily(monitor_id, start, &counts).await?;
        }
        Ok(())
    }

    async fn heartbeat_retention_loop(&self, cancel: CancellationToken) {
        loop {
            let next = next_daily_at(3, 14);
            if !sleep_until(next, &cancel).await {
                return;
            }

            let cutoff = Utc::now() - ChronoDuration::days(self.retention.heartbeat_days.max(1));
            match self.store.prune_older_than(cutoff).await {
                Ok(n) => tracing::info!("heartbeat retention: pruned {} rows older than {}", n, cutoff),
                Err(e) => tracing::error!("heartbeat retention failed: {}", e),
            }
        }
    }

    async fn stat_retention_loop(&self, cancel: CancellationToken) {
        loop {
            let next = next_daily_at(3, 30);
            if !sleep_until(next, &cancel).await {
                return;
            }

            let hourly_cutoff = Utc::now() - ChronoDuration::days(self.retention.stat_hourly_days.max(1));
            match self.store.prune_stat_hourly_older_than(hourly_cutoff).await {
                Ok(n) => tracing::info!("stat_hourly retention: pruned {} rows older than {}", n, hourly_cutoff),
                Err(e) => tracing::error!("stat_hourly retention failed: {}", e),
            }

            let daily_cutoff = Utc::now() - ChronoDuration::days(self.retention.stat_daily_days.max(1));
            match self.store.prune_stat_daily_older_than(daily_cutoff).await {
                Ok(n) => tracing::info!("stat_daily retention: pruned {} rows older than {}", n, daily_cutoff),
                Err(e) => tracing::error!("stat_daily retention failed: {}", e),
            }
        }
    }
}

/// The next wall-clock instant at `HH:MM:00` today, or tomorrow if that
/// point has already passed.
fn next_daily_at(hour: u32, minute: u32) -> DateTime<Utc> {
    let now = Utc::now();
    let today = now.date_naive().and_time(NaiveTime::from_hms_opt(hour, minute, 0).unwrap());
    let today = Utc.from_utc_datetime(&today);
    if today > now {
        today
    } else {
        today + ChronoDuration::days(1)
    }
}

/// The next wall-clock instant at the top of an hour plus `minute` minutes.
fn next_hourly_at_minute(minute: u32) -> DateTime<Utc> {
    let now = Utc::now();
    let candidate = now
        .with_minute(minute)
        .unwrap()
        .with_second(0)
        .unwrap()
        .with_nanosecond(0)
        .unwrap();
    if candidate > now {
        candidate
    } else {
        candidate + ChronoDuration::hours(1)
    }
}

/// Sleep until `target`, waking early (returning `false`) on cancellation.
async fn sleep_until(target: DateTime<Utc>, cancel: &CancellationToken) -> bool {
    let remaining = (target - Utc::now()).to_std().unwrap_or(Duration::from_secs(0));
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(remaining) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_daily_at_rolls_to_tomorrow_when_past() {
        let now = Utc::now();
        let next = next_daily_at(now.hour(), now.minute().saturating_sub(1).max(0));
        assert!(next > now);
    }

    #[test]
    fn next_hourly_at_minute_is_always_in_the_future() {
        let now = Utc::now();
        let next = next_hourly_at_minute(5);
        assert!(next > now);
        assert_eq!(next.minute(), 5);
    }
}

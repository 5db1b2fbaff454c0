//! Heartbeat store (§4.4): append-only persistence of probe outcomes.
//!
//! Writes are individual inserts triggered by the worker immediately after a
//! probe completes. Reads serve the dispatcher (latest status), the
//! aggregator (range scans), and the CRUD layer (paginated/time-windowed
//! history) — the broadcast hub never reads from here, it's a passthrough.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::error::StoreError;
use crate::model::{Heartbeat, MonitorKind, NewHeartbeat, Status};

#[derive(Clone)]
pub struct HeartbeatStore {
    pool: PgPool,
}

impl HeartbeatStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a heartbeat. Per §7, a write failure is logged and the
    /// heartbeat is dropped — not retried — and the caller (the scheduler)
    /// proceeds to broadcast and dispatch anyway, so this returns the
    /// inserted row only on success and never panics the worker loop.
    pub async fn insert(&self, hb: &NewHeartbeat) -> Result<Heartbeat, StoreError> {
        let row = sqlx::query_as::<_, HeartbeatRow>(
            r#"
            INSERT INTO heartbeats (monitor_id, status, ping_ms, important, message, time)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, monitor_id, status, ping_ms, important, message, time
            "#,
        )
        .bind(hb.monitor_id)
        .bind(hb.status.as_i16())
        .bind(hb.ping_ms)
        .bind(hb.important)
        .bind(&hb.message)
        .bind(hb.time)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into_heartbeat())
    }

    /// Most recent heartbeat for a single monitor, used by the scheduler to
    /// seed a worker's "last status" on start (§4.3).
    pub async fn latest_for_monitor(&self, monitor_id: i64) -> Result<Option<Heartbeat>, StoreError> {
        let row = sqlx::query_as::<_, HeartbeatRow>(
            r#"
            SELECT id, monitor_id, status, ping_ms, important, message, time
            FROM heartbeats
            WHERE monitor_id = $1
            ORDER BY time DESC
            LIMIT 1
            "#,
        )
        .bind(monitor_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(HeartbeatRow::into_heartbeat))
    }

    /// Latest heartbeat per monitor for a set of ids, used by list endpoints
    /// that inline the last status per monitor.
    pub async fn latest_for_monitors(&self, monitor_ids: &[i64]) -> Result<Vec<Heartbeat>, StoreError> {
        let rows = sqlx::query_as::<_, HeartbeatRow>(
            r#"
            SELECT DISTINCT ON (monitor_id)
                id, monitor_id, status, ping_ms, important, message, time
            FROM heartbeats
            WHERE monitor_id = ANY($1)
            ORDER BY monitor_id, time DESC
            "#,
        )
        .bind(monitor_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(HeartbeatRow::into_heartbeat).collect())
    }

    /// Heartbeats in `(monitor_id, start, end)` ordered by time descending,
    /// with a limit, for the windowed-history read API.
    pub async fn window(
        &self,
        monitor_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Heartbeat>, StoreError> {
        let rows = sqlx::query_as::<_, HeartbeatRow>(
            r#"
            SELECT id, monitor_id, status, ping_ms, important, message, time
            FROM heartbeats
            WHERE monitor_id = $1 AND time >= $2 AND time < $3
            ORDER BY time DESC
            LIMIT $4
            "#,
        )
        .bind(monitor_id)
        .bind(start)
        .bind(end)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(HeartbeatRow::into_heartbeat).collect())
    }

    /// Aggregate counts grouped by `(monitor_id, floor(time / bucket_seconds))`
    /// over a range — the primitive the aggregator builds rollups from, and
    /// also usable directly by the ≤24h uptime read path (§4.8).
    pub async fn bucketed_counts(
        &self,
        monitor_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        bucket_seconds: i64,
    ) -> Result<Vec<BucketCounts>, StoreError> {
        let rows = sqlx::query_as::<_, BucketCounts>(
            r#"
            SELECT
                to_timestamp(floor(extract(epoch from time) / $4) * $4) AS bucket_ts,
                COUNT(*) AS total,
                COUNT(*) FILTER (WHERE status = $5) AS up_count,
                COUNT(*) FILTER (WHERE status = $6) AS down_count,
                AVG(ping_ms) FILTER (WHERE status = $5) AS avg_ping
            FROM heartbeats
            WHERE monitor_id = $1 AND time >= $2 AND time < $3
            GROUP BY bucket_ts
            ORDER BY bucket_ts
            "#,
        )
        .bind(monitor_id)
        .bind(start)
        .bind(end)
        .bind(bucket_seconds)
        .bind(Status::Up.as_i16())
        .bind(Status::Down.as_i16())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Bulk delete heartbeats older than `cutoff`, used by the retention job.
    pub async fn prune_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM heartbeats WHERE time < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn fetch_monitor(&self, monitor_id: i64) -> Result<Option<crate::model::Monitor>, StoreError> {
        let row = sqlx::query_as::<_, MonitorRow>(
            r#"
            SELECT id, user_id, name, kind, target, interval_secs, timeout_secs, active,
                   ip_version, resend_interval, config, notifications_configured,
                   created_at, updated_at
            FROM monitors WHERE id = $1
            "#,
        )
        .bind(monitor_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(MonitorRow::into_monitor))
    }

    pub async fn active_monitors(&self) -> Result<Vec<crate::model::Monitor>, StoreError> {
        let rows = sqlx::query_as::<_, MonitorRow>(
            r#"
            SELECT id, user_id, name, kind, target, interval_secs, timeout_secs, active,
                   ip_version, resend_interval, config, notifications_configured,
                   created_at, updated_at
            FROM monitors WHERE active = true
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(MonitorRow::into_monitor).collect())
    }

    /// Every monitor id with at least one heartbeat in `[start, end)`, used
    /// by the aggregator so a rollup run never skips a monitor that was
    /// deactivated mid-bucket (§4.8 rollups operate on historical data, not
    /// on the currently-active set).
    pub async fn monitor_ids_with_heartbeats_in(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<i64>, StoreError> {
        let ids: Vec<i64> = sqlx::query_scalar(
            "SELECT DISTINCT monitor_id FROM heartbeats WHERE time >= $1 AND time < $2",
        )
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    /// Idempotent upsert of one hourly rollup bucket (§4.8: re-running a
    /// rollup for an already-computed bucket must yield the same row).
    pub async fn upsert_stat_hourly(
        &self,
        monitor_id: i64,
        hour_ts: DateTime<Utc>,
        counts: &BucketCounts,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO stat_hourly (monitor_id, hour_ts, total, up_count, down_count, avg_ping)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (monitor_id, hour_ts) DO UPDATE SET
                total = EXCLUDED.total,
                up_count = EXCLUDED.up_count,
                down_count = EXCLUDED.down_count,
                avg_ping = EXCLUDED.avg_ping
            "#,
        )
        .bind(monitor_id)
        .bind(hour_ts)
        .bind(counts.total)
        .bind(counts.up_count)
        .bind(counts.down_count)
        .bind(counts.avg_ping)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Sum of `stat_hourly` rows covering `[start, end)`, the read path for
    /// uptime windows longer than 24h (§4.8: bound query cost by reading the
    /// rollup table instead of scanning raw heartbeats once the window grows
    /// past a day).
    pub async fn hourly_totals(
        &self,
        monitor_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<UptimeTotals, StoreError> {
        let row = sqlx::query_as::<_, UptimeTotals>(
            r#"
            SELECT
                COALESCE(SUM(total), 0) AS total,
                COALESCE(SUM(up_count), 0) AS up
            FROM stat_hourly
            WHERE monitor_id = $1 AND hour_ts >= $2 AND hour_ts < $3
            "#,
        )
        .bind(monitor_id)
        .bind(start)
        .bind(end)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    /// Idempotent upsert of one daily rollup bucket.
    pub async fn upsert_stat_daily(
        &self,
        monitor_id: i64,
        day_ts: DateTime<Utc>,
        counts: &BucketCounts,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO stat_daily (monitor_id, day_ts, total, up_count, down_count, avg_ping)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (monitor_id, day_ts) DO UPDATE SET
                total = EXCLUDED.total,
                up_count = EXCLUDED.up_count,
                down_count = EXCLUDED.down_count,
                avg_ping = EXCLUDED.avg_ping
            "#,
        )
        .bind(monitor_id)
        .bind(day_ts)
        .bind(counts.total)
        .bind(counts.up_count)
        .bind(counts.down_count)
        .bind(counts.avg_ping)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn prune_stat_hourly_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM stat_hourly WHERE hour_ts < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn prune_stat_daily_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM stat_daily WHERE day_ts < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Create a monitor row. Per-kind config validation happens in the
    /// caller (the probe registry), never here.
    pub async fn create_monitor(&self, new: &crate::model::NewMonitor) -> Result<crate::model::Monitor, StoreError> {
        let row = sqlx::query_as::<_, MonitorRow>(
            r#"
            INSERT INTO monitors
                (user_id, name, kind, target, interval_secs, timeout_secs, active,
                 ip_version, resend_interval, config, notifications_configured)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING id, user_id, name, kind, target, interval_secs, timeout_secs, active,
                      ip_version, resend_interval, config, notifications_configured,
                      created_at, updated_at
            "#,
        )
        .bind(new.user_id)
        .bind(&new.name)
        .bind(new.kind.as_str())
        .bind(&new.target)
        .bind(new.interval_secs)
        .bind(new.timeout_secs)
        .bind(new.active)
        .bind(ip_version_str(new.ip_version))
        .bind(new.resend_interval)
        .bind(&new.config)
        .bind(new.notifications_configured)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into_monitor())
    }

    pub async fn update_monitor(&self, id: i64, update: &crate::model::NewMonitor) -> Result<crate::model::Monitor, StoreError> {
        let row = sqlx::query_as::<_, MonitorRow>(
            r#"
            UPDATE monitors SET
                name = $2, kind = $3, target = $4, interval_secs = $5, timeout_secs = $6,
                active = $7, ip_version = $8, resend_interval = $9, config = $10,
                notifications_configured = $11, updated_at = now()
            WHERE id = $1
            RETURNING id, user_id, name, kind, target, interval_secs, timeout_secs, active,
                      ip_version, resend_interval, config, notifications_configured,
                      created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(&update.name)
        .bind(update.kind.as_str())
        .bind(&update.target)
        .bind(update.interval_secs)
        .bind(update.timeout_secs)
        .bind(update.active)
        .bind(ip_version_str(update.ip_version))
        .bind(update.resend_interval)
        .bind(&update.config)
        .bind(update.notifications_configured)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::MonitorNotFound(id))?;

        Ok(row.into_monitor())
    }

    pub async fn delete_monitor(&self, id: i64) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM monitors WHERE id = $1").bind(id).execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::MonitorNotFound(id));
        }
        Ok(())
    }

    pub async fn list_monitors_for_user(&self, user_id: i64) -> Result<Vec<crate::model::Monitor>, StoreError> {
        let rows = sqlx::query_as::<_, MonitorRow>(
            r#"
            SELECT id, user_id, name, kind, target, interval_secs, timeout_secs, active,
                   ip_version, resend_interval, config, notifications_configured,
                   created_at, updated_at
            FROM monitors WHERE user_id = $1
            ORDER BY id
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(MonitorRow::into_monitor).collect())
    }
}

fn ip_version_str(v: crate::model::IpVersion) -> &'static str {
    match v {
        crate::model::IpVersion::Auto => "auto",
        crate::model::IpVersion::V4 => "v4",
        crate::model::IpVersion::V6 => "v6",
    }
}

#[derive(sqlx::FromRow)]
struct HeartbeatRow {
    id: i64,
    monitor_id: i64,
    status: i16,
    ping_ms: i64,
    important: bool,
    message: String,
    time: DateTime<Utc>,
}

impl HeartbeatRow {
    fn into_heartbeat(self) -> Heartbeat {
        Heartbeat {
            id: self.id,
            monitor_id: self.monitor_id,
            status: Status::from_i16(self.status).unwrap_or(Status::Down),
            ping_ms: self.ping_ms,
            important: self.important,
            message: self.message,
            time: self.time,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct BucketCounts {
    pub bucket_ts: DateTime<Utc>,
    pub total: i64,
    pub up_count: i64,
    pub down_count: i64,
    pub avg_ping: Option<f64>,
}

#[derive(Debug, sqlx::FromRow)]
pub struct UptimeTotals {
    pub total: i64,
    pub up: i64,
}

#[derive(sqlx::FromRow)]
struct MonitorRow {
    id: i64,
    user_id: i64,
    name: String,
    kind: String,
    target: String,
    interval_secs: i64,
    timeout_secs: i64,
    active: bool,
    ip_version: String,
    resend_interval: i64,
    config: serde_json::Value,
    notifications_configured: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl MonitorRow {
    fn into_monitor(self) -> crate::model::Monitor {
        use crate::model::IpVersion;
        use std::str::FromStr;

        let ip_version = match self.ip_version.as_str() {
            "v4" => IpVersion::V4,
            "v6" => IpVersion::V6,
            _ => IpVersion::Auto,
        };

        crate::model::Monitor {
            id: self.id,
            user_id: self.user_id,
            name: self.name,
            kind: MonitorKind::from_str(&self.kind).unwrap_or(MonitorKind::Http),
            target: self.target,
            interval_secs: self.interval_secs,
            timeout_secs: self.timeout_secs,
            active: self.active,
            ip_version,
            resend_interval: self.resend_interval,
            config: self.config,
            notifications_configured: self.notifications_configured,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

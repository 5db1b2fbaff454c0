use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The five probe kinds the registry (see `crate::probe`) knows how to run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MonitorKind {
    Http,
    Tcp,
    Ping,
    Dns,
    Container,
}

impl MonitorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MonitorKind::Http => "http",
            MonitorKind::Tcp => "tcp",
            MonitorKind::Ping => "ping",
            MonitorKind::Dns => "dns",
            MonitorKind::Container => "container",
        }
    }
}

impl std::str::FromStr for MonitorKind {
    type Err = crate::error::ProbeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "http" => Ok(MonitorKind::Http),
            "tcp" => Ok(MonitorKind::Tcp),
            "ping" => Ok(MonitorKind::Ping),
            "dns" => Ok(MonitorKind::Dns),
            "container" => Ok(MonitorKind::Container),
            other => Err(crate::error::ProbeError::UnknownKind(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum IpVersion {
    Auto,
    V4,
    V6,
}

impl Default for IpVersion {
    fn default() -> Self {
        IpVersion::Auto
    }
}

/// A configured probe target. Mirrors the `monitors` table; `config` is the
/// opaque per-kind JSON document described in the data model section — kind
/// implementations are the only code that interprets its shape (see §9 of
/// the design notes: avoid exposing a dynamic type to consumers).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Monitor {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub kind: MonitorKind,
    pub target: String,
    pub interval_secs: i64,
    pub timeout_secs: i64,
    pub active: bool,
    #[serde(default)]
    pub ip_version: IpVersion,
    pub resend_interval: i64,
    pub config: serde_json::Value,
    pub notifications_configured: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A monitor creation/update payload, as accepted from the CRUD surface
/// before it has an id or timestamps assigned by the store.
#[derive(Debug, Clone, Deserialize)]
pub struct NewMonitor {
    pub user_id: i64,
    pub name: String,
    pub kind: MonitorKind,
    pub target: String,
    pub interval_secs: i64,
    pub timeout_secs: i64,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub ip_version: IpVersion,
    #[serde(default = "default_resend_interval")]
    pub resend_interval: i64,
    #[serde(default)]
    pub config: serde_json::Value,
    #[serde(default)]
    pub notifications_configured: bool,
}

fn default_true() -> bool {
    true
}

fn default_resend_interval() -> i64 {
    1
}

/// The status codes from the data model section, carried over the wire and
/// in storage as the integer codes (`down=0`, `up=1`, `pending=2`,
/// `maintenance=3`) rather than as a tagged JSON enum, since external
/// consumers (the broadcast frame, the metrics exposition) expect the bare
/// integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i16)]
pub enum Status {
    Down = 0,
    Up = 1,
    Pending = 2,
    Maintenance = 3,
}

impl Status {
    pub fn from_i16(v: i16) -> Option<Status> {
        match v {
            0 => Some(Status::Down),
            1 => Some(Status::Up),
            2 => Some(Status::Pending),
            3 => Some(Status::Maintenance),
            _ => None,
        }
    }

    pub fn as_i16(&self) -> i16 {
        *self as i16
    }

    pub fn label(&self) -> &'static str {
        match self {
            Status::Down => "down",
            Status::Up => "up",
            Status::Pending => "pending",
            Status::Maintenance => "maintenance",
        }
    }
}

impl Serialize for Status {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_i16(self.as_i16())
    }
}

impl<'de> Deserialize<'de> for Status {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let v = i16::deserialize(d)?;
        Status::from_i16(v).ok_or_else(|| serde::de::Error::custom(format!("invalid status code {v}")))
    }
}

/// One probe outcome. Append-only; never mutated once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Heartbeat {
    pub id: i64,
    pub monitor_id: i64,
    pub status: Status,
    pub ping_ms: i64,
    pub important: bool,
    pub message: String,
    pub time: DateTime<Utc>,
}

/// A not-yet-persisted probe outcome, as produced by a probe kind's `check`.
#[derive(Debug, Clone)]
pub struct NewHeartbeat {
    pub monitor_id: i64,
    pub status: Status,
    pub ping_ms: i64,
    pub important: bool,
    pub message: String,
    pub time: DateTime<Utc>,
}

impl NewHeartbeat {
    pub fn new(monitor_id: i64, status: Status, ping_ms: i64, message: impl Into<String>) -> Self {
        Self {
            monitor_id,
            status,
            ping_ms,
            important: false,
            message: message.into(),
            time: Utc::now(),
        }
    }

    pub fn important(mut self) -> Self {
        self.important = true;
        self
    }
}

/// A configured outbound notification channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub kind: String,
    pub config: serde_json::Value,
    pub is_default: bool,
    pub active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatHourly {
    pub monitor_id: i64,
    pub hour_ts: DateTime<Utc>,
    pub total: i64,
    pub up_count: i64,
    pub down_count: i64,
    pub avg_ping: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatDaily {
    pub monitor_id: i64,
    pub day_ts: DateTime<Utc>,
    pub total: i64,
    pub up_count: i64,
    pub down_count: i64,
    pub avg_ping: Option<f64>,
}

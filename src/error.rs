use thiserror::Error;

/// Errors a probe implementation can surface to its caller.
///
/// Per the component contract a probe never actually returns `Err` from
/// `check` (a failed check is encoded as a `down` heartbeat instead); this
/// type exists for the few call sites that validate configuration or talk to
/// the SSRF guard before a probe has a heartbeat to report into.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("unknown probe kind: {0}")]
    UnknownKind(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("target rejected by SSRF guard: {0}")]
    SsrfRejected(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("monitor {0} not found")]
    MonitorNotFound(i64),
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("unknown notification kind: {0}")]
    UnknownKind(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("send failed: {0}")]
    SendFailed(String),

    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),
}

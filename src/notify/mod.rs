//! Notification registry & providers (§4.6).
//!
//! Providers register under a name and expose `validate`/`send`. Each
//! provider performs its own outbound call with a fixed internal timeout and
//! returns success or a descriptive error; providers must not retry
//! internally (retry policy is a system-wide decision — currently none).

mod discord;
mod gotify;
mod ntfy;
mod pagerduty;
mod pushover;
mod slack;
mod smtp;
mod teams;
mod telegram;
mod webhook;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::NotifyError;
use crate::model::{Notification, Status};

/// Fixed internal timeout every provider implementation uses for its own
/// HTTP/SMTP call, per §4.6.
pub const PROVIDER_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub title: String,
    pub body: String,
    pub monitor_name: String,
    pub monitor_url: Option<String>,
    pub status: MessageStatus,
    pub latest_ping_ms: i64,
    pub timestamp: DateTime<Utc>,
    pub important: bool,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Up,
    Down,
    Maintenance,
}

impl From<Status> for MessageStatus {
    fn from(s: Status) -> Self {
        match s {
            Status::Up => MessageStatus::Up,
            Status::Down => MessageStatus::Down,
            Status::Pending | Status::Maintenance => MessageStatus::Maintenance,
        }
    }
}

#[async_trait]
pub trait NotificationProvider: Send + Sync {
    fn name(&self) -> &'static str;
    fn validate(&self, config: &serde_json::Value) -> Result<(), NotifyError>;
    async fn send(&self, notification: &Notification, message: &Message) -> Result<(), NotifyError>;
}

#[derive(Clone)]
pub struct NotificationRegistry {
    providers: HashMap<&'static str, Arc<dyn NotificationProvider>>,
}

impl NotificationRegistry {
    pub fn empty() -> Self {
        Self { providers: HashMap::new() }
    }

    pub fn with_builtins() -> Self {
        let mut reg = Self::empty();
        reg.register(Arc::new(smtp::SmtpProvider));
        reg.register(Arc::new(webhook::WebhookProvider));
        reg.register(Arc::new(discord::DiscordProvider));
        reg.register(Arc::new(slack::SlackProvider));
        reg.register(Arc::new(teams::TeamsProvider));
        reg.register(Arc::new(telegram::TelegramProvider));
        reg.register(Arc::new(pagerduty::PagerDutyProvider));
        reg.register(Arc::new(pushover::PushoverProvider));
        reg.register(Arc::new(gotify::GotifyProvider));
        reg.register(Arc::new(ntfy::NtfyProvider));
        reg
    }

    pub fn register(&mut self, provider: Arc<dyn NotificationProvider>) {
        self.providers.insert(provider.name(), provider);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn NotificationProvider>> {
        self.providers.get(name).cloned()
    }

    pub fn validate(&self, kind: &str, config: &serde_json::Value) -> Result<(), NotifyError> {
        self.get(kind)
            .ok_or_else(|| NotifyError::UnknownKind(kind.to_string()))?
            .validate(config)
    }

    pub async fn send(&self, notification: &Notification, message: &Message) -> Result<(), NotifyError> {
        let provider = self
            .get(notification.kind.as_str())
            .ok_or_else(|| NotifyError::UnknownKind(notification.kind.clone()))?;
        provider.send(notification, message).await
    }
}

impl Default for NotificationRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

/// Shared helper: every HTTP-based provider builds a client with the same
/// fixed timeout rather than rolling its own.
pub(crate) fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(PROVIDER_TIMEOUT)
        .build()
        .expect("static client config is always valid")
}

pub(crate) fn config_field<'a>(config: &'a serde_json::Value, field: &str) -> Result<&'a str, NotifyError> {
    config
        .get(field)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| NotifyError::InvalidConfig(format!("missing or empty field '{field}'")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_knows_all_ten_builtin_providers() {
        let reg = NotificationRegistry::with_builtins();
        for kind in [
            "smtp", "webhook", "discord", "slack", "teams", "telegram", "pagerduty", "pushover", "gotify", "ntfy",
        ] {
            assert!(reg.get(kind).is_some(), "missing provider {kind}");
        }
    }

    #[test]
    fn unknown_kind_fails_validation() {
        let reg = NotificationRegistry::with_builtins();
        assert!(reg.validate("carrier-pigeon", &serde_json::json!({})).is_err());
    }
}

use async_trait::async_trait;

use super::{config_field, http_client, Message, MessageStatus, NotificationProvider};
use crate::error::NotifyError;
use crate::model::Notification;

const DEFAULT_SERVER: &str = "https://ntfy.sh";

pub struct NtfyProvider;

#[async_trait]
impl NotificationProvider for NtfyProvider {
    fn name(&self) -> &'static str {
        "ntfy"
    }

    fn validate(&self, config: &serde_json::Value) -> Result<(), NotifyError> {
        config_field(config, "topic")?;
        Ok(())
    }

    async fn send(&self, notification: &Notification, message: &Message) -> Result<(), NotifyError> {
        let topic = config_field(&notification.config, "topic")?;
        let server = notification
            .config
            .get("server_url")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_SERVER)
            .trim_end_matches('/');

        let priority = if matches!(message.status, MessageStatus::Down) { "5" } else { "3" };
        let url = format!("{server}/{topic}");

        let resp = http_client()
            .post(&url)
            .header("Title", &message.title)
            .header("Priority", priority)
            .body(message.body.clone())
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(NotifyError::SendFailed(format!("ntfy returned {}", resp.status())));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_requires_topic() {
        let p = NtfyProvider;
        assert!(p.validate(&serde_json::json!({})).is_err());
        assert!(p.validate(&serde_json::json!({ "topic": "my-alerts" })).is_ok());
    }
}

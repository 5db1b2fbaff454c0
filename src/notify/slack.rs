use async_trait::async_trait;
use serde_json::json;

use super::{config_field, http_client, Message, MessageStatus, NotificationProvider};
use crate::error::NotifyError;
use crate::model::Notification;

pub struct SlackProvider;

#[async_trait]
impl NotificationProvider for SlackProvider {
    fn name(&self) -> &'static str {
        "slack"
    }

    fn validate(&self, config: &serde_json::Value) -> Result<(), NotifyError> {
        config_field(config, "webhook_url")?;
        Ok(())
    }

    async fn send(&self, notification: &Notification, message: &Message) -> Result<(), NotifyError> {
        let url = config_field(&notification.config, "webhook_url")?;

        let emoji = match message.status {
            MessageStatus::Up => ":large_green_circle:",
            MessageStatus::Down => ":red_circle:",
            MessageStatus::Maintenance => ":large_yellow_circle:",
        };

        let payload = json!({
            "text": format!("{emoji} *{}*\n{}", message.title, message.body),
            "attachments": [{
                "fields": [
                    { "title": "Monitor", "value": message.monitor_name, "short": true },
                    { "title": "Ping", "value": format!("{}ms", message.latest_ping_ms), "short": true },
                ]
            }]
        });

        let resp = http_client().post(url).json(&payload).send().await?;
        if !resp.status().is_success() {
            return Err(NotifyError::SendFailed(format!("slack webhook returned {}", resp.status())));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_requires_webhook_url() {
        let p = SlackProvider;
        assert!(p.validate(&serde_json::json!({})).is_err());
    }
}

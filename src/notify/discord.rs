use async_trait::async_trait;
use serde_json::json;

use super::{config_field, http_client, Message, MessageStatus, NotificationProvider};
use crate::error::NotifyError;
use crate::model::Notification;

pub struct DiscordProvider;

#[async_trait]
impl NotificationProvider for DiscordProvider {
    fn name(&self) -> &'static str {
        "discord"
    }

    fn validate(&self, config: &serde_json::Value) -> Result<(), NotifyError> {
        config_field(config, "webhook_url")?;
        Ok(())
    }

    async fn send(&self, notification: &Notification, message: &Message) -> Result<(), NotifyError> {
        let url = config_field(&notification.config, "webhook_url")?;

        let color = match message.status {
            MessageStatus::Up => 0x2ECC71,
            MessageStatus::Down => 0xE74C3C,
            MessageStatus::Maintenance => 0xF1C40F,
        };

        let payload = json!({
            "embeds": [{
                "title": message.title,
                "description": message.body,
                "color": color,
                "fields": [
                    { "name": "Monitor", "value": message.monitor_name, "inline": true },
                    { "name": "Status", "value": format!("{:?}", message.status), "inline": true },
                    { "name": "Ping", "value": format!("{}ms", message.latest_ping_ms), "inline": true },
                ],
                "timestamp": message.timestamp.to_rfc3339(),
            }]
        });

        let resp = http_client().post(url).json(&payload).send().await?;
        if !resp.status().is_success() {
            return Err(NotifyError::SendFailed(format!("discord webhook returned {}", resp.status())));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_requires_webhook_url() {
        let p = DiscordProvider;
        assert!(p.validate(&serde_json::json!({})).is_err());
    }
}

use async_trait::async_trait;
use serde_json::json;

use super::{config_field, http_client, Message, MessageStatus, NotificationProvider};
use crate::error::NotifyError;
use crate::model::Notification;

/// Microsoft Teams incoming webhook, using the legacy MessageCard payload
/// format (still the widest-supported shape for connector webhooks).
pub struct TeamsProvider;

#[async_trait]
impl NotificationProvider for TeamsProvider {
    fn name(&self) -> &'static str {
        "teams"
    }

    fn validate(&self, config: &serde_json::Value) -> Result<(), NotifyError> {
        config_field(config, "webhook_url")?;
        Ok(())
    }

    async fn send(&self, notification: &Notification, message: &Message) -> Result<(), NotifyError> {
        let url = config_field(&notification.config, "webhook_url")?;

        let theme_color = match message.status {
            MessageStatus::Up => "2ECC71",
            MessageStatus::Down => "E74C3C",
            MessageStatus::Maintenance => "F1C40F",
        };

        let payload = json!({
            "@type": "MessageCard",
            "@context": "http://schema.org/extensions",
            "themeColor": theme_color,
            "summary": message.title,
            "title": message.title,
            "text": message.body,
            "sections": [{
                "facts": [
                    { "name": "Monitor", "value": message.monitor_name },
                    { "name": "Status", "value": format!("{:?}", message.status) },
                    { "name": "Ping", "value": format!("{}ms", message.latest_ping_ms) },
                ]
            }]
        });

        let resp = http_client().post(url).json(&payload).send().await?;
        if !resp.status().is_success() {
            return Err(NotifyError::SendFailed(format!("teams webhook returned {}", resp.status())));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_requires_webhook_url() {
        let p = TeamsProvider;
        assert!(p.validate(&serde_json::json!({})).is_err());
    }
}

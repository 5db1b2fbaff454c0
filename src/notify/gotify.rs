use async_trait::async_trait;
use serde_json::json;

use super::{config_field, http_client, Message, MessageStatus, NotificationProvider};
use crate::error::NotifyError;
use crate::model::Notification;

pub struct GotifyProvider;

#[async_trait]
impl NotificationProvider for GotifyProvider {
    fn name(&self) -> &'static str {
        "gotify"
    }

    fn validate(&self, config: &serde_json::Value) -> Result<(), NotifyError> {
        config_field(config, "server_url")?;
        config_field(config, "app_token")?;
        Ok(())
    }

    async fn send(&self, notification: &Notification, message: &Message) -> Result<(), NotifyError> {
        let server_url = config_field(&notification.config, "server_url")?.trim_end_matches('/');
        let app_token = config_field(&notification.config, "app_token")?;

        let priority = if matches!(message.status, MessageStatus::Down) { 8 } else { 4 };

        let url = format!("{server_url}/message?token={app_token}");
        let resp = http_client()
            .post(&url)
            .json(&json!({
                "title": message.title,
                "message": message.body,
                "priority": priority,
            }))
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(NotifyError::SendFailed(format!("gotify returned {}", resp.status())));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_requires_server_url_and_token() {
        let p = GotifyProvider;
        assert!(p.validate(&serde_json::json!({ "server_url": "https://g.test" })).is_err());
    }
}

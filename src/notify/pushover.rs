use async_trait::async_trait;

use super::{config_field, http_client, Message, MessageStatus, NotificationProvider};
use crate::error::NotifyError;
use crate::model::Notification;

const PUSHOVER_URL: &str = "https://api.pushover.net/1/messages.json";

pub struct PushoverProvider;

#[async_trait]
impl NotificationProvider for PushoverProvider {
    fn name(&self) -> &'static str {
        "pushover"
    }

    fn validate(&self, config: &serde_json::Value) -> Result<(), NotifyError> {
        config_field(config, "app_token")?;
        config_field(config, "user_key")?;
        Ok(())
    }

    async fn send(&self, notification: &Notification, message: &Message) -> Result<(), NotifyError> {
        let app_token = config_field(&notification.config, "app_token")?;
        let user_key = config_field(&notification.config, "user_key")?;

        let priority = if matches!(message.status, MessageStatus::Down) { "1" } else { "0" };

        let form = [
            ("token", app_token),
            ("user", user_key),
            ("title", message.title.as_str()),
            ("message", message.body.as_str()),
            ("priority", priority),
        ];

        let resp = http_client().post(PUSHOVER_URL).form(&form).send().await?;
        if !resp.status().is_success() {
            return Err(NotifyError::SendFailed(format!("pushover API returned {}", resp.status())));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_requires_token_and_user_key() {
        let p = PushoverProvider;
        assert!(p.validate(&serde_json::json!({ "app_token": "x" })).is_err());
        assert!(p.validate(&serde_json::json!({ "app_token": "x", "user_key": "y" })).is_ok());
    }
}

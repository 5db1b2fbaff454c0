use async_trait::async_trait;

use super::{config_field, http_client, Message, NotificationProvider};
use crate::error::NotifyError;
use crate::model::Notification;

/// Telegram bot API, HTML-formatted per §4.6.
pub struct TelegramProvider;

#[async_trait]
impl NotificationProvider for TelegramProvider {
    fn name(&self) -> &'static str {
        "telegram"
    }

    fn validate(&self, config: &serde_json::Value) -> Result<(), NotifyError> {
        config_field(config, "bot_token")?;
        config_field(config, "chat_id")?;
        Ok(())
    }

    async fn send(&self, notification: &Notification, message: &Message) -> Result<(), NotifyError> {
        let bot_token = config_field(&notification.config, "bot_token")?;
        let chat_id = config_field(&notification.config, "chat_id")?;

        let text = format!(
            "<b>{}</b>\n{}\n\nMonitor: {}\nPing: {}ms",
            html_escape(&message.title),
            html_escape(&message.body),
            html_escape(&message.monitor_name),
            message.latest_ping_ms
        );

        let url = format!("https://api.telegram.org/bot{bot_token}/sendMessage");
        let resp = http_client()
            .post(&url)
            .json(&serde_json::json!({
                "chat_id": chat_id,
                "text": text,
                "parse_mode": "HTML",
            }))
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(NotifyError::SendFailed(format!("telegram API returned {}", resp.status())));
        }
        Ok(())
    }
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_requires_bot_token_and_chat_id() {
        let p = TelegramProvider;
        assert!(p.validate(&serde_json::json!({ "bot_token": "x" })).is_err());
        assert!(p.validate(&serde_json::json!({ "bot_token": "x", "chat_id": "1" })).is_ok());
    }

    #[test]
    fn escapes_html_special_chars() {
        assert_eq!(html_escape("<a&b>"), "&lt;a&amp;b&gt;");
    }
}

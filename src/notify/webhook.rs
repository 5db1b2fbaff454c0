use async_trait::async_trait;
use serde::Deserialize;

use super::{config_field, http_client, Message, NotificationProvider};
use crate::error::NotifyError;
use crate::model::Notification;

#[derive(Debug, Deserialize)]
#[serde(default)]
struct WebhookConfig {
    url: String,
    method: String,
    #[serde(default)]
    headers: std::collections::HashMap<String, String>,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            method: "POST".to_string(),
            headers: Default::default(),
        }
    }
}

/// Generic outbound webhook: posts the message as JSON to a configurable
/// URL with a configurable method and headers.
pub struct WebhookProvider;

#[async_trait]
impl NotificationProvider for WebhookProvider {
    fn name(&self) -> &'static str {
        "webhook"
    }

    fn validate(&self, config: &serde_json::Value) -> Result<(), NotifyError> {
        config_field(config, "url")?;
        Ok(())
    }

    async fn send(&self, notification: &Notification, message: &Message) -> Result<(), NotifyError> {
        let cfg: WebhookConfig = serde_json::from_value(notification.config.clone())
            .map_err(|e| NotifyError::InvalidConfig(e.to_string()))?;

        let method = reqwest::Method::from_bytes(cfg.method.as_bytes())
            .map_err(|_| NotifyError::InvalidConfig(format!("invalid method '{}'", cfg.method)))?;

        let mut req = http_client().request(method, &cfg.url).json(message);
        for (k, v) in &cfg.headers {
            req = req.header(k, v);
        }

        let resp = req.send().await?;
        if !resp.status().is_success() {
            return Err(NotifyError::SendFailed(format!("webhook returned {}", resp.status())));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_requires_url() {
        let p = WebhookProvider;
        assert!(p.validate(&serde_json::json!({})).is_err());
        assert!(p.validate(&serde_json::json!({ "url": "https://example.test/hook" })).is_ok());
    }
}

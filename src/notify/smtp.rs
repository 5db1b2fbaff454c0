use async_trait::async_trait;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message as LettreMessage, Tokio1Executor};
use serde::Deserialize;

use super::{config_field, Message, NotificationProvider, PROVIDER_TIMEOUT};
use crate::error::NotifyError;
use crate::model::Notification;

#[derive(Debug, Deserialize)]
struct SmtpConfig {
    host: String,
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
    from: String,
    to: String,
    #[serde(default)]
    use_tls: bool,
}

fn default_port() -> u16 {
    587
}

pub struct SmtpProvider;

#[async_trait]
impl NotificationProvider for SmtpProvider {
    fn name(&self) -> &'static str {
        "smtp"
    }

    fn validate(&self, config: &serde_json::Value) -> Result<(), NotifyError> {
        config_field(config, "host")?;
        config_field(config, "from")?;
        config_field(config, "to")?;
        let cfg: SmtpConfig = serde_json::from_value(config.clone())
            .map_err(|e| NotifyError::InvalidConfig(e.to_string()))?;
        cfg.from.parse::<lettre::Address>().map_err(|e| NotifyError::InvalidConfig(e.to_string()))?;
        cfg.to.parse::<lettre::Address>().map_err(|e| NotifyError::InvalidConfig(e.to_string()))?;
        Ok(())
    }

    async fn send(&self, notification: &Notification, message: &Message) -> Result<(), NotifyError> {
        let cfg: SmtpConfig = serde_json::from_value(notification.config.clone())
            .map_err(|e| NotifyError::InvalidConfig(e.to_string()))?;

        let email = LettreMessage::builder()
            .from(cfg.from.parse().map_err(|e: lettre::address::AddressError| NotifyError::InvalidConfig(e.to_string()))?)
            .to(cfg.to.parse().map_err(|e: lettre::address::AddressError| NotifyError::InvalidConfig(e.to_string()))?)
            .subject(&message.title)
            .body(message.body.clone())
            .map_err(|e| NotifyError::InvalidConfig(e.to_string()))?;

        let mut builder = if cfg.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&cfg.host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&cfg.host)
        }
        .map_err(|e| NotifyError::InvalidConfig(e.to_string()))?
        .port(cfg.port)
        .timeout(Some(PROVIDER_TIMEOUT));

        if let (Some(user), Some(pass)) = (cfg.username, cfg.password) {
            builder = builder.credentials(Credentials::new(user, pass));
        }

        let transport = builder.build();

        transport
            .send(email)
            .await
            .map_err(|e| NotifyError::SendFailed(e.to_string()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_requires_core_fields() {
        let p = SmtpProvider;
        assert!(p.validate(&serde_json::json!({})).is_err());
        assert!(p
            .validate(&serde_json::json!({
                "host": "smtp.example.test",
                "from": "alerts@example.test",
                "to": "oncall@example.test",
            }))
            .is_ok());
    }

    #[test]
    fn validate_rejects_malformed_addresses() {
        let p = SmtpProvider;
        assert!(p
            .validate(&serde_json::json!({
                "host": "smtp.example.test",
                "from": "not-an-email",
                "to": "oncall@example.test",
            }))
            .is_err());
    }
}

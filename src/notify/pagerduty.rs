use async_trait::async_trait;
use serde_json::json;

use super::{config_field, http_client, Message, MessageStatus, NotificationProvider};
use crate::error::NotifyError;
use crate::model::Notification;

const EVENTS_V2_URL: &str = "https://events.pagerduty.com/v2/enqueue";

/// PagerDuty Events v2: triggers an incident on `down`, resolves it on `up`.
/// The dedup key is the monitor's own identity (its name, threaded through
/// `Message::monitor_name`) so the trigger/resolve pair always target the
/// same PagerDuty incident regardless of how many heartbeats fire between.
pub struct PagerDutyProvider;

#[async_trait]
impl NotificationProvider for PagerDutyProvider {
    fn name(&self) -> &'static str {
        "pagerduty"
    }

    fn validate(&self, config: &serde_json::Value) -> Result<(), NotifyError> {
        config_field(config, "integration_key")?;
        Ok(())
    }

    async fn send(&self, notification: &Notification, message: &Message) -> Result<(), NotifyError> {
        let integration_key = config_field(&notification.config, "integration_key")?;
        let dedup_key = format!("monitor:{}", message.monitor_name);

        let event_action = match message.status {
            MessageStatus::Down => "trigger",
            MessageStatus::Up => "resolve",
            MessageStatus::Maintenance => "trigger",
        };

        let payload = json!({
            "routing_key": integration_key,
            "event_action": event_action,
            "dedup_key": dedup_key,
            "payload": {
                "summary": message.title,
                "source": message.monitor_name,
                "severity": if matches!(message.status, MessageStatus::Down) { "critical" } else { "info" },
                "custom_details": {
                    "body": message.body,
                    "ping_ms": message.latest_ping_ms,
                }
            }
        });

        let resp = http_client().post(EVENTS_V2_URL).json(&payload).send().await?;
        if !resp.status().is_success() {
            return Err(NotifyError::SendFailed(format!("PagerDuty Events v2 returned {}", resp.status())));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_requires_integration_key() {
        let p = PagerDutyProvider;
        assert!(p.validate(&serde_json::json!({})).is_err());
    }
}

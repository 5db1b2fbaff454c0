use std::time::Instant;

use async_trait::async_trait;
use bollard::Docker;
use serde::Deserialize;

use super::{ProbeContext, ProbeKind};
use crate::error::ProbeError;
use crate::model::{Monitor, NewHeartbeat, Status};

#[derive(Debug, Deserialize, Default)]
struct ContainerConfig {
    #[serde(default)]
    socket: Option<String>,
}

pub struct ContainerProbe;

#[async_trait]
impl ProbeKind for ContainerProbe {
    fn name(&self) -> &'static str {
        "container"
    }

    fn validate(&self, config: &serde_json::Value) -> Result<(), ProbeError> {
        serde_json::from_value::<ContainerConfig>(config.clone())
            .map(|_| ())
            .map_err(|e| ProbeError::InvalidConfig(e.to_string()))
    }

    async fn check(&self, ctx: &ProbeContext, monitor: &Monitor) -> NewHeartbeat {
        let cfg: ContainerConfig = match serde_json::from_value(monitor.config.clone()) {
            Ok(c) => c,
            Err(e) => {
                return NewHeartbeat::new(monitor.id, Status::Down, 0, format!("invalid config: {e}"))
            }
        };

        let start = Instant::now();

        let docker = match &cfg.socket {
            Some(path) => Docker::connect_with_socket(path, 120, bollard::API_DEFAULT_VERSION),
            None => Docker::connect_with_local_defaults(),
        };
        let docker = match docker {
            Ok(d) => d,
            Err(e) => {
                let elapsed = start.elapsed().as_millis() as i64;
                return NewHeartbeat::new(monitor.id, Status::Down, elapsed, format!("docker connect failed: {e}"));
            }
        };

        let inspect = tokio::time::timeout(ctx.remaining(), docker.inspect_container(&monitor.target, None)).await;

        let elapsed = start.elapsed().as_millis() as i64;

        let inspect = match inspect {
            Ok(Ok(i)) => i,
            Ok(Err(e)) => return NewHeartbeat::new(monitor.id, Status::Down, elapsed, format!("inspect failed: {e}")),
            Err(_) => return NewHeartbeat::new(monitor.id, Status::Down, elapsed, "inspect timed out".to_string()),
        };

        let state = inspect.state.unwrap_or_default();
        let running = state.running.unwrap_or(false);

        if !running {
            let status = state.status.map(|s| s.to_string()).unwrap_or_else(|| "unknown".to_string());
            return NewHeartbeat::new(monitor.id, Status::Down, elapsed, format!("container is {status}"));
        }

        match state.health.and_then(|h| h.status) {
            Some(bollard::models::HealthStatusEnum::HEALTHY) => {
                NewHeartbeat::new(monitor.id, Status::Up, elapsed, "container running, health: healthy".to_string())
            }
            Some(bollard::models::HealthStatusEnum::UNHEALTHY) => {
                NewHeartbeat::new(monitor.id, Status::Down, elapsed, "container running, health: unhealthy".to_string())
            }
            Some(bollard::models::HealthStatusEnum::STARTING) => {
                NewHeartbeat::new(monitor.id, Status::Pending, elapsed, "container running, health: starting".to_string())
            }
            _ => NewHeartbeat::new(monitor.id, Status::Up, elapsed, "container running".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_accepts_empty_config() {
        let probe = ContainerProbe;
        assert!(probe.validate(&serde_json::json!({})).is_ok());
    }
}

use std::net::SocketAddr;
use std::time::Instant;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::net::TcpStream;

use super::{filter_by_family, ProbeContext, ProbeKind};
use crate::error::ProbeError;
use crate::model::{Monitor, NewHeartbeat, Status};

#[derive(Debug, Deserialize)]
struct TcpConfig {
    port: u16,
}

pub struct TcpProbe;

#[async_trait]
impl ProbeKind for TcpProbe {
    fn name(&self) -> &'static str {
        "tcp"
    }

    fn validate(&self, config: &serde_json::Value) -> Result<(), ProbeError> {
        let cfg: TcpConfig = serde_json::from_value(config.clone())
            .map_err(|e| ProbeError::InvalidConfig(e.to_string()))?;
        if cfg.port == 0 {
            return Err(ProbeError::InvalidConfig("port must be 1-65535".into()));
        }
        Ok(())
    }

    async fn check(&self, ctx: &ProbeContext, monitor: &Monitor) -> NewHeartbeat {
        let cfg: TcpConfig = match serde_json::from_value(monitor.config.clone()) {
            Ok(c) => c,
            Err(e) => {
                return NewHeartbeat::new(monitor.id, Status::Down, 0, format!("invalid config: {e}"))
            }
        };

        let start = Instant::now();

        let addrs = match ctx.resolver.lookup_ip(monitor.target.as_str()).await {
            Ok(lookup) => lookup.iter().collect::<Vec<_>>(),
            Err(e) => {
                let elapsed = start.elapsed().as_millis() as i64;
                return NewHeartbeat::new(monitor.id, Status::Down, elapsed, format!("DNS resolution failed: {e}"));
            }
        };

        let addrs = filter_by_family(addrs, ctx.ip_version);
        let Some(ip) = addrs.into_iter().next() else {
            let elapsed = start.elapsed().as_millis() as i64;
            return NewHeartbeat::new(monitor.id, Status::Down, elapsed, "no address for requested IP family".to_string());
        };

        let addr = SocketAddr::new(ip, cfg.port);

        match tokio::time::timeout(ctx.remaining(), TcpStream::connect(addr)).await {
            Ok(Ok(_stream)) => {
                let elapsed = start.elapsed().as_millis() as i64;
                NewHeartbeat::new(monitor.id, Status::Up, elapsed, format!("TCP connect - {elapsed}ms"))
            }
            Ok(Err(e)) => {
                let elapsed = start.elapsed().as_millis() as i64;
                NewHeartbeat::new(monitor.id, Status::Down, elapsed, e.to_string())
            }
            Err(_) => {
                let elapsed = start.elapsed().as_millis() as i64;
                NewHeartbeat::new(monitor.id, Status::Down, elapsed, "connect timed out".to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_zero_port() {
        let probe = TcpProbe;
        assert!(probe.validate(&serde_json::json!({ "port": 0 })).is_err());
        assert!(probe.validate(&serde_json::json!({ "port": 22 })).is_ok());
    }
}

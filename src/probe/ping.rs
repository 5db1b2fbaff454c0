use std::net::IpAddr;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use surge_ping::{Client, Config, PingIdentifier, PingSequence, SockType, ICMP};

use super::{filter_by_family, ProbeContext, ProbeKind};
use crate::error::ProbeError;
use crate::model::{Monitor, NewHeartbeat, Status};

#[derive(Debug, Deserialize)]
#[serde(default)]
struct PingConfig {
    count: u32,
    size: u32,
    privileged: bool,
}

impl Default for PingConfig {
    fn default() -> Self {
        Self {
            count: 4,
            size: 56,
            privileged: false,
        }
    }
}

pub struct PingProbe;

#[async_trait]
impl ProbeKind for PingProbe {
    fn name(&self) -> &'static str {
        "ping"
    }

    fn validate(&self, config: &serde_json::Value) -> Result<(), ProbeError> {
        let cfg: PingConfig = serde_json::from_value(config.clone())
            .map_err(|e| ProbeError::InvalidConfig(e.to_string()))?;
        if !(1..=100).contains(&cfg.count) {
            return Err(ProbeError::InvalidConfig("count must be 1-100".into()));
        }
        if !(1..=65500).contains(&cfg.size) {
            return Err(ProbeError::InvalidConfig("size must be 1-65500".into()));
        }
        Ok(())
    }

    async fn check(&self, ctx: &ProbeContext, monitor: &Monitor) -> NewHeartbeat {
        let cfg: PingConfig = match serde_json::from_value(monitor.config.clone()) {
            Ok(c) => c,
            Err(e) => {
                return NewHeartbeat::new(monitor.id, Status::Down, 0, format!("invalid config: {e}"))
            }
        };

        let start = Instant::now();

        let ip: IpAddr = match monitor.target.parse() {
            Ok(ip) => ip,
            Err(_) => match ctx.resolver.lookup_ip(monitor.target.as_str()).await {
                Ok(lookup) => {
                    let addrs = filter_by_family(lookup.iter().collect(), ctx.ip_version);
                    match addrs.into_iter().next() {
                        Some(ip) => ip,
                        None => {
                            let elapsed = start.elapsed().as_millis() as i64;
                            return NewHeartbeat::new(
                                monitor.id,
                                Status::Down,
                                elapsed,
                                "no address for requested IP family".to_string(),
                            );
                        }
                    }
                }
                Err(e) => {
                    let elapsed = start.elapsed().as_millis() as i64;
                    return NewHeartbeat::new(monitor.id, Status::Down, elapsed, format!("DNS resolution failed: {e}"));
                }
            },
        };

        // `privileged` selects the socket surge-ping opens: a raw ICMP
        // socket (root/CAP_NET_RAW) when true, an unprivileged ICMP
        // datagram socket (SOCK_DGRAM, works under a normal user on Linux
        // with the ping_group_range sysctl and on macOS by default) when
        // false.
        let icmp_kind = if ip.is_ipv4() { ICMP::V4 } else { ICMP::V6 };
        let sock_type = if cfg.privileged { SockType::RAW } else { SockType::DGRAM };
        let ping_config = Config::builder().kind(icmp_kind).sock_type_hint(sock_type).build();

        let client = match Client::new(&ping_config) {
            Ok(c) => c,
            Err(e) => {
                let elapsed = start.elapsed().as_millis() as i64;
                return NewHeartbeat::new(monitor.id, Status::Down, elapsed, format!("failed to open ping socket: {e}"));
            }
        };

        let payload = vec![0u8; cfg.size as usize];
        let mut pinger = client.pinger(ip, PingIdentifier(monitor.id as u16)).await;
        pinger.timeout(Duration::from_secs(2));

        let mut replies = 0u32;
        let mut total_rtt = Duration::ZERO;

        for seq in 0..cfg.count {
            if ctx.remaining().is_zero() {
                break;
            }
            match tokio::time::timeout(ctx.remaining(), pinger.ping(PingSequence(seq as u16), &payload)).await {
                Ok(Ok((_packet, rtt))) => {
                    replies += 1;
                    total_rtt += rtt;
                }
                Ok(Err(_)) | Err(_) => {
                    // one lost packet; loop continues to try the rest within the deadline
                }
            }
        }

        let elapsed = start.elapsed().as_millis() as i64;
        let loss_pct = 100.0 * (1.0 - replies as f64 / cfg.count as f64);

        if replies == 0 {
            return NewHeartbeat::new(monitor.id, Status::Down, elapsed, "100% packet loss".to_string());
        }

        if loss_pct > 50.0 {
            return NewHeartbeat::new(
                monitor.id,
                Status::Down,
                elapsed,
                format!("{loss_pct:.0}% packet loss"),
            );
        }

        let avg_rtt_ms = (total_rtt.as_secs_f64() * 1000.0 / replies as f64).round() as i64;
        NewHeartbeat::new(
            monitor.id,
            Status::Up,
            avg_rtt_ms,
            format!("{loss_pct:.0}% packet loss, avg {avg_rtt_ms}ms"),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_enforces_bounds() {
        let probe = PingProbe;
        assert!(probe.validate(&serde_json::json!({ "count": 0 })).is_err());
        assert!(probe.validate(&serde_json::json!({ "count": 101 })).is_err());
        assert!(probe.validate(&serde_json::json!({ "size": 0 })).is_err());
        assert!(probe.validate(&serde_json::json!({ "size": 70000 })).is_err());
        assert!(probe.validate(&serde_json::json!({})).is_ok());
    }
}

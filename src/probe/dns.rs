use std::net::SocketAddr;
use std::time::Instant;

use async_trait::async_trait;
use serde::Deserialize;
use trust_dns_resolver::config::{NameServerConfig, Protocol as DnsTransport, ResolverConfig, ResolverOpts};
use trust_dns_resolver::proto::rr::RecordType;
use trust_dns_resolver::TokioAsyncResolver;

use super::{ProbeContext, ProbeKind};
use crate::error::ProbeError;
use crate::model::{Monitor, NewHeartbeat, Status};

#[derive(Debug, Deserialize)]
struct DnsConfig {
    query_type: String,
    #[serde(default)]
    resolver: Option<String>,
    #[serde(default)]
    expected_result: Option<String>,
}

fn parse_record_type(s: &str) -> Option<RecordType> {
    match s.to_ascii_uppercase().as_str() {
        "A" => Some(RecordType::A),
        "AAAA" => Some(RecordType::AAAA),
        "CNAME" => Some(RecordType::CNAME),
        "MX" => Some(RecordType::MX),
        "NS" => Some(RecordType::NS),
        "TXT" => Some(RecordType::TXT),
        _ => None,
    }
}

fn parse_resolver_addr(s: &str) -> Result<SocketAddr, String> {
    if s.contains(':') && !s.starts_with('[') {
        s.parse().map_err(|_| format!("invalid resolver address '{s}'"))
    } else {
        format!("{s}:53").parse().map_err(|_| format!("invalid resolver host '{s}'"))
    }
}

pub struct DnsProbe;

#[async_trait]
impl ProbeKind for DnsProbe {
    fn name(&self) -> &'static str {
        "dns"
    }

    fn validate(&self, config: &serde_json::Value) -> Result<(), ProbeError> {
        let cfg: DnsConfig = serde_json::from_value(config.clone())
            .map_err(|e| ProbeError::InvalidConfig(e.to_string()))?;
        if parse_record_type(&cfg.query_type).is_none() {
            return Err(ProbeError::InvalidConfig(format!("unsupported query type '{}'", cfg.query_type)));
        }
        if let Some(resolver) = &cfg.resolver {
            parse_resolver_addr(resolver).map_err(ProbeError::InvalidConfig)?;
        }
        Ok(())
    }

    async fn check(&self, ctx: &ProbeContext, monitor: &Monitor) -> NewHeartbeat {
        let cfg: DnsConfig = match serde_json::from_value(monitor.config.clone()) {
            Ok(c) => c,
            Err(e) => {
                return NewHeartbeat::new(monitor.id, Status::Down, 0, format!("invalid config: {e}"))
            }
        };

        let Some(record_type) = parse_record_type(&cfg.query_type) else {
            return NewHeartbeat::new(monitor.id, Status::Down, 0, format!("unsupported query type '{}'", cfg.query_type));
        };

        let start = Instant::now();

        // The target string is the query name; an optional custom resolver
        // is itself a network endpoint and so must clear the SSRF guard the
        // same way an HTTP URL's host does.
        let resolver = match &cfg.resolver {
            Some(server) => {
                let addr = match parse_resolver_addr(server) {
                    Ok(a) => a,
                    Err(e) => {
                        let elapsed = start.elapsed().as_millis() as i64;
                        return NewHeartbeat::new(monitor.id, Status::Down, elapsed, e);
                    }
                };
                if !ctx.allow_private_targets && crate::ssrf::is_blocked_address(addr.ip()) {
                    let elapsed = start.elapsed().as_millis() as i64;
                    return NewHeartbeat::new(monitor.id, Status::Down, elapsed, format!("SSRF guard: resolver {addr} blocked"));
                }

                let mut resolver_config = ResolverConfig::new();
                resolver_config.add_name_server(NameServerConfig::new(addr, DnsTransport::Udp));
                match TokioAsyncResolver::tokio(resolver_config, ResolverOpts::default()) {
                    r => std::sync::Arc::new(r),
                }
            }
            None => ctx.resolver.clone(),
        };

        let lookup = match tokio::time::timeout(ctx.remaining(), resolver.lookup(monitor.target.as_str(), record_type)).await {
            Ok(Ok(lookup)) => lookup,
            Ok(Err(e)) => {
                let elapsed = start.elapsed().as_millis() as i64;
                return NewHeartbeat::new(monitor.id, Status::Down, elapsed, e.to_string());
            }
            Err(_) => {
                let elapsed = start.elapsed().as_millis() as i64;
                return NewHeartbeat::new(monitor.id, Status::Down, elapsed, "query timed out".to_string());
            }
        };

        let records: Vec<String> = lookup.iter().map(|r| r.to_string()).collect();
        let elapsed = start.elapsed().as_millis() as i64;

        if records.is_empty() {
            return NewHeartbeat::new(monitor.id, Status::Down, elapsed, "no records returned".to_string());
        }

        if let Some(expected) = &cfg.expected_result {
            if !records.iter().any(|r| r.contains(expected.as_str())) {
                return NewHeartbeat::new(
                    monitor.id,
                    Status::Down,
                    elapsed,
                    format!("expected result '{expected}' not found in {records:?}"),
                );
            }
        }

        NewHeartbeat::new(monitor.id, Status::Up, elapsed, records.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_unsupported_type() {
        let probe = DnsProbe;
        let err = probe
            .validate(&serde_json::json!({ "query_type": "SRV" }))
            .unwrap_err();
        assert!(matches!(err, ProbeError::InvalidConfig(_)));
    }

    #[test]
    fn validate_accepts_known_types() {
        let probe = DnsProbe;
        for t in ["A", "AAAA", "CNAME", "MX", "NS", "TXT", "a"] {
            assert!(probe.validate(&serde_json::json!({ "query_type": t })).is_ok());
        }
    }

    #[test]
    fn validate_rejects_bad_resolver() {
        let probe = DnsProbe;
        let err = probe
            .validate(&serde_json::json!({ "query_type": "A", "resolver": "not a host!!" }))
            .unwrap_err();
        assert!(matches!(err, ProbeError::InvalidConfig(_)));
    }
}

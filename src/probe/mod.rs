//! Probe registry & kinds (§4.1).
//!
//! A probe kind is identified by a short string and exposes `validate` and
//! `check`. The registry is a process-wide mapping from kind name to
//! implementation, populated at startup in `ProbeRegistry::with_builtins`,
//! but constructible fresh (see design notes §9) so tests can build an
//! isolated registry instead of reaching for a process global.

mod container;
mod dns;
mod http;
mod ping;
mod tcp;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use trust_dns_resolver::TokioAsyncResolver;

use crate::error::ProbeError;
use crate::model::{IpVersion, Monitor, NewHeartbeat, Status};

/// Small slack added to a monitor's configured timeout so that a probe's own
/// internal bookkeeping (DNS resolution, connection teardown) never races
/// the deadline the scheduler enforces (§4.3).
pub const DEADLINE_SLACK: Duration = Duration::from_millis(500);

/// Per-invocation context threaded through every probe kind.
pub struct ProbeContext {
    pub deadline: Instant,
    pub ip_version: IpVersion,
    pub resolver: Arc<TokioAsyncResolver>,
    /// Bypasses the SSRF guard's address-range checks. Never set by the
    /// scheduler in production; exists for tests and for deployments that
    /// intentionally monitor internal infrastructure.
    pub allow_private_targets: bool,
}

impl ProbeContext {
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}

#[async_trait]
pub trait ProbeKind: Send + Sync {
    fn name(&self) -> &'static str;

    /// Validate a monitor's opaque per-kind config. Invoked by the CRUD
    /// layer before persistence; never reaches the scheduler on failure.
    fn validate(&self, config: &serde_json::Value) -> Result<(), ProbeError>;

    /// Run the probe. Must never panic or return early on error — every
    /// failure mode is encoded as a `down` heartbeat with a message.
    async fn check(&self, ctx: &ProbeContext, monitor: &Monitor) -> NewHeartbeat;
}

/// Process-wide-by-convention, but constructed as a plain value so callers
/// (including tests) can build their own instance instead of relying on a
/// global.
#[derive(Clone)]
pub struct ProbeRegistry {
    kinds: HashMap<&'static str, Arc<dyn ProbeKind>>,
}

impl ProbeRegistry {
    pub fn empty() -> Self {
        Self { kinds: HashMap::new() }
    }

    pub fn with_builtins() -> Self {
        let mut reg = Self::empty();
        reg.register(Arc::new(http::HttpProbe));
        reg.register(Arc::new(tcp::TcpProbe));
        reg.register(Arc::new(ping::PingProbe));
        reg.register(Arc::new(dns::DnsProbe));
        reg.register(Arc::new(container::ContainerProbe));
        reg
    }

    pub fn register(&mut self, kind: Arc<dyn ProbeKind>) {
        self.kinds.insert(kind.name(), kind);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ProbeKind>> {
        self.kinds.get(name).cloned()
    }

    pub fn validate(&self, kind: &str, config: &serde_json::Value) -> Result<(), ProbeError> {
        self.get(kind)
            .ok_or_else(|| ProbeError::UnknownKind(kind.to_string()))?
            .validate(config)
    }

    /// Run the monitor's configured probe kind. Unknown kinds are a
    /// programming error by this point (validated at creation time) and are
    /// still encoded as a `down` heartbeat rather than panicking, since the
    /// scheduler must keep running regardless (§7).
    pub async fn check(&self, ctx: &ProbeContext, monitor: &Monitor) -> NewHeartbeat {
        let start = Instant::now();
        match self.get(monitor.kind.as_str()) {
            Some(probe) => probe.check(ctx, monitor).await,
            None => {
                let elapsed = start.elapsed().as_millis() as i64;
                NewHeartbeat::new(
                    monitor.id,
                    Status::Down,
                    elapsed,
                    format!("no probe registered for kind '{}'", monitor.kind.as_str()),
                )
            }
        }
    }
}

impl Default for ProbeRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

/// Restrict a list of resolved addresses to the monitor's IP-version
/// preference. `auto` returns the list unconstrained.
pub fn filter_by_family(
    addrs: Vec<std::net::IpAddr>,
    pref: IpVersion,
) -> Vec<std::net::IpAddr> {
    match pref {
        IpVersion::Auto => addrs,
        IpVersion::V4 => addrs.into_iter().filter(|a| a.is_ipv4()).collect(),
        IpVersion::V6 => addrs.into_iter().filter(|a| a.is_ipv6()).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::IpAddr;

    #[test]
    fn family_filter_keeps_only_requested_family() {
        let addrs: Vec<IpAddr> = vec!["1.1.1.1".parse().unwrap(), "::1".parse().unwrap()];
        assert_eq!(filter_by_family(addrs.clone(), IpVersion::V4).len(), 1);
        assert_eq!(filter_by_family(addrs.clone(), IpVersion::V6).len(), 1);
        assert_eq!(filter_by_family(addrs, IpVersion::Auto).len(), 2);
    }

    #[test]
    fn registry_reports_unknown_kind() {
        let reg = ProbeRegistry::with_builtins();
        assert!(reg.validate("smoke-signal", &serde_json::json!({})).is_err());
    }
}

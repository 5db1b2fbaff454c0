use std::time::Instant;

use async_trait::async_trait;
use serde::Deserialize;

use super::{ProbeContext, ProbeKind};
use crate::error::ProbeError;
use crate::model::{Monitor, NewHeartbeat, Status};
use crate::ssrf;

#[derive(Debug, Deserialize)]
#[serde(default)]
struct HttpConfig {
    method: String,
    #[serde(default)]
    headers: std::collections::HashMap<String, String>,
    #[serde(default)]
    body: Option<String>,
    accepted_statuses: Vec<StatusRange>,
    keyword: Option<String>,
    #[serde(default)]
    invert_keyword: bool,
    ignore_tls: bool,
    follow_redirects: bool,
    #[serde(default = "default_max_redirects")]
    max_redirects: u32,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            method: "GET".to_string(),
            headers: Default::default(),
            body: None,
            accepted_statuses: vec![StatusRange { from: 200, to: 299 }],
            keyword: None,
            invert_keyword: false,
            ignore_tls: false,
            follow_redirects: true,
            max_redirects: default_max_redirects(),
        }
    }
}

fn default_max_redirects() -> u32 {
    10
}

#[derive(Debug, Deserialize)]
struct StatusRange {
    from: u16,
    to: u16,
}

impl StatusRange {
    fn contains(&self, code: u16) -> bool {
        (self.from..=self.to).contains(&code)
    }
}

pub struct HttpProbe;

#[async_trait]
impl ProbeKind for HttpProbe {
    fn name(&self) -> &'static str {
        "http"
    }

    fn validate(&self, config: &serde_json::Value) -> Result<(), ProbeError> {
        let cfg: HttpConfig = serde_json::from_value(config.clone())
            .map_err(|e| ProbeError::InvalidConfig(e.to_string()))?;
        if reqwest::Method::from_bytes(cfg.method.as_bytes()).is_err() {
            return Err(ProbeError::InvalidConfig(format!("invalid HTTP method '{}'", cfg.method)));
        }
        if cfg.accepted_statuses.is_empty() {
            return Err(ProbeError::InvalidConfig("accepted_statuses must not be empty".into()));
        }
        Ok(())
    }

    async fn check(&self, ctx: &ProbeContext, monitor: &Monitor) -> NewHeartbeat {
        let cfg: HttpConfig = match serde_json::from_value(monitor.config.clone()) {
            Ok(c) => c,
            Err(e) => {
                return NewHeartbeat::new(monitor.id, Status::Down, 0, format!("invalid config: {e}"))
            }
        };

        let start = Instant::now();

        let url = match ssrf::guard_url(&ctx.resolver, &monitor.target, ctx.allow_private_targets).await {
            Ok(url) => url,
            Err(e) => {
                let elapsed = start.elapsed().as_millis() as i64;
                return NewHeartbeat::new(monitor.id, Status::Down, elapsed, format!("SSRF guard: {e}"));
            }
        };

        let method = reqwest::Method::from_bytes(cfg.method.as_bytes()).unwrap_or(reqwest::Method::GET);

        let client = match reqwest::Client::builder()
            .timeout(ctx.remaining())
            .danger_accept_invalid_certs(cfg.ignore_tls)
            .redirect(if cfg.follow_redirects {
                reqwest::redirect::Policy::limited(cfg.max_redirects as usize)
            } else {
                reqwest::redirect::Policy::none()
            })
            .build()
        {
            Ok(c) => c,
            Err(e) => {
                let elapsed = start.elapsed().as_millis() as i64;
                return NewHeartbeat::new(monitor.id, Status::Down, elapsed, format!("client build failed: {e}"));
            }
        };

        let mut req = client.request(method, url);
        for (k, v) in &cfg.headers {
            req = req.header(k, v);
        }
        if let Some(body) = &cfg.body {
            req = req.body(body.clone());
        }

        let resp = match req.send().await {
            Ok(r) => r,
            Err(e) => {
                let elapsed = start.elapsed().as_millis() as i64;
                return NewHeartbeat::new(monitor.id, Status::Down, elapsed, describe_reqwest_error(&e));
            }
        };

        let status = resp.status();
        let status_ok = cfg.accepted_statuses.iter().any(|r| r.contains(status.as_u16()));

        if let Some(keyword) = &cfg.keyword {
            let body = match resp.text().await {
                Ok(b) => b,
                Err(e) => {
                    let elapsed = start.elapsed().as_millis() as i64;
                    return NewHeartbeat::new(monitor.id, Status::Down, elapsed, format!("body read failed: {e}"));
                }
            };
            let elapsed = start.elapsed().as_millis() as i64;
            let found = body.contains(keyword.as_str());
            let keyword_ok = found != cfg.invert_keyword;

            return if status_ok && keyword_ok {
                NewHeartbeat::new(monitor.id, Status::Up, elapsed, format!("HTTP {} - {}ms", status.as_u16(), elapsed))
            } else if !status_ok {
                NewHeartbeat::new(monitor.id, Status::Down, elapsed, format!("HTTP {}", status.as_u16()))
            } else {
                let verb = if cfg.invert_keyword { "present" } else { "missing" };
                NewHeartbeat::new(monitor.id, Status::Down, elapsed, format!("keyword '{keyword}' {verb} in response"))
            };
        }

        let elapsed = start.elapsed().as_millis() as i64;
        if status_ok {
            NewHeartbeat::new(monitor.id, Status::Up, elapsed, format!("HTTP {} - {}ms", status.as_u16(), elapsed))
        } else {
            NewHeartbeat::new(monitor.id, Status::Down, elapsed, format!("HTTP {}", status.as_u16()))
        }
    }
}

fn describe_reqwest_error(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        "request timed out".to_string()
    } else if e.is_connect() {
        format!("connection failed: {e}")
    } else {
        e.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_accepts_2xx_only() {
        let cfg = HttpConfig::default();
        assert!(cfg.accepted_statuses[0].contains(200));
        assert!(cfg.accepted_statuses[0].contains(299));
        assert!(!cfg.accepted_statuses[0].contains(404));
    }

    #[test]
    fn validate_rejects_empty_status_set() {
        let probe = HttpProbe;
        let err = probe
            .validate(&serde_json::json!({ "accepted_statuses": [] }))
            .unwrap_err();
        assert!(matches!(err, ProbeError::InvalidConfig(_)));
    }

    #[test]
    fn validate_rejects_bad_method() {
        let probe = HttpProbe;
        let err = probe
            .validate(&serde_json::json!({ "method": "NOT A METHOD" }))
            .unwrap_err();
        assert!(matches!(err, ProbeError::InvalidConfig(_)));
    }
}

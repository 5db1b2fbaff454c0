//! Process configuration (§10.1). Loaded once at startup from the
//! environment; per-monitor/per-notification config continues to be the
//! opaque JSON documents the probe and notification registries validate.
//!
//! Kept dependency-light on purpose, matching the teacher's own preference
//! for explicit `std::env` parsing over a config-derive crate.

use anyhow::{bail, Context};

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub listen_addr: String,
    pub jwt_secret: String,
    pub metrics_token: Option<String>,
    pub health_token: Option<String>,
    pub cors_origins: Vec<String>,
    pub app_env: AppEnv,
    pub base_url: Option<String>,
    pub heartbeat_retention_days: i64,
    pub stat_hourly_retention_days: i64,
    pub stat_daily_retention_days: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnv {
    Development,
    Production,
}

impl AppConfig {
    /// Read and validate every field. Fatal on any malformed or
    /// production-unsafe value, matching §7's startup-gate row.
    pub fn load() -> anyhow::Result<Self> {
        let database_url = require_env("DATABASE_URL")?;
        let listen_addr = optional_env("LISTEN_ADDR").unwrap_or_else(|| "0.0.0.0:3000".to_string());
        let jwt_secret = require_env("JWT_SECRET")?;
        let metrics_token = optional_env("METRICS_TOKEN");
        let health_token = optional_env("HEALTH_TOKEN");
        let cors_origins = optional_env("CORS_ORIGINS")
            .map(|raw| raw.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect())
            .unwrap_or_default();
        let app_env = match optional_env("APP_ENV").as_deref() {
            Some("production") => AppEnv::Production,
            _ => AppEnv::Development,
        };
        let base_url = optional_env("BASE_URL");
        let heartbeat_retention_days = parse_env_or("HEARTBEAT_RETENTION_DAYS", 90)?;
        let stat_hourly_retention_days = parse_env_or("STAT_HOURLY_RETENTION_DAYS", 365)?;
        let stat_daily_retention_days = parse_env_or("STAT_DAILY_RETENTION_DAYS", 1825)?;

        if jwt_secret.len() < 16 {
            bail!("JWT_SECRET must be at least 16 characters");
        }
        if app_env == AppEnv::Production && jwt_secret.len() < 32 {
            bail!("JWT_SECRET must be at least 32 characters in production");
        }

        Ok(Self {
            database_url,
            listen_addr,
            jwt_secret,
            metrics_token,
            health_token,
            cors_origins,
            app_env,
            base_url,
            heartbeat_retention_days,
            stat_hourly_retention_days,
            stat_daily_retention_days,
        })
    }
}

fn require_env(key: &str) -> anyhow::Result<String> {
    std::env::var(key).with_context(|| format!("missing required environment variable {key}"))
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn parse_env_or(key: &str, default: i64) -> anyhow::Result<i64> {
    match optional_env(key) {
        Some(raw) => raw.parse::<i64>().with_context(|| format!("{key} must be an integer, got '{raw}'")),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // environment variables are process-global; serialize the tests that
    // touch them so parallel execution doesn't race.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear_env() {
        for key in [
            "DATABASE_URL",
            "LISTEN_ADDR",
            "JWT_SECRET",
            "METRICS_TOKEN",
            "HEALTH_TOKEN",
            "CORS_ORIGINS",
            "APP_ENV",
            "BASE_URL",
            "HEARTBEAT_RETENTION_DAYS",
            "STAT_HOURLY_RETENTION_DAYS",
            "STAT_DAILY_RETENTION_DAYS",
        ] {
            std::env::remove_var(key);
        }
    }

    #[test]
    fn missing_database_url_is_fatal() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        std::env::set_var("JWT_SECRET", "a-sufficiently-long-dev-secret");
        assert!(AppConfig::load().is_err());
        clear_env();
    }

    #[test]
    fn short_secret_rejected_in_production_only() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        std::env::set_var("DATABASE_URL", "postgres://localhost/uptime");
        std::env::set_var("JWT_SECRET", "short-but-16-chars");

        assert!(AppConfig::load().is_ok());

        std::env::set_var("APP_ENV", "production");
        assert!(AppConfig::load().is_err());
        clear_env();
    }

    #[test]
    fn defaults_applied_when_unset() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        std::env::set_var("DATABASE_URL", "postgres://localhost/uptime");
        std::env::set_var("JWT_SECRET", "a-sufficiently-long-dev-secret");

        let cfg = AppConfig::load().unwrap();
        assert_eq!(cfg.listen_addr, "0.0.0.0:3000");
        assert_eq!(cfg.heartbeat_retention_days, 90);
        assert!(cfg.cors_origins.is_empty());
        clear_env();
    }
}

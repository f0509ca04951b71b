use std::str::FromStr;

use anyhow::{bail, Context, Result};

use crate::funnel::scheduler::ReactivationPolicy;
use crate::funnel::stage::StagePolicy;

/// Upper bound for the idle threshold and the base backoff.
const MAX_REACTIVATION_HOURS: i64 = 24 * 365;
/// Upper bound for attempts per idle episode.
const MAX_REACTIVATION_ATTEMPTS: u32 = 16;
/// Upper bound for the retry delay and both loop intervals.
const MAX_DELAY_SECS: i64 = 7 * 24 * 60 * 60;

/// Application configuration loaded from environment variables.
/// Startup fails if a required variable is missing, a number does not parse,
/// or a value is out of range.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub telegram_bot_token: String,
    pub telegram_bot_id: String,
    pub telegram_webhook_secret: Option<String>,
    pub anthropic_api_key: String,
    pub port: u16,
    pub rust_log: String,
    pub funnel_warmup_min: i32,
    pub funnel_handoff_min: i32,
    pub reactivation_idle_hours: i64,
    pub reactivation_max_attempts: u32,
    pub reactivation_backoff_hours: i64,
    pub reactivation_scan_limit: i64,
    pub reactivation_dispatch_limit: i64,
    pub reactivation_retry_delay_secs: i64,
    pub reactivation_scan_interval_secs: u64,
    pub reactivation_dispatch_interval_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        let config = Config {
            database_url: require_env("DATABASE_URL")?,
            telegram_bot_token: require_env("TELEGRAM_BOT_TOKEN")?,
            telegram_bot_id: std::env::var("TELEGRAM_BOT_ID")
                .unwrap_or_else(|_| "telegram-single".to_string()),
            telegram_webhook_secret: std::env::var("TELEGRAM_WEBHOOK_SECRET")
                .ok()
                .filter(|s| !s.is_empty()),
            anthropic_api_key: require_env("ANTHROPIC_API_KEY")?,
            port: parse_env("PORT", 8080)?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            funnel_warmup_min: parse_env("FUNNEL_WARMUP_MIN", 3)?,
            funnel_handoff_min: parse_env("FUNNEL_HANDOFF_MIN", 5)?,
            reactivation_idle_hours: parse_env("REACTIVATION_IDLE_HOURS", 24)?,
            reactivation_max_attempts: parse_env("REACTIVATION_MAX_ATTEMPTS", 3)?,
            reactivation_backoff_hours: parse_env("REACTIVATION_BACKOFF_HOURS", 24)?,
            reactivation_scan_limit: parse_env("REACTIVATION_SCAN_LIMIT", 50)?,
            reactivation_dispatch_limit: parse_env("REACTIVATION_DISPATCH_LIMIT", 20)?,
            reactivation_retry_delay_secs: parse_env("REACTIVATION_RETRY_DELAY_SECS", 900)?,
            reactivation_scan_interval_secs: parse_env("REACTIVATION_SCAN_INTERVAL_SECS", 300)?,
            reactivation_dispatch_interval_secs: parse_env(
                "REACTIVATION_DISPATCH_INTERVAL_SECS",
                60,
            )?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Rejects values that parse but cannot drive the funnel.
    pub fn validate(&self) -> Result<()> {
        self.stage_policy()?;
        in_range(
            "REACTIVATION_IDLE_HOURS",
            self.reactivation_idle_hours,
            1,
            MAX_REACTIVATION_HOURS,
        )?;
        in_range(
            "REACTIVATION_BACKOFF_HOURS",
            self.reactivation_backoff_hours,
            1,
            MAX_REACTIVATION_HOURS,
        )?;
        in_range(
            "REACTIVATION_MAX_ATTEMPTS",
            i64::from(self.reactivation_max_attempts),
            1,
            i64::from(MAX_REACTIVATION_ATTEMPTS),
        )?;
        in_range("REACTIVATION_SCAN_LIMIT", self.reactivation_scan_limit, 1, 10_000)?;
        in_range(
            "REACTIVATION_DISPATCH_LIMIT",
            self.reactivation_dispatch_limit,
            1,
            10_000,
        )?;
        in_range(
            "REACTIVATION_RETRY_DELAY_SECS",
            self.reactivation_retry_delay_secs,
            1,
            MAX_DELAY_SECS,
        )?;
        for (key, secs) in [
            (
                "REACTIVATION_SCAN_INTERVAL_SECS",
                self.reactivation_scan_interval_secs,
            ),
            (
                "REACTIVATION_DISPATCH_INTERVAL_SECS",
                self.reactivation_dispatch_interval_secs,
            ),
        ] {
            let secs = i64::try_from(secs).unwrap_or(i64::MAX);
            in_range(key, secs, 1, MAX_DELAY_SECS)?;
        }
        Ok(())
    }

    pub fn stage_policy(&self) -> Result<StagePolicy> {
        StagePolicy::from_minimums(self.funnel_warmup_min, self.funnel_handoff_min)
            .context("FUNNEL_WARMUP_MIN/FUNNEL_HANDOFF_MIN do not form a valid stage table")
    }

    pub fn reactivation_policy(&self) -> ReactivationPolicy {
        ReactivationPolicy {
            idle_threshold: chrono::Duration::hours(self.reactivation_idle_hours),
            max_attempts: self.reactivation_max_attempts,
            backoff: chrono::Duration::hours(self.reactivation_backoff_hours),
            scan_limit: self.reactivation_scan_limit,
        }
    }

    #[cfg(test)]
    pub fn for_tests() -> Self {
        Config {
            database_url: "postgres://localhost/funnel_test".to_string(),
            telegram_bot_token: "123456:test-token".to_string(),
            telegram_bot_id: "telegram-single".to_string(),
            telegram_webhook_secret: Some("hook-secret".to_string()),
            anthropic_api_key: "test-key".to_string(),
            port: 8080,
            rust_log: "info".to_string(),
            funnel_warmup_min: 3,
            funnel_handoff_min: 5,
            reactivation_idle_hours: 24,
            reactivation_max_attempts: 3,
            reactivation_backoff_hours: 24,
            reactivation_scan_limit: 50,
            reactivation_dispatch_limit: 20,
            reactivation_retry_delay_secs: 900,
            reactivation_scan_interval_secs: 300,
            reactivation_dispatch_interval_secs: 60,
        }
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn in_range(key: &str, value: i64, min: i64, max: i64) -> Result<()> {
    if !(min..=max).contains(&value) {
        bail!("{key} must be between {min} and {max}, got {value}");
    }
    Ok(())
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("{key} must be a number, got '{raw}'")),
        Err(_) => Ok(default),
    }
}

//! Server configuration from CLI flags with environment fallbacks

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::collections::HashMap;
use tracing::warn;

use crate::auth::jwt::DEFAULT_TOKEN_TTL_MINUTES;
use crate::middleware::rate_limit::{DEFAULT_LIMIT, DEFAULT_WINDOW_SECS, MAX_WINDOW_SECS};
use crate::middleware::{Operation, RateLimitPolicy};

const DEV_JWT_SECRET: &str = "dev-secret-change-in-production-minimum-32-characters";

/// Longest accepted token lifetime (one year)
const MAX_TOKEN_TTL_MINUTES: i64 = 366 * 24 * 60;

#[derive(Parser, Debug, Clone)]
#[command(name = "notes-backend")]
#[command(about = "Multi-user notes service with token auth and rate limiting")]
pub struct Config {
    /// Address to listen on
    #[arg(long, env = "NOTES_BIND_ADDR", default_value = "0.0.0.0:8000")]
    pub bind: String,

    /// SQLite database file
    #[arg(long, env = "NOTES_DB_PATH", default_value = "notes.db")]
    pub db_path: String,

    /// HMAC secret for signing access tokens
    #[arg(long, env = "JWT_SECRET", hide_env_values = true)]
    pub jwt_secret: Option<String>,

    /// Access token lifetime in minutes
    #[arg(long, env = "ACCESS_TOKEN_EXPIRE_MINUTES", default_value_t = DEFAULT_TOKEN_TTL_MINUTES)]
    pub token_ttl_minutes: i64,

    /// bcrypt work factor
    #[arg(long, env = "BCRYPT_COST", default_value = "12")]
    pub bcrypt_cost: u32,

    /// Requests admitted per window, per client and operation
    #[arg(long, env = "RATE_LIMIT_REQUESTS", default_value_t = DEFAULT_LIMIT)]
    pub rate_limit: usize,

    /// Sliding window length in seconds
    #[arg(long, env = "RATE_LIMIT_WINDOW_SECS", default_value_t = DEFAULT_WINDOW_SECS)]
    pub rate_window_secs: u64,

    /// Per-operation policies (comma-separated, e.g. notes.list=10/60)
    #[arg(long, env = "RATE_LIMIT_OVERRIDES", default_value = "")]
    pub rate_overrides: String,

    /// How often idle rate-limit entries are evicted, in seconds
    #[arg(long, env = "RATE_LIMIT_SWEEP_SECS", default_value = "60")]
    pub sweep_interval_secs: u64,
}

impl Config {
    /// Configured secret, or the development fallback
    pub fn jwt_secret(&self) -> String {
        match self.jwt_secret.as_deref().filter(|s| !s.trim().is_empty()) {
            Some(secret) => secret.to_string(),
            None => {
                warn!("⚠️  JWT_SECRET not set, using development secret");
                DEV_JWT_SECRET.to_string()
            }
        }
    }

    pub fn token_ttl(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.token_ttl_minutes)
    }

    pub fn default_policy(&self) -> RateLimitPolicy {
        RateLimitPolicy::new(self.rate_limit, self.rate_window_secs)
    }

    pub fn rate_policies(&self) -> Result<HashMap<Operation, RateLimitPolicy>> {
        parse_overrides(&self.rate_overrides).context("Invalid RATE_LIMIT_OVERRIDES")
    }

    /// Reject settings the server cannot run with
    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_TOKEN_TTL_MINUTES).contains(&self.token_ttl_minutes) {
            bail!(
                "Token lifetime must be between 1 and {} minutes, got {}",
                MAX_TOKEN_TTL_MINUTES,
                self.token_ttl_minutes
            );
        }
        if !(4..=31).contains(&self.bcrypt_cost) {
            bail!("bcrypt cost must be between 4 and 31, got {}", self.bcrypt_cost);
        }
        check_window(self.rate_window_secs).context("Invalid RATE_LIMIT_WINDOW_SECS")?;
        check_window(self.sweep_interval_secs).context("Invalid RATE_LIMIT_SWEEP_SECS")?;
        self.rate_policies()?;
        Ok(())
    }
}

fn check_window(window_secs: u64) -> Result<()> {
    if !(1..=MAX_WINDOW_SECS).contains(&window_secs) {
        bail!(
            "Window must be between 1 and {} seconds, got {}",
            MAX_WINDOW_SECS,
            window_secs
        );
    }
    Ok(())
}

/// Parse `op=limit/window_secs` pairs separated by commas
pub fn parse_overrides(raw: &str) -> Result<HashMap<Operation, RateLimitPolicy>> {
    let mut policies = HashMap::new();

    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (name, policy) = entry
            .split_once('=')
            .with_context(|| format!("Expected op=limit/window, got '{}'", entry))?;
        let (limit, window) = policy
            .split_once('/')
            .with_context(|| format!("Expected limit/window in '{}'", entry))?;

        let operation: Operation = name.trim().parse().map_err(anyhow::Error::msg)?;
        let limit: usize = limit
            .trim()
            .parse()
            .with_context(|| format!("Invalid limit in '{}'", entry))?;
        let window_secs: u64 = window
            .trim()
            .parse()
            .with_context(|| format!("Invalid window in '{}'", entry))?;
        check_window(window_secs).with_context(|| format!("Invalid window in '{}'", entry))?;

        policies.insert(operation, RateLimitPolicy::new(limit, window_secs));
    }

    Ok(policies)
}

use std::env;

use anyhow::{Context, Result};
use rust_decimal::Decimal;

/// Process-level knobs, loaded once at startup from the environment, each
/// field falling back to a sane default when unset.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub database_url: String,
    pub alpaca_api_key: String,
    pub alpaca_secret_key: String,
    pub alpaca_base_url: String,

    pub equity_deployment_pct: Decimal,
    pub sell_failure_threshold_usd: Decimal,

    pub poll_interval_seconds: u64,
    pub poll_batch_size: usize,
    pub reconcile_interval_seconds: u64,
    pub tick_interval_minutes: u64,

    pub streaming_timeout_ms: u64,
    pub quote_freshness_seconds: i64,
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:execution.db".to_string()),
            alpaca_api_key: env::var("ALPACA_API_KEY").context("ALPACA_API_KEY not set")?,
            alpaca_secret_key: env::var("ALPACA_SECRET_KEY").context("ALPACA_SECRET_KEY not set")?,
            alpaca_base_url: env::var("ALPACA_BASE_URL").unwrap_or_else(|_| "https://paper-api.alpaca.markets".to_string()),

            equity_deployment_pct: env::var("EQUITY_DEPLOYMENT_PCT").unwrap_or_else(|_| "0.95".to_string()).parse()?,
            sell_failure_threshold_usd: env::var("SELL_FAILURE_THRESHOLD_USD").unwrap_or_else(|_| "500".to_string()).parse()?,

            poll_interval_seconds: env::var("POLL_INTERVAL_SECONDS").unwrap_or_else(|_| "5".to_string()).parse()?,
            poll_batch_size: env::var("POLL_BATCH_SIZE").unwrap_or_else(|_| "10".to_string()).parse()?,
            reconcile_interval_seconds: env::var("RECONCILE_INTERVAL_SECONDS").unwrap_or_else(|_| "300".to_string()).parse()?,
            tick_interval_minutes: env::var("TICK_INTERVAL_MINUTES").unwrap_or_else(|_| "10".to_string()).parse()?,

            streaming_timeout_ms: env::var("STREAMING_TIMEOUT_MS").unwrap_or_else(|_| "5000".to_string()).parse()?,
            quote_freshness_seconds: env::var("QUOTE_FRESHNESS_SECONDS").unwrap_or_else(|_| "10".to_string()).parse()?,
        })
    }
}

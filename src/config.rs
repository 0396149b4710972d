use std::path::PathBuf;
use std::time::Duration;
use url::Url;

use crate::domain::services::bucketizer::DEFAULT_TRACKED_CURRENCIES;
use crate::domain::services::fetch_scheduler::DEFAULT_MAX_PARALLEL_FETCHES;
use crate::task_runner::RetryConfig;

/// Where fetch tasks get their data from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeSourceKind {
    /// Upstream reconciliation service over HTTP
    Http,
    /// Deterministic generated datasets
    Fixture,
}

impl TradeSourceKind {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "http" => Some(TradeSourceKind::Http),
            "fixture" => Some(TradeSourceKind::Fixture),
            _ => None,
        }
    }
}

/// Service configuration
#[derive(Debug, Clone)]
pub struct ReconConfig {
    pub data_dir: PathBuf,
    pub bind_addr: String,
    pub max_parallel_fetches: usize,
    pub trade_source: TradeSourceKind,
    pub uat_base_url: Option<Url>,
    pub prod_base_url: Option<Url>,
    pub uat_token: Option<String>,
    pub prod_token: Option<String>,
    pub fetch_timeout_ms: u64,
    pub fetch_max_attempts: u32,
    pub fetch_retry_delay_ms: u64,
    pub tracked_currencies: Vec<String>,
    pub fixture_records: usize,
}

impl Default for ReconConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            bind_addr: "127.0.0.1:5001".to_string(),
            max_parallel_fetches: DEFAULT_MAX_PARALLEL_FETCHES,
            trade_source: TradeSourceKind::Fixture,
            uat_base_url: None,
            prod_base_url: None,
            uat_token: None,
            prod_token: None,
            fetch_timeout_ms: 30_000,
            fetch_max_attempts: 3,
            fetch_retry_delay_ms: 250,
            tracked_currencies: DEFAULT_TRACKED_CURRENCIES.iter().map(|c| c.to_string()).collect(),
            fixture_records: 1000,
        }
    }
}

impl ReconConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from any key lookup. Invalid values are logged
    /// and the default is kept.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = ReconConfig::default();

        if let Some(dir) = lookup("RECON_DATA_DIR") {
            if !dir.trim().is_empty() {
                config.data_dir = PathBuf::from(dir.trim());
            }
        }

        if let Some(addr) = lookup("RECON_BIND_ADDR") {
            if !addr.trim().is_empty() {
                config.bind_addr = addr.trim().to_string();
            }
        }

        if let Some(workers) = lookup("RECON_MAX_PARALLEL_FETCHES") {
            match workers.parse::<usize>() {
                Ok(value) if (1..=64).contains(&value) => config.max_parallel_fetches = value,
                Ok(value) => {
                    tracing::warn!(
                        "Invalid RECON_MAX_PARALLEL_FETCHES value: {} (must be between 1 and 64), using default: {}",
                        value, config.max_parallel_fetches
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        "Failed to parse RECON_MAX_PARALLEL_FETCHES '{}': {}, using default: {}",
                        workers,
                        e,
                        config.max_parallel_fetches
                    );
                }
            }
        }

        if let Some(kind) = lookup("RECON_TRADE_SOURCE") {
            match TradeSourceKind::parse(&kind) {
                Some(value) => config.trade_source = value,
                None => {
                    tracing::warn!(
                        "Unknown RECON_TRADE_SOURCE '{}' (expected 'http' or 'fixture'), using default: {:?}",
                        kind,
                        config.trade_source
                    );
                }
            }
        }

        config.uat_base_url = parse_url(&lookup, "RECON_UAT_BASE_URL");
        config.prod_base_url = parse_url(&lookup, "RECON_PROD_BASE_URL");
        config.uat_token = lookup("RECON_UAT_TOKEN").filter(|t| !t.trim().is_empty());
        config.prod_token = lookup("RECON_PROD_TOKEN").filter(|t| !t.trim().is_empty());

        if let Some(timeout) = lookup("RECON_FETCH_TIMEOUT_MS") {
            if let Ok(value) = timeout.parse::<u64>() {
                if (100..=600_000).contains(&value) {
                    config.fetch_timeout_ms = value;
                }
            }
        }

        if let Some(attempts) = lookup("RECON_FETCH_MAX_ATTEMPTS") {
            if let Ok(value) = attempts.parse::<u32>() {
                if (1..=10).contains(&value) {
                    config.fetch_max_attempts = value;
                }
            }
        }

        if let Some(delay) = lookup("RECON_FETCH_RETRY_DELAY_MS") {
            if let Ok(value) = delay.parse::<u64>() {
                if value <= 60_000 {
                    config.fetch_retry_delay_ms = value;
                }
            }
        }

        if let Some(list) = lookup("RECON_TRACKED_CURRENCIES") {
            let currencies: Vec<String> = list
                .split(',')
                .map(|c| c.trim().to_ascii_uppercase())
                .filter(|c| c.len() == 3)
                .collect();
            if currencies.is_empty() {
                tracing::warn!(
                    "RECON_TRACKED_CURRENCIES '{}' has no valid currency codes, using default",
                    list
                );
            } else {
                config.tracked_currencies = currencies;
            }
        }

        if let Some(records) = lookup("RECON_FIXTURE_RECORDS") {
            if let Ok(value) = records.parse::<usize>() {
                if value <= 1_000_000 {
                    config.fixture_records = value;
                }
            }
        }

        config
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.fetch_max_attempts,
            initial_retry_delay: Duration::from_millis(self.fetch_retry_delay_ms),
            attempt_timeout: Duration::from_millis(self.fetch_timeout_ms),
            ..RetryConfig::default()
        }
    }
}

fn parse_url<F>(lookup: &F, key: &str) -> Option<Url>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match Url::parse(raw.trim()) {
        Ok(url) => Some(url),
        Err(e) => {
            tracing::warn!("Invalid {} '{}': {}, ignoring", key, raw, e);
            None
        }
    }
}

//! Application configuration loaded from environment variables.

use std::time::Duration;

use outbox::WorkerConfig;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `3000`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`: `text` or `json` (default: `text`)
/// - `DATABASE_URL`: PostgreSQL URL; unset runs on in-memory stores
/// - `DB_MAX_CONNECTIONS`: pool size (default: `10`)
/// - `OUTBOX_POLL_INTERVAL_S`: seconds between poll cycles (default: `3`)
/// - `OUTBOX_BATCH_SIZE`: rows claimed per cycle (default: `10`)
/// - `RETRY_LIMIT`: failed attempts before FAILED (default: `5`)
/// - `RETRY_BACKOFF_MS`: backoff base in milliseconds (default: `2000`)
/// - `OUTBOX_CLAIM_TIMEOUT_S`: stale IN_PROGRESS age (default: `300`)
/// - `OUTBOX_WORKERS`: number of outbox workers (default: `1`)
/// - `BFF_BASE_URL`: where deliveries are POSTed (default: this server)
/// - `DELIVERY_TIMEOUT_S`: per-delivery HTTP timeout (default: `10`)
///
/// The delivery timeout is kept below the claim timeout, so a delivery
/// gives up before another worker may reclaim its row.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub poll_interval: Duration,
    pub batch_size: u32,
    pub retry_limit: u32,
    pub retry_backoff: Duration,
    pub claim_timeout: Duration,
    pub workers: usize,
    pub bff_base_url: Option<String>,
    pub delivery_timeout: Duration,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through `lookup`; unparsable values fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parsed = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());

        let config = Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: lookup("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: match lookup("LOG_FORMAT").as_deref() {
                Some(f) if f.eq_ignore_ascii_case("json") => LogFormat::Json,
                _ => LogFormat::Text,
            },
            database_url: lookup("DATABASE_URL").filter(|url| !url.is_empty()),
            db_max_connections: parsed("DB_MAX_CONNECTIONS")
                .map(|n| n as u32)
                .unwrap_or(defaults.db_max_connections),
            poll_interval: parsed("OUTBOX_POLL_INTERVAL_S")
                .map(Duration::from_secs)
                .unwrap_or(defaults.poll_interval),
            batch_size: parsed("OUTBOX_BATCH_SIZE")
                .map(|n| n as u32)
                .unwrap_or(defaults.batch_size),
            retry_limit: parsed("RETRY_LIMIT")
                .map(|n| n as u32)
                .unwrap_or(defaults.retry_limit),
            retry_backoff: parsed("RETRY_BACKOFF_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_backoff),
            claim_timeout: parsed("OUTBOX_CLAIM_TIMEOUT_S")
                .map(Duration::from_secs)
                .unwrap_or(defaults.claim_timeout),
            workers: parsed("OUTBOX_WORKERS")
                .map(|n| n as usize)
                .unwrap_or(defaults.workers),
            bff_base_url: lookup("BFF_BASE_URL").filter(|url| !url.is_empty()),
            delivery_timeout: parsed("DELIVERY_TIMEOUT_S")
                .map(Duration::from_secs)
                .unwrap_or(defaults.delivery_timeout),
        };
        config.with_bounded_delivery_timeout()
    }

    /// Lowers `delivery_timeout` to half of `claim_timeout` when it would
    /// otherwise outlast the claim.
    fn with_bounded_delivery_timeout(mut self) -> Self {
        if self.delivery_timeout >= self.claim_timeout {
            self.delivery_timeout = self.claim_timeout / 2;
        }
        self
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Base URL the outbox workers deliver to, without a trailing slash.
    pub fn bff_base_url(&self) -> String {
        match &self.bff_base_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("http://127.0.0.1:{}", self.port),
        }
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            poll_interval: self.poll_interval,
            batch_size: self.batch_size,
            retry_limit: self.retry_limit,
            base_backoff: self.retry_backoff,
            claim_timeout: self.claim_timeout,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let worker = WorkerConfig::default();
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            database_url: None,
            db_max_connections: 10,
            poll_interval: worker.poll_interval,
            batch_size: worker.batch_size,
            retry_limit: worker.retry_limit,
            retry_backoff: worker.base_backoff,
            claim_timeout: worker.claim_timeout,
            workers: 1,
            bff_base_url: None,
            delivery_timeout: Duration::from_secs(10),
        }
    }
}

// ⚙️ Configuration - explicit, passed-in settings (no globals)

use crate::draw::DEFAULT_CATALOG_PAGE_SIZE;
use crate::retry::RetryPolicy;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite database file
    pub db_path: String,

    /// Listen address for the optional HTTP server
    pub http_addr: String,

    /// Upper bound on catalog rows loaded per draw
    pub catalog_page_size: usize,

    /// How long a connection waits on a locked database before
    /// reporting a serialization failure
    pub busy_timeout_ms: u64,

    pub retry: RetryPolicy,

    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: "./gacha.db".to_string(),
            http_addr: "0.0.0.0:3000".to_string(),
            catalog_page_size: DEFAULT_CATALOG_PAGE_SIZE,
            busy_timeout_ms: 100,
            retry: RetryPolicy::default(),
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let retry = RetryPolicy {
            max_retries: env_parse("GACHA_MAX_RETRIES").unwrap_or(defaults.retry.max_retries),
            base_delay_ms: env_parse("GACHA_RETRY_BASE_MS").unwrap_or(defaults.retry.base_delay_ms),
            max_delay_ms: env_parse("GACHA_RETRY_MAX_MS").unwrap_or(defaults.retry.max_delay_ms),
            jitter_factor: env_parse("GACHA_RETRY_JITTER").unwrap_or(defaults.retry.jitter_factor),
        };

        Self {
            db_path: std::env::var("GACHA_DB_PATH").unwrap_or(defaults.db_path),
            http_addr: std::env::var("GACHA_HTTP_ADDR").unwrap_or(defaults.http_addr),
            catalog_page_size: env_parse("GACHA_CATALOG_PAGE")
                .filter(|&size: &usize| size > 0)
                .unwrap_or(defaults.catalog_page_size),
            busy_timeout_ms: env_parse("GACHA_BUSY_TIMEOUT_MS").unwrap_or(defaults.busy_timeout_ms),
            retry,
            log_level: std::env::var("GACHA_LOG_LEVEL").unwrap_or(defaults.log_level),
        }
    }

    pub fn with_db_path(mut self, path: impl Into<String>) -> Self {
        self.db_path = path.into();
        self
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.catalog_page_size, 1000);
        assert_eq!(config.busy_timeout(), Duration::from_millis(100));
        assert_eq!(config.retry, RetryPolicy::default());
    }

    #[test]
    fn test_zero_catalog_page_falls_back_to_default() {
        std::env::set_var("GACHA_CATALOG_PAGE", "0");
        let zero = Config::from_env();
        std::env::set_var("GACHA_CATALOG_PAGE", "25");
        let explicit = Config::from_env();
        std::env::remove_var("GACHA_CATALOG_PAGE");

        assert_eq!(zero.catalog_page_size, DEFAULT_CATALOG_PAGE_SIZE);
        assert_eq!(explicit.catalog_page_size, 25);
    }

    #[test]
    fn test_with_db_path() {
        let config = Config::default().with_db_path("/tmp/other.db");
        assert_eq!(config.db_path, "/tmp/other.db");
    }
}

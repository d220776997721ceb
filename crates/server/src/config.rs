//! Environment-driven configuration. Every option has a default; malformed
//! values fall back to it.

use std::str::FromStr;

use tracing::warn;

#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP listen address.
    pub host: String,
    /// HTTP listen port.
    pub port: u16,
    /// Public base URL; consulted by the self-forward guard.
    pub base_url: String,
    /// Maximum captured request body size in bytes.
    pub max_body_bytes: usize,
    /// Delivery worker pool size.
    pub queue_concurrency: u32,
    /// Maximum attempts per retry chain.
    pub queue_max_retries: u32,
    /// SQLite URL backing both the primary store and the job queue.
    pub database_url: String,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            host: env_or("HOOKFREIGHT_HOST", "0.0.0.0".to_string()),
            port: env_or("HOOKFREIGHT_PORT", 3030),
            base_url: env_or(
                "HOOKFREIGHT_BASE_URL",
                "http://localhost:3030".to_string(),
            ),
            max_body_bytes: env_or("HOOKFREIGHT_MAX_BODY_BYTES", 1_048_576),
            queue_concurrency: env_or("HOOKFREIGHT_QUEUE_CONCURRENCY", 5),
            queue_max_retries: env_or("HOOKFREIGHT_QUEUE_MAX_RETRIES", 5),
            database_url: env_or(
                "HOOKFREIGHT_DATABASE_URL",
                "sqlite://hookfreight.db?mode=rwc".to_string(),
            ),
        }
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(raw) => match raw.parse() {
            Ok(value) => value,
            Err(_) => {
                warn!(var = name, value = %raw, "unparseable value, using default");
                default
            }
        },
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_environment() {
        // None of the HOOKFREIGHT_ variables are set under `cargo test`.
        let config = Config::from_env();
        assert_eq!(config.port, 3030);
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.base_url, "http://localhost:3030");
        assert_eq!(config.max_body_bytes, 1_048_576);
        assert_eq!(config.queue_concurrency, 5);
        assert_eq!(config.queue_max_retries, 5);
    }
}

//! Configuration module for environment variable parsing.
//!
//! Reads all configuration from environment variables with sensible
//! defaults, so the engine can run unconfigured in development.

use std::env;
use tracing::warn;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port for the web server to listen on
    pub port: u16,

    /// Number of recipients per dispatch batch
    pub batch_size: usize,

    /// Delay in seconds added per batch index to spread provider load
    pub batch_delay_secs: u64,

    /// Pause range in milliseconds between individual sends within a batch (min, max)
    pub send_pause_ms: (u64, u64),

    /// Country calling code assumed for phones without a leading `+`
    pub default_country_code: String,

    /// Daily send limit applied to providers without an explicit limit
    pub default_daily_limit: u64,

    /// Hourly send limit applied to providers without an explicit limit
    pub default_hourly_limit: u64,

    /// Consecutive batch-level auth failures before a campaign is failed
    pub auth_failure_threshold: u32,

    /// Poll interval in seconds for the scheduled-campaign loop
    pub scheduler_poll_secs: u64,

    /// Whether a bare `subscribe` webhook event clears an unsubscribe
    pub honor_resubscribe: bool,

    /// Signing key for HMAC verification of inbound webhooks (disabled when unset)
    pub webhook_signing_key: Option<String>,

    /// Maximum age in seconds for webhook signature timestamps
    pub webhook_signature_max_age: u64,

    /// Signing key for open/click tracking tokens
    pub tracking_signing_key: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Config {
            port: env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8080),

            batch_size: env::var("BATCH_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(100),

            batch_delay_secs: env::var("BATCH_DELAY_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),

            send_pause_ms: parse_range("SEND_PAUSE_MS", (30, 80)),

            default_country_code: env::var("DEFAULT_COUNTRY_CODE")
                .unwrap_or_else(|_| "55".to_string()),

            default_daily_limit: env::var("DEFAULT_DAILY_LIMIT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(2000),

            default_hourly_limit: env::var("DEFAULT_HOURLY_LIMIT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(200),

            auth_failure_threshold: env::var("AUTH_FAILURE_THRESHOLD")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3),

            scheduler_poll_secs: env::var("SCHEDULER_POLL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(15),

            honor_resubscribe: env::var("HONOR_RESUBSCRIBE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(true),

            webhook_signing_key: env::var("WEBHOOK_SIGNING_KEY").ok(),

            webhook_signature_max_age: env::var("WEBHOOK_SIGNATURE_MAX_AGE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(300), // 5 minutes default

            tracking_signing_key: env::var("TRACKING_SIGNING_KEY").unwrap_or_else(|_| {
                warn!("tracking_signing_key_not_configured");
                "insecure-development-key".to_string()
            }),
        }
    }

    /// Configuration suitable for tests: no delays, no pauses.
    #[cfg(test)]
    pub fn for_tests() -> Self {
        Config {
            port: 0,
            batch_size: 100,
            batch_delay_secs: 0,
            send_pause_ms: (0, 0),
            default_country_code: "55".to_string(),
            default_daily_limit: 2000,
            default_hourly_limit: 200,
            auth_failure_threshold: 3,
            scheduler_poll_secs: 1,
            honor_resubscribe: true,
            webhook_signing_key: None,
            webhook_signature_max_age: 300,
            tracking_signing_key: "test-signing-key".to_string(),
        }
    }
}

/// Parse a comma-separated range like "30,80" into a tuple.
fn parse_range(name: &str, default: (u64, u64)) -> (u64, u64) {
    let raw = match env::var(name) {
        Ok(v) => v,
        Err(_) => return default,
    };

    let parts: Vec<&str> = raw.split(',').collect();
    if parts.len() != 2 {
        warn!(env_var = name, value = %raw, "Invalid range format, using default");
        return default;
    }

    let min = parts[0].trim().parse::<u64>();
    let max = parts[1].trim().parse::<u64>();

    match (min, max) {
        (Ok(min), Ok(max)) if min <= max => (min, max),
        _ => {
            warn!(env_var = name, value = %raw, "Invalid range values, using default");
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_range_valid() {
        env::set_var("TEST_SEND_RANGE", "10,50");
        let result = parse_range("TEST_SEND_RANGE", (0, 0));
        assert_eq!(result, (10, 50));
        env::remove_var("TEST_SEND_RANGE");
    }

    #[test]
    fn test_parse_range_default() {
        let result = parse_range("NONEXISTENT_VAR", (30, 80));
        assert_eq!(result, (30, 80));
    }

    #[test]
    fn test_parse_range_inverted_falls_back() {
        env::set_var("TEST_INVERTED_RANGE", "80,30");
        let result = parse_range("TEST_INVERTED_RANGE", (1, 2));
        assert_eq!(result, (1, 2));
        env::remove_var("TEST_INVERTED_RANGE");
    }
}

//! Runtime configuration for the chat core

use serde::Deserialize;
use std::time::Duration;
use url::Url;

use crate::error::{ChatError, Result};

/// Default history page size
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Connection and paging settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Base URL of the REST persistence gateway
    pub rest_url: String,
    /// Websocket URL of the realtime feed
    pub feed_url: String,
    /// API key sent as `apikey` and bearer token
    pub api_key: Option<String>,
    /// Messages per history page
    pub page_size: usize,
    /// Per-request timeout for gateway calls, in seconds
    pub request_timeout_secs: u64,
    /// First reconnect delay after the feed drops, in milliseconds
    pub reconnect_min_ms: u64,
    /// Upper bound for the reconnect backoff, in milliseconds
    pub reconnect_max_ms: u64,
    /// Period of the background re-fetch of the newest page, in
    /// milliseconds; 0 turns it off
    pub refresh_interval_ms: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            rest_url: "http://localhost:3000/rest/v1".to_string(),
            feed_url: "ws://localhost:3000/realtime".to_string(),
            api_key: None,
            page_size: DEFAULT_PAGE_SIZE,
            request_timeout_secs: 10,
            reconnect_min_ms: 1_000,
            reconnect_max_ms: 30_000,
            refresh_interval_ms: 8_000,
        }
    }
}

impl ChatConfig {
    /// Read `CLUBCHAT_*` environment variables, falling back to defaults
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let number = |key: &str, fallback: u64| {
            lookup(key)
                .and_then(|v| match v.trim().parse::<u64>() {
                    Ok(n) => Some(n),
                    Err(e) => {
                        tracing::warn!("Ignoring {}={:?}: {}", key, v, e);
                        None
                    }
                })
                .unwrap_or(fallback)
        };

        Self {
            rest_url: lookup("CLUBCHAT_REST_URL").unwrap_or(defaults.rest_url),
            feed_url: lookup("CLUBCHAT_FEED_URL").unwrap_or(defaults.feed_url),
            api_key: lookup("CLUBCHAT_API_KEY").filter(|k| !k.is_empty()),
            page_size: number("CLUBCHAT_PAGE_SIZE", defaults.page_size as u64).max(1) as usize,
            request_timeout_secs: number(
                "CLUBCHAT_REQUEST_TIMEOUT_SECS",
                defaults.request_timeout_secs,
            ),
            reconnect_min_ms: number("CLUBCHAT_RECONNECT_MIN_MS", defaults.reconnect_min_ms),
            reconnect_max_ms: number("CLUBCHAT_RECONNECT_MAX_MS", defaults.reconnect_max_ms),
            refresh_interval_ms: number(
                "CLUBCHAT_REFRESH_INTERVAL_MS",
                defaults.refresh_interval_ms,
            ),
        }
    }

    /// Check both endpoints parse and use a scheme the clients speak, and
    /// that sizes and delays are non-zero
    pub fn validate(&self) -> Result<()> {
        check_url("rest_url", &self.rest_url, &["http", "https"])?;
        check_url("feed_url", &self.feed_url, &["ws", "wss"])?;
        check_positive("page_size", self.page_size as u64)?;
        check_positive("request_timeout_secs", self.request_timeout_secs)?;
        check_positive("reconnect_min_ms", self.reconnect_min_ms)?;
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Period of the background refresh, if enabled
    pub fn refresh_interval(&self) -> Option<Duration> {
        (self.refresh_interval_ms > 0).then_some(Duration::from_millis(self.refresh_interval_ms))
    }

    /// Backoff delay before reconnect attempt `attempt` (0-based)
    pub fn reconnect_delay(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt.min(16)).unwrap_or(u64::MAX);
        let ms = self
            .reconnect_min_ms
            .saturating_mul(factor)
            .min(self.reconnect_max_ms.max(self.reconnect_min_ms));
        Duration::from_millis(ms)
    }
}

fn check_positive(field: &str, value: u64) -> Result<()> {
    if value == 0 {
        return Err(ChatError::Config(format!("{} must be at least 1", field)));
    }
    Ok(())
}

fn check_url(field: &str, value: &str, schemes: &[&str]) -> Result<()> {
    let url = Url::parse(value)
        .map_err(|e| ChatError::Config(format!("Invalid {} {:?}: {}", field, value, e)))?;
    if !schemes.contains(&url.scheme()) {
        return Err(ChatError::Config(format!(
            "Unsupported {} scheme: {}",
            field,
            url.scheme()
        )));
    }
    Ok(())
}

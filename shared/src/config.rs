use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{AppError, AppResult, ErrorKind};

/// Runtime settings supplied by the shell at startup. Every field has a
/// default so the shell may send `{}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub api_base_url: String,
    pub cache_ttl_ms: u64,
    pub refresh_interval_ms: u64,
    pub request_timeout_ms: u64,
    pub listing_timeout_ms: u64,
    pub max_retries: u32,
    pub retry_step_ms: u64,
    pub chat_poll_ms: u64,
    pub max_photos: usize,
    pub max_message_chars: usize,
    pub bid_cache_capacity: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8080/".into(),
            cache_ttl_ms: crate::CACHE_TTL_MS,
            refresh_interval_ms: crate::REFRESH_INTERVAL_MS,
            request_timeout_ms: crate::REQUEST_TIMEOUT_MS,
            listing_timeout_ms: crate::LISTING_TIMEOUT_MS,
            max_retries: crate::MAX_RETRIES,
            retry_step_ms: crate::RETRY_STEP_MS,
            chat_poll_ms: crate::CHAT_POLL_MS,
            max_photos: crate::MAX_PHOTOS_PER_UPLOAD,
            max_message_chars: crate::MAX_MESSAGE_CHARS,
            bid_cache_capacity: crate::cache::DEFAULT_BID_CACHE_CAPACITY,
        }
    }
}

impl AppConfig {
    /// Parses the base URL, forcing a trailing slash so relative joins keep
    /// any path prefix.
    pub fn base_url(&self) -> AppResult<Url> {
        let mut raw = self.api_base_url.trim().to_string();
        if !raw.ends_with('/') {
            raw.push('/');
        }
        let url = Url::parse(&raw).map_err(|e| {
            AppError::new(ErrorKind::Validation, "Invalid API base URL")
                .with_internal(e.to_string())
                .with_context("api_base_url", self.api_base_url.clone())
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(AppError::new(ErrorKind::Validation, "Invalid API base URL")
                .with_context("scheme", url.scheme().to_string()));
        }
        Ok(url)
    }

    /// Replaces zero durations and limits with their defaults and caps the
    /// photo count at what one upload request may carry.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        let defaults = Self::default();
        let fix = |value: &mut u64, default: u64| {
            if *value == 0 {
                *value = default;
            }
        };
        fix(&mut self.cache_ttl_ms, defaults.cache_ttl_ms);
        fix(&mut self.refresh_interval_ms, defaults.refresh_interval_ms);
        fix(&mut self.request_timeout_ms, defaults.request_timeout_ms);
        fix(&mut self.listing_timeout_ms, defaults.listing_timeout_ms);
        fix(&mut self.chat_poll_ms, defaults.chat_poll_ms);
        if self.max_photos == 0 {
            self.max_photos = defaults.max_photos;
        }
        self.max_photos = self.max_photos.min(crate::MAX_PHOTOS_PER_UPLOAD);
        if self.max_message_chars == 0 {
            self.max_message_chars = defaults.max_message_chars;
        }
        if self.bid_cache_capacity == 0 {
            self.bid_cache_capacity = defaults.bid_cache_capacity;
        }
        self
    }

    /// Delay before retry number `attempt` (1-based).
    #[must_use]
    pub const fn backoff_ms(&self, attempt: u32) -> u64 {
        self.retry_step_ms.saturating_mul(attempt as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_json_gives_defaults() {
        let config: AppConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.cache_ttl_ms, 30_000);
        assert_eq!(config.refresh_interval_ms, 30_000);
        assert_eq!(config.request_timeout_ms, 15_000);
        assert_eq!(config.listing_timeout_ms, 30_000);
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.retry_step_ms, 1_000);
        assert_eq!(config.chat_poll_ms, 5_000);
        assert_eq!(config.max_photos, 5);
        assert_eq!(config.max_message_chars, 2_000);
    }

    #[test]
    fn test_partial_override() {
        let config: AppConfig =
            serde_json::from_str(r#"{"api_base_url": "https://api.example.com/app", "max_retries": 0}"#).unwrap();
        assert_eq!(config.max_retries, 0);
        assert_eq!(config.cache_ttl_ms, 30_000);
        assert_eq!(config.base_url().unwrap().as_str(), "https://api.example.com/app/");
    }

    #[test]
    fn test_invalid_base_url() {
        let config = AppConfig {
            api_base_url: "ftp://example.com".into(),
            ..AppConfig::default()
        };
        assert!(config.base_url().is_err());
        let config = AppConfig {
            api_base_url: "not a url".into(),
            ..AppConfig::default()
        };
        assert!(config.base_url().is_err());
    }

    #[test]
    fn test_normalized_restores_zeroes() {
        let config = AppConfig {
            cache_ttl_ms: 0,
            max_photos: 0,
            ..AppConfig::default()
        }
        .normalized();
        assert_eq!(config.cache_ttl_ms, 30_000);
        assert_eq!(config.max_photos, 5);
    }

    #[test]
    fn test_normalized_caps_photos_per_upload() {
        let config = AppConfig {
            max_photos: 10,
            ..AppConfig::default()
        }
        .normalized();
        assert_eq!(config.max_photos, 5);

        let config = AppConfig {
            max_photos: 3,
            ..AppConfig::default()
        }
        .normalized();
        assert_eq!(config.max_photos, 3);
    }

    #[test]
    fn test_linear_backoff() {
        let config = AppConfig::default();
        assert_eq!(config.backoff_ms(1), 1_000);
        assert_eq!(config.backoff_ms(2), 2_000);
    }
}

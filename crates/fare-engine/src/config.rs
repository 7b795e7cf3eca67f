use std::env;
use std::path::PathBuf;
use std::time::Duration;

use fare_pricing_client::{DEFAULT_REQUEST_ATTEMPTS, DEFAULT_TIMEOUT_MS, PricingClientConfig};
use thiserror::Error;

use crate::cache::{
    DEFAULT_CLEAR_COOLDOWN, DEFAULT_FORCE_REFRESH_WINDOW, DEFAULT_TTL, FareCacheSettings,
};
use crate::coordinator::{
    CoordinatorSettings, DEFAULT_BULK_DELAY, DEFAULT_EVENT_THROTTLE, DEFAULT_THROTTLE,
};
use crate::store::default_cache_path;
use crate::validator::DEFAULT_DRIFT_TOLERANCE;

#[derive(Clone, Debug, PartialEq)]
pub struct FareEngineConfig {
    pub pricing_base_urls: Vec<String>,
    pub pricing_timeout_ms: u64,
    pub pricing_request_attempts: usize,
    pub cache_path: PathBuf,
    pub cache_ttl: Duration,
    pub throttle: Duration,
    pub event_throttle: Duration,
    pub clear_cooldown: Duration,
    pub force_refresh_window: Duration,
    pub drift_tolerance: f64,
    pub bulk_delay: Duration,
}

impl Default for FareEngineConfig {
    fn default() -> Self {
        Self {
            pricing_base_urls: Vec::new(),
            pricing_timeout_ms: DEFAULT_TIMEOUT_MS,
            pricing_request_attempts: DEFAULT_REQUEST_ATTEMPTS,
            cache_path: default_cache_path(),
            cache_ttl: DEFAULT_TTL,
            throttle: DEFAULT_THROTTLE,
            event_throttle: DEFAULT_EVENT_THROTTLE,
            clear_cooldown: DEFAULT_CLEAR_COOLDOWN,
            force_refresh_window: DEFAULT_FORCE_REFRESH_WINDOW,
            drift_tolerance: DEFAULT_DRIFT_TOLERANCE,
            bulk_delay: DEFAULT_BULK_DELAY,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid FARE_PRICING_BASE_URLS: {0}")]
    InvalidPricingBaseUrls(String),
    #[error("invalid FARE_PRICING_TIMEOUT_MS: {0}")]
    InvalidPricingTimeoutMs(String),
    #[error("invalid FARE_PRICING_REQUEST_ATTEMPTS: {0}")]
    InvalidPricingRequestAttempts(String),
    #[error("invalid FARE_CACHE_PATH: {0}")]
    InvalidCachePath(String),
    #[error("invalid FARE_CACHE_TTL_SECONDS: {0}")]
    InvalidCacheTtlSeconds(String),
    #[error("invalid FARE_THROTTLE_MS: {0}")]
    InvalidThrottleMs(String),
    #[error("invalid FARE_EVENT_THROTTLE_MS: {0}")]
    InvalidEventThrottleMs(String),
    #[error("invalid FARE_CLEAR_COOLDOWN_MS: {0}")]
    InvalidClearCooldownMs(String),
    #[error("invalid FARE_FORCE_REFRESH_WINDOW_MS: {0}")]
    InvalidForceRefreshWindowMs(String),
    #[error("invalid FARE_DRIFT_TOLERANCE: {0}")]
    InvalidDriftTolerance(String),
    #[error("invalid FARE_BULK_DELAY_MS: {0}")]
    InvalidBulkDelayMs(String),
}

impl FareEngineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::parse_from_env(|key| env::var(key).ok())
    }

    /// Build a config from `lookup`; unset keys keep their defaults.
    pub fn parse_from_env(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let pricing_base_urls = parse_with_lookup(
            &lookup,
            "FARE_PRICING_BASE_URLS",
            defaults.pricing_base_urls,
            |raw| {
                let urls = raw
                    .split(',')
                    .map(str::trim)
                    .filter(|value| !value.is_empty())
                    .map(ToString::to_string)
                    .collect::<Vec<_>>();
                if let Some(invalid) = urls
                    .iter()
                    .find(|url| !url.starts_with("http://") && !url.starts_with("https://"))
                {
                    return Err(ConfigError::InvalidPricingBaseUrls(format!(
                        "{invalid} is not an http(s) url"
                    )));
                }
                Ok(urls)
            },
        )?;
        let pricing_timeout_ms = parse_with_lookup(
            &lookup,
            "FARE_PRICING_TIMEOUT_MS",
            defaults.pricing_timeout_ms,
            |raw| {
                raw.trim()
                    .parse::<u64>()
                    .map_err(|error| ConfigError::InvalidPricingTimeoutMs(error.to_string()))
            },
        )?;
        let pricing_request_attempts = parse_with_lookup(
            &lookup,
            "FARE_PRICING_REQUEST_ATTEMPTS",
            defaults.pricing_request_attempts,
            |raw| {
                raw.trim()
                    .parse::<usize>()
                    .map_err(|error| ConfigError::InvalidPricingRequestAttempts(error.to_string()))
                    .map(|value| value.clamp(1, 10))
            },
        )?;
        let cache_path = parse_with_lookup(&lookup, "FARE_CACHE_PATH", defaults.cache_path, |raw| {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                return Err(ConfigError::InvalidCachePath("empty path".to_string()));
            }
            Ok(PathBuf::from(trimmed))
        })?;
        let cache_ttl = parse_with_lookup(
            &lookup,
            "FARE_CACHE_TTL_SECONDS",
            defaults.cache_ttl,
            |raw| {
                raw.trim()
                    .parse::<u64>()
                    .map_err(|error| ConfigError::InvalidCacheTtlSeconds(error.to_string()))
                    .map(|value| Duration::from_secs(value.max(1)))
            },
        )?;
        let throttle = parse_millis(
            &lookup,
            "FARE_THROTTLE_MS",
            defaults.throttle,
            ConfigError::InvalidThrottleMs,
        )?;
        let event_throttle = parse_millis(
            &lookup,
            "FARE_EVENT_THROTTLE_MS",
            defaults.event_throttle,
            ConfigError::InvalidEventThrottleMs,
        )?;
        let clear_cooldown = parse_millis(
            &lookup,
            "FARE_CLEAR_COOLDOWN_MS",
            defaults.clear_cooldown,
            ConfigError::InvalidClearCooldownMs,
        )?;
        let force_refresh_window = parse_millis(
            &lookup,
            "FARE_FORCE_REFRESH_WINDOW_MS",
            defaults.force_refresh_window,
            ConfigError::InvalidForceRefreshWindowMs,
        )?;
        let drift_tolerance = parse_with_lookup(
            &lookup,
            "FARE_DRIFT_TOLERANCE",
            defaults.drift_tolerance,
            |raw| {
                let value = raw
                    .trim()
                    .parse::<f64>()
                    .map_err(|error| ConfigError::InvalidDriftTolerance(error.to_string()))?;
                if !value.is_finite() || value < 0.0 {
                    return Err(ConfigError::InvalidDriftTolerance(format!(
                        "{value} must be a non-negative amount"
                    )));
                }
                Ok(value)
            },
        )?;
        let bulk_delay = parse_millis(
            &lookup,
            "FARE_BULK_DELAY_MS",
            defaults.bulk_delay,
            ConfigError::InvalidBulkDelayMs,
        )?;

        Ok(Self {
            pricing_base_urls,
            pricing_timeout_ms,
            pricing_request_attempts,
            cache_path,
            cache_ttl,
            throttle,
            event_throttle,
            clear_cooldown,
            force_refresh_window,
            drift_tolerance,
            bulk_delay,
        })
    }

    #[must_use]
    pub fn pricing_clients(&self) -> Vec<PricingClientConfig> {
        self.pricing_base_urls
            .iter()
            .map(|base_url| PricingClientConfig {
                base_url: base_url.clone(),
                timeout_ms: self.pricing_timeout_ms,
                request_attempts: self.pricing_request_attempts,
            })
            .collect()
    }

    #[must_use]
    pub fn cache_settings(&self) -> FareCacheSettings {
        FareCacheSettings {
            ttl: self.cache_ttl,
            clear_cooldown: self.clear_cooldown,
            force_refresh_window: self.force_refresh_window,
        }
    }

    #[must_use]
    pub fn coordinator_settings(&self) -> CoordinatorSettings {
        CoordinatorSettings {
            throttle: self.throttle,
            event_throttle: self.event_throttle,
            bulk_delay: self.bulk_delay,
            state_retention: self.cache_ttl,
        }
    }
}

fn parse_with_lookup<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
    parser: impl FnOnce(String) -> Result<T, ConfigError>,
) -> Result<T, ConfigError> {
    match lookup(key) {
        Some(raw) => parser(raw),
        None => Ok(default),
    }
}

fn parse_millis(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
    invalid: fn(String) -> ConfigError,
) -> Result<Duration, ConfigError> {
    parse_with_lookup(lookup, key, default, |raw| {
        raw.trim()
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|error| invalid(error.to_string()))
    })
}

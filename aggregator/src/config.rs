use crate::endpoints::Source;
use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("Duplicate endpoint: {0}")]
    DuplicateEndpoint(Source),

    #[error("Missing endpoint: {0}")]
    MissingEndpoint(Source),

    #[error("Timeout for endpoint {0} cannot be 0")]
    ZeroTimeout(Source),

    #[error("Global page size cannot be 0")]
    ZeroPageSize,

    #[error("Cache max_entries cannot be 0")]
    ZeroCacheCapacity,

    #[error("max_feed_followees cannot be 0")]
    ZeroFeedFollowees,
}

/// Default bound on cached records
pub const DEFAULT_MAX_ENTRIES: u64 = 100_000;

/// Default bound on followees whose posts are fetched for one feed
pub const DEFAULT_MAX_FEED_FOLLOWEES: usize = 200;

/// Aggregator configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    /// Main listener for incoming requests
    pub listener: Listener,
    /// Admin listener for health and readiness checks
    pub admin_listener: Listener,
    /// Downstream services queried by the aggregator
    pub endpoints: Vec<EndpointConfig>,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    /// Page size used for platform-wide listings. Totals derived from these
    /// listings only cover the first page.
    #[serde(default = "default_global_page_size")]
    pub global_page_size: u32,
    /// Followees beyond this many are left out of a feed
    #[serde(default = "default_max_feed_followees")]
    pub max_feed_followees: usize,
}

impl Config {
    /// Validates the aggregator configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.listener.validate()?;
        self.admin_listener.validate()?;

        let mut seen = HashSet::new();
        for endpoint in &self.endpoints {
            if !seen.insert(endpoint.name) {
                return Err(ValidationError::DuplicateEndpoint(endpoint.name));
            }
            if endpoint.timeout_secs == 0 {
                return Err(ValidationError::ZeroTimeout(endpoint.name));
            }
        }

        if let Some(missing) = Source::ALL.iter().find(|source| !seen.contains(*source)) {
            return Err(ValidationError::MissingEndpoint(*missing));
        }

        if self.global_page_size == 0 {
            return Err(ValidationError::ZeroPageSize);
        }

        if self.cache.max_entries == 0 {
            return Err(ValidationError::ZeroCacheCapacity);
        }

        if self.max_feed_followees == 0 {
            return Err(ValidationError::ZeroFeedFollowees);
        }

        Ok(())
    }
}

/// Network listener configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Listener {
    /// Host address to bind to (e.g., "0.0.0.0" or "127.0.0.1")
    pub host: String,
    /// Port number to listen on
    pub port: u16,
}

impl Listener {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }
}

/// Downstream service configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct EndpointConfig {
    /// Which source this endpoint serves
    pub name: Source,
    /// Base URL of the service. Invalid URLs are rejected during deserialization.
    pub url: Url,
    /// Timeout applied to every call made to this service
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct RetryConfig {
    /// Additional attempts after the first failed one
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Retry `n` waits `base_delay_ms * 2^n`
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

/// Time-to-live per aggregation type, and the size bound of the cache
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct CacheConfig {
    #[serde(default = "default_subject_ttl_secs")]
    pub subject_ttl_secs: u64,
    #[serde(default = "default_global_ttl_secs")]
    pub global_ttl_secs: u64,
    #[serde(default = "default_feed_ttl_secs")]
    pub feed_ttl_secs: u64,
    #[serde(default = "default_max_entries")]
    pub max_entries: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            subject_ttl_secs: default_subject_ttl_secs(),
            global_ttl_secs: default_global_ttl_secs(),
            feed_ttl_secs: default_feed_ttl_secs(),
            max_entries: default_max_entries(),
        }
    }
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_subject_ttl_secs() -> u64 {
    300
}

fn default_global_ttl_secs() -> u64 {
    600
}

fn default_feed_ttl_secs() -> u64 {
    60
}

fn default_max_entries() -> u64 {
    DEFAULT_MAX_ENTRIES
}

fn default_global_page_size() -> u32 {
    1000
}

fn default_max_feed_followees() -> usize {
    DEFAULT_MAX_FEED_FOLLOWEES
}

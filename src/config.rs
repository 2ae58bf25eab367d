use crate::limiter::{Limiter, Quota};
use crate::store::AnyStore;
use std::str::FromStr;
use thiserror::Error;

/// Requests allowed per window when the configuration does not say otherwise.
pub const DEFAULT_LIMIT: u64 = 10;
/// Window length in seconds when the configuration does not say otherwise.
pub const DEFAULT_PERIOD: u64 = 20;
#[cfg(feature = "redis")]
const DEFAULT_REDIS_URL: &str = "redis://localhost:6379/0";

/// A construction-time failure; never produced once a limiter is built.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Backend must be one of 'memory' or 'redis', got '{0}'")]
    UnknownBackend(String),
    #[error("Rate limit period must be a positive number of seconds")]
    InvalidPeriod,
    #[cfg(feature = "redis")]
    #[error("Unable to connect to the shared counter store: {0}")]
    StoreConnection(
        #[source]
        #[from]
        redis::RedisError,
    ),
}

/// Which counter store a limiter is built on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendChoice {
    #[cfg(feature = "dashmap")]
    Memory,
    #[cfg(feature = "redis")]
    Redis,
}

impl FromStr for BackendChoice {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, ConfigError> {
        match s {
            #[cfg(feature = "dashmap")]
            "memory" => Ok(BackendChoice::Memory),
            #[cfg(feature = "redis")]
            "redis" => Ok(BackendChoice::Redis),
            other => Err(ConfigError::UnknownBackend(other.to_owned())),
        }
    }
}

/// Construction-time settings for a [Limiter].
///
/// The backend is chosen exactly once, here; anything invalid fails in
/// [build](LimiterConfig::build), never at request time. Missing values fall
/// back to documented defaults with a logged warning.
#[derive(Debug, Clone)]
pub struct LimiterConfig {
    backend: BackendChoice,
    limit: Option<u64>,
    period: Option<u64>,
    #[cfg(feature = "redis")]
    store_url: Option<String>,
}

impl LimiterConfig {
    pub fn new(backend: BackendChoice) -> Self {
        LimiterConfig {
            backend,
            limit: None,
            period: None,
            #[cfg(feature = "redis")]
            store_url: None,
        }
    }

    /// Requests allowed per window.
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Window length in seconds.
    pub fn period(mut self, period: u64) -> Self {
        self.period = Some(period);
        self
    }

    /// Connection URL for the shared store backend.
    #[cfg(feature = "redis")]
    #[cfg_attr(docsrs, doc(cfg(feature = "redis")))]
    pub fn store_url(mut self, url: impl Into<String>) -> Self {
        self.store_url = Some(url.into());
        self
    }

    fn quota(&self) -> Result<Quota, ConfigError> {
        if self.limit.is_none() || self.period.is_none() {
            log::warn!(
                "Rate limit and/or period not configured, falling back to \
                 {DEFAULT_LIMIT} requests per {DEFAULT_PERIOD} seconds"
            );
        }
        Quota::new(
            self.limit.unwrap_or(DEFAULT_LIMIT),
            self.period.unwrap_or(DEFAULT_PERIOD),
        )
    }

    /// Eagerly connect the selected backend and build a limiter on it.
    pub async fn build(self) -> Result<Limiter<AnyStore>, ConfigError> {
        let quota = self.quota()?;
        let store = match self.backend {
            #[cfg(feature = "dashmap")]
            BackendChoice::Memory => {
                AnyStore::Memory(crate::store::memory::InMemoryStore::builder().build())
            }
            #[cfg(feature = "redis")]
            BackendChoice::Redis => {
                let url = self.store_url.unwrap_or_else(|| {
                    log::warn!(
                        "Store URL not configured, falling back to {DEFAULT_REDIS_URL}"
                    );
                    DEFAULT_REDIS_URL.to_owned()
                });
                let client = redis::Client::open(url.as_str())?;
                let manager = redis::aio::ConnectionManager::new(client).await?;
                AnyStore::Redis(crate::store::redis::RedisStore::builder(manager).build())
            }
        };
        Ok(Limiter::new(store, quota))
    }
}

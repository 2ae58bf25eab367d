#![cfg_attr(docsrs, feature(doc_cfg))]

#[cfg(not(any(feature = "dashmap", feature = "redis")))]
compile_error!("At least one counter store feature ('dashmap' or 'redis') must be enabled");

mod clock;
pub mod config;
mod limiter;
mod middleware;
pub mod store;

pub use clock::{Clock, SystemClock};
pub use config::{BackendChoice, ConfigError, LimiterConfig};
pub use limiter::{Decision, Limiter, Quota};
pub use middleware::builder::RateLimiterBuilder;
pub use middleware::key_builder::{KeyBuilder, KeyFuture};
pub use middleware::RateLimiter;

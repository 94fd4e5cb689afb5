//! Redis 适配层：分布式限流与跨实例扇出背板。

mod fanout;
mod rate_limiter;

pub use fanout::{spawn_fanout_subscriber, FanoutEnvelope, RedisFanoutBackbone};
pub use rate_limiter::RedisRateLimiter;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RedisError {
    #[error("redis connection failed: {0}")]
    Connection(String),
}

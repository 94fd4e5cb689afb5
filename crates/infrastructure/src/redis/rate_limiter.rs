//! Redis 固定窗口限流器
//!
//! 计数键为 `rate:{user}:{action}`，首次递增时设置窗口 TTL，
//! 键过期即窗口重开。多实例部署共享同一份配额。

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tracing::{debug, info};

use application::rate_limiter::{RateAction, RateDecision, RateLimitError, RateLimiter};
use config::RedisConfig;
use domain::UserId;

use super::RedisError;

pub struct RedisRateLimiter {
    connection: ConnectionManager,
    key_prefix: String,
}

impl RedisRateLimiter {
    pub async fn new(config: &RedisConfig) -> Result<Self, RedisError> {
        let client = redis::Client::open(config.url.as_str())
            .map_err(|e| RedisError::Connection(format!("failed to create client: {e}")))?;
        let connection = client
            .get_connection_manager()
            .await
            .map_err(|e| RedisError::Connection(format!("failed to connect: {e}")))?;
        info!(url = %config.url, "redis rate limiter connected");
        Ok(Self {
            connection,
            key_prefix: "rate".to_string(),
        })
    }

    fn key(&self, user_id: UserId, action: RateAction) -> String {
        format!("{}:{}:{}", self.key_prefix, user_id, action.as_str())
    }
}

#[async_trait]
impl RateLimiter for RedisRateLimiter {
    async fn check_and_consume(
        &self,
        user_id: UserId,
        action: RateAction,
        limit: u32,
        window: Duration,
    ) -> Result<RateDecision, RateLimitError> {
        let mut conn = self.connection.clone();
        let key = self.key(user_id, action);

        let count: u32 = redis::cmd("INCR")
            .arg(&key)
            .query_async(&mut conn)
            .await
            .map_err(|e| RateLimitError::Unavailable(format!("INCR failed: {e}")))?;

        // 窗口从首次计数开始，由键的 TTL 界定
        if count == 1 {
            let _: () = redis::cmd("EXPIRE")
                .arg(&key)
                .arg(window.as_secs())
                .query_async(&mut conn)
                .await
                .map_err(|e| RateLimitError::Unavailable(format!("EXPIRE failed: {e}")))?;
        }

        if count > limit {
            debug!(user_id = %user_id, action = action.as_str(), count, "rate limit exceeded");
            return Ok(RateDecision {
                allowed: false,
                remaining: 0,
            });
        }

        Ok(RateDecision {
            allowed: true,
            remaining: limit - count,
        })
    }
}

//! 基础设施层：应用层协作接口的外部实现
//!
//! - JWT 凭证验证（`TokenVerifier`）
//! - Redis 固定窗口限流（`RateLimiter`）
//! - Redis Pub/Sub 扇出背板（`FanoutBackbone`）

pub mod jwt;
pub mod redis;

pub use jwt::{issue_token, JwtTokenVerifier};
pub use self::redis::{
    spawn_fanout_subscriber, FanoutEnvelope, RedisError, RedisFanoutBackbone, RedisRateLimiter,
};

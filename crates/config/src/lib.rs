//! 统一配置中心
//!
//! 提供消息核心的全局配置管理，包括：
//! - 服务监听地址
//! - JWT认证
//! - 限流窗口
//! - 输入指示 TTL 与连接空闲超时
//! - 可选的 Redis 扇出背板

use serde::{Deserialize, Serialize};
use std::env;

/// 全局应用配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// 服务配置
    pub server: ServerConfig,
    /// JWT认证配置
    pub auth: AuthConfig,
    /// 限流配置
    pub rate_limit: RateLimitConfig,
    /// 实时行为配置（输入指示、空闲超时）
    pub realtime: RealtimeConfig,
    /// Redis配置（未设置时单进程运行）
    pub redis: Option<RedisConfig>,
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// JWT配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub jwt_secret: String,
    /// 认证阶段允许等待 authenticate 事件的秒数
    pub handshake_timeout_seconds: u64,
}

/// 限流配置：固定窗口，按 (用户, 动作) 计数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// 每窗口允许的消息发送数
    pub messages_per_window: u32,
    /// 每窗口允许的输入指示数
    pub typing_per_window: u32,
    /// 每窗口允许的私信数
    pub dms_per_window: u32,
    /// 窗口长度（秒）
    pub window_seconds: u64,
}

/// 实时行为配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// 输入指示的存活时间（秒）
    pub typing_ttl_seconds: u64,
    /// 输入指示后台清扫间隔（秒）
    pub typing_sweep_interval_seconds: u64,
    /// 连接空闲超时（秒），超时按传输关闭处理
    pub idle_timeout_seconds: u64,
}

/// Redis配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    pub url: String,
    /// 扇出背板使用的频道名
    pub fanout_channel: String,
}

impl AppConfig {
    /// 从环境变量加载配置
    /// JWT_SECRET 缺失时返回错误，避免生产环境使用不安全默认值
    pub fn from_env() -> Result<Self, ConfigError> {
        let jwt_secret = env::var("JWT_SECRET").map_err(|_| {
            ConfigError::MissingVar("JWT_SECRET environment variable is required".to_string())
        })?;
        Ok(Self::build(jwt_secret))
    }

    /// 从环境变量加载配置，开发环境版本
    /// 提供不安全的默认密钥，仅用于测试和开发
    pub fn from_env_with_defaults() -> Self {
        let jwt_secret = env::var("JWT_SECRET").unwrap_or_else(|_| {
            "dev-secret-key-not-for-production-use-minimum-32-chars".to_string()
        });
        Self::build(jwt_secret)
    }

    fn build(jwt_secret: String) -> Self {
        Self {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
                port: env_parse("SERVER_PORT", 8080),
            },
            auth: AuthConfig {
                jwt_secret,
                handshake_timeout_seconds: env_parse("HANDSHAKE_TIMEOUT_SECONDS", 10),
            },
            rate_limit: RateLimitConfig {
                messages_per_window: env_parse("RATE_LIMIT_MESSAGES", 30),
                typing_per_window: env_parse("RATE_LIMIT_TYPING", 60),
                dms_per_window: env_parse("RATE_LIMIT_DMS", 30),
                window_seconds: env_parse("RATE_LIMIT_WINDOW_SECONDS", 60),
            },
            realtime: RealtimeConfig {
                typing_ttl_seconds: env_parse("TYPING_TTL_SECONDS", 5),
                typing_sweep_interval_seconds: env_parse("TYPING_SWEEP_INTERVAL_SECONDS", 2),
                idle_timeout_seconds: env_parse("IDLE_TIMEOUT_SECONDS", 300),
            },
            redis: env::var("REDIS_URL").ok().map(|url| RedisConfig {
                url,
                fanout_channel: env::var("REDIS_FANOUT_CHANNEL")
                    .unwrap_or_else(|_| "relay:fanout".to_string()),
            }),
        }
    }

    /// 验证配置有效性
    pub fn validate(&self) -> Result<(), ConfigError> {
        // JWT密钥至少256位
        if self.auth.jwt_secret.len() < 32 {
            return Err(ConfigError::InvalidAuthConfig(
                "JWT secret must be at least 32 characters long".to_string(),
            ));
        }

        if self.rate_limit.window_seconds == 0 {
            return Err(ConfigError::InvalidRateLimitConfig(
                "Rate limit window must be greater than 0".to_string(),
            ));
        }

        if self.realtime.typing_ttl_seconds == 0 {
            return Err(ConfigError::InvalidRealtimeConfig(
                "Typing TTL must be greater than 0".to_string(),
            ));
        }

        if let Some(redis) = &self.redis {
            if redis.url.is_empty() {
                return Err(ConfigError::InvalidRedisConfig(
                    "Redis URL cannot be empty".to_string(),
                ));
            }
        }

        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// 配置错误类型
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid auth configuration: {0}")]
    InvalidAuthConfig(String),
    #[error("Invalid rate limit configuration: {0}")]
    InvalidRateLimitConfig(String),
    #[error("Invalid realtime configuration: {0}")]
    InvalidRealtimeConfig(String),
    #[error("Invalid redis configuration: {0}")]
    InvalidRedisConfig(String),
}

impl Default for AppConfig {
    /// 默认配置使用开发环境版本
    fn default() -> Self {
        Self::from_env_with_defaults()
    }
}

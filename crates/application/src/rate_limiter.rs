use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use domain::UserId;
use thiserror::Error;

/// 限流动作类别，与 (用户, 动作) 一起构成计数键。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateAction {
    MessageSend,
    Typing,
    DirectMessage,
}

impl RateAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            RateAction::MessageSend => "message:send",
            RateAction::Typing => "typing",
            RateAction::DirectMessage => "dm:send",
        }
    }
}

/// 限流判定结果。
#[derive(Debug, Clone, Copy)]
pub struct RateDecision {
    pub allowed: bool,
    pub remaining: u32,
}

/// 限流器基础设施错误。
///
/// 调用方对这种错误放行（fail-open）：限流基础设施故障不应阻断全部消息，
/// 这是可用性优先于严格性的取舍。
#[derive(Debug, Error)]
pub enum RateLimitError {
    #[error("rate limiter unavailable: {0}")]
    Unavailable(String),
}

/// 固定窗口限流接口。
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// 检查并消费一次配额；`allowed=false` 时本次调用不计数。
    async fn check_and_consume(
        &self,
        user_id: UserId,
        action: RateAction,
        limit: u32,
        window: Duration,
    ) -> Result<RateDecision, RateLimitError>;
}

/// 单个 (用户, 动作) 的计数窗口。
/// 窗口过期即作废，没有跨窗口记忆。
#[derive(Debug, Clone)]
struct RateWindow {
    window_start: Instant,
    count: u32,
}

impl RateWindow {
    fn new(now: Instant) -> Self {
        Self {
            window_start: now,
            count: 0,
        }
    }
}

/// 内存固定窗口限流器。
#[derive(Default)]
pub struct FixedWindowRateLimiter {
    windows: RwLock<HashMap<(UserId, RateAction), RateWindow>>,
}

impl FixedWindowRateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// 清理过期窗口，防止长时间运行下的内存增长。
    pub fn cleanup_expired_windows(&self, window: Duration) {
        if let Ok(mut windows) = self.windows.write() {
            let now = Instant::now();
            windows.retain(|_, w| now.duration_since(w.window_start) < window * 2);
        }
    }
}

#[async_trait]
impl RateLimiter for FixedWindowRateLimiter {
    async fn check_and_consume(
        &self,
        user_id: UserId,
        action: RateAction,
        limit: u32,
        window: Duration,
    ) -> Result<RateDecision, RateLimitError> {
        let mut windows = self
            .windows
            .write()
            .map_err(|_| RateLimitError::Unavailable("window table poisoned".to_string()))?;

        let now = Instant::now();
        let entry = windows
            .entry((user_id, action))
            .or_insert_with(|| RateWindow::new(now));

        // 窗口过期则重开
        if now.duration_since(entry.window_start) >= window {
            *entry = RateWindow::new(now);
        }

        if entry.count >= limit {
            return Ok(RateDecision {
                allowed: false,
                remaining: 0,
            });
        }

        entry.count += 1;
        Ok(RateDecision {
            allowed: true,
            remaining: limit - entry.count,
        })
    }
}

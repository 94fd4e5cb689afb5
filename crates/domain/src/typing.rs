use std::time::Instant;

use crate::value_objects::{ChannelId, UserId};

/// 单个 (频道, 用户) 的输入中标记。
///
/// 客户端重复发送 typing:start 只会刷新 `expires_at`；
/// 即使 stop 事件丢失，过期后也视为不存在，陈旧标记不会被投递。
#[derive(Debug, Clone)]
pub struct TypingState {
    pub channel_id: ChannelId,
    pub user_id: UserId,
    pub expires_at: Instant,
}

impl TypingState {
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

//! 输入指示存储
//!
//! 短 TTL 的 (频道, 用户) 标记。重复的 start 只静默刷新 TTL，
//! 不会重复通知同伴；丢失 stop 事件时靠 TTL 自动过期兜底。

use std::collections::HashMap;
use std::time::{Duration, Instant};

use domain::{ChannelId, TypingState, UserId};
use tokio::sync::RwLock;

pub struct TypingIndicatorStore {
    ttl: Duration,
    states: RwLock<HashMap<(ChannelId, UserId), Instant>>,
}

impl TypingIndicatorStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            states: RwLock::new(HashMap::new()),
        }
    }

    /// 记录输入开始。返回 true 表示这是自上次 stop/过期以来的首次 start，
    /// 此时才需要向同伴广播；false 表示只是刷新了 TTL。
    pub async fn start(&self, channel_id: ChannelId, user_id: UserId) -> bool {
        let now = Instant::now();
        let mut states = self.states.write().await;
        let fresh = match states.get(&(channel_id, user_id)) {
            Some(expires_at) => now >= *expires_at,
            None => true,
        };
        states.insert((channel_id, user_id), now + self.ttl);
        fresh
    }

    /// 立即移除标记。返回 true 表示移除前标记仍有效（需要广播 stop）。
    pub async fn stop(&self, channel_id: ChannelId, user_id: UserId) -> bool {
        let now = Instant::now();
        let mut states = self.states.write().await;
        match states.remove(&(channel_id, user_id)) {
            Some(expires_at) => now < expires_at,
            None => false,
        }
    }

    /// 某频道内当前有效的输入者。过期条目在读取时被视为不存在。
    pub async fn active_in(&self, channel_id: ChannelId) -> Vec<UserId> {
        let now = Instant::now();
        let states = self.states.read().await;
        states
            .iter()
            .filter(|((c, _), expires_at)| *c == channel_id && now < **expires_at)
            .map(|((_, user_id), _)| *user_id)
            .collect()
    }

    pub async fn is_typing(&self, channel_id: ChannelId, user_id: UserId) -> bool {
        let now = Instant::now();
        let states = self.states.read().await;
        states
            .get(&(channel_id, user_id))
            .map(|expires_at| now < *expires_at)
            .unwrap_or(false)
    }

    /// 移除并返回所有已过期的条目，供后台清扫任务广播 typing:stop。
    pub async fn sweep_expired(&self) -> Vec<TypingState> {
        let now = Instant::now();
        let mut states = self.states.write().await;
        let expired: Vec<TypingState> = states
            .iter()
            .filter(|(_, expires_at)| now >= **expires_at)
            .map(|((channel_id, user_id), expires_at)| TypingState {
                channel_id: *channel_id,
                user_id: *user_id,
                expires_at: *expires_at,
            })
            .collect();
        for state in &expired {
            states.remove(&(state.channel_id, state.user_id));
        }
        expired
    }

    /// 清除某用户的全部标记（用户最后一个会话断开时调用）。
    /// 返回仍然有效、需要广播 stop 的频道。
    pub async fn clear_user(&self, user_id: UserId) -> Vec<ChannelId> {
        let now = Instant::now();
        let mut states = self.states.write().await;
        let owned: Vec<(ChannelId, bool)> = states
            .iter()
            .filter(|((_, u), _)| *u == user_id)
            .map(|((channel_id, _), expires_at)| (*channel_id, now < *expires_at))
            .collect();
        let mut live = Vec::new();
        for (channel_id, was_live) in owned {
            states.remove(&(channel_id, user_id));
            if was_live {
                live.push(channel_id);
            }
        }
        live
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn repeated_start_notifies_once() {
        let store = TypingIndicatorStore::new(Duration::from_secs(5));
        let channel_id = ChannelId::from(Uuid::new_v4());
        let user_id = UserId::from(Uuid::new_v4());

        assert!(store.start(channel_id, user_id).await);
        assert!(!store.start(channel_id, user_id).await);
        assert!(!store.start(channel_id, user_id).await);
        assert!(store.is_typing(channel_id, user_id).await);
    }

    #[tokio::test]
    async fn expired_state_is_absent_without_stop() {
        let store = TypingIndicatorStore::new(Duration::from_millis(30));
        let channel_id = ChannelId::from(Uuid::new_v4());
        let user_id = UserId::from(Uuid::new_v4());

        store.start(channel_id, user_id).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(!store.is_typing(channel_id, user_id).await);
        assert!(store.active_in(channel_id).await.is_empty());
        // 过期后的 start 重新视为首次
        assert!(store.start(channel_id, user_id).await);
    }

    #[tokio::test]
    async fn stop_after_expiry_does_not_broadcast() {
        let store = TypingIndicatorStore::new(Duration::from_millis(30));
        let channel_id = ChannelId::from(Uuid::new_v4());
        let user_id = UserId::from(Uuid::new_v4());

        store.start(channel_id, user_id).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!store.stop(channel_id, user_id).await);
    }

    #[tokio::test]
    async fn sweep_collects_expired_entries() {
        let store = TypingIndicatorStore::new(Duration::from_millis(30));
        let channel_id = ChannelId::from(Uuid::new_v4());
        let slow = UserId::from(Uuid::new_v4());
        let fast = UserId::from(Uuid::new_v4());

        store.start(channel_id, slow).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        store.start(channel_id, fast).await;

        let expired = store.sweep_expired().await;
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].user_id, slow);
        assert!(store.is_typing(channel_id, fast).await);
    }

    #[tokio::test]
    async fn clear_user_reports_live_channels_only() {
        let store = TypingIndicatorStore::new(Duration::from_millis(30));
        let live_channel = ChannelId::from(Uuid::new_v4());
        let stale_channel = ChannelId::from(Uuid::new_v4());
        let user_id = UserId::from(Uuid::new_v4());

        store.start(stale_channel, user_id).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        store.start(live_channel, user_id).await;

        let mut cleared = store.clear_user(user_id).await;
        cleared.sort_by_key(|c| c.0);
        assert_eq!(cleared, vec![live_channel]);
        assert!(!store.is_typing(live_channel, user_id).await);
    }
}

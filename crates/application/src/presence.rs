//! 在线状态存储
//!
//! 按用户聚合所有会话：第一个会话打开触发 online，最后一个会话关闭触发
//! offline。离线转换是边沿触发的，非最后一个会话断开不会发出任何事件。

use std::collections::HashMap;
use std::sync::Arc;

use domain::{PresenceRecord, PresenceStatus, UserId};
use tokio::sync::RwLock;

use crate::clock::Clock;

/// 需要通知到用户所属团队的状态变化。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceChange {
    CameOnline,
    WentOffline,
    StatusChanged(PresenceStatus),
}

struct Entry {
    status: PresenceStatus,
    session_count: u32,
    last_seen_at: chrono::DateTime<chrono::Utc>,
}

pub struct PresenceTracker {
    clock: Arc<dyn Clock>,
    entries: RwLock<HashMap<UserId, Entry>>,
}

impl PresenceTracker {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// 用户新会话建立。0 -> 1 时返回 `CameOnline`。
    pub async fn session_opened(&self, user_id: UserId) -> Option<PresenceChange> {
        let now = self.clock.now();
        let mut entries = self.entries.write().await;
        let entry = entries.entry(user_id).or_insert_with(|| Entry {
            status: PresenceStatus::Offline,
            session_count: 0,
            last_seen_at: now,
        });
        entry.session_count += 1;
        entry.last_seen_at = now;
        if entry.session_count == 1 {
            entry.status = PresenceStatus::Online;
            Some(PresenceChange::CameOnline)
        } else {
            None
        }
    }

    /// 用户会话断开。最后一个会话关闭时返回 `WentOffline`，且只返回一次。
    pub async fn session_closed(&self, user_id: UserId) -> Option<PresenceChange> {
        let now = self.clock.now();
        let mut entries = self.entries.write().await;
        let entry = entries.get_mut(&user_id)?;
        entry.session_count = entry.session_count.saturating_sub(1);
        entry.last_seen_at = now;
        if entry.session_count == 0 {
            entry.status = PresenceStatus::Offline;
            Some(PresenceChange::WentOffline)
        } else {
            None
        }
    }

    /// 用户主动修改状态（away/busy 等）。与会话计数无关，
    /// 但离线用户不能设置状态，offline 也不允许手工设置。
    pub async fn set_status(
        &self,
        user_id: UserId,
        status: PresenceStatus,
    ) -> Option<PresenceChange> {
        if status == PresenceStatus::Offline {
            return None;
        }
        let mut entries = self.entries.write().await;
        let entry = entries.get_mut(&user_id)?;
        if entry.session_count == 0 || entry.status == status {
            return None;
        }
        entry.status = status;
        entry.last_seen_at = self.clock.now();
        Some(PresenceChange::StatusChanged(status))
    }

    /// 用户当前聚合状态；未知用户返回 offline 记录。
    pub async fn get(&self, user_id: UserId) -> PresenceRecord {
        let entries = self.entries.read().await;
        match entries.get(&user_id) {
            Some(entry) => PresenceRecord {
                user_id,
                status: entry.status,
                last_seen_at: entry.last_seen_at,
                active_session_count: entry.session_count,
            },
            None => PresenceRecord::offline(user_id, self.clock.now()),
        }
    }
}

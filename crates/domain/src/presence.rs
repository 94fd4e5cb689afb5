use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::value_objects::UserId;

/// 用户在线状态。
///
/// online/offline 由会话计数驱动，away/busy 是用户主动设置的状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceStatus {
    Online,
    Away,
    Busy,
    Offline,
}

/// 用户聚合在线状态记录。
///
/// 不变式：`status == Offline` 当且仅当 `active_session_count == 0`。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceRecord {
    pub user_id: UserId,
    pub status: PresenceStatus,
    pub last_seen_at: DateTime<Utc>,
    pub active_session_count: u32,
}

impl PresenceRecord {
    pub fn offline(user_id: UserId, last_seen_at: DateTime<Utc>) -> Self {
        Self {
            user_id,
            status: PresenceStatus::Offline,
            last_seen_at,
            active_session_count: 0,
        }
    }

    pub fn is_reachable(&self) -> bool {
        self.active_session_count > 0
    }
}

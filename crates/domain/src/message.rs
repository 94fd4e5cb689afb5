use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::value_objects::{ChannelId, MessageContent, MessageId, UserId};

/// 消息类型。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    #[default]
    Text,
    File,
    System,
}

/// 消息上的表情回应。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reaction {
    pub user_id: UserId,
    pub emoji: String,
}

/// 持久化服务返回的规范消息记录。
///
/// id 和时间戳由持久化服务分配，本核心只做转发，不再修改。
/// 频道消息填 `channel_id`，私信填 `recipient_id`，两者互斥。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: MessageId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<ChannelId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipient_id: Option<UserId>,
    pub sender_id: UserId,
    pub content: MessageContent,
    pub kind: MessageKind,
    #[serde(default)]
    pub metadata: serde_json::Value,
    #[serde(default)]
    pub reactions: Vec<Reaction>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edited_at: Option<DateTime<Utc>>,
}

impl MessageRecord {
    pub fn is_direct(&self) -> bool {
        self.recipient_id.is_some()
    }
}

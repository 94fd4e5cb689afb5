//! 传输无关的协议事件定义
//!
//! 入站事件来自客户端，出站事件由扇出路由器推送到各连接。
//! 线上格式为内部标签 JSON（`type` 字段），事件名与客户端约定一致。

use serde::{Deserialize, Serialize};

use crate::errors::ErrorCode;
use crate::message::{MessageKind, MessageRecord};
use crate::presence::PresenceStatus;
use crate::value_objects::{ChannelId, MessageId, UserId};

/// 客户端入站事件。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// 认证，携带凭证 token；连接建立后接受的第一个事件
    #[serde(rename = "authenticate")]
    Authenticate { token: String },
    /// 发送频道消息
    #[serde(rename = "message:send")]
    MessageSend {
        channel_id: ChannelId,
        content: String,
        #[serde(default)]
        kind: MessageKind,
        #[serde(default)]
        metadata: serde_json::Value,
    },
    /// 编辑消息（仅作者或版主）
    #[serde(rename = "message:edit")]
    MessageEdit {
        message_id: MessageId,
        content: String,
    },
    /// 删除消息（仅作者或版主）
    #[serde(rename = "message:delete")]
    MessageDelete { message_id: MessageId },
    /// 表情回应
    #[serde(rename = "message:react")]
    MessageReact { message_id: MessageId, emoji: String },
    /// 开始输入
    #[serde(rename = "typing:start")]
    TypingStart { channel_id: ChannelId },
    /// 停止输入
    #[serde(rename = "typing:stop")]
    TypingStop { channel_id: ChannelId },
    /// 加入频道广播组
    #[serde(rename = "channel:join")]
    ChannelJoin { channel_id: ChannelId },
    /// 离开频道广播组
    #[serde(rename = "channel:leave")]
    ChannelLeave { channel_id: ChannelId },
    /// 修改在线状态（away/busy 等）
    #[serde(rename = "user:status")]
    UserStatus { status: PresenceStatus },
    /// 发送私信
    #[serde(rename = "dm:send")]
    DmSend {
        to_user_id: UserId,
        content: String,
        #[serde(default)]
        metadata: serde_json::Value,
    },
}

impl ClientEvent {
    /// 事件名，用于日志和限流键。
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::Authenticate { .. } => "authenticate",
            ClientEvent::MessageSend { .. } => "message:send",
            ClientEvent::MessageEdit { .. } => "message:edit",
            ClientEvent::MessageDelete { .. } => "message:delete",
            ClientEvent::MessageReact { .. } => "message:react",
            ClientEvent::TypingStart { .. } => "typing:start",
            ClientEvent::TypingStop { .. } => "typing:stop",
            ClientEvent::ChannelJoin { .. } => "channel:join",
            ClientEvent::ChannelLeave { .. } => "channel:leave",
            ClientEvent::UserStatus { .. } => "user:status",
            ClientEvent::DmSend { .. } => "dm:send",
        }
    }
}

/// 服务端出站事件。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "message:new")]
    MessageNew { message: MessageRecord },
    #[serde(rename = "message:edit")]
    MessageEdited { message: MessageRecord },
    #[serde(rename = "message:delete")]
    MessageDeleted {
        message_id: MessageId,
        channel_id: ChannelId,
    },
    #[serde(rename = "message:reaction")]
    MessageReaction {
        message_id: MessageId,
        channel_id: ChannelId,
        user_id: UserId,
        emoji: String,
    },
    #[serde(rename = "typing:start")]
    TypingStarted {
        channel_id: ChannelId,
        user_id: UserId,
    },
    #[serde(rename = "typing:stop")]
    TypingStopped {
        channel_id: ChannelId,
        user_id: UserId,
    },
    #[serde(rename = "user:online")]
    UserOnline { user_id: UserId },
    #[serde(rename = "user:offline")]
    UserOffline { user_id: UserId },
    #[serde(rename = "user:status_change")]
    UserStatusChanged {
        user_id: UserId,
        status: PresenceStatus,
    },
    #[serde(rename = "channel:join")]
    ChannelJoined {
        channel_id: ChannelId,
        user_id: UserId,
    },
    #[serde(rename = "channel:leave")]
    ChannelLeft {
        channel_id: ChannelId,
        user_id: UserId,
    },
    #[serde(rename = "dm:new")]
    DmNew { message: MessageRecord },
    #[serde(rename = "notification")]
    Notification { message: String },
    #[serde(rename = "error")]
    Error { message: String, code: ErrorCode },
}

impl ServerEvent {
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        ServerEvent::Error {
            message: message.into(),
            code,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn client_event_parses_wire_names() {
        let raw = format!(
            r#"{{"type":"typing:start","channel_id":"{}"}}"#,
            Uuid::new_v4()
        );
        let event: ClientEvent = serde_json::from_str(&raw).unwrap();
        assert!(matches!(event, ClientEvent::TypingStart { .. }));
        assert_eq!(event.name(), "typing:start");
    }

    #[test]
    fn message_send_defaults_kind_and_metadata() {
        let raw = format!(
            r#"{{"type":"message:send","channel_id":"{}","content":"hi"}}"#,
            Uuid::new_v4()
        );
        let event: ClientEvent = serde_json::from_str(&raw).unwrap();
        match event {
            ClientEvent::MessageSend { kind, metadata, .. } => {
                assert_eq!(kind, MessageKind::Text);
                assert!(metadata.is_null());
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn error_event_carries_code_string() {
        let event = ServerEvent::error(ErrorCode::AccessDenied, "not a member");
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"ACCESS_DENIED\""));
        assert!(json.contains("\"type\":\"error\""));
    }
}

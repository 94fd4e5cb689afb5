use async_trait::async_trait;
use domain::{ChannelId, MessageContent, MessageId, MessageKind, MessageRecord, UserId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("message not found: {0}")]
    NotFound(MessageId),
    #[error("persistence unavailable: {0}")]
    Infrastructure(String),
    #[error("persistence timed out")]
    Timeout,
}

/// 消息持久化协作方接口。
///
/// 规范记录（id、时间戳）由持久化服务分配。扇出必须等持久化返回后进行，
/// 这是频道内消息顺序与持久化接受顺序一致的前提。
#[async_trait]
pub trait MessagePersistence: Send + Sync {
    async fn create_message(
        &self,
        channel_id: ChannelId,
        sender_id: UserId,
        content: MessageContent,
        kind: MessageKind,
        metadata: serde_json::Value,
    ) -> Result<MessageRecord, PersistenceError>;

    async fn create_direct_message(
        &self,
        sender_id: UserId,
        recipient_id: UserId,
        content: MessageContent,
        metadata: serde_json::Value,
    ) -> Result<MessageRecord, PersistenceError>;

    async fn edit_message(
        &self,
        id: MessageId,
        content: MessageContent,
    ) -> Result<MessageRecord, PersistenceError>;

    async fn delete_message(&self, id: MessageId) -> Result<(), PersistenceError>;

    async fn add_reaction(
        &self,
        id: MessageId,
        user_id: UserId,
        emoji: String,
    ) -> Result<MessageRecord, PersistenceError>;

    async fn get_message(&self, id: MessageId) -> Result<MessageRecord, PersistenceError>;
}

/// 内存实现（用于测试和单机部署）
pub mod memory {
    use super::*;
    use chrono::Utc;
    use domain::Reaction;
    use std::collections::HashMap;
    use tokio::sync::RwLock;

    #[derive(Default)]
    pub struct MemoryMessagePersistence {
        messages: RwLock<HashMap<MessageId, MessageRecord>>,
    }

    impl MemoryMessagePersistence {
        pub fn new() -> Self {
            Self::default()
        }

        pub async fn message_count(&self) -> usize {
            self.messages.read().await.len()
        }
    }

    #[async_trait]
    impl MessagePersistence for MemoryMessagePersistence {
        async fn create_message(
            &self,
            channel_id: ChannelId,
            sender_id: UserId,
            content: MessageContent,
            kind: MessageKind,
            metadata: serde_json::Value,
        ) -> Result<MessageRecord, PersistenceError> {
            let record = MessageRecord {
                id: MessageId::generate(),
                channel_id: Some(channel_id),
                recipient_id: None,
                sender_id,
                content,
                kind,
                metadata,
                reactions: Vec::new(),
                created_at: Utc::now(),
                edited_at: None,
            };
            let mut messages = self.messages.write().await;
            messages.insert(record.id, record.clone());
            Ok(record)
        }

        async fn create_direct_message(
            &self,
            sender_id: UserId,
            recipient_id: UserId,
            content: MessageContent,
            metadata: serde_json::Value,
        ) -> Result<MessageRecord, PersistenceError> {
            let record = MessageRecord {
                id: MessageId::generate(),
                channel_id: None,
                recipient_id: Some(recipient_id),
                sender_id,
                content,
                kind: MessageKind::Text,
                metadata,
                reactions: Vec::new(),
                created_at: Utc::now(),
                edited_at: None,
            };
            let mut messages = self.messages.write().await;
            messages.insert(record.id, record.clone());
            Ok(record)
        }

        async fn edit_message(
            &self,
            id: MessageId,
            content: MessageContent,
        ) -> Result<MessageRecord, PersistenceError> {
            let mut messages = self.messages.write().await;
            let record = messages.get_mut(&id).ok_or(PersistenceError::NotFound(id))?;
            record.content = content;
            record.edited_at = Some(Utc::now());
            Ok(record.clone())
        }

        async fn delete_message(&self, id: MessageId) -> Result<(), PersistenceError> {
            let mut messages = self.messages.write().await;
            messages
                .remove(&id)
                .map(|_| ())
                .ok_or(PersistenceError::NotFound(id))
        }

        async fn add_reaction(
            &self,
            id: MessageId,
            user_id: UserId,
            emoji: String,
        ) -> Result<MessageRecord, PersistenceError> {
            let mut messages = self.messages.write().await;
            let record = messages.get_mut(&id).ok_or(PersistenceError::NotFound(id))?;
            record.reactions.push(Reaction { user_id, emoji });
            Ok(record.clone())
        }

        async fn get_message(&self, id: MessageId) -> Result<MessageRecord, PersistenceError> {
            let messages = self.messages.read().await;
            messages
                .get(&id)
                .cloned()
                .ok_or(PersistenceError::NotFound(id))
        }
    }
}

//! 消息 / 私信用例服务
//!
//! 所有写路径遵循同一顺序：限流 → 成员资格 → 持久化 → 扇出。
//! 持久化失败时不会产生任何广播（不允许部分副作用）；
//! 广播只在持久化返回之后、按返回被观察到的顺序进行，
//! 这保证了频道内投递顺序与持久化接受顺序一致。

use std::sync::Arc;
use std::time::Duration;

use config::RateLimitConfig;
use domain::{
    ChannelId, MessageContent, MessageId, MessageKind, MessageRecord, ServerEvent, SessionId,
    UserId,
};
use tracing::warn;

use crate::collaborators::membership::MembershipAuthority;
use crate::collaborators::persistence::MessagePersistence;
use crate::error::ApplicationError;
use crate::rate_limiter::{RateAction, RateLimiter};
use crate::router::FanoutRouter;

pub struct MessageServiceDependencies {
    pub limiter: Arc<dyn RateLimiter>,
    pub membership: Arc<dyn MembershipAuthority>,
    pub persistence: Arc<dyn MessagePersistence>,
    pub router: Arc<FanoutRouter>,
    pub limits: RateLimitConfig,
}

pub struct MessageService {
    limiter: Arc<dyn RateLimiter>,
    membership: Arc<dyn MembershipAuthority>,
    persistence: Arc<dyn MessagePersistence>,
    router: Arc<FanoutRouter>,
    limits: RateLimitConfig,
}

impl MessageService {
    pub fn new(deps: MessageServiceDependencies) -> Self {
        Self {
            limiter: deps.limiter,
            membership: deps.membership,
            persistence: deps.persistence,
            router: deps.router,
            limits: deps.limits,
        }
    }

    /// 限流检查。基础设施失败时放行（fail-open）：
    /// 限流器故障不应让整个消息面瘫痪，这是刻意的可用性取舍。
    pub async fn check_rate(
        &self,
        user_id: UserId,
        action: RateAction,
    ) -> Result<(), ApplicationError> {
        let limit = match action {
            RateAction::MessageSend => self.limits.messages_per_window,
            RateAction::Typing => self.limits.typing_per_window,
            RateAction::DirectMessage => self.limits.dms_per_window,
        };
        let window = Duration::from_secs(self.limits.window_seconds);
        match self
            .limiter
            .check_and_consume(user_id, action, limit, window)
            .await
        {
            Ok(decision) if decision.allowed => Ok(()),
            Ok(_) => Err(ApplicationError::RateLimited {
                action: action.as_str(),
            }),
            Err(err) => {
                warn!(user_id = %user_id, action = action.as_str(), error = %err,
                    "rate limiter unavailable, failing open");
                Ok(())
            }
        }
    }

    /// 发送频道消息：限流 → 成员 → 持久化 → 广播 message:new。
    pub async fn send_message(
        &self,
        sender_id: UserId,
        channel_id: ChannelId,
        content: String,
        kind: MessageKind,
        metadata: serde_json::Value,
    ) -> Result<MessageRecord, ApplicationError> {
        self.check_rate(sender_id, RateAction::MessageSend).await?;

        let membership = self.membership.is_member(sender_id, channel_id).await?;
        if !membership.member {
            return Err(ApplicationError::access_denied(format!(
                "user {sender_id} is not a member of channel {channel_id}"
            )));
        }

        let content = MessageContent::new(content)?;
        let record = self
            .persistence
            .create_message(channel_id, sender_id, content, kind, metadata)
            .await?;

        self.router
            .broadcast_to_channel(
                channel_id,
                ServerEvent::MessageNew {
                    message: record.clone(),
                },
            )
            .await;
        Ok(record)
    }

    /// 编辑消息。仅原作者或版主可以编辑。
    pub async fn edit_message(
        &self,
        editor_id: UserId,
        message_id: MessageId,
        content: String,
    ) -> Result<MessageRecord, ApplicationError> {
        self.check_rate(editor_id, RateAction::MessageSend).await?;

        let existing = self.persistence.get_message(message_id).await?;
        let channel_id = existing
            .channel_id
            .ok_or_else(|| ApplicationError::access_denied("direct messages cannot be edited"))?;
        self.authorize_author_or_moderator(editor_id, channel_id, &existing)
            .await?;

        let content = MessageContent::new(content)?;
        let record = self.persistence.edit_message(message_id, content).await?;

        self.router
            .broadcast_to_channel(
                channel_id,
                ServerEvent::MessageEdited {
                    message: record.clone(),
                },
            )
            .await;
        Ok(record)
    }

    /// 删除消息。仅原作者或版主可以删除。
    pub async fn delete_message(
        &self,
        deleter_id: UserId,
        message_id: MessageId,
    ) -> Result<(), ApplicationError> {
        self.check_rate(deleter_id, RateAction::MessageSend).await?;

        let existing = self.persistence.get_message(message_id).await?;
        let channel_id = existing
            .channel_id
            .ok_or_else(|| ApplicationError::access_denied("direct messages cannot be deleted"))?;
        self.authorize_author_or_moderator(deleter_id, channel_id, &existing)
            .await?;

        self.persistence.delete_message(message_id).await?;

        self.router
            .broadcast_to_channel(
                channel_id,
                ServerEvent::MessageDeleted {
                    message_id,
                    channel_id,
                },
            )
            .await;
        Ok(())
    }

    /// 表情回应：成员校验 → 持久化 → 广播 message:reaction。
    pub async fn add_reaction(
        &self,
        user_id: UserId,
        message_id: MessageId,
        emoji: String,
    ) -> Result<(), ApplicationError> {
        self.check_rate(user_id, RateAction::MessageSend).await?;

        let existing = self.persistence.get_message(message_id).await?;
        let channel_id = existing
            .channel_id
            .ok_or_else(|| ApplicationError::access_denied("cannot react to direct messages"))?;
        let membership = self.membership.is_member(user_id, channel_id).await?;
        if !membership.member {
            return Err(ApplicationError::access_denied(format!(
                "user {user_id} is not a member of channel {channel_id}"
            )));
        }

        self.persistence
            .add_reaction(message_id, user_id, emoji.clone())
            .await?;

        self.router
            .broadcast_to_channel(
                channel_id,
                ServerEvent::MessageReaction {
                    message_id,
                    channel_id,
                    user_id,
                    emoji,
                },
            )
            .await;
        Ok(())
    }

    /// 发送私信。要求双方共享至少一个团队；投递到接收者的全部会话，
    /// 并回显给发送者除发起连接外的其他会话（多设备一致性）。
    pub async fn send_direct(
        &self,
        sender_id: UserId,
        origin_session: SessionId,
        recipient_id: UserId,
        content: String,
        metadata: serde_json::Value,
    ) -> Result<MessageRecord, ApplicationError> {
        self.check_rate(sender_id, RateAction::DirectMessage).await?;

        let sender_teams = self.membership.teams_of(sender_id).await?;
        let recipient_teams = self.membership.teams_of(recipient_id).await?;
        if sender_teams.is_disjoint(&recipient_teams) {
            return Err(ApplicationError::access_denied(format!(
                "users {sender_id} and {recipient_id} share no team"
            )));
        }

        let content = MessageContent::new(content)?;
        let record = self
            .persistence
            .create_direct_message(sender_id, recipient_id, content, metadata)
            .await?;

        let event = ServerEvent::DmNew {
            message: record.clone(),
        };
        self.router.send_to_user(recipient_id, event.clone()).await;
        self.router
            .send_to_user_except(sender_id, origin_session, event)
            .await;
        Ok(record)
    }

    async fn authorize_author_or_moderator(
        &self,
        actor_id: UserId,
        channel_id: ChannelId,
        record: &MessageRecord,
    ) -> Result<(), ApplicationError> {
        let membership = self.membership.is_member(actor_id, channel_id).await?;
        if !membership.member {
            return Err(ApplicationError::access_denied(format!(
                "user {actor_id} is not a member of channel {channel_id}"
            )));
        }
        if record.sender_id != actor_id && !membership.is_moderator() {
            return Err(ApplicationError::access_denied(
                "only the author or a moderator may modify this message",
            ));
        }
        Ok(())
    }
}

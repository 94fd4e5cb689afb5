//! 扇出路由器
//!
//! 通过会话注册表解析目标会话集，把事件推到每条活跃连接的发送队列。
//! 投递是逐连接尽力而为的：发送失败只跳过该连接，不重试也不阻塞其他
//! 连接，离线客户端依靠持久化历史在重连时补齐。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use domain::{ChannelId, ServerEvent, SessionId, TeamId, UserId};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::registry::SessionRegistry;

/// 广播作用域。
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum FanoutScope {
    Channel { channel_id: ChannelId },
    Team { team_id: TeamId },
    User { user_id: UserId },
}

#[derive(Debug, Error)]
pub enum BackboneError {
    #[error("backbone publish failed: {0}")]
    Publish(String),
}

/// 跨进程扇出背板。
///
/// 多实例部署时把本地产生的广播镜像给其他实例；
/// 单进程部署不挂背板即可，组件契约不变。
#[async_trait]
pub trait FanoutBackbone: Send + Sync {
    async fn publish(&self, scope: FanoutScope, event: &ServerEvent) -> Result<(), BackboneError>;
}

pub struct FanoutRouter {
    registry: Arc<SessionRegistry>,
    senders: RwLock<HashMap<SessionId, mpsc::UnboundedSender<ServerEvent>>>,
    backbone: std::sync::RwLock<Option<Arc<dyn FanoutBackbone>>>,
}

impl FanoutRouter {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self {
            registry,
            senders: RwLock::new(HashMap::new()),
            backbone: std::sync::RwLock::new(None),
        }
    }

    /// 挂载跨进程背板。服务启动时调用一次。
    pub fn attach_backbone(&self, backbone: Arc<dyn FanoutBackbone>) {
        *self.backbone.write().expect("backbone slot poisoned") = Some(backbone);
    }

    pub async fn register_sender(
        &self,
        session_id: SessionId,
        sender: mpsc::UnboundedSender<ServerEvent>,
    ) {
        let mut senders = self.senders.write().await;
        senders.insert(session_id, sender);
    }

    pub async fn unregister_sender(&self, session_id: SessionId) {
        let mut senders = self.senders.write().await;
        senders.remove(&session_id);
    }

    /// 广播到频道组（含背板镜像）。
    pub async fn broadcast_to_channel(&self, channel_id: ChannelId, event: ServerEvent) {
        self.deliver_local(FanoutScope::Channel { channel_id }, &event)
            .await;
        self.mirror(FanoutScope::Channel { channel_id }, &event).await;
    }

    /// 广播到团队组（含背板镜像）。
    pub async fn broadcast_to_team(&self, team_id: TeamId, event: ServerEvent) {
        self.deliver_local(FanoutScope::Team { team_id }, &event).await;
        self.mirror(FanoutScope::Team { team_id }, &event).await;
    }

    /// 投递给某用户的全部会话（含背板镜像）。
    pub async fn send_to_user(&self, user_id: UserId, event: ServerEvent) {
        self.deliver_local(FanoutScope::User { user_id }, &event).await;
        self.mirror(FanoutScope::User { user_id }, &event).await;
    }

    /// 投递给某用户除指定会话外的其他会话（多设备回显）。
    pub async fn send_to_user_except(
        &self,
        user_id: UserId,
        excluded: SessionId,
        event: ServerEvent,
    ) {
        let targets = self.registry.session_ids_for(user_id).await;
        let senders = self.senders.read().await;
        for session_id in targets {
            if session_id == excluded {
                continue;
            }
            Self::push(&senders, session_id, &event);
        }
        self.mirror(FanoutScope::User { user_id }, &event).await;
    }

    /// 单连接投递，用于错误回报和确认，只影响发起连接。
    pub async fn send_to_session(&self, session_id: SessionId, event: ServerEvent) {
        let senders = self.senders.read().await;
        Self::push(&senders, session_id, &event);
    }

    /// 仅本地投递，不镜像到背板。背板订阅端用它转发远端事件，
    /// 避免事件在实例之间往返。
    pub async fn deliver_local(&self, scope: FanoutScope, event: &ServerEvent) {
        let targets = match scope {
            FanoutScope::Channel { channel_id } => self.registry.sessions_in(channel_id).await,
            FanoutScope::Team { team_id } => self.registry.sessions_in_team(team_id).await,
            FanoutScope::User { user_id } => self.registry.session_ids_for(user_id).await,
        };
        if targets.is_empty() {
            return;
        }
        let senders = self.senders.read().await;
        for session_id in targets {
            Self::push(&senders, session_id, event);
        }
    }

    fn push(
        senders: &HashMap<SessionId, mpsc::UnboundedSender<ServerEvent>>,
        session_id: SessionId,
        event: &ServerEvent,
    ) {
        match senders.get(&session_id) {
            Some(sender) => {
                if sender.send(event.clone()).is_err() {
                    // 连接正在关闭，跳过即可
                    debug!(session_id = %session_id, "skipping delivery to closing session");
                }
            }
            None => {
                debug!(session_id = %session_id, "no sender registered for session");
            }
        }
    }

    async fn mirror(&self, scope: FanoutScope, event: &ServerEvent) {
        let backbone = self
            .backbone
            .read()
            .expect("backbone slot poisoned")
            .clone();
        if let Some(backbone) = backbone {
            if let Err(err) = backbone.publish(scope, event).await {
                warn!(error = %err, "fanout backbone publish failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use domain::{DisplayName, ErrorCode, Session};
    use uuid::Uuid;

    async fn connect(
        registry: &SessionRegistry,
        router: &FanoutRouter,
        user_id: UserId,
        channel_id: ChannelId,
    ) -> (SessionId, mpsc::UnboundedReceiver<ServerEvent>) {
        let mut session = Session::new(user_id, DisplayName::parse("tester").unwrap(), Utc::now());
        session.join_channel(channel_id);
        let session_id = session.session_id;
        registry.register(session).await;
        let (tx, rx) = mpsc::unbounded_channel();
        router.register_sender(session_id, tx).await;
        (session_id, rx)
    }

    #[tokio::test]
    async fn channel_broadcast_reaches_members_only() {
        let registry = Arc::new(SessionRegistry::new());
        let router = FanoutRouter::new(registry.clone());
        let channel_id = ChannelId::from(Uuid::new_v4());
        let other_channel = ChannelId::from(Uuid::new_v4());

        let (_, mut member_rx) = connect(
            &registry,
            &router,
            UserId::from(Uuid::new_v4()),
            channel_id,
        )
        .await;
        let (_, mut outsider_rx) = connect(
            &registry,
            &router,
            UserId::from(Uuid::new_v4()),
            other_channel,
        )
        .await;

        router
            .broadcast_to_channel(
                channel_id,
                ServerEvent::Notification {
                    message: "hello".to_string(),
                },
            )
            .await;

        assert!(member_rx.try_recv().is_ok());
        assert!(outsider_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn dead_connection_does_not_block_others() {
        let registry = Arc::new(SessionRegistry::new());
        let router = FanoutRouter::new(registry.clone());
        let channel_id = ChannelId::from(Uuid::new_v4());

        let (_, dead_rx) = connect(
            &registry,
            &router,
            UserId::from(Uuid::new_v4()),
            channel_id,
        )
        .await;
        drop(dead_rx);
        let (_, mut live_rx) = connect(
            &registry,
            &router,
            UserId::from(Uuid::new_v4()),
            channel_id,
        )
        .await;

        router
            .broadcast_to_channel(
                channel_id,
                ServerEvent::Notification {
                    message: "still delivered".to_string(),
                },
            )
            .await;

        assert!(live_rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn send_to_user_except_skips_origin_session() {
        let registry = Arc::new(SessionRegistry::new());
        let router = FanoutRouter::new(registry.clone());
        let user_id = UserId::from(Uuid::new_v4());
        let channel_id = ChannelId::from(Uuid::new_v4());

        let (origin, mut origin_rx) = connect(&registry, &router, user_id, channel_id).await;
        let (_, mut other_rx) = connect(&registry, &router, user_id, channel_id).await;

        router
            .send_to_user_except(
                user_id,
                origin,
                ServerEvent::error(ErrorCode::DmError, "echo"),
            )
            .await;

        assert!(origin_rx.try_recv().is_err());
        assert!(other_rx.try_recv().is_ok());
    }
}

//! 连接处理器（协议状态机）
//!
//! 每条连接一个处理器实例：Connecting → Authenticating → Authenticated →
//! Closing/Closed。认证前只接受 authenticate 事件，其余一律回
//! AUTH_REQUIRED 且不推进状态；认证失败回 AUTH_ERROR 并关闭连接。
//! 单条连接上的事件严格串行处理（包括扇出完成），不同连接并发运行。

use std::sync::Arc;

use domain::{
    ChannelId, ClientEvent, ErrorCode, PresenceStatus, ServerEvent, Session, SessionId, UserId,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::collaborators::auth::TokenVerifier;
use crate::collaborators::membership::MembershipAuthority;
use crate::error::ApplicationError;
use crate::presence::{PresenceChange, PresenceTracker};
use crate::rate_limiter::RateAction;
use crate::registry::SessionRegistry;
use crate::router::FanoutRouter;
use crate::services::MessageService;
use crate::typing::TypingIndicatorStore;

/// 连接处理器的共享依赖，服务启动时装配一次。
pub struct ConnectionDeps {
    pub verifier: Arc<dyn TokenVerifier>,
    pub membership: Arc<dyn MembershipAuthority>,
    pub registry: Arc<SessionRegistry>,
    pub presence: Arc<PresenceTracker>,
    pub typing: Arc<TypingIndicatorStore>,
    pub router: Arc<FanoutRouter>,
    pub messages: Arc<MessageService>,
    pub clock: Arc<dyn Clock>,
}

/// 事件处理结果：是否保持连接。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    Continue,
    Close,
}

enum State {
    Authenticating,
    Authenticated {
        session_id: SessionId,
        user_id: UserId,
    },
    Closed,
}

pub struct ConnectionHandler {
    deps: Arc<ConnectionDeps>,
    outbound: mpsc::UnboundedSender<ServerEvent>,
    state: State,
}

impl ConnectionHandler {
    /// `outbound` 是本连接的发送队列；传输层负责把队列内容刷到 socket。
    pub fn new(deps: Arc<ConnectionDeps>, outbound: mpsc::UnboundedSender<ServerEvent>) -> Self {
        Self {
            deps,
            outbound,
            state: State::Authenticating,
        }
    }

    pub fn session_id(&self) -> Option<SessionId> {
        match &self.state {
            State::Authenticated { session_id, .. } => Some(*session_id),
            _ => None,
        }
    }

    /// 单入口事件分发。认证门禁在这里统一执行，而不是分散在各个处理器里。
    pub async fn handle_event(&mut self, event: ClientEvent) -> EventOutcome {
        match &self.state {
            State::Closed => EventOutcome::Close,
            State::Authenticating => match event {
                ClientEvent::Authenticate { token } => self.authenticate(&token).await,
                other => {
                    self.reply(ServerEvent::error(
                        ErrorCode::AuthRequired,
                        format!("authenticate before sending {}", other.name()),
                    ));
                    EventOutcome::Continue
                }
            },
            State::Authenticated {
                session_id,
                user_id,
            } => {
                let (session_id, user_id) = (*session_id, *user_id);
                self.dispatch(session_id, user_id, event).await
            }
        }
    }

    /// 传输关闭（客户端断开、网络故障或空闲超时）时的清理。
    pub async fn handle_close(&mut self) {
        if let State::Authenticated {
            session_id,
            user_id,
        } = self.state
        {
            self.deps.router.unregister_sender(session_id).await;
            let session = self.deps.registry.unregister(session_id).await;

            // 用户最后一个会话消失时清理其全部输入标记
            if self.deps.registry.session_count_for(user_id).await == 0 {
                for channel_id in self.deps.typing.clear_user(user_id).await {
                    self.deps
                        .router
                        .broadcast_to_channel(
                            channel_id,
                            ServerEvent::TypingStopped {
                                channel_id,
                                user_id,
                            },
                        )
                        .await;
                }
            }

            // 离线转换是边沿触发的：只有最后一个会话断开才广播 user:offline
            if let Some(PresenceChange::WentOffline) =
                self.deps.presence.session_closed(user_id).await
            {
                if let Some(session) = &session {
                    for team_id in &session.joined_teams {
                        self.deps
                            .router
                            .broadcast_to_team(*team_id, ServerEvent::UserOffline { user_id })
                            .await;
                    }
                }
            }
            info!(session_id = %session_id, user_id = %user_id, "connection closed");
        }
        self.state = State::Closed;
    }

    async fn authenticate(&mut self, token: &str) -> EventOutcome {
        let identity = match self.deps.verifier.verify(token).await {
            Ok(identity) => identity,
            Err(err) => {
                warn!(error = %err, "authentication failed");
                self.reply(ServerEvent::error(ErrorCode::AuthError, err.to_string()));
                self.state = State::Closed;
                return EventOutcome::Close;
            }
        };
        let user_id = identity.user_id;

        // 解析团队/频道成员资格；无法解析时连接无法完成初始化，按认证失败关闭
        let teams = match self.deps.membership.teams_of(user_id).await {
            Ok(teams) => teams,
            Err(err) => {
                warn!(user_id = %user_id, error = %err, "membership resolution failed");
                self.reply(ServerEvent::error(ErrorCode::AuthError, err.to_string()));
                self.state = State::Closed;
                return EventOutcome::Close;
            }
        };

        let mut session = Session::new(user_id, identity.display_name, self.deps.clock.now());
        for team_id in &teams {
            match self.deps.membership.channels_of(user_id, *team_id).await {
                Ok(channels) => session.joined_channels.extend(channels),
                Err(err) => {
                    warn!(user_id = %user_id, team_id = %team_id, error = %err,
                        "channel resolution failed");
                    self.reply(ServerEvent::error(ErrorCode::AuthError, err.to_string()));
                    self.state = State::Closed;
                    return EventOutcome::Close;
                }
            }
        }
        session.joined_teams = teams.clone();
        let session_id = session.session_id;

        self.deps.registry.register(session).await;
        self.deps
            .router
            .register_sender(session_id, self.outbound.clone())
            .await;
        self.state = State::Authenticated {
            session_id,
            user_id,
        };

        if let Some(PresenceChange::CameOnline) = self.deps.presence.session_opened(user_id).await {
            for team_id in &teams {
                self.deps
                    .router
                    .broadcast_to_team(*team_id, ServerEvent::UserOnline { user_id })
                    .await;
            }
        }

        self.reply(ServerEvent::Notification {
            message: "authenticated".to_string(),
        });
        info!(session_id = %session_id, user_id = %user_id, "connection authenticated");
        EventOutcome::Continue
    }

    async fn dispatch(
        &mut self,
        session_id: SessionId,
        user_id: UserId,
        event: ClientEvent,
    ) -> EventOutcome {
        match event {
            ClientEvent::Authenticate { .. } => {
                debug!(session_id = %session_id, "ignoring duplicate authenticate");
            }
            ClientEvent::MessageSend {
                channel_id,
                content,
                kind,
                metadata,
            } => {
                if let Err(err) = self
                    .deps
                    .messages
                    .send_message(user_id, channel_id, content, kind, metadata)
                    .await
                {
                    self.reply_error(err.code(), &err);
                }
            }
            ClientEvent::MessageEdit {
                message_id,
                content,
            } => {
                if let Err(err) = self
                    .deps
                    .messages
                    .edit_message(user_id, message_id, content)
                    .await
                {
                    self.reply_error(err.code(), &err);
                }
            }
            ClientEvent::MessageDelete { message_id } => {
                if let Err(err) = self.deps.messages.delete_message(user_id, message_id).await {
                    self.reply_error(err.code(), &err);
                }
            }
            ClientEvent::MessageReact { message_id, emoji } => {
                if let Err(err) = self
                    .deps
                    .messages
                    .add_reaction(user_id, message_id, emoji)
                    .await
                {
                    self.reply_error(err.code(), &err);
                }
            }
            ClientEvent::TypingStart { channel_id } => {
                self.handle_typing_start(session_id, user_id, channel_id)
                    .await;
            }
            ClientEvent::TypingStop { channel_id } => {
                if self.deps.typing.stop(channel_id, user_id).await {
                    self.deps
                        .router
                        .broadcast_to_channel(
                            channel_id,
                            ServerEvent::TypingStopped {
                                channel_id,
                                user_id,
                            },
                        )
                        .await;
                }
            }
            ClientEvent::ChannelJoin { channel_id } => {
                self.handle_channel_join(session_id, user_id, channel_id)
                    .await;
            }
            ClientEvent::ChannelLeave { channel_id } => {
                self.handle_channel_leave(session_id, user_id, channel_id)
                    .await;
            }
            ClientEvent::UserStatus { status } => {
                self.handle_status_change(session_id, user_id, status).await;
            }
            ClientEvent::DmSend {
                to_user_id,
                content,
                metadata,
            } => {
                if let Err(err) = self
                    .deps
                    .messages
                    .send_direct(user_id, session_id, to_user_id, content, metadata)
                    .await
                {
                    self.reply_error(err.code_for_dm(), &err);
                }
            }
        }
        EventOutcome::Continue
    }

    async fn handle_typing_start(
        &mut self,
        session_id: SessionId,
        user_id: UserId,
        channel_id: ChannelId,
    ) {
        if let Err(err) = self.deps.messages.check_rate(user_id, RateAction::Typing).await {
            self.reply_error(err.code(), &err);
            return;
        }
        // 会话的 joined_channels 是授权频道的子集，本地检查即可
        let in_channel = self
            .deps
            .registry
            .get(session_id)
            .await
            .map(|s| s.is_in_channel(channel_id))
            .unwrap_or(false);
        if !in_channel {
            self.reply(ServerEvent::error(
                ErrorCode::AccessDenied,
                format!("not a member of channel {channel_id}"),
            ));
            return;
        }
        // 只有首次 start 才通知同伴，重复调用静默刷新 TTL
        if self.deps.typing.start(channel_id, user_id).await {
            self.deps
                .router
                .broadcast_to_channel(
                    channel_id,
                    ServerEvent::TypingStarted {
                        channel_id,
                        user_id,
                    },
                )
                .await;
        }
    }

    async fn handle_channel_join(
        &mut self,
        session_id: SessionId,
        user_id: UserId,
        channel_id: ChannelId,
    ) {
        let membership = match self.deps.membership.is_member(user_id, channel_id).await {
            Ok(membership) => membership,
            Err(err) => {
                let err = ApplicationError::from(err);
                self.reply_error(err.code(), &err);
                return;
            }
        };
        if !membership.member {
            self.reply(ServerEvent::error(
                ErrorCode::AccessDenied,
                format!("not a member of channel {channel_id}"),
            ));
            return;
        }
        if self.deps.registry.join_channel(session_id, channel_id).await {
            self.deps
                .router
                .broadcast_to_channel(
                    channel_id,
                    ServerEvent::ChannelJoined {
                        channel_id,
                        user_id,
                    },
                )
                .await;
        }
    }

    async fn handle_channel_leave(
        &mut self,
        session_id: SessionId,
        user_id: UserId,
        channel_id: ChannelId,
    ) {
        let in_channel = self
            .deps
            .registry
            .get(session_id)
            .await
            .map(|s| s.is_in_channel(channel_id))
            .unwrap_or(false);
        if !in_channel {
            return;
        }
        // 先广播再退组，离开者自己也能收到确认
        self.deps
            .router
            .broadcast_to_channel(
                channel_id,
                ServerEvent::ChannelLeft {
                    channel_id,
                    user_id,
                },
            )
            .await;
        self.deps.registry.leave_channel(session_id, channel_id).await;
    }

    async fn handle_status_change(
        &mut self,
        session_id: SessionId,
        user_id: UserId,
        status: PresenceStatus,
    ) {
        if let Some(PresenceChange::StatusChanged(status)) =
            self.deps.presence.set_status(user_id, status).await
        {
            if let Some(session) = self.deps.registry.get(session_id).await {
                for team_id in &session.joined_teams {
                    self.deps
                        .router
                        .broadcast_to_team(
                            *team_id,
                            ServerEvent::UserStatusChanged { user_id, status },
                        )
                        .await;
                }
            }
        }
    }

    fn reply(&self, event: ServerEvent) {
        // 队列关闭说明连接正在拆除，丢弃即可
        let _ = self.outbound.send(event);
    }

    fn reply_error(&self, code: ErrorCode, err: &ApplicationError) {
        debug!(code = %code, error = %err, "rejecting client event");
        self.reply(ServerEvent::error(code, err.to_string()));
    }
}

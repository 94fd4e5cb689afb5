//! 会话注册表
//!
//! 所有活跃连接的唯一事实来源，按 userId 和 channelId 两条扇出轴建立索引。
//! 全部索引放在同一把锁下，读者要么看到变更前、要么看到变更后的完整成员集，
//! 不会观察到部分更新。

use std::collections::{HashMap, HashSet};

use domain::{ChannelId, Session, SessionId, TeamId, UserId};
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Default)]
struct Indexes {
    sessions: HashMap<SessionId, Session>,
    user_sessions: HashMap<UserId, HashSet<SessionId>>,
    channel_sessions: HashMap<ChannelId, HashSet<SessionId>>,
    team_sessions: HashMap<TeamId, HashSet<SessionId>>,
}

#[derive(Default)]
pub struct SessionRegistry {
    inner: RwLock<Indexes>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册会话并建立 user/channel/team 索引。
    pub async fn register(&self, session: Session) {
        let mut inner = self.inner.write().await;
        let session_id = session.session_id;

        inner
            .user_sessions
            .entry(session.user_id)
            .or_default()
            .insert(session_id);
        for channel_id in &session.joined_channels {
            inner
                .channel_sessions
                .entry(*channel_id)
                .or_default()
                .insert(session_id);
        }
        for team_id in &session.joined_teams {
            inner
                .team_sessions
                .entry(*team_id)
                .or_default()
                .insert(session_id);
        }
        debug!(session_id = %session_id, user_id = %session.user_id, "session registered");
        inner.sessions.insert(session_id, session);
    }

    /// 注销会话，返回被移除的会话记录。
    pub async fn unregister(&self, session_id: SessionId) -> Option<Session> {
        let mut inner = self.inner.write().await;
        let session = inner.sessions.remove(&session_id)?;

        if let Some(ids) = inner.user_sessions.get_mut(&session.user_id) {
            ids.remove(&session_id);
            if ids.is_empty() {
                inner.user_sessions.remove(&session.user_id);
            }
        }
        for channel_id in &session.joined_channels {
            if let Some(ids) = inner.channel_sessions.get_mut(channel_id) {
                ids.remove(&session_id);
                if ids.is_empty() {
                    inner.channel_sessions.remove(channel_id);
                }
            }
        }
        for team_id in &session.joined_teams {
            if let Some(ids) = inner.team_sessions.get_mut(team_id) {
                ids.remove(&session_id);
                if ids.is_empty() {
                    inner.team_sessions.remove(team_id);
                }
            }
        }
        debug!(session_id = %session_id, user_id = %session.user_id, "session unregistered");
        Some(session)
    }

    pub async fn get(&self, session_id: SessionId) -> Option<Session> {
        let inner = self.inner.read().await;
        inner.sessions.get(&session_id).cloned()
    }

    /// 某用户的全部活跃会话。
    pub async fn sessions_for(&self, user_id: UserId) -> Vec<Session> {
        let inner = self.inner.read().await;
        inner
            .user_sessions
            .get(&user_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.sessions.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub async fn session_count_for(&self, user_id: UserId) -> usize {
        let inner = self.inner.read().await;
        inner
            .user_sessions
            .get(&user_id)
            .map(|ids| ids.len())
            .unwrap_or(0)
    }

    /// 某频道广播组内的会话 id 集合。
    pub async fn sessions_in(&self, channel_id: ChannelId) -> Vec<SessionId> {
        let inner = self.inner.read().await;
        inner
            .channel_sessions
            .get(&channel_id)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    /// 某团队广播组内的会话 id 集合。
    pub async fn sessions_in_team(&self, team_id: TeamId) -> Vec<SessionId> {
        let inner = self.inner.read().await;
        inner
            .team_sessions
            .get(&team_id)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    /// 某用户的会话 id 集合（用于按用户投递）。
    pub async fn session_ids_for(&self, user_id: UserId) -> Vec<SessionId> {
        let inner = self.inner.read().await;
        inner
            .user_sessions
            .get(&user_id)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    /// 会话加入频道广播组；会话与频道索引在同一临界区内更新。
    pub async fn join_channel(&self, session_id: SessionId, channel_id: ChannelId) -> bool {
        let mut inner = self.inner.write().await;
        let Some(session) = inner.sessions.get_mut(&session_id) else {
            return false;
        };
        if !session.join_channel(channel_id) {
            return false;
        }
        inner
            .channel_sessions
            .entry(channel_id)
            .or_default()
            .insert(session_id);
        true
    }

    /// 会话离开频道广播组。
    pub async fn leave_channel(&self, session_id: SessionId, channel_id: ChannelId) -> bool {
        let mut inner = self.inner.write().await;
        let Some(session) = inner.sessions.get_mut(&session_id) else {
            return false;
        };
        if !session.leave_channel(channel_id) {
            return false;
        }
        if let Some(ids) = inner.channel_sessions.get_mut(&channel_id) {
            ids.remove(&session_id);
            if ids.is_empty() {
                inner.channel_sessions.remove(&channel_id);
            }
        }
        true
    }
}

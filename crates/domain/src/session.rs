use std::collections::HashSet;

use chrono::{DateTime, Utc};

use crate::value_objects::{ChannelId, DisplayName, SessionId, TeamId, UserId};

/// 单条连接的会话记录。
///
/// 由创建它的连接处理器独占持有，断开或认证失败时销毁。
/// 一个用户可以同时持有多个会话（多设备登录）。
#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub display_name: DisplayName,
    pub joined_channels: HashSet<ChannelId>,
    pub joined_teams: HashSet<TeamId>,
    pub authenticated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(user_id: UserId, display_name: DisplayName, authenticated_at: DateTime<Utc>) -> Self {
        Self {
            session_id: SessionId::generate(),
            user_id,
            display_name,
            joined_channels: HashSet::new(),
            joined_teams: HashSet::new(),
            authenticated_at,
        }
    }

    pub fn is_in_channel(&self, channel_id: ChannelId) -> bool {
        self.joined_channels.contains(&channel_id)
    }

    pub fn is_in_team(&self, team_id: TeamId) -> bool {
        self.joined_teams.contains(&team_id)
    }

    pub fn join_channel(&mut self, channel_id: ChannelId) -> bool {
        self.joined_channels.insert(channel_id)
    }

    pub fn leave_channel(&mut self, channel_id: ChannelId) -> bool {
        self.joined_channels.remove(&channel_id)
    }
}

use std::collections::HashSet;

use async_trait::async_trait;
use domain::{ChannelId, TeamId, UserId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 频道内角色。版主可以编辑/删除他人的消息。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelRole {
    Member,
    Moderator,
}

/// 成员资格查询结果。
#[derive(Debug, Clone, Copy)]
pub struct Membership {
    pub member: bool,
    pub role: Option<ChannelRole>,
}

impl Membership {
    pub fn none() -> Self {
        Self {
            member: false,
            role: None,
        }
    }

    pub fn with_role(role: ChannelRole) -> Self {
        Self {
            member: true,
            role: Some(role),
        }
    }

    pub fn is_moderator(&self) -> bool {
        matches!(self.role, Some(ChannelRole::Moderator))
    }
}

#[derive(Debug, Error)]
pub enum MembershipError {
    #[error("user not found: {0}")]
    UserNotFound(UserId),
    #[error("membership lookup unavailable: {0}")]
    Infrastructure(String),
    #[error("membership lookup timed out")]
    Timeout,
}

/// 成员资格权威接口。
///
/// 频道/团队的成员名单归外部服务所有，本核心每次操作前查询，
/// 不在本地缓存授权结果。
#[async_trait]
pub trait MembershipAuthority: Send + Sync {
    /// 用户是否是频道的活跃成员，以及其角色
    async fn is_member(
        &self,
        user_id: UserId,
        channel_id: ChannelId,
    ) -> Result<Membership, MembershipError>;

    /// 用户所属的团队集合
    async fn teams_of(&self, user_id: UserId) -> Result<HashSet<TeamId>, MembershipError>;

    /// 用户在某团队内可见的频道集合
    async fn channels_of(
        &self,
        user_id: UserId,
        team_id: TeamId,
    ) -> Result<HashSet<ChannelId>, MembershipError>;
}

/// 内存实现（用于测试和单机部署）
pub mod memory {
    use super::*;
    use std::collections::HashMap;
    use std::sync::RwLock;

    #[derive(Default)]
    struct Tables {
        known_users: HashSet<UserId>,
        team_members: HashMap<TeamId, HashSet<UserId>>,
        channel_team: HashMap<ChannelId, TeamId>,
        channel_members: HashMap<ChannelId, HashMap<UserId, ChannelRole>>,
    }

    #[derive(Default)]
    pub struct MemoryMembershipAuthority {
        tables: RwLock<Tables>,
    }

    impl MemoryMembershipAuthority {
        pub fn new() -> Self {
            Self::default()
        }

        /// 登记用户（即使没有任何成员资格也视为存在）
        pub fn add_user(&self, user_id: UserId) {
            let mut tables = self.tables.write().expect("membership tables poisoned");
            tables.known_users.insert(user_id);
        }

        pub fn add_team_member(&self, team_id: TeamId, user_id: UserId) {
            let mut tables = self.tables.write().expect("membership tables poisoned");
            tables.known_users.insert(user_id);
            tables.team_members.entry(team_id).or_default().insert(user_id);
        }

        pub fn add_channel(&self, channel_id: ChannelId, team_id: TeamId) {
            let mut tables = self.tables.write().expect("membership tables poisoned");
            tables.channel_team.insert(channel_id, team_id);
        }

        pub fn add_channel_member(&self, channel_id: ChannelId, user_id: UserId, role: ChannelRole) {
            let mut tables = self.tables.write().expect("membership tables poisoned");
            tables.known_users.insert(user_id);
            tables
                .channel_members
                .entry(channel_id)
                .or_default()
                .insert(user_id, role);
        }

        pub fn remove_channel_member(&self, channel_id: ChannelId, user_id: UserId) {
            let mut tables = self.tables.write().expect("membership tables poisoned");
            if let Some(members) = tables.channel_members.get_mut(&channel_id) {
                members.remove(&user_id);
            }
        }
    }

    #[async_trait]
    impl MembershipAuthority for MemoryMembershipAuthority {
        async fn is_member(
            &self,
            user_id: UserId,
            channel_id: ChannelId,
        ) -> Result<Membership, MembershipError> {
            let tables = self.tables.read().expect("membership tables poisoned");
            let membership = tables
                .channel_members
                .get(&channel_id)
                .and_then(|members| members.get(&user_id))
                .map(|role| Membership::with_role(*role))
                .unwrap_or_else(Membership::none);
            Ok(membership)
        }

        async fn teams_of(&self, user_id: UserId) -> Result<HashSet<TeamId>, MembershipError> {
            let tables = self.tables.read().expect("membership tables poisoned");
            if !tables.known_users.contains(&user_id) {
                return Err(MembershipError::UserNotFound(user_id));
            }
            let teams = tables
                .team_members
                .iter()
                .filter(|(_, members)| members.contains(&user_id))
                .map(|(team_id, _)| *team_id)
                .collect();
            Ok(teams)
        }

        async fn channels_of(
            &self,
            user_id: UserId,
            team_id: TeamId,
        ) -> Result<HashSet<ChannelId>, MembershipError> {
            let tables = self.tables.read().expect("membership tables poisoned");
            let channels = tables
                .channel_members
                .iter()
                .filter(|(channel_id, members)| {
                    tables.channel_team.get(channel_id) == Some(&team_id)
                        && members.contains_key(&user_id)
                })
                .map(|(channel_id, _)| *channel_id)
                .collect();
            Ok(channels)
        }
    }
}

use domain::{DomainError, ErrorCode};
use thiserror::Error;

use crate::collaborators::auth::AuthError;
use crate::collaborators::membership::MembershipError;
use crate::collaborators::persistence::PersistenceError;

/// 应用层错误。
///
/// 校验类失败只回报给触发事件的连接，不影响其他会话；
/// 基础设施类失败映射为 MESSAGE_ERROR / DM_ERROR，由客户端负责重发。
#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("domain error: {0}")]
    Domain(#[from] DomainError),
    #[error("authentication required")]
    AuthRequired,
    #[error("authentication failed: {0}")]
    Authentication(#[from] AuthError),
    #[error("access denied: {0}")]
    AccessDenied(String),
    #[error("rate limit exceeded for {action}")]
    RateLimited { action: &'static str },
    #[error("user not found: {0}")]
    UserNotFound(domain::UserId),
    #[error("membership lookup failed: {0}")]
    Membership(MembershipError),
    #[error("persistence failed: {0}")]
    Persistence(PersistenceError),
}

impl ApplicationError {
    pub fn access_denied(reason: impl Into<String>) -> Self {
        Self::AccessDenied(reason.into())
    }

    /// 频道消息路径的错误码映射。
    pub fn code(&self) -> ErrorCode {
        match self {
            ApplicationError::Domain(_) => ErrorCode::MessageError,
            ApplicationError::AuthRequired => ErrorCode::AuthRequired,
            ApplicationError::Authentication(_) => ErrorCode::AuthError,
            ApplicationError::AccessDenied(_) => ErrorCode::AccessDenied,
            ApplicationError::RateLimited { .. } => ErrorCode::RateLimitExceeded,
            ApplicationError::UserNotFound(_) => ErrorCode::UserNotFound,
            ApplicationError::Membership(_) => ErrorCode::MessageError,
            ApplicationError::Persistence(_) => ErrorCode::MessageError,
        }
    }

    /// 私信路径的错误码映射：基础设施失败用 DM_ERROR。
    pub fn code_for_dm(&self) -> ErrorCode {
        match self.code() {
            ErrorCode::MessageError => ErrorCode::DmError,
            other => other,
        }
    }
}

impl From<MembershipError> for ApplicationError {
    fn from(value: MembershipError) -> Self {
        match value {
            MembershipError::UserNotFound(user_id) => ApplicationError::UserNotFound(user_id),
            other => ApplicationError::Membership(other),
        }
    }
}

impl From<PersistenceError> for ApplicationError {
    fn from(value: PersistenceError) -> Self {
        ApplicationError::Persistence(value)
    }
}

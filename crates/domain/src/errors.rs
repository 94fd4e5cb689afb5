use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 领域层错误。
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("invalid {field}: {reason}")]
    InvalidArgument { field: String, reason: String },
}

impl DomainError {
    pub fn invalid_argument(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// 下发给客户端的错误码。
///
/// 对应 error 事件载荷中的 `code` 字段，客户端依赖字符串形式做分支处理。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    /// 连接尚未完成认证，事件被拒绝但连接保持
    #[serde(rename = "AUTH_REQUIRED")]
    AuthRequired,
    /// 凭证无效，连接将被关闭
    #[serde(rename = "AUTH_ERROR")]
    AuthError,
    /// 成员资格检查未通过
    #[serde(rename = "ACCESS_DENIED")]
    AccessDenied,
    /// 触发限流
    #[serde(rename = "RATE_LIMIT_EXCEEDED")]
    RateLimitExceeded,
    /// 私信目标用户不存在
    #[serde(rename = "USER_NOT_FOUND")]
    UserNotFound,
    /// 频道消息在校验通过后持久化或扇出失败
    #[serde(rename = "MESSAGE_ERROR")]
    MessageError,
    /// 私信在校验通过后持久化或投递失败
    #[serde(rename = "DM_ERROR")]
    DmError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::AuthRequired => "AUTH_REQUIRED",
            ErrorCode::AuthError => "AUTH_ERROR",
            ErrorCode::AccessDenied => "ACCESS_DENIED",
            ErrorCode::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            ErrorCode::UserNotFound => "USER_NOT_FOUND",
            ErrorCode::MessageError => "MESSAGE_ERROR",
            ErrorCode::DmError => "DM_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_code_serializes_to_wire_form() {
        let json = serde_json::to_string(&ErrorCode::RateLimitExceeded).unwrap();
        assert_eq!(json, "\"RATE_LIMIT_EXCEEDED\"");
    }
}

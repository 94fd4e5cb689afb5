use async_trait::async_trait;
use domain::{DisplayName, UserId};
use thiserror::Error;

/// 身份验证协作方返回的已验证身份。
#[derive(Debug, Clone)]
pub struct VerifiedIdentity {
    pub user_id: UserId,
    pub display_name: DisplayName,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid token: {0}")]
    InvalidToken(String),
    #[error("verification unavailable: {0}")]
    Infrastructure(String),
}

/// 凭证验证接口。
///
/// 连接处理器在 Authenticating 状态下用它解析 token；
/// 任何失败都会关闭连接（AUTH_ERROR）。
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<VerifiedIdentity, AuthError>;
}

/// 内存实现（用于测试）
pub mod memory {
    use super::*;
    use std::collections::HashMap;
    use std::sync::RwLock;

    /// 固定 token 表的验证器。
    #[derive(Default)]
    pub struct StaticTokenVerifier {
        tokens: RwLock<HashMap<String, VerifiedIdentity>>,
    }

    impl StaticTokenVerifier {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn insert(&self, token: impl Into<String>, identity: VerifiedIdentity) {
            self.tokens
                .write()
                .expect("token table poisoned")
                .insert(token.into(), identity);
        }
    }

    #[async_trait]
    impl TokenVerifier for StaticTokenVerifier {
        async fn verify(&self, token: &str) -> Result<VerifiedIdentity, AuthError> {
            self.tokens
                .read()
                .expect("token table poisoned")
                .get(token)
                .cloned()
                .ok_or_else(|| AuthError::InvalidToken("unknown token".to_string()))
        }
    }
}

//! JWT 凭证验证
//!
//! 实现应用层的 `TokenVerifier` 接口。令牌由外部身份服务签发，
//! 本服务只做 HS256 验签和声明解析，不签发也不撤销令牌。

use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use application::collaborators::auth::{AuthError, TokenVerifier, VerifiedIdentity};
use config::AuthConfig;
use domain::{DisplayName, UserId};

/// 令牌声明。`sub` 为用户 id，`name` 为身份服务确认的显示名。
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub name: String,
    pub exp: i64,
    pub iat: i64,
}

pub struct JwtTokenVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtTokenVerifier {
    pub fn new(config: &AuthConfig) -> Self {
        let decoding_key = DecodingKey::from_secret(config.jwt_secret.as_bytes());
        let mut validation = Validation::default();
        validation.validate_exp = true;
        Self {
            decoding_key,
            validation,
        }
    }
}

#[async_trait]
impl TokenVerifier for JwtTokenVerifier {
    async fn verify(&self, token: &str) -> Result<VerifiedIdentity, AuthError> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))?;

        let display_name = DisplayName::parse(data.claims.name)
            .map_err(|e| AuthError::InvalidToken(format!("bad display name claim: {e}")))?;

        debug!(user_id = %data.claims.sub, "token verified");
        Ok(VerifiedIdentity {
            user_id: UserId::from(data.claims.sub),
            display_name,
        })
    }
}

/// 签发令牌，测试和本地联调用。
pub fn issue_token(
    config: &AuthConfig,
    user_id: UserId,
    name: &str,
    ttl_seconds: i64,
) -> Result<String, jsonwebtoken::errors::Error> {
    use jsonwebtoken::{encode, EncodingKey, Header};

    let now = Utc::now().timestamp();
    let claims = Claims {
        sub: user_id.into(),
        name: name.to_string(),
        exp: now + ttl_seconds,
        iat: now,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.jwt_secret.as_bytes()),
    )
}

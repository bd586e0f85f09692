//! 令牌签发与校验端口
//!
//! 访问令牌是短期的签名凭证；刷新令牌是一次性的随机秘密，只以摘要形式持久化。

use domain::{TokenDigest, User, UserId};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("token is invalid")]
    Invalid,
    #[error("token has expired")]
    Expired,
    #[error("token signing failed: {0}")]
    Signing(String),
}

impl TokenError {
    pub fn signing(message: impl Into<String>) -> Self {
        Self::Signing(message.into())
    }

    /// 由客户端提供的令牌不合法导致的错误
    pub fn is_client_error(&self) -> bool {
        matches!(self, TokenError::Invalid | TokenError::Expired)
    }
}

/// 通过访问令牌确认的调用方身份
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthIdentity {
    pub user_id: UserId,
    pub email: String,
    pub username: String,
}

/// 一次签发的令牌对，刷新令牌原文只在这里出现一次
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    /// 访问令牌剩余秒数
    pub expires_in: i64,
}

pub trait TokenService: Send + Sync {
    fn issue_access_token(&self, user: &User) -> Result<String, TokenError>;
    fn verify_access_token(&self, token: &str) -> Result<AuthIdentity, TokenError>;
    fn access_token_ttl_secs(&self) -> i64;
    /// 生成新的刷新令牌原文（密码学安全随机数）
    fn generate_refresh_secret(&self) -> String;
    fn digest_refresh_secret(&self, raw: &str) -> Result<TokenDigest, TokenError>;
}

use chrono::Duration;

use crate::value_objects::{RefreshTokenId, Timestamp, TokenDigest, UserId};

/// 刷新令牌有效期：7 天
pub const REFRESH_TOKEN_TTL_DAYS: i64 = 7;

/// 已持久化的刷新令牌。只保存摘要，每次刷新都会吊销旧记录并签发新记录。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshToken {
    pub id: RefreshTokenId,
    pub user_id: UserId,
    pub token_digest: TokenDigest,
    pub expires_at: Timestamp,
    pub revoked: bool,
    pub created_at: Timestamp,
}

impl RefreshToken {
    pub fn issue(user_id: UserId, token_digest: TokenDigest, now: Timestamp) -> Self {
        Self {
            id: RefreshTokenId::generate(),
            user_id,
            token_digest,
            expires_at: now + Duration::days(REFRESH_TOKEN_TTL_DAYS),
            revoked: false,
            created_at: now,
        }
    }

    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.expires_at <= now
    }
}

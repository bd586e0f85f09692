//! Bearer 令牌认证
//!
//! 受保护的路由通过 [`AuthUser`] 提取器拿到已验证的调用方身份。

use application::AuthIdentity;
use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
};
use domain::UserId;

use crate::{error::ApiError, state::AppState};

/// 已通过访问令牌验证的调用方
#[derive(Debug, Clone)]
pub struct AuthUser(pub AuthIdentity);

impl AuthUser {
    pub fn id(&self) -> UserId {
        self.0.user_id
    }
}

/// 从 `Authorization: Bearer <token>` 头中取出令牌
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|header| header.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers)
            .ok_or_else(|| ApiError::unauthorized("missing bearer token"))?;
        let identity = state.auth_service.verify_access_token(token)?;
        Ok(AuthUser(identity))
    }
}

use std::sync::Arc;

use domain::{
    validate_password_strength, DomainError, RefreshToken, RefreshTokenRepository,
    RepositoryError, User, UserEmail, UserId, UserRepository, Username,
};
use serde::Serialize;
use tracing::{info, warn};

use crate::{
    clock::Clock,
    error::ApplicationError,
    password::PasswordHasher,
    token::{AuthIdentity, TokenPair, TokenService},
};

#[derive(Debug, Clone)]
pub struct RegisterUserRequest {
    pub email: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// 登录或刷新成功后返回给客户端的内容
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthSession {
    pub user: User,
    #[serde(flatten)]
    pub tokens: TokenPair,
}

pub struct AuthServiceDependencies {
    pub user_repository: Arc<dyn UserRepository>,
    pub refresh_token_repository: Arc<dyn RefreshTokenRepository>,
    pub password_hasher: Arc<dyn PasswordHasher>,
    pub token_service: Arc<dyn TokenService>,
    pub clock: Arc<dyn Clock>,
}

/// 凭证与令牌管理
pub struct AuthService {
    deps: AuthServiceDependencies,
}

impl AuthService {
    pub fn new(deps: AuthServiceDependencies) -> Self {
        Self { deps }
    }

    pub async fn register(&self, request: RegisterUserRequest) -> Result<User, ApplicationError> {
        let email = UserEmail::parse(request.email)?;
        let username = Username::parse(request.username)?;
        validate_password_strength(&request.password)?;

        if self
            .deps
            .user_repository
            .find_by_email(email.clone())
            .await?
            .is_some()
        {
            return Err(DomainError::EmailAlreadyExists.into());
        }
        if self
            .deps
            .user_repository
            .find_by_username(username.clone())
            .await?
            .is_some()
        {
            return Err(DomainError::UsernameAlreadyExists.into());
        }

        let password_hash = self.deps.password_hasher.hash(&request.password).await?;
        let user = User::register(
            UserId::generate(),
            username,
            email,
            password_hash,
            self.deps.clock.now(),
        );

        // 并发注册时由唯一约束兜底
        let stored = self
            .deps
            .user_repository
            .create(user)
            .await
            .map_err(|err| match err {
                RepositoryError::Conflict { constraint } if constraint.contains("email") => {
                    ApplicationError::from(DomainError::EmailAlreadyExists)
                }
                RepositoryError::Conflict { .. } => {
                    ApplicationError::from(DomainError::UsernameAlreadyExists)
                }
                other => other.into(),
            })?;

        info!(user_id = %stored.id, username = %stored.username, "用户注册成功");
        Ok(stored)
    }

    /// 邮箱不存在与密码错误返回完全相同的错误
    pub async fn login(&self, request: LoginRequest) -> Result<AuthSession, ApplicationError> {
        let email =
            UserEmail::parse(request.email).map_err(|_| DomainError::InvalidCredentials)?;
        let user = self
            .deps
            .user_repository
            .find_by_email(email)
            .await?
            .ok_or(DomainError::InvalidCredentials)?;

        let password_ok = self
            .deps
            .password_hasher
            .verify(&request.password, &user.password)
            .await?;
        if !password_ok {
            return Err(DomainError::InvalidCredentials.into());
        }

        let tokens = self.issue_tokens(&user).await?;
        info!(user_id = %user.id, "用户登录成功");
        Ok(AuthSession { user, tokens })
    }

    /// 轮换刷新令牌：旧令牌被原子吊销，只有一个并发请求能成功
    pub async fn refresh(&self, raw_refresh_token: &str) -> Result<AuthSession, ApplicationError> {
        let digest = self
            .deps
            .token_service
            .digest_refresh_secret(raw_refresh_token.trim())?;
        let revoked = self
            .deps
            .refresh_token_repository
            .revoke_active(digest)
            .await?
            .ok_or(DomainError::InvalidToken)?;

        if revoked.is_expired(self.deps.clock.now()) {
            warn!(user_id = %revoked.user_id, "刷新令牌已过期");
            return Err(DomainError::InvalidToken.into());
        }

        let user = self
            .deps
            .user_repository
            .find_by_id(revoked.user_id)
            .await?
            .ok_or(DomainError::InvalidToken)?;

        let tokens = self.issue_tokens(&user).await?;
        Ok(AuthSession { user, tokens })
    }

    /// 幂等：未知或已吊销的令牌不视为错误
    pub async fn logout(&self, raw_refresh_token: &str) -> Result<(), ApplicationError> {
        let digest = self
            .deps
            .token_service
            .digest_refresh_secret(raw_refresh_token.trim())?;
        if let Some(token) = self
            .deps
            .refresh_token_repository
            .revoke_active(digest)
            .await?
        {
            info!(user_id = %token.user_id, "用户登出");
        }
        Ok(())
    }

    pub fn verify_access_token(&self, token: &str) -> Result<AuthIdentity, ApplicationError> {
        self.deps
            .token_service
            .verify_access_token(token)
            .map_err(|err| {
                if err.is_client_error() {
                    ApplicationError::from(DomainError::InvalidToken)
                } else {
                    ApplicationError::from(err)
                }
            })
    }

    async fn issue_tokens(&self, user: &User) -> Result<TokenPair, ApplicationError> {
        let access_token = self.deps.token_service.issue_access_token(user)?;
        let refresh_token = self.deps.token_service.generate_refresh_secret();
        let digest = self.deps.token_service.digest_refresh_secret(&refresh_token)?;

        self.deps
            .refresh_token_repository
            .create(RefreshToken::issue(user.id, digest, self.deps.clock.now()))
            .await?;

        Ok(TokenPair {
            access_token,
            refresh_token,
            expires_in: self.deps.token_service.access_token_ttl_secs(),
        })
    }
}


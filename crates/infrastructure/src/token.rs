//! JWT 访问令牌与刷新令牌摘要

use application::{AuthIdentity, TokenError, TokenService};
use chrono::{Duration, Utc};
use config::JwtConfig;
use data_encoding::HEXLOWER;
use domain::{TokenDigest, User, UserId};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use rand::RngCore;
use ring::digest::{digest, SHA256};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 刷新令牌原文的随机字节数
const REFRESH_SECRET_BYTES: usize = 64;

/// JWT Claims 结构
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub email: String,
    pub username: String,
    pub iat: i64,
    pub exp: i64, // 过期时间 (Unix timestamp)
}

/// HS256 签名的访问令牌服务
#[derive(Clone)]
pub struct JwtTokenService {
    access_token_ttl: Duration,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtTokenService {
    pub fn new(config: &JwtConfig) -> Self {
        let encoding_key = EncodingKey::from_secret(config.secret.as_ref());
        let decoding_key = DecodingKey::from_secret(config.secret.as_ref());
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Self {
            access_token_ttl: Duration::minutes(config.access_token_minutes),
            encoding_key,
            decoding_key,
            validation,
        }
    }
}

impl TokenService for JwtTokenService {
    fn issue_access_token(&self, user: &User) -> Result<String, TokenError> {
        let now = Utc::now();
        let claims = Claims {
            sub: Uuid::from(user.id),
            email: user.email.to_string(),
            username: user.username.to_string(),
            iat: now.timestamp(),
            exp: (now + self.access_token_ttl).timestamp(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|err| TokenError::signing(err.to_string()))
    }

    fn verify_access_token(&self, token: &str) -> Result<AuthIdentity, TokenError> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation).map_err(|err| {
            match err.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Invalid,
            }
        })?;

        Ok(AuthIdentity {
            user_id: UserId::from(data.claims.sub),
            email: data.claims.email,
            username: data.claims.username,
        })
    }

    fn access_token_ttl_secs(&self) -> i64 {
        self.access_token_ttl.num_seconds()
    }

    fn generate_refresh_secret(&self) -> String {
        let mut bytes = [0u8; REFRESH_SECRET_BYTES];
        rand::rng().fill_bytes(&mut bytes);
        HEXLOWER.encode(&bytes)
    }

    fn digest_refresh_secret(&self, raw: &str) -> Result<TokenDigest, TokenError> {
        let hashed = digest(&SHA256, raw.as_bytes());
        TokenDigest::new(HEXLOWER.encode(hashed.as_ref()))
            .map_err(|err| TokenError::signing(err.to_string()))
    }
}

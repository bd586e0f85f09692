use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::DomainError;

/// 统一的时间戳类型。
pub type Timestamp = DateTime<Utc>;

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new(id: Uuid) -> Self {
                Self(id)
            }

            pub fn generate() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }

        impl From<$name> for Uuid {
            fn from(value: $name) -> Self {
                value.0
            }
        }
    };
}

define_id!(
    /// 用户唯一标识。
    UserId
);
define_id!(
    /// 聊天室唯一标识。
    RoomId
);
define_id!(
    /// 消息唯一标识。
    MessageId
);
define_id!(
    /// 通知唯一标识。
    NotificationId
);
define_id!(
    /// 刷新令牌记录标识。
    RefreshTokenId
);

/// 经过验证的用户名：3-20 位字母、数字或下划线。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Username(String);

impl Username {
    pub const MIN_LEN: usize = 3;
    pub const MAX_LEN: usize = 20;

    pub fn parse(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into().trim().to_owned();
        let len = value.chars().count();
        if len < Self::MIN_LEN {
            return Err(DomainError::invalid_argument("username", "too short"));
        }
        if len > Self::MAX_LEN {
            return Err(DomainError::invalid_argument("username", "too long"));
        }
        if !value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(DomainError::invalid_argument(
                "username",
                "can only contain letters, numbers and underscores",
            ));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Username {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 经过验证的邮箱，统一转为小写存储。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserEmail(String);

impl UserEmail {
    pub fn parse(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into().trim().to_lowercase();
        if value.is_empty() {
            return Err(DomainError::invalid_argument("email", "cannot be empty"));
        }
        match value.split_once('@') {
            Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(Self(value)),
            _ => Err(DomainError::invalid_argument("email", "must contain '@'")),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserEmail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 明文密码强度校验：至少 8 位，且同时包含大写、小写字母和数字。
pub fn validate_password_strength(plaintext: &str) -> Result<(), DomainError> {
    if plaintext.chars().count() < 8 {
        return Err(DomainError::invalid_argument(
            "password",
            "must be at least 8 characters",
        ));
    }
    let has_lower = plaintext.chars().any(|c| c.is_ascii_lowercase());
    let has_upper = plaintext.chars().any(|c| c.is_ascii_uppercase());
    let has_digit = plaintext.chars().any(|c| c.is_ascii_digit());
    if !(has_lower && has_upper && has_digit) {
        return Err(DomainError::invalid_argument(
            "password",
            "must contain uppercase, lowercase and a number",
        ));
    }
    Ok(())
}

/// 经过外部服务生成的密码哈希。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PasswordHash(String);

impl PasswordHash {
    pub fn new(value: impl Into<String>) -> Result<Self, DomainError> {
        let hash = value.into();
        if hash.trim().is_empty() {
            return Err(DomainError::invalid_argument(
                "password_hash",
                "cannot be empty",
            ));
        }
        Ok(Self(hash))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// 消息正文，非空白且不超过 4000 个字符。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageContent(String);

impl MessageContent {
    pub const MAX_LEN: usize = 4000;

    pub fn new(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(DomainError::invalid_argument("content", "cannot be empty"));
        }
        if value.chars().count() > Self::MAX_LEN {
            return Err(DomainError::invalid_argument("content", "too long"));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 刷新令牌的 SHA-256 十六进制摘要，原始令牌从不落库。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TokenDigest(String);

impl TokenDigest {
    pub fn new(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into();
        if value.len() != 64 || !value.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(DomainError::invalid_argument(
                "token_digest",
                "must be a 64 character hex string",
            ));
        }
        Ok(Self(value.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn username_rules() {
        assert!(Username::parse("alice_01").is_ok());
        assert!(Username::parse("al").is_err());
        assert!(Username::parse("a".repeat(21)).is_err());
        assert!(Username::parse("bad-name").is_err());
    }

    #[test]
    fn email_is_normalized() {
        let email = UserEmail::parse("  Alice@Example.COM ").unwrap();
        assert_eq!(email.as_str(), "alice@example.com");
        assert!(UserEmail::parse("no-at-sign").is_err());
        assert!(UserEmail::parse("@example.com").is_err());
    }

    #[test]
    fn password_strength() {
        assert!(validate_password_strength("Passw0rd").is_ok());
        assert!(validate_password_strength("Pa0").is_err());
        assert!(validate_password_strength("password1").is_err());
        assert!(validate_password_strength("PASSWORD1").is_err());
        assert!(validate_password_strength("Password").is_err());
    }

    #[test]
    fn message_content_bounds() {
        assert!(MessageContent::new("hello").is_ok());
        assert!(MessageContent::new("   \n").is_err());
        assert!(MessageContent::new("x".repeat(MessageContent::MAX_LEN)).is_ok());
        assert!(MessageContent::new("x".repeat(MessageContent::MAX_LEN + 1)).is_err());
    }

    #[test]
    fn ids_serialize_as_plain_uuid() {
        let id = Uuid::new_v4();
        let json = serde_json::to_string(&RoomId::from(id)).unwrap();
        assert_eq!(json, format!("\"{id}\""));
    }
}

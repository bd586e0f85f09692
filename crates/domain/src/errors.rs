//! 领域模型错误定义
//!
//! 每个领域错误都归属于一个 [`ErrorKind`]，上层据此决定对外暴露的状态码。

use thiserror::Error;

/// 错误分类，与对外协议的状态一一对应。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    Conflict,
    Internal,
}

/// 领域模型错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid {field}: {reason}")]
    InvalidArgument { field: String, reason: String },

    #[error("email already registered")]
    EmailAlreadyExists,

    #[error("username already taken")]
    UsernameAlreadyExists,

    /// 登录失败时统一返回，避免暴露账号是否存在
    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("invalid or expired token")]
    InvalidToken,

    #[error("user not found")]
    UserNotFound,

    #[error("room not found")]
    RoomNotFound,

    #[error("message not found")]
    MessageNotFound,

    #[error("notification not found")]
    NotificationNotFound,

    /// 离开房间时成员关系不存在
    #[error("membership not found")]
    MembershipNotFound,

    #[error("user is not a member of this room")]
    NotRoomMember,

    #[error("user already joined room")]
    AlreadyRoomMember,

    #[error("room cannot be joined directly")]
    RoomNotJoinable,

    #[error("insufficient permissions")]
    InsufficientPermissions,

    #[error("message has been deleted")]
    MessageDeleted,

    #[error("only the sender can modify this message")]
    NotMessageSender,

    #[error("invalid cursor")]
    InvalidCursor,
}

impl DomainError {
    pub fn invalid_argument(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument { .. } | Self::InvalidCursor => ErrorKind::BadRequest,
            Self::EmailAlreadyExists | Self::UsernameAlreadyExists | Self::AlreadyRoomMember => {
                ErrorKind::Conflict
            }
            Self::InvalidCredentials | Self::InvalidToken => ErrorKind::Unauthorized,
            Self::UserNotFound
            | Self::RoomNotFound
            | Self::MessageNotFound
            | Self::NotificationNotFound
            | Self::MembershipNotFound => ErrorKind::NotFound,
            Self::NotRoomMember
            | Self::RoomNotJoinable
            | Self::InsufficientPermissions
            | Self::MessageDeleted
            | Self::NotMessageSender => ErrorKind::Forbidden,
        }
    }

    /// 对外协议中的稳定错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidArgument { .. } => "INVALID_ARGUMENT",
            Self::EmailAlreadyExists => "EMAIL_EXISTS",
            Self::UsernameAlreadyExists => "USERNAME_EXISTS",
            Self::InvalidCredentials => "INVALID_CREDENTIALS",
            Self::InvalidToken => "INVALID_TOKEN",
            Self::UserNotFound => "USER_NOT_FOUND",
            Self::RoomNotFound => "ROOM_NOT_FOUND",
            Self::MessageNotFound => "MESSAGE_NOT_FOUND",
            Self::NotificationNotFound => "NOTIFICATION_NOT_FOUND",
            Self::MembershipNotFound => "MEMBERSHIP_NOT_FOUND",
            Self::NotRoomMember => "NOT_ROOM_MEMBER",
            Self::AlreadyRoomMember => "MEMBERSHIP_EXISTS",
            Self::RoomNotJoinable => "ROOM_NOT_JOINABLE",
            Self::InsufficientPermissions => "INSUFFICIENT_PERMISSIONS",
            Self::MessageDeleted => "MESSAGE_DELETED",
            Self::NotMessageSender => "NOT_MESSAGE_SENDER",
            Self::InvalidCursor => "INVALID_CURSOR",
        }
    }
}

/// 仓储层错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("record not found")]
    NotFound,
    #[error("unique constraint violated: {constraint}")]
    Conflict { constraint: String },
    #[error("storage failure: {message}")]
    Storage { message: String },
}

impl RepositoryError {
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    pub fn conflict(constraint: impl Into<String>) -> Self {
        Self::Conflict {
            constraint: constraint.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound => ErrorKind::NotFound,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::Storage { .. } => ErrorKind::Internal,
        }
    }
}

/// 领域模型结果类型
pub type DomainResult<T> = Result<T, DomainError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_domain_error_maps_to_non_internal_kind() {
        let errors = [
            DomainError::invalid_argument("email", "bad"),
            DomainError::EmailAlreadyExists,
            DomainError::InvalidCredentials,
            DomainError::RoomNotFound,
            DomainError::NotRoomMember,
            DomainError::InvalidCursor,
        ];
        for err in errors {
            assert_ne!(err.kind(), ErrorKind::Internal, "{err}");
        }
    }

    #[test]
    fn storage_failures_are_internal() {
        assert_eq!(
            RepositoryError::storage("connection reset").kind(),
            ErrorKind::Internal
        );
        assert_eq!(
            RepositoryError::conflict("users_email_key").kind(),
            ErrorKind::Conflict
        );
    }
}

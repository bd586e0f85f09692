//! 聊天室系统核心领域模型
//!
//! 包含用户、聊天室、成员关系、消息、通知与刷新令牌等实体，
//! 以及仓储契约和领域错误。

pub mod chat_room;
pub mod errors;
pub mod message;
pub mod notification;
pub mod refresh_token;
pub mod repository;
pub mod room_member;
pub mod user;
pub mod value_objects;

pub use chat_room::{dm_key, Room, RoomType};
pub use errors::{DomainError, DomainResult, ErrorKind, RepositoryError};
pub use message::{Message, MessageRead, MessageType};
pub use notification::{NewNotification, Notification, NotificationType};
pub use refresh_token::{RefreshToken, REFRESH_TOKEN_TTL_DAYS};
pub use repository::{
    MessageCursor, MessageRepository, NotificationRepository, RefreshTokenRepository,
    RepositoryResult, RoomRepository, UserRepository,
};
#[cfg(feature = "testing")]
pub use repository::{
    MockMessageRepository, MockNotificationRepository, MockRefreshTokenRepository,
    MockRoomRepository, MockUserRepository,
};
pub use room_member::{choose_successor, RoomMember, RoomRole};
pub use user::{PresenceStatus, User, UserUpdate};
pub use value_objects::{
    validate_password_strength, MessageContent, MessageId, NotificationId, PasswordHash,
    RefreshTokenId, RoomId, Timestamp, TokenDigest, UserEmail, UserId, Username,
};

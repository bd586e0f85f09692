//! 应用层实现。
//!
//! 这里提供围绕领域模型的用例服务，处理输入校验、权限判断，
//! 以及对外部适配器（密码哈希、令牌签发、实时推送、后台任务）的抽象。

pub mod broadcaster;
pub mod clock;
pub mod error;
pub mod jobs;
pub mod password;
pub mod services;
pub mod token;

pub use broadcaster::{
    BroadcastError, EventBroadcaster, MessageDeletedPayload, PresencePayload,
    RoomMembershipPayload, ServerEvent, TypingPayload,
};
pub use clock::{Clock, SystemClock};
pub use error::ApplicationError;
pub use jobs::{Backoff, JobOptions, JobRequest, QueueError, TaskQueue};
pub use password::{PasswordHasher, PasswordHasherError};
pub use services::{
    AuthService, MessageService, NotificationService, RoomService, UserService,
};
pub use token::{AuthIdentity, TokenError, TokenPair, TokenService};

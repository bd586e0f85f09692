//! 仓储接口定义
//!
//! 领域层只定义契约，PostgreSQL 与内存实现位于 infrastructure。
//! 所有实现都必须保证唯一约束（邮箱、用户名、成员关系、已读回执、私聊键）
//! 以及删除用户/房间时的级联语义。

use async_trait::async_trait;

use crate::chat_room::Room;
use crate::errors::RepositoryError;
use crate::message::{Message, MessageRead};
use crate::notification::{NewNotification, Notification};
use crate::refresh_token::RefreshToken;
use crate::room_member::{RoomMember, RoomRole};
use crate::user::{User, UserUpdate};
use crate::value_objects::{
    MessageId, NotificationId, RoomId, Timestamp, TokenDigest, UserEmail, UserId, Username,
};

pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// 游标分页的边界：严格早于该时间点（同一时间点再按 id 排序）。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageCursor {
    pub created_at: Timestamp,
    pub id: MessageId,
}

impl From<&Message> for MessageCursor {
    fn from(message: &Message) -> Self {
        Self {
            created_at: message.created_at,
            id: message.id,
        }
    }
}

#[cfg_attr(feature = "testing", mockall::automock)]
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// 邮箱或用户名冲突时返回 [`RepositoryError::Conflict`]
    async fn create(&self, user: User) -> RepositoryResult<User>;
    async fn find_by_id(&self, id: UserId) -> RepositoryResult<Option<User>>;
    async fn find_by_email(&self, email: UserEmail) -> RepositoryResult<Option<User>>;
    async fn find_by_username(&self, username: Username) -> RepositoryResult<Option<User>>;
    /// 部分更新；用户不存在时返回 [`RepositoryError::NotFound`]
    async fn update(
        &self,
        id: UserId,
        changes: UserUpdate,
        at: Timestamp,
    ) -> RepositoryResult<User>;
}

#[cfg_attr(feature = "testing", mockall::automock)]
#[async_trait]
pub trait RoomRepository: Send + Sync {
    /// 房间与房主成员关系在同一事务内写入
    async fn create_with_owner(&self, room: Room, owner: RoomMember) -> RepositoryResult<Room>;
    /// 按无序成员对查找或创建私聊房间，并发调用也只会产生一个房间。
    /// 房间已存在时，`members` 中已离开的一方以普通成员身份重新加入。
    /// 返回值第二项表示本次是否新建房间或补回了成员。
    async fn find_or_create_dm(
        &self,
        room: Room,
        members: Vec<RoomMember>,
    ) -> RepositoryResult<(Room, bool)>;
    async fn find_by_id(&self, id: RoomId) -> RepositoryResult<Option<Room>>;
    async fn find_public_rooms(&self) -> RepositoryResult<Vec<Room>>;
    /// 与参数顺序无关；只返回双方都仍是成员的私聊房间
    async fn find_dm_room(&self, a: UserId, b: UserId) -> RepositoryResult<Option<Room>>;
    /// 已是成员时返回 [`RepositoryError::Conflict`]
    async fn add_member(&self, member: RoomMember) -> RepositoryResult<RoomMember>;
    async fn remove_member(&self, room_id: RoomId, user_id: UserId) -> RepositoryResult<()>;
    async fn find_member(
        &self,
        room_id: RoomId,
        user_id: UserId,
    ) -> RepositoryResult<Option<RoomMember>>;
    /// 按加入时间升序
    async fn find_members(&self, room_id: RoomId) -> RepositoryResult<Vec<RoomMember>>;
    async fn find_memberships(&self, user_id: UserId) -> RepositoryResult<Vec<RoomMember>>;
    async fn update_member_role(
        &self,
        room_id: RoomId,
        user_id: UserId,
        role: RoomRole,
    ) -> RepositoryResult<()>;
    /// 级联删除成员、消息与已读回执
    async fn delete_room(&self, room_id: RoomId) -> RepositoryResult<()>;
}

#[cfg_attr(feature = "testing", mockall::automock)]
#[async_trait]
pub trait MessageRepository: Send + Sync {
    async fn create(&self, message: Message) -> RepositoryResult<Message>;
    async fn find_by_id(&self, id: MessageId) -> RepositoryResult<Option<Message>>;
    /// 按创建时间倒序返回，`before` 为排他上界
    async fn find_by_room(
        &self,
        room_id: RoomId,
        limit: u32,
        before: Option<MessageCursor>,
    ) -> RepositoryResult<Vec<Message>>;
    /// 覆盖写入内容、编辑与删除标记
    async fn update(&self, message: Message) -> RepositoryResult<Message>;
    /// 幂等：已存在时返回原有记录
    async fn mark_as_read(
        &self,
        message_id: MessageId,
        user_id: UserId,
        at: Timestamp,
    ) -> RepositoryResult<MessageRead>;
    async fn find_read(
        &self,
        message_id: MessageId,
        user_id: UserId,
    ) -> RepositoryResult<Option<MessageRead>>;
}

#[cfg_attr(feature = "testing", mockall::automock)]
#[async_trait]
pub trait NotificationRepository: Send + Sync {
    async fn create(
        &self,
        input: NewNotification,
        at: Timestamp,
    ) -> RepositoryResult<Notification>;
    async fn find_by_id(&self, id: NotificationId) -> RepositoryResult<Option<Notification>>;
    /// 按创建时间倒序
    async fn find_by_user(&self, user_id: UserId) -> RepositoryResult<Vec<Notification>>;
    async fn mark_as_read(&self, id: NotificationId) -> RepositoryResult<Notification>;
    async fn mark_all_as_read(&self, user_id: UserId) -> RepositoryResult<u64>;
}

#[cfg_attr(feature = "testing", mockall::automock)]
#[async_trait]
pub trait RefreshTokenRepository: Send + Sync {
    async fn create(&self, token: RefreshToken) -> RepositoryResult<RefreshToken>;
    /// 原子地吊销一条未吊销的记录并返回它；并发调用中只有一个能拿到结果。
    async fn revoke_active(&self, digest: TokenDigest) -> RepositoryResult<Option<RefreshToken>>;
}

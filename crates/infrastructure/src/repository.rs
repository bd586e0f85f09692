use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{
    dm_key, Message, MessageContent, MessageCursor, MessageId, MessageRead, MessageRepository,
    MessageType, NewNotification, Notification, NotificationId, NotificationRepository,
    NotificationType, PresenceStatus, RefreshToken, RefreshTokenId, RefreshTokenRepository,
    RepositoryError, RepositoryResult, Room, RoomId, RoomMember, RoomRepository, RoomRole,
    RoomType, Timestamp, TokenDigest, User, UserEmail, UserId, UserRepository, UserUpdate,
    Username,
};
use serde_json::Value as JsonValue;
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool};
use uuid::Uuid;

/// 唯一约束冲突映射为 [`RepositoryError::Conflict`]，并带上约束名
fn map_sqlx_err(err: sqlx::Error) -> RepositoryError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            return RepositoryError::conflict(db_err.constraint().unwrap_or("unique"));
        }
    }
    RepositoryError::storage(err.to_string())
}

fn invalid_data(message: impl Into<String>) -> RepositoryError {
    RepositoryError::storage(message)
}

const USER_COLUMNS: &str =
    "id, email, username, password_hash, avatar_url, status, created_at, updated_at";
const ROOM_COLUMNS: &str =
    "id, name, description, room_type, created_by, dm_key, created_at, updated_at";
const MESSAGE_COLUMNS: &str =
    "id, room_id, sender_id, content, message_type, is_edited, is_deleted, created_at, updated_at";
const NOTIFICATION_COLUMNS: &str =
    "id, user_id, notification_type, title, body, metadata, is_read, created_at";

#[derive(Debug, FromRow)]
struct UserRecord {
    id: Uuid,
    email: String,
    username: String,
    password_hash: String,
    avatar_url: Option<String>,
    status: PresenceStatus,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<UserRecord> for User {
    type Error = RepositoryError;

    fn try_from(value: UserRecord) -> Result<Self, Self::Error> {
        let username = Username::parse(value.username).map_err(|err| invalid_data(err.to_string()))?;
        let email = UserEmail::parse(value.email).map_err(|err| invalid_data(err.to_string()))?;
        let password = domain::PasswordHash::new(value.password_hash)
            .map_err(|err| invalid_data(err.to_string()))?;

        Ok(User {
            id: UserId::from(value.id),
            email,
            username,
            password,
            avatar_url: value.avatar_url,
            status: value.status,
            created_at: value.created_at,
            updated_at: value.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct RoomRecord {
    id: Uuid,
    name: Option<String>,
    description: Option<String>,
    room_type: RoomType,
    created_by: Uuid,
    dm_key: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<RoomRecord> for Room {
    fn from(value: RoomRecord) -> Self {
        Room {
            id: RoomId::from(value.id),
            name: value.name,
            description: value.description,
            room_type: value.room_type,
            created_by: UserId::from(value.created_by),
            dm_key: value.dm_key,
            created_at: value.created_at,
            updated_at: value.updated_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct MemberRecord {
    room_id: Uuid,
    user_id: Uuid,
    role: RoomRole,
    joined_at: DateTime<Utc>,
}

impl From<MemberRecord> for RoomMember {
    fn from(value: MemberRecord) -> Self {
        RoomMember::new(
            RoomId::from(value.room_id),
            UserId::from(value.user_id),
            value.role,
            value.joined_at,
        )
    }
}

#[derive(Debug, FromRow)]
struct MessageRecord {
    id: Uuid,
    room_id: Uuid,
    sender_id: Uuid,
    content: String,
    message_type: MessageType,
    is_edited: bool,
    is_deleted: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<MessageRecord> for Message {
    type Error = RepositoryError;

    fn try_from(value: MessageRecord) -> Result<Self, Self::Error> {
        let content =
            MessageContent::new(value.content).map_err(|err| invalid_data(err.to_string()))?;
        Ok(Message {
            id: MessageId::from(value.id),
            room_id: RoomId::from(value.room_id),
            sender_id: UserId::from(value.sender_id),
            content,
            message_type: value.message_type,
            is_edited: value.is_edited,
            is_deleted: value.is_deleted,
            created_at: value.created_at,
            updated_at: value.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct ReadRecord {
    message_id: Uuid,
    user_id: Uuid,
    read_at: DateTime<Utc>,
}

impl From<ReadRecord> for MessageRead {
    fn from(value: ReadRecord) -> Self {
        MessageRead {
            message_id: MessageId::from(value.message_id),
            user_id: UserId::from(value.user_id),
            read_at: value.read_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct NotificationRecord {
    id: Uuid,
    user_id: Uuid,
    notification_type: NotificationType,
    title: String,
    body: String,
    metadata: JsonValue,
    is_read: bool,
    created_at: DateTime<Utc>,
}

impl From<NotificationRecord> for Notification {
    fn from(value: NotificationRecord) -> Self {
        Notification {
            id: NotificationId::from(value.id),
            user_id: UserId::from(value.user_id),
            notification_type: value.notification_type,
            title: value.title,
            body: value.body,
            metadata: value.metadata,
            is_read: value.is_read,
            created_at: value.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct RefreshTokenRecord {
    id: Uuid,
    user_id: Uuid,
    token_hash: String,
    expires_at: DateTime<Utc>,
    revoked: bool,
    created_at: DateTime<Utc>,
}

impl TryFrom<RefreshTokenRecord> for RefreshToken {
    type Error = RepositoryError;

    fn try_from(value: RefreshTokenRecord) -> Result<Self, Self::Error> {
        let token_digest =
            TokenDigest::new(value.token_hash).map_err(|err| invalid_data(err.to_string()))?;
        Ok(RefreshToken {
            id: RefreshTokenId::from(value.id),
            user_id: UserId::from(value.user_id),
            token_digest,
            expires_at: value.expires_at,
            revoked: value.revoked,
            created_at: value.created_at,
        })
    }
}

#[derive(Clone)]
pub struct PgUserRepository {
    pool: PgPool,
}

impl PgUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn find_one(&self, column: &str, value: &str) -> RepositoryResult<Option<User>> {
        let record = sqlx::query_as::<_, UserRecord>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE {column} = $1"
        ))
        .bind(value)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        record.map(User::try_from).transpose()
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn create(&self, user: User) -> RepositoryResult<User> {
        let record = sqlx::query_as::<_, UserRecord>(&format!(
            r#"
            INSERT INTO users (id, email, username, password_hash, avatar_url, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(Uuid::from(user.id))
        .bind(user.email.as_str())
        .bind(user.username.as_str())
        .bind(user.password.as_str())
        .bind(user.avatar_url.as_deref())
        .bind(user.status)
        .bind(user.created_at)
        .bind(user.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        User::try_from(record)
    }

    async fn find_by_id(&self, id: UserId) -> RepositoryResult<Option<User>> {
        let record = sqlx::query_as::<_, UserRecord>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(Uuid::from(id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        record.map(User::try_from).transpose()
    }

    async fn find_by_email(&self, email: UserEmail) -> RepositoryResult<Option<User>> {
        self.find_one("email", email.as_str()).await
    }

    async fn find_by_username(&self, username: Username) -> RepositoryResult<Option<User>> {
        self.find_one("username", username.as_str()).await
    }

    async fn update(
        &self,
        id: UserId,
        changes: UserUpdate,
        at: Timestamp,
    ) -> RepositoryResult<User> {
        let (clear_or_set_avatar, avatar_url) = match changes.avatar_url {
            Some(value) => (true, value),
            None => (false, None),
        };
        let record = sqlx::query_as::<_, UserRecord>(&format!(
            r#"
            UPDATE users SET
                username = COALESCE($2, username),
                avatar_url = CASE WHEN $3 THEN $4 ELSE avatar_url END,
                status = COALESCE($5, status),
                updated_at = $6
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(Uuid::from(id))
        .bind(changes.username.as_ref().map(|name| name.as_str()))
        .bind(clear_or_set_avatar)
        .bind(avatar_url)
        .bind(changes.status)
        .bind(at)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?
        .ok_or(RepositoryError::NotFound)?;

        User::try_from(record)
    }
}

#[derive(Clone)]
pub struct PgRoomRepository {
    pool: PgPool,
}

impl PgRoomRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

async fn insert_member<'c, E>(executor: E, member: &RoomMember) -> RepositoryResult<RoomMember>
where
    E: sqlx::PgExecutor<'c>,
{
    let record = sqlx::query_as::<_, MemberRecord>(
        r#"
        INSERT INTO room_members (room_id, user_id, role, joined_at)
        VALUES ($1, $2, $3, $4)
        RETURNING room_id, user_id, role, joined_at
        "#,
    )
    .bind(Uuid::from(member.room_id))
    .bind(Uuid::from(member.user_id))
    .bind(member.role)
    .bind(member.joined_at)
    .fetch_one(executor)
    .await
    .map_err(map_sqlx_err)?;
    Ok(record.into())
}

#[async_trait]
impl RoomRepository for PgRoomRepository {
    async fn create_with_owner(&self, room: Room, owner: RoomMember) -> RepositoryResult<Room> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;

        let record = sqlx::query_as::<_, RoomRecord>(&format!(
            r#"
            INSERT INTO rooms (id, name, description, room_type, created_by, dm_key, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {ROOM_COLUMNS}
            "#
        ))
        .bind(Uuid::from(room.id))
        .bind(room.name.as_deref())
        .bind(room.description.as_deref())
        .bind(room.room_type)
        .bind(Uuid::from(room.created_by))
        .bind(room.dm_key.as_deref())
        .bind(room.created_at)
        .bind(room.updated_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;
        insert_member(&mut *tx, &owner).await?;

        tx.commit().await.map_err(map_sqlx_err)?;
        Ok(record.into())
    }

    async fn find_or_create_dm(
        &self,
        room: Room,
        members: Vec<RoomMember>,
    ) -> RepositoryResult<(Room, bool)> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;

        // 并发插入时后到者等待先到者提交，随后读取已存在的房间
        let inserted = sqlx::query_as::<_, RoomRecord>(&format!(
            r#"
            INSERT INTO rooms (id, name, description, room_type, created_by, dm_key, created_at, updated_at)
            VALUES ($1, NULL, NULL, $2, $3, $4, $5, $6)
            ON CONFLICT (dm_key) DO NOTHING
            RETURNING {ROOM_COLUMNS}
            "#
        ))
        .bind(Uuid::from(room.id))
        .bind(room.room_type)
        .bind(Uuid::from(room.created_by))
        .bind(room.dm_key.as_deref())
        .bind(room.created_at)
        .bind(room.updated_at)
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        if let Some(record) = inserted {
            for member in &members {
                insert_member(&mut *tx, member).await?;
            }
            tx.commit().await.map_err(map_sqlx_err)?;
            return Ok((record.into(), true));
        }

        let existing = sqlx::query_as::<_, RoomRecord>(&format!(
            "SELECT {ROOM_COLUMNS} FROM rooms WHERE dm_key = $1 FOR UPDATE"
        ))
        .bind(room.dm_key.as_deref())
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        // 已离开的一方重新作为普通成员加入
        let mut restored = false;
        for member in &members {
            let result = sqlx::query(
                r#"
                INSERT INTO room_members (room_id, user_id, role, joined_at)
                VALUES ($1, $2, 'member', $3)
                ON CONFLICT (room_id, user_id) DO NOTHING
                "#,
            )
            .bind(existing.id)
            .bind(Uuid::from(member.user_id))
            .bind(member.joined_at)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_err)?;
            restored |= result.rows_affected() > 0;
        }
        tx.commit().await.map_err(map_sqlx_err)?;
        Ok((existing.into(), restored))
    }

    async fn find_by_id(&self, id: RoomId) -> RepositoryResult<Option<Room>> {
        let record = sqlx::query_as::<_, RoomRecord>(&format!(
            "SELECT {ROOM_COLUMNS} FROM rooms WHERE id = $1"
        ))
        .bind(Uuid::from(id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(record.map(Room::from))
    }

    async fn find_public_rooms(&self) -> RepositoryResult<Vec<Room>> {
        let records = sqlx::query_as::<_, RoomRecord>(&format!(
            "SELECT {ROOM_COLUMNS} FROM rooms WHERE room_type = 'public' ORDER BY created_at DESC"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(records.into_iter().map(Room::from).collect())
    }

    async fn find_dm_room(&self, a: UserId, b: UserId) -> RepositoryResult<Option<Room>> {
        let record = sqlx::query_as::<_, RoomRecord>(&format!(
            r#"
            SELECT {ROOM_COLUMNS} FROM rooms
            WHERE dm_key = $1
              AND EXISTS (SELECT 1 FROM room_members WHERE room_id = rooms.id AND user_id = $2)
              AND EXISTS (SELECT 1 FROM room_members WHERE room_id = rooms.id AND user_id = $3)
            "#
        ))
        .bind(dm_key(a, b))
        .bind(Uuid::from(a))
        .bind(Uuid::from(b))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(record.map(Room::from))
    }

    async fn add_member(&self, member: RoomMember) -> RepositoryResult<RoomMember> {
        insert_member(&self.pool, &member).await
    }

    async fn remove_member(&self, room_id: RoomId, user_id: UserId) -> RepositoryResult<()> {
        let result = sqlx::query("DELETE FROM room_members WHERE room_id = $1 AND user_id = $2")
            .bind(Uuid::from(room_id))
            .bind(Uuid::from(user_id))
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn find_member(
        &self,
        room_id: RoomId,
        user_id: UserId,
    ) -> RepositoryResult<Option<RoomMember>> {
        let record = sqlx::query_as::<_, MemberRecord>(
            r#"SELECT room_id, user_id, role, joined_at
            FROM room_members WHERE room_id = $1 AND user_id = $2"#,
        )
        .bind(Uuid::from(room_id))
        .bind(Uuid::from(user_id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(record.map(RoomMember::from))
    }

    async fn find_members(&self, room_id: RoomId) -> RepositoryResult<Vec<RoomMember>> {
        let records = sqlx::query_as::<_, MemberRecord>(
            r#"SELECT room_id, user_id, role, joined_at
            FROM room_members WHERE room_id = $1
            ORDER BY joined_at ASC, user_id ASC"#,
        )
        .bind(Uuid::from(room_id))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(records.into_iter().map(RoomMember::from).collect())
    }

    async fn find_memberships(&self, user_id: UserId) -> RepositoryResult<Vec<RoomMember>> {
        let records = sqlx::query_as::<_, MemberRecord>(
            r#"SELECT room_id, user_id, role, joined_at
            FROM room_members WHERE user_id = $1
            ORDER BY joined_at ASC"#,
        )
        .bind(Uuid::from(user_id))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(records.into_iter().map(RoomMember::from).collect())
    }

    async fn update_member_role(
        &self,
        room_id: RoomId,
        user_id: UserId,
        role: RoomRole,
    ) -> RepositoryResult<()> {
        let result =
            sqlx::query("UPDATE room_members SET role = $3 WHERE room_id = $1 AND user_id = $2")
                .bind(Uuid::from(room_id))
                .bind(Uuid::from(user_id))
                .bind(role)
                .execute(&self.pool)
                .await
                .map_err(map_sqlx_err)?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn delete_room(&self, room_id: RoomId) -> RepositoryResult<()> {
        // 成员、消息与已读回执由外键级联删除
        let result = sqlx::query("DELETE FROM rooms WHERE id = $1")
            .bind(Uuid::from(room_id))
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct PgMessageRepository {
    pool: PgPool,
}

impl PgMessageRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageRepository for PgMessageRepository {
    async fn create(&self, message: Message) -> RepositoryResult<Message> {
        let record = sqlx::query_as::<_, MessageRecord>(&format!(
            r#"
            INSERT INTO messages (id, room_id, sender_id, content, message_type, is_edited, is_deleted, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {MESSAGE_COLUMNS}
            "#
        ))
        .bind(Uuid::from(message.id))
        .bind(Uuid::from(message.room_id))
        .bind(Uuid::from(message.sender_id))
        .bind(message.content.as_str())
        .bind(message.message_type)
        .bind(message.is_edited)
        .bind(message.is_deleted)
        .bind(message.created_at)
        .bind(message.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Message::try_from(record)
    }

    async fn find_by_id(&self, id: MessageId) -> RepositoryResult<Option<Message>> {
        let record = sqlx::query_as::<_, MessageRecord>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = $1"
        ))
        .bind(Uuid::from(id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        record.map(Message::try_from).transpose()
    }

    async fn find_by_room(
        &self,
        room_id: RoomId,
        limit: u32,
        before: Option<MessageCursor>,
    ) -> RepositoryResult<Vec<Message>> {
        let records = sqlx::query_as::<_, MessageRecord>(&format!(
            r#"
            SELECT {MESSAGE_COLUMNS}
            FROM messages
            WHERE room_id = $1
              AND ($2::timestamptz IS NULL OR (created_at, id) < ($2, $3))
            ORDER BY created_at DESC, id DESC
            LIMIT $4
            "#
        ))
        .bind(Uuid::from(room_id))
        .bind(before.as_ref().map(|cursor| cursor.created_at))
        .bind(before.as_ref().map(|cursor| Uuid::from(cursor.id)))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        records.into_iter().map(Message::try_from).collect()
    }

    async fn update(&self, message: Message) -> RepositoryResult<Message> {
        let record = sqlx::query_as::<_, MessageRecord>(&format!(
            r#"
            UPDATE messages
            SET content = $2, is_edited = $3, is_deleted = $4, updated_at = $5
            WHERE id = $1
            RETURNING {MESSAGE_COLUMNS}
            "#
        ))
        .bind(Uuid::from(message.id))
        .bind(message.content.as_str())
        .bind(message.is_edited)
        .bind(message.is_deleted)
        .bind(message.updated_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?
        .ok_or(RepositoryError::NotFound)?;

        Message::try_from(record)
    }

    async fn mark_as_read(
        &self,
        message_id: MessageId,
        user_id: UserId,
        at: Timestamp,
    ) -> RepositoryResult<MessageRead> {
        // 冲突时保留首次已读时间
        let record = sqlx::query_as::<_, ReadRecord>(
            r#"
            INSERT INTO message_reads (message_id, user_id, read_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (message_id, user_id) DO UPDATE SET read_at = message_reads.read_at
            RETURNING message_id, user_id, read_at
            "#,
        )
        .bind(Uuid::from(message_id))
        .bind(Uuid::from(user_id))
        .bind(at)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(record.into())
    }

    async fn find_read(
        &self,
        message_id: MessageId,
        user_id: UserId,
    ) -> RepositoryResult<Option<MessageRead>> {
        let record = sqlx::query_as::<_, ReadRecord>(
            r#"SELECT message_id, user_id, read_at
            FROM message_reads WHERE message_id = $1 AND user_id = $2"#,
        )
        .bind(Uuid::from(message_id))
        .bind(Uuid::from(user_id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(record.map(MessageRead::from))
    }
}

#[derive(Clone)]
pub struct PgNotificationRepository {
    pool: PgPool,
}

impl PgNotificationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NotificationRepository for PgNotificationRepository {
    async fn create(&self, input: NewNotification, at: Timestamp) -> RepositoryResult<Notification> {
        let notification = Notification::from_new(NotificationId::generate(), input, at);
        let record = sqlx::query_as::<_, NotificationRecord>(&format!(
            r#"
            INSERT INTO notifications (id, user_id, notification_type, title, body, metadata, is_read, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {NOTIFICATION_COLUMNS}
            "#
        ))
        .bind(Uuid::from(notification.id))
        .bind(Uuid::from(notification.user_id))
        .bind(notification.notification_type)
        .bind(&notification.title)
        .bind(&notification.body)
        .bind(&notification.metadata)
        .bind(notification.is_read)
        .bind(notification.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(record.into())
    }

    async fn find_by_id(&self, id: NotificationId) -> RepositoryResult<Option<Notification>> {
        let record = sqlx::query_as::<_, NotificationRecord>(&format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE id = $1"
        ))
        .bind(Uuid::from(id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(record.map(Notification::from))
    }

    async fn find_by_user(&self, user_id: UserId) -> RepositoryResult<Vec<Notification>> {
        let records = sqlx::query_as::<_, NotificationRecord>(&format!(
            r#"SELECT {NOTIFICATION_COLUMNS} FROM notifications
            WHERE user_id = $1
            ORDER BY created_at DESC, id DESC"#
        ))
        .bind(Uuid::from(user_id))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(records.into_iter().map(Notification::from).collect())
    }

    async fn mark_as_read(&self, id: NotificationId) -> RepositoryResult<Notification> {
        let record = sqlx::query_as::<_, NotificationRecord>(&format!(
            "UPDATE notifications SET is_read = TRUE WHERE id = $1 RETURNING {NOTIFICATION_COLUMNS}"
        ))
        .bind(Uuid::from(id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?
        .ok_or(RepositoryError::NotFound)?;
        Ok(record.into())
    }

    async fn mark_all_as_read(&self, user_id: UserId) -> RepositoryResult<u64> {
        let result = sqlx::query(
            "UPDATE notifications SET is_read = TRUE WHERE user_id = $1 AND is_read = FALSE",
        )
        .bind(Uuid::from(user_id))
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(result.rows_affected())
    }
}

#[derive(Clone)]
pub struct PgRefreshTokenRepository {
    pool: PgPool,
}

impl PgRefreshTokenRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RefreshTokenRepository for PgRefreshTokenRepository {
    async fn create(&self, token: RefreshToken) -> RepositoryResult<RefreshToken> {
        let record = sqlx::query_as::<_, RefreshTokenRecord>(
            r#"
            INSERT INTO refresh_tokens (id, user_id, token_hash, expires_at, revoked, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, user_id, token_hash, expires_at, revoked, created_at
            "#,
        )
        .bind(Uuid::from(token.id))
        .bind(Uuid::from(token.user_id))
        .bind(token.token_digest.as_str())
        .bind(token.expires_at)
        .bind(token.revoked)
        .bind(token.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        RefreshToken::try_from(record)
    }

    async fn revoke_active(&self, digest: TokenDigest) -> RepositoryResult<Option<RefreshToken>> {
        // 条件更新保证并发刷新只有一个请求拿到记录
        let record = sqlx::query_as::<_, RefreshTokenRecord>(
            r#"
            UPDATE refresh_tokens SET revoked = TRUE
            WHERE token_hash = $1 AND revoked = FALSE
            RETURNING id, user_id, token_hash, expires_at, revoked, created_at
            "#,
        )
        .bind(digest.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        record.map(RefreshToken::try_from).transpose()
    }
}

/// 所有 PostgreSQL 仓储的集合
#[derive(Clone)]
pub struct PgStorage {
    pub pool: PgPool,
    pub user_repository: Arc<PgUserRepository>,
    pub room_repository: Arc<PgRoomRepository>,
    pub message_repository: Arc<PgMessageRepository>,
    pub notification_repository: Arc<PgNotificationRepository>,
    pub refresh_token_repository: Arc<PgRefreshTokenRepository>,
}

impl PgStorage {
    pub fn new(pool: PgPool) -> Self {
        Self {
            user_repository: Arc::new(PgUserRepository::new(pool.clone())),
            room_repository: Arc::new(PgRoomRepository::new(pool.clone())),
            message_repository: Arc::new(PgMessageRepository::new(pool.clone())),
            notification_repository: Arc::new(PgNotificationRepository::new(pool.clone())),
            refresh_token_repository: Arc::new(PgRefreshTokenRepository::new(pool.clone())),
            pool,
        }
    }
}

pub async fn create_pg_pool(
    database_url: &str,
    max_connections: u32,
) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}

//! 进程内存储
//!
//! 与 PostgreSQL 实现遵守相同的唯一约束与级联语义，用于开发环境与集成测试。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use domain::{
    dm_key, Message, MessageCursor, MessageId, MessageRead, MessageRepository, NewNotification,
    Notification, NotificationId, NotificationRepository, RefreshToken, RefreshTokenRepository,
    RepositoryError, RepositoryResult, Room, RoomId, RoomMember, RoomRepository, RoomRole,
    RoomType, Timestamp, TokenDigest, User, UserEmail, UserId, UserRepository, UserUpdate,
    Username,
};
use tokio::sync::RwLock;

#[derive(Default)]
struct State {
    users: HashMap<UserId, User>,
    rooms: HashMap<RoomId, Room>,
    members: HashMap<(RoomId, UserId), RoomMember>,
    messages: HashMap<MessageId, Message>,
    reads: HashMap<(MessageId, UserId), MessageRead>,
    notifications: HashMap<NotificationId, Notification>,
    refresh_tokens: Vec<RefreshToken>,
}

impl State {
    fn email_taken(&self, email: &UserEmail, except: Option<UserId>) -> bool {
        self.users
            .values()
            .any(|user| &user.email == email && Some(user.id) != except)
    }

    fn username_taken(&self, username: &Username, except: Option<UserId>) -> bool {
        self.users
            .values()
            .any(|user| &user.username == username && Some(user.id) != except)
    }

    fn room_by_dm_key(&self, key: &str) -> Option<&Room> {
        self.rooms
            .values()
            .find(|room| room.dm_key.as_deref() == Some(key))
    }

    fn insert_member(&mut self, member: RoomMember) -> RepositoryResult<RoomMember> {
        let key = (member.room_id, member.user_id);
        if self.members.contains_key(&key) {
            return Err(RepositoryError::conflict("room_members_pkey"));
        }
        self.members.insert(key, member.clone());
        Ok(member)
    }
}

/// 单把锁保护全部表，每个仓储操作都是原子的
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserRepository for InMemoryStore {
    async fn create(&self, user: User) -> RepositoryResult<User> {
        let mut state = self.state.write().await;
        if state.email_taken(&user.email, None) {
            return Err(RepositoryError::conflict("users_email_key"));
        }
        if state.username_taken(&user.username, None) {
            return Err(RepositoryError::conflict("users_username_key"));
        }
        state.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn find_by_id(&self, id: UserId) -> RepositoryResult<Option<User>> {
        Ok(self.state.read().await.users.get(&id).cloned())
    }

    async fn find_by_email(&self, email: UserEmail) -> RepositoryResult<Option<User>> {
        let state = self.state.read().await;
        Ok(state.users.values().find(|user| user.email == email).cloned())
    }

    async fn find_by_username(&self, username: Username) -> RepositoryResult<Option<User>> {
        let state = self.state.read().await;
        Ok(state
            .users
            .values()
            .find(|user| user.username == username)
            .cloned())
    }

    async fn update(
        &self,
        id: UserId,
        changes: UserUpdate,
        at: Timestamp,
    ) -> RepositoryResult<User> {
        let mut state = self.state.write().await;
        if let Some(username) = &changes.username {
            if state.username_taken(username, Some(id)) {
                return Err(RepositoryError::conflict("users_username_key"));
            }
        }
        let user = state.users.get_mut(&id).ok_or(RepositoryError::NotFound)?;
        changes.apply_to(user, at);
        Ok(user.clone())
    }
}

#[async_trait]
impl RoomRepository for InMemoryStore {
    async fn create_with_owner(&self, room: Room, owner: RoomMember) -> RepositoryResult<Room> {
        let mut state = self.state.write().await;
        if state.rooms.contains_key(&room.id) {
            return Err(RepositoryError::conflict("rooms_pkey"));
        }
        state.rooms.insert(room.id, room.clone());
        state.insert_member(owner)?;
        Ok(room)
    }

    async fn find_or_create_dm(
        &self,
        room: Room,
        members: Vec<RoomMember>,
    ) -> RepositoryResult<(Room, bool)> {
        let key = room
            .dm_key
            .clone()
            .ok_or_else(|| RepositoryError::storage("direct message room without dm_key"))?;
        let mut state = self.state.write().await;
        if let Some(existing) = state.room_by_dm_key(&key).cloned() {
            // 已离开的一方重新作为普通成员加入
            let mut restored = false;
            for member in members {
                if !state.members.contains_key(&(existing.id, member.user_id)) {
                    state.insert_member(RoomMember::new(
                        existing.id,
                        member.user_id,
                        RoomRole::Member,
                        member.joined_at,
                    ))?;
                    restored = true;
                }
            }
            return Ok((existing, restored));
        }
        state.rooms.insert(room.id, room.clone());
        for member in members {
            state.insert_member(member)?;
        }
        Ok((room, true))
    }

    async fn find_by_id(&self, id: RoomId) -> RepositoryResult<Option<Room>> {
        Ok(self.state.read().await.rooms.get(&id).cloned())
    }

    async fn find_public_rooms(&self) -> RepositoryResult<Vec<Room>> {
        let state = self.state.read().await;
        let mut rooms: Vec<Room> = state
            .rooms
            .values()
            .filter(|room| room.room_type == RoomType::Public)
            .cloned()
            .collect();
        rooms.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rooms)
    }

    async fn find_dm_room(&self, a: UserId, b: UserId) -> RepositoryResult<Option<Room>> {
        let state = self.state.read().await;
        Ok(state
            .room_by_dm_key(&dm_key(a, b))
            .filter(|room| {
                state.members.contains_key(&(room.id, a)) && state.members.contains_key(&(room.id, b))
            })
            .cloned())
    }

    async fn add_member(&self, member: RoomMember) -> RepositoryResult<RoomMember> {
        let mut state = self.state.write().await;
        if !state.rooms.contains_key(&member.room_id) {
            return Err(RepositoryError::NotFound);
        }
        state.insert_member(member)
    }

    async fn remove_member(&self, room_id: RoomId, user_id: UserId) -> RepositoryResult<()> {
        let mut state = self.state.write().await;
        state
            .members
            .remove(&(room_id, user_id))
            .map(|_| ())
            .ok_or(RepositoryError::NotFound)
    }

    async fn find_member(
        &self,
        room_id: RoomId,
        user_id: UserId,
    ) -> RepositoryResult<Option<RoomMember>> {
        let state = self.state.read().await;
        Ok(state.members.get(&(room_id, user_id)).cloned())
    }

    async fn find_members(&self, room_id: RoomId) -> RepositoryResult<Vec<RoomMember>> {
        let state = self.state.read().await;
        let mut members: Vec<RoomMember> = state
            .members
            .values()
            .filter(|member| member.room_id == room_id)
            .cloned()
            .collect();
        members.sort_by_key(|member| (member.joined_at, member.user_id));
        Ok(members)
    }

    async fn find_memberships(&self, user_id: UserId) -> RepositoryResult<Vec<RoomMember>> {
        let state = self.state.read().await;
        let mut members: Vec<RoomMember> = state
            .members
            .values()
            .filter(|member| member.user_id == user_id)
            .cloned()
            .collect();
        members.sort_by_key(|member| member.joined_at);
        Ok(members)
    }

    async fn update_member_role(
        &self,
        room_id: RoomId,
        user_id: UserId,
        role: RoomRole,
    ) -> RepositoryResult<()> {
        let mut state = self.state.write().await;
        let member = state
            .members
            .get_mut(&(room_id, user_id))
            .ok_or(RepositoryError::NotFound)?;
        member.role = role;
        Ok(())
    }

    async fn delete_room(&self, room_id: RoomId) -> RepositoryResult<()> {
        let mut state = self.state.write().await;
        state
            .rooms
            .remove(&room_id)
            .ok_or(RepositoryError::NotFound)?;
        state.members.retain(|(room, _), _| *room != room_id);

        let removed: HashSet<MessageId> = state
            .messages
            .values()
            .filter(|message| message.room_id == room_id)
            .map(|message| message.id)
            .collect();
        state.messages.retain(|id, _| !removed.contains(id));
        state
            .reads
            .retain(|(message_id, _), _| !removed.contains(message_id));
        Ok(())
    }
}

#[async_trait]
impl MessageRepository for InMemoryStore {
    async fn create(&self, message: Message) -> RepositoryResult<Message> {
        let mut state = self.state.write().await;
        if !state.rooms.contains_key(&message.room_id) {
            return Err(RepositoryError::NotFound);
        }
        state.messages.insert(message.id, message.clone());
        Ok(message)
    }

    async fn find_by_id(&self, id: MessageId) -> RepositoryResult<Option<Message>> {
        Ok(self.state.read().await.messages.get(&id).cloned())
    }

    async fn find_by_room(
        &self,
        room_id: RoomId,
        limit: u32,
        before: Option<MessageCursor>,
    ) -> RepositoryResult<Vec<Message>> {
        let state = self.state.read().await;
        let mut messages: Vec<Message> = state
            .messages
            .values()
            .filter(|message| message.room_id == room_id)
            .filter(|message| {
                before.map_or(true, |cursor| {
                    (message.created_at, message.id) < (cursor.created_at, cursor.id)
                })
            })
            .cloned()
            .collect();
        messages.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        messages.truncate(limit as usize);
        Ok(messages)
    }

    async fn update(&self, message: Message) -> RepositoryResult<Message> {
        let mut state = self.state.write().await;
        let stored = state
            .messages
            .get_mut(&message.id)
            .ok_or(RepositoryError::NotFound)?;
        stored.content = message.content;
        stored.is_edited = message.is_edited;
        stored.is_deleted = message.is_deleted;
        stored.updated_at = message.updated_at;
        Ok(stored.clone())
    }

    async fn mark_as_read(
        &self,
        message_id: MessageId,
        user_id: UserId,
        at: Timestamp,
    ) -> RepositoryResult<MessageRead> {
        let mut state = self.state.write().await;
        if !state.messages.contains_key(&message_id) {
            return Err(RepositoryError::NotFound);
        }
        let read = state
            .reads
            .entry((message_id, user_id))
            .or_insert(MessageRead {
                message_id,
                user_id,
                read_at: at,
            });
        Ok(read.clone())
    }

    async fn find_read(
        &self,
        message_id: MessageId,
        user_id: UserId,
    ) -> RepositoryResult<Option<MessageRead>> {
        let state = self.state.read().await;
        Ok(state.reads.get(&(message_id, user_id)).cloned())
    }
}

#[async_trait]
impl NotificationRepository for InMemoryStore {
    async fn create(&self, input: NewNotification, at: Timestamp) -> RepositoryResult<Notification> {
        let notification = Notification::from_new(NotificationId::generate(), input, at);
        let mut state = self.state.write().await;
        state
            .notifications
            .insert(notification.id, notification.clone());
        Ok(notification)
    }

    async fn find_by_id(&self, id: NotificationId) -> RepositoryResult<Option<Notification>> {
        Ok(self.state.read().await.notifications.get(&id).cloned())
    }

    async fn find_by_user(&self, user_id: UserId) -> RepositoryResult<Vec<Notification>> {
        let state = self.state.read().await;
        let mut notifications: Vec<Notification> = state
            .notifications
            .values()
            .filter(|notification| notification.user_id == user_id)
            .cloned()
            .collect();
        notifications.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        Ok(notifications)
    }

    async fn mark_as_read(&self, id: NotificationId) -> RepositoryResult<Notification> {
        let mut state = self.state.write().await;
        let notification = state
            .notifications
            .get_mut(&id)
            .ok_or(RepositoryError::NotFound)?;
        notification.is_read = true;
        Ok(notification.clone())
    }

    async fn mark_all_as_read(&self, user_id: UserId) -> RepositoryResult<u64> {
        let mut state = self.state.write().await;
        let mut updated = 0;
        for notification in state
            .notifications
            .values_mut()
            .filter(|notification| notification.user_id == user_id && !notification.is_read)
        {
            notification.is_read = true;
            updated += 1;
        }
        Ok(updated)
    }
}

#[async_trait]
impl RefreshTokenRepository for InMemoryStore {
    async fn create(&self, token: RefreshToken) -> RepositoryResult<RefreshToken> {
        let mut state = self.state.write().await;
        if state
            .refresh_tokens
            .iter()
            .any(|existing| existing.token_digest == token.token_digest)
        {
            return Err(RepositoryError::conflict("refresh_tokens_token_hash_key"));
        }
        state.refresh_tokens.push(token.clone());
        Ok(token)
    }

    async fn revoke_active(&self, digest: TokenDigest) -> RepositoryResult<Option<RefreshToken>> {
        let mut state = self.state.write().await;
        Ok(state
            .refresh_tokens
            .iter_mut()
            .find(|token| token.token_digest == digest && !token.revoked)
            .map(|token| {
                token.revoked = true;
                token.clone()
            }))
    }
}

//! 实时连接注册表
//!
//! 记录在线连接、用户到连接的映射以及房间广播组，并实现 [`EventBroadcaster`]。
//! 每个连接持有一个无界发送端，网关任务负责把事件写到 WebSocket 上。

use std::collections::{HashMap, HashSet};

use application::{BroadcastError, EventBroadcaster, ServerEvent};
use async_trait::async_trait;
use domain::{RoomId, UserId};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

/// 单个 WebSocket 连接的标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct Connection {
    user_id: UserId,
    sender: mpsc::UnboundedSender<ServerEvent>,
    rooms: HashSet<RoomId>,
}

impl Connection {
    fn deliver(&self, event: ServerEvent) -> bool {
        self.sender.send(event).is_ok()
    }
}

#[derive(Default)]
struct Inner {
    connections: HashMap<ConnectionId, Connection>,
    /// 用户当前可寻址的连接，后注册者覆盖先注册者
    users: HashMap<UserId, ConnectionId>,
    rooms: HashMap<RoomId, HashSet<ConnectionId>>,
}

impl Inner {
    fn connections_of(&self, user_id: UserId) -> Vec<ConnectionId> {
        self.connections
            .iter()
            .filter(|(_, connection)| connection.user_id == user_id)
            .map(|(id, _)| *id)
            .collect()
    }

    fn join(&mut self, connection_id: ConnectionId, room_id: RoomId) -> bool {
        let Some(connection) = self.connections.get_mut(&connection_id) else {
            return false;
        };
        connection.rooms.insert(room_id);
        self.rooms.entry(room_id).or_default().insert(connection_id);
        true
    }

    fn leave(&mut self, connection_id: ConnectionId, room_id: RoomId) {
        if let Some(connection) = self.connections.get_mut(&connection_id) {
            connection.rooms.remove(&room_id);
        }
        if let Some(group) = self.rooms.get_mut(&room_id) {
            group.remove(&connection_id);
            if group.is_empty() {
                self.rooms.remove(&room_id);
            }
        }
    }
}

/// 新注册的连接；`events` 由网关任务消费
pub struct ConnectionHandle {
    pub id: ConnectionId,
    pub events: mpsc::UnboundedReceiver<ServerEvent>,
}

/// 连接注销后的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Departure {
    pub user_id: UserId,
    /// 该用户是否还有其它存活连接。
    /// 只有最后一个连接关闭时才广播下线；否则用户的可寻址连接
    /// 已改指向剩余的某个存活连接，用户保持在线。
    pub still_connected: bool,
}

/// 进程内的连接注册表，通过 `Arc` 在网关和各服务之间共享
#[derive(Default)]
pub struct ConnectionRegistry {
    inner: RwLock<Inner>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册已认证的连接，并把它设为该用户的可寻址连接
    pub async fn register(&self, user_id: UserId) -> ConnectionHandle {
        let (sender, events) = mpsc::unbounded_channel();
        let id = ConnectionId::generate();

        let mut inner = self.inner.write().await;
        inner.connections.insert(
            id,
            Connection {
                user_id,
                sender,
                rooms: HashSet::new(),
            },
        );
        inner.users.insert(user_id, id);
        info!(connection_id = %id, user_id = %user_id, "连接已注册");

        ConnectionHandle { id, events }
    }

    /// 从所有广播组移除连接；未知连接返回 `None`
    pub async fn unregister(&self, connection_id: ConnectionId) -> Option<Departure> {
        let mut inner = self.inner.write().await;
        let connection = inner.connections.remove(&connection_id)?;

        for room_id in &connection.rooms {
            if let Some(group) = inner.rooms.get_mut(room_id) {
                group.remove(&connection_id);
                if group.is_empty() {
                    inner.rooms.remove(room_id);
                }
            }
        }

        let user_id = connection.user_id;
        let remaining = inner.connections_of(user_id).into_iter().next();
        // 关闭的是可寻址连接时改指向剩余连接
        if inner.users.get(&user_id) == Some(&connection_id) {
            match remaining {
                Some(other) => {
                    inner.users.insert(user_id, other);
                }
                None => {
                    inner.users.remove(&user_id);
                }
            }
        }
        info!(connection_id = %connection_id, user_id = %user_id, "连接已注销");

        Some(Departure {
            user_id,
            still_connected: remaining.is_some(),
        })
    }

    pub async fn subscribe_connection(&self, connection_id: ConnectionId, room_id: RoomId) {
        self.inner.write().await.join(connection_id, room_id);
    }

    pub async fn is_subscribed(&self, connection_id: ConnectionId, room_id: RoomId) -> bool {
        self.inner
            .read()
            .await
            .connections
            .get(&connection_id)
            .is_some_and(|connection| connection.rooms.contains(&room_id))
    }

    /// 转发给房间内除 `except` 以外的连接，返回投递数
    pub async fn relay_to_room(
        &self,
        room_id: RoomId,
        except: ConnectionId,
        event: ServerEvent,
    ) -> usize {
        let inner = self.inner.read().await;
        let Some(group) = inner.rooms.get(&room_id) else {
            return 0;
        };
        group
            .iter()
            .filter(|id| **id != except)
            .filter_map(|id| inner.connections.get(id))
            .filter(|connection| connection.deliver(event.clone()))
            .count()
    }

    pub async fn is_online(&self, user_id: UserId) -> bool {
        self.inner.read().await.users.contains_key(&user_id)
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.read().await.connections.len()
    }
}

#[async_trait]
impl EventBroadcaster for ConnectionRegistry {
    async fn broadcast_to_room(
        &self,
        room_id: RoomId,
        event: ServerEvent,
    ) -> Result<usize, BroadcastError> {
        let inner = self.inner.read().await;
        let delivered = inner
            .rooms
            .get(&room_id)
            .map(|group| {
                group
                    .iter()
                    .filter_map(|id| inner.connections.get(id))
                    .filter(|connection| connection.deliver(event.clone()))
                    .count()
            })
            .unwrap_or(0);
        debug!(room_id = %room_id, event = event.name(), delivered, "房间事件已广播");
        Ok(delivered)
    }

    async fn send_to_user(
        &self,
        user_id: UserId,
        event: ServerEvent,
    ) -> Result<bool, BroadcastError> {
        let inner = self.inner.read().await;
        Ok(inner
            .users
            .get(&user_id)
            .and_then(|id| inner.connections.get(id))
            .is_some_and(|connection| connection.deliver(event)))
    }

    async fn broadcast_to_all(&self, event: ServerEvent) -> Result<usize, BroadcastError> {
        let inner = self.inner.read().await;
        Ok(inner
            .connections
            .values()
            .filter(|connection| connection.deliver(event.clone()))
            .count())
    }

    async fn subscribe_user(&self, user_id: UserId, room_id: RoomId) {
        let mut inner = self.inner.write().await;
        for connection_id in inner.connections_of(user_id) {
            inner.join(connection_id, room_id);
        }
    }

    async fn unsubscribe_user(&self, user_id: UserId, room_id: RoomId) {
        let mut inner = self.inner.write().await;
        for connection_id in inner.connections_of(user_id) {
            inner.leave(connection_id, room_id);
        }
    }

    async fn drop_room(&self, room_id: RoomId) {
        let mut inner = self.inner.write().await;
        if let Some(group) = inner.rooms.remove(&room_id) {
            for connection_id in group {
                if let Some(connection) = inner.connections.get_mut(&connection_id) {
                    connection.rooms.remove(&room_id);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use application::{PresencePayload, TypingPayload};

    fn online(user_id: UserId) -> ServerEvent {
        ServerEvent::UserOnline(PresencePayload {
            user_id,
            username: "someone".into(),
        })
    }

    #[tokio::test]
    async fn room_broadcast_reaches_only_subscribers() {
        let registry = ConnectionRegistry::new();
        let room = RoomId::generate();
        let (alice, bob) = (UserId::generate(), UserId::generate());
        let mut a = registry.register(alice).await;
        let mut b = registry.register(bob).await;
        registry.subscribe_user(alice, room).await;

        let delivered = registry
            .broadcast_to_room(room, online(alice))
            .await
            .unwrap();

        assert_eq!(delivered, 1);
        assert!(a.events.try_recv().is_ok());
        assert!(b.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn newest_connection_is_addressable_and_older_takes_over_on_close() {
        let registry = ConnectionRegistry::new();
        let user = UserId::generate();
        let mut first = registry.register(user).await;
        let mut second = registry.register(user).await;

        assert!(registry.send_to_user(user, online(user)).await.unwrap());
        assert!(second.events.try_recv().is_ok());
        assert!(first.events.try_recv().is_err());

        let departure = registry.unregister(second.id).await.unwrap();
        assert!(departure.still_connected);
        assert!(registry.send_to_user(user, online(user)).await.unwrap());
        assert!(first.events.try_recv().is_ok());

        let departure = registry.unregister(first.id).await.unwrap();
        assert!(!departure.still_connected);
        assert!(!registry.is_online(user).await);
        assert!(!registry.send_to_user(user, online(user)).await.unwrap());
    }

    #[tokio::test]
    async fn subscriptions_cover_every_connection_of_user() {
        let registry = ConnectionRegistry::new();
        let room = RoomId::generate();
        let user = UserId::generate();
        let mut first = registry.register(user).await;
        let mut second = registry.register(user).await;

        registry.subscribe_user(user, room).await;
        assert_eq!(registry.broadcast_to_room(room, online(user)).await.unwrap(), 2);
        assert!(first.events.try_recv().is_ok());
        assert!(second.events.try_recv().is_ok());

        registry.unsubscribe_user(user, room).await;
        assert_eq!(registry.broadcast_to_room(room, online(user)).await.unwrap(), 0);
        assert!(!registry.is_subscribed(first.id, room).await);
        assert!(!registry.is_subscribed(second.id, room).await);
    }

    #[tokio::test]
    async fn typing_relay_skips_sender() {
        let registry = ConnectionRegistry::new();
        let room = RoomId::generate();
        let (alice, bob) = (UserId::generate(), UserId::generate());
        let mut a = registry.register(alice).await;
        let mut b = registry.register(bob).await;
        registry.subscribe_connection(a.id, room).await;
        registry.subscribe_connection(b.id, room).await;

        let event = ServerEvent::UserTyping(TypingPayload {
            user_id: alice,
            username: "alice".into(),
            room_id: room,
        });
        assert_eq!(registry.relay_to_room(room, a.id, event.clone()).await, 1);
        assert_eq!(b.events.try_recv().unwrap(), event);
        assert!(a.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn dropping_room_clears_subscriptions() {
        let registry = ConnectionRegistry::new();
        let room = RoomId::generate();
        let user = UserId::generate();
        let handle = registry.register(user).await;
        registry.subscribe_user(user, room).await;
        assert!(registry.is_subscribed(handle.id, room).await);

        registry.drop_room(room).await;

        assert!(!registry.is_subscribed(handle.id, room).await);
        assert_eq!(registry.broadcast_to_room(room, online(user)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn unregister_removes_connection_from_groups() {
        let registry = ConnectionRegistry::new();
        let room = RoomId::generate();
        let user = UserId::generate();
        let handle = registry.register(user).await;
        registry.subscribe_connection(handle.id, room).await;

        registry.unregister(handle.id).await.unwrap();

        assert_eq!(registry.connection_count().await, 0);
        assert_eq!(registry.broadcast_to_room(room, online(user)).await.unwrap(), 0);
        assert!(registry.unregister(handle.id).await.is_none());
    }
}

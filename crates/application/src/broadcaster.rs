//! 实时事件与广播端口
//!
//! 事件以 `{"event": "...", "data": {...}}` 的 JSON 文本帧下发，字段为 camelCase。

use async_trait::async_trait;
use domain::{Message, MessageId, Notification, RoomId, UserId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresencePayload {
    pub user_id: UserId,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingPayload {
    pub user_id: UserId,
    pub username: String,
    pub room_id: RoomId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageDeletedPayload {
    pub message_id: MessageId,
    pub room_id: RoomId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomMembershipPayload {
    pub room_id: RoomId,
    pub user_id: UserId,
    pub username: String,
}

/// 服务端推送给客户端的事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "user:online")]
    UserOnline(PresencePayload),
    #[serde(rename = "user:offline")]
    UserOffline(PresencePayload),
    #[serde(rename = "user:typing")]
    UserTyping(TypingPayload),
    #[serde(rename = "user:stop-typing")]
    UserStopTyping(TypingPayload),
    #[serde(rename = "message:new")]
    MessageNew(Message),
    #[serde(rename = "message:edited")]
    MessageEdited(Message),
    #[serde(rename = "message:deleted")]
    MessageDeleted(MessageDeletedPayload),
    #[serde(rename = "room:user-joined")]
    RoomUserJoined(RoomMembershipPayload),
    #[serde(rename = "room:user-left")]
    RoomUserLeft(RoomMembershipPayload),
    #[serde(rename = "notification:new")]
    NotificationNew(Notification),
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::UserOnline(_) => "user:online",
            ServerEvent::UserOffline(_) => "user:offline",
            ServerEvent::UserTyping(_) => "user:typing",
            ServerEvent::UserStopTyping(_) => "user:stop-typing",
            ServerEvent::MessageNew(_) => "message:new",
            ServerEvent::MessageEdited(_) => "message:edited",
            ServerEvent::MessageDeleted(_) => "message:deleted",
            ServerEvent::RoomUserJoined(_) => "room:user-joined",
            ServerEvent::RoomUserLeft(_) => "room:user-left",
            ServerEvent::NotificationNew(_) => "notification:new",
        }
    }
}

#[derive(Debug, Error)]
pub enum BroadcastError {
    #[error("broadcast failed: {0}")]
    Failed(String),
}

impl BroadcastError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// 面向在线连接的推送端口。投递是尽力而为的，持久化数据才是最终依据。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventBroadcaster: Send + Sync {
    /// 推送给订阅了该房间的所有连接，返回投递数
    async fn broadcast_to_room(
        &self,
        room_id: RoomId,
        event: ServerEvent,
    ) -> Result<usize, BroadcastError>;
    /// 推送给用户当前可寻址的连接；用户不在线时返回 `Ok(false)`
    async fn send_to_user(&self, user_id: UserId, event: ServerEvent)
        -> Result<bool, BroadcastError>;
    async fn broadcast_to_all(&self, event: ServerEvent) -> Result<usize, BroadcastError>;
    /// 让用户的所有存活连接加入房间广播组；用户不在线时什么也不做
    async fn subscribe_user(&self, user_id: UserId, room_id: RoomId);
    /// 让用户的所有连接离开房间广播组
    async fn unsubscribe_user(&self, user_id: UserId, room_id: RoomId);
    /// 房间删除后解散其广播组
    async fn drop_room(&self, room_id: RoomId);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    #[test]
    fn events_use_tagged_camel_case_frames() {
        let user_id = UserId::from(Uuid::nil());
        let event = ServerEvent::UserOnline(PresencePayload {
            user_id,
            username: "alice".into(),
        });
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            json!({
                "event": "user:online",
                "data": { "userId": Uuid::nil().to_string(), "username": "alice" }
            })
        );
        assert_eq!(event.name(), "user:online");
    }

    #[test]
    fn deleted_event_round_trips() {
        let event = ServerEvent::MessageDeleted(MessageDeletedPayload {
            message_id: MessageId::generate(),
            room_id: RoomId::generate(),
        });
        let text = serde_json::to_string(&event).unwrap();
        assert!(text.contains("\"message:deleted\""));
        assert!(text.contains("\"messageId\""));
        let back: ServerEvent = serde_json::from_str(&text).unwrap();
        assert_eq!(back, event);
    }
}

use crate::errors::DomainError;
use crate::value_objects::{MessageContent, MessageId, RoomId, Timestamp, UserId};

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize, sqlx::Type,
)]
#[sqlx(type_name = "message_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    #[default]
    Text,
    Image,
    File,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub room_id: RoomId,
    pub sender_id: UserId,
    pub content: MessageContent,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub is_edited: bool,
    /// 软删除标记，记录本身永不物理删除
    pub is_deleted: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Message {
    pub fn new(
        id: MessageId,
        room_id: RoomId,
        sender_id: UserId,
        content: MessageContent,
        message_type: MessageType,
        created_at: Timestamp,
    ) -> Self {
        Self {
            id,
            room_id,
            sender_id,
            content,
            message_type,
            is_edited: false,
            is_deleted: false,
            created_at,
            updated_at: created_at,
        }
    }

    pub fn edit(
        &mut self,
        editor: UserId,
        new_content: MessageContent,
        at: Timestamp,
    ) -> Result<(), DomainError> {
        if self.sender_id != editor {
            return Err(DomainError::NotMessageSender);
        }
        if self.is_deleted {
            return Err(DomainError::MessageDeleted);
        }
        self.content = new_content;
        self.is_edited = true;
        self.updated_at = at;
        Ok(())
    }

    pub fn mark_deleted(&mut self, at: Timestamp) {
        self.is_deleted = true;
        self.updated_at = at;
    }
}

/// 已读回执，(message_id, user_id) 唯一。
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRead {
    pub message_id: MessageId,
    pub user_id: UserId,
    pub read_at: Timestamp,
}

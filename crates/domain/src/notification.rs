//! 通知实体定义

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::value_objects::{NotificationId, Timestamp, UserId};

/// 通知类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "notification_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    NewMessage,
    RoomInvite,
    Mention,
    System,
}

/// 通知实体
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: NotificationId,
    pub user_id: UserId,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub title: String,
    pub body: String,
    /// 附加数据，始终是 JSON 对象
    pub metadata: JsonValue,
    pub is_read: bool,
    pub created_at: Timestamp,
}

/// 创建通知的输入
#[derive(Debug, Clone, PartialEq)]
pub struct NewNotification {
    pub user_id: UserId,
    pub notification_type: NotificationType,
    pub title: String,
    pub body: String,
    pub metadata: JsonValue,
}

impl Notification {
    pub fn from_new(id: NotificationId, input: NewNotification, now: Timestamp) -> Self {
        let metadata = if input.metadata.is_object() {
            input.metadata
        } else {
            JsonValue::Object(Default::default())
        };
        Self {
            id,
            user_id: input.user_id,
            notification_type: input.notification_type,
            title: input.title,
            body: input.body,
            metadata,
            is_read: false,
            created_at: now,
        }
    }
}

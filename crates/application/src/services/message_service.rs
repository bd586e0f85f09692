use std::sync::Arc;

use domain::{
    DomainError, Message, MessageContent, MessageCursor, MessageId, MessageRead,
    MessageRepository, MessageType, RoomId, RoomMember, RoomRepository, UserId, UserRepository,
};
use serde::Serialize;
use tracing::{info, warn};

use crate::{
    broadcaster::{EventBroadcaster, MessageDeletedPayload, ServerEvent},
    clock::Clock,
    error::ApplicationError,
    services::NotificationService,
};

pub const DEFAULT_PAGE_LIMIT: u32 = 20;
pub const MAX_PAGE_LIMIT: u32 = 100;

#[derive(Debug, Clone)]
pub struct SendMessageRequest {
    pub room_id: RoomId,
    pub content: String,
    pub message_type: MessageType,
}

#[derive(Debug, Clone)]
pub struct GetMessagesQuery {
    pub room_id: RoomId,
    pub limit: Option<u32>,
    /// 上一页最后一条消息的 id，排他
    pub cursor: Option<MessageId>,
}

/// 按时间倒序的一页消息
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePage {
    pub messages: Vec<Message>,
    /// 本页已满时给出下一页游标
    pub next_cursor: Option<MessageId>,
}

pub struct MessageServiceDependencies {
    pub message_repository: Arc<dyn MessageRepository>,
    pub room_repository: Arc<dyn RoomRepository>,
    pub user_repository: Arc<dyn UserRepository>,
    pub notifications: Arc<NotificationService>,
    pub broadcaster: Arc<dyn EventBroadcaster>,
    pub clock: Arc<dyn Clock>,
}

/// 消息收发、编辑、删除与已读
pub struct MessageService {
    deps: MessageServiceDependencies,
}

impl MessageService {
    pub fn new(deps: MessageServiceDependencies) -> Self {
        Self { deps }
    }

    pub async fn send_message(
        &self,
        sender_id: UserId,
        request: SendMessageRequest,
    ) -> Result<Message, ApplicationError> {
        self.require_member(request.room_id, sender_id).await?;
        let content = MessageContent::new(request.content)?;

        let message = Message::new(
            MessageId::generate(),
            request.room_id,
            sender_id,
            content,
            request.message_type,
            self.deps.clock.now(),
        );
        let stored = self.deps.message_repository.create(message).await?;

        self.publish(stored.room_id, ServerEvent::MessageNew(stored.clone()))
            .await;

        // 消息已持久化，之后的步骤失败只记录日志
        let sender_username = match self.deps.user_repository.find_by_id(sender_id).await {
            Ok(sender) => sender
                .map(|user| user.username.to_string())
                .unwrap_or_default(),
            Err(err) => {
                warn!(message_id = %stored.id, error = %err, "查询发送者失败，跳过新消息通知");
                return Ok(stored);
            }
        };
        if let Err(err) = self
            .deps
            .notifications
            .notify_new_message(&stored, &sender_username)
            .await
        {
            warn!(message_id = %stored.id, error = %err, "新消息通知生成失败");
        }

        Ok(stored)
    }

    pub async fn get_messages(
        &self,
        user_id: UserId,
        query: GetMessagesQuery,
    ) -> Result<MessagePage, ApplicationError> {
        self.require_member(query.room_id, user_id).await?;

        let limit = query.limit.unwrap_or(DEFAULT_PAGE_LIMIT);
        if !(1..=MAX_PAGE_LIMIT).contains(&limit) {
            return Err(DomainError::invalid_argument("limit", "must be between 1 and 100").into());
        }

        let before = match query.cursor {
            Some(cursor_id) => {
                let anchor = self
                    .deps
                    .message_repository
                    .find_by_id(cursor_id)
                    .await?
                    .filter(|m| m.room_id == query.room_id)
                    .ok_or(DomainError::InvalidCursor)?;
                Some(MessageCursor::from(&anchor))
            }
            None => None,
        };

        let messages = self
            .deps
            .message_repository
            .find_by_room(query.room_id, limit, before)
            .await?;
        let next_cursor = if messages.len() == limit as usize {
            messages.last().map(|m| m.id)
        } else {
            None
        };

        Ok(MessagePage {
            messages,
            next_cursor,
        })
    }

    pub async fn edit_message(
        &self,
        user_id: UserId,
        message_id: MessageId,
        content: String,
    ) -> Result<Message, ApplicationError> {
        let mut message = self.find_message(message_id).await?;
        let content = MessageContent::new(content)?;
        message.edit(user_id, content, self.deps.clock.now())?;

        let stored = self.deps.message_repository.update(message).await?;
        self.publish(stored.room_id, ServerEvent::MessageEdited(stored.clone()))
            .await;
        Ok(stored)
    }

    /// 软删除；重复删除视为成功。返回消息所在房间。
    pub async fn delete_message(
        &self,
        user_id: UserId,
        message_id: MessageId,
    ) -> Result<RoomId, ApplicationError> {
        let mut message = self.find_message(message_id).await?;

        if message.sender_id != user_id {
            let can_moderate = self
                .deps
                .room_repository
                .find_member(message.room_id, user_id)
                .await?
                .is_some_and(|member| member.can_moderate());
            if !can_moderate {
                return Err(DomainError::InsufficientPermissions.into());
            }
        }

        let room_id = message.room_id;
        if message.is_deleted {
            return Ok(room_id);
        }

        message.mark_deleted(self.deps.clock.now());
        self.deps.message_repository.update(message).await?;
        info!(message_id = %message_id, room_id = %room_id, deleted_by = %user_id, "消息已删除");

        self.publish(
            room_id,
            ServerEvent::MessageDeleted(MessageDeletedPayload {
                message_id,
                room_id,
            }),
        )
        .await;
        Ok(room_id)
    }

    /// 幂等：重复标记返回同一条已读记录
    pub async fn mark_read(
        &self,
        user_id: UserId,
        message_id: MessageId,
    ) -> Result<MessageRead, ApplicationError> {
        self.find_message(message_id).await?;
        if let Some(existing) = self
            .deps
            .message_repository
            .find_read(message_id, user_id)
            .await?
        {
            return Ok(existing);
        }
        Ok(self
            .deps
            .message_repository
            .mark_as_read(message_id, user_id, self.deps.clock.now())
            .await?)
    }

    async fn find_message(&self, message_id: MessageId) -> Result<Message, ApplicationError> {
        self.deps
            .message_repository
            .find_by_id(message_id)
            .await?
            .ok_or_else(|| DomainError::MessageNotFound.into())
    }

    async fn require_member(
        &self,
        room_id: RoomId,
        user_id: UserId,
    ) -> Result<RoomMember, ApplicationError> {
        self.deps
            .room_repository
            .find_member(room_id, user_id)
            .await?
            .ok_or_else(|| DomainError::NotRoomMember.into())
    }

    async fn publish(&self, room_id: RoomId, event: ServerEvent) {
        let name = event.name();
        if let Err(err) = self.deps.broadcaster.broadcast_to_room(room_id, event).await {
            warn!(room_id = %room_id, event = name, error = %err, "消息事件推送失败");
        }
    }
}

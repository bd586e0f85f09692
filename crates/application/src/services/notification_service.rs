use std::sync::Arc;

use domain::{
    DomainError, Message, NewNotification, Notification, NotificationId, NotificationRepository,
    NotificationType, RoomRepository, UserId, UserRepository,
};
use serde_json::json;
use tracing::{debug, warn};

use crate::{
    broadcaster::{EventBroadcaster, ServerEvent},
    clock::Clock,
    error::ApplicationError,
    jobs::{JobOptions, JobRequest, OfflineNotificationPayload, TaskQueue, SEND_OFFLINE_NOTIFICATION},
};

const PREVIEW_CHARS: usize = 100;

pub struct NotificationServiceDependencies {
    pub notification_repository: Arc<dyn NotificationRepository>,
    pub room_repository: Arc<dyn RoomRepository>,
    pub user_repository: Arc<dyn UserRepository>,
    pub broadcaster: Arc<dyn EventBroadcaster>,
    pub task_queue: Arc<dyn TaskQueue>,
    pub clock: Arc<dyn Clock>,
    pub offline_email: JobOptions,
}

/// 通知的持久化与实时投递
pub struct NotificationService {
    deps: NotificationServiceDependencies,
}

impl NotificationService {
    pub fn new(deps: NotificationServiceDependencies) -> Self {
        Self { deps }
    }

    /// 先落库再推送；用户不在线不算错误
    pub async fn create(&self, input: NewNotification) -> Result<Notification, ApplicationError> {
        let (notification, _) = self.create_and_push(input).await?;
        Ok(notification)
    }

    pub async fn get_for_user(&self, user_id: UserId) -> Result<Vec<Notification>, ApplicationError> {
        Ok(self.deps.notification_repository.find_by_user(user_id).await?)
    }

    /// 只能标记自己的通知
    pub async fn mark_as_read(
        &self,
        user_id: UserId,
        id: NotificationId,
    ) -> Result<Notification, ApplicationError> {
        let notification = self
            .deps
            .notification_repository
            .find_by_id(id)
            .await?
            .filter(|n| n.user_id == user_id)
            .ok_or(DomainError::NotificationNotFound)?;
        if notification.is_read {
            return Ok(notification);
        }
        Ok(self.deps.notification_repository.mark_as_read(id).await?)
    }

    pub async fn mark_all_as_read(&self, user_id: UserId) -> Result<u64, ApplicationError> {
        Ok(self
            .deps
            .notification_repository
            .mark_all_as_read(user_id)
            .await?)
    }

    /// 给房间内除发送者以外的成员生成新消息通知；离线成员额外投递邮件任务。
    /// 返回生成的通知数量。
    pub async fn notify_new_message(
        &self,
        message: &Message,
        sender_username: &str,
    ) -> Result<usize, ApplicationError> {
        let members = self
            .deps
            .room_repository
            .find_members(message.room_id)
            .await?;
        let preview: String = message.content.as_str().chars().take(PREVIEW_CHARS).collect();

        let mut created = 0;
        for member in members.iter().filter(|m| m.user_id != message.sender_id) {
            let input = NewNotification {
                user_id: member.user_id,
                notification_type: NotificationType::NewMessage,
                title: format!("New message from {sender_username}"),
                body: preview.clone(),
                metadata: json!({
                    "roomId": message.room_id,
                    "messageId": message.id,
                    "senderId": message.sender_id,
                }),
            };
            let (_, delivered) = self.create_and_push(input).await?;
            created += 1;

            if !delivered {
                self.enqueue_offline_email(member.user_id, sender_username, message, &preview)
                    .await;
            }
        }
        Ok(created)
    }

    async fn create_and_push(
        &self,
        input: NewNotification,
    ) -> Result<(Notification, bool), ApplicationError> {
        let notification = self
            .deps
            .notification_repository
            .create(input, self.deps.clock.now())
            .await?;

        let delivered = match self
            .deps
            .broadcaster
            .send_to_user(
                notification.user_id,
                ServerEvent::NotificationNew(notification.clone()),
            )
            .await
        {
            Ok(delivered) => delivered,
            Err(err) => {
                warn!(user_id = %notification.user_id, error = %err, "通知推送失败");
                false
            }
        };
        debug!(notification_id = %notification.id, delivered, "通知已创建");
        Ok((notification, delivered))
    }

    async fn enqueue_offline_email(
        &self,
        user_id: UserId,
        sender_username: &str,
        message: &Message,
        preview: &str,
    ) {
        let user = match self.deps.user_repository.find_by_id(user_id).await {
            Ok(Some(user)) => user,
            Ok(None) => return,
            Err(err) => {
                warn!(user_id = %user_id, error = %err, "查询离线用户失败");
                return;
            }
        };
        let payload = OfflineNotificationPayload {
            email: user.email.to_string(),
            username: user.username.to_string(),
            sender_username: sender_username.to_owned(),
            room_id: message.room_id.to_string(),
            message_id: message.id.to_string(),
            preview: preview.to_owned(),
        };
        let payload = match serde_json::to_value(payload) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(user_id = %user_id, error = %err, "离线邮件任务序列化失败");
                return;
            }
        };
        let job = JobRequest {
            job_type: SEND_OFFLINE_NOTIFICATION,
            payload,
            options: self.deps.offline_email.clone(),
        };
        if let Err(err) = self.deps.task_queue.enqueue(job).await {
            warn!(user_id = %user_id, error = %err, "离线邮件任务入队失败");
        }
    }
}

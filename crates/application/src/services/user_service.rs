use std::sync::Arc;

use domain::{
    DomainError, PresenceStatus, RepositoryError, User, UserId, UserRepository, UserUpdate,
    Username,
};
use tracing::{debug, warn};

use crate::{
    clock::Clock,
    error::ApplicationError,
    jobs::{DeleteFilePayload, JobOptions, JobRequest, TaskQueue, DELETE_AVATAR_FILE},
};

#[derive(Debug, Clone, Default)]
pub struct UpdateProfileRequest {
    pub username: Option<String>,
}

pub struct UserServiceDependencies {
    pub user_repository: Arc<dyn UserRepository>,
    pub task_queue: Arc<dyn TaskQueue>,
    pub clock: Arc<dyn Clock>,
    pub avatar_cleanup: JobOptions,
}

/// 用户资料与在线状态
pub struct UserService {
    deps: UserServiceDependencies,
}

impl UserService {
    pub fn new(deps: UserServiceDependencies) -> Self {
        Self { deps }
    }

    pub async fn get_profile(&self, user_id: UserId) -> Result<User, ApplicationError> {
        self.deps
            .user_repository
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| DomainError::UserNotFound.into())
    }

    pub async fn update_profile(
        &self,
        user_id: UserId,
        request: UpdateProfileRequest,
    ) -> Result<User, ApplicationError> {
        let current = self.get_profile(user_id).await?;

        let mut changes = UserUpdate::default();
        if let Some(raw) = request.username {
            let username = Username::parse(raw)?;
            if username != current.username {
                let taken = self
                    .deps
                    .user_repository
                    .find_by_username(username.clone())
                    .await?
                    .is_some_and(|other| other.id != user_id);
                if taken {
                    return Err(DomainError::UsernameAlreadyExists.into());
                }
                changes.username = Some(username);
            }
        }

        if changes.is_empty() {
            return Ok(current);
        }
        self.apply(user_id, changes).await
    }

    /// 设置新的头像地址；旧文件通过后台任务延迟删除
    pub async fn set_avatar(
        &self,
        user_id: UserId,
        avatar_url: String,
    ) -> Result<User, ApplicationError> {
        let avatar_url = avatar_url.trim().to_owned();
        if avatar_url.is_empty() {
            return Err(DomainError::invalid_argument("avatar_url", "cannot be empty").into());
        }
        let current = self.get_profile(user_id).await?;
        let updated = self
            .apply(
                user_id,
                UserUpdate {
                    avatar_url: Some(Some(avatar_url)),
                    ..UserUpdate::default()
                },
            )
            .await?;
        if let Some(previous) = current.avatar_url {
            self.schedule_file_cleanup(user_id, previous).await;
        }
        Ok(updated)
    }

    pub async fn clear_avatar(&self, user_id: UserId) -> Result<User, ApplicationError> {
        let current = self.get_profile(user_id).await?;
        let Some(previous) = current.avatar_url else {
            return Ok(current);
        };
        let updated = self
            .apply(
                user_id,
                UserUpdate {
                    avatar_url: Some(None),
                    ..UserUpdate::default()
                },
            )
            .await?;
        self.schedule_file_cleanup(user_id, previous).await;
        Ok(updated)
    }

    /// 只由实时网关调用
    pub async fn set_presence(
        &self,
        user_id: UserId,
        status: PresenceStatus,
    ) -> Result<User, ApplicationError> {
        debug!(user_id = %user_id, status = ?status, "更新在线状态");
        self.apply(user_id, UserUpdate::status(status)).await
    }

    async fn apply(&self, user_id: UserId, changes: UserUpdate) -> Result<User, ApplicationError> {
        self.deps
            .user_repository
            .update(user_id, changes, self.deps.clock.now())
            .await
            .map_err(|err| match err {
                RepositoryError::NotFound => DomainError::UserNotFound.into(),
                RepositoryError::Conflict { .. } => DomainError::UsernameAlreadyExists.into(),
                other => other.into(),
            })
    }

    async fn schedule_file_cleanup(&self, user_id: UserId, url: String) {
        let payload = match serde_json::to_value(DeleteFilePayload { url }) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(user_id = %user_id, error = %err, "头像清理任务序列化失败");
                return;
            }
        };
        let job = JobRequest {
            job_type: DELETE_AVATAR_FILE,
            payload,
            options: self.deps.avatar_cleanup.clone(),
        };
        // 文件清理失败不影响资料更新
        if let Err(err) = self.deps.task_queue.enqueue(job).await {
            warn!(user_id = %user_id, error = %err, "头像清理任务入队失败");
        }
    }
}

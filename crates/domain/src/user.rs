use crate::value_objects::{PasswordHash, Timestamp, UserEmail, UserId, Username};

/// 在线状态，只由实时网关在连接建立/断开时修改。
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize, sqlx::Type)]
#[sqlx(type_name = "presence_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Offline,
    Away,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub email: UserEmail,
    pub username: Username,
    #[serde(skip_serializing)] // 密码字段不暴露给客户端
    pub password: PasswordHash,
    pub avatar_url: Option<String>,
    pub status: PresenceStatus,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl User {
    pub fn register(
        id: UserId,
        username: Username,
        email: UserEmail,
        password: PasswordHash,
        now: Timestamp,
    ) -> Self {
        Self {
            id,
            email,
            username,
            password,
            avatar_url: None,
            status: PresenceStatus::Offline,
            created_at: now,
            updated_at: now,
        }
    }
}

/// 用户资料的部分更新，`None` 表示保持不变。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserUpdate {
    pub username: Option<Username>,
    /// `Some(None)` 表示清除头像
    pub avatar_url: Option<Option<String>>,
    pub status: Option<PresenceStatus>,
}

impl UserUpdate {
    pub fn status(status: PresenceStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.username.is_none() && self.avatar_url.is_none() && self.status.is_none()
    }

    /// 把更新应用到内存中的实体上，供内存仓储与测试替身使用。
    pub fn apply_to(&self, user: &mut User, now: Timestamp) {
        if let Some(username) = &self.username {
            user.username = username.clone();
        }
        if let Some(avatar_url) = &self.avatar_url {
            user.avatar_url = avatar_url.clone();
        }
        if let Some(status) = self.status {
            user.status = status;
        }
        user.updated_at = now;
    }
}

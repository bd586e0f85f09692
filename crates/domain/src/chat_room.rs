use crate::errors::DomainError;
use crate::value_objects::{RoomId, Timestamp, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize, sqlx::Type)]
#[sqlx(type_name = "room_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RoomType {
    Public,
    Private,
    Dm,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub id: RoomId,
    pub name: Option<String>,
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub room_type: RoomType,
    pub created_by: UserId,
    /// 私聊房间的无序成员对，普通房间为空
    #[serde(skip_serializing)]
    pub dm_key: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Room {
    pub const NAME_MIN_LEN: usize = 2;
    pub const NAME_MAX_LEN: usize = 50;
    pub const DESCRIPTION_MAX_LEN: usize = 200;

    /// 创建公开或私有群聊；私聊房间只能经由 [`Room::new_dm`] 创建。
    pub fn new_group(
        id: RoomId,
        name: impl Into<String>,
        description: Option<String>,
        room_type: RoomType,
        created_by: UserId,
        now: Timestamp,
    ) -> Result<Self, DomainError> {
        if room_type == RoomType::Dm {
            return Err(DomainError::invalid_argument(
                "type",
                "direct message rooms are created through the dm endpoint",
            ));
        }
        let name = Self::validate_name(name.into())?;
        let description = description
            .map(|text| text.trim().to_owned())
            .filter(|text| !text.is_empty());
        if let Some(text) = &description {
            if text.chars().count() > Self::DESCRIPTION_MAX_LEN {
                return Err(DomainError::invalid_argument("description", "too long"));
            }
        }

        Ok(Self {
            id,
            name: Some(name),
            description,
            room_type,
            created_by,
            dm_key: None,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn new_dm(
        id: RoomId,
        initiator: UserId,
        target: UserId,
        now: Timestamp,
    ) -> Result<Self, DomainError> {
        if initiator == target {
            return Err(DomainError::invalid_argument(
                "target_user_id",
                "cannot open a direct message with yourself",
            ));
        }
        Ok(Self {
            id,
            name: None,
            description: None,
            room_type: RoomType::Dm,
            created_by: initiator,
            dm_key: Some(dm_key(initiator, target)),
            created_at: now,
            updated_at: now,
        })
    }

    /// 只有公开房间允许自行加入
    pub fn is_joinable(&self) -> bool {
        self.room_type == RoomType::Public
    }

    fn validate_name(name: String) -> Result<String, DomainError> {
        let trimmed = name.trim();
        let len = trimmed.chars().count();
        if len < Self::NAME_MIN_LEN {
            return Err(DomainError::invalid_argument("name", "too short"));
        }
        if len > Self::NAME_MAX_LEN {
            return Err(DomainError::invalid_argument("name", "too long"));
        }
        Ok(trimmed.to_owned())
    }
}

/// 私聊房间的对称键：`min(a,b):max(a,b)`，与参数顺序无关。
pub fn dm_key(a: UserId, b: UserId) -> String {
    let (low, high) = if a <= b { (a, b) } else { (b, a) };
    format!("{low}:{high}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn dm_key_is_symmetric() {
        let a = UserId::generate();
        let b = UserId::generate();
        assert_eq!(dm_key(a, b), dm_key(b, a));
        assert_ne!(dm_key(a, b), dm_key(a, UserId::generate()));
    }

    #[test]
    fn group_room_rejects_dm_type_and_bad_names() {
        let owner = UserId::generate();
        let now = Utc::now();
        assert!(Room::new_group(RoomId::generate(), "general", None, RoomType::Dm, owner, now)
            .is_err());
        assert!(Room::new_group(RoomId::generate(), "x", None, RoomType::Public, owner, now)
            .is_err());
        assert!(Room::new_group(
            RoomId::generate(),
            "general",
            Some("d".repeat(201)),
            RoomType::Public,
            owner,
            now
        )
        .is_err());

        let room = Room::new_group(
            RoomId::generate(),
            "  general ",
            Some("   ".into()),
            RoomType::Private,
            owner,
            now,
        )
        .unwrap();
        assert_eq!(room.name.as_deref(), Some("general"));
        assert_eq!(room.description, None);
        assert!(!room.is_joinable());
    }

    #[test]
    fn dm_with_self_is_rejected() {
        let user = UserId::generate();
        assert!(Room::new_dm(RoomId::generate(), user, user, Utc::now()).is_err());
    }
}

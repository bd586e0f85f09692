use crate::value_objects::{RoomId, Timestamp, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize, sqlx::Type)]
#[sqlx(type_name = "room_role", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RoomRole {
    Owner,
    Admin,
    Member,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomMember {
    pub room_id: RoomId,
    pub user_id: UserId,
    pub role: RoomRole,
    pub joined_at: Timestamp,
}

impl RoomMember {
    pub fn new(room_id: RoomId, user_id: UserId, role: RoomRole, joined_at: Timestamp) -> Self {
        Self {
            room_id,
            user_id,
            role,
            joined_at,
        }
    }

    pub fn is_owner(&self) -> bool {
        self.role == RoomRole::Owner
    }

    /// 房主和管理员可以删除他人消息
    pub fn can_moderate(&self) -> bool {
        matches!(self.role, RoomRole::Owner | RoomRole::Admin)
    }
}

/// 房主离开后的继任者：优先最早加入的管理员，否则最早加入的成员。
pub fn choose_successor<'a>(
    remaining: &'a [RoomMember],
    departing: UserId,
) -> Option<&'a RoomMember> {
    let candidates = || remaining.iter().filter(move |m| m.user_id != departing);
    candidates()
        .filter(|m| m.role == RoomRole::Admin)
        .min_by_key(|m| m.joined_at)
        .or_else(|| candidates().min_by_key(|m| m.joined_at))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn member(room: RoomId, role: RoomRole, offset_secs: i64) -> RoomMember {
        RoomMember::new(
            room,
            UserId::generate(),
            role,
            Utc::now() + Duration::seconds(offset_secs),
        )
    }

    #[test]
    fn successor_prefers_admin_over_earlier_member() {
        let room = RoomId::generate();
        let owner = member(room, RoomRole::Owner, 0);
        let early = member(room, RoomRole::Member, 1);
        let admin = member(room, RoomRole::Admin, 5);
        let members = vec![owner.clone(), early, admin.clone()];

        let successor = choose_successor(&members, owner.user_id).unwrap();
        assert_eq!(successor.user_id, admin.user_id);
    }

    #[test]
    fn successor_falls_back_to_earliest_joined() {
        let room = RoomId::generate();
        let owner = member(room, RoomRole::Owner, 0);
        let late = member(room, RoomRole::Member, 10);
        let early = member(room, RoomRole::Member, 2);
        let members = vec![owner.clone(), late, early.clone()];

        let successor = choose_successor(&members, owner.user_id).unwrap();
        assert_eq!(successor.user_id, early.user_id);
    }

    #[test]
    fn no_successor_for_sole_member() {
        let room = RoomId::generate();
        let owner = member(room, RoomRole::Owner, 0);
        assert!(choose_successor(std::slice::from_ref(&owner), owner.user_id).is_none());
    }
}

use std::sync::Arc;

use domain::{
    choose_successor, DomainError, RepositoryError, Room, RoomId, RoomMember, RoomRepository,
    RoomRole, RoomType, User, UserId, UserRepository,
};
use serde::Serialize;
use tracing::{info, warn};

use crate::{
    broadcaster::{EventBroadcaster, RoomMembershipPayload, ServerEvent},
    clock::Clock,
    error::ApplicationError,
};

#[derive(Debug, Clone)]
pub struct CreateRoomRequest {
    pub name: String,
    pub description: Option<String>,
    pub room_type: RoomType,
}

/// 离开房间的结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum LeaveOutcome {
    Left,
    /// 房主离开，所有权已转移
    OwnershipTransferred {
        #[serde(rename = "newOwnerId")]
        new_owner_id: UserId,
    },
    /// 最后一名成员离开，房间被删除
    RoomDeleted,
}

pub struct RoomServiceDependencies {
    pub room_repository: Arc<dyn RoomRepository>,
    pub user_repository: Arc<dyn UserRepository>,
    pub broadcaster: Arc<dyn EventBroadcaster>,
    pub clock: Arc<dyn Clock>,
}

/// 房间与成员关系管理
pub struct RoomService {
    deps: RoomServiceDependencies,
}

impl RoomService {
    pub fn new(deps: RoomServiceDependencies) -> Self {
        Self { deps }
    }

    pub async fn create_room(
        &self,
        owner_id: UserId,
        request: CreateRoomRequest,
    ) -> Result<Room, ApplicationError> {
        let now = self.deps.clock.now();
        let room = Room::new_group(
            RoomId::generate(),
            request.name,
            request.description,
            request.room_type,
            owner_id,
            now,
        )?;
        let owner = RoomMember::new(room.id, owner_id, RoomRole::Owner, now);

        let stored = self
            .deps
            .room_repository
            .create_with_owner(room, owner)
            .await?;
        self.deps.broadcaster.subscribe_user(owner_id, stored.id).await;

        info!(room_id = %stored.id, owner_id = %owner_id, room_type = ?stored.room_type, "房间创建成功");
        Ok(stored)
    }

    /// 同一对用户只会有一个私聊房间，参数顺序无关
    pub async fn create_dm(
        &self,
        user_id: UserId,
        target_user_id: UserId,
    ) -> Result<Room, ApplicationError> {
        if user_id == target_user_id {
            return Err(DomainError::invalid_argument(
                "target_user_id",
                "cannot open a direct message with yourself",
            )
            .into());
        }
        if self
            .deps
            .user_repository
            .find_by_id(target_user_id)
            .await?
            .is_none()
        {
            return Err(DomainError::UserNotFound.into());
        }

        if let Some(existing) = self
            .deps
            .room_repository
            .find_dm_room(user_id, target_user_id)
            .await?
        {
            return Ok(existing);
        }

        let now = self.deps.clock.now();
        let room = Room::new_dm(RoomId::generate(), user_id, target_user_id, now)?;
        let members = vec![
            RoomMember::new(room.id, user_id, RoomRole::Member, now),
            RoomMember::new(room.id, target_user_id, RoomRole::Member, now),
        ];
        let (room, changed) = self
            .deps
            .room_repository
            .find_or_create_dm(room, members)
            .await?;

        // 新建或补回成员后双方都需要订阅房间频道
        if changed {
            self.deps.broadcaster.subscribe_user(user_id, room.id).await;
            self.deps
                .broadcaster
                .subscribe_user(target_user_id, room.id)
                .await;
            info!(room_id = %room.id, "私聊房间已就绪");
        }
        Ok(room)
    }

    pub async fn join_room(
        &self,
        user_id: UserId,
        room_id: RoomId,
    ) -> Result<RoomMember, ApplicationError> {
        let room = self.find_room(room_id).await?;
        if !room.is_joinable() {
            return Err(DomainError::RoomNotJoinable.into());
        }
        if self
            .deps
            .room_repository
            .find_member(room_id, user_id)
            .await?
            .is_some()
        {
            return Err(DomainError::AlreadyRoomMember.into());
        }
        let user = self.find_user(user_id).await?;

        let member = RoomMember::new(room_id, user_id, RoomRole::Member, self.deps.clock.now());
        let member = self
            .deps
            .room_repository
            .add_member(member)
            .await
            .map_err(|err| match err {
                RepositoryError::Conflict { .. } => DomainError::AlreadyRoomMember.into(),
                other => ApplicationError::from(other),
            })?;

        self.deps.broadcaster.subscribe_user(user_id, room_id).await;
        self.publish(
            room_id,
            ServerEvent::RoomUserJoined(RoomMembershipPayload {
                room_id,
                user_id,
                username: user.username.to_string(),
            }),
        )
        .await;

        Ok(member)
    }

    pub async fn leave_room(
        &self,
        user_id: UserId,
        room_id: RoomId,
    ) -> Result<LeaveOutcome, ApplicationError> {
        let member = self
            .deps
            .room_repository
            .find_member(room_id, user_id)
            .await?
            .ok_or(DomainError::MembershipNotFound)?;
        let members = self.deps.room_repository.find_members(room_id).await?;

        if members.iter().all(|m| m.user_id == user_id) {
            self.deps.room_repository.delete_room(room_id).await?;
            self.deps.broadcaster.drop_room(room_id).await;
            info!(room_id = %room_id, "最后一名成员离开，房间已删除");
            return Ok(LeaveOutcome::RoomDeleted);
        }

        let mut outcome = LeaveOutcome::Left;
        if member.is_owner() {
            if let Some(successor) = choose_successor(&members, user_id) {
                self.deps
                    .room_repository
                    .update_member_role(room_id, successor.user_id, RoomRole::Owner)
                    .await?;
                info!(room_id = %room_id, new_owner_id = %successor.user_id, "房主离开，所有权已转移");
                outcome = LeaveOutcome::OwnershipTransferred {
                    new_owner_id: successor.user_id,
                };
            }
        }
        self.deps
            .room_repository
            .remove_member(room_id, user_id)
            .await?;

        let username = self
            .deps
            .user_repository
            .find_by_id(user_id)
            .await?
            .map(|user| user.username.to_string())
            .unwrap_or_default();
        self.publish(
            room_id,
            ServerEvent::RoomUserLeft(RoomMembershipPayload {
                room_id,
                user_id,
                username,
            }),
        )
        .await;
        self.deps.broadcaster.unsubscribe_user(user_id, room_id).await;

        Ok(outcome)
    }

    /// 只有房主可以删除房间
    pub async fn delete_room(&self, user_id: UserId, room_id: RoomId) -> Result<(), ApplicationError> {
        self.find_room(room_id).await?;
        let member = self
            .deps
            .room_repository
            .find_member(room_id, user_id)
            .await?
            .ok_or(DomainError::NotRoomMember)?;
        if !member.is_owner() {
            return Err(DomainError::InsufficientPermissions.into());
        }

        self.deps.room_repository.delete_room(room_id).await?;
        self.deps.broadcaster.drop_room(room_id).await;
        info!(room_id = %room_id, user_id = %user_id, "房间已删除");
        Ok(())
    }

    pub async fn find_public_rooms(&self) -> Result<Vec<Room>, ApplicationError> {
        Ok(self.deps.room_repository.find_public_rooms().await?)
    }

    pub async fn find_room(&self, room_id: RoomId) -> Result<Room, ApplicationError> {
        self.deps
            .room_repository
            .find_by_id(room_id)
            .await?
            .ok_or_else(|| DomainError::RoomNotFound.into())
    }

    pub async fn find_members(&self, room_id: RoomId) -> Result<Vec<RoomMember>, ApplicationError> {
        self.find_room(room_id).await?;
        Ok(self.deps.room_repository.find_members(room_id).await?)
    }

    /// 用户当前加入的所有房间，网关建立连接时据此订阅广播组
    pub async fn memberships_for(&self, user_id: UserId) -> Result<Vec<RoomMember>, ApplicationError> {
        Ok(self.deps.room_repository.find_memberships(user_id).await?)
    }

    async fn find_user(&self, user_id: UserId) -> Result<User, ApplicationError> {
        self.deps
            .user_repository
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| DomainError::UserNotFound.into())
    }

    async fn publish(&self, room_id: RoomId, event: ServerEvent) {
        let name = event.name();
        if let Err(err) = self.deps.broadcaster.broadcast_to_room(room_id, event).await {
            warn!(room_id = %room_id, event = name, error = %err, "房间事件推送失败");
        }
    }
}

//! 服务单元测试共用的替身

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use domain::{
    Message, MessageContent, MessageId, MessageType, PasswordHash, RoomId, RoomMember, RoomRole,
    Timestamp, TokenDigest, User, UserEmail, UserId, Username,
};

use crate::broadcaster::{BroadcastError, EventBroadcaster, ServerEvent};
use crate::clock::Clock;
use crate::jobs::{JobRequest, QueueError, TaskQueue};
use crate::token::{AuthIdentity, TokenError, TokenService};

pub fn fixed_now() -> Timestamp {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

pub struct FixedClock(pub Timestamp);

impl Default for FixedClock {
    fn default() -> Self {
        Self(fixed_now())
    }
}

impl Clock for FixedClock {
    fn now(&self) -> Timestamp {
        self.0
    }
}

pub fn user(name: &str) -> User {
    User::register(
        UserId::generate(),
        Username::parse(name).unwrap(),
        UserEmail::parse(format!("{name}@example.com")).unwrap(),
        PasswordHash::new("$2b$04$hash").unwrap(),
        fixed_now(),
    )
}

pub fn member(room_id: RoomId, user_id: UserId, role: RoomRole) -> RoomMember {
    RoomMember::new(room_id, user_id, role, fixed_now())
}

pub fn message(room_id: RoomId, sender_id: UserId, text: &str) -> Message {
    Message::new(
        MessageId::generate(),
        room_id,
        sender_id,
        MessageContent::new(text).unwrap(),
        MessageType::Text,
        fixed_now(),
    )
}

/// 可预测的令牌服务：访问令牌即 `access:<user_id>`，摘要为原文哈希
#[derive(Default)]
pub struct FakeTokenService {
    counter: AtomicU64,
}

impl TokenService for FakeTokenService {
    fn issue_access_token(&self, user: &User) -> Result<String, TokenError> {
        Ok(format!("access:{}", user.id))
    }

    fn verify_access_token(&self, token: &str) -> Result<AuthIdentity, TokenError> {
        let id = token
            .strip_prefix("access:")
            .and_then(|raw| raw.parse::<uuid::Uuid>().ok())
            .ok_or(TokenError::Invalid)?;
        Ok(AuthIdentity {
            user_id: UserId::from(id),
            email: String::new(),
            username: String::new(),
        })
    }

    fn access_token_ttl_secs(&self) -> i64 {
        900
    }

    fn generate_refresh_secret(&self) -> String {
        format!("refresh-{}", self.counter.fetch_add(1, Ordering::SeqCst))
    }

    fn digest_refresh_secret(&self, raw: &str) -> Result<TokenDigest, TokenError> {
        let mut hasher = DefaultHasher::new();
        raw.hash(&mut hasher);
        TokenDigest::new(format!("{:064x}", hasher.finish())).map_err(|_| TokenError::Invalid)
    }
}

/// 记录所有推送，`online` 中的用户视为在线
#[derive(Default)]
pub struct RecordingBroadcaster {
    pub online: Mutex<Vec<UserId>>,
    pub room_events: Mutex<Vec<(RoomId, ServerEvent)>>,
    pub user_events: Mutex<Vec<(UserId, ServerEvent)>>,
    pub subscriptions: Mutex<Vec<(UserId, RoomId)>>,
    pub dropped_rooms: Mutex<Vec<RoomId>>,
}

impl RecordingBroadcaster {
    pub fn with_online(users: &[UserId]) -> Arc<Self> {
        let broadcaster = Self::default();
        broadcaster.online.lock().unwrap().extend_from_slice(users);
        Arc::new(broadcaster)
    }

    pub fn room_event_names(&self) -> Vec<&'static str> {
        self.room_events
            .lock()
            .unwrap()
            .iter()
            .map(|(_, event)| event.name())
            .collect()
    }
}

#[async_trait]
impl EventBroadcaster for RecordingBroadcaster {
    async fn broadcast_to_room(
        &self,
        room_id: RoomId,
        event: ServerEvent,
    ) -> Result<usize, BroadcastError> {
        self.room_events.lock().unwrap().push((room_id, event));
        Ok(1)
    }

    async fn send_to_user(
        &self,
        user_id: UserId,
        event: ServerEvent,
    ) -> Result<bool, BroadcastError> {
        let online = self.online.lock().unwrap().contains(&user_id);
        if online {
            self.user_events.lock().unwrap().push((user_id, event));
        }
        Ok(online)
    }

    async fn broadcast_to_all(&self, _event: ServerEvent) -> Result<usize, BroadcastError> {
        Ok(0)
    }

    async fn subscribe_user(&self, user_id: UserId, room_id: RoomId) {
        self.subscriptions.lock().unwrap().push((user_id, room_id));
    }

    async fn unsubscribe_user(&self, user_id: UserId, room_id: RoomId) {
        self.subscriptions
            .lock()
            .unwrap()
            .retain(|entry| *entry != (user_id, room_id));
    }

    async fn drop_room(&self, room_id: RoomId) {
        self.dropped_rooms.lock().unwrap().push(room_id);
    }
}

/// 只记录入队请求的任务队列
#[derive(Default)]
pub struct RecordingQueue {
    pub jobs: Mutex<Vec<JobRequest>>,
}

#[async_trait]
impl TaskQueue for RecordingQueue {
    async fn enqueue(&self, job: JobRequest) -> Result<u64, QueueError> {
        let mut jobs = self.jobs.lock().unwrap();
        jobs.push(job);
        Ok(jobs.len() as u64)
    }
}

//! 服务装配
//!
//! 二进制入口和集成测试共用同一套装配逻辑，只是存储后端与任务队列不同。

use std::sync::Arc;
use std::time::Duration;

use application::{
    services::{
        AuthServiceDependencies, MessageServiceDependencies, NotificationServiceDependencies,
        RoomServiceDependencies, UserServiceDependencies,
    },
    AuthService, Clock, EventBroadcaster, JobOptions, MessageService, NotificationService,
    PasswordHasher, RoomService, SystemClock, TaskQueue, TokenService, UserService,
};
use config::AppConfig;
use domain::{
    MessageRepository, NotificationRepository, RefreshTokenRepository, RoomRepository,
    UserRepository,
};
use infrastructure::{ConnectionRegistry, InMemoryStore, JwtTokenService, PgStorage};

use crate::state::AppState;

/// 服务层使用的仓储集合
#[derive(Clone)]
pub struct Repositories {
    pub users: Arc<dyn UserRepository>,
    pub rooms: Arc<dyn RoomRepository>,
    pub messages: Arc<dyn MessageRepository>,
    pub notifications: Arc<dyn NotificationRepository>,
    pub refresh_tokens: Arc<dyn RefreshTokenRepository>,
}

impl Repositories {
    pub fn postgres(storage: &PgStorage) -> Self {
        Self {
            users: storage.user_repository.clone(),
            rooms: storage.room_repository.clone(),
            messages: storage.message_repository.clone(),
            notifications: storage.notification_repository.clone(),
            refresh_tokens: storage.refresh_token_repository.clone(),
        }
    }

    pub fn memory(store: Arc<InMemoryStore>) -> Self {
        Self {
            users: store.clone(),
            rooms: store.clone(),
            messages: store.clone(),
            notifications: store.clone(),
            refresh_tokens: store,
        }
    }
}

/// 外部适配器
pub struct Adapters {
    pub password_hasher: Arc<dyn PasswordHasher>,
    pub task_queue: Arc<dyn TaskQueue>,
}

pub fn build_state(config: &AppConfig, repositories: Repositories, adapters: Adapters) -> AppState {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let token_service: Arc<dyn TokenService> = Arc::new(JwtTokenService::new(&config.jwt));
    let registry = Arc::new(ConnectionRegistry::new());
    let broadcaster: Arc<dyn EventBroadcaster> = registry.clone();

    let auth_service = AuthService::new(AuthServiceDependencies {
        user_repository: repositories.users.clone(),
        refresh_token_repository: repositories.refresh_tokens.clone(),
        password_hasher: adapters.password_hasher,
        token_service,
        clock: clock.clone(),
    });

    let user_service = UserService::new(UserServiceDependencies {
        user_repository: repositories.users.clone(),
        task_queue: adapters.task_queue.clone(),
        clock: clock.clone(),
        avatar_cleanup: JobOptions::avatar_cleanup(&config.jobs),
    });

    let room_service = RoomService::new(RoomServiceDependencies {
        room_repository: repositories.rooms.clone(),
        user_repository: repositories.users.clone(),
        broadcaster: broadcaster.clone(),
        clock: clock.clone(),
    });

    let notification_service = Arc::new(NotificationService::new(
        NotificationServiceDependencies {
            notification_repository: repositories.notifications.clone(),
            room_repository: repositories.rooms.clone(),
            user_repository: repositories.users.clone(),
            broadcaster: broadcaster.clone(),
            task_queue: adapters.task_queue,
            clock: clock.clone(),
            offline_email: JobOptions::offline_email(&config.jobs),
        },
    ));

    let message_service = MessageService::new(MessageServiceDependencies {
        message_repository: repositories.messages,
        room_repository: repositories.rooms,
        user_repository: repositories.users,
        notifications: notification_service.clone(),
        broadcaster,
        clock,
    });

    AppState {
        auth_service: Arc::new(auth_service),
        user_service: Arc::new(user_service),
        room_service: Arc::new(room_service),
        message_service: Arc::new(message_service),
        notification_service,
        registry,
        ws_auth_timeout: Duration::from_secs(config.websocket.auth_timeout_secs),
    }
}

use std::sync::Arc;
use std::time::Duration;

use application::{AuthService, MessageService, NotificationService, RoomService, UserService};
use infrastructure::ConnectionRegistry;

#[derive(Clone)]
pub struct AppState {
    pub auth_service: Arc<AuthService>,
    pub user_service: Arc<UserService>,
    pub room_service: Arc<RoomService>,
    pub message_service: Arc<MessageService>,
    pub notification_service: Arc<NotificationService>,
    /// 与各服务共享的实时连接注册表
    pub registry: Arc<ConnectionRegistry>,
    /// 未携带令牌的 WebSocket 连接等待 auth 事件的时间
    pub ws_auth_timeout: Duration,
}

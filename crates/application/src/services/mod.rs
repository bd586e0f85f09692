mod auth_service;
mod message_service;
mod notification_service;
mod room_service;
mod user_service;

#[cfg(test)]
mod test_support;


pub use auth_service::{
    AuthService, AuthServiceDependencies, AuthSession, LoginRequest, RegisterUserRequest,
};
pub use message_service::{
    GetMessagesQuery, MessagePage, MessageService, MessageServiceDependencies,
    SendMessageRequest, DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT,
};
pub use notification_service::{NotificationService, NotificationServiceDependencies};
pub use room_service::{
    CreateRoomRequest, LeaveOutcome, RoomService, RoomServiceDependencies,
};
pub use user_service::{UpdateProfileRequest, UserService, UserServiceDependencies};

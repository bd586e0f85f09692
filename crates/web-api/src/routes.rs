use axum::{
    extract::{FromRequest, FromRequestParts, Path, Query, Request, State},
    http::{request::Parts, StatusCode},
    routing::{get, patch, post, put},
    Json, Router,
};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{json, Value as JsonValue};
use uuid::Uuid;
use validator::Validate;

use application::services::{
    AuthSession, CreateRoomRequest, GetMessagesQuery, LeaveOutcome, LoginRequest, MessagePage,
    RegisterUserRequest, SendMessageRequest, UpdateProfileRequest,
};
use domain::{
    Message, MessageId, MessageRead, MessageType, Notification, NotificationId, Room, RoomId,
    RoomMember, RoomType, User, UserId,
};

use crate::{auth::AuthUser, error::ApiError, state::AppState, websocket};

/// 反序列化后再执行 `validator` 校验的 JSON 请求体
pub struct ValidatedJson<T>(pub T);

impl<T, S> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection| ApiError::bad_request(rejection.body_text()))?;
        value.validate()?;
        Ok(Self(value))
    }
}

/// 路径参数，解析失败时返回统一的错误体
pub struct ApiPath<T>(pub T);

impl<T, S> FromRequestParts<S> for ApiPath<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(value) = Path::<T>::from_request_parts(parts, state)
            .await
            .map_err(|rejection| ApiError::bad_request(rejection.body_text()))?;
        Ok(Self(value))
    }
}

/// 查询参数，解析失败时返回统一的错误体
pub struct ApiQuery<T>(pub T);

impl<T, S> FromRequestParts<S> for ApiQuery<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(value) = Query::<T>::from_request_parts(parts, state)
            .await
            .map_err(|rejection| ApiError::bad_request(rejection.body_text()))?;
        Ok(Self(value))
    }
}

#[derive(Debug, Deserialize, Validate)]
struct RegisterPayload {
    #[validate(length(min = 1, max = 254))]
    email: String,
    #[validate(length(min = 1, max = 64))]
    username: String,
    #[validate(length(min = 1, max = 128))]
    password: String,
}

#[derive(Debug, Deserialize, Validate)]
struct LoginPayload {
    #[validate(length(min = 1, max = 254))]
    email: String,
    #[validate(length(min = 1, max = 128))]
    password: String,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct RefreshPayload {
    #[validate(length(min = 1))]
    refresh_token: String,
}

#[derive(Debug, Deserialize, Validate)]
struct UpdateProfilePayload {
    #[validate(length(min = 1, max = 64))]
    username: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct AvatarPayload {
    #[validate(url)]
    avatar_url: String,
}

#[derive(Debug, Deserialize, Validate)]
struct CreateRoomPayload {
    #[validate(length(min = 1, max = 100))]
    name: String,
    description: Option<String>,
    #[serde(rename = "type", default = "default_room_type")]
    room_type: RoomType,
}

fn default_room_type() -> RoomType {
    RoomType::Public
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct CreateDmPayload {
    target_user_id: Uuid,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct SendMessagePayload {
    room_id: Uuid,
    content: String,
    #[serde(rename = "type", default)]
    message_type: MessageType,
}

#[derive(Debug, Deserialize, Validate)]
struct EditMessagePayload {
    content: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessagesQuery {
    room_id: Uuid,
    limit: Option<u32>,
    cursor: Option<Uuid>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .nest("/api/v1", api_routes())
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register_user))
        .route("/auth/login", post(login_user))
        .route("/auth/refresh", post(refresh_tokens))
        .route("/auth/logout", post(logout_user))
        .route("/users/me", get(get_me).patch(update_me))
        .route("/users/me/avatar", put(set_avatar).delete(clear_avatar))
        .route("/rooms", post(create_room).get(list_public_rooms))
        .route("/rooms/dm", post(create_dm))
        .route("/rooms/{room_id}", get(get_room).delete(delete_room))
        .route("/rooms/{room_id}/members", get(list_members))
        .route("/rooms/{room_id}/join", post(join_room))
        .route("/rooms/{room_id}/leave", post(leave_room))
        .route("/messages", post(send_message).get(get_messages))
        .route(
            "/messages/{message_id}",
            patch(edit_message).delete(delete_message),
        )
        .route("/messages/{message_id}/read", post(mark_message_read))
        .route("/notifications", get(list_notifications))
        .route("/notifications/read-all", patch(mark_all_notifications_read))
        .route(
            "/notifications/{notification_id}/read",
            patch(mark_notification_read),
        )
        .route("/ws", get(websocket::websocket_upgrade))
}

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn register_user(
    State(state): State<AppState>,
    ValidatedJson(payload): ValidatedJson<RegisterPayload>,
) -> Result<(StatusCode, Json<User>), ApiError> {
    let user = state
        .auth_service
        .register(RegisterUserRequest {
            email: payload.email,
            username: payload.username,
            password: payload.password,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(user)))
}

async fn login_user(
    State(state): State<AppState>,
    ValidatedJson(payload): ValidatedJson<LoginPayload>,
) -> Result<Json<AuthSession>, ApiError> {
    let session = state
        .auth_service
        .login(LoginRequest {
            email: payload.email,
            password: payload.password,
        })
        .await?;

    Ok(Json(session))
}

async fn refresh_tokens(
    State(state): State<AppState>,
    ValidatedJson(payload): ValidatedJson<RefreshPayload>,
) -> Result<Json<AuthSession>, ApiError> {
    let session = state.auth_service.refresh(&payload.refresh_token).await?;
    Ok(Json(session))
}

async fn logout_user(
    State(state): State<AppState>,
    ValidatedJson(payload): ValidatedJson<RefreshPayload>,
) -> Result<StatusCode, ApiError> {
    state.auth_service.logout(&payload.refresh_token).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_me(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<User>, ApiError> {
    Ok(Json(state.user_service.get_profile(user.id()).await?))
}

async fn update_me(
    State(state): State<AppState>,
    user: AuthUser,
    ValidatedJson(payload): ValidatedJson<UpdateProfilePayload>,
) -> Result<Json<User>, ApiError> {
    let updated = state
        .user_service
        .update_profile(
            user.id(),
            UpdateProfileRequest {
                username: payload.username,
            },
        )
        .await?;
    Ok(Json(updated))
}

async fn set_avatar(
    State(state): State<AppState>,
    user: AuthUser,
    ValidatedJson(payload): ValidatedJson<AvatarPayload>,
) -> Result<Json<User>, ApiError> {
    let updated = state
        .user_service
        .set_avatar(user.id(), payload.avatar_url)
        .await?;
    Ok(Json(updated))
}

async fn clear_avatar(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<User>, ApiError> {
    Ok(Json(state.user_service.clear_avatar(user.id()).await?))
}

async fn create_room(
    State(state): State<AppState>,
    user: AuthUser,
    ValidatedJson(payload): ValidatedJson<CreateRoomPayload>,
) -> Result<(StatusCode, Json<Room>), ApiError> {
    let room = state
        .room_service
        .create_room(
            user.id(),
            CreateRoomRequest {
                name: payload.name,
                description: payload.description,
                room_type: payload.room_type,
            },
        )
        .await?;

    Ok((StatusCode::CREATED, Json(room)))
}

async fn list_public_rooms(
    State(state): State<AppState>,
    _user: AuthUser,
) -> Result<Json<Vec<Room>>, ApiError> {
    Ok(Json(state.room_service.find_public_rooms().await?))
}

async fn create_dm(
    State(state): State<AppState>,
    user: AuthUser,
    ValidatedJson(payload): ValidatedJson<CreateDmPayload>,
) -> Result<Json<Room>, ApiError> {
    let room = state
        .room_service
        .create_dm(user.id(), UserId::from(payload.target_user_id))
        .await?;
    Ok(Json(room))
}

async fn get_room(
    State(state): State<AppState>,
    _user: AuthUser,
    ApiPath(room_id): ApiPath<Uuid>,
) -> Result<Json<Room>, ApiError> {
    Ok(Json(state.room_service.find_room(RoomId::from(room_id)).await?))
}

async fn delete_room(
    State(state): State<AppState>,
    user: AuthUser,
    ApiPath(room_id): ApiPath<Uuid>,
) -> Result<StatusCode, ApiError> {
    state
        .room_service
        .delete_room(user.id(), RoomId::from(room_id))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_members(
    State(state): State<AppState>,
    _user: AuthUser,
    ApiPath(room_id): ApiPath<Uuid>,
) -> Result<Json<Vec<RoomMember>>, ApiError> {
    Ok(Json(
        state
            .room_service
            .find_members(RoomId::from(room_id))
            .await?,
    ))
}

async fn join_room(
    State(state): State<AppState>,
    user: AuthUser,
    ApiPath(room_id): ApiPath<Uuid>,
) -> Result<Json<RoomMember>, ApiError> {
    let member = state
        .room_service
        .join_room(user.id(), RoomId::from(room_id))
        .await?;
    Ok(Json(member))
}

async fn leave_room(
    State(state): State<AppState>,
    user: AuthUser,
    ApiPath(room_id): ApiPath<Uuid>,
) -> Result<Json<LeaveOutcome>, ApiError> {
    let outcome = state
        .room_service
        .leave_room(user.id(), RoomId::from(room_id))
        .await?;
    Ok(Json(outcome))
}

async fn send_message(
    State(state): State<AppState>,
    user: AuthUser,
    ValidatedJson(payload): ValidatedJson<SendMessagePayload>,
) -> Result<(StatusCode, Json<Message>), ApiError> {
    let message = state
        .message_service
        .send_message(
            user.id(),
            SendMessageRequest {
                room_id: RoomId::from(payload.room_id),
                content: payload.content,
                message_type: payload.message_type,
            },
        )
        .await?;

    Ok((StatusCode::CREATED, Json(message)))
}

async fn get_messages(
    State(state): State<AppState>,
    user: AuthUser,
    ApiQuery(query): ApiQuery<MessagesQuery>,
) -> Result<Json<MessagePage>, ApiError> {
    let page = state
        .message_service
        .get_messages(
            user.id(),
            GetMessagesQuery {
                room_id: RoomId::from(query.room_id),
                limit: query.limit,
                cursor: query.cursor.map(MessageId::from),
            },
        )
        .await?;

    Ok(Json(page))
}

async fn edit_message(
    State(state): State<AppState>,
    user: AuthUser,
    ApiPath(message_id): ApiPath<Uuid>,
    ValidatedJson(payload): ValidatedJson<EditMessagePayload>,
) -> Result<Json<Message>, ApiError> {
    let message = state
        .message_service
        .edit_message(user.id(), MessageId::from(message_id), payload.content)
        .await?;
    Ok(Json(message))
}

async fn delete_message(
    State(state): State<AppState>,
    user: AuthUser,
    ApiPath(message_id): ApiPath<Uuid>,
) -> Result<Json<JsonValue>, ApiError> {
    let room_id = state
        .message_service
        .delete_message(user.id(), MessageId::from(message_id))
        .await?;
    Ok(Json(json!({ "roomId": room_id })))
}

async fn mark_message_read(
    State(state): State<AppState>,
    user: AuthUser,
    ApiPath(message_id): ApiPath<Uuid>,
) -> Result<Json<MessageRead>, ApiError> {
    let read = state
        .message_service
        .mark_read(user.id(), MessageId::from(message_id))
        .await?;
    Ok(Json(read))
}

async fn list_notifications(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<Vec<Notification>>, ApiError> {
    Ok(Json(
        state.notification_service.get_for_user(user.id()).await?,
    ))
}

async fn mark_notification_read(
    State(state): State<AppState>,
    user: AuthUser,
    ApiPath(notification_id): ApiPath<Uuid>,
) -> Result<Json<Notification>, ApiError> {
    let notification = state
        .notification_service
        .mark_as_read(user.id(), NotificationId::from(notification_id))
        .await?;
    Ok(Json(notification))
}

async fn mark_all_notifications_read(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<JsonValue>, ApiError> {
    let updated = state.notification_service.mark_all_as_read(user.id()).await?;
    Ok(Json(json!({ "updated": updated })))
}

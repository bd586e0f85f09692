//! 实时网关：WebSocket 握手认证与会话循环
//!
//! 连接状态依次为 `Connecting → Authenticated → Closed`。令牌依次从
//! `Authorization` 头、`token` 查询参数中读取；都没有时，客户端必须在超时前
//! 发送 `{"event":"auth","data":{"token":"..."}}`。

use application::{AuthIdentity, EventBroadcaster, PresencePayload, ServerEvent, TypingPayload};
use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message as WsMessage, Utf8Bytes, WebSocket, WebSocketUpgrade},
        State,
    },
    http::HeaderMap,
    response::Response,
};
use domain::{PresenceStatus, RoomId};
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use infrastructure::ConnectionId;
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::{auth::bearer_token, routes::ApiQuery, state::AppState};

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    token: Option<String>,
}

/// 客户端可以发送的事件
#[derive(Debug, Deserialize)]
#[serde(tag = "event", content = "data")]
enum ClientEvent {
    #[serde(rename = "auth")]
    Auth { token: String },
    #[serde(rename = "user:typing")]
    Typing(TypingTarget),
    #[serde(rename = "user:stop-typing")]
    StopTyping(TypingTarget),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TypingTarget {
    room_id: RoomId,
}

pub async fn websocket_upgrade(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiQuery(query): ApiQuery<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let token = bearer_token(&headers)
        .map(str::to_owned)
        .or_else(|| query.token.filter(|token| !token.trim().is_empty()));
    ws.on_upgrade(move |socket| handle_socket(socket, state, token))
}

async fn handle_socket(mut socket: WebSocket, state: AppState, token: Option<String>) {
    let token = match token {
        Some(token) => Some(token),
        None => match tokio::time::timeout(state.ws_auth_timeout, await_auth_frame(&mut socket))
            .await
        {
            Ok(token) => token,
            Err(_) => {
                tracing::info!("WebSocket 认证超时");
                None
            }
        },
    };

    let identity = match token.map(|token| state.auth_service.verify_access_token(&token)) {
        Some(Ok(identity)) => identity,
        Some(Err(err)) => {
            tracing::info!(error = %err, "WebSocket 令牌无效");
            reject(socket).await;
            return;
        }
        None => {
            reject(socket).await;
            return;
        }
    };

    let session = GatewaySession::open(state, identity).await;
    session.run(socket).await;
}

/// 等待第一条 auth 事件；收到其它业务帧或连接关闭时返回 `None`
async fn await_auth_frame(socket: &mut WebSocket) -> Option<String> {
    while let Some(Ok(message)) = socket.recv().await {
        match message {
            WsMessage::Text(text) => {
                return match serde_json::from_str::<ClientEvent>(text.as_str()) {
                    Ok(ClientEvent::Auth { token }) => Some(token),
                    _ => None,
                };
            }
            WsMessage::Ping(data) => {
                if socket.send(WsMessage::Pong(data)).await.is_err() {
                    return None;
                }
            }
            WsMessage::Pong(_) => {}
            WsMessage::Binary(_) | WsMessage::Close(_) => return None,
        }
    }
    None
}

async fn reject(mut socket: WebSocket) {
    let frame = CloseFrame {
        code: close_code::POLICY,
        reason: Utf8Bytes::from_static("authentication failed"),
    };
    if let Err(err) = socket.send(WsMessage::Close(Some(frame))).await {
        tracing::debug!(error = %err, "发送关闭帧失败");
    }
}

/// 已认证的网关会话
struct GatewaySession {
    state: AppState,
    identity: AuthIdentity,
    connection_id: ConnectionId,
    events: mpsc::UnboundedReceiver<ServerEvent>,
}

impl GatewaySession {
    /// 注册连接、订阅所属房间、标记在线并广播上线事件
    async fn open(state: AppState, identity: AuthIdentity) -> Self {
        let user_id = identity.user_id;
        let handle = state.registry.register(user_id).await;

        match state.room_service.memberships_for(user_id).await {
            Ok(memberships) => {
                for membership in memberships {
                    state
                        .registry
                        .subscribe_connection(handle.id, membership.room_id)
                        .await;
                }
            }
            Err(err) => {
                tracing::warn!(user_id = %user_id, error = %err, "读取成员关系失败，连接不订阅任何房间");
            }
        }

        if let Err(err) = state
            .user_service
            .set_presence(user_id, PresenceStatus::Online)
            .await
        {
            tracing::warn!(user_id = %user_id, error = %err, "更新在线状态失败");
        }
        let online = ServerEvent::UserOnline(PresencePayload {
            user_id,
            username: identity.username.clone(),
        });
        if let Err(err) = state.registry.broadcast_to_all(online).await {
            tracing::warn!(user_id = %user_id, error = %err, "上线事件广播失败");
        }

        tracing::info!(user_id = %user_id, connection_id = %handle.id, "WebSocket 连接已认证");
        Self {
            state,
            identity,
            connection_id: handle.id,
            events: handle.events,
        }
    }

    async fn run(mut self, socket: WebSocket) {
        let (mut sender, mut incoming) = socket.split();

        loop {
            tokio::select! {
                outbound = self.events.recv() => {
                    let Some(event) = outbound else { break };
                    if !Self::forward(&mut sender, &event).await {
                        break;
                    }
                }
                inbound = incoming.next() => {
                    if !self.handle_incoming(inbound, &mut sender).await {
                        break;
                    }
                }
            }
        }

        self.close().await;
    }

    async fn forward(sender: &mut SplitSink<WebSocket, WsMessage>, event: &ServerEvent) -> bool {
        let payload = match serde_json::to_string(event) {
            Ok(json) => json,
            Err(err) => {
                tracing::warn!(event = event.name(), error = %err, "事件序列化失败");
                return true;
            }
        };
        sender.send(WsMessage::Text(payload.into())).await.is_ok()
    }

    /// 返回 `false` 表示连接应当结束
    async fn handle_incoming(
        &self,
        inbound: Option<Result<WsMessage, axum::Error>>,
        sender: &mut SplitSink<WebSocket, WsMessage>,
    ) -> bool {
        match inbound {
            Some(Ok(WsMessage::Text(text))) => {
                self.handle_client_event(text.as_str()).await;
                true
            }
            Some(Ok(WsMessage::Ping(data))) => sender.send(WsMessage::Pong(data)).await.is_ok(),
            Some(Ok(WsMessage::Pong(_) | WsMessage::Binary(_))) => true,
            Some(Ok(WsMessage::Close(_))) | None => false,
            Some(Err(err)) => {
                tracing::debug!(connection_id = %self.connection_id, error = %err, "WebSocket 读取失败");
                false
            }
        }
    }

    async fn handle_client_event(&self, text: &str) {
        let event = match serde_json::from_str::<ClientEvent>(text) {
            Ok(event) => event,
            Err(err) => {
                tracing::debug!(connection_id = %self.connection_id, error = %err, "忽略无法识别的客户端事件");
                return;
            }
        };

        let (room_id, typing) = match event {
            ClientEvent::Typing(target) => (target.room_id, true),
            ClientEvent::StopTyping(target) => (target.room_id, false),
            ClientEvent::Auth { .. } => return,
        };

        // 只转发给发送方自己已订阅的房间
        if !self
            .state
            .registry
            .is_subscribed(self.connection_id, room_id)
            .await
        {
            tracing::debug!(connection_id = %self.connection_id, room_id = %room_id, "未订阅的房间，忽略输入状态");
            return;
        }

        let payload = TypingPayload {
            user_id: self.identity.user_id,
            username: self.identity.username.clone(),
            room_id,
        };
        let event = if typing {
            ServerEvent::UserTyping(payload)
        } else {
            ServerEvent::UserStopTyping(payload)
        };
        self.state
            .registry
            .relay_to_room(room_id, self.connection_id, event)
            .await;
    }

    /// 注销连接；用户最后一个连接断开时标记离线并广播
    async fn close(self) {
        let user_id = self.identity.user_id;
        let Some(departure) = self.state.registry.unregister(self.connection_id).await else {
            return;
        };

        // 仍有其它连接时用户保持在线，注册表已把可寻址连接改指向剩余连接
        if !departure.still_connected {
            if let Err(err) = self
                .state
                .user_service
                .set_presence(user_id, PresenceStatus::Offline)
                .await
            {
                tracing::warn!(user_id = %user_id, error = %err, "更新离线状态失败");
            }
            let offline = ServerEvent::UserOffline(PresencePayload {
                user_id,
                username: self.identity.username.clone(),
            });
            if let Err(err) = self.state.registry.broadcast_to_all(offline).await {
                tracing::warn!(user_id = %user_id, error = %err, "下线事件广播失败");
            }
        }

        tracing::info!(user_id = %user_id, connection_id = %self.connection_id, "WebSocket 连接已断开");
    }
}

#![allow(dead_code)]

use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use config::{AppConfig, StorageBackend};
use infrastructure::{BcryptPasswordHasher, InMemoryStore, InProcessTaskQueue};
use serde_json::{json, Value};
use tokio::{net::TcpListener, sync::oneshot};
use tower::ServiceExt;

use web_api::{build_state, router, Adapters, AppState, Repositories};

pub const PASSWORD: &str = "Secret123";

pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.storage.backend = StorageBackend::Memory;
    config.websocket.auth_timeout_secs = 1;
    config
}

/// 内存存储 + 低成本 bcrypt 的完整应用状态
pub fn build_test_state() -> AppState {
    let store = Arc::new(InMemoryStore::new());
    build_state(
        &test_config(),
        Repositories::memory(store),
        Adapters {
            password_hasher: Arc::new(BcryptPasswordHasher::new(4)),
            task_queue: Arc::new(InProcessTaskQueue::new().with_default_handlers()),
        },
    )
}

pub fn build_router() -> Router {
    router(build_test_state())
}

/// 通过 `oneshot` 发送一个 JSON 请求，返回状态码与响应体
pub async fn call(
    app: &Router,
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string())),
        None => builder.body(Body::empty()),
    }
    .expect("request");

    let response = app.clone().oneshot(request).await.expect("response");
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

/// 已登录的测试用户
pub struct Session {
    pub user_id: String,
    pub username: String,
    pub access_token: String,
    pub refresh_token: String,
}

pub async fn register_and_login(app: &Router, username: &str) -> Session {
    let email = format!("{username}@example.com");
    let (status, _) = call(
        app,
        Method::POST,
        "/api/v1/auth/register",
        None,
        Some(json!({ "email": email, "username": username, "password": PASSWORD })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "register {username}");

    let (status, body) = call(
        app,
        Method::POST,
        "/api/v1/auth/login",
        None,
        Some(json!({ "email": email, "password": PASSWORD })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "login {username}");

    Session {
        user_id: body["user"]["id"].as_str().expect("user id").to_owned(),
        username: username.to_owned(),
        access_token: body["accessToken"].as_str().expect("access token").to_owned(),
        refresh_token: body["refreshToken"]
            .as_str()
            .expect("refresh token")
            .to_owned(),
    }
}

pub async fn create_public_room(app: &Router, owner: &Session, name: &str) -> String {
    let (status, body) = call(
        app,
        Method::POST,
        "/api/v1/rooms",
        Some(&owner.access_token),
        Some(json!({ "name": name, "type": "public" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "create room");
    body["id"].as_str().expect("room id").to_owned()
}

/// 在随机端口上启动服务，返回地址和关闭信号
pub async fn spawn_server(app: Router) -> (SocketAddr, oneshot::Sender<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    tokio::spawn(async move {
        axum::serve(listener, app.into_make_service())
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
            .ok();
    });

    // allow server to start
    tokio::time::sleep(Duration::from_millis(50)).await;
    (addr, shutdown_tx)
}

pub type WsClient = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// 通过 `token` 查询参数连接网关
pub async fn connect_ws(addr: SocketAddr, token: &str) -> WsClient {
    let url = format!("ws://{addr}/api/v1/ws?token={token}");
    let (ws, _) = tokio_tungstenite::connect_async(url)
        .await
        .expect("websocket connect");
    ws
}

/// 读取下一条指定名称的事件，跳过其它事件
pub async fn next_event(ws: &mut WsClient, name: &str) -> Value {
    use futures_util::StreamExt;
    use tokio_tungstenite::tungstenite::Message;

    let deadline = Duration::from_secs(3);
    tokio::time::timeout(deadline, async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => {
                    let frame: Value = serde_json::from_str(text.as_str()).expect("json frame");
                    if frame["event"] == name {
                        return frame["data"].clone();
                    }
                }
                Some(Ok(_)) => continue,
                other => panic!("connection ended while waiting for {name}: {other:?}"),
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {name}"))
}

/// 在给定时间内不应收到指定事件
pub async fn assert_no_event(ws: &mut WsClient, name: &str, wait: Duration) {
    use futures_util::StreamExt;
    use tokio_tungstenite::tungstenite::Message;

    let result = tokio::time::timeout(wait, async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => {
                    let frame: Value = serde_json::from_str(text.as_str()).expect("json frame");
                    if frame["event"] == name {
                        return frame;
                    }
                }
                Some(Ok(_)) => continue,
                _ => return Value::Null,
            }
        }
    })
    .await;
    if let Ok(frame) = result {
        assert!(frame.is_null(), "unexpected {name}: {frame}");
    }
}

pub async fn send_event(ws: &mut WsClient, event: &str, data: Value) {
    use futures_util::SinkExt;
    use tokio_tungstenite::tungstenite::Message;

    ws.send(Message::text(json!({ "event": event, "data": data }).to_string()))
        .await
        .expect("send frame");
}

/// 连接网关并等待自己的上线事件，此时所属房间已经订阅完成
pub async fn connect_online(addr: SocketAddr, session: &Session) -> WsClient {
    let mut ws = connect_ws(addr, &session.access_token).await;
    loop {
        let data = next_event(&mut ws, "user:online").await;
        if data["userId"] == session.user_id.as_str() {
            return ws;
        }
    }
}

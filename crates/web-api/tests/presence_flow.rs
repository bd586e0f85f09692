mod support;

use std::time::Duration;

use axum::http::{Method, StatusCode};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio_tungstenite::tungstenite::{protocol::frame::coding::CloseCode, Message};

use support::{
    assert_no_event, build_router, call, connect_online, connect_ws, next_event,
    register_and_login, send_event, spawn_server, WsClient,
};

async fn status_of(app: &axum::Router, token: &str) -> String {
    let (status, body) = call(app, Method::GET, "/api/v1/users/me", Some(token), None).await;
    assert_eq!(status, StatusCode::OK);
    body["status"].as_str().unwrap_or_default().to_owned()
}

/// 等待服务端关闭连接，返回关闭码
async fn expect_close(ws: &mut WsClient) -> Option<CloseCode> {
    tokio::time::timeout(Duration::from_secs(3), async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Close(frame))) => return frame.map(|f| f.code),
                Some(Ok(_)) => continue,
                _ => return None,
            }
        }
    })
    .await
    .expect("server should close the connection")
}

#[tokio::test]
async fn presence_changes_are_broadcast() {
    let app = build_router();
    let (addr, shutdown) = spawn_server(app.clone()).await;

    let alice = register_and_login(&app, "alice").await;
    let bob = register_and_login(&app, "bob").await;
    assert_eq!(status_of(&app, &alice.access_token).await, "offline");

    let mut bob_ws = connect_online(addr, &bob).await;
    let mut alice_ws = connect_online(addr, &alice).await;

    let online = next_event(&mut bob_ws, "user:online").await;
    assert_eq!(online, json!({ "userId": alice.user_id, "username": "alice" }));
    assert_eq!(status_of(&app, &alice.access_token).await, "online");

    alice_ws.close(None).await.expect("close");
    let offline = next_event(&mut bob_ws, "user:offline").await;
    assert_eq!(offline["userId"], alice.user_id.as_str());
    assert_eq!(status_of(&app, &alice.access_token).await, "offline");

    let _ = shutdown.send(());
}

#[tokio::test]
async fn second_connection_keeps_user_online() {
    let app = build_router();
    let (addr, shutdown) = spawn_server(app.clone()).await;

    let alice = register_and_login(&app, "alice").await;
    let bob = register_and_login(&app, "bob").await;

    let mut bob_ws = connect_online(addr, &bob).await;
    let mut first = connect_online(addr, &alice).await;
    let mut second = connect_online(addr, &alice).await;

    first.close(None).await.expect("close first");
    assert_no_event(&mut bob_ws, "user:offline", Duration::from_millis(300)).await;
    assert_eq!(status_of(&app, &alice.access_token).await, "online");

    second.close(None).await.expect("close second");
    let offline = next_event(&mut bob_ws, "user:offline").await;
    assert_eq!(offline["userId"], alice.user_id.as_str());

    let _ = shutdown.send(());
}

#[tokio::test]
async fn first_frame_authentication_is_accepted() {
    let app = build_router();
    let (addr, shutdown) = spawn_server(app.clone()).await;
    let alice = register_and_login(&app, "alice").await;

    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/api/v1/ws"))
        .await
        .expect("websocket connect");
    send_event(&mut ws, "auth", json!({ "token": alice.access_token })).await;

    let online = next_event(&mut ws, "user:online").await;
    assert_eq!(online["userId"], alice.user_id.as_str());

    let _ = shutdown.send(());
}

#[tokio::test]
async fn invalid_token_closes_connection() {
    let app = build_router();
    let (addr, shutdown) = spawn_server(app.clone()).await;

    let mut ws = connect_ws(addr, "not-a-jwt").await;
    assert_eq!(expect_close(&mut ws).await, Some(CloseCode::Policy));

    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/api/v1/ws"))
        .await
        .expect("websocket connect");
    ws.send(Message::text(r#"{"event":"user:typing","data":{}}"#))
        .await
        .expect("send");
    assert_eq!(expect_close(&mut ws).await, Some(CloseCode::Policy));

    let _ = shutdown.send(());
}

#[tokio::test]
async fn missing_auth_frame_times_out() {
    let app = build_router();
    let (addr, shutdown) = spawn_server(app.clone()).await;

    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/api/v1/ws"))
        .await
        .expect("websocket connect");
    assert_eq!(expect_close(&mut ws).await, Some(CloseCode::Policy));

    let _ = shutdown.send(());
}

mod support;

use std::time::Duration;

use axum::http::{Method, StatusCode};
use reqwest::Client;
use serde_json::json;

use support::{
    assert_no_event, build_router, call, connect_online, create_public_room, next_event,
    register_and_login, send_event, spawn_server,
};

#[tokio::test]
async fn websocket_broadcast_flow() {
    let app = build_router();
    let (addr, shutdown) = spawn_server(app.clone()).await;
    let base_http = format!("http://{addr}");
    let client = Client::new();

    let health = client
        .get(format!("{base_http}/health"))
        .send()
        .await
        .expect("health");
    assert_eq!(health.status(), reqwest::StatusCode::OK);

    let alice = register_and_login(&app, "alice").await;
    let bob = register_and_login(&app, "bob").await;
    let room_id = create_public_room(&app, &alice, "general").await;
    call(
        &app,
        Method::POST,
        &format!("/api/v1/rooms/{room_id}/join"),
        Some(&bob.access_token),
        None,
    )
    .await;

    let mut alice_ws = connect_online(addr, &alice).await;
    let mut bob_ws = connect_online(addr, &bob).await;

    let sent = client
        .post(format!("{base_http}/api/v1/messages"))
        .bearer_auth(&alice.access_token)
        .json(&json!({ "roomId": room_id, "content": "hello" }))
        .send()
        .await
        .expect("send message");
    assert_eq!(sent.status(), reqwest::StatusCode::CREATED);
    let sent: serde_json::Value = sent.json().await.expect("message json");
    let message_id = sent["id"].as_str().unwrap().to_owned();

    let received = next_event(&mut bob_ws, "message:new").await;
    assert_eq!(received["id"], message_id.as_str());
    assert_eq!(received["content"], "hello");
    let echoed = next_event(&mut alice_ws, "message:new").await;
    assert_eq!(echoed["id"], message_id.as_str());

    // bob 在线，通知直接推送到他的连接
    let notification = next_event(&mut bob_ws, "notification:new").await;
    assert_eq!(notification["metadata"]["messageId"], message_id.as_str());

    let (status, _) = call(
        &app,
        Method::PATCH,
        &format!("/api/v1/messages/{message_id}"),
        Some(&alice.access_token),
        Some(json!({ "content": "hello, world" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let edited = next_event(&mut bob_ws, "message:edited").await;
    assert_eq!(edited["content"], "hello, world");
    assert_eq!(edited["isEdited"], true);

    call(
        &app,
        Method::DELETE,
        &format!("/api/v1/messages/{message_id}"),
        Some(&alice.access_token),
        None,
    )
    .await;
    let deleted = next_event(&mut bob_ws, "message:deleted").await;
    assert_eq!(deleted, json!({ "messageId": message_id, "roomId": room_id }));

    let _ = shutdown.send(());
}

#[tokio::test]
async fn typing_is_relayed_to_other_room_members_only() {
    let app = build_router();
    let (addr, shutdown) = spawn_server(app.clone()).await;

    let alice = register_and_login(&app, "alice").await;
    let bob = register_and_login(&app, "bob").await;
    let carol = register_and_login(&app, "carol").await;
    let room_id = create_public_room(&app, &alice, "general").await;
    call(
        &app,
        Method::POST,
        &format!("/api/v1/rooms/{room_id}/join"),
        Some(&bob.access_token),
        None,
    )
    .await;

    let mut alice_ws = connect_online(addr, &alice).await;
    let mut bob_ws = connect_online(addr, &bob).await;
    let mut carol_ws = connect_online(addr, &carol).await;

    send_event(&mut bob_ws, "user:typing", json!({ "roomId": room_id })).await;
    let typing = next_event(&mut alice_ws, "user:typing").await;
    assert_eq!(
        typing,
        json!({ "userId": bob.user_id, "username": "bob", "roomId": room_id })
    );

    send_event(&mut bob_ws, "user:stop-typing", json!({ "roomId": room_id })).await;
    let stopped = next_event(&mut alice_ws, "user:stop-typing").await;
    assert_eq!(stopped["userId"], bob.user_id.as_str());

    // carol 不是成员，她的输入状态被忽略，也收不到房间内的输入状态
    send_event(&mut carol_ws, "user:typing", json!({ "roomId": room_id })).await;
    assert_no_event(&mut alice_ws, "user:typing", Duration::from_millis(300)).await;
    assert_no_event(&mut carol_ws, "user:typing", Duration::from_millis(100)).await;
    assert_no_event(&mut bob_ws, "user:typing", Duration::from_millis(100)).await;

    let _ = shutdown.send(());
}

#[tokio::test]
async fn joining_subscribes_the_live_connection() {
    let app = build_router();
    let (addr, shutdown) = spawn_server(app.clone()).await;

    let alice = register_and_login(&app, "alice").await;
    let carol = register_and_login(&app, "carol").await;
    let room_id = create_public_room(&app, &alice, "general").await;

    let mut alice_ws = connect_online(addr, &alice).await;
    let mut carol_ws = connect_online(addr, &carol).await;

    call(
        &app,
        Method::POST,
        &format!("/api/v1/rooms/{room_id}/join"),
        Some(&carol.access_token),
        None,
    )
    .await;
    let joined = next_event(&mut alice_ws, "room:user-joined").await;
    assert_eq!(
        joined,
        json!({ "roomId": room_id, "userId": carol.user_id, "username": "carol" })
    );

    call(
        &app,
        Method::POST,
        "/api/v1/messages",
        Some(&alice.access_token),
        Some(json!({ "roomId": room_id, "content": "welcome" })),
    )
    .await;
    let received = next_event(&mut carol_ws, "message:new").await;
    assert_eq!(received["content"], "welcome");

    call(
        &app,
        Method::POST,
        &format!("/api/v1/rooms/{room_id}/leave"),
        Some(&carol.access_token),
        None,
    )
    .await;
    let left = next_event(&mut alice_ws, "room:user-left").await;
    assert_eq!(left["userId"], carol.user_id.as_str());

    call(
        &app,
        Method::POST,
        "/api/v1/messages",
        Some(&alice.access_token),
        Some(json!({ "roomId": room_id, "content": "after leave" })),
    )
    .await;
    assert_no_event(&mut carol_ws, "message:new", Duration::from_millis(300)).await;

    let _ = shutdown.send(());
}

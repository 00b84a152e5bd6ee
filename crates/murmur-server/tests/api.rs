/// Integration tests: drive the full router (auth middleware included)
/// against an in-memory database.

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode, header};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

use murmur_api::auth::AppStateInner;
use murmur_api::messages::LATEST_MESSAGES_LIMIT;
use murmur_db::Database;
use murmur_gateway::dispatcher::Dispatcher;
use murmur_server::router;

fn app() -> Router {
    router(Arc::new(AppStateInner {
        db: Database::open_in_memory().unwrap(),
        jwt_secret: "integration-test-secret".into(),
        dispatcher: Dispatcher::new(),
    }))
}

async fn call(
    app: &Router,
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        request = request.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let request = match body {
        Some(body) => request
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn login(app: &Router, username: &str, password: &str) -> (StatusCode, Value) {
    call(
        app,
        Method::POST,
        "/auth/login",
        None,
        Some(json!({ "username": username, "password": password })),
    )
    .await
}

async fn token_for(app: &Router, username: &str) -> String {
    let (status, body) = login(app, username, "hunter2").await;
    assert_eq!(status, StatusCode::OK);
    body["token"].as_str().unwrap().to_string()
}

async fn post(app: &Router, token: &str, username: &str, text: &str) -> Value {
    let (status, body) = call(
        app,
        Method::POST,
        "/messages",
        Some(token),
        Some(json!({ "username": username, "text": text })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    body
}

fn ids(messages: &Value) -> Vec<&str> {
    messages
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["id"].as_str().unwrap())
        .collect()
}

#[tokio::test]
async fn first_login_creates_account_then_password_is_checked() {
    let app = app();

    let (status, body) = login(&app, "alice", "hunter2").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["username"], "alice");
    assert!(body["token"].as_str().is_some_and(|t| !t.is_empty()));

    let (status, _) = login(&app, "alice", "hunter2").await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = login(&app, "alice", "wrong").await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["message"], "Invalid password.");
}

#[tokio::test]
async fn login_rejects_blank_credentials() {
    let app = app();
    let (status, _) = login(&app, "  ", "pw").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = login(&app, "alice", "").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn messages_need_a_valid_token() {
    let app = app();

    let (status, _) = call(&app, Method::GET, "/messages", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = call(&app, Method::GET, "/messages", Some("garbage"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn posting_as_someone_else_is_forbidden() {
    let app = app();
    let token = token_for(&app, "alice").await;

    let (status, body) = call(
        &app,
        Method::POST,
        "/messages",
        Some(&token),
        Some(json!({ "username": "bob", "text": "it was me" })),
    )
    .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["message"], "Claimed id and token id are different.");
}

#[tokio::test]
async fn cursor_returns_only_newer_messages() {
    let app = app();
    let token = token_for(&app, "alice").await;

    let first = post(&app, &token, "alice", "one").await;
    let second = post(&app, &token, "alice", "two").await;
    let third = post(&app, &token, "alice", "three").await;
    let first_id = first["id"].as_str().unwrap();
    let second_id = second["id"].as_str().unwrap();
    let third_id = third["id"].as_str().unwrap();

    let (status, all) = call(&app, Method::GET, "/messages", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ids(&all), vec![first_id, second_id, third_id]);

    let (_, empty_cursor) = call(&app, Method::GET, "/messages?fromId=", Some(&token), None).await;
    assert_eq!(ids(&empty_cursor), ids(&all));

    let uri = format!("/messages?fromId={first_id}");
    let (status, newer) = call(&app, Method::GET, &uri, Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ids(&newer), vec![second_id, third_id]);

    let uri = format!("/messages?fromId={third_id}");
    let (status, none) = call(&app, Method::GET, &uri, Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(ids(&none).is_empty());
}

#[tokio::test]
async fn unknown_cursor_is_not_found() {
    let app = app();
    let token = token_for(&app, "alice").await;
    post(&app, &token, "alice", "hello").await;

    let (status, _) = call(&app, Method::GET, "/messages?fromId=nope", Some(&token), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn latest_page_is_capped() {
    let app = app();
    let token = token_for(&app, "alice").await;
    let total = LATEST_MESSAGES_LIMIT as usize + 5;
    for i in 1..=total {
        post(&app, &token, "alice", &format!("message {i}")).await;
    }

    let (_, page) = call(&app, Method::GET, "/messages", Some(&token), None).await;
    let page = page.as_array().unwrap();

    assert_eq!(page.len(), LATEST_MESSAGES_LIMIT as usize);
    assert_eq!(page.first().unwrap()["text"], "message 6");
    assert_eq!(page.last().unwrap()["text"], format!("message {total}"));
}

#[tokio::test]
async fn image_payload_is_validated_and_returned() {
    let app = app();
    let token = token_for(&app, "alice").await;

    let (status, _) = call(
        &app,
        Method::POST,
        "/messages",
        Some(&token),
        Some(json!({ "username": "alice", "text": "" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(
        &app,
        Method::POST,
        "/messages",
        Some(&token),
        Some(json!({ "username": "alice", "text": "pic", "imageData": { "data": "***", "type": "png" } })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, created) = call(
        &app,
        Method::POST,
        "/messages",
        Some(&token),
        Some(json!({ "username": "alice", "text": "", "imageData": { "data": "aGk=", "type": "png" } })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (_, all) = call(&app, Method::GET, "/messages", Some(&token), None).await;
    let stored = &all.as_array().unwrap()[0];
    assert_eq!(stored["id"], created["id"]);
    assert_eq!(stored["imageData"]["data"], "aGk=");
    assert_eq!(stored["imageData"]["type"], "png");
}

#[tokio::test]
async fn logout_always_succeeds() {
    let app = app();
    let (status, _) = call(&app, Method::POST, "/auth/logout", None, None).await;
    assert_eq!(status, StatusCode::OK);
}

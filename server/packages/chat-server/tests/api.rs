//! HTTP surface tests driven through the router with `tower::ServiceExt`.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::util::ServiceExt;

use research_chat::config::RuntimeConfig;
use research_chat::lifecycle::ChatRuntime;
use research_chat::router::build_router;
use research_chat::runner::AgentRunner;
use research_chat::sessions::SessionStore;
use research_chat::store::MessageStore;

struct TestApp {
    app: Router,
    runtime: Arc<ChatRuntime>,
}

fn test_app() -> TestApp {
    test_app_with_config(RuntimeConfig::default())
}

fn test_app_with_config(config: RuntimeConfig) -> TestApp {
    let runtime = Arc::new(ChatRuntime::new(
        Arc::new(MessageStore::new()),
        Arc::new(SessionStore::new()),
        Arc::new(AgentRunner::new(config)),
    ));
    TestApp {
        app: build_router(Arc::clone(&runtime)),
        runtime,
    }
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = match body {
        Some(json) => Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap(),
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

async fn register_session(app: &Router, session_id: &str, workspace: &str, indexed: bool) {
    let (status, _) = send(
        app,
        Method::POST,
        &format!("/v1/sessions/{session_id}"),
        Some(json!({"workspacePath": workspace, "indexed": indexed})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn health_reports_ok() {
    let t = test_app();
    let (status, body) = send(&t.app, Method::GET, "/v1/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn chat_message_lifecycle_over_http() {
    let t = test_app();
    register_session(&t.app, "s1", "/tmp/workspace", true).await;

    let (status, body) = send(
        &t.app,
        Method::POST,
        "/v1/sessions/s1/chat",
        Some(json!({"content": "What is the capital of France?"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["role"], "user");
    assert_eq!(body["status"], "pending");
    let assistant_id = body["assistantMessageId"].as_str().unwrap().to_string();
    let stream_url = body["streamUrl"].as_str().unwrap();
    assert_eq!(
        stream_url,
        format!("/v1/sessions/s1/chat/stream/{assistant_id}")
    );

    let (status, body) = send(&t.app, Method::GET, "/v1/sessions/s1/chat", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 2);
    assert_eq!(body["messages"][0]["role"], "user");
    assert_eq!(body["messages"][1]["role"], "assistant");

    let uri = format!("/v1/sessions/s1/chat/{assistant_id}");
    let (status, body) = send(&t.app, Method::GET, &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["messageId"], assistant_id.as_str());

    let (status, _) = send(&t.app, Method::DELETE, &uri, None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = send(&t.app, Method::GET, &uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn list_respects_limit_and_offset() {
    let t = test_app();
    register_session(&t.app, "s1", "/tmp/workspace", true).await;
    for i in 0..3 {
        let (status, _) = send(
            &t.app,
            Method::POST,
            "/v1/sessions/s1/chat",
            Some(json!({"content": format!("question {i}")})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (status, body) =
        send(&t.app, Method::GET, "/v1/sessions/s1/chat?limit=2&offset=2", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 6);
    assert_eq!(body["messages"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn unknown_session_yields_problem_document() {
    let t = test_app();
    let (status, body) = send(
        &t.app,
        Method::POST,
        "/v1/sessions/ghost/chat",
        Some(json!({"content": "hello"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["type"], "urn:research-chat:error:session_not_found");
    assert_eq!(body["status"], 404);
    assert_eq!(body["sessionId"], "ghost");
}

#[tokio::test]
async fn unindexed_session_rejects_chat() {
    let t = test_app();
    register_session(&t.app, "s1", "/tmp/workspace", false).await;
    let (status, body) = send(
        &t.app,
        Method::POST,
        "/v1/sessions/s1/chat",
        Some(json!({"content": "hello"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["type"], "urn:research-chat:error:session_not_indexed");
}

#[tokio::test]
async fn empty_content_is_rejected() {
    let t = test_app();
    register_session(&t.app, "s1", "/tmp/workspace", true).await;
    let (status, body) = send(
        &t.app,
        Method::POST,
        "/v1/sessions/s1/chat",
        Some(json!({"content": "   "})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["type"], "urn:research-chat:error:invalid_request");
}

#[tokio::test]
async fn oversized_content_is_rejected() {
    let t = test_app();
    register_session(&t.app, "s1", "/tmp/workspace", true).await;
    let (status, _) = send(
        &t.app,
        Method::POST,
        "/v1/sessions/s1/chat",
        Some(json!({"content": "x".repeat(10_001)})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn terminal_stream_answers_gone() {
    let t = test_app();
    register_session(&t.app, "s1", "/tmp/workspace", true).await;
    let (_, body) = send(
        &t.app,
        Method::POST,
        "/v1/sessions/s1/chat",
        Some(json!({"content": "hello"})),
    )
    .await;
    let assistant_id = body["assistantMessageId"].as_str().unwrap().to_string();
    t.runtime
        .store()
        .set_completed(&assistant_id, "already answered", None, None)
        .await
        .unwrap();

    let uri = format!("/v1/sessions/s1/chat/stream/{assistant_id}");
    let (status, body) = send(&t.app, Method::GET, &uri, None).await;
    assert_eq!(status, StatusCode::GONE);
    assert_eq!(body["type"], "urn:research-chat:error:stream_expired");
}

#[tokio::test]
async fn clear_chat_empties_the_session() {
    let t = test_app();
    register_session(&t.app, "s1", "/tmp/workspace", true).await;
    send(
        &t.app,
        Method::POST,
        "/v1/sessions/s1/chat",
        Some(json!({"content": "hello"})),
    )
    .await;

    let (status, _) = send(&t.app, Method::DELETE, "/v1/sessions/s1/chat", None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (_, body) = send(&t.app, Method::GET, "/v1/sessions/s1/chat", None).await;
    assert_eq!(body["count"], 0);
}

#[cfg(unix)]
#[tokio::test]
async fn stream_route_relays_run_frames() {
    use std::os::unix::fs::PermissionsExt;

    std::env::set_var("ANTHROPIC_API_KEY", "test-key");
    let workspace = tempfile::tempdir().unwrap();
    let agent_path = workspace.path().join("fake-agent.sh");
    std::fs::write(
        &agent_path,
        concat!(
            "#!/bin/sh\n",
            "echo '{\"type\":\"assistant\",\"message\":{\"content\":[{\"type\":\"text\",\"text\":\"Paris\"}]}}'\n",
            "echo '{\"type\":\"result\",\"result\":\"Paris\"}'\n",
        ),
    )
    .unwrap();
    let mut perms = std::fs::metadata(&agent_path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&agent_path, perms).unwrap();

    let t = test_app_with_config(RuntimeConfig {
        agent_path: Some(agent_path),
        ..Default::default()
    });
    register_session(
        &t.app,
        "s1",
        workspace.path().to_str().unwrap(),
        true,
    )
    .await;
    let (_, body) = send(
        &t.app,
        Method::POST,
        "/v1/sessions/s1/chat",
        Some(json!({"content": "What is the capital of France?"})),
    )
    .await;
    let stream_url = body["streamUrl"].as_str().unwrap().to_string();

    let request = Request::builder()
        .method(Method::GET)
        .uri(&stream_url)
        .body(Body::empty())
        .unwrap();
    let response = t.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("x-accel-buffering").unwrap(),
        "no"
    );

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("event: start"), "got: {text}");
    assert!(text.contains("event: assistant"));
    assert!(text.contains("event: complete"));
    assert!(text.contains("Paris"));
}

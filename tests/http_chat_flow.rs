use axum::body::Body;
use axum::http::{ Request, StatusCode };
use serde_json::{ json, Value };
use std::sync::Arc;
use tower::ServiceExt;
use wiremock::matchers::{ body_string_contains, method, path };
use wiremock::{ Mock, MockServer, ResponseTemplate };

use memo_chat::agent::{ AgentSettings, ChatAgent };
use memo_chat::history::{ HistoryStore, SqliteHistoryStore };
use memo_chat::llm::chat::{ new_client, ChatClient };
use memo_chat::llm::{ LlmConfig, LlmType };
use memo_chat::server::api::{ router, AppState };

fn openai_client(base_url: String) -> Arc<dyn ChatClient> {
    new_client(
        &(LlmConfig {
            llm_type: LlmType::OpenAI,
            api_key: Some("sk-test".into()),
            completion_model: Some("gpt-4".into()),
            base_url: Some(base_url),
        })
    ).unwrap()
}

fn completion(content: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(
        json!({ "choices": [{ "message": { "role": "assistant", "content": content } }] })
    )
}

async fn send(app: &axum::Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(json) =>
            builder
                .header("Content-Type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

#[tokio::test]
async fn test_chat_session_round_trip_against_mock_openai() {
    let llm = MockServer::start().await;

    // first registered match wins: summary prompts, then the most specific chat turn
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_string_contains("Progressively summarize"))
        .respond_with(completion("The user introduced themselves as Sam."))
        .mount(&llm).await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_string_contains("The user introduced themselves as Sam."))
        .and(body_string_contains("What is my name?"))
        .respond_with(completion("Your name is Sam."))
        .expect(1)
        .mount(&llm).await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_string_contains("Remember me? I'm Sam."))
        .respond_with(completion("Nice to meet you, Sam!"))
        .expect(1)
        .mount(&llm).await;

    let temp_dir = tempfile::TempDir::new().unwrap();
    let store: Arc<dyn HistoryStore> = Arc::new(
        SqliteHistoryStore::open(temp_dir.path().join("history.db")).unwrap()
    );
    let agent = ChatAgent::from_parts(
        openai_client(llm.uri()),
        openai_client(llm.uri()),
        store,
        AgentSettings::default()
    ).unwrap();
    let app = router(AppState { agent: Arc::new(agent) }, &["http://localhost:5173".to_string()]);

    let (status, created) = send(
        &app,
        "POST",
        "/history",
        Some(json!({ "id": "sam", "name": "Chat 1" }))
    ).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["name"], "Chat 1");

    let (status, reply) = send(
        &app,
        "POST",
        "/chat",
        Some(json!({ "message": "Remember me? I'm Sam.", "sessionId": "sam" }))
    ).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reply["reply"], "Nice to meet you, Sam!");

    let (status, reply) = send(
        &app,
        "POST",
        "/chat",
        Some(json!({ "message": "What is my name?", "sessionId": "sam" }))
    ).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reply["reply"], "Your name is Sam.");

    let (status, messages) = send(&app, "GET", "/history/sam", None).await;
    assert_eq!(status, StatusCode::OK);
    let roles: Vec<&str> = messages
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["role"].as_str().unwrap())
        .collect();
    assert_eq!(roles, vec!["user", "bot", "user", "bot"]);
    assert_eq!(messages[3]["sessionId"], "sam");

    let (status, _) = send(&app, "PATCH", "/history/sam", Some(json!({ "name": "Sam's chat" }))).await;
    assert_eq!(status, StatusCode::OK);
    let (_, sessions) = send(&app, "GET", "/history/sessions", None).await;
    assert_eq!(sessions[0]["name"], "Sam's chat");

    let (status, deleted) = send(&app, "DELETE", "/history/sam", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(deleted["success"], true);
    let (_, messages) = send(&app, "GET", "/history/sam", None).await;
    assert_eq!(messages, json!([]));
}

#[tokio::test]
async fn test_upstream_failure_maps_to_static_500() {
    let llm = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("model overloaded"))
        .mount(&llm).await;

    let temp_dir = tempfile::TempDir::new().unwrap();
    let store: Arc<dyn HistoryStore> = Arc::new(
        SqliteHistoryStore::open(temp_dir.path().join("history.db")).unwrap()
    );
    let agent = ChatAgent::from_parts(
        openai_client(llm.uri()),
        openai_client(llm.uri()),
        store,
        AgentSettings::default()
    ).unwrap();
    let app = router(AppState { agent: Arc::new(agent) }, &[]);

    let (status, body) = send(
        &app,
        "POST",
        "/chat",
        Some(json!({ "message": "hello", "sessionId": "x" }))
    ).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, json!({ "error": "Internal server error" }));
}

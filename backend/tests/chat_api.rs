use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use bytes::Bytes;
use chatlog_backend::auth::{JwksClient, KeyProvider};
use chatlog_backend::retry::RetryPolicy;
use chatlog_backend::test_util::keys::{TRUSTED_KID, TRUSTED_MODULUS};
use chatlog_backend::test_util::mock_openai::MockCompletion;
use chatlog_backend::test_util::{
    create_test_state, jwks_json, test_config, StaticKeyProvider, TestToken,
};
use http::{header, Method, Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct TestResponse {
    status: StatusCode,
    allow_origin: Option<String>,
    body: Value,
}

fn app_with_keys(completion_url: &str, keys: Arc<dyn KeyProvider>) -> axum::Router {
    let state = create_test_state(test_config(completion_url), keys);
    chatlog_backend::app(Arc::new(state))
}

fn app(completion_url: &str) -> axum::Router {
    app_with_keys(completion_url, Arc::new(StaticKeyProvider::trusted()))
}

async fn completion_server(reply: Value) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(reply))
        .mount(&server)
        .await;
    server
}

async fn send_request(
    app: &axum::Router,
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<Bytes>,
) -> TestResponse {
    let mut req_builder = Request::builder().method(method).uri(uri);

    if let Some(token) = token {
        req_builder = req_builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    if body.is_some() {
        req_builder = req_builder.header(header::CONTENT_TYPE, "application/json");
    }

    let req = req_builder
        .body(body.map(Body::from).unwrap_or_else(Body::empty))
        .unwrap();

    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let allow_origin = response
        .headers()
        .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
        .map(|v| v.to_str().unwrap().to_string());
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };

    TestResponse {
        status,
        allow_origin,
        body,
    }
}

async fn post_message(app: &axum::Router, token: &str, message: &str) -> TestResponse {
    let body = Bytes::from(json!({ "message": message }).to_string());
    send_request(app, Method::POST, "/chat", Some(token), Some(body)).await
}

async fn get_history(app: &axum::Router, token: &str) -> TestResponse {
    send_request(app, Method::GET, "/chat", Some(token), None).await
}

fn history_texts(response: &TestResponse) -> Vec<(String, String)> {
    response.body["chatHistory"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| {
            (
                m["role"].as_str().unwrap().to_string(),
                m["message"].as_str().unwrap().to_string(),
            )
        })
        .collect()
}

#[tokio::test]
async fn test_health() {
    let app = app("http://127.0.0.1:9");
    let response = send_request(&app, Method::GET, "/health", None, None).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["status"], "ok");
}

#[tokio::test]
async fn test_history_requires_auth() {
    let app = app("http://127.0.0.1:9");
    let response = send_request(&app, Method::GET, "/chat", None, None).await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    assert_eq!(
        response.body,
        json!({
            "error": "Missing or invalid Authorization header",
            "code": "missing_token"
        })
    );
    assert_eq!(response.allow_origin.as_deref(), Some("*"));
}

#[tokio::test]
async fn test_auth_is_checked_before_body() {
    let app = app("http://127.0.0.1:9");
    let response = send_request(&app, Method::POST, "/chat", None, Some(Bytes::new())).await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_expired_token_is_rejected() {
    let app = app("http://127.0.0.1:9");
    let token = TestToken::new("abc123")
        .expires_in(chrono::Duration::hours(-1))
        .sign();
    let response = get_history(&app, &token).await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    assert_eq!(response.body["error"], "Token expired");
    assert_eq!(response.body["code"], "token_expired");
}

#[tokio::test]
async fn test_empty_message_is_rejected_and_not_stored() {
    let server = completion_server(MockCompletion::text("unused")).await;
    let app = app(&server.uri());
    let token = TestToken::new("abc123").sign();

    let response = post_message(&app, &token, "").await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.body, json!({ "error": "Missing message" }));
    assert_eq!(response.allow_origin.as_deref(), Some("*"));

    let history = get_history(&app, &token).await;
    assert!(history_texts(&history).is_empty());
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_invalid_json_body() {
    let app = app("http://127.0.0.1:9");
    let token = TestToken::new("abc123").sign();
    let response = send_request(
        &app,
        Method::POST,
        "/chat",
        Some(&token),
        Some(Bytes::from_static(b"{not json")),
    )
    .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.body["error"], "Invalid JSON body");
}

#[tokio::test]
async fn test_post_records_both_turns() {
    let server = completion_server(MockCompletion::text("Hi there!")).await;
    let app = app(&server.uri());
    let token = TestToken::new("abc123").email("alice@example.com").sign();

    let response = post_message(&app, &token, "Hello").await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(
        response.body,
        json!({ "userId": "alice@example.com", "chatbotReply": "Hi there!" })
    );
    assert_eq!(response.allow_origin.as_deref(), Some("*"));

    let history = get_history(&app, &token).await;
    assert_eq!(history.status, StatusCode::OK);
    assert_eq!(history.body["userId"], "alice@example.com");
    assert_eq!(
        history_texts(&history),
        vec![
            ("user".to_string(), "Hello".to_string()),
            ("bot".to_string(), "Hi there!".to_string()),
        ]
    );
    let first = &history.body["chatHistory"][0];
    assert_eq!(first["userId"], "alice@example.com");
    assert!(first["timestamp"].is_string());
}

#[tokio::test]
async fn test_prompt_includes_prior_turns() {
    let server = completion_server(MockCompletion::text("ok")).await;
    let app = app(&server.uri());
    let token = TestToken::new("abc123").sign();

    assert_eq!(post_message(&app, &token, "first").await.status, StatusCode::OK);
    assert_eq!(post_message(&app, &token, "second").await.status, StatusCode::OK);

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
    let body: Value = serde_json::from_slice(&requests[1].body).unwrap();
    assert_eq!(body["max_tokens"], 50);
    assert_eq!(
        body["messages"],
        json!([
            {"role": "user", "content": "first"},
            {"role": "assistant", "content": "ok"},
            {"role": "user", "content": "second"},
            {"role": "user", "content": "second"}
        ])
    );
}

#[tokio::test]
async fn test_completion_failure_keeps_user_turn() {
    let server = completion_server(MockCompletion::no_choices()).await;
    let app = app(&server.uri());
    let token = TestToken::new("abc123").sign();

    let response = post_message(&app, &token, "Hello").await;
    assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(response.body, json!({ "error": "Internal server error" }));

    let history = get_history(&app, &token).await;
    assert_eq!(
        history_texts(&history),
        vec![("user".to_string(), "Hello".to_string())]
    );
}

#[tokio::test]
async fn test_history_is_per_user() {
    let server = completion_server(MockCompletion::text("hey")).await;
    let app = app(&server.uri());
    let alice = TestToken::new("alice-sub").email("alice@example.com").sign();
    let bob = TestToken::new("bob-sub").sign();

    assert_eq!(post_message(&app, &alice, "from alice").await.status, StatusCode::OK);

    let history = get_history(&app, &bob).await;
    assert_eq!(history.status, StatusCode::OK);
    assert_eq!(history.body["userId"], "bob-sub");
    assert!(history_texts(&history).is_empty());
}

#[tokio::test]
async fn test_history_returns_everything_in_order() {
    let server = completion_server(MockCompletion::text("reply")).await;
    let app = app(&server.uri());
    let token = TestToken::new("abc123").sign();

    for i in 0..7 {
        let response = post_message(&app, &token, &format!("message {i}")).await;
        assert_eq!(response.status, StatusCode::OK);
    }

    let history = get_history(&app, &token).await;
    let texts = history_texts(&history);
    assert_eq!(texts.len(), 14);
    assert_eq!(texts[0], ("user".to_string(), "message 0".to_string()));
    assert_eq!(texts[13], ("bot".to_string(), "reply".to_string()));

    let stamps: Vec<String> = history.body["chatHistory"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["timestamp"].as_str().unwrap().to_string())
        .collect();
    let parsed: Vec<chrono::DateTime<chrono::Utc>> =
        stamps.iter().map(|s| s.parse().unwrap()).collect();
    assert!(parsed.windows(2).all(|w| w[0] < w[1]));

    // The last post saw 13 stored turns; only the 10 newest go into the prompt.
    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 7);
    let body: Value = serde_json::from_slice(&requests[6].body).unwrap();
    let messages = body["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 11);
    assert_eq!(messages[0], json!({"role": "assistant", "content": "reply"}));
    assert_eq!(messages[1], json!({"role": "user", "content": "message 2"}));
    assert_eq!(messages[9], json!({"role": "user", "content": "message 6"}));
    assert_eq!(messages[10], json!({"role": "user", "content": "message 6"}));
}

#[tokio::test]
async fn test_whitespace_message_is_stored_and_forwarded() {
    let server = completion_server(MockCompletion::text("hm?")).await;
    let app = app(&server.uri());
    let token = TestToken::new("abc123").sign();

    let response = post_message(&app, &token, "   ").await;
    assert_eq!(response.status, StatusCode::OK);

    let history = get_history(&app, &token).await;
    assert_eq!(
        history_texts(&history),
        vec![
            ("user".to_string(), "   ".to_string()),
            ("bot".to_string(), "hm?".to_string()),
        ]
    );
    let requests = server.received_requests().await.unwrap();
    let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["messages"].as_array().unwrap().last().unwrap()["content"], "   ");
}

#[tokio::test]
async fn test_keys_fetched_from_jwks_endpoint() {
    let jwks = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/.well-known/jwks.json"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(jwks_json(&[(TRUSTED_KID, TRUSTED_MODULUS)])),
        )
        .expect(1)
        .mount(&jwks)
        .await;

    let keys = JwksClient::with_uri(
        &format!("{}/.well-known/jwks.json", jwks.uri()),
        Duration::from_secs(2),
        Duration::from_secs(3600),
    )
    .unwrap();
    let app = app_with_keys("http://127.0.0.1:9", Arc::new(keys));
    let token = TestToken::new("abc123").sign();

    assert_eq!(get_history(&app, &token).await.status, StatusCode::OK);
    assert_eq!(get_history(&app, &token).await.status, StatusCode::OK);
}

#[tokio::test]
async fn test_unreachable_jwks_is_server_error() {
    let jwks = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&jwks)
        .await;

    let keys = JwksClient::with_uri(
        &format!("{}/.well-known/jwks.json", jwks.uri()),
        Duration::from_secs(2),
        Duration::from_secs(3600),
    )
    .unwrap()
    .with_retry(RetryPolicy::none());
    let app = app_with_keys("http://127.0.0.1:9", Arc::new(keys));
    let token = TestToken::new("abc123").sign();

    let response = get_history(&app, &token).await;
    assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(response.body, json!({ "error": "Internal server error" }));
}

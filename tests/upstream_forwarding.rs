use std::sync::Arc;
use std::time::Duration;

use ai_gateway::config::{GatewayConfig, OpenAiConfig, OpenRouterConfig};
use ai_gateway::http::AppState;
use ai_gateway::limit::Unlimited;
use ai_gateway::{router, OpenAiForwarder, OpenRouterForwarder};
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use httpmock::Method::POST;
use httpmock::MockServer;
use serde_json::json;
use tower::util::ServiceExt;

const INTERNAL_KEY: &str = "internal-secret";

fn config_with(openai: OpenAiConfig, openrouter_base: &str) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.security.internal_api_key = INTERNAL_KEY.to_string();
    config.openai = openai;
    config.openrouter = OpenRouterConfig {
        base_url: openrouter_base.to_string(),
        api_key: "or-test".to_string(),
        ..OpenRouterConfig::default()
    };
    config
}

fn app(config: &GatewayConfig) -> Router {
    let state = AppState {
        openai: Arc::new(OpenAiForwarder::new(&config.openai).expect("openai forwarder")),
        openrouter: Arc::new(
            OpenRouterForwarder::new(&config.openrouter).expect("openrouter forwarder"),
        ),
        internal_api_key: Arc::from(config.security.internal_api_key.as_str()),
        rate_limiter: Arc::new(Unlimited),
    };
    router(state)
}

fn responses_request() -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/v1/responses")
        .header("authorization", format!("Bearer {INTERNAL_KEY}"))
        .header("content-type", "application/json")
        .body(Body::from(json!({"input": "hi"}).to_string()))
        .unwrap()
}

async fn error_reason(response: axum::response::Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let payload: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    payload["error"].as_str().unwrap_or_default().to_string()
}

/// Grabs a port that nothing is listening on.
fn unused_local_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().expect("addr").port();
    drop(listener);
    port
}

#[tokio::test]
async fn slow_upstream_is_reported_as_gateway_timeout() {
    let upstream = MockServer::start();
    upstream.mock(|when, then| {
        when.method(POST).path("/v1/responses");
        then.status(200)
            .delay(Duration::from_millis(500))
            .body("{}");
    });
    let config = config_with(
        OpenAiConfig {
            base_url: upstream.base_url(),
            api_key: "sk-test".to_string(),
            response_timeout_ms: 100,
            ..OpenAiConfig::default()
        },
        &upstream.base_url(),
    );
    let app = app(&config);

    let response = app.oneshot(responses_request()).await.unwrap();
    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(error_reason(response).await, "upstream_timeout");
}

#[tokio::test]
async fn unreachable_upstream_is_reported_as_bad_gateway() {
    let openrouter = MockServer::start();
    let config = config_with(
        OpenAiConfig {
            base_url: format!("http://127.0.0.1:{}", unused_local_port()),
            api_key: "sk-test".to_string(),
            ..OpenAiConfig::default()
        },
        &openrouter.base_url(),
    );
    let app = app(&config);

    let response = app.oneshot(responses_request()).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(error_reason(response).await, "upstream_request_failed");
}

#[tokio::test]
async fn upstream_error_status_is_relayed_with_retry_after() {
    let upstream = MockServer::start();
    let mock = upstream.mock(|when, then| {
        when.method(POST).path("/v1/responses");
        then.status(429)
            .header("content-type", "application/json")
            .header("retry-after", "7")
            .header("x-internal-trace", "abc")
            .body(r#"{"error":{"message":"rate limited"}}"#);
    });
    let config = config_with(
        OpenAiConfig {
            base_url: upstream.base_url(),
            api_key: "sk-test".to_string(),
            ..OpenAiConfig::default()
        },
        &upstream.base_url(),
    );
    let app = app(&config);

    let response = app.oneshot(responses_request()).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(
        response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok()),
        Some("7")
    );
    assert!(response.headers().get("x-internal-trace").is_none());
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(bytes.as_ref(), br#"{"error":{"message":"rate limited"}}"#);
    assert_eq!(mock.hits(), 1);
}

#[tokio::test]
async fn upstream_401_is_relayed_unchanged() {
    let upstream = MockServer::start();
    let mock = upstream.mock(|when, then| {
        when.method(POST).path("/v1/responses");
        then.status(401)
            .header("content-type", "application/json")
            .header("openai-request-id", "req_denied")
            .body(r#"{"error":{"message":"invalid api key"}}"#);
    });
    let config = config_with(
        OpenAiConfig {
            base_url: upstream.base_url(),
            api_key: "sk-revoked".to_string(),
            ..OpenAiConfig::default()
        },
        &upstream.base_url(),
    );
    let app = app(&config);

    let mut request = responses_request();
    request
        .headers_mut()
        .insert("x-request-id", "rid-42".parse().unwrap());
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        response
            .headers()
            .get("openai-request-id")
            .and_then(|v| v.to_str().ok()),
        Some("req_denied")
    );
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(bytes.as_ref(), br#"{"error":{"message":"invalid api key"}}"#);
    assert_eq!(mock.hits(), 1);
}

#[tokio::test]
async fn openrouter_upstream_error_is_relayed() {
    let openai = MockServer::start();
    let openrouter = MockServer::start();
    let mock = openrouter.mock(|when, then| {
        when.method(POST).path("/api/v1/chat/completions");
        then.status(402)
            .header("content-type", "application/json")
            .body(r#"{"error":{"message":"insufficient credits"}}"#);
    });
    let config = config_with(
        OpenAiConfig {
            base_url: openai.base_url(),
            api_key: "sk-test".to_string(),
            ..OpenAiConfig::default()
        },
        &openrouter.base_url(),
    );
    let app = app(&config);

    let request = Request::builder()
        .method("POST")
        .uri("/openrouter/test")
        .header("authorization", format!("Bearer {INTERNAL_KEY}"))
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(
        bytes.as_ref(),
        br#"{"error":{"message":"insufficient credits"}}"#
    );
    assert_eq!(mock.hits(), 1);
}

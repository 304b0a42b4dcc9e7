use std::error::Error as StdError;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;

use axum::body::{to_bytes, Body};
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header, HeaderMap, HeaderValue};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use bytes::Bytes;
use futures_util::StreamExt;

use crate::audio::AudioEndpoint;
use crate::error::GatewayError;
use crate::headers::{generate_request_id, REQUEST_ID_HEADER};
use crate::limit::RateLimit;
use crate::multipart::parse_form;
use crate::upstream::{ForwardContext, OpenAiForwarder, OpenRouterForwarder, UpstreamBody, UpstreamResponse};
use crate::{audio, headers};

const BEARER_PREFIX: &str = "Bearer ";

/// Inbound multipart bodies are read fully before validation; this cap keeps
/// a runaway upload from exhausting memory before the 25 MiB file check runs.
const MAX_AUDIO_BODY_BYTES: usize = 32 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub openai: Arc<OpenAiForwarder>,
    pub openrouter: Arc<OpenRouterForwarder>,
    pub internal_api_key: Arc<str>,
    pub rate_limiter: Arc<dyn RateLimit>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/responses", post(responses))
        .route("/v1/responses/stream", post(responses_stream))
        .route("/v1/audio/transcriptions", post(audio_transcriptions))
        .route("/v1/audio/translations", post(audio_translations))
        .route("/openrouter/test", post(openrouter_test))
        .layer(middleware::from_fn(request_id_layer))
        .with_state(state)
}

/// Echoes the caller's `X-Request-Id` (or generates one) on every response
/// and emits one completion log line per request.
async fn request_id_layer(mut request: Request, next: Next) -> Response {
    let request_id = headers::request_id_for_log(request.headers());
    let request_id = if request_id == "-" {
        generate_request_id()
    } else {
        request_id
    };
    let id_value = HeaderValue::from_str(&request_id)
        .unwrap_or_else(|_| HeaderValue::from_static("-"));
    request.headers_mut().insert(REQUEST_ID_HEADER, id_value.clone());

    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let start = Instant::now();
    let mut response = next.run(request).await;
    response.headers_mut().insert(REQUEST_ID_HEADER, id_value);
    tracing::info!(
        method = %method,
        path,
        status = response.status().as_u16(),
        latency_ms = start.elapsed().as_millis() as u64,
        rid = request_id,
        "request completed",
    );
    response
}

async fn responses(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    request: Request,
) -> Response {
    json_endpoint(state, connect_info, request, false).await
}

async fn responses_stream(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    request: Request,
) -> Response {
    json_endpoint(state, connect_info, request, true).await
}

async fn audio_transcriptions(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    request: Request,
) -> Response {
    audio_endpoint(state, connect_info, request, AudioEndpoint::Transcriptions).await
}

async fn audio_translations(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    request: Request,
) -> Response {
    audio_endpoint(state, connect_info, request, AudioEndpoint::Translations).await
}

async fn openrouter_test(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    request: Request,
) -> Response {
    let remote_ip = remote_ip(connect_info);
    let (parts, _body) = request.into_parts();
    let result = async {
        gate(&state, &parts.headers)?;
        let request_id = headers::request_id_for_log(&parts.headers);
        let ctx = ForwardContext {
            headers: &parts.headers,
            remote_ip,
            request_id: &request_id,
        };
        state.openrouter.forward_test(ctx).await
    }
    .await;
    relay_result(result)
}

async fn json_endpoint(
    state: AppState,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    request: Request,
    require_stream: bool,
) -> Response {
    let remote_ip = remote_ip(connect_info);
    let (parts, body) = request.into_parts();
    let result = async {
        gate(&state, &parts.headers)?;
        if !content_type_matches(&parts.headers, "application/json") {
            return Err(GatewayError::UnsupportedMediaType(
                "content_type_must_be_application_json",
            ));
        }
        let bytes = to_bytes(body, usize::MAX)
            .await
            .map_err(|_| GatewayError::bad_request("invalid_json_body"))?;
        validate_stream_flag(&bytes, require_stream)?;

        let request_id = headers::request_id_for_log(&parts.headers);
        let ctx = ForwardContext {
            headers: &parts.headers,
            remote_ip,
            request_id: &request_id,
        };
        state.openai.forward_responses(ctx, bytes, require_stream).await
    }
    .await;
    relay_result(result)
}

async fn audio_endpoint(
    state: AppState,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    request: Request,
    endpoint: AudioEndpoint,
) -> Response {
    let remote_ip = remote_ip(connect_info);
    let (parts, body) = request.into_parts();
    let result = async {
        gate(&state, &parts.headers)?;
        let content_type = parts
            .headers
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();
        if !media_type_matches(&content_type, "multipart/form-data") {
            return Err(GatewayError::UnsupportedMediaType(
                "content_type_must_be_multipart_form_data",
            ));
        }

        let bytes = to_bytes(body, MAX_AUDIO_BODY_BYTES)
            .await
            .map_err(map_body_read_error)?;
        let form_parts = parse_form(&content_type, &bytes)
            .map_err(|_| GatewayError::bad_request("invalid_multipart_body"))?;
        let form = audio::validate_parts(form_parts, endpoint)?.into_multipart()?;

        let request_id = headers::request_id_for_log(&parts.headers);
        let ctx = ForwardContext {
            headers: &parts.headers,
            remote_ip,
            request_id: &request_id,
        };
        state.openai.forward_audio(ctx, endpoint, form).await
    }
    .await;
    relay_result(result)
}

/// Auth then rate limit. Both run before any body byte is read.
fn gate(state: &AppState, headers: &HeaderMap) -> Result<(), GatewayError> {
    if !has_valid_internal_bearer(headers, &state.internal_api_key) {
        return Err(GatewayError::Unauthorized);
    }
    let client_key = headers
        .get("x-client-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("anon");
    if !state.rate_limiter.try_acquire(client_key) {
        return Err(GatewayError::RateLimited);
    }
    Ok(())
}

fn has_valid_internal_bearer(headers: &HeaderMap, internal_api_key: &str) -> bool {
    let Some(authorization) = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
    else {
        return false;
    };
    let authorization = authorization.trim();
    let Some(prefix) = authorization.get(..BEARER_PREFIX.len()) else {
        return false;
    };
    if !prefix.eq_ignore_ascii_case(BEARER_PREFIX) {
        return false;
    }
    let token = authorization[BEARER_PREFIX.len()..].trim();
    !token.is_empty() && token == internal_api_key
}

fn validate_stream_flag(body: &Bytes, require_stream: bool) -> Result<(), GatewayError> {
    let payload: serde_json::Value = serde_json::from_slice(body)
        .map_err(|_| GatewayError::bad_request("invalid_json_body"))?;
    if let Some(stream) = payload.get("stream") {
        if !stream.is_boolean() {
            return Err(GatewayError::bad_request("stream_must_be_boolean"));
        }
    }
    let stream_enabled = payload
        .get("stream")
        .and_then(serde_json::Value::as_bool)
        .unwrap_or(false);
    if require_stream && !stream_enabled {
        return Err(GatewayError::bad_request(
            "stream_must_be_true_for_stream_endpoint",
        ));
    }
    if !require_stream && stream_enabled {
        return Err(GatewayError::bad_request(
            "stream_must_be_false_for_non_stream_endpoint",
        ));
    }
    Ok(())
}

fn content_type_matches(headers: &HeaderMap, expected: &str) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| media_type_matches(value, expected))
}

fn media_type_matches(content_type: &str, expected: &str) -> bool {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .eq_ignore_ascii_case(expected)
}

fn map_body_read_error(err: axum::Error) -> GatewayError {
    if is_length_limit_error(&err) {
        GatewayError::PayloadTooLarge
    } else {
        GatewayError::bad_request("invalid_multipart_body")
    }
}

fn is_length_limit_error(err: &(dyn StdError + 'static)) -> bool {
    let mut current: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(cause) = current {
        if cause.downcast_ref::<http_body_util::LengthLimitError>().is_some() {
            return true;
        }
        current = cause.source();
    }
    false
}

fn remote_ip(connect_info: Option<ConnectInfo<SocketAddr>>) -> Option<IpAddr> {
    connect_info.map(|ConnectInfo(addr)| addr.ip())
}

fn relay_result(result: Result<UpstreamResponse, GatewayError>) -> Response {
    match result {
        Ok(upstream) => relay(upstream),
        Err(err) => err.into_response(),
    }
}

/// Writes the upstream reply through unchanged: raw status, filtered
/// headers, and either the buffered bytes or the live chunk sequence.
fn relay(upstream: UpstreamResponse) -> Response {
    let body = match upstream.body {
        UpstreamBody::Buffered(bytes) => Body::from(bytes),
        UpstreamBody::Streamed(stream) => {
            Body::from_stream(stream.map(|chunk| chunk.map_err(std::io::Error::other)))
        }
    };
    let mut response = Response::new(body);
    *response.status_mut() = upstream.status;
    *response.headers_mut() = upstream.headers;
    response
}

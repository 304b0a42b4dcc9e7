use std::net::IpAddr;
use std::time::Duration;

use axum::http::{HeaderMap, HeaderValue, StatusCode};
use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use reqwest::multipart::Form;

use crate::audio::AudioEndpoint;
use crate::classify::classify_upstream_error;
use crate::config::{require_credential, OpenAiConfig, OpenRouterConfig};
use crate::error::{ConfigError, GatewayError};
use crate::headers::{apply_ip_headers, copy_if_present, filter_response_headers};
use crate::scope::{resolve_scope_headers, ScopeHeaders, ORGANIZATION_HEADER, PROJECT_HEADER};

const OPENAI_REQUEST_ID_HEADERS: &[&str] = &["openai-request-id", "x-request-id"];
const OPENROUTER_REQUEST_ID_HEADERS: &[&str] = &["x-request-id"];

/// Inbound request metadata a forwarder needs to build its outbound call.
#[derive(Clone, Copy)]
pub struct ForwardContext<'a> {
    pub headers: &'a HeaderMap,
    pub remote_ip: Option<IpAddr>,
    pub request_id: &'a str,
}

pub enum UpstreamBody {
    Buffered(Bytes),
    Streamed(BoxStream<'static, Result<Bytes, reqwest::Error>>),
}

/// One upstream reply, already reduced to what the gateway relays: the raw
/// status, allow-listed headers, and the body in the requested shape.
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: UpstreamBody,
}

/// Forwarder for the primary completions/audio provider. Holds two clients:
/// one with a bounded response timeout for buffered calls and one without,
/// so long-lived event streams are not cut off mid-response.
pub struct OpenAiForwarder {
    base_url: String,
    auth_header: HeaderValue,
    organization: Option<String>,
    project: Option<String>,
    forward_client_scope_headers: bool,
    buffered_client: reqwest::Client,
    streaming_client: reqwest::Client,
}

impl OpenAiForwarder {
    pub fn new(config: &OpenAiConfig) -> Result<Self, ConfigError> {
        require_credential("openai.api_key", &config.api_key)?;
        let auth_header = bearer_header("openai.api_key", &config.api_key)?;
        let connect = Duration::from_millis(config.connect_timeout_ms);

        let buffered_client = reqwest::Client::builder()
            .connect_timeout(connect)
            .timeout(Duration::from_millis(config.response_timeout_ms))
            .build()?;
        let mut streaming_builder = reqwest::Client::builder().connect_timeout(connect);
        if config.stream_response_timeout_ms > 0 {
            streaming_builder =
                streaming_builder.timeout(Duration::from_millis(config.stream_response_timeout_ms));
        }
        let streaming_client = streaming_builder.build()?;

        Ok(Self {
            base_url: config.base_url.clone(),
            auth_header,
            organization: non_blank(&config.organization),
            project: non_blank(&config.project),
            forward_client_scope_headers: config.forward_client_scope_headers,
            buffered_client,
            streaming_client,
        })
    }

    pub async fn forward_responses(
        &self,
        ctx: ForwardContext<'_>,
        body: Bytes,
        stream: bool,
    ) -> Result<UpstreamResponse, GatewayError> {
        let scope = self.resolve_scope(ctx.headers);
        let client = if stream {
            &self.streaming_client
        } else {
            &self.buffered_client
        };
        let response = client
            .post(join_base_url(&self.base_url, "/v1/responses"))
            .headers(self.outbound_headers(ctx, &scope, true))
            .body(body)
            .send()
            .await
            .map_err(classify_upstream_error)?;

        self.log_credential_rejection(ctx.request_id, &response, &scope);
        let status = response.status();
        let headers = filter_response_headers(response.headers(), OPENAI_REQUEST_ID_HEADERS);
        let body = if stream {
            UpstreamBody::Streamed(response.bytes_stream().boxed())
        } else {
            UpstreamBody::Buffered(response.bytes().await.map_err(classify_upstream_error)?)
        };
        Ok(UpstreamResponse {
            status,
            headers,
            body,
        })
    }

    pub async fn forward_audio(
        &self,
        ctx: ForwardContext<'_>,
        endpoint: AudioEndpoint,
        form: Form,
    ) -> Result<UpstreamResponse, GatewayError> {
        let scope = self.resolve_scope(ctx.headers);
        let response = self
            .buffered_client
            .post(join_base_url(&self.base_url, endpoint.upstream_path()))
            .headers(self.outbound_headers(ctx, &scope, false))
            .multipart(form)
            .send()
            .await
            .map_err(classify_upstream_error)?;

        self.log_credential_rejection(ctx.request_id, &response, &scope);
        let status = response.status();
        let headers = filter_response_headers(response.headers(), OPENAI_REQUEST_ID_HEADERS);
        let bytes = response.bytes().await.map_err(classify_upstream_error)?;
        Ok(UpstreamResponse {
            status,
            headers,
            body: UpstreamBody::Buffered(bytes),
        })
    }

    fn resolve_scope(&self, inbound: &HeaderMap) -> ScopeHeaders {
        resolve_scope_headers(
            self.organization.as_deref(),
            self.project.as_deref(),
            self.forward_client_scope_headers,
            inbound,
        )
    }

    /// Header construction order matters only for readability of the wire
    /// capture; every header is set at most once. The content type is left
    /// to the multipart encoder for audio calls.
    fn outbound_headers(
        &self,
        ctx: ForwardContext<'_>,
        scope: &ScopeHeaders,
        json_body: bool,
    ) -> HeaderMap {
        let mut outbound = HeaderMap::new();
        outbound.insert(axum::http::header::AUTHORIZATION, self.auth_header.clone());
        if json_body {
            outbound.insert(
                axum::http::header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            );
        }
        copy_if_present(ctx.headers, &mut outbound, "accept");
        if let Some(value) = scope.organization.as_deref().and_then(header_value) {
            outbound.insert(ORGANIZATION_HEADER, value);
        }
        if let Some(value) = scope.project.as_deref().and_then(header_value) {
            outbound.insert(PROJECT_HEADER, value);
        }
        copy_if_present(ctx.headers, &mut outbound, "idempotency-key");
        apply_ip_headers(&mut outbound, ctx.headers, ctx.remote_ip);
        outbound
    }

    fn log_credential_rejection(
        &self,
        request_id: &str,
        response: &reqwest::Response,
        scope: &ScopeHeaders,
    ) {
        if response.status() != StatusCode::UNAUTHORIZED {
            return;
        }
        let upstream_rid = response
            .headers()
            .get("openai-request-id")
            .and_then(|value| value.to_str().ok())
            .unwrap_or("-");
        tracing::warn!(
            rid = request_id,
            upstream_rid,
            scope_source = scope.source.as_str(),
            org_set = scope.organization.is_some(),
            project_set = scope.project.is_some(),
            "openai upstream rejected gateway credential",
        );
    }
}

/// Forwarder for the secondary provider. Only serves the fixed-payload test
/// call used to verify connectivity and billing.
pub struct OpenRouterForwarder {
    base_url: String,
    auth_header: HeaderValue,
    test_model: String,
    client: reqwest::Client,
}

impl OpenRouterForwarder {
    pub fn new(config: &OpenRouterConfig) -> Result<Self, ConfigError> {
        require_credential("openrouter.api_key", &config.api_key)?;
        let auth_header = bearer_header("openrouter.api_key", &config.api_key)?;
        let test_model = config.test_model.trim().to_string();
        if test_model.is_empty() {
            return Err(ConfigError::Invalid {
                key: "openrouter.test_model",
                requirement: "non-blank",
            });
        }
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .timeout(Duration::from_millis(config.response_timeout_ms))
            .build()?;
        Ok(Self {
            base_url: config.base_url.clone(),
            auth_header,
            test_model,
            client,
        })
    }

    pub async fn forward_test(
        &self,
        ctx: ForwardContext<'_>,
    ) -> Result<UpstreamResponse, GatewayError> {
        let response = self
            .client
            .post(join_base_url(&self.base_url, "/api/v1/chat/completions"))
            .headers(self.outbound_headers(ctx))
            .json(&self.test_payload())
            .send()
            .await
            .map_err(|err| {
                tracing::error!(
                    rid = ctx.request_id,
                    endpoint = "openrouter_test",
                    error = %err,
                    "openrouter request failed",
                );
                classify_upstream_error(err)
            })?;

        let status = response.status();
        if status.as_u16() >= 400 {
            let upstream_rid = response
                .headers()
                .get("x-request-id")
                .and_then(|value| value.to_str().ok())
                .unwrap_or("-");
            tracing::warn!(
                rid = ctx.request_id,
                endpoint = "openrouter_test",
                status = status.as_u16(),
                upstream_rid,
                "openrouter upstream returned an error status",
            );
        }
        let headers = filter_response_headers(response.headers(), OPENROUTER_REQUEST_ID_HEADERS);
        let bytes = response.bytes().await.map_err(classify_upstream_error)?;
        Ok(UpstreamResponse {
            status,
            headers,
            body: UpstreamBody::Buffered(bytes),
        })
    }

    fn test_payload(&self) -> serde_json::Value {
        serde_json::json!({
            "model": self.test_model,
            "messages": [{"role": "user", "content": "reply with: ok"}],
            "max_tokens": 8,
        })
    }

    fn outbound_headers(&self, ctx: ForwardContext<'_>) -> HeaderMap {
        let mut outbound = HeaderMap::new();
        outbound.insert(axum::http::header::AUTHORIZATION, self.auth_header.clone());
        copy_if_present(ctx.headers, &mut outbound, "accept");
        copy_if_present(ctx.headers, &mut outbound, "idempotency-key");
        apply_ip_headers(&mut outbound, ctx.headers, ctx.remote_ip);
        outbound
    }
}

fn bearer_header(key: &'static str, api_key: &str) -> Result<HeaderValue, ConfigError> {
    let mut value = HeaderValue::from_str(&format!("Bearer {}", api_key.trim())).map_err(|_| {
        ConfigError::Invalid {
            key,
            requirement: "a valid http header value",
        }
    })?;
    value.set_sensitive(true);
    Ok(value)
}

fn header_value(value: &str) -> Option<HeaderValue> {
    HeaderValue::from_str(value).ok()
}

fn non_blank(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.to_string())
}

fn join_base_url(base_url: &str, path: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let relative = path.strip_prefix('/').unwrap_or(path);

    // Allow base_url to already carry /v1 and still accept /v1-prefixed paths.
    if base.ends_with("/v1") {
        if relative == "v1" {
            return base.to_string();
        }
        if let Some(rest) = relative.strip_prefix("v1/") {
            return format!("{base}/{rest}");
        }
    }

    format!("{base}/{relative}")
}

use axum::http::HeaderMap;

pub const ORGANIZATION_HEADER: &str = "openai-organization";
pub const PROJECT_HEADER: &str = "openai-project";

/// Where the outbound organization/project identifiers came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScopeSource {
    ServerConfig,
    ClientForward,
    None,
}

impl ScopeSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ServerConfig => "server_config",
            Self::ClientForward => "client_forward",
            Self::None => "none",
        }
    }
}

/// Organization/project scope for one outbound request. Computed once per
/// call, never persisted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScopeHeaders {
    pub source: ScopeSource,
    pub organization: Option<String>,
    pub project: Option<String>,
}

impl ScopeHeaders {
    pub fn none() -> Self {
        Self {
            source: ScopeSource::None,
            organization: None,
            project: None,
        }
    }
}

/// Server configuration wins outright: if either value is configured, both
/// configured values are used and client-forwarded headers are ignored, even
/// when only one of the two is set.
pub fn resolve_scope_headers(
    configured_organization: Option<&str>,
    configured_project: Option<&str>,
    forward_client_scope_headers: bool,
    inbound: &HeaderMap,
) -> ScopeHeaders {
    if configured_organization.is_some() || configured_project.is_some() {
        return ScopeHeaders {
            source: ScopeSource::ServerConfig,
            organization: configured_organization.map(str::to_string),
            project: configured_project.map(str::to_string),
        };
    }

    if forward_client_scope_headers {
        let organization = header_value_trimmed(inbound, ORGANIZATION_HEADER);
        let project = header_value_trimmed(inbound, PROJECT_HEADER);
        let source = if organization.is_some() || project.is_some() {
            ScopeSource::ClientForward
        } else {
            ScopeSource::None
        };
        return ScopeHeaders {
            source,
            organization,
            project,
        };
    }

    ScopeHeaders::none()
}

fn header_value_trimmed(headers: &HeaderMap, name: &str) -> Option<String> {
    let value = headers.get(name)?.to_str().ok()?.trim();
    if value.is_empty() {
        return None;
    }
    Some(value.to_string())
}

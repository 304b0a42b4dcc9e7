use std::path::Path;

use serde::Deserialize;

use crate::error::ConfigError;

/// Root configuration, loaded once at startup from a TOML file.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub listen: String,
    pub security: SecurityConfig,
    pub rate_limit: RateLimitConfig,
    pub openai: OpenAiConfig,
    pub openrouter: OpenRouterConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8080".to_string(),
            security: SecurityConfig::default(),
            rate_limit: RateLimitConfig::default(),
            openai: OpenAiConfig::default(),
            openrouter: OpenRouterConfig::default(),
        }
    }
}

#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Shared secret internal callers must present as a bearer token.
    pub internal_api_key: String,
}

impl std::fmt::Debug for SecurityConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityConfig")
            .field("internal_api_key", &"<redacted>")
            .finish()
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Requests per minute per client key. Absent means unlimited.
    pub rpm: Option<u32>,
}

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct OpenAiConfig {
    pub base_url: String,
    pub api_key: String,
    pub connect_timeout_ms: u64,
    /// Response timeout for buffered calls.
    pub response_timeout_ms: u64,
    /// Response timeout for streaming calls. 0 means unbounded.
    pub stream_response_timeout_ms: u64,
    pub forward_client_scope_headers: bool,
    pub organization: String,
    pub project: String,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com".to_string(),
            api_key: String::new(),
            connect_timeout_ms: 30_000,
            response_timeout_ms: 60_000,
            stream_response_timeout_ms: 0,
            forward_client_scope_headers: false,
            organization: String::new(),
            project: String::new(),
        }
    }
}

impl std::fmt::Debug for OpenAiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .field("response_timeout_ms", &self.response_timeout_ms)
            .field("stream_response_timeout_ms", &self.stream_response_timeout_ms)
            .field(
                "forward_client_scope_headers",
                &self.forward_client_scope_headers,
            )
            .field("organization", &self.organization)
            .field("project", &self.project)
            .finish()
    }
}

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct OpenRouterConfig {
    pub base_url: String,
    pub api_key: String,
    pub connect_timeout_ms: u64,
    pub response_timeout_ms: u64,
    pub test_model: String,
}

impl Default for OpenRouterConfig {
    fn default() -> Self {
        Self {
            base_url: "https://openrouter.ai".to_string(),
            api_key: String::new(),
            connect_timeout_ms: 30_000,
            response_timeout_ms: 60_000,
            test_model: "openai/gpt-4o-mini".to_string(),
        }
    }
}

impl std::fmt::Debug for OpenRouterConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenRouterConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .field("response_timeout_ms", &self.response_timeout_ms)
            .field("test_model", &self.test_model)
            .finish()
    }
}

impl GatewayConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Misconfiguration is fatal here, before any traffic is served.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_credential("security.internal_api_key", &self.security.internal_api_key)?;
        require_credential("openai.api_key", &self.openai.api_key)?;
        require_credential("openrouter.api_key", &self.openrouter.api_key)?;
        if self.openai.connect_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                key: "openai.connect_timeout_ms",
                requirement: "greater than zero",
            });
        }
        if self.openrouter.connect_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                key: "openrouter.connect_timeout_ms",
                requirement: "greater than zero",
            });
        }
        if self.openrouter.test_model.trim().is_empty() {
            return Err(ConfigError::Invalid {
                key: "openrouter.test_model",
                requirement: "non-blank",
            });
        }
        Ok(())
    }
}

/// Rejects blank values and values still holding an unresolved `${...}`
/// configuration placeholder.
pub(crate) fn require_credential(key: &'static str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() || value.contains("${") {
        return Err(ConfigError::MissingCredential { key });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> GatewayConfig {
        let mut config = GatewayConfig::default();
        config.security.internal_api_key = "internal-key".to_string();
        config.openai.api_key = "sk-real".to_string();
        config.openrouter.api_key = "or-real".to_string();
        config
    }

    #[test]
    fn valid_config_passes() {
        valid_config().validate().expect("valid config");
    }

    #[test]
    fn blank_api_key_is_fatal() {
        let mut config = valid_config();
        config.openai.api_key = "   ".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingCredential {
                key: "openai.api_key"
            })
        ));
    }

    #[test]
    fn unresolved_placeholder_is_fatal() {
        let mut config = valid_config();
        config.security.internal_api_key = "${INTERNAL_API_KEY}".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingCredential {
                key: "security.internal_api_key"
            })
        ));
    }

    #[test]
    fn blank_test_model_is_fatal() {
        let mut config = valid_config();
        config.openrouter.test_model = " ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn parses_minimal_toml() {
        let config: GatewayConfig = toml::from_str(
            r#"
            listen = "0.0.0.0:9000"

            [security]
            internal_api_key = "internal-key"

            [rate_limit]
            rpm = 120

            [openai]
            api_key = "sk-real"

            [openrouter]
            api_key = "or-real"
            "#,
        )
        .expect("parse");
        assert_eq!(config.listen, "0.0.0.0:9000");
        assert_eq!(config.rate_limit.rpm, Some(120));
        assert_eq!(config.openai.base_url, "https://api.openai.com");
        assert_eq!(config.openrouter.test_model, "openai/gpt-4o-mini");
        config.validate().expect("valid");
    }
}

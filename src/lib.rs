//! HTTP gateway in front of upstream LLM providers. Authenticates internal
//! callers, validates and rewrites requests, then relays the provider's
//! reply, buffered or as a live event stream.

pub mod audio;
pub mod classify;
pub mod config;
pub mod error;
pub mod headers;
pub mod http;
pub mod limit;
pub mod multipart;
pub mod scope;
pub mod upstream;

pub use config::GatewayConfig;
pub use error::{ConfigError, GatewayError};
pub use http::{router, AppState};
pub use upstream::{OpenAiForwarder, OpenRouterForwarder};

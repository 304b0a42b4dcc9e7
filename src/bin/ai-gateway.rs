use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use ai_gateway::http::AppState;
use ai_gateway::{router, GatewayConfig, OpenAiForwarder, OpenRouterForwarder};

#[derive(Parser)]
#[command(name = "ai-gateway", about = "HTTP gateway for upstream LLM providers")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "gateway.toml")]
    config: PathBuf,

    /// Override the configured listen address.
    #[arg(long)]
    listen: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = GatewayConfig::load(&args.config)?;
    let listen = args.listen.unwrap_or_else(|| config.listen.clone());

    // Forwarder construction fails fast on bad credentials, before binding.
    let state = AppState {
        openai: Arc::new(OpenAiForwarder::new(&config.openai)?),
        openrouter: Arc::new(OpenRouterForwarder::new(&config.openrouter)?),
        internal_api_key: Arc::from(config.security.internal_api_key.as_str()),
        rate_limiter: ai_gateway::limit::from_config(&config.rate_limit),
    };

    let app = router(state).into_make_service_with_connect_info::<std::net::SocketAddr>();
    let listener = tokio::net::TcpListener::bind(&listen).await?;
    tracing::info!(listen, "ai-gateway listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        tracing::error!("failed to install ctrl-c handler");
    }
}

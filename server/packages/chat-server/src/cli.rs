use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::http::header::HeaderValue;
use clap::{Args, Parser, Subcommand};
use thiserror::Error;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::{
    RuntimeConfig, DEFAULT_AGENT_BINARY, DEFAULT_HEARTBEAT_SECS, DEFAULT_RUN_TIMEOUT_SECS,
    DEFAULT_STREAM_BUFFER_BYTES,
};
use crate::lifecycle::ChatRuntime;
use crate::router::build_router;
use crate::runner::AgentRunner;
use crate::sessions::SessionStore;
use crate::store::MessageStore;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("server error: {0}")]
    Server(#[from] std::io::Error),
}

#[derive(Parser)]
#[command(name = "research-chat", version, about = "Research-assistant chat service")]
pub struct ResearchChatCli {
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Run the chat HTTP server.
    Server(ServerArgs),
}

#[derive(Args)]
struct ServerArgs {
    /// Address to bind.
    #[arg(long, default_value = "127.0.0.1")]
    host: IpAddr,

    /// Port to listen on.
    #[arg(long, default_value_t = 15010)]
    port: u16,

    /// Explicit path to the agent executable. Defaults to PATH lookup.
    #[arg(long)]
    agent_path: Option<PathBuf>,

    /// Agent binary name used for PATH lookup.
    #[arg(long, default_value = DEFAULT_AGENT_BINARY)]
    agent_binary: String,

    /// Hard per-run wall-clock limit, in seconds.
    #[arg(long, default_value_t = DEFAULT_RUN_TIMEOUT_SECS)]
    run_timeout_secs: u64,

    /// Keep-alive interval while the agent is quiet, in seconds.
    #[arg(long, default_value_t = DEFAULT_HEARTBEAT_SECS)]
    heartbeat_secs: u64,

    /// Line reader buffer capacity, in bytes.
    #[arg(long, default_value_t = DEFAULT_STREAM_BUFFER_BYTES)]
    stream_buffer_bytes: usize,

    /// Allowed CORS origins. Repeatable; all origins are allowed when unset.
    #[arg(long = "cors-allow-origin")]
    cors_allow_origins: Vec<String>,
}

pub fn run_research_chat() -> Result<(), CliError> {
    let cli = ResearchChatCli::parse();
    init_logging();
    match cli.command {
        CliCommand::Server(args) => run_server(args),
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_logfmt::layer())
        .init();
}

fn run_server(args: ServerArgs) -> Result<(), CliError> {
    let config = RuntimeConfig {
        agent_path: args.agent_path.clone(),
        agent_binary: args.agent_binary.clone(),
        run_timeout: Duration::from_secs(args.run_timeout_secs),
        heartbeat_interval: Duration::from_secs(args.heartbeat_secs),
        stream_buffer_bytes: args.stream_buffer_bytes,
    };
    config
        .validate()
        .map_err(|err| CliError::Config(err.to_string()))?;
    let cors = build_cors_layer(&args.cors_allow_origins)?;

    let runtime = Arc::new(ChatRuntime::new(
        Arc::new(MessageStore::new()),
        Arc::new(SessionStore::new()),
        Arc::new(AgentRunner::new(config)),
    ));
    let app = build_router(runtime)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let addr = SocketAddr::new(args.host, args.port);
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!(%addr, "research-chat listening");
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
    })?;
    Ok(())
}

fn build_cors_layer(origins: &[String]) -> Result<CorsLayer, CliError> {
    let cors = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() {
        return Ok(cors.allow_origin(Any));
    }
    let parsed = origins
        .iter()
        .map(|origin| {
            origin
                .parse::<HeaderValue>()
                .map_err(|err| CliError::Config(format!("invalid cors origin {origin}: {err}")))
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(cors.allow_origin(AllowOrigin::list(parsed)))
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to install shutdown handler");
    }
    tracing::info!("shutdown signal received");
}

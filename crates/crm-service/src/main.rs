use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use crm_assistant::{
    AssistantProvider, GeminiConfig, GeminiProvider, DEFAULT_GEMINI_BASE_URL, DEFAULT_GEMINI_MODEL,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

mod api;
mod routes;

use api::CrmApi;
use routes::{app, ServiceState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "crm-service")]
#[command(about = "HTTP service for the department integration CRM")]
struct Args {
    #[arg(long, env = "CRM_DB", default_value = "./crm.sqlite3")]
    db: PathBuf,
    #[arg(long, env = "CRM_BIND", default_value = "127.0.0.1:5000")]
    bind: SocketAddr,
    #[arg(long, env = "CRM_OPERATION_TIMEOUT_MS", default_value_t = 2500)]
    operation_timeout_ms: u64,
    #[arg(long, env = "CRM_BUSY_TIMEOUT_MS", default_value_t = 5000)]
    busy_timeout_ms: u64,
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    gemini_api_key: Option<String>,
    #[arg(long, env = "GEMINI_MODEL", default_value = DEFAULT_GEMINI_MODEL)]
    gemini_model: String,
    #[arg(long, env = "GEMINI_BASE_URL", default_value = DEFAULT_GEMINI_BASE_URL)]
    gemini_base_url: String,
    #[arg(long, env = "CRM_ASSISTANT_TIMEOUT_MS", default_value_t = 60_000)]
    assistant_timeout_ms: u64,
    #[arg(long, env = "CRM_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
        LogFormat::Text => registry.with(fmt::layer()).init(),
    }
}

fn build_assistant(args: &Args) -> Option<Arc<dyn AssistantProvider>> {
    let config = GeminiConfig::from_parts(
        args.gemini_api_key.clone(),
        Some(args.gemini_model.clone()),
        Some(args.gemini_base_url.clone()),
        args.assistant_timeout_ms,
    )?;
    tracing::info!(model = %config.model, "gemini assistant configured");
    Some(Arc::new(GeminiProvider::new(config)))
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(mut term), Ok(mut int)) => {
                tokio::select! {
                    _ = term.recv() => {}
                    _ = int.recv() => {}
                }
            }
            (Err(err), _) | (_, Err(err)) => {
                tracing::warn!(
                    error = %err,
                    "unix signal handlers unavailable; falling back to ctrl-c"
                );
                if let Err(err) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %err, "failed to listen for ctrl-c");
                }
            }
        }
    }
    #[cfg(not(unix))]
    {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for ctrl-c");
        }
    }
    tracing::info!("shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.log_format);

    let assistant = build_assistant(&args);
    if assistant.is_none() {
        tracing::warn!(
            "GEMINI_API_KEY not set; /api/chat will report the assistant as unconfigured"
        );
    }

    let api = CrmApi::new(args.db.clone(), assistant)
        .with_busy_timeout(Duration::from_millis(args.busy_timeout_ms));
    let migrate_api = api.clone();
    let schema_version = tokio::task::spawn_blocking(move || migrate_api.migrate())
        .await
        .context("migration task failed to complete")??;
    tracing::info!(db = %api.db_path().display(), ?schema_version, "database ready");

    let state = ServiceState::new(
        api,
        Duration::from_millis(args.operation_timeout_ms),
        Duration::from_millis(args.assistant_timeout_ms),
    );
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);
    let router = app(state).layer(TraceLayer::new_for_http()).layer(cors);

    let listener = tokio::net::TcpListener::bind(args.bind)
        .await
        .with_context(|| format!("failed to bind {}", args.bind))?;
    tracing::info!(bind = %args.bind, "crm-service listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(wait_for_shutdown_signal())
        .await
        .context("http server failed")?;
    Ok(())
}

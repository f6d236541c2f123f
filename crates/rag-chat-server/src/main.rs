use anyhow::Result;
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::BufReader;
use tracing::{info, warn};
use uuid::Uuid;

use rag_chat_server::app::build_router;
use rag_chat_server::config::Settings;
use rag_chat_server::repl;
use rag_chat_server::services::conversation::ConversationManager;
use rag_chat_server::state::AppState;
use rag_chat_server::utils::logger::init_logger;

#[derive(Parser)]
#[command(name = "rag-chat-server")]
#[command(about = "Retrieval-augmented chat server with per-session memory")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Path to the settings file
    #[arg(short, long, env = "APP_CONFIG", default_value = "config/settings.toml")]
    config: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server - Default
    Serve,
    /// Chat with the knowledge base from the terminal
    Chat {
        /// Session to continue; a fresh one is created when omitted
        #[arg(long)]
        session: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // RUST_LOG, LOG_FORMAT and LOG_DIR may come from .env
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let _log_guard = init_logger()?;

    let settings = Settings::load(&cli.config)?;
    info!("✅ Configuration loaded from {}", cli.config);

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(settings).await,
        Commands::Chat { session } => chat(settings, session).await,
    }
}

async fn serve(settings: Settings) -> Result<()> {
    info!("🚀 Starting RAG chat server...");

    let addr = SocketAddr::from((
        settings.server.host.parse::<std::net::IpAddr>()?,
        settings.server.port,
    ));
    let cleanup_interval = Duration::from_secs(settings.conversation.cleanup_interval_seconds.max(1));

    let state = AppState::from_settings(settings).await?;
    spawn_session_cleanup(state.conversation_manager.clone(), cleanup_interval);

    let app = build_router(state);

    info!("🎯 Server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn chat(settings: Settings, session: Option<String>) -> Result<()> {
    let state = AppState::from_settings(settings).await?;
    let session_id = session.unwrap_or_else(|| Uuid::new_v4().to_string());
    info!("Chat session {}", session_id);

    let stdin = BufReader::new(tokio::io::stdin());
    repl::run(&state.conversation_manager, &session_id, stdin, tokio::io::stdout()).await
}

fn spawn_session_cleanup(manager: Arc<ConversationManager>, period: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        // First tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let removed = manager.cleanup_expired_sessions();
            let stats = manager.cache_stats();
            info!(
                "Session cleanup: removed={}, active={}, pending={}, memory={:.1}%",
                removed, stats.active_sessions, stats.pending_sessions, stats.memory_usage_percent
            );
        }
    });
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

//! Gatewise Gate Discovery (gatewise-gd) - Main entry point
//!
//! Infers physical entry gates from wristband scan telemetry, learns
//! which ticket categories belong at each gate, and answers the
//! synchronous check-in validation decision for the scanning
//! application.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gatewise_common::events::EventBus;
use gatewise_gd::AppState;

/// Command-line arguments for gatewise-gd
#[derive(Parser, Debug)]
#[command(name = "gatewise-gd")]
#[command(about = "Gate discovery and category enforcement service")]
#[command(version)]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "5730", env = "GATEWISE_GD_PORT")]
    port: u16,

    /// Root folder for the database (falls back to env, config file,
    /// then the platform default)
    #[arg(short, long)]
    root_folder: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gatewise_gd=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    info!("Starting gatewise-gd on port {}", args.port);
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    // Resolve root folder and open (or create) the database
    let cli_root = args.root_folder.as_ref().map(|p| p.to_string_lossy().to_string());
    let root_folder =
        gatewise_common::config::resolve_root_folder(cli_root.as_deref(), "GATEWISE_ROOT_FOLDER")
            .context("Failed to resolve root folder")?;
    let db_path = gatewise_common::config::ensure_root_folder(&root_folder)
        .context("Failed to initialize root folder")?;
    info!("Database: {}", db_path.display());

    let db_pool = gatewise_common::db::init_database(&db_path).await?;
    info!("Database connection established");

    // Event bus for SSE broadcasting
    let capacity =
        gatewise_common::db::settings::get_setting_i64(&db_pool, "gd_event_bus_capacity", 1000)
            .await? as usize;
    let event_bus = EventBus::new(capacity);
    info!("Event bus initialized (capacity {})", capacity);

    let state = AppState::new(db_pool, event_bus);
    let app = gatewise_gd::build_router(state)
        .layer(tower_http::trace::TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(("127.0.0.1", args.port)).await?;
    info!("Listening on http://127.0.0.1:{}", args.port);
    info!("Health check: http://127.0.0.1:{}/health", args.port);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutdown signal received");
}

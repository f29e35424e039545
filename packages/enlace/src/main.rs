use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::prelude::*;

use enlace::config::{
    AuthConfig, DEFAULT_HOST, DEFAULT_PORT, EnlaceConfig, FileConfig, PushConfig, load_config,
};
use enlace::db::Database;
use enlace::identity::JwtVerifier;
use enlace::{AppState, build_router, cors_layer};

#[derive(Parser)]
#[command(name = "enlace")]
#[command(about = "Notification service with real-time WebSocket push")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Custom data directory (defaults to ~/.enlace)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server in the foreground
    Serve(ServeArgs),
}

#[derive(Parser)]
struct ServeArgs {
    /// Port for the web server (overrides config; 0 = auto-select)
    #[arg(short, long)]
    port: Option<u16>,

    /// Host to bind to (overrides config)
    #[arg(short = 'b', long)]
    host: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Clean start - reset database (prompt for confirmation)
    #[arg(long)]
    reset_db: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve(args) => run_server(args, cli.data_dir).await,
    }
}

async fn run_server(args: ServeArgs, data_dir: Option<PathBuf>) -> Result<()> {
    // Setup logging
    let default_directive = if args.debug {
        "enlace=debug,enlace_hub=debug,tower_http=debug,info"
    } else {
        "enlace=info,enlace_hub=info,tower_http=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter)
        .init();

    info!("Starting Enlace notification service");

    let config = EnlaceConfig::new(data_dir)?;
    let file_config: FileConfig = load_config(&config.data_dir)
        .extract()
        .with_context(|| format!("Invalid configuration in {:?}", config.config_toml_path()))?;

    // Handle database reset if requested
    if args.reset_db && config.db_path.exists() {
        println!("This will delete all stored users and notifications!");
        print!("Are you sure? (yes/no): ");
        use std::io::{self, Write};
        io::stdout().flush()?;
        let mut input = String::new();
        io::stdin().read_line(&mut input)?;
        if input.trim() == "yes" {
            config.reset_database()?;
            println!("Database reset.");
        } else {
            println!("Cancelled.");
        }
    }

    let auth_config = AuthConfig::from_file(&file_config.auth)?;
    let push_config = PushConfig::from_file(&file_config.hub);
    info!(
        "Hub config: queue_capacity={}, ping_interval={:?}",
        push_config.hub.queue_capacity, push_config.pumps.ping_interval
    );

    info!("Initializing database...");
    let db = Database::new(&config).await?;

    let state = AppState::new(db, Arc::new(JwtVerifier::new(&auth_config)), &push_config);
    let hub_for_shutdown = state.hub.clone();

    let cors = cors_layer(&file_config.server.allowed_origins)?;
    let app = build_router(state, cors);

    let host = args
        .host
        .or(file_config.server.host)
        .unwrap_or_else(|| DEFAULT_HOST.to_string());
    let port = args.port.or(file_config.server.port).unwrap_or(DEFAULT_PORT);
    let addr = format!("{}:{}", host, port)
        .parse::<SocketAddr>()
        .with_context(|| format!("Invalid listen address {}:{}", host, port))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    let actual_addr = listener.local_addr()?;

    info!("Enlace listening on http://{}", actual_addr);
    info!("API endpoints:");
    info!("  POST   /api/v1/users                    - Provision the caller");
    info!("  GET    /api/v1/users/me                 - Current user");
    info!("  GET    /api/v1/notifications            - List notifications");
    info!("  POST   /api/v1/notifications/:id/read   - Mark as read");
    info!("  GET    /api/v1/notifications/ws         - Real-time push");

    let shutdown_signal = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Received shutdown signal, cleaning up...");
    };

    let server_result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
        .context("Server error");

    // Closing every queue makes each writer pump send a close frame
    info!("Closing live connections...");
    hub_for_shutdown.shutdown().await;

    info!("Shutdown complete");
    server_result
}

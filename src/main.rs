//! ACS main application

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{error, info};

use novafiber_acs::{
    config::AcsConfig,
    core::{build_router, Acs, AcsEvent},
    store::{postgres::PostgresStore, Store},
    utils::setup_logging,
    Result,
};

#[derive(Parser)]
#[command(name = "novafiber-acs")]
#[command(about = "Auto Configuration Server for CWMP/TR-069 CPE")]
#[command(version = novafiber_acs::VERSION)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the ACS
    Start,
    /// Stop a running ACS
    Stop,
    /// Check ACS status
    Status,
    /// Validate configuration
    ValidateConfig,
    /// Generate default configuration
    GenerateConfig {
        /// Output file path
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load a local `.env` before falling back to process environment/defaults.
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    // Load configuration
    let mut config = load_configuration(&cli).await?;
    if cli.log_level != "info" {
        config.logging.level = cli.log_level.clone();
    }

    // Setup logging
    setup_logging(&config.logging)?;

    info!("Starting {} v{}", novafiber_acs::NAME, novafiber_acs::VERSION);
    info!("Description: {}", novafiber_acs::DESCRIPTION);

    // Handle commands
    match &cli.command {
        Some(Commands::Start) | None => run_acs(config).await,
        Some(Commands::Stop) => stop_acs().await,
        Some(Commands::Status) => show_status().await,
        Some(Commands::ValidateConfig) => validate_configuration(&config).await,
        Some(Commands::GenerateConfig { output }) => generate_default_config(output.clone()).await,
    }
}

async fn load_configuration(cli: &Cli) -> Result<AcsConfig> {
    let config = if let Some(config_path) = &cli.config {
        info!("Loading configuration from: {}", config_path.display());
        AcsConfig::load_from_file(config_path)?
    } else {
        info!("No configuration file specified, trying environment variables");
        match AcsConfig::load_from_env() {
            Ok(config) => config,
            Err(_) => {
                info!("No environment configuration found, using defaults");
                AcsConfig::default_config()
            }
        }
    };

    // Validate configuration
    config.validate()?;
    info!("Configuration loaded and validated successfully");

    Ok(config)
}

async fn run_acs(config: AcsConfig) -> Result<()> {
    info!(
        instance = %config.instance.id,
        port = config.server.listen_port,
        "Initializing ACS"
    );

    let store: Arc<dyn Store> = Arc::new(
        PostgresStore::connect(&config.database.url, config.database.max_connections).await?,
    );

    let (event_tx, mut event_rx) = mpsc::channel::<AcsEvent>(256);
    let acs = Arc::new(Acs::new(
        store,
        std::time::Duration::from_secs(config.server.session_idle_timeout_secs),
        std::time::Duration::from_secs(config.connection_request.timeout_secs),
        event_tx,
    ));

    // The WebSocket broadcast hub is an external collaborator; here we just
    // log what it would otherwise be notified of.
    let event_task = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            handle_acs_event(event).await;
        }
    });

    let router = build_router(acs);
    let bind_addr = format!("{}:{}", config.server.bind_address, config.server.listen_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(address = %bind_addr, "CWMP dispatcher listening");

    axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    event_task.abort();
    info!("ACS shutdown complete");
    Ok(())
}

async fn handle_acs_event(event: AcsEvent) {
    match event {
        AcsEvent::DeviceStatusChanged { device_id, status } => {
            info!(%device_id, status = status.as_str(), "Device status changed");
        }
        AcsEvent::TaskCompleted { device_id, task_id } => {
            info!(%device_id, %task_id, "Task completed");
        }
        AcsEvent::TaskFailed { device_id, task_id, error } => {
            error!(%device_id, %task_id, %error, "Task failed");
        }
    }
}

async fn shutdown_signal() {
    match signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, shutting down gracefully"),
        Err(err) => error!("Unable to listen for shutdown signal: {}", err),
    }
}

async fn stop_acs() -> Result<()> {
    // In a real implementation, this would connect to a running instance
    // and send a shutdown signal (e.g., via Unix socket or signal)
    println!("Stop command not implemented (send SIGTERM to running process)");
    Ok(())
}

async fn show_status() -> Result<()> {
    // In a real implementation, this would connect to a running instance
    // and query its status
    println!("Status command not implemented");
    Ok(())
}

async fn validate_configuration(config: &AcsConfig) -> Result<()> {
    info!("Validating configuration...");

    config.validate()?;

    println!("✓ Configuration is valid");
    println!("  Instance ID: {}", config.instance.id);
    println!("  Listen: {}:{}", config.server.bind_address, config.server.listen_port);
    println!("  Database: {}", config.database.url);
    println!("  Connection-request timeout: {}s", config.connection_request.timeout_secs);

    Ok(())
}

async fn generate_default_config(output_path: Option<PathBuf>) -> Result<()> {
    let config = AcsConfig::default_config();
    let toml_content = toml::to_string_pretty(&config)
        .map_err(|e| novafiber_acs::Error::internal(format!("Failed to serialize config: {}", e)))?;

    match output_path {
        Some(path) => {
            std::fs::write(&path, toml_content)?;
            println!("✓ Default configuration written to: {}", path.display());
        }
        None => {
            println!("{}", toml_content);
        }
    }

    Ok(())
}

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

use packmirror::commands;
use packmirror::config;
use packmirror::error::{MirrorError, Result};
use packmirror::fetch::HttpOrigin;
use packmirror::registry::{Extension, ResourcePack};
use packmirror::state::AppState;
use packmirror::web;

#[derive(Parser, Debug)]
#[command(name = "packmirror")]
#[command(about = "A local pass-through mirror server with resource pack and extension support", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to configuration file (TOML/JSON)
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Debug, clap::Subcommand)]
enum Command {
    /// Run the mirror server (default)
    Run,
    /// Extension related commands
    #[command(alias = "ext")]
    Extension {
        #[command(subcommand)]
        action: PackCommand,
    },
    /// Resource pack related commands
    #[command(aliases = ["resource", "res", "resp"])]
    Resourcepack {
        #[command(subcommand)]
        action: PackCommand,
    },
}

#[derive(Debug, clap::Subcommand)]
enum PackCommand {
    /// Enable a package by id
    Enable { id: String },
    /// Disable a package by id
    Disable { id: String },
    /// Remove a package from disk
    Remove { id: String },
    /// List packages with their activation state
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("packmirror={log_level}").parse().unwrap()),
        )
        .init();

    let config = match &args.config {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            config::load_from_path(path)?
        }
        None => config::load_from_env_or_file()?,
    };

    match args.command.unwrap_or(Command::Run) {
        Command::Extension { action } => run_pack_command::<Extension>(&config, action),
        Command::Resourcepack { action } => run_pack_command::<ResourcePack>(&config, action),
        Command::Run => run_server(config).await,
    }
}

fn run_pack_command<P: packmirror::registry::Package>(
    config: &config::Config,
    action: PackCommand,
) -> Result<()> {
    match action {
        PackCommand::Enable { id } => commands::change_enable::<P>(config, &id, true),
        PackCommand::Disable { id } => commands::change_enable::<P>(config, &id, false),
        PackCommand::Remove { id } => commands::remove::<P>(config, &id),
        PackCommand::List => commands::list::<P>(config),
    }
}

async fn run_server(config: config::Config) -> Result<()> {
    // Only an inaccessible data directory is allowed to be process-fatal.
    if !config.data_dir.is_dir() {
        error!("Data directory not found: {}", config.data_dir.display());
        return Err(MirrorError::DataDirInaccessible(
            config.data_dir.display().to_string(),
        ));
    }
    std::fs::create_dir_all(config.resourcepack_dir())?;
    std::fs::create_dir_all(config.extension_dir())?;

    info!("Starting packmirror");
    info!(
        "Mirroring upstream '{}' ({})",
        config.active_upstream().name,
        config.active_upstream().domain
    );

    let state = AppState::new(config, Arc::new(HttpOrigin::new()));
    state.load_packages().await?;

    {
        let resourcepacks = state.resourcepacks.read().await;
        let extensions = state.extensions.read().await;
        info!(
            "Loaded {} resource pack(s), {} extension(s)",
            resourcepacks.len(),
            extensions.len()
        );
    }

    let server_state = state.clone();
    tokio::select! {
        result = web::start_server(server_state) => result,
        _ = shutdown_signal() => {
            info!("Shutting down packmirror");
            Ok(())
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
    }
}

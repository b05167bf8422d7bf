//! Smart bin device - main entry point

use clap::{Parser, Subcommand};
use smartbin::config::DeviceConfig;
use smartbin::device::{Supervisor, SupervisorOutcome, RESTART_EXIT_CODE};
use smartbin::observability::{init_default_logging, metrics};
use std::path::{Path, PathBuf};
use std::process;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};

/// Waste-bin telemetry publisher
#[derive(Parser)]
#[command(name = "smartbin")]
#[command(about = "Publishes smart bin sensor telemetry over MQTT/WebSocket")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "SMARTBIN_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Provision, connect and publish until interrupted
    Run,
    /// Validate configuration
    Config {
        /// Show the effective configuration
        #[arg(long)]
        show: bool,
    },
}

const DEFAULT_CONFIG_PATHS: [&str; 2] = ["smartbin.toml", "config/smartbin.toml"];

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    init_default_logging();

    info!("Starting smartbin v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let code = match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_device(config).await,
        Commands::Config { show } => handle_config_command(&config, show),
    };

    if code != 0 {
        process::exit(code);
    }
}

fn load_configuration(config_path: Option<&Path>) -> Result<DeviceConfig, Box<dyn std::error::Error>> {
    if let Some(path) = config_path {
        info!("Loading configuration from: {}", path.display());
        return Ok(DeviceConfig::load_from_file(path)?);
    }

    for path_str in DEFAULT_CONFIG_PATHS {
        let path = Path::new(path_str);
        if path.exists() {
            info!("Loading configuration from: {}", path.display());
            return Ok(DeviceConfig::load_from_file(path)?);
        }
    }

    Err("no configuration file found; pass -c/--config or create smartbin.toml".into())
}

async fn run_device(config: DeviceConfig) -> i32 {
    info!(
        mac = %config.device.hardware_address,
        mode = ?config.device.mode,
        broker = %config.mqtt.broker_url,
        "Device starting"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match wait_for_signal().await {
            Ok(signal_name) => info!("Received {}, shutting down gracefully...", signal_name),
            Err(e) => error!("Signal handler failed: {}", e),
        }
        let _ = shutdown_tx.send(true);
    });

    let mut supervisor = Supervisor::new(config);
    let code = match supervisor.run(shutdown_rx).await {
        Ok(SupervisorOutcome::Shutdown) => 0,
        Ok(SupervisorOutcome::ExitForRestart(reason)) => {
            info!(reason = %reason, "Exiting for service manager restart");
            RESTART_EXIT_CODE
        }
        Err(e) => {
            error!(error = %e.to_log_message(), kind = e.kind(), "Device failed");
            1
        }
    };

    metrics().set_session_state("stopped");
    info!("Application shutdown complete");
    code
}

async fn wait_for_signal() -> std::io::Result<&'static str> {
    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = sigint.recv() => Ok("SIGINT"),
        _ = sigterm.recv() => Ok("SIGTERM"),
    }
}

fn handle_config_command(config: &DeviceConfig, show: bool) -> i32 {
    if show {
        match toml::to_string_pretty(config) {
            Ok(rendered) => {
                println!("Current configuration:");
                println!("{rendered}");
            }
            Err(e) => {
                error!("Failed to render configuration: {}", e);
                return 1;
            }
        }
    }

    info!("Configuration validation complete");
    0
}

//! ---
//! pde_section: "01-core-functionality"
//! pde_subsection: "binary"
//! pde_type: "source"
//! pde_scope: "code"
//! pde_description: "Binary entrypoint for the plant description engine daemon."
//! pde_version: "v0.0.0-prealpha"
//! pde_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use pde_api::{spawn_api_server, ApiServer, ApiState};
use pde_common::config::AppConfig;
use pde_common::logging::init_tracing;
use pde_core::{Collaborators, Engine};
use pde_metrics::{new_registry, spawn_http_server, DaemonMetrics, SharedRegistry};
use tokio::signal;
use tracing::{info, warn};

const BUILD_PROFILE: &str = if cfg!(debug_assertions) {
    "debug"
} else {
    "release"
};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Plant description engine daemon",
    long_about = None
)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Run the engine")]
    Run,
    #[command(about = "Load and validate the configuration, then print the effective settings")]
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("configs/pded.toml"));
    candidates.push(PathBuf::from("configs/pded.example.toml"));

    let loaded_config = AppConfig::load_with_source(&candidates)?;
    let config = loaded_config.config;
    let config_path = loaded_config.source;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::CheckConfig => {
            println!("# loaded from {}", config_path.display());
            println!("{}", toml::to_string_pretty(&config)?);
        }
        Commands::Run => {
            let metrics_registry = new_registry();
            let daemon_metrics = DaemonMetrics::new(metrics_registry.clone())?;
            daemon_metrics.inc_start();
            daemon_metrics.set_build_info(env!("CARGO_PKG_VERSION"), BUILD_PROFILE);

            init_tracing("pded", &config.logging)?;
            info!(
                config = %config_path.display(),
                version = env!("CARGO_PKG_VERSION"),
                "configuration loaded"
            );
            run_daemon(config, Some(metrics_registry)).await?;
        }
    }

    Ok(())
}

async fn run_daemon(config: AppConfig, mut metrics_registry: Option<SharedRegistry>) -> Result<()> {
    let metrics_settings = config.metrics.clone();
    let api_settings = config.api.clone();

    let metrics_server = if metrics_settings.enabled {
        match metrics_registry.clone() {
            Some(registry) => {
                info!(address = %metrics_settings.listen, "metrics exporter enabled");
                Some(spawn_http_server(registry, metrics_settings.listen)?)
            }
            None => {
                warn!("metrics exporter requested but no registry available");
                None
            }
        }
    } else {
        metrics_registry = None;
        info!("metrics exporter disabled by configuration");
        None
    };

    let collaborators = Collaborators::from_config(&config)?;
    let handle = Engine::new(config, collaborators, metrics_registry)
        .start()
        .await?;

    let mut api_server: Option<ApiServer> = None;
    if api_settings.enabled {
        let state = Arc::new(ApiState::from_engine(&handle));
        match spawn_api_server(state, api_settings.listen) {
            Ok(server) => {
                info!(address = %server.addr(), "api server listening");
                api_server = Some(server);
            }
            Err(err) => {
                warn!(error = %err, "failed to start api server");
            }
        }
    } else {
        info!("api server disabled by configuration");
    }

    info!("daemon running; waiting for termination signal");
    signal::ctrl_c().await?;
    info!("ctrl-c received; shutting down");

    if let Some(server) = api_server {
        server.shutdown().await?;
    }
    handle.shutdown().await;

    if let Some(server) = metrics_server {
        server.shutdown().await?;
    }

    Ok(())
}

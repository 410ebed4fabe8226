mod bootstrap;
mod health;
mod http;
mod loader;
mod settings;
#[cfg(test)]
mod testing;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use pingpong_core::config::{AppConfig, LoadOptions};

use crate::health::HealthState;
use crate::settings::SettingsState;

#[derive(Debug, Parser)]
#[command(
    name = "pingpong-server",
    about = "Crisp plugin that auto-replies to visitor messages",
    after_help = "Examples:\n  pingpong-server\n  pingpong-server --config config/pingpong.toml"
)]
struct Cli {
    #[arg(long, help = "Path to a TOML config file (defaults to pingpong.toml)")]
    config: Option<PathBuf>,
}

fn init_logging(config: &AppConfig) {
    use pingpong_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run(Cli::parse()).await
}

async fn run(cli: Cli) -> Result<()> {
    let require_file = cli.config.is_some();
    let config = bootstrap::load_config(LoadOptions {
        config_path: cli.config,
        require_file,
        ..LoadOptions::default()
    })?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;

    let router = http::router(
        SettingsState {
            api: app.api.clone(),
            registry: app.registry.clone(),
            plugin_id: Arc::from(app.identity.plugin_id.as_str()),
            templates: settings::init_templates(),
        },
        HealthState { connection: app.connection.clone(), registry: app.registry.clone() },
    );
    http::spawn(&app.config.server.bind_address, app.config.server.port, router).await?;

    let runner = app.rtm_runner;
    let events = tokio::spawn(async move {
        if let Err(error) = runner.run().await {
            tracing::error!(
                event_name = "system.rtm.stopped",
                correlation_id = "rtm",
                error = %error,
                "event stream stopped"
            );
        }
    });

    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        websites = app.registry.len(),
        pages_loaded = app.load_report.pages_loaded,
        registry_complete = app.load_report.is_complete(),
        listen_address = %app.config.listen_address(),
        "pingpong-server started"
    );
    wait_for_shutdown().await?;
    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        "pingpong-server stopping"
    );
    events.abort();

    Ok(())
}

async fn wait_for_shutdown() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}

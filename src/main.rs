#![allow(missing_docs)]

//! Limpet — sticky messages for Discord channels.
//!
//! Watches channel traffic through the gateway and reposts each
//! channel's sticky message after a configurable number of intervening
//! messages, so it always sits at the bottom of the conversation.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use limpet::config::{self, Config};
use limpet::discord;
use limpet::discord::port::GatewayPort;
use limpet::engine::port::ChannelPort;
use limpet::engine::StickyEngine;
use limpet::logging;
use limpet::store::JsonStickyStore;

#[derive(Parser)]
#[command(name = "limpet", version, about = "Sticky message bot for Discord")]
struct Cli {
    /// Path to config.toml (defaults to ~/.limpet/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a starter config file.
    Init,
    /// Connect to Discord and start serving sticky messages.
    Start,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config_path = match cli.config {
        Some(path) => path,
        None => config::config_dir()?.join("config.toml"),
    };

    match cli.command {
        Commands::Init => init(&config_path),
        Commands::Start => start(&config_path).await,
    }
}

/// Write the starter config, refusing to clobber an existing file.
fn init(config_path: &Path) -> Result<()> {
    logging::init_cli();

    if config_path.exists() {
        info!(path = %config_path.display(), "config already exists, leaving it alone");
        return Ok(());
    }
    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    std::fs::write(config_path, config::STARTER_CONFIG)
        .with_context(|| format!("failed to write {}", config_path.display()))?;
    info!(path = %config_path.display(), "starter config written");
    Ok(())
}

/// Load config, restore persisted state, and run the gateway loop.
async fn start(config_path: &Path) -> Result<()> {
    let config: Config =
        config::load_config(config_path).context("failed to load configuration")?;
    let paths = config.runtime_paths()?;
    let _logging_guard = logging::init_production(&paths.logs_dir)?;

    info!(version = env!("CARGO_PKG_VERSION"), "limpet starting");

    // The only fatal condition: no way to reach Discord.
    let token = std::env::var(&config.discord.bot_token_env).with_context(|| {
        format!(
            "bot token missing: set the {} environment variable",
            config.discord.bot_token_env
        )
    })?;

    let store = Arc::new(JsonStickyStore::new(paths.data_file.clone()));
    let port = Arc::new(GatewayPort::new());
    let dyn_port: Arc<dyn ChannelPort> = port.clone();
    let engine = Arc::new(StickyEngine::new(
        store,
        dyn_port,
        config.engine.default_msg_limit,
    ));

    match engine.restore().await {
        Ok(0) => info!("no persisted sticky data found"),
        Ok(count) => info!(channels = count, path = %paths.data_file.display(), "restored sticky data"),
        Err(e) => warn!(error = %e, "failed to load sticky data, continuing with empty state"),
    }

    discord::run(&token, engine, port).await
}

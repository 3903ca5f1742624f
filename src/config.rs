//! Configuration loading and validation.
//!
//! Limpet reads a single TOML file, by default `~/.limpet/config.toml`.
//! The bot token never lives in the file; the config only names the
//! environment variable that holds it.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

/// Top-level configuration. Every section has working defaults, so a
/// missing file means "run with defaults", not an error.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Discord connection settings.
    pub discord: DiscordConfig,
    /// Storage locations.
    pub storage: StorageConfig,
    /// Engine tuning.
    pub engine: EngineConfig,
}

/// Discord-specific configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DiscordConfig {
    /// Environment variable name holding the bot token.
    pub bot_token_env: String,
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            bot_token_env: "LIMPET_DISCORD_TOKEN".to_owned(),
        }
    }
}

/// Storage locations; unset paths resolve under the config directory.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Sticky data file; defaults to `sticky_data.json` in the config dir.
    pub data_file: Option<PathBuf>,
    /// Log directory; defaults to `logs/` in the config dir.
    pub logs_dir: Option<PathBuf>,
}

/// Engine tuning.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Repost limit applied when `/stick` first configures a channel.
    pub default_msg_limit: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_msg_limit: crate::types::DEFAULT_MSG_LIMIT,
        }
    }
}

/// Resolved filesystem locations for a running bot.
#[derive(Debug, Clone)]
pub struct RuntimePaths {
    /// JSON file holding the persisted sticky map.
    pub data_file: PathBuf,
    /// Directory for rotated JSON logs.
    pub logs_dir: PathBuf,
}

impl Config {
    /// Resolve data and log paths, applying config-dir defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the home directory cannot be determined.
    pub fn runtime_paths(&self) -> anyhow::Result<RuntimePaths> {
        let base = config_dir()?;
        Ok(RuntimePaths {
            data_file: self
                .storage
                .data_file
                .clone()
                .unwrap_or_else(|| base.join("sticky_data.json")),
            logs_dir: self
                .storage
                .logs_dir
                .clone()
                .unwrap_or_else(|| base.join("logs")),
        })
    }
}

/// Starter config written by `limpet init`.
pub const STARTER_CONFIG: &str = r#"# Limpet configuration.
#
# The bot token itself never lives in this file; set the environment
# variable named below (a .env file next to the binary also works).

[discord]
bot_token_env = "LIMPET_DISCORD_TOKEN"

[engine]
# Messages between reposts for newly configured channels.
default_msg_limit = 10

[storage]
# data_file = "/var/lib/limpet/sticky_data.json"
# logs_dir = "/var/log/limpet"
"#;

/// Load configuration from `path`, falling back to defaults when the
/// file does not exist.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_config(path: &Path) -> anyhow::Result<Config> {
    match std::fs::read_to_string(path) {
        Ok(contents) => {
            let config = toml::from_str(&contents)
                .with_context(|| format!("failed to parse config at {}", path.display()))?;
            Ok(config)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::info!(path = %path.display(), "no config file found, using defaults");
            Ok(Config::default())
        }
        Err(e) => Err(anyhow::anyhow!(
            "failed to read config at {}: {e}",
            path.display()
        )),
    }
}

/// Resolve the default config directory (`~/.limpet/`).
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn config_dir() -> anyhow::Result<PathBuf> {
    let home = directories::BaseDirs::new()
        .ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
    Ok(home.home_dir().join(".limpet"))
}

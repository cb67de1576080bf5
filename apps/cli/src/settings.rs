use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use client_core::SyncConfig;
use serde::Deserialize;

pub const DEFAULT_CONFIG_FILE: &str = "chat-cli.toml";
pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:8787";
const TOKEN_FILE_NAME: &str = "qenani_token";
const APP_DIR_NAME: &str = "chat-cli";

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub server_url: String,
    pub token_path: Option<PathBuf>,
    pub poll_interval_ms: u64,
    pub request_timeout_secs: u64,
    pub pending_confirm_cycles: u32,
}

impl Settings {
    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            request_timeout: Duration::from_secs(self.request_timeout_secs.max(1)),
            pending_confirm_cycles: self.pending_confirm_cycles,
            ..SyncConfig::default()
        }
    }

    /// Explicit path, else `<config dir>/chat-cli/qenani_token`, else the working directory.
    pub fn token_path(&self) -> PathBuf {
        self.token_path.clone().unwrap_or_else(|| {
            dirs::config_dir()
                .map(|dir| dir.join(APP_DIR_NAME).join(TOKEN_FILE_NAME))
                .unwrap_or_else(|| PathBuf::from(TOKEN_FILE_NAME))
        })
    }
}

/// Defaults, then the optional toml file, then `APP__*` environment variables.
pub fn load_settings(config_path: Option<&Path>) -> Result<Settings> {
    build_settings(
        config_path,
        config::Environment::with_prefix("APP")
            .separator("__")
            .try_parsing(true),
    )
}

fn build_settings(config_path: Option<&Path>, environment: config::Environment) -> Result<Settings> {
    let defaults = SyncConfig::default();
    let file = match config_path {
        Some(path) => config::File::from(path).required(true),
        None => config::File::with_name(DEFAULT_CONFIG_FILE).required(false),
    };

    config::Config::builder()
        .set_default("server_url", DEFAULT_SERVER_URL)?
        .set_default("poll_interval_ms", defaults.poll_interval.as_millis() as i64)?
        .set_default(
            "request_timeout_secs",
            defaults.request_timeout.as_secs() as i64,
        )?
        .set_default(
            "pending_confirm_cycles",
            i64::from(defaults.pending_confirm_cycles),
        )?
        .add_source(file)
        .add_source(environment)
        .build()
        .context("failed to read cli settings")?
        .try_deserialize()
        .context("invalid cli settings")
}

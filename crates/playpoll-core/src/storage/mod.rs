mod bot_config;
mod config;
pub mod snapshot;

pub use bot_config::BotConfig;
pub use config::Config;
pub use snapshot::{PersistedState, PollRecord, StateStore};

use std::path::PathBuf;

use crate::error::ConfigError;

/// Returns `~/.config/playpoll[-dev]/` based on PLAYPOLL_ENV.
///
/// Set PLAYPOLL_ENV=dev to use development data directory.
///
/// # Errors
/// Returns an error if creating the config directory fails.
pub fn data_dir() -> Result<PathBuf, ConfigError> {
    let base_dir = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config");

    let env = std::env::var("PLAYPOLL_ENV").unwrap_or_else(|_| "production".to_string());

    let dir = if env == "dev" {
        base_dir.join("playpoll-dev")
    } else {
        base_dir.join("playpoll")
    };

    std::fs::create_dir_all(&dir)
        .map_err(|e| ConfigError::DataDir(format!("{}: {e}", dir.display())))?;
    Ok(dir)
}

pub mod bot;
pub mod config;
pub mod simulate;
pub mod state;

use playpoll_core::{Config, StateStore};

/// Snapshot store named by the current engine configuration.
pub(crate) fn open_store() -> Result<StateStore, Box<dyn std::error::Error>> {
    let config = Config::load()?;
    Ok(StateStore::from_config(&config)?)
}

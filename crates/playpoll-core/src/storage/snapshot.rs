//! JSON state snapshot: bot configuration plus every active poll.
//!
//! Writes go to a sibling temp file that is fsynced and then renamed over the
//! target, so a crash mid-write leaves either the old or the new snapshot,
//! never a truncated one.

use std::ffi::OsString;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use super::BotConfig;
use crate::clock::remaining_after_downtime;
use crate::error::{ConfigError, PersistenceError};
use crate::messaging::{ChannelId, GuildId, MessageId, MessageRef};

/// Persisted form of one waiting poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollRecord {
    pub channel_id: ChannelId,
    pub message_id: MessageId,
    #[serde(default)]
    pub guild_id: Option<GuildId>,
    pub reaction: String,
    pub success: String,
    pub failed: String,
    pub remaining_delay_ms: u64,
    /// Normalized threshold: participants needed plus the bot's own reaction.
    pub required_count: u32,
    #[serde(default)]
    pub resolved: bool,
    pub snapshot_at: DateTime<Utc>,
}

impl PollRecord {
    pub fn message_ref(&self) -> MessageRef {
        MessageRef {
            channel_id: self.channel_id,
            message_id: self.message_id,
            guild_id: self.guild_id,
        }
    }

    pub fn remaining_delay(&self) -> Duration {
        Duration::from_millis(self.remaining_delay_ms)
    }

    /// Remaining delay aged by the wall-clock time since the snapshot.
    pub fn remaining_at(&self, now: DateTime<Utc>) -> Duration {
        remaining_after_downtime(self.remaining_delay(), self.snapshot_at, now)
    }
}

/// Everything written to the state file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedState {
    #[serde(default)]
    pub config: BotConfig,
    #[serde(default)]
    pub polls: Vec<PollRecord>,
}

/// Snapshot file on disk.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at the location named by the engine configuration.
    pub fn from_config(config: &super::Config) -> Result<Self, ConfigError> {
        Ok(Self::new(config.state_path()?))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `Ok(None)` when no snapshot has been written yet.
    pub fn load(&self) -> Result<Option<PersistedState>, PersistenceError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(PersistenceError::ReadFailed {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| PersistenceError::Corrupt {
                path: self.path.clone(),
                message: e.to_string(),
            })
    }

    /// Load, falling back to an empty state. A corrupt or unreadable
    /// snapshot is logged, never fatal.
    pub fn load_or_default(&self) -> PersistedState {
        match self.load() {
            Ok(Some(state)) => state,
            Ok(None) => PersistedState::default(),
            Err(err) => {
                error!(path = %self.path.display(), error = %err, "state snapshot unusable, starting empty");
                PersistedState::default()
            }
        }
    }

    /// Write the snapshot atomically on the calling thread.
    pub fn save(&self, state: &PersistedState) -> Result<(), PersistenceError> {
        let bytes = encode(state)?;
        write_atomic(&self.path, &bytes)
    }

    /// Encode here, then write on the blocking pool so slow disks never stall
    /// the async workers.
    pub async fn save_async(&self, state: &PersistedState) -> Result<(), PersistenceError> {
        let bytes = encode(state)?;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&path, &bytes))
            .await
            .map_err(|e| PersistenceError::Writer(e.to_string()))?
    }
}

fn encode(state: &PersistedState) -> Result<Vec<u8>, PersistenceError> {
    serde_json::to_vec_pretty(state).map_err(|e| PersistenceError::Writer(e.to_string()))
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("state.json"));
    name.push(".tmp");
    path.with_file_name(name)
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), PersistenceError> {
    let failed = |source| PersistenceError::WriteFailed {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(failed)?;
    }

    let tmp = temp_path(path);
    let mut file = File::create(&tmp).map_err(failed)?;
    file.write_all(bytes).map_err(failed)?;
    file.sync_all().map_err(failed)?;
    drop(file);
    fs::rename(&tmp, path).map_err(failed)?;

    debug!(path = %path.display(), bytes = bytes.len(), "state snapshot written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(remaining_ms: u64, snapshot_at: DateTime<Utc>) -> PollRecord {
        PollRecord {
            channel_id: ChannelId(1),
            message_id: MessageId(2),
            guild_id: Some(GuildId(3)),
            reaction: "⚽".into(),
            success: "Go!".into(),
            failed: "Nope.".into(),
            remaining_delay_ms: remaining_ms,
            required_count: 4,
            resolved: false,
            snapshot_at,
        }
    }

    #[test]
    fn missing_file_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("state.json"));
        assert!(store.load().unwrap().is_none());
        assert_eq!(store.load_or_default(), PersistedState::default());
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("nested").join("state.json"));
        let state = PersistedState {
            config: BotConfig::default(),
            polls: vec![record(30_000, Utc::now())],
        };
        store.save(&state).unwrap();
        assert_eq!(store.load().unwrap(), Some(state));
        assert!(!temp_path(store.path()).exists());
    }

    #[test]
    fn corrupt_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "{ this is not json").unwrap();
        let store = StateStore::new(&path);
        assert!(matches!(store.load(), Err(PersistenceError::Corrupt { .. })));
        assert_eq!(store.load_or_default(), PersistedState::default());
    }

    #[test]
    fn record_field_names_are_stable() {
        let json = serde_json::to_value(record(1_500, Utc::now())).unwrap();
        for key in [
            "channel_id",
            "message_id",
            "guild_id",
            "reaction",
            "success",
            "failed",
            "remaining_delay_ms",
            "required_count",
            "resolved",
            "snapshot_at",
        ] {
            assert!(json.get(key).is_some(), "missing {key}");
        }
    }

    #[test]
    fn remaining_is_aged_by_downtime() {
        let saved_at = Utc::now() - chrono::Duration::seconds(20);
        let rec = record(30_000, saved_at);
        let left = rec.remaining_at(saved_at + chrono::Duration::seconds(20));
        assert_eq!(left, Duration::from_secs(10));
    }

    #[tokio::test]
    async fn async_save_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("state.json"));
        store.save_async(&PersistedState::default()).await.unwrap();
        assert!(store.load().unwrap().is_some());
    }
}

//! # Playpoll Core Library
//!
//! This library provides the core logic for commitment polls: a prompt is
//! posted to a chat channel, a delay runs down, and the poll resolves to
//! success or failure depending on how many distinct participants reacted.
//! Active polls survive process restarts through a JSON snapshot.
//!
//! ## Architecture
//!
//! - **Poll engine**: one entity per poll with at-most-once resolution, a
//!   driver task for posting and expiry, and a reconciliation task that
//!   re-polls the tally
//! - **Messaging**: the [`Messenger`] trait is the only way out to a chat
//!   platform; [`MemoryMessenger`] implements it in memory
//! - **Storage**: TOML engine configuration and an atomically written JSON
//!   snapshot of bot settings and active polls
//! - **Events**: lifecycle notifications on a broadcast bus
//!
//! ## Key Components
//!
//! - [`PollContext`]: process-scoped entry point for commands and push events
//! - [`PollEntity`]: one poll and its resolution state machine
//! - [`StateStore`]: snapshot persistence
//! - [`Config`]: engine configuration management

pub mod clock;
pub mod context;
pub mod error;
pub mod events;
pub mod messaging;
pub mod poll;
pub mod shutdown;
pub mod storage;

pub use clock::Countdown;
pub use context::{PollContext, RestoreReport};
pub use error::{
    ConfigError, CoreError, MessagingError, PersistenceError, ValidationError,
};
pub use events::{EventBus, PollEvent};
pub use messaging::{
    ChannelId, GuildId, MemoryMessenger, MentionPolicy, MessageId, MessageRef, Messenger,
    ReactionAdded, RoleId, UserId,
};
pub use poll::{
    DriverSettings, Outcome, PollEntity, PollId, PollSpec, PollState, PromptContent, Registry,
    Resolution, Trigger,
};
pub use shutdown::ShutdownController;
pub use storage::{BotConfig, Config, PersistedState, PollRecord, StateStore};

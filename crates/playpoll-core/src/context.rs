//! Process-scoped owner of the registry and bot configuration.
//!
//! The command layer and the transport's event handlers receive a
//! [`PollContext`] (usually behind an `Arc`) and call into it:
//!
//! ```ignore
//! let ctx = Arc::new(PollContext::new(&config, store, messenger));
//! ctx.restore().await;                       // before the first save
//! tokio::spawn(ctx.clone().run_autosave(shutdown.subscribe()));
//! ctx.schedule(spec)?;                       // command layer
//! ctx.on_reaction_added(event).await;        // transport push
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, Mutex as AsyncMutex, Notify};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::clock::duration_to_ms;
use crate::error::{CoreError, PersistenceError, ValidationError};
use crate::events::{EventBus, PollEvent};
use crate::messaging::{Messenger, ReactionAdded, UserId};
use crate::poll::driver::Driver;
use crate::poll::{PollEntity, PollSpec, Registry, Resolution, Trigger};
use crate::storage::{BotConfig, Config, PersistedState, PollRecord, StateStore};

/// Outcome of rebuilding polls from the snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RestoreReport {
    pub restored: usize,
    pub dropped: usize,
    /// Records already marked resolved; kept out of the registry.
    pub skipped_resolved: usize,
    /// The snapshot could not be decoded and was ignored.
    pub corrupt: bool,
}

pub struct PollContext {
    registry: Registry,
    bot_config: Mutex<BotConfig>,
    store: StateStore,
    /// Held from snapshot to rename so writes land in snapshot order.
    save_lock: AsyncMutex<()>,
    driver: Driver,
    bot_id: UserId,
    save_interval: Duration,
}

impl PollContext {
    pub fn new(config: &Config, store: StateStore, messenger: Arc<dyn Messenger>) -> Self {
        Self {
            registry: Registry::new(),
            bot_config: Mutex::new(BotConfig::default()),
            store,
            save_lock: AsyncMutex::new(()),
            driver: Driver {
                messenger,
                settings: config.driver_settings(),
                events: EventBus::default(),
                dirty: Arc::new(Notify::new()),
            },
            bot_id: config.bot_user_id,
            save_interval: config.save_interval(),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PollEvent> {
        self.driver.events.subscribe()
    }

    pub fn bot_config(&self) -> BotConfig {
        self.lock_config().clone()
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Register a poll and start its tasks. Returns as soon as the poll is
    /// registered; posting happens on the poll's own task.
    pub fn schedule(&self, spec: PollSpec) -> Result<Arc<PollEntity>, ValidationError> {
        let entity = self.registry.create(spec)?;
        info!(poll_id = %entity.id(), channel_id = %entity.channel(), required = entity.required_count(), delay_ms = duration_to_ms(entity.remaining()), "poll scheduled");
        self.driver.spawn_new(entity.clone());
        Ok(entity)
    }

    /// Push path: route a reaction notification to its poll and resolve it if
    /// the live tally meets the threshold.
    pub async fn on_reaction_added(&self, event: ReactionAdded) -> Option<Resolution> {
        if event.actor == self.bot_id {
            return None;
        }
        let entity = self.registry.find_by_identity(&event.message)?;
        if event.token != entity.reaction() {
            return None;
        }
        let identity = *entity.identity()?;

        let tally = match self
            .driver
            .messenger
            .fetch_reaction_count(&identity, entity.reaction())
            .await
        {
            Ok(tally) => tally,
            Err(err) => {
                warn!(poll_id = %entity.id(), message = %identity, error = %err, "tally unavailable for reaction event");
                return None;
            }
        };
        if !entity.is_met(tally) {
            debug!(poll_id = %entity.id(), tally, threshold = entity.threshold(), "reaction counted");
            return None;
        }

        let resolution = entity
            .resolve(self.driver.messenger.as_ref(), tally, Trigger::Push)
            .await?;
        self.driver.events.publish(resolution.clone().into());
        self.registry.sweep();
        if let Err(err) = self.save_now().await {
            warn!(poll_id = %entity.id(), error = %err, "save after resolution failed");
        }
        Some(resolution)
    }

    /// Apply a configuration change and persist immediately.
    ///
    /// The change is discarded if `update` fails.
    pub async fn update_config<R>(
        &self,
        update: impl FnOnce(&mut BotConfig) -> Result<R, ValidationError>,
    ) -> Result<R, CoreError> {
        let result = {
            let mut config = self.lock_config();
            let mut draft = config.clone();
            let result = update(&mut draft)?;
            *config = draft;
            result
        };
        self.save_now().await?;
        Ok(result)
    }

    // ── Persistence ──────────────────────────────────────────────────

    /// Current bot configuration plus a record for every posted, unresolved poll.
    pub fn snapshot(&self) -> PersistedState {
        PersistedState {
            config: self.bot_config(),
            polls: self.registry.snapshot_all(Utc::now()),
        }
    }

    pub async fn save_now(&self) -> Result<(), PersistenceError> {
        let _guard = self.save_lock.lock().await;
        let state = self.snapshot();
        self.store.save_async(&state).await?;
        debug!(polls = state.polls.len(), "state saved");
        Ok(())
    }

    /// Save on a fixed interval and whenever a poll is posted or resolved,
    /// until `shutdown` fires; then save once more.
    pub async fn run_autosave(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.save_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = self.save_now().await {
                        warn!(error = %err, "periodic save failed");
                    }
                }
                _ = self.driver.dirty.notified() => {
                    self.registry.sweep();
                    if let Err(err) = self.save_now().await {
                        warn!(error = %err, "save after poll change failed");
                    }
                }
                _ = shutdown.recv() => {
                    if let Err(err) = self.save_now().await {
                        warn!(error = %err, "final save failed");
                    }
                    info!("autosave stopped");
                    return;
                }
            }
        }
    }

    /// Load the snapshot and rebuild its polls. Call once at startup, before
    /// anything saves.
    pub async fn restore(&self) -> RestoreReport {
        match self.store.load() {
            Ok(Some(state)) => self.restore_from(state, Utc::now()).await,
            Ok(None) => {
                info!(path = %self.store.path().display(), "no state snapshot yet");
                RestoreReport::default()
            }
            Err(err) => {
                tracing::error!(error = %err, "state snapshot unusable, starting empty");
                RestoreReport {
                    corrupt: true,
                    ..RestoreReport::default()
                }
            }
        }
    }

    /// Rebuild polls from `state` as of `now`.
    pub async fn restore_from(&self, state: PersistedState, now: DateTime<Utc>) -> RestoreReport {
        *self.lock_config() = state.config;
        let mut report = RestoreReport::default();

        for record in state.polls {
            if record.resolved {
                debug!(message_id = %record.message_id, "skipping resolved record");
                report.skipped_resolved += 1;
                continue;
            }

            let identity = match self
                .driver
                .messenger
                .resolve_message(record.channel_id, record.message_id, record.guild_id)
                .await
            {
                Ok(Some(identity)) => identity,
                Ok(None) => {
                    self.drop_record(&record, "message no longer exists".into());
                    report.dropped += 1;
                    continue;
                }
                Err(err) => {
                    self.drop_record(&record, err.to_string());
                    report.dropped += 1;
                    continue;
                }
            };

            let remaining = record.remaining_at(now);
            let entity = PollEntity::rehydrate_from_record(&record, identity, remaining);
            let Some(entity) = self.registry.adopt(entity) else {
                self.drop_record(&record, "another poll owns this message".into());
                report.dropped += 1;
                continue;
            };

            info!(poll_id = %entity.id(), message = %identity, remaining_ms = duration_to_ms(remaining), "poll restored");
            self.driver.events.publish(PollEvent::Restored {
                poll_id: entity.id(),
                message: identity,
                remaining_ms: duration_to_ms(remaining),
                at: Utc::now(),
            });
            self.driver.spawn_waiting(entity);
            report.restored += 1;
        }

        report
    }

    fn drop_record(&self, record: &PollRecord, reason: String) {
        warn!(channel_id = %record.channel_id, message_id = %record.message_id, reason = %reason, "dropping persisted poll");
        self.driver.events.publish(PollEvent::Dropped {
            channel_id: record.channel_id,
            message_id: record.message_id,
            reason,
            at: Utc::now(),
        });
    }

    fn lock_config(&self) -> MutexGuard<'_, BotConfig> {
        self.bot_config.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

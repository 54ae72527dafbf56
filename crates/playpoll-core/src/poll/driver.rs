//! Tasks that carry a poll from posting to resolution.
//!
//! Each poll gets one driver task (post, count down, check the final tally)
//! and, while waiting, one reconciliation task that re-polls the tally on a
//! fixed cadence. Push notifications missed during downtime are never
//! redelivered, so the reconciler is what catches a threshold crossed while
//! the process was offline. Both tasks stop as soon as the poll resolves.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use super::entity::{PollEntity, Resolution, Trigger};
use crate::clock::duration_to_ms;
use crate::error::MessagingError;
use crate::events::{EventBus, PollEvent};
use crate::messaging::{MessageRef, Messenger};

/// Timing knobs for poll tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverSettings {
    /// Countdown step.
    pub tick: Duration,
    /// Pull-reconciliation period.
    pub reconcile_every: Duration,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(1),
            reconcile_every: Duration::from_secs(5),
        }
    }
}

/// Shared handles every poll task needs.
#[derive(Clone)]
pub(crate) struct Driver {
    pub messenger: Arc<dyn Messenger>,
    pub settings: DriverSettings,
    pub events: EventBus,
    /// Signalled whenever the set of persistable polls changes.
    pub dirty: Arc<Notify>,
}

impl Driver {
    /// Start a freshly created poll: post, react, then wait.
    pub fn spawn_new(&self, entity: Arc<PollEntity>) -> JoinHandle<()> {
        let driver = self.clone();
        tokio::spawn(async move { driver.run_new(entity).await })
    }

    /// Resume a rehydrated poll that is already posted.
    pub fn spawn_waiting(&self, entity: Arc<PollEntity>) -> JoinHandle<()> {
        let driver = self.clone();
        tokio::spawn(async move { driver.run_waiting(entity).await })
    }

    async fn run_new(&self, entity: Arc<PollEntity>) {
        let Some(prompt) = entity.prompt() else {
            return self.run_waiting(entity).await;
        };

        let identity = match self.messenger.post_message(entity.channel(), prompt).await {
            Ok(identity) => identity,
            Err(err) => {
                warn!(poll_id = %entity.id(), channel_id = %entity.channel(), error = %err, "prompt not posted");
                if entity.abandon(Trigger::PostFailed).is_some() {
                    self.events.publish(PollEvent::PostFailed {
                        poll_id: entity.id(),
                        reason: err.to_string(),
                        at: Utc::now(),
                    });
                }
                return;
            }
        };
        entity.bind_identity(identity);
        debug!(poll_id = %entity.id(), message = %identity, prompt = prompt.summary(), "prompt posted");

        if let Err(err) = self.messenger.add_reaction(&identity, entity.reaction()).await {
            warn!(poll_id = %entity.id(), message = %identity, error = %err, "automatic reaction not added");
        }
        self.events.publish(PollEvent::Posted {
            poll_id: entity.id(),
            message: identity,
            remaining_ms: duration_to_ms(entity.remaining()),
            at: Utc::now(),
        });
        self.dirty.notify_one();

        if entity.required_count() == 0 {
            if let Some(resolution) = entity.resolve_unconditionally(self.messenger.as_ref()).await {
                self.retire(resolution);
            }
            return;
        }

        self.run_waiting(entity).await;
    }

    async fn run_waiting(&self, entity: Arc<PollEntity>) {
        let Some(identity) = entity.identity().copied() else {
            return;
        };
        let reconciler = tokio::spawn(self.clone().reconcile(entity.clone(), identity));

        let expired = tokio::select! {
            _ = entity.countdown().run(self.settings.tick) => true,
            _ = entity.wait_resolved() => false,
        };
        if expired {
            self.on_expiry(&entity, identity).await;
        }

        // The reconciler may have claimed the resolution and still be sending
        // its message; it exits on its own once the poll is resolved.
        let _ = reconciler.await;
    }

    /// Fetch the final tally and resolve. A transient fetch failure falls back
    /// to the reconciliation cadence until some trigger succeeds.
    async fn on_expiry(&self, entity: &PollEntity, identity: MessageRef) {
        loop {
            if entity.is_resolved() {
                return;
            }
            match self
                .messenger
                .fetch_reaction_count(&identity, entity.reaction())
                .await
            {
                Ok(tally) => {
                    if let Some(resolution) = entity
                        .resolve(self.messenger.as_ref(), tally, Trigger::Expiry)
                        .await
                    {
                        self.retire(resolution);
                    }
                    return;
                }
                Err(err) if err.is_not_found() => {
                    self.lose_reference(entity, &err);
                    return;
                }
                Err(err) => {
                    warn!(poll_id = %entity.id(), message = %identity, error = %err, "final tally unavailable, retrying");
                }
            }
            tokio::select! {
                _ = tokio::time::sleep(self.settings.reconcile_every) => {}
                _ = entity.wait_resolved() => return,
            }
        }
    }

    async fn reconcile(self, entity: Arc<PollEntity>, identity: MessageRef) {
        let mut ticker = tokio::time::interval(self.settings.reconcile_every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = entity.wait_resolved() => return,
                _ = ticker.tick() => {}
            }
            match self
                .messenger
                .fetch_reaction_count(&identity, entity.reaction())
                .await
            {
                Ok(tally) if entity.is_met(tally) => {
                    if let Some(resolution) = entity
                        .resolve(self.messenger.as_ref(), tally, Trigger::Reconcile)
                        .await
                    {
                        self.retire(resolution);
                    }
                    return;
                }
                Ok(tally) => {
                    debug!(poll_id = %entity.id(), tally, threshold = entity.threshold(), "threshold not met yet");
                }
                Err(err) if err.is_not_found() => {
                    self.lose_reference(&entity, &err);
                    return;
                }
                Err(err) => {
                    warn!(poll_id = %entity.id(), message = %identity, error = %err, "reconciliation skipped");
                }
            }
        }
    }

    fn lose_reference(&self, entity: &PollEntity, err: &MessagingError) {
        warn!(poll_id = %entity.id(), error = %err, "poll message vanished, abandoning poll");
        if let Some(resolution) = entity.abandon(Trigger::ReferenceLost) {
            self.retire(resolution);
        }
    }

    /// Announce a resolution and ask for the snapshot to be rewritten.
    pub fn retire(&self, resolution: Resolution) {
        self.events.publish(resolution.into());
        self.dirty.notify_one();
    }
}

//! Poll entity and its state machine.
//!
//! ## State Transitions
//!
//! ```text
//! Posting -> Waiting -> Resolving -> Resolved(success | failure)
//!    \__________________________________/  (post failed)
//! ```
//!
//! An entity is built either from a fresh [`PollSpec`] ([`PollEntity::new_from_spec`],
//! starts in `Posting`) or from a persisted record after a restart
//! ([`PollEntity::rehydrate_from_record`], starts in `Waiting`).
//!
//! Resolution is at-most-once: [`PollEntity::resolve`] races through a single
//! compare-and-set on the resolved flag, and only the winner performs the
//! outgoing side effect.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{info, warn};
use uuid::Uuid;

use super::content::PromptContent;
use crate::clock::{duration_to_ms, Countdown};
use crate::error::ValidationError;
use crate::messaging::{ChannelId, MentionPolicy, MessageRef, Messenger};
use crate::storage::PollRecord;

/// Process-local handle for a poll. Not persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PollId(Uuid);

impl PollId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PollId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PollId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Already-parsed parameters handed over by the command layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollSpec {
    pub channel: ChannelId,
    pub prompt: PromptContent,
    pub reaction: String,
    pub success_text: String,
    pub failure_text: String,
    /// Zero or negative resolves right after posting.
    pub delay_secs: i64,
    /// Participants needed besides the bot.
    pub required_count: u32,
}

impl PollSpec {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.prompt.is_empty() {
            return Err(ValidationError::Empty("prompt".into()));
        }
        if self.reaction.trim().is_empty() {
            return Err(ValidationError::Empty("reaction".into()));
        }
        if self.success_text.trim().is_empty() {
            return Err(ValidationError::Empty("success_text".into()));
        }
        if self.failure_text.trim().is_empty() {
            return Err(ValidationError::Empty("failure_text".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Failure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "outcome", rename_all = "lowercase")]
pub enum PollState {
    Posting,
    Waiting,
    Resolving,
    Resolved(Outcome),
}

/// What ended a poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    /// A reaction-added notification pushed the tally over the threshold.
    Push,
    /// The delay ran out and the final tally was checked.
    Expiry,
    /// Periodic re-polling found the threshold met.
    Reconcile,
    /// Zero participants required.
    NoneRequired,
    /// The prompt could not be posted.
    PostFailed,
    /// The posted message disappeared while waiting.
    ReferenceLost,
}

/// Terminal facts of a resolved poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub poll_id: PollId,
    pub message: Option<MessageRef>,
    pub outcome: Outcome,
    pub trigger: Trigger,
    /// Raw tally the outcome was decided on, when one was fetched.
    pub tally: Option<u32>,
    pub at: DateTime<Utc>,
}

/// One scheduled commitment poll.
#[derive(Debug)]
pub struct PollEntity {
    id: PollId,
    channel: ChannelId,
    /// Absent for rehydrated polls; the prompt already lives on the posted message.
    prompt: Option<PromptContent>,
    reaction: String,
    success_text: String,
    failure_text: String,
    required_count: u32,
    identity: OnceLock<MessageRef>,
    countdown: Countdown,
    state: Mutex<PollState>,
    resolved: AtomicBool,
    resolved_tx: watch::Sender<bool>,
}

impl PollEntity {
    /// Build a poll that still has to post its prompt.
    pub fn new_from_spec(spec: PollSpec) -> Self {
        Self::build(
            spec.channel,
            Some(spec.prompt),
            spec.reaction,
            spec.success_text,
            spec.failure_text,
            spec.required_count,
            Countdown::from_secs(spec.delay_secs),
            None,
            PollState::Posting,
        )
    }

    /// Rebuild a poll from a persisted record whose message reference has
    /// been re-resolved. Starts in `Waiting` with `remaining` left.
    pub fn rehydrate_from_record(
        record: &PollRecord,
        identity: MessageRef,
        remaining: Duration,
    ) -> Self {
        Self::build(
            identity.channel_id,
            None,
            record.reaction.clone(),
            record.success.clone(),
            record.failed.clone(),
            record.required_count.saturating_sub(1),
            Countdown::new(remaining),
            Some(identity),
            PollState::Waiting,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn build(
        channel: ChannelId,
        prompt: Option<PromptContent>,
        reaction: String,
        success_text: String,
        failure_text: String,
        required_count: u32,
        countdown: Countdown,
        identity: Option<MessageRef>,
        state: PollState,
    ) -> Self {
        let (resolved_tx, _) = watch::channel(false);
        let bound = OnceLock::new();
        if let Some(identity) = identity {
            let _ = bound.set(identity);
        }
        Self {
            id: PollId::new(),
            channel,
            prompt,
            reaction,
            success_text,
            failure_text,
            required_count,
            identity: bound,
            countdown,
            state: Mutex::new(state),
            resolved: AtomicBool::new(false),
            resolved_tx,
        }
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn id(&self) -> PollId {
        self.id
    }

    pub fn channel(&self) -> ChannelId {
        self.channel
    }

    pub fn prompt(&self) -> Option<&PromptContent> {
        self.prompt.as_ref()
    }

    pub fn reaction(&self) -> &str {
        &self.reaction
    }

    pub fn success_text(&self) -> &str {
        &self.success_text
    }

    pub fn failure_text(&self) -> &str {
        &self.failure_text
    }

    pub fn required_count(&self) -> u32 {
        self.required_count
    }

    /// Raw tally needed for success: the bot's own reaction counts too.
    pub fn threshold(&self) -> u32 {
        self.required_count.saturating_add(1)
    }

    pub fn identity(&self) -> Option<&MessageRef> {
        self.identity.get()
    }

    pub fn countdown(&self) -> &Countdown {
        &self.countdown
    }

    pub fn remaining(&self) -> Duration {
        self.countdown.remaining()
    }

    pub fn state(&self) -> PollState {
        *self.lock_state()
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved.load(Ordering::Acquire)
    }

    pub fn outcome(&self) -> Option<Outcome> {
        match self.state() {
            PollState::Resolved(outcome) => Some(outcome),
            _ => None,
        }
    }

    pub fn is_met(&self, tally: u32) -> bool {
        tally >= self.threshold()
    }

    pub fn outcome_for(&self, tally: u32) -> Outcome {
        if self.is_met(tally) {
            Outcome::Success
        } else {
            Outcome::Failure
        }
    }

    /// Completes once the poll is resolved, immediately if it already is.
    pub async fn wait_resolved(&self) {
        let mut rx = self.resolved_tx.subscribe();
        let _ = rx.wait_for(|done| *done).await;
    }

    /// Persisted form, or `None` while the prompt is not posted yet.
    pub fn to_record(&self, now: DateTime<Utc>) -> Option<PollRecord> {
        let identity = self.identity()?;
        Some(PollRecord {
            channel_id: identity.channel_id,
            message_id: identity.message_id,
            guild_id: identity.guild_id,
            reaction: self.reaction.clone(),
            success: self.success_text.clone(),
            failed: self.failure_text.clone(),
            remaining_delay_ms: duration_to_ms(self.remaining()),
            required_count: self.threshold(),
            resolved: self.is_resolved(),
            snapshot_at: now,
        })
    }

    // ── Transitions ──────────────────────────────────────────────────

    /// Bind the posted message. Only the first call has an effect.
    pub fn bind_identity(&self, identity: MessageRef) -> bool {
        if self.identity.set(identity).is_err() {
            return false;
        }
        let mut state = self.lock_state();
        if *state == PollState::Posting {
            *state = PollState::Waiting;
        }
        true
    }

    /// Resolve on `tally`, performing the single outgoing side effect.
    ///
    /// Returns `None` when another trigger already resolved the poll or the
    /// prompt was never posted.
    pub async fn resolve(
        &self,
        messenger: &dyn Messenger,
        tally: u32,
        trigger: Trigger,
    ) -> Option<Resolution> {
        let outcome = self.outcome_for(tally);
        self.settle(messenger, outcome, Some(tally), trigger).await
    }

    /// Resolve as a success without looking at reactions.
    pub async fn resolve_unconditionally(&self, messenger: &dyn Messenger) -> Option<Resolution> {
        self.settle(messenger, Outcome::Success, None, Trigger::NoneRequired)
            .await
    }

    async fn settle(
        &self,
        messenger: &dyn Messenger,
        outcome: Outcome,
        tally: Option<u32>,
        trigger: Trigger,
    ) -> Option<Resolution> {
        let identity = *self.identity()?;
        if !self.claim() {
            return None;
        }

        let delivered = match outcome {
            Outcome::Success => messenger
                .send_reply(&identity, &self.success_text, MentionPolicy::AllowRoles)
                .await
                .map(|_| ()),
            Outcome::Failure => {
                messenger
                    .edit_message(&identity, &PromptContent::plain(self.failure_text.clone()))
                    .await
            }
        };
        if let Err(err) = delivered {
            warn!(poll_id = %self.id, message = %identity, ?outcome, error = %err, "resolution message not delivered");
        }

        self.finish(outcome);
        info!(poll_id = %self.id, message = %identity, ?outcome, ?trigger, ?tally, threshold = self.threshold(), "poll resolved");
        Some(Resolution {
            poll_id: self.id,
            message: Some(identity),
            outcome,
            trigger,
            tally,
            at: Utc::now(),
        })
    }

    /// Terminal failure without any outgoing message, for a prompt that never
    /// got posted or a message that vanished.
    pub fn abandon(&self, trigger: Trigger) -> Option<Resolution> {
        if !self.claim() {
            return None;
        }
        self.finish(Outcome::Failure);
        Some(Resolution {
            poll_id: self.id,
            message: self.identity().copied(),
            outcome: Outcome::Failure,
            trigger,
            tally: None,
            at: Utc::now(),
        })
    }

    // ── Internal ─────────────────────────────────────────────────────

    fn claim(&self) -> bool {
        let won = self
            .resolved
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if won {
            *self.lock_state() = PollState::Resolving;
        }
        won
    }

    fn finish(&self, outcome: Outcome) {
        *self.lock_state() = PollState::Resolved(outcome);
        self.resolved_tx.send_replace(true);
    }

    fn lock_state(&self) -> MutexGuard<'_, PollState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::{MemoryMessenger, MessageId, UserId};

    fn spec(required: u32, delay: i64) -> PollSpec {
        PollSpec {
            channel: ChannelId(10),
            prompt: PromptContent::plain("Who wants to play?"),
            reaction: "⚽".into(),
            success_text: "Let's go!".into(),
            failure_text: "Not enough players.".into(),
            delay_secs: delay,
            required_count: required,
        }
    }

    #[test]
    fn new_poll_starts_posting_without_identity() {
        let poll = PollEntity::new_from_spec(spec(3, 60));
        assert_eq!(poll.state(), PollState::Posting);
        assert!(poll.identity().is_none());
        assert!(poll.to_record(Utc::now()).is_none());
        assert_eq!(poll.threshold(), 4);
        assert_eq!(poll.remaining(), Duration::from_secs(60));
    }

    #[test]
    fn identity_binds_once() {
        let poll = PollEntity::new_from_spec(spec(3, 60));
        let first = MessageRef {
            channel_id: ChannelId(10),
            message_id: MessageId(1),
            guild_id: None,
        };
        assert!(poll.bind_identity(first));
        assert_eq!(poll.state(), PollState::Waiting);
        assert!(!poll.bind_identity(MessageRef { message_id: MessageId(2), ..first }));
        assert_eq!(poll.identity(), Some(&first));
    }

    #[test]
    fn threshold_counts_the_bot_reaction() {
        let poll = PollEntity::new_from_spec(spec(3, 60));
        assert_eq!(poll.outcome_for(3), Outcome::Failure);
        assert_eq!(poll.outcome_for(4), Outcome::Success);
    }

    #[test]
    fn validation_rejects_empty_reaction() {
        let mut bad = spec(3, 60);
        bad.reaction = " ".into();
        assert_eq!(bad.validate(), Err(ValidationError::Empty("reaction".into())));
    }

    #[tokio::test]
    async fn second_resolution_is_a_no_op() {
        let messenger = MemoryMessenger::new(UserId(1));
        let message = messenger.seed_message(ChannelId(10), PromptContent::plain("Who?"));
        let poll = PollEntity::new_from_spec(spec(1, 60));
        poll.bind_identity(message);

        let first = poll.resolve(&messenger, 2, Trigger::Push).await;
        let second = poll.resolve(&messenger, 0, Trigger::Expiry).await;

        assert_eq!(first.map(|r| r.outcome), Some(Outcome::Success));
        assert!(second.is_none());
        assert_eq!(messenger.replies().len(), 1);
        assert_eq!(messenger.message(&message).unwrap().edit_count, 0);
        assert_eq!(poll.outcome(), Some(Outcome::Success));
    }

    #[tokio::test]
    async fn failure_edits_prompt() {
        let messenger = MemoryMessenger::new(UserId(1));
        let message = messenger.seed_message(ChannelId(10), PromptContent::rich("Let's Play!", "Who?"));
        let poll = PollEntity::new_from_spec(spec(3, 60));
        poll.bind_identity(message);

        let resolution = poll.resolve(&messenger, 1, Trigger::Expiry).await.unwrap();
        assert_eq!(resolution.outcome, Outcome::Failure);
        let stored = messenger.message(&message).unwrap();
        assert_eq!(stored.content, PromptContent::plain("Not enough players."));
        assert!(messenger.replies().is_empty());
    }

    #[tokio::test]
    async fn unposted_poll_cannot_resolve_with_side_effects() {
        let messenger = MemoryMessenger::new(UserId(1));
        let poll = PollEntity::new_from_spec(spec(3, 60));
        assert!(poll.resolve(&messenger, 10, Trigger::Push).await.is_none());
        assert!(!poll.is_resolved());

        let abandoned = poll.abandon(Trigger::PostFailed).unwrap();
        assert_eq!(abandoned.outcome, Outcome::Failure);
        assert!(abandoned.message.is_none());
        assert!(poll.abandon(Trigger::PostFailed).is_none());
    }

    #[test]
    fn record_stores_normalized_threshold() {
        let poll = PollEntity::new_from_spec(spec(3, 90));
        poll.bind_identity(MessageRef {
            channel_id: ChannelId(10),
            message_id: MessageId(77),
            guild_id: None,
        });
        let record = poll.to_record(Utc::now()).unwrap();
        assert_eq!(record.required_count, 4);
        assert_eq!(record.remaining_delay_ms, 90_000);
        assert!(!record.resolved);

        let back = PollEntity::rehydrate_from_record(
            &record,
            record.message_ref(),
            record.remaining_delay(),
        );
        assert_eq!(back.required_count(), 3);
        assert_eq!(back.state(), PollState::Waiting);
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::messaging::{ChannelId, MessageId, MessageRef};
use crate::poll::{Outcome, PollId, Resolution, Trigger};

/// Every lifecycle change of a poll produces an Event.
/// The command layer subscribes to them through [`EventBus`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PollEvent {
    /// Prompt posted and the bot's reaction attached.
    Posted {
        poll_id: PollId,
        message: MessageRef,
        remaining_ms: u64,
        at: DateTime<Utc>,
    },
    /// Prompt could not be posted; the poll ended without further action.
    PostFailed {
        poll_id: PollId,
        reason: String,
        at: DateTime<Utc>,
    },
    /// Poll rebuilt from the snapshot after a restart.
    Restored {
        poll_id: PollId,
        message: MessageRef,
        remaining_ms: u64,
        at: DateTime<Utc>,
    },
    /// Persisted poll that could not be rebuilt.
    Dropped {
        channel_id: ChannelId,
        message_id: MessageId,
        reason: String,
        at: DateTime<Utc>,
    },
    Resolved {
        poll_id: PollId,
        message: Option<MessageRef>,
        outcome: Outcome,
        trigger: Trigger,
        tally: Option<u32>,
        at: DateTime<Utc>,
    },
}

impl From<Resolution> for PollEvent {
    fn from(r: Resolution) -> Self {
        PollEvent::Resolved {
            poll_id: r.poll_id,
            message: r.message,
            outcome: r.outcome,
            trigger: r.trigger,
            tally: r.tally,
            at: r.at,
        }
    }
}

/// Fan-out of [`PollEvent`]s. Publishing with no subscriber is fine.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PollEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PollEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: PollEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        bus.publish(PollEvent::PostFailed {
            poll_id: PollId::new(),
            reason: "offline".into(),
            at: Utc::now(),
        });
        match rx.recv().await.unwrap() {
            PollEvent::PostFailed { reason, .. } => assert_eq!(reason, "offline"),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn events_are_tagged_by_type() {
        let json = serde_json::to_value(PollEvent::Dropped {
            channel_id: ChannelId(1),
            message_id: MessageId(2),
            reason: "deleted".into(),
            at: Utc::now(),
        })
        .unwrap();
        assert_eq!(json["type"], "Dropped");
        assert_eq!(json["message_id"], 2);
    }
}

//! Boundary to the chat platform.
//!
//! The core never talks to a transport directly. Everything it needs -- post,
//! react, edit, reply, count reactions, re-resolve a stored reference -- goes
//! through [`Messenger`]. Inbound reaction notifications are handed to
//! [`crate::PollContext::on_reaction_added`] as [`ReactionAdded`] values.

pub mod memory;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::MessagingError;
use crate::poll::PromptContent;

pub use memory::{MemoryMessenger, SentReply, StoredMessage};

macro_rules! snowflake {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

snowflake!(
    /// Text channel a prompt is posted in.
    ChannelId
);
snowflake!(
    /// Posted message.
    MessageId
);
snowflake!(
    /// Parent container (server) of a channel.
    GuildId
);
snowflake!(
    /// Any participant, the bot included.
    UserId
);
snowflake!(
    /// Role that can be pinged or permitted.
    RoleId
);

/// Stable reference to a posted message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageRef {
    pub channel_id: ChannelId,
    pub message_id: MessageId,
    #[serde(default)]
    pub guild_id: Option<GuildId>,
}

impl MessageRef {
    /// Two references point at the same message when channel and message ids agree.
    ///
    /// The guild is informational; push events from some transports omit it.
    pub fn same_message(&self, other: &MessageRef) -> bool {
        self.channel_id == other.channel_id && self.message_id == other.message_id
    }
}

impl fmt::Display for MessageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.channel_id, self.message_id)
    }
}

/// Which mentions a sent message may trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MentionPolicy {
    /// Render mentions as text without notifying anyone.
    Suppress,
    /// Role and user mentions in the content notify their targets.
    AllowRoles,
}

/// Inbound push notification: someone added a reaction to a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionAdded {
    pub message: MessageRef,
    pub actor: UserId,
    pub token: String,
}

/// Chat platform operations consumed by the poll engine.
#[async_trait]
pub trait Messenger: Send + Sync {
    /// Post `content` to `channel` and return the new message's reference.
    async fn post_message(
        &self,
        channel: ChannelId,
        content: &PromptContent,
    ) -> Result<MessageRef, MessagingError>;

    /// Add the bot's own reaction to a message.
    async fn add_reaction(&self, message: &MessageRef, token: &str) -> Result<(), MessagingError>;

    /// Replace the content of a message, dropping any rich body.
    async fn edit_message(
        &self,
        message: &MessageRef,
        content: &PromptContent,
    ) -> Result<(), MessagingError>;

    /// Send a reply that references `message`.
    async fn send_reply(
        &self,
        message: &MessageRef,
        content: &str,
        mentions: MentionPolicy,
    ) -> Result<MessageRef, MessagingError>;

    /// Raw number of `token` reactions on a message, the bot's own included.
    async fn fetch_reaction_count(
        &self,
        message: &MessageRef,
        token: &str,
    ) -> Result<u32, MessagingError>;

    /// Look a stored reference up again after a restart.
    ///
    /// `Ok(None)` means the message is gone.
    async fn resolve_message(
        &self,
        channel: ChannelId,
        message: MessageId,
        guild: Option<GuildId>,
    ) -> Result<Option<MessageRef>, MessagingError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_message_ignores_guild() {
        let a = MessageRef {
            channel_id: ChannelId(1),
            message_id: MessageId(2),
            guild_id: Some(GuildId(9)),
        };
        let b = MessageRef { guild_id: None, ..a };
        assert!(a.same_message(&b));
        assert!(!a.same_message(&MessageRef { message_id: MessageId(3), ..a }));
    }

    #[test]
    fn ids_serialize_as_plain_numbers() {
        let json = serde_json::to_string(&ChannelId(42)).unwrap();
        assert_eq!(json, "42");
    }
}

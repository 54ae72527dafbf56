//! In-memory [`Messenger`] used by tests and the CLI simulation.
//!
//! Keeps posted messages, reaction sets and replies in a mutex-guarded map and
//! records every side effect so callers can assert on them. Failures can be
//! injected per operation.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde::Serialize;

use super::{
    ChannelId, GuildId, MentionPolicy, MessageId, MessageRef, Messenger, ReactionAdded, UserId,
};
use crate::error::MessagingError;
use crate::poll::PromptContent;

const FIRST_MESSAGE_ID: u64 = 1_000;

/// A message held by [`MemoryMessenger`].
#[derive(Debug, Clone, Serialize)]
pub struct StoredMessage {
    pub reference: MessageRef,
    pub content: PromptContent,
    pub author: UserId,
    /// token -> users who reacted with it
    pub reactions: BTreeMap<String, BTreeSet<UserId>>,
    pub edit_count: u32,
}

impl StoredMessage {
    pub fn reaction_count(&self, token: &str) -> u32 {
        self.reactions
            .get(token)
            .map(|users| users.len() as u32)
            .unwrap_or(0)
    }
}

/// A reply sent through [`Messenger::send_reply`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SentReply {
    pub parent: MessageRef,
    pub content: String,
    pub mentions: MentionPolicy,
}

#[derive(Debug, Default)]
struct Inner {
    next_id: u64,
    messages: BTreeMap<MessageId, StoredMessage>,
    replies: Vec<SentReply>,
    fail_posts: bool,
    failing_fetches: u32,
    fetch_calls: u32,
}

/// Chat platform simulated entirely in memory.
#[derive(Debug)]
pub struct MemoryMessenger {
    bot_id: UserId,
    guild_id: Option<GuildId>,
    inner: Mutex<Inner>,
}

impl MemoryMessenger {
    pub fn new(bot_id: UserId) -> Self {
        Self {
            bot_id,
            guild_id: None,
            inner: Mutex::new(Inner {
                next_id: FIRST_MESSAGE_ID,
                ..Inner::default()
            }),
        }
    }

    /// Stamp every posted message with `guild`.
    pub fn in_guild(mut self, guild: GuildId) -> Self {
        self.guild_id = Some(guild);
        self
    }

    pub fn bot_id(&self) -> UserId {
        self.bot_id
    }

    fn state(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn insert(&self, channel: ChannelId, content: PromptContent, author: UserId) -> MessageRef {
        let mut state = self.state();
        let message_id = MessageId(state.next_id);
        state.next_id += 1;
        let reference = MessageRef {
            channel_id: channel,
            message_id,
            guild_id: self.guild_id,
        };
        state.messages.insert(
            message_id,
            StoredMessage {
                reference,
                content,
                author,
                reactions: BTreeMap::new(),
                edit_count: 0,
            },
        );
        reference
    }

    /// Put a message in place without going through `post_message`, e.g. to
    /// stand in for a prompt posted before a restart.
    pub fn seed_message(&self, channel: ChannelId, content: PromptContent) -> MessageRef {
        self.insert(channel, content, self.bot_id)
    }

    /// Record `user` reacting with `token` and return the push notification the
    /// platform would deliver. `None` when the message does not exist.
    pub fn react(&self, message: &MessageRef, user: UserId, token: &str) -> Option<ReactionAdded> {
        let mut state = self.state();
        let stored = state.messages.get_mut(&message.message_id)?;
        stored
            .reactions
            .entry(token.to_string())
            .or_default()
            .insert(user);
        Some(ReactionAdded {
            message: stored.reference,
            actor: user,
            token: token.to_string(),
        })
    }

    /// Remove a reaction. No push notification exists for removals.
    pub fn unreact(&self, message: &MessageRef, user: UserId, token: &str) {
        if let Some(users) = self
            .state()
            .messages
            .get_mut(&message.message_id)
            .and_then(|m| m.reactions.get_mut(token))
        {
            users.remove(&user);
        }
    }

    pub fn delete(&self, message: &MessageRef) {
        self.state().messages.remove(&message.message_id);
    }

    /// Make every following `post_message` fail until reset.
    pub fn fail_posts(&self, fail: bool) {
        self.state().fail_posts = fail;
    }

    /// Make the next `count` reaction fetches fail transiently.
    pub fn fail_next_fetches(&self, count: u32) {
        self.state().failing_fetches = count;
    }

    pub fn message(&self, message: &MessageRef) -> Option<StoredMessage> {
        self.state().messages.get(&message.message_id).cloned()
    }

    /// Every message posted so far, oldest first.
    pub fn messages(&self) -> Vec<StoredMessage> {
        self.state().messages.values().cloned().collect()
    }

    pub fn replies(&self) -> Vec<SentReply> {
        self.state().replies.clone()
    }

    pub fn fetch_calls(&self) -> u32 {
        self.state().fetch_calls
    }
}

#[async_trait]
impl Messenger for MemoryMessenger {
    async fn post_message(
        &self,
        channel: ChannelId,
        content: &PromptContent,
    ) -> Result<MessageRef, MessagingError> {
        if self.state().fail_posts {
            return Err(MessagingError::Transient(format!(
                "post to channel {channel} refused by test double"
            )));
        }
        Ok(self.insert(channel, content.clone(), self.bot_id))
    }

    async fn add_reaction(&self, message: &MessageRef, token: &str) -> Result<(), MessagingError> {
        if token.is_empty() {
            return Err(MessagingError::Rejected("empty reaction token".into()));
        }
        self.react(message, self.bot_id, token)
            .map(|_| ())
            .ok_or_else(|| MessagingError::NotFound(message.to_string()))
    }

    async fn edit_message(
        &self,
        message: &MessageRef,
        content: &PromptContent,
    ) -> Result<(), MessagingError> {
        let mut state = self.state();
        let stored = state
            .messages
            .get_mut(&message.message_id)
            .ok_or_else(|| MessagingError::NotFound(message.to_string()))?;
        stored.content = content.clone();
        stored.edit_count += 1;
        Ok(())
    }

    async fn send_reply(
        &self,
        message: &MessageRef,
        content: &str,
        mentions: MentionPolicy,
    ) -> Result<MessageRef, MessagingError> {
        if !self.state().messages.contains_key(&message.message_id) {
            return Err(MessagingError::NotFound(message.to_string()));
        }
        let reply = self.insert(
            message.channel_id,
            PromptContent::plain(content),
            self.bot_id,
        );
        self.state().replies.push(SentReply {
            parent: *message,
            content: content.to_string(),
            mentions,
        });
        Ok(reply)
    }

    async fn fetch_reaction_count(
        &self,
        message: &MessageRef,
        token: &str,
    ) -> Result<u32, MessagingError> {
        let mut state = self.state();
        state.fetch_calls += 1;
        if state.failing_fetches > 0 {
            state.failing_fetches -= 1;
            return Err(MessagingError::Transient("reaction fetch timed out".into()));
        }
        state
            .messages
            .get(&message.message_id)
            .map(|m| m.reaction_count(token))
            .ok_or_else(|| MessagingError::NotFound(message.to_string()))
    }

    async fn resolve_message(
        &self,
        channel: ChannelId,
        message: MessageId,
        _guild: Option<GuildId>,
    ) -> Result<Option<MessageRef>, MessagingError> {
        Ok(self
            .state()
            .messages
            .get(&message)
            .filter(|m| m.reference.channel_id == channel)
            .map(|m| m.reference))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn post_and_count_reactions() {
        let messenger = MemoryMessenger::new(UserId(1));
        let msg = messenger
            .post_message(ChannelId(7), &PromptContent::plain("hi"))
            .await
            .unwrap();
        messenger.add_reaction(&msg, "⚽").await.unwrap();
        messenger.react(&msg, UserId(2), "⚽");
        messenger.react(&msg, UserId(2), "⚽");
        assert_eq!(messenger.fetch_reaction_count(&msg, "⚽").await.unwrap(), 2);
        assert_eq!(messenger.fetch_reaction_count(&msg, "🏀").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn injected_failures() {
        let messenger = MemoryMessenger::new(UserId(1));
        messenger.fail_posts(true);
        assert!(messenger
            .post_message(ChannelId(7), &PromptContent::plain("hi"))
            .await
            .is_err());

        let msg = messenger.seed_message(ChannelId(7), PromptContent::plain("hi"));
        messenger.fail_next_fetches(1);
        assert!(messenger.fetch_reaction_count(&msg, "⚽").await.is_err());
        assert!(messenger.fetch_reaction_count(&msg, "⚽").await.is_ok());
    }

    #[tokio::test]
    async fn resolve_requires_matching_channel() {
        let messenger = MemoryMessenger::new(UserId(1));
        let msg = messenger.seed_message(ChannelId(7), PromptContent::plain("hi"));
        let found = messenger
            .resolve_message(ChannelId(7), msg.message_id, None)
            .await
            .unwrap();
        assert_eq!(found, Some(msg));
        let wrong = messenger
            .resolve_message(ChannelId(8), msg.message_id, None)
            .await
            .unwrap();
        assert!(wrong.is_none());
        messenger.delete(&msg);
        let gone = messenger
            .resolve_message(ChannelId(7), msg.message_id, None)
            .await
            .unwrap();
        assert!(gone.is_none());
    }
}

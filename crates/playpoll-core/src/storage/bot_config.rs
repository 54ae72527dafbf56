//! Bot-level defaults co-persisted with the poll snapshot.
//!
//! Plain key/value state: the last write wins. The text helpers build the
//! "Let's Play!" prompt and the resolution lines from these defaults.

use std::collections::BTreeSet;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::messaging::{ChannelId, RoleId};
use crate::poll::{PollSpec, PromptContent};

const FAILURE_TEXT: &str = "Sorry! Looks like we didn't get enough players for this time.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotConfig {
    /// Participants needed besides the bot.
    #[serde(default = "default_threshold")]
    pub threshold: u32,
    #[serde(default = "default_reaction")]
    pub reaction: String,
    /// Roles allowed to change these settings.
    #[serde(default)]
    pub permitted_roles: BTreeSet<RoleId>,
    /// Role pinged on success.
    #[serde(default)]
    pub ping_target: Option<RoleId>,
    #[serde(default = "default_command_prefix")]
    pub command_prefix: String,
}

fn default_threshold() -> u32 {
    3
}
fn default_reaction() -> String {
    "⚽".into()
}
fn default_command_prefix() -> String {
    "!play ".into()
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            reaction: default_reaction(),
            permitted_roles: BTreeSet::new(),
            ping_target: None,
            command_prefix: default_command_prefix(),
        }
    }
}

impl BotConfig {
    pub fn set_threshold(&mut self, threshold: u32) -> Result<(), ValidationError> {
        if threshold == 0 {
            return Err(ValidationError::invalid("threshold", "must be at least 1"));
        }
        self.threshold = threshold;
        Ok(())
    }

    pub fn set_reaction(&mut self, reaction: &str) -> Result<(), ValidationError> {
        let reaction = reaction.trim();
        if reaction.is_empty() {
            return Err(ValidationError::Empty("reaction".into()));
        }
        self.reaction = reaction.to_string();
        Ok(())
    }

    pub fn set_ping_target(&mut self, role: Option<RoleId>) {
        self.ping_target = role;
    }

    /// Returns false if the role was already permitted.
    pub fn permit_role(&mut self, role: RoleId) -> bool {
        self.permitted_roles.insert(role)
    }

    /// Returns false if the role was not permitted.
    pub fn remove_role(&mut self, role: RoleId) -> bool {
        self.permitted_roles.remove(&role)
    }

    pub fn is_permitted(&self, role: RoleId) -> bool {
        self.permitted_roles.contains(&role)
    }

    /// Rich prompt announcing a game `delay` from `now`.
    ///
    /// The start time field is left out when it falls past the calendar range.
    pub fn prompt_for(&self, delay: Duration, now: DateTime<Utc>) -> PromptContent {
        let total_min = delay.as_secs() / 60;
        let (hours, minutes) = (total_min / 60, total_min % 60);
        let prompt = PromptContent::rich(
            "Let's Play!",
            format!(
                "Who wants to join in and play in {hours}hrs and {minutes}m?\n\
                 We need {} or more people to react with {} to make it happen!\n\n",
                self.threshold, self.reaction
            ),
        );
        match start_time(delay, now) {
            Some(starts_at) => {
                prompt.with_field("Start time", starts_at.format("%I:%M %p UTC").to_string())
            }
            None => prompt,
        }
    }

    pub fn success_text(&self) -> String {
        match self.ping_target {
            Some(role) => format!("Yo, <@&{role}>! Let's get some games going!"),
            None => "Yo! Let's get some games going!".to_string(),
        }
    }

    pub fn failure_text(&self) -> &'static str {
        FAILURE_TEXT
    }

    /// Poll parameters for `channel` built from the current defaults.
    pub fn spec_for(&self, channel: ChannelId, delay: Duration, now: DateTime<Utc>) -> PollSpec {
        PollSpec {
            channel,
            prompt: self.prompt_for(delay, now),
            reaction: self.reaction.clone(),
            success_text: self.success_text(),
            failure_text: self.failure_text().to_string(),
            delay_secs: i64::try_from(delay.as_secs()).unwrap_or(i64::MAX),
            required_count: self.threshold,
        }
    }
}

fn start_time(delay: Duration, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let secs = i64::try_from(delay.as_secs()).ok()?;
    now.checked_add_signed(TimeDelta::try_seconds(secs)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn defaults_match_the_bot() {
        let config = BotConfig::default();
        assert_eq!(config.threshold, 3);
        assert_eq!(config.reaction, "⚽");
        assert_eq!(config.command_prefix, "!play ");
        assert!(config.permitted_roles.is_empty());
    }

    #[test]
    fn threshold_must_be_positive() {
        let mut config = BotConfig::default();
        assert!(config.set_threshold(0).is_err());
        config.set_threshold(5).unwrap();
        assert_eq!(config.threshold, 5);
    }

    #[test]
    fn roles_are_a_set() {
        let mut config = BotConfig::default();
        assert!(config.permit_role(RoleId(7)));
        assert!(!config.permit_role(RoleId(7)));
        assert!(config.is_permitted(RoleId(7)));
        assert!(config.remove_role(RoleId(7)));
        assert!(!config.remove_role(RoleId(7)));
    }

    #[test]
    fn success_text_pings_role() {
        let mut config = BotConfig::default();
        assert_eq!(config.success_text(), "Yo! Let's get some games going!");
        config.set_ping_target(Some(RoleId(42)));
        assert_eq!(config.success_text(), "Yo, <@&42>! Let's get some games going!");
    }

    #[test]
    fn spec_uses_defaults() {
        let config = BotConfig::default();
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 17, 0, 0).unwrap();
        let spec = config.spec_for(ChannelId(3), Duration::from_secs(90 * 60), now);
        assert_eq!(spec.required_count, 3);
        assert_eq!(spec.delay_secs, 5_400);
        match &spec.prompt {
            PromptContent::Rich(rich) => {
                assert!(rich.description.contains("1hrs and 30m"));
                assert_eq!(rich.fields[0].value, "06:30 PM UTC");
            }
            other => panic!("expected rich prompt, got {other:?}"),
        }
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn huge_delays_skip_the_start_time() {
        let config = BotConfig::default();
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 17, 0, 0).unwrap();

        let spec = config.spec_for(ChannelId(3), Duration::from_secs(u64::MAX / 2), now);
        assert_eq!(spec.delay_secs, i64::MAX);
        match &spec.prompt {
            PromptContent::Rich(rich) => assert!(rich.fields.is_empty()),
            other => panic!("expected rich prompt, got {other:?}"),
        }
        assert!(spec.validate().is_ok());

        let spec = config.spec_for(ChannelId(3), Duration::from_secs(u64::MAX), now);
        assert_eq!(spec.delay_secs, i64::MAX);
    }

    #[test]
    fn missing_fields_deserialize_to_defaults() {
        let config: BotConfig = serde_json::from_str(r#"{"threshold": 6}"#).unwrap();
        assert_eq!(config.threshold, 6);
        assert_eq!(config.reaction, "⚽");
    }
}

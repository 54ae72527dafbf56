//! Prompt payloads.

use serde::{Deserialize, Serialize};

/// One name/value pair inside a rich prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
}

/// Structured prompt rendered by the platform as a card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RichContent {
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub fields: Vec<EmbedField>,
}

/// What a poll shows to participants.
///
/// Decided once when the poll is built; send sites just forward it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "body", rename_all = "snake_case")]
pub enum PromptContent {
    PlainText(String),
    Rich(RichContent),
}

impl PromptContent {
    pub fn plain(text: impl Into<String>) -> Self {
        PromptContent::PlainText(text.into())
    }

    pub fn rich(title: impl Into<String>, description: impl Into<String>) -> Self {
        PromptContent::Rich(RichContent {
            title: title.into(),
            description: description.into(),
            fields: Vec::new(),
        })
    }

    /// Append a field. Plain text prompts are left unchanged.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        if let PromptContent::Rich(ref mut rich) = self {
            rich.fields.push(EmbedField {
                name: name.into(),
                value: value.into(),
            });
        }
        self
    }

    /// Short single-line form for logs.
    pub fn summary(&self) -> &str {
        match self {
            PromptContent::PlainText(text) => text,
            PromptContent::Rich(rich) => &rich.title,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            PromptContent::PlainText(text) => text.trim().is_empty(),
            PromptContent::Rich(rich) => {
                rich.title.trim().is_empty() && rich.description.trim().is_empty()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fields_only_attach_to_rich_content() {
        let rich = PromptContent::rich("Let's Play!", "who is in?").with_field("UTC", "18:00");
        match rich {
            PromptContent::Rich(ref r) => assert_eq!(r.fields.len(), 1),
            _ => panic!("expected rich content"),
        }
        let plain = PromptContent::plain("who is in?").with_field("UTC", "18:00");
        assert_eq!(plain, PromptContent::plain("who is in?"));
    }

    #[test]
    fn serialized_form_is_tagged() {
        let json = serde_json::to_value(PromptContent::plain("hey")).unwrap();
        assert_eq!(json["kind"], "plain_text");
        assert_eq!(json["body"], "hey");
    }

    #[test]
    fn blank_prompts_are_empty() {
        assert!(PromptContent::plain("  ").is_empty());
        assert!(!PromptContent::rich("t", "").is_empty());
    }
}

mod content;
pub(crate) mod driver;
mod entity;
mod registry;

pub use content::{EmbedField, PromptContent, RichContent};
pub use driver::DriverSettings;
pub use entity::{Outcome, PollEntity, PollId, PollSpec, PollState, Resolution, Trigger};
pub use registry::Registry;

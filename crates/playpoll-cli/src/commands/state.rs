use chrono::Utc;
use clap::Subcommand;
use serde::Serialize;

use playpoll_core::{BotConfig, PollRecord};

use super::open_store;

#[derive(Subcommand)]
pub enum StateAction {
    /// Show bot settings and waiting polls
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the state file location
    Path,
}

#[derive(Serialize)]
struct PollView<'a> {
    #[serde(flatten)]
    record: &'a PollRecord,
    /// Remaining delay aged to the time of this command.
    remaining_now_ms: u64,
}

#[derive(Serialize)]
struct StateView<'a> {
    config: &'a BotConfig,
    polls: Vec<PollView<'a>>,
}

pub fn run(action: StateAction) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_store()?;
    match action {
        StateAction::Path => {
            println!("{}", store.path().display());
        }
        StateAction::Show { json } => {
            let Some(state) = store.load()? else {
                println!("no state snapshot at {}", store.path().display());
                return Ok(());
            };
            let now = Utc::now();
            let view = StateView {
                config: &state.config,
                polls: state
                    .polls
                    .iter()
                    .map(|record| PollView {
                        record,
                        remaining_now_ms: u64::try_from(record.remaining_at(now).as_millis())
                            .unwrap_or(u64::MAX),
                    })
                    .collect(),
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&view)?);
                return Ok(());
            }

            println!(
                "threshold: {}  reaction: {}  ping: {}",
                view.config.threshold,
                view.config.reaction,
                view.config
                    .ping_target
                    .map(|r| r.to_string())
                    .unwrap_or_else(|| "none".into())
            );
            if view.polls.is_empty() {
                println!("no waiting polls");
            }
            for poll in &view.polls {
                println!(
                    "{}/{}  {} x{}  {}s left",
                    poll.record.channel_id,
                    poll.record.message_id,
                    poll.record.reaction,
                    poll.record.required_count,
                    poll.remaining_now_ms / 1_000
                );
            }
        }
    }
    Ok(())
}

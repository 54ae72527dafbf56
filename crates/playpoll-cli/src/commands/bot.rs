use clap::Subcommand;
use playpoll_core::{BotConfig, RoleId};

use super::open_store;

#[derive(Subcommand)]
pub enum BotAction {
    /// Print the bot settings as JSON
    Show,
    /// Participants needed besides the bot
    Threshold { value: u32 },
    /// Reaction token counted as a commitment
    Reaction { token: String },
    /// Role pinged on success, or "none"
    Ping { role: String },
    /// Allow a role to change settings
    Permit { role: u64 },
    /// Revoke a previously permitted role
    Revoke { role: u64 },
}

pub fn run(action: BotAction) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_store()?;
    let mut state = store.load()?.unwrap_or_default();

    if let BotAction::Show = action {
        println!("{}", serde_json::to_string_pretty(&state.config)?);
        return Ok(());
    }

    let message = apply(&mut state.config, action)?;
    store.save(&state)?;
    println!("{message}");
    Ok(())
}

fn apply(config: &mut BotConfig, action: BotAction) -> Result<String, Box<dyn std::error::Error>> {
    let message = match action {
        BotAction::Show => String::new(),
        BotAction::Threshold { value } => {
            config.set_threshold(value)?;
            format!("threshold set to {value}")
        }
        BotAction::Reaction { token } => {
            config.set_reaction(&token)?;
            format!("reaction set to {}", config.reaction)
        }
        BotAction::Ping { role } => {
            let target = match role.as_str() {
                "none" | "off" => None,
                id => Some(RoleId(id.parse()?)),
            };
            config.set_ping_target(target);
            match target {
                Some(role) => format!("pinging role {role} on success"),
                None => "success pings disabled".to_string(),
            }
        }
        BotAction::Permit { role } => {
            if config.permit_role(RoleId(role)) {
                format!("role {role} permitted")
            } else {
                format!("role {role} was already permitted")
            }
        }
        BotAction::Revoke { role } => {
            if config.remove_role(RoleId(role)) {
                format!("role {role} revoked")
            } else {
                format!("role {role} was not permitted")
            }
        }
    };
    Ok(message)
}

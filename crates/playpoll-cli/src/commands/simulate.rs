//! Local dry run of a single poll.
//!
//! Builds a [`PollContext`] over [`MemoryMessenger`], schedules one poll from
//! the default bot settings and prints every lifecycle event as a JSON line.
//! Autosave runs alongside; Ctrl-C or SIGTERM ends the run early after a final
//! save.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clap::Args;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use playpoll_core::{
    BotConfig, ChannelId, Config, GuildId, MemoryMessenger, PollContext, PollEvent,
    ShutdownController, StateStore, UserId,
};

const BOT: UserId = UserId(1);
const GUILD: GuildId = GuildId(1);
const CHANNEL: ChannelId = ChannelId(1);

#[derive(Args)]
pub struct SimulateArgs {
    /// Delay before the poll resolves, in seconds
    #[arg(long, default_value_t = 5, allow_negative_numbers = true)]
    delay: i64,
    /// Participants needed besides the bot
    #[arg(long, default_value_t = 3)]
    required: u32,
    /// Participants who react once the prompt is posted
    #[arg(long, default_value_t = 0)]
    reactors: u32,
    /// Reaction token (defaults to the bot setting)
    #[arg(long)]
    reaction: Option<String>,
    /// Leave reactions to reconciliation instead of pushing them
    #[arg(long)]
    no_push: bool,
}

pub fn run(args: SimulateArgs) -> Result<(), Box<dyn std::error::Error>> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(simulate(args))
}

async fn simulate(args: SimulateArgs) -> Result<(), Box<dyn std::error::Error>> {
    let state_dir = std::env::temp_dir().join(format!("playpoll-sim-{}", std::process::id()));
    let config = Config {
        state_file: Some(state_dir.join("state.json")),
        bot_user_id: BOT,
        tick_interval_ms: 100,
        reconcile_interval_secs: 1,
        ..Config::default()
    };
    let messenger = Arc::new(MemoryMessenger::new(BOT).in_guild(GUILD));
    let ctx = Arc::new(PollContext::new(
        &config,
        StateStore::from_config(&config)?,
        messenger.clone(),
    ));
    let report = ctx.restore().await;
    info!(restored = report.restored, "simulation state loaded");

    let shutdown = ShutdownController::new();
    let saver = tokio::spawn(ctx.clone().run_autosave(shutdown.subscribe()));

    let mut bot = BotConfig::default();
    if let Some(token) = &args.reaction {
        bot.set_reaction(token)?;
    }
    let delay = Duration::from_secs(u64::try_from(args.delay).unwrap_or(0));
    let mut spec = bot.spec_for(CHANNEL, delay, Utc::now());
    spec.delay_secs = args.delay;
    spec.required_count = args.required;

    let mut events = ctx.subscribe();
    let poll = ctx.schedule(spec)?;
    info!(poll_id = %poll.id(), "simulation started");

    let outcome = tokio::select! {
        result = async {
            loop {
                let event = match events.recv().await {
                    Ok(event) => event,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "event stream lagged");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };
                println!("{}", serde_json::to_string(&event)?);

                match event {
                    PollEvent::Posted { message, .. } => {
                        for user in 0..args.reactors {
                            let Some(reaction) = messenger.react(
                                &message,
                                UserId(100 + u64::from(user)),
                                poll.reaction(),
                            ) else {
                                break;
                            };
                            if !args.no_push {
                                ctx.on_reaction_added(reaction).await;
                            }
                        }
                    }
                    PollEvent::Resolved { .. } | PollEvent::PostFailed { .. } => break,
                    _ => {}
                }
            }
            Ok::<_, serde_json::Error>(())
        } => result,
        _ = shutdown.wait_for_signal() => {
            warn!(poll_id = %poll.id(), "simulation interrupted before resolution");
            Ok(())
        }
    };

    shutdown.shutdown();
    if let Err(err) = saver.await {
        warn!(error = %err, "autosave task failed");
    }
    outcome?;

    for reply in messenger.replies() {
        println!("{}", serde_json::to_string(&reply)?);
    }
    if state_dir.exists() {
        let _ = std::fs::remove_dir_all(&state_dir);
    }
    Ok(())
}

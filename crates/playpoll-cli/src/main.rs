use clap::{Parser, Subcommand};
use playpoll_core::Config;

mod commands;
mod logging;

#[derive(Parser)]
#[command(name = "playpoll-cli", version, about = "Playpoll CLI")]
struct Cli {
    /// Log format override: "human" or "json"
    #[arg(long, global = true)]
    log_format: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Engine configuration management
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
    /// Bot settings stored in the state snapshot
    Bot {
        #[command(subcommand)]
        action: commands::bot::BotAction,
    },
    /// Inspect the persisted state snapshot
    State {
        #[command(subcommand)]
        action: commands::state::StateAction,
    },
    /// Run one poll locally against the in-memory messenger
    Simulate(commands::simulate::SimulateArgs),
}

fn main() {
    let cli = Cli::parse();

    let config = Config::load_or_default();
    let format = cli.log_format.as_deref().unwrap_or(&config.log_format);
    logging::init_logging(logging::LogFormat::from_setting(format), &config.log_level);

    let result = match cli.command {
        Commands::Config { action } => commands::config::run(action),
        Commands::Bot { action } => commands::bot::run(action),
        Commands::State { action } => commands::state::run(action),
        Commands::Simulate(args) => commands::simulate::run(args),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

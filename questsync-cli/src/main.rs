//! questsync: quest tracking and self-update control.
//!
//! # Usage
//!
//! ```text
//! questsync quests [--enrolled | --not-enrolled] [--json]
//! questsync refresh
//! questsync enroll <quest-id>
//! questsync update check|apply [--relaunch]
//! questsync script run
//! questsync config init|show
//! questsync daemon start [--json-logs] | stop | status | notices [--lines N]
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    config::ConfigCommand, daemon::DaemonCommand, enroll::EnrollArgs, quests::QuestsArgs,
    script::ScriptCommand, update::UpdateCommand,
};

#[derive(Parser, Debug)]
#[command(
    name = "questsync",
    version,
    about = "Track quests from the host registry and keep the install up to date",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List active quests.
    Quests(QuestsArgs),

    /// Re-scan the registry now instead of waiting for the next poll.
    Refresh,

    /// Enroll in a quest.
    Enroll(EnrollArgs),

    /// Check for and apply upstream updates.
    Update {
        #[command(subcommand)]
        command: UpdateCommand,
    },

    /// Fetch and run the remote quest script.
    Script {
        #[command(subcommand)]
        command: ScriptCommand,
    },

    /// Create or inspect ~/.questsync/config.yaml.
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },

    /// Manage the questsync background daemon.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Quests(args) => args.run(),
        Commands::Refresh => commands::quests::refresh(),
        Commands::Enroll(args) => args.run(),
        Commands::Update { command } => commands::update::run(command),
        Commands::Script { command } => commands::script::run(command),
        Commands::Config { command } => commands::config::run(command),
        Commands::Daemon { command } => commands::daemon::run(command),
    }
}

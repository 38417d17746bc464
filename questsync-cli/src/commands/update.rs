//! `questsync update check|apply`

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use serde::Deserialize;

use questsync_core::Commit;
use questsync_daemon::{request_apply, request_check};

use super::{daemon_required, home};

#[derive(Subcommand, Debug)]
pub enum UpdateCommand {
    /// Compare the install against its upstream branch.
    Check,
    /// Pull, rebuild, and optionally relaunch.
    Apply {
        /// Relaunch the host after a successful rebuild.
        #[arg(long)]
        relaunch: bool,
    },
}

#[derive(Deserialize)]
struct CheckReply {
    outdated: bool,
    #[serde(default)]
    commits: Vec<Commit>,
}

#[derive(Deserialize)]
struct ApplyReply {
    relaunched: bool,
    message: String,
}

pub fn run(command: UpdateCommand) -> Result<()> {
    let home = home()?;
    match command {
        UpdateCommand::Check => {
            let value = request_check(&home).map_err(daemon_required)?;
            let reply: CheckReply =
                serde_json::from_value(value).context("daemon returned an unexpected reply")?;
            if !reply.outdated {
                println!("✓ Up to date");
                return Ok(());
            }
            println!(
                "{}",
                format!("Update available: {} new commit(s)", reply.commits.len()).yellow()
            );
            for commit in &reply.commits {
                println!(
                    "  {} {} {}",
                    commit.short_hash.bright_black(),
                    commit.message,
                    format!("({})", commit.author).bright_black()
                );
            }
            println!("Run 'questsync update apply' to install it.");
        }
        UpdateCommand::Apply { relaunch } => {
            let value = request_apply(&home, relaunch).map_err(daemon_required)?;
            let reply: ApplyReply =
                serde_json::from_value(value).context("daemon returned an unexpected reply")?;
            println!("✓ {}", reply.message);
            if relaunch && !reply.relaunched {
                println!("  Relaunch did not complete; restart manually.");
            }
        }
    }
    Ok(())
}

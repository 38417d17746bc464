//! `questsync script run`

use anyhow::Result;
use clap::Subcommand;

use questsync_daemon::request_run_script;

use super::{daemon_required, home};

#[derive(Subcommand, Debug)]
pub enum ScriptCommand {
    /// Download the configured script and run its first ```js block.
    Run,
}

pub fn run(command: ScriptCommand) -> Result<()> {
    let home = home()?;
    match command {
        ScriptCommand::Run => {
            let value = request_run_script(&home).map_err(daemon_required)?;
            if let Some(output) = value.get("output").and_then(|v| v.as_str()) {
                print!("{output}");
            }
            println!("✓ Script finished");
        }
    }
    Ok(())
}

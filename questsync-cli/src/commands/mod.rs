pub mod config;
pub mod daemon;
pub mod enroll;
pub mod quests;
pub mod script;
pub mod update;

use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use questsync_daemon::DaemonError;

pub(crate) fn home() -> Result<PathBuf> {
    dirs::home_dir().context("could not determine home directory")
}

/// Turn "daemon not running" into an actionable message.
pub(crate) fn daemon_required(err: DaemonError) -> anyhow::Error {
    match err {
        DaemonError::DaemonNotRunning { .. } => {
            anyhow!("daemon is not running; start it with `questsync daemon start`")
        }
        other => anyhow::Error::new(other),
    }
}

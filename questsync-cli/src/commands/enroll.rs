//! `questsync enroll <quest-id>`

use anyhow::Result;
use clap::Args;

use questsync_daemon::request_enroll;

use super::{daemon_required, home};

#[derive(Args, Debug)]
pub struct EnrollArgs {
    /// Quest id as shown by `questsync quests`.
    pub quest_id: String,
}

impl EnrollArgs {
    pub fn run(self) -> Result<()> {
        let home = home()?;
        request_enroll(&home, &self.quest_id).map_err(daemon_required)?;
        println!("✓ Enrolled in quest {}", self.quest_id);
        println!("  Progress will show up after the next refresh.");
        Ok(())
    }
}

//! `questsync quests` and `questsync refresh`.

use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use questsync_core::{config, Quest, QuestSnapshot};
use questsync_daemon::{request_quests, request_refresh, DaemonError};
use questsync_scanner::{graph, locate_quest_collection, normalize};

use super::{daemon_required, home};

/// Arguments for `questsync quests`.
#[derive(Args, Debug)]
pub struct QuestsArgs {
    /// Only quests you are enrolled in.
    #[arg(long, conflicts_with = "not_enrolled")]
    pub enrolled: bool,

    /// Only quests you have not enrolled in yet.
    #[arg(long)]
    pub not_enrolled: bool,

    /// Include quests whose reward is already claimed.
    #[arg(long)]
    pub all: bool,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl QuestsArgs {
    pub fn run(self) -> Result<()> {
        let home = home()?;
        let snapshot = match request_quests(&home) {
            Ok(value) => serde_json::from_value::<QuestSnapshot>(value)
                .context("daemon returned an unexpected quest snapshot")?,
            Err(DaemonError::DaemonNotRunning { .. }) => scan_snapshot_file(&home)?,
            Err(err) => return Err(err).context("failed to query quests"),
        };

        let quests: Vec<&Quest> = if self.enrolled {
            snapshot.enrolled().collect()
        } else if self.not_enrolled {
            snapshot.not_enrolled().collect()
        } else if self.all {
            snapshot.quests.iter().collect()
        } else {
            snapshot.available().collect()
        };

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&quests).context("failed to serialize quests")?
            );
            return Ok(());
        }

        print_table(&quests, snapshot.taken_at);
        Ok(())
    }
}

pub fn refresh() -> Result<()> {
    let home = home()?;
    let value = request_refresh(&home).map_err(daemon_required)?;
    let snapshot: QuestSnapshot =
        serde_json::from_value(value).context("daemon returned an unexpected quest snapshot")?;
    println!(
        "✓ Refreshed: {} quests ({} enrolled)",
        snapshot.available().count(),
        snapshot.enrolled().count()
    );
    Ok(())
}

/// Scan the configured graph snapshot directly when no daemon is running.
fn scan_snapshot_file(home: &Path) -> Result<QuestSnapshot> {
    let config = config::load_at(home).context("failed to load ~/.questsync/config.yaml")?;
    let Some(path) = config.graph_snapshot else {
        bail!("daemon is not running and no graph_snapshot is configured in ~/.questsync/config.yaml");
    };
    let graph = graph::load_snapshot(&path)
        .with_context(|| format!("failed to read graph snapshot {}", path.display()))?;
    let now = Utc::now();
    Ok(QuestSnapshot::new(
        now,
        normalize(&locate_quest_collection(&graph), now),
    ))
}

#[derive(Tabled)]
struct QuestRow {
    #[tabled(rename = "id")]
    id: String,
    #[tabled(rename = "quest")]
    quest: String,
    #[tabled(rename = "game")]
    game: String,
    #[tabled(rename = "task")]
    task: String,
    #[tabled(rename = "progress")]
    progress: String,
    #[tabled(rename = "reward")]
    reward: String,
    #[tabled(rename = "expires")]
    expires: String,
    #[tabled(rename = "status")]
    status: String,
}

fn print_table(quests: &[&Quest], taken_at: DateTime<Utc>) {
    if quests.is_empty() {
        println!("No active quests.");
        return;
    }

    let rows: Vec<QuestRow> = quests
        .iter()
        .map(|quest| QuestRow {
            id: quest.id.to_string(),
            quest: quest.quest_name.clone(),
            game: quest.application_name.clone(),
            task: quest.task_kind.label().to_string(),
            progress: format!(
                "{}/{} min ({}%)",
                quest.minutes_done(),
                quest.minutes_needed(),
                quest.progress_percent()
            ),
            reward: quest.reward_name.clone(),
            expires: quest.time_left(taken_at),
            status: status_label(quest),
        })
        .collect();

    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
    println!(
        "{}",
        format!("as of {}", taken_at.format("%Y-%m-%d %H:%M:%S UTC")).bright_black()
    );
}

fn status_label(quest: &Quest) -> String {
    if quest.is_claimed {
        "CLAIMED".bright_black().to_string()
    } else if quest.is_completed {
        "COMPLETED".green().bold().to_string()
    } else if quest.is_enrolled {
        "ENROLLED".yellow().to_string()
    } else {
        "NOT ENROLLED".normal().to_string()
    }
}

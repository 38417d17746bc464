//! Domain types shared by the scanner, the drift tracker, and the daemon.
//!
//! Quests are ephemeral: they are rebuilt from the host registry on every poll
//! and never persisted. [`SyncState`] is the single process-wide value written
//! by the drift tracker and read by everything else.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Opaque, stable identifier of a quest as assigned by the host registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QuestId(pub String);

impl fmt::Display for QuestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for QuestId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for QuestId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Task kinds
// ---------------------------------------------------------------------------

/// The task kinds this system knows how to track.
///
/// Declaration order is the selection priority: when a quest offers several
/// supported tasks, the earliest kind in [`TaskKind::all`] wins regardless of
/// the field order in the raw record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskKind {
    WatchVideo,
    PlayOnDesktop,
    StreamOnDesktop,
    PlayActivity,
    WatchVideoOnMobile,
}

impl TaskKind {
    /// All supported kinds, in priority order.
    pub fn all() -> &'static [TaskKind] {
        &[
            TaskKind::WatchVideo,
            TaskKind::PlayOnDesktop,
            TaskKind::StreamOnDesktop,
            TaskKind::PlayActivity,
            TaskKind::WatchVideoOnMobile,
        ]
    }

    /// Key used for this kind in raw task-configuration maps.
    pub fn key(self) -> &'static str {
        match self {
            TaskKind::WatchVideo => "WATCH_VIDEO",
            TaskKind::PlayOnDesktop => "PLAY_ON_DESKTOP",
            TaskKind::StreamOnDesktop => "STREAM_ON_DESKTOP",
            TaskKind::PlayActivity => "PLAY_ACTIVITY",
            TaskKind::WatchVideoOnMobile => "WATCH_VIDEO_ON_MOBILE",
        }
    }

    /// Human-readable label.
    pub fn label(self) -> &'static str {
        match self {
            TaskKind::WatchVideo => "Watch Video",
            TaskKind::PlayOnDesktop => "Play Game",
            TaskKind::StreamOnDesktop => "Stream Game",
            TaskKind::PlayActivity => "Play Activity",
            TaskKind::WatchVideoOnMobile => "Watch Video (Mobile)",
        }
    }

    pub fn from_key(key: &str) -> Option<TaskKind> {
        TaskKind::all().iter().copied().find(|kind| kind.key() == key)
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

// ---------------------------------------------------------------------------
// Quests
// ---------------------------------------------------------------------------

/// A normalized quest, recomputed on every poll.
///
/// `is_completed` implies `is_enrolled`; `seconds_done` is 0 unless enrolled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quest {
    pub id: QuestId,
    pub quest_name: String,
    pub application_name: String,
    pub task_kind: TaskKind,
    pub reward_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reward_image: Option<String>,
    pub seconds_needed: u64,
    pub seconds_done: u64,
    pub expires_at: DateTime<Utc>,
    pub is_enrolled: bool,
    pub is_completed: bool,
    pub is_claimed: bool,
}

impl Quest {
    /// Progress in whole percent, clamped to `0..=100`.
    pub fn progress_percent(&self) -> u8 {
        if self.seconds_needed == 0 {
            return 0;
        }
        let percent = self.seconds_done.saturating_mul(100) / self.seconds_needed;
        percent.min(100) as u8
    }

    /// `seconds_done` clamped to `seconds_needed`, for display only.
    pub fn display_seconds_done(&self) -> u64 {
        self.seconds_done.min(self.seconds_needed)
    }

    pub fn minutes_done(&self) -> u64 {
        self.display_seconds_done() / 60
    }

    pub fn minutes_needed(&self) -> u64 {
        self.seconds_needed / 60
    }

    pub fn time_left(&self, now: DateTime<Utc>) -> String {
        format_time_left(self.expires_at, now)
    }
}

/// Compact "time remaining" label: `"2d 3h left"`, `"4h 10m left"`, `"7m left"`,
/// or `"Expired"` once `expires_at` has passed.
pub fn format_time_left(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let remaining = expires_at.signed_duration_since(now).num_seconds();
    if remaining <= 0 {
        return "Expired".to_string();
    }
    let days = remaining / (60 * 60 * 24);
    let hours = (remaining % (60 * 60 * 24)) / (60 * 60);
    let minutes = (remaining % (60 * 60)) / 60;

    if days > 0 {
        return format!("{days}d {hours}h left");
    }
    if hours > 0 {
        return format!("{hours}h {minutes}m left");
    }
    format!("{minutes}m left")
}

/// One published poll result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestSnapshot {
    pub taken_at: DateTime<Utc>,
    #[serde(default)]
    pub quests: Vec<Quest>,
}

impl QuestSnapshot {
    pub fn new(taken_at: DateTime<Utc>, quests: Vec<Quest>) -> Self {
        Self { taken_at, quests }
    }

    pub fn empty(taken_at: DateTime<Utc>) -> Self {
        Self::new(taken_at, Vec::new())
    }

    /// Quests whose reward has not been claimed yet.
    pub fn available(&self) -> impl Iterator<Item = &Quest> {
        self.quests.iter().filter(|q| !q.is_claimed)
    }

    pub fn enrolled(&self) -> impl Iterator<Item = &Quest> {
        self.available().filter(|q| q.is_enrolled)
    }

    pub fn not_enrolled(&self) -> impl Iterator<Item = &Quest> {
        self.available().filter(|q| !q.is_enrolled)
    }

    pub fn find(&self, id: &QuestId) -> Option<&Quest> {
        self.quests.iter().find(|q| &q.id == id)
    }
}

// ---------------------------------------------------------------------------
// Revision control
// ---------------------------------------------------------------------------

/// One upstream commit not yet applied locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub short_hash: String,
    pub full_hash: String,
    pub author: String,
    pub message: String,
}

/// Identity of the installed working copy, captured once per update check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoIdentity {
    /// Browsable HTTPS URL of the tracked remote.
    pub normalized_remote_url: String,
    pub local_revision_hash: String,
}

/// The `Failed` side of every revision-source operation.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct RevisionFailure {
    /// Human-readable summary, suitable for a notification body.
    pub message: String,
    /// Raw error text (stderr or spawn error), when one was captured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_error: Option<String>,
    /// The argument list that failed.
    #[serde(default)]
    pub command: Vec<String>,
}

impl RevisionFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            raw_error: None,
            command: Vec::new(),
        }
    }

    pub fn with_raw_error(mut self, raw: impl Into<String>) -> Self {
        self.raw_error = Some(raw.into());
        self
    }

    pub fn with_command(mut self, command: Vec<String>) -> Self {
        self.command = command;
        self
    }
}

/// Uniform envelope returned by every revision-source operation.
pub type RevisionResult<T> = Result<T, RevisionFailure>;

// ---------------------------------------------------------------------------
// Sync state
// ---------------------------------------------------------------------------

/// Which apply step failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplyStage {
    Pull,
    Rebuild,
}

/// Drift tracker state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum DriftPhase {
    #[default]
    Unknown,
    Checking,
    UpToDate,
    Outdated,
    CheckFailed,
    Applying,
    Applied,
    ApplyFailed { stage: ApplyStage },
}

impl DriftPhase {
    /// A check or apply is currently running.
    pub fn is_busy(self) -> bool {
        matches!(self, DriftPhase::Checking | DriftPhase::Applying)
    }
}

/// Process-wide synchronization state. Written only by the drift tracker.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SyncState {
    #[serde(flatten)]
    pub phase: DriftPhase,
    pub is_outdated: bool,
    #[serde(default)]
    pub pending_commits: Vec<Commit>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_identity: Option<RepoIdentity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<RevisionFailure>,
}

// ---------------------------------------------------------------------------
// Notices
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Info,
    Success,
    Error,
}

/// A user-visible notification produced by an action or an update flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub title: String,
    pub body: String,
}

impl Notice {
    pub fn info(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Info,
            title: title.into(),
            body: body.into(),
        }
    }

    pub fn success(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Success,
            title: title.into(),
            body: body.into(),
        }
    }

    pub fn error(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            title: title.into(),
            body: body.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

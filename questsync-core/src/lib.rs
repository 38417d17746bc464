//! questsync core library: domain types, configuration, errors.
//!
//! - [`types`]: quests, task kinds, commits, and the process-wide sync state
//! - [`config`]: YAML configuration load / save
//! - [`error`]: [`ConfigError`]

pub mod config;
pub mod error;
pub mod types;

pub use config::Config;
pub use error::ConfigError;
pub use types::{
    format_time_left, ApplyStage, Commit, DriftPhase, Notice, NoticeLevel, Quest, QuestId,
    QuestSnapshot, RepoIdentity, RevisionFailure, RevisionResult, SyncState, TaskKind,
};

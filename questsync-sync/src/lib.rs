//! # questsync-sync
//!
//! Drift detection and self-update for the installed working copy.
//!
//! - [`runner`]: process execution with the host-spawn policy
//! - [`git`]: the revision source adapter (`RevisionResult` envelope)
//! - [`install`]: rebuild / relaunch collaborators
//! - [`drift`]: the drift tracker state machine and its published [`SyncState`](questsync_core::SyncState)

pub mod drift;
pub mod git;
pub mod install;
pub mod runner;

pub use drift::{ApplyOutcome, CheckOutcome, DriftTracker};
pub use git::{normalize_remote_url, parse_commit_line, GitAdapter, RevisionSource};
pub use install::{CommandInstaller, InstallCollaborator};
pub use runner::{CommandOutput, CommandRunner, ProcessRunner, SpawnPolicy};

//! Drift tracker.
//!
//! ```text
//! Unknown → Checking → UpToDate | Outdated | CheckFailed
//! Outdated → Applying → Applied | ApplyFailed { pull | rebuild }
//! ```
//!
//! The tracker is the only writer of [`SyncState`]; observers hold a
//! `watch::Receiver`. Steps inside one transition run strictly in sequence.
//! Nothing retries on its own: every transition is started by a caller, and a
//! new check always asks the revision source again.

use std::sync::Arc;

use tokio::sync::watch;

use questsync_core::{ApplyStage, Commit, DriftPhase, Notice, RevisionFailure, SyncState};

use crate::git::RevisionSource;
use crate::install::InstallCollaborator;

/// Result of [`DriftTracker::check`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    UpToDate,
    Outdated(Vec<Commit>),
    Failed(RevisionFailure),
    /// Another check or apply was running; nothing was done.
    Busy,
}

impl CheckOutcome {
    /// Notification for outcomes the user should see.
    pub fn notice(&self) -> Option<Notice> {
        match self {
            CheckOutcome::Outdated(commits) => Some(Notice::info(
                "Update available",
                format!(
                    "Update available! {} new commit{}.\n\nWould you like to update now?",
                    commits.len(),
                    if commits.len() == 1 { "" } else { "s" }
                ),
            )),
            CheckOutcome::Failed(failure) => Some(Notice::error(
                "Update check failed",
                failure.message.clone(),
            )),
            CheckOutcome::UpToDate | CheckOutcome::Busy => None,
        }
    }
}

/// Result of [`DriftTracker::apply`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied { relaunched: bool },
    /// Nothing was changed locally.
    PullFailed(RevisionFailure),
    /// Sources were pulled but not built; a manual rebuild is required.
    RebuildFailed(RevisionFailure),
    NotOutdated,
    Busy,
}

impl ApplyOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ApplyOutcome::Applied { .. })
    }

    pub fn notice(&self) -> Notice {
        match self {
            ApplyOutcome::Applied { relaunched: true } => {
                Notice::success("Update Success!", "Updated successfully. Restarting…")
            }
            ApplyOutcome::Applied { relaunched: false } => Notice::success(
                "Update Success!",
                "Updated successfully. Restart to apply changes?",
            ),
            ApplyOutcome::PullFailed(failure) => Notice::error(
                "Update Failed",
                format!("Failed to update: {}", failure.message),
            ),
            ApplyOutcome::RebuildFailed(failure) => Notice::error(
                "Build Failed",
                format!(
                    "The update was downloaded but the build failed ({}). Please try manually rebuilding.",
                    failure.message
                ),
            ),
            ApplyOutcome::NotOutdated => Notice::info("Up to date", "There is no update to apply."),
            ApplyOutcome::Busy => Notice::info(
                "Update in progress",
                "An update check or install is already running.",
            ),
        }
    }
}

/// Owns the process-wide [`SyncState`].
pub struct DriftTracker {
    source: Arc<dyn RevisionSource>,
    installer: Arc<dyn InstallCollaborator>,
    state: watch::Sender<SyncState>,
}

impl DriftTracker {
    pub fn new(source: Arc<dyn RevisionSource>, installer: Arc<dyn InstallCollaborator>) -> Self {
        let (state, _) = watch::channel(SyncState::default());
        Self {
            source,
            installer,
            state,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.state.subscribe()
    }

    /// Current state, cloned.
    pub fn state(&self) -> SyncState {
        self.state.borrow().clone()
    }

    /// Enter `next` if `allowed` holds for the current state.
    fn begin(&self, allowed: impl Fn(&SyncState) -> bool, next: DriftPhase) -> bool {
        self.state.send_if_modified(|state| {
            if allowed(state) {
                state.phase = next;
                true
            } else {
                false
            }
        })
    }

    /// Fetch repo identity, then enumerate upstream commits.
    ///
    /// On failure the previous outdated flag and pending commits are kept and
    /// the failure is recorded in `last_error`.
    pub async fn check(&self) -> CheckOutcome {
        if !self.begin(|s| !s.phase.is_busy(), DriftPhase::Checking) {
            return CheckOutcome::Busy;
        }
        tracing::info!("checking for updates");

        let identity = match self.source.repo_identity().await {
            Ok(identity) => identity,
            Err(failure) => return self.check_failed(failure),
        };
        tracing::debug!(
            remote = %identity.normalized_remote_url,
            head = %identity.local_revision_hash,
            "repo identity",
        );
        self.state.send_modify(|s| s.repo_identity = Some(identity));

        let commits = match self.source.new_commits().await {
            Ok(commits) => commits,
            Err(failure) => return self.check_failed(failure),
        };

        let is_outdated = !commits.is_empty();
        tracing::info!(commits = commits.len(), is_outdated, "update check finished");
        self.state.send_modify(|s| {
            s.phase = if is_outdated {
                DriftPhase::Outdated
            } else {
                DriftPhase::UpToDate
            };
            s.is_outdated = is_outdated;
            s.pending_commits = commits.clone();
            s.last_error = None;
        });

        if is_outdated {
            CheckOutcome::Outdated(commits)
        } else {
            CheckOutcome::UpToDate
        }
    }

    fn check_failed(&self, failure: RevisionFailure) -> CheckOutcome {
        tracing::error!(
            error = %failure,
            raw = failure.raw_error.as_deref().unwrap_or(""),
            "update check failed",
        );
        self.state.send_modify(|s| {
            s.phase = DriftPhase::CheckFailed;
            s.last_error = Some(failure.clone());
        });
        CheckOutcome::Failed(failure)
    }

    /// Pull, rebuild, then relaunch when `relaunch` is set.
    ///
    /// Only runs while an update is pending. A relaunch failure is logged and
    /// reported as `relaunched: false`; it never fails the apply.
    pub async fn apply(&self, relaunch: bool) -> ApplyOutcome {
        if !self.begin(
            |s| s.is_outdated && !s.phase.is_busy(),
            DriftPhase::Applying,
        ) {
            return if self.state.borrow().phase.is_busy() {
                ApplyOutcome::Busy
            } else {
                ApplyOutcome::NotOutdated
            };
        }
        tracing::info!("applying update");

        if let Err(failure) = self.source.pull().await {
            tracing::error!(error = %failure, "pull failed");
            self.apply_failed(ApplyStage::Pull, failure.clone());
            return ApplyOutcome::PullFailed(failure);
        }

        if let Err(failure) = self.installer.rebuild().await {
            tracing::error!(error = %failure, "rebuild failed after pull; manual rebuild required");
            self.apply_failed(ApplyStage::Rebuild, failure.clone());
            return ApplyOutcome::RebuildFailed(failure);
        }

        self.state.send_modify(|s| {
            s.phase = DriftPhase::Applied;
            s.is_outdated = false;
            s.pending_commits.clear();
            s.last_error = None;
        });
        tracing::info!("update applied");

        if !relaunch {
            return ApplyOutcome::Applied { relaunched: false };
        }
        match self.installer.relaunch().await {
            Ok(()) => ApplyOutcome::Applied { relaunched: true },
            Err(failure) => {
                tracing::warn!(error = %failure, "relaunch declined");
                ApplyOutcome::Applied { relaunched: false }
            }
        }
    }

    fn apply_failed(&self, stage: ApplyStage, failure: RevisionFailure) {
        self.state.send_modify(|s| {
            s.phase = DriftPhase::ApplyFailed { stage };
            s.last_error = Some(failure);
        });
    }
}

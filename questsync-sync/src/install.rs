//! Rebuild and relaunch collaborators.
//!
//! The drift tracker only interprets their outcome; how a rebuild or restart
//! actually happens is configured as plain argv lists.

use std::path::PathBuf;

use async_trait::async_trait;

use questsync_core::{RevisionFailure, RevisionResult};

use crate::runner::{CommandRunner, ProcessRunner};

#[async_trait]
pub trait InstallCollaborator: Send + Sync {
    /// Build the freshly pulled sources.
    async fn rebuild(&self) -> RevisionResult<()>;

    /// Restart the host so the new build is loaded.
    async fn relaunch(&self) -> RevisionResult<()>;
}

/// Runs configured commands in the install root.
#[derive(Debug, Clone)]
pub struct CommandInstaller<R = ProcessRunner> {
    runner: R,
    root: PathBuf,
    rebuild: Vec<String>,
    relaunch: Vec<String>,
}

impl<R: CommandRunner> CommandInstaller<R> {
    pub fn new(
        runner: R,
        root: impl Into<PathBuf>,
        rebuild: Vec<String>,
        relaunch: Vec<String>,
    ) -> Self {
        Self {
            runner,
            root: root.into(),
            rebuild,
            relaunch,
        }
    }

    async fn run(&self, what: &str, argv: &[String]) -> RevisionResult<()> {
        let Some((program, args)) = argv.split_first() else {
            return Err(RevisionFailure::new(format!("no {what} command configured")));
        };

        match self.runner.run(&self.root, program, args).await {
            Ok(output) if output.success => Ok(()),
            Ok(output) => Err(RevisionFailure::new(format!("{what} command failed"))
                .with_raw_error(output.stderr.trim())
                .with_command(argv.to_vec())),
            Err(err) => Err(RevisionFailure::new(format!("failed to start {what} command"))
                .with_raw_error(err.to_string())
                .with_command(argv.to_vec())),
        }
    }
}

#[async_trait]
impl<R: CommandRunner> InstallCollaborator for CommandInstaller<R> {
    async fn rebuild(&self) -> RevisionResult<()> {
        self.run("rebuild", &self.rebuild).await
    }

    async fn relaunch(&self) -> RevisionResult<()> {
        self.run("relaunch", &self.relaunch).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::SpawnPolicy;

    #[tokio::test]
    async fn empty_command_is_a_failure_not_a_panic() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let installer = CommandInstaller::new(
            ProcessRunner::new(SpawnPolicy::Direct),
            dir.path(),
            Vec::new(),
            Vec::new(),
        );
        let err = installer.relaunch().await.unwrap_err();
        assert_eq!(err.message, "no relaunch command configured");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn rebuild_failure_captures_stderr_and_argv() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let argv: Vec<String> = ["sh", "-c", "echo 'missing dependency' >&2; exit 1"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let installer = CommandInstaller::new(
            ProcessRunner::new(SpawnPolicy::Direct),
            dir.path(),
            argv.clone(),
            Vec::new(),
        );
        let err = installer.rebuild().await.unwrap_err();
        assert_eq!(err.message, "rebuild command failed");
        assert_eq!(err.raw_error.as_deref(), Some("missing dependency"));
        assert_eq!(err.command, argv);
    }
}

//! Process execution.
//!
//! Sandboxed hosts (Flatpak) cannot run tools from the host system directly;
//! every command is routed through `flatpak-spawn --host` instead. The choice
//! is made once, when the runner is built.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;

/// Captured result of one finished process.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }
}

/// Runs a program to completion in a working directory.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, cwd: &Path, program: &str, args: &[String])
        -> std::io::Result<CommandOutput>;
}

/// How commands reach the host system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnPolicy {
    Direct,
    HostSpawn,
}

impl SpawnPolicy {
    /// Host-bridging prefix used under [`SpawnPolicy::HostSpawn`].
    pub const HOST_SPAWN_PREFIX: [&'static str; 2] = ["flatpak-spawn", "--host"];

    /// Detect the current environment.
    pub fn detect() -> Self {
        Self::from_markers(
            std::env::var_os("FLATPAK_ID").is_some(),
            Path::new("/.flatpak-info").exists(),
        )
    }

    pub fn from_markers(flatpak_env: bool, flatpak_info: bool) -> Self {
        if flatpak_env || flatpak_info {
            SpawnPolicy::HostSpawn
        } else {
            SpawnPolicy::Direct
        }
    }

    /// Full argv for `program args…` under this policy.
    pub fn argv(self, program: &str, args: &[String]) -> Vec<String> {
        let mut argv = Vec::with_capacity(args.len() + 3);
        if self == SpawnPolicy::HostSpawn {
            argv.extend(Self::HOST_SPAWN_PREFIX.iter().map(|s| s.to_string()));
        }
        argv.push(program.to_string());
        argv.extend(args.iter().cloned());
        argv
    }
}

/// [`CommandRunner`] backed by `tokio::process`.
#[derive(Debug, Clone, Copy)]
pub struct ProcessRunner {
    policy: SpawnPolicy,
}

impl ProcessRunner {
    pub fn new(policy: SpawnPolicy) -> Self {
        Self { policy }
    }

    pub fn detect() -> Self {
        let policy = SpawnPolicy::detect();
        tracing::debug!(?policy, "command spawn policy");
        Self::new(policy)
    }

    pub fn policy(&self) -> SpawnPolicy {
        self.policy
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(
        &self,
        cwd: &Path,
        program: &str,
        args: &[String],
    ) -> std::io::Result<CommandOutput> {
        let argv = self.policy.argv(program, args);
        let output = tokio::process::Command::new(&argv[0])
            .args(&argv[1..])
            .current_dir(cwd)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;

        Ok(CommandOutput {
            success: output.status.success(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

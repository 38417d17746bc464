//! YAML configuration.
//!
//! # Storage layout
//!
//! ```text
//! ~/.questsync/
//!   config.yaml   (mode 0600)
//! ```
//!
//! # API pattern
//!
//! Every function has two forms:
//! - `fn_at(home: &Path, …)`: explicit home; used in tests with `TempDir`
//! - `fn(…)`: derives home from `dirs::home_dir()`, delegates to `_at`
//!
//! A missing file is not an error: [`load_at`] returns [`Config::default`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const CONFIG_DIR: &str = ".questsync";
pub const CONFIG_FILE: &str = "config.yaml";

pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;
pub const DEFAULT_API_BASE_URL: &str = "https://discord.com/api/v9";
pub const DEFAULT_SCRIPT_URL: &str =
    "https://gist.githubusercontent.com/aamiaa/204cd9d42013ded9faf646fae7f89fbb/raw/CompleteDiscordQuest.md";
pub const DEFAULT_REMOTE: &str = "origin";

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

/// Root of `config.yaml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Working copy of the installed component; git commands run here.
    pub install_root: Option<PathBuf>,
    /// Seconds between quest polls.
    pub poll_interval_secs: u64,
    /// JSON module-graph snapshot exported by the host process.
    pub graph_snapshot: Option<PathBuf>,
    /// Delay before re-polling after a successful enroll.
    pub enroll_refresh_delay_ms: u64,
    pub api: ApiConfig,
    pub script: ScriptConfig,
    pub update: UpdateConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            install_root: None,
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            graph_snapshot: None,
            enroll_refresh_delay_ms: 500,
            api: ApiConfig::default(),
            script: ScriptConfig::default(),
            update: UpdateConfig::default(),
        }
    }
}

impl Config {
    /// Poll interval, never shorter than one second.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn enroll_refresh_delay(&self) -> Duration {
        Duration::from_millis(self.enroll_refresh_delay_ms)
    }
}

/// Request API used for enrollment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    /// Value of the `Authorization` header; requests are sent without one when unset.
    pub token: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_BASE_URL.to_string(),
            token: None,
        }
    }
}

/// Remote script fetch-and-run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptConfig {
    pub url: String,
    /// Fetched scripts are only executed when this is set.
    pub allow_execution: bool,
    /// Interpreter argv; the script is written to its stdin.
    pub interpreter: Vec<String>,
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_SCRIPT_URL.to_string(),
            allow_execution: false,
            interpreter: vec!["node".to_string(), "-".to_string()],
        }
    }
}

/// Self-update behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateConfig {
    pub check_on_start: bool,
    /// Remote tracked for drift; commits are compared against `<remote>/<branch>`.
    pub remote: String,
    /// Seconds between finding drift and publishing the update notice.
    pub notify_delay_secs: u64,
    /// Argv run in `install_root` after a successful pull.
    pub rebuild_command: Vec<String>,
    /// Argv run when the user opts into a restart after an update.
    pub relaunch_command: Vec<String>,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            check_on_start: true,
            remote: DEFAULT_REMOTE.to_string(),
            notify_delay_secs: 3,
            rebuild_command: vec!["pnpm".to_string(), "build".to_string()],
            relaunch_command: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Paths
// ---------------------------------------------------------------------------

/// `<home>/.questsync/`: pure, no I/O.
pub fn config_dir_at(home: &Path) -> PathBuf {
    home.join(CONFIG_DIR)
}

/// `<home>/.questsync/config.yaml`: pure, no I/O.
pub fn config_path_at(home: &Path) -> PathBuf {
    config_dir_at(home).join(CONFIG_FILE)
}

// ---------------------------------------------------------------------------
// Load / save
// ---------------------------------------------------------------------------

/// Load `<home>/.questsync/config.yaml`, or defaults when the file is absent.
///
/// Returns `ConfigError::Parse` (with path + line context) on malformed YAML.
pub fn load_at(home: &Path) -> Result<Config, ConfigError> {
    let path = config_path_at(home);
    if !path.exists() {
        return Ok(Config::default());
    }
    let contents = std::fs::read_to_string(&path)?;
    if contents.trim().is_empty() {
        return Ok(Config::default());
    }
    serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse { path, source: e })
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<Config, ConfigError> {
    load_at(&home()?)
}

/// Atomically save the config.
///
/// Write flow: serialize → `.yaml.tmp` sibling → `chmod 0600` → `rename`.
pub fn save_at(home: &Path, config: &Config) -> Result<PathBuf, ConfigError> {
    let dir = config_dir_at(home);
    if !dir.exists() {
        std::fs::create_dir_all(&dir)?;
        set_dir_permissions(&dir)?;
    }
    let path = config_path_at(home);
    let tmp_path = path.with_file_name(format!("{CONFIG_FILE}.tmp"));

    let yaml = serde_yaml::to_string(config)?;
    std::fs::write(&tmp_path, yaml)?;
    set_file_permissions(&tmp_path)?;
    std::fs::rename(&tmp_path, &path)?;
    Ok(path)
}

/// `save_at` convenience wrapper.
pub fn save(config: &Config) -> Result<PathBuf, ConfigError> {
    save_at(&home()?, config)
}

pub fn home() -> Result<PathBuf, ConfigError> {
    dirs::home_dir().ok_or(ConfigError::HomeNotFound)
}

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}

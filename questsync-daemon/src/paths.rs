use std::path::{Path, PathBuf};

use questsync_core::config::config_dir_at;

pub const DAEMON_SOCKET: &str = "daemon.sock";
pub const NOTICES_LOG: &str = "notices.jsonl";

pub fn questsync_root(home: &Path) -> PathBuf {
    config_dir_at(home)
}

pub fn socket_path(home: &Path) -> PathBuf {
    questsync_root(home).join(DAEMON_SOCKET)
}

pub fn logs_dir(home: &Path) -> PathBuf {
    questsync_root(home).join("logs")
}

/// Append-only JSON lines of every [`Notice`](questsync_core::Notice) raised.
pub fn notices_log_path(home: &Path) -> PathBuf {
    logs_dir(home).join(NOTICES_LOG)
}

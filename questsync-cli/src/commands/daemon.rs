//! `questsync daemon`: background poller and control socket lifecycle.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result};
use clap::Subcommand;

use questsync_core::Notice;
use questsync_daemon::paths::{notices_log_path, socket_path};
use questsync_daemon::{request_status, request_stop, start_blocking, DaemonError, LogFormat};

use super::home;

#[derive(Subcommand, Debug)]
pub enum DaemonCommand {
    /// Run the daemon in the foreground (poller + update check + socket server).
    Start {
        /// Emit logs as JSON lines.
        #[arg(long)]
        json_logs: bool,
    },
    /// Request graceful daemon shutdown over the Unix socket.
    Stop,
    /// Query daemon runtime status over the Unix socket.
    Status,
    /// Print recent notices raised by the daemon.
    Notices {
        /// Number of trailing notices to show.
        #[arg(long, default_value_t = 20)]
        lines: usize,
    },
}

pub fn run(command: DaemonCommand) -> Result<()> {
    let home = home()?;

    match command {
        DaemonCommand::Start { json_logs } => {
            let format = if json_logs {
                LogFormat::Json
            } else {
                LogFormat::Text
            };
            start_blocking(&home, format).context("daemon exited with error")?;
        }
        DaemonCommand::Stop => match request_stop(&home) {
            Ok(()) => println!("daemon stop requested"),
            Err(DaemonError::DaemonNotRunning { .. }) => {
                println!("daemon is not running");
            }
            Err(err) => return Err(err).context("failed to stop daemon"),
        },
        DaemonCommand::Status => match request_status(&home) {
            Ok(status) => {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&status)
                        .context("failed to render daemon status JSON")?
                );
            }
            Err(DaemonError::DaemonNotRunning { .. }) => {
                let payload = serde_json::json!({
                    "running": false,
                    "socket": socket_path(&home).display().to_string(),
                });
                println!(
                    "{}",
                    serde_json::to_string_pretty(&payload)
                        .context("failed to render daemon status JSON")?
                );
            }
            Err(err) => return Err(err).context("failed to query daemon status"),
        },
        DaemonCommand::Notices { lines } => {
            print_notices(&notices_log_path(&home), lines).context("failed to read notices")?;
        }
    }

    Ok(())
}

fn print_notices(path: &Path, lines: usize) -> Result<()> {
    if !path.exists() {
        println!("no notices recorded yet");
        return Ok(());
    }
    if lines == 0 {
        return Ok(());
    }

    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let reader = BufReader::new(file);

    let mut tail = VecDeque::<String>::new();
    for line in reader.lines() {
        let line = line.with_context(|| format!("read {}", path.display()))?;
        if tail.len() == lines {
            tail.pop_front();
        }
        tail.push_back(line);
    }

    for line in tail {
        match serde_json::from_str::<Notice>(&line) {
            Ok(notice) => println!("[{:?}] {}: {}", notice.level, notice.title, notice.body),
            Err(_) => println!("{line}"),
        }
    }
    Ok(())
}

//! CLI behavior without a running daemon.

use std::fs;
use std::path::Path;
use std::process::Command;

use assert_cmd::prelude::*;
use predicates::prelude::*;
use predicates::str::contains;
use tempfile::TempDir;

fn questsync_cmd(home: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("questsync"));
    cmd.env("HOME", home).env("USERPROFILE", home);
    cmd
}

const GRAPH: &str = r#"{
  "modules": [
    { "id": "1", "exports": { "A": { "methods": ["getChannel"], "quests": [] } } },
    { "id": "2", "exports": { "Z": { "methods": ["getQuest"], "quests": [
      {
        "id": "1300",
        "config": {
          "expiresAt": "2999-01-01T00:00:00Z",
          "taskConfig": { "tasks": { "WATCH_VIDEO": { "target": 900 } } },
          "messages": { "questName": "Watch the Trailer" },
          "application": { "name": "Some Game" },
          "rewardsConfig": { "rewards": [{ "type": 1, "asset": "quests/1300/orb.png", "messages": { "name": "700 Orbs" } }] }
        },
        "userStatus": { "enrolledAt": "2025-01-01T00:00:00Z", "progress": { "WATCH_VIDEO": { "value": 450 } } }
      },
      {
        "id": "1400",
        "config": {
          "expiresAt": "2999-01-01T00:00:00Z",
          "taskConfig": { "tasks": { "PLAY_ON_DESKTOP": { "target": 1800 } } },
          "messages": { "questName": "Play Another Game" },
          "application": { "name": "Another Game" }
        }
      },
      {
        "id": "1500",
        "config": {
          "expiresAt": "2001-01-01T00:00:00Z",
          "taskConfig": { "tasks": { "WATCH_VIDEO": { "target": 900 } } },
          "messages": { "questName": "Long Gone" }
        }
      }
    ] } } }
  ]
}"#;

fn home_with_graph() -> TempDir {
    let home = TempDir::new().expect("home");
    let graph = home.path().join("graph.json");
    fs::write(&graph, GRAPH).expect("write graph");
    questsync_cmd(home.path())
        .args(["config", "init", "--graph-snapshot"])
        .arg(&graph)
        .assert()
        .success();
    home
}

#[test]
fn help_lists_commands() {
    let home = TempDir::new().expect("home");
    questsync_cmd(home.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(contains("quests"))
        .stdout(contains("enroll"))
        .stdout(contains("update"))
        .stdout(contains("daemon"));
}

#[test]
fn daemon_status_reports_not_running() {
    let home = TempDir::new().expect("home");
    questsync_cmd(home.path())
        .args(["daemon", "status"])
        .assert()
        .success()
        .stdout(contains("\"running\": false"));
}

#[test]
fn daemon_stop_when_not_running_is_not_an_error() {
    let home = TempDir::new().expect("home");
    questsync_cmd(home.path())
        .args(["daemon", "stop"])
        .assert()
        .success()
        .stdout(contains("daemon is not running"));
}

#[test]
fn daemon_notices_without_log() {
    let home = TempDir::new().expect("home");
    questsync_cmd(home.path())
        .args(["daemon", "notices"])
        .assert()
        .success()
        .stdout(contains("no notices recorded yet"));
}

#[test]
fn daemon_only_commands_explain_how_to_start_it() {
    let home = TempDir::new().expect("home");
    for args in [
        vec!["enroll", "1300"],
        vec!["refresh"],
        vec!["update", "check"],
        vec!["update", "apply"],
        vec!["script", "run"],
    ] {
        questsync_cmd(home.path())
            .args(&args)
            .assert()
            .failure()
            .stderr(contains("questsync daemon start"));
    }
}

#[test]
fn quests_without_daemon_or_snapshot_fails() {
    let home = TempDir::new().expect("home");
    questsync_cmd(home.path())
        .arg("quests")
        .assert()
        .failure()
        .stderr(contains("no graph_snapshot is configured"));
}

#[test]
fn quests_scan_snapshot_file_when_daemon_is_down() {
    let home = home_with_graph();
    questsync_cmd(home.path())
        .arg("quests")
        .assert()
        .success()
        .stdout(contains("Watch the Trailer"))
        .stdout(contains("7/15 min (50%)"))
        .stdout(contains("Play Another Game"))
        .stdout(contains("Long Gone").not());
}

#[test]
fn quests_filters_and_json_output() {
    let home = home_with_graph();
    let output = questsync_cmd(home.path())
        .args(["quests", "--enrolled", "--json"])
        .output()
        .expect("run");
    assert!(output.status.success());

    let quests: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json");
    let quests = quests.as_array().expect("array");
    assert_eq!(quests.len(), 1);
    assert_eq!(quests[0]["id"], "1300");
    assert_eq!(quests[0]["task_kind"], "WATCH_VIDEO");
    assert_eq!(
        quests[0]["reward_image"],
        "https://cdn.discordapp.com/quests/1300/orb.png"
    );

    questsync_cmd(home.path())
        .args(["quests", "--not-enrolled"])
        .assert()
        .success()
        .stdout(contains("Play Another Game"))
        .stdout(contains("Watch the Trailer").not());
}

#[test]
fn config_init_is_idempotent_and_show_prints_defaults() {
    let home = TempDir::new().expect("home");
    questsync_cmd(home.path())
        .args(["config", "init"])
        .assert()
        .success()
        .stdout(contains("Wrote"));
    questsync_cmd(home.path())
        .args(["config", "init"])
        .assert()
        .success()
        .stdout(contains("config already exists"));
    questsync_cmd(home.path())
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(contains("poll_interval_secs: 5"))
        .stdout(contains("allow_execution: false"));
}

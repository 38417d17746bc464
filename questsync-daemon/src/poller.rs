//! Repeating quest poll.
//!
//! One task owns the timer. Every firing (or manual refresh) re-runs the
//! scanner and normalizer through a [`QuestSource`] and publishes the result
//! on a `watch` channel. Cancelling stops the task before any further
//! publication; a poll that is still running when cancel arrives is dropped.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use questsync_core::QuestSnapshot;
use questsync_scanner::graph::parse_snapshot;
use questsync_scanner::{locate_quest_collection, Normalizer};

use crate::error::DaemonError;

/// Produces a fresh quest snapshot. Never fails: problems are logged and
/// yield an empty snapshot so the poll keeps running.
#[async_trait]
pub trait QuestSource: Send + Sync {
    async fn poll(&self) -> QuestSnapshot;
}

/// Reads the host's module-graph snapshot file on every poll.
pub struct SnapshotQuestSource {
    path: Option<PathBuf>,
    normalizer: Normalizer,
}

impl SnapshotQuestSource {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            path,
            normalizer: Normalizer::default(),
        }
    }

    pub fn with_normalizer(mut self, normalizer: Normalizer) -> Self {
        self.normalizer = normalizer;
        self
    }
}

#[async_trait]
impl QuestSource for SnapshotQuestSource {
    async fn poll(&self) -> QuestSnapshot {
        let now = Utc::now();
        let Some(path) = &self.path else {
            tracing::debug!("no graph snapshot configured");
            return QuestSnapshot::empty(now);
        };

        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "failed to read graph snapshot");
                return QuestSnapshot::empty(now);
            }
        };
        let graph = match serde_json::from_slice::<Value>(&bytes)
            .map_err(Into::into)
            .and_then(|document| parse_snapshot(&document))
        {
            Ok(graph) => graph,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "unreadable graph snapshot");
                return QuestSnapshot::empty(now);
            }
        };

        let records = locate_quest_collection(&graph);
        QuestSnapshot::new(now, self.normalizer.normalize(&records, now))
    }
}

/// Cloneable access to a running [`Poller`].
#[derive(Clone)]
pub struct PollerHandle {
    snapshots: watch::Receiver<QuestSnapshot>,
    refresh_tx: mpsc::Sender<oneshot::Sender<QuestSnapshot>>,
}

impl PollerHandle {
    pub fn subscribe(&self) -> watch::Receiver<QuestSnapshot> {
        self.snapshots.clone()
    }

    pub fn latest(&self) -> QuestSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Poll now, outside the timer, and return the published snapshot.
    pub async fn refresh(&self) -> Result<QuestSnapshot, DaemonError> {
        let (tx, rx) = oneshot::channel();
        self.refresh_tx
            .send(tx)
            .await
            .map_err(|_| DaemonError::ChannelClosed("poller refresh"))?;
        rx.await
            .map_err(|_| DaemonError::ChannelClosed("poller refresh response"))
    }
}

pub struct Poller {
    handle: PollerHandle,
    cancel_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl Poller {
    /// Start polling. The first poll runs immediately.
    pub fn spawn(source: Arc<dyn QuestSource>, interval: Duration) -> Self {
        let (snapshot_tx, snapshots) = watch::channel(QuestSnapshot::empty(Utc::now()));
        let (refresh_tx, refresh_rx) = mpsc::channel(16);
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let task = tokio::spawn(poll_loop(
            source,
            interval,
            snapshot_tx,
            refresh_rx,
            cancel_rx,
        ));

        Self {
            handle: PollerHandle {
                snapshots,
                refresh_tx,
            },
            cancel_tx,
            task,
        }
    }

    pub fn handle(&self) -> PollerHandle {
        self.handle.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<QuestSnapshot> {
        self.handle.subscribe()
    }

    /// Stop the timer and wait for the poll task to exit. Nothing is published
    /// once this returns.
    pub async fn cancel(self) {
        let _ = self.cancel_tx.send(true);
        if let Err(err) = self.task.await {
            tracing::warn!(error = %err, "poller task join failure");
        }
    }
}

async fn poll_loop(
    source: Arc<dyn QuestSource>,
    interval: Duration,
    snapshot_tx: watch::Sender<QuestSnapshot>,
    mut refresh_rx: mpsc::Receiver<oneshot::Sender<QuestSnapshot>>,
    mut cancel_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        let reply = tokio::select! {
            biased;
            _ = cancel_rx.changed() => break,
            request = refresh_rx.recv() => match request {
                Some(reply) => Some(reply),
                None => break,
            },
            _ = ticker.tick() => None,
        };

        let snapshot = tokio::select! {
            biased;
            _ = cancel_rx.changed() => break,
            snapshot = source.poll() => snapshot,
        };

        tracing::debug!(quests = snapshot.quests.len(), manual = reply.is_some(), "quest snapshot published");
        snapshot_tx.send_replace(snapshot.clone());
        if let Some(reply) = reply {
            let _ = reply.send(snapshot);
        }
    }

    tracing::debug!("poller stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::Duration as ChronoDuration;
    use questsync_core::{Quest, QuestId, TaskKind};
    use tokio::time::{advance, sleep, Instant};

    fn quest(id: &str) -> Quest {
        Quest {
            id: QuestId::from(id),
            quest_name: format!("Quest {id}"),
            application_name: "Some Game".to_string(),
            task_kind: TaskKind::WatchVideo,
            reward_name: "Orb".to_string(),
            reward_image: None,
            seconds_needed: 900,
            seconds_done: 0,
            expires_at: Utc::now() + ChronoDuration::days(1),
            is_enrolled: false,
            is_completed: false,
            is_claimed: false,
        }
    }

    /// Counts polls; each poll takes `latency` of (paused) time.
    struct CountingSource {
        polls: AtomicUsize,
        latency: Duration,
    }

    impl CountingSource {
        fn new(latency: Duration) -> Arc<Self> {
            Arc::new(Self {
                polls: AtomicUsize::new(0),
                latency,
            })
        }

        fn polls(&self) -> usize {
            self.polls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl QuestSource for CountingSource {
        async fn poll(&self) -> QuestSnapshot {
            self.polls.fetch_add(1, Ordering::SeqCst);
            if !self.latency.is_zero() {
                sleep(self.latency).await;
            }
            QuestSnapshot::new(Utc::now(), vec![quest("1")])
        }
    }

    #[tokio::test(start_paused = true)]
    async fn polls_immediately_then_on_every_interval() {
        let source = CountingSource::new(Duration::ZERO);
        let poller = Poller::spawn(source.clone(), Duration::from_secs(5));
        let mut snapshots = poller.subscribe();

        snapshots.changed().await.expect("first publication");
        assert_eq!(source.polls(), 1);
        assert_eq!(snapshots.borrow_and_update().quests.len(), 1);

        let started = Instant::now();
        snapshots.changed().await.expect("second publication");
        assert_eq!(source.polls(), 2);
        assert!(started.elapsed() >= Duration::from_secs(5));

        poller.cancel().await;
    }

    #[tokio::test(start_paused = true)]
    async fn manual_refresh_does_not_wait_for_the_timer() {
        let source = CountingSource::new(Duration::ZERO);
        let poller = Poller::spawn(source.clone(), Duration::from_secs(60));
        let mut snapshots = poller.subscribe();
        snapshots.changed().await.expect("first publication");

        let started = Instant::now();
        let snapshot = poller.handle().refresh().await.expect("refresh");
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(snapshot.quests.len(), 1);
        assert_eq!(source.polls(), 2);

        poller.cancel().await;
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_all_future_firings() {
        let source = CountingSource::new(Duration::ZERO);
        let poller = Poller::spawn(source.clone(), Duration::from_secs(5));
        let handle = poller.handle();
        let mut snapshots = poller.subscribe();
        snapshots.changed().await.expect("first publication");

        poller.cancel().await;
        advance(Duration::from_secs(60)).await;

        assert_eq!(source.polls(), 1);
        assert!(snapshots.changed().await.is_err(), "publisher is gone");
        assert!(handle.refresh().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_in_flight_poll_publishes_nothing() {
        let source = CountingSource::new(Duration::from_secs(2));
        let poller = Poller::spawn(source.clone(), Duration::from_secs(5));
        let snapshots = poller.subscribe();

        while source.polls() == 0 {
            tokio::task::yield_now().await;
        }
        poller.cancel().await;
        advance(Duration::from_secs(10)).await;

        assert!(snapshots.borrow().quests.is_empty());
        assert_eq!(source.polls(), 1);
    }

    #[tokio::test]
    async fn snapshot_source_without_path_is_empty() {
        let snapshot = SnapshotQuestSource::new(None).poll().await;
        assert!(snapshot.quests.is_empty());
    }

    #[tokio::test]
    async fn snapshot_source_tolerates_missing_and_malformed_files() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let missing = SnapshotQuestSource::new(Some(dir.path().join("graph.json")));
        assert!(missing.poll().await.quests.is_empty());

        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{not json").expect("write");
        assert!(SnapshotQuestSource::new(Some(path)).poll().await.quests.is_empty());
    }

    #[tokio::test]
    async fn snapshot_source_reads_quests_from_graph_file() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let path = dir.path().join("graph.json");
        let expires = (Utc::now() + ChronoDuration::days(2)).to_rfc3339();
        let document = serde_json::json!({
            "modules": [{
                "id": "4021",
                "exports": {
                    "Z": {
                        "methods": ["getQuest"],
                        "quests": [{
                            "id": "1300",
                            "config": {
                                "expiresAt": expires,
                                "taskConfig": { "tasks": { "PLAY_ON_DESKTOP": { "target": 900 } } },
                                "messages": { "questName": "Play Some Game" },
                                "application": { "name": "Some Game" }
                            }
                        }]
                    }
                }
            }]
        });
        std::fs::write(&path, document.to_string()).expect("write");

        let snapshot = SnapshotQuestSource::new(Some(path)).poll().await;
        assert_eq!(snapshot.quests.len(), 1);
        assert_eq!(snapshot.quests[0].task_kind, TaskKind::PlayOnDesktop);
        assert_eq!(snapshot.quests[0].reward_name, "Unknown Reward");
    }
}

use std::collections::VecDeque;
use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, watch, RwLock};
use tokio::task::JoinSet;

use questsync_core::{config, Config, DriftPhase, Notice, NoticeLevel, QuestId};
use questsync_sync::{
    ApplyOutcome, CheckOutcome, CommandInstaller, DriftTracker, GitAdapter, ProcessRunner,
};

use crate::actions::ActionGateway;
use crate::error::{io_err, DaemonError};
use crate::log_rotation::{rotate_if_needed, MAX_NOTICE_LOG_BYTES, MAX_ROTATED_FILES};
use crate::paths::{logs_dir, notices_log_path, questsync_root, socket_path};
use crate::poller::{Poller, PollerHandle, SnapshotQuestSource};
use crate::protocol::{DaemonRequest, DaemonResponse};

const RECENT_NOTICES: usize = 20;

/// Log output format for the daemon process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Keeps the last few notices for `status` and appends every notice to
/// `notices.jsonl`, rotating it once it reaches `max_bytes`.
pub struct NoticeBoard {
    path: PathBuf,
    max_bytes: u64,
    max_files: usize,
    recent: RwLock<VecDeque<Notice>>,
}

impl NoticeBoard {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            max_bytes: MAX_NOTICE_LOG_BYTES,
            max_files: MAX_ROTATED_FILES,
            recent: RwLock::new(VecDeque::new()),
        }
    }

    pub fn with_rotation(mut self, max_bytes: u64, max_files: usize) -> Self {
        self.max_bytes = max_bytes;
        self.max_files = max_files;
        self
    }

    pub async fn publish(&self, notice: Notice) {
        match notice.level {
            NoticeLevel::Error => {
                tracing::error!(title = %notice.title, body = %notice.body, "notice")
            }
            NoticeLevel::Info | NoticeLevel::Success => {
                tracing::info!(title = %notice.title, body = %notice.body, "notice")
            }
        }
        match rotate_if_needed(&self.path, self.max_bytes, self.max_files) {
            Ok(true) => tracing::info!(path = %self.path.display(), "notice log rotated"),
            Ok(false) => {}
            Err(err) => {
                tracing::warn!(path = %self.path.display(), error = %err, "notice log rotation failed")
            }
        }
        if let Err(err) = append_json_line(&self.path, &notice).await {
            tracing::warn!(error = %err, "failed to record notice");
        }

        let mut recent = self.recent.write().await;
        if recent.len() == RECENT_NOTICES {
            recent.pop_front();
        }
        recent.push_back(notice);
    }

    pub async fn recent(&self) -> Vec<Notice> {
        self.recent.read().await.iter().cloned().collect()
    }
}

/// Everything a socket command can reach.
struct Services {
    home: PathBuf,
    install_root: Option<PathBuf>,
    poller: PollerHandle,
    tracker: Option<Arc<DriftTracker>>,
    gateway: Arc<ActionGateway>,
    notices: Arc<NoticeBoard>,
    enroll_refresh_delay: Duration,
    started_at_unix: u64,
}

/// Start the daemon runtime and block the current thread until it exits.
pub fn start_blocking(home: &Path, log_format: LogFormat) -> Result<(), DaemonError> {
    init_tracing(log_format);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(home.to_path_buf()))
}

/// Run the daemon runtime: poller, startup update check, socket server.
pub async fn run(home: PathBuf) -> Result<(), DaemonError> {
    ensure_runtime_dirs(&home)?;
    let config = config::load_at(&home)?;
    tracing::info!(
        install_root = ?config.install_root,
        graph_snapshot = ?config.graph_snapshot,
        poll_interval_secs = config.poll_interval().as_secs(),
        "starting questsync daemon",
    );

    let source = Arc::new(SnapshotQuestSource::new(config.graph_snapshot.clone()));
    let poller = Poller::spawn(source, config.poll_interval());
    let tracker = build_tracker(&config);
    if tracker.is_none() {
        tracing::warn!("install_root is not configured; update checks are disabled");
    }

    let services = Arc::new(Services {
        home: home.clone(),
        install_root: config.install_root.clone(),
        poller: poller.handle(),
        tracker: tracker.clone(),
        gateway: Arc::new(ActionGateway::from_config(&config)),
        notices: Arc::new(NoticeBoard::new(notices_log_path(&home))),
        enroll_refresh_delay: config.enroll_refresh_delay(),
        started_at_unix: unix_seconds_now(),
    });

    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    let poller_handle = {
        let mut shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            let _ = shutdown_rx.recv().await;
            poller.cancel().await;
            Ok::<(), DaemonError>(())
        })
    };

    let update_handle = {
        let shutdown = shutdown_tx.clone();
        let shutdown_rx = shutdown_tx.subscribe();
        let tracker = tracker.filter(|_| config.update.check_on_start);
        let notices = services.notices.clone();
        let delay = Duration::from_secs(config.update.notify_delay_secs);
        tokio::spawn(async move {
            let Some(tracker) = tracker else {
                return Ok(());
            };
            let result = startup_check_task(tracker, notices, delay, shutdown_rx).await;
            if result.is_err() {
                let _ = shutdown.send(());
            }
            result
        })
    };

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let shutdown_rx = shutdown_tx.subscribe();
        let services = services.clone();
        tokio::spawn(async move {
            let result = socket_server_task(services, shutdown.clone(), shutdown_rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        let mut shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown_rx.recv() => Ok(()),
                signal = tokio::signal::ctrl_c() => {
                    match signal {
                        Ok(()) => {
                            tracing::info!("received ctrl-c, shutting down daemon");
                            let _ = shutdown.send(());
                            Ok(())
                        }
                        Err(err) => Err(DaemonError::Protocol(format!("ctrl-c handler failed: {err}"))),
                    }
                }
            }
        })
    };

    let (poller_result, update_result, socket_result, signal_result) =
        tokio::join!(poller_handle, update_handle, socket_handle, signal_handle);

    handle_join("poller", poller_result)?;
    handle_join("update_check", update_result)?;
    handle_join("socket_server", socket_result)?;
    handle_join("signal_handler", signal_result)?;
    tracing::info!("questsync daemon stopped");
    Ok(())
}

fn build_tracker(config: &Config) -> Option<Arc<DriftTracker>> {
    let root = config.install_root.clone()?;
    let runner = ProcessRunner::detect();
    let source = GitAdapter::new(runner, &root).with_remote(config.update.remote.clone());
    let installer = CommandInstaller::new(
        runner,
        &root,
        config.update.rebuild_command.clone(),
        config.update.relaunch_command.clone(),
    );
    Some(Arc::new(DriftTracker::new(
        Arc::new(source),
        Arc::new(installer),
    )))
}

/// One update check at startup. An available update is announced after
/// `delay`; failures are announced immediately.
async fn startup_check_task(
    tracker: Arc<DriftTracker>,
    notices: Arc<NoticeBoard>,
    delay: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let outcome = tokio::select! {
        _ = shutdown_rx.recv() => return Ok(()),
        outcome = tracker.check() => outcome,
    };
    let Some(notice) = outcome.notice() else {
        return Ok(());
    };

    if matches!(outcome, CheckOutcome::Outdated(_)) {
        tokio::select! {
            _ = shutdown_rx.recv() => return Ok(()),
            _ = tokio::time::sleep(delay) => {}
        }
        let state = tracker.state();
        if state.phase == DriftPhase::Applying || !state.is_outdated {
            tracing::debug!(phase = ?state.phase, "update handled before announcement");
            return Ok(());
        }
    }
    notices.publish(notice).await;
    Ok(())
}

async fn socket_server_task(
    services: Arc<Services>,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let socket = socket_path(&services.home);
    prepare_socket_for_bind(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;
    tracing::info!(socket = %socket.display(), "control socket listening");

    let (closing_tx, closing_rx) = watch::channel(false);
    let mut clients = JoinSet::new();
    let accepted = loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.recv() => break Ok(()),
            Some(joined) = clients.join_next(), if !clients.is_empty() => {
                log_client_join(joined);
            }
            accepted = listener.accept() => {
                let stream = match accepted {
                    Ok((stream, _)) => stream,
                    Err(err) => break Err(io_err(&socket, err)),
                };
                let services = services.clone();
                let shutdown_tx = shutdown_tx.clone();
                let closing = closing_rx.clone();
                clients.spawn(async move {
                    handle_socket_client(stream, services, shutdown_tx, closing).await
                });
            }
        }
    };

    drop(listener);
    if socket.exists() {
        let _ = fs::remove_file(&socket);
    }

    // Idle connections close now; a request already being served (an apply in
    // particular) runs to completion and gets its reply.
    let _ = closing_tx.send(true);
    if !clients.is_empty() {
        tracing::info!(clients = clients.len(), "waiting for in-flight requests");
    }
    while let Some(joined) = clients.join_next().await {
        log_client_join(joined);
    }
    accepted
}

fn log_client_join(joined: Result<Result<(), DaemonError>, tokio::task::JoinError>) {
    match joined {
        Ok(Ok(())) => {}
        Ok(Err(err)) => tracing::error!(error = %err, "socket client error"),
        Err(err) => tracing::error!(error = %err, "socket client task failed"),
    }
}

async fn handle_socket_client(
    stream: UnixStream,
    services: Arc<Services>,
    shutdown_tx: broadcast::Sender<()>,
    mut closing: watch::Receiver<bool>,
) -> Result<(), DaemonError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    loop {
        let line = tokio::select! {
            biased;
            _ = closing.wait_for(|closing| *closing) => break,
            line = lines.next_line() => line.map_err(|e| io_err("daemon socket read", e))?,
        };
        let Some(line) = line else {
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        let request: DaemonRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(err) => {
                write_response(
                    &mut writer,
                    &DaemonResponse::error(format!("invalid request JSON: {err}")),
                )
                .await?;
                continue;
            }
        };

        let stop = request.cmd == "stop";
        let response = dispatch(&services, request, &shutdown_tx).await;
        write_response(&mut writer, &response).await?;
        if stop {
            break;
        }
    }

    Ok(())
}

async fn dispatch(
    services: &Arc<Services>,
    request: DaemonRequest,
    shutdown_tx: &broadcast::Sender<()>,
) -> DaemonResponse {
    tracing::debug!(cmd = %request.cmd, "control request");
    match request.cmd.as_str() {
        "status" => DaemonResponse::ok(build_status_payload(services).await),
        "quests" => DaemonResponse::ok(json!(services.poller.latest())),
        "refresh" => match services.poller.refresh().await {
            Ok(snapshot) => DaemonResponse::ok(json!(snapshot)),
            Err(err) => DaemonResponse::error(err.to_string()),
        },
        "enroll" => match request.quest_id {
            Some(quest_id) => enroll(services, QuestId::from(quest_id)).await,
            None => DaemonResponse::error("enroll requires quest_id"),
        },
        "check" => match &services.tracker {
            Some(tracker) => check(services, tracker).await,
            None => DaemonResponse::error("install_root is not configured"),
        },
        "apply" => match &services.tracker {
            Some(tracker) => apply(services, tracker, request.relaunch.unwrap_or(false)).await,
            None => DaemonResponse::error("install_root is not configured"),
        },
        "run_script" => match services.gateway.run_remote_script().await {
            Ok(output) => DaemonResponse::ok(json!({ "output": output })),
            Err(err) => {
                services.notices.publish(err.notice()).await;
                DaemonResponse::error(err.to_string())
            }
        },
        "stop" => {
            let _ = shutdown_tx.send(());
            DaemonResponse::ok(json!({ "stopping": true }))
        }
        other => DaemonResponse::error(format!("unknown command '{other}'")),
    }
}

/// Enroll, then re-poll after the configured delay so the registry's new
/// state shows up in the snapshot.
async fn enroll(services: &Arc<Services>, quest_id: QuestId) -> DaemonResponse {
    match services.gateway.enroll(&quest_id).await {
        Ok(()) => {
            let poller = services.poller.clone();
            let delay = services.enroll_refresh_delay;
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if let Err(err) = poller.refresh().await {
                    tracing::warn!(error = %err, "post-enroll refresh failed");
                }
            });
            DaemonResponse::ok(json!({ "quest_id": quest_id, "enrolled": true }))
        }
        Err(err) => {
            services
                .notices
                .publish(Notice::error("Enroll failed", err.to_string()))
                .await;
            DaemonResponse::error(err.to_string())
        }
    }
}

async fn check(services: &Arc<Services>, tracker: &DriftTracker) -> DaemonResponse {
    let outcome = tracker.check().await;
    if let Some(notice) = outcome.notice() {
        services.notices.publish(notice).await;
    }
    match outcome {
        CheckOutcome::UpToDate => DaemonResponse::ok(json!({ "outdated": false, "commits": [] })),
        CheckOutcome::Outdated(commits) => {
            DaemonResponse::ok(json!({ "outdated": true, "commits": commits }))
        }
        CheckOutcome::Failed(failure) => DaemonResponse::error(failure.message),
        CheckOutcome::Busy => {
            DaemonResponse::error("an update check or install is already running")
        }
    }
}

async fn apply(services: &Arc<Services>, tracker: &DriftTracker, relaunch: bool) -> DaemonResponse {
    let outcome = tracker.apply(relaunch).await;
    let notice = outcome.notice();
    services.notices.publish(notice.clone()).await;
    match outcome {
        ApplyOutcome::Applied { relaunched } => {
            DaemonResponse::ok(json!({ "applied": true, "relaunched": relaunched, "message": notice.body }))
        }
        _ => DaemonResponse::error(notice.body),
    }
}

#[derive(Debug, Serialize)]
struct QuestCounts {
    total: usize,
    available: usize,
    enrolled: usize,
    not_enrolled: usize,
}

async fn build_status_payload(services: &Services) -> Value {
    let snapshot = services.poller.latest();
    let counts = QuestCounts {
        total: snapshot.quests.len(),
        available: snapshot.available().count(),
        enrolled: snapshot.enrolled().count(),
        not_enrolled: snapshot.not_enrolled().count(),
    };

    json!({
        "running": true,
        "started_at_unix": services.started_at_unix,
        "socket": socket_path(&services.home).display().to_string(),
        "install_root": services.install_root,
        "sync": services.tracker.as_ref().map(|tracker| tracker.state()),
        "snapshot_taken_at": snapshot.taken_at,
        "quests": counts,
        "recent_notices": services.notices.recent().await,
    })
}

async fn append_json_line(path: &Path, notice: &Notice) -> Result<(), DaemonError> {
    let mut line = serde_json::to_string(notice)?;
    line.push('\n');
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(|e| io_err(path, e))?;
    file.write_all(line.as_bytes())
        .await
        .map_err(|e| io_err(path, e))?;
    Ok(())
}

fn prepare_socket_for_bind(socket: &Path) -> Result<(), DaemonError> {
    if !socket.exists() {
        return Ok(());
    }

    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(DaemonError::Protocol(format!(
                "daemon socket already in use: {}",
                socket.display()
            )));
        }
        Err(err) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale daemon socket before bind",
            );
        }
    }

    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

fn ensure_runtime_dirs(home: &Path) -> Result<(), DaemonError> {
    for dir in [questsync_root(home), logs_dir(home)] {
        if !dir.exists() {
            fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
        }
    }
    Ok(())
}

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &DaemonResponse,
) -> Result<(), DaemonError> {
    let payload = serde_json::to_string(response)?;
    writer
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("daemon socket flush", e))?;
    Ok(())
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Protocol(format!(
            "{task} task join failure: {err}"
        ))),
    }
}

fn unix_seconds_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn init_tracing(format: LogFormat) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt().with_env_filter(filter).with_target(false);
    let _ = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}

#[cfg(unix)]
fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_socket_permissions(_path: &Path) -> Result<(), DaemonError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::Utc;
    use questsync_core::{Commit, QuestSnapshot, RepoIdentity, RevisionResult};
    use questsync_sync::{InstallCollaborator, RevisionSource};
    use tempfile::TempDir;

    use crate::actions::{ActionError, DisabledExecutor, RequestApi};
    use crate::poller::QuestSource;

    struct CountingSource(AtomicUsize);

    #[async_trait]
    impl QuestSource for CountingSource {
        async fn poll(&self) -> QuestSnapshot {
            self.0.fetch_add(1, Ordering::SeqCst);
            QuestSnapshot::empty(Utc::now())
        }
    }

    #[derive(Default)]
    struct FakeApi {
        posts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl RequestApi for FakeApi {
        async fn post_json(&self, path: &str, _body: Value) -> Result<(), ActionError> {
            self.posts.lock().unwrap().push(path.to_string());
            Ok(())
        }

        async fn get_text(&self, url: &str) -> Result<String, ActionError> {
            Err(ActionError::Status {
                url: url.to_string(),
                status: 404,
            })
        }
    }

    struct AheadSource;

    #[async_trait]
    impl RevisionSource for AheadSource {
        async fn repo_identity(&self) -> RevisionResult<RepoIdentity> {
            Ok(RepoIdentity {
                normalized_remote_url: "https://github.com/org/repo".to_string(),
                local_revision_hash: "abc1234".to_string(),
            })
        }

        async fn new_commits(&self) -> RevisionResult<Vec<Commit>> {
            Ok(vec![Commit {
                short_hash: "def5678".to_string(),
                full_hash: "def5678900".to_string(),
                author: "Alice".to_string(),
                message: "feat: faster polling".to_string(),
            }])
        }

        async fn pull(&self) -> RevisionResult<()> {
            Ok(())
        }
    }

    struct NoopInstaller;

    #[async_trait]
    impl InstallCollaborator for NoopInstaller {
        async fn rebuild(&self) -> RevisionResult<()> {
            Ok(())
        }

        async fn relaunch(&self) -> RevisionResult<()> {
            Ok(())
        }
    }

    /// Ahead of upstream, with a pull that takes a while to land.
    struct SlowPullSource {
        pulled: Arc<AtomicBool>,
    }

    #[async_trait]
    impl RevisionSource for SlowPullSource {
        async fn repo_identity(&self) -> RevisionResult<RepoIdentity> {
            AheadSource.repo_identity().await
        }

        async fn new_commits(&self) -> RevisionResult<Vec<Commit>> {
            AheadSource.new_commits().await
        }

        async fn pull(&self) -> RevisionResult<()> {
            tokio::time::sleep(Duration::from_millis(500)).await;
            self.pulled.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    struct RecordingInstaller {
        rebuilt: Arc<AtomicBool>,
    }

    #[async_trait]
    impl InstallCollaborator for RecordingInstaller {
        async fn rebuild(&self) -> RevisionResult<()> {
            self.rebuilt.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn relaunch(&self) -> RevisionResult<()> {
            Ok(())
        }
    }

    struct Fixture {
        _home: TempDir,
        services: Arc<Services>,
        source: Arc<CountingSource>,
        api: Arc<FakeApi>,
        _poller: Poller,
    }

    fn fixture(with_tracker: bool) -> Fixture {
        fixture_with(with_tracker.then(|| {
            Arc::new(DriftTracker::new(Arc::new(AheadSource), Arc::new(NoopInstaller)))
        }))
    }

    fn fixture_with(tracker: Option<Arc<DriftTracker>>) -> Fixture {
        let home = TempDir::new().expect("home");
        ensure_runtime_dirs(home.path()).expect("dirs");
        let source = Arc::new(CountingSource(AtomicUsize::new(0)));
        let poller = Poller::spawn(source.clone(), Duration::from_secs(3600));
        let api = Arc::new(FakeApi::default());
        let services = Arc::new(Services {
            home: home.path().to_path_buf(),
            install_root: None,
            poller: poller.handle(),
            tracker,
            gateway: Arc::new(ActionGateway::new(
                api.clone(),
                Arc::new(DisabledExecutor),
                "https://example.test/script.md",
            )),
            notices: Arc::new(NoticeBoard::new(notices_log_path(home.path()))),
            enroll_refresh_delay: Duration::from_millis(500),
            started_at_unix: 1_000_000,
        });
        Fixture {
            _home: home,
            services,
            source,
            api,
            _poller: poller,
        }
    }

    async fn send(fixture: &Fixture, request: DaemonRequest) -> DaemonResponse {
        let (shutdown_tx, _) = broadcast::channel(1);
        dispatch(&fixture.services, request, &shutdown_tx).await
    }

    #[tokio::test]
    async fn status_without_install_root_has_no_sync_state() {
        let fixture = fixture(false);
        let response = send(&fixture, DaemonRequest::command("status")).await;

        assert!(response.ok);
        let data = response.data.expect("data");
        assert_eq!(data["running"], json!(true));
        assert_eq!(data["started_at_unix"], json!(1_000_000u64));
        assert_eq!(data["sync"], Value::Null);
        assert_eq!(data["quests"]["total"], json!(0));
    }

    #[tokio::test]
    async fn update_commands_require_install_root() {
        let fixture = fixture(false);
        for cmd in ["check", "apply"] {
            let response = send(&fixture, DaemonRequest::command(cmd)).await;
            assert!(!response.ok);
            assert_eq!(response.error.as_deref(), Some("install_root is not configured"));
        }
    }

    #[tokio::test]
    async fn unknown_command_is_rejected() {
        let fixture = fixture(false);
        let response = send(&fixture, DaemonRequest::command("dance")).await;
        assert_eq!(response.error.as_deref(), Some("unknown command 'dance'"));
    }

    #[tokio::test]
    async fn enroll_requires_quest_id() {
        let fixture = fixture(false);
        let response = send(&fixture, DaemonRequest::command("enroll")).await;
        assert_eq!(response.error.as_deref(), Some("enroll requires quest_id"));
        assert!(fixture.api.posts.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn enroll_re_polls_after_refresh_delay() {
        let fixture = fixture(false);
        let mut snapshots = fixture.services.poller.subscribe();
        snapshots.changed().await.expect("initial poll");
        let before = fixture.source.0.load(Ordering::SeqCst);

        let response = send(
            &fixture,
            DaemonRequest {
                quest_id: Some("1300".to_string()),
                ..DaemonRequest::command("enroll")
            },
        )
        .await;
        assert!(response.ok);
        assert_eq!(*fixture.api.posts.lock().unwrap(), vec!["/quests/1300/enroll"]);
        assert_eq!(fixture.source.0.load(Ordering::SeqCst), before);

        snapshots.changed().await.expect("post-enroll poll");
        assert_eq!(fixture.source.0.load(Ordering::SeqCst), before + 1);
    }

    #[tokio::test]
    async fn check_then_apply_reports_commits_and_clears_drift() {
        let fixture = fixture(true);

        let check = send(&fixture, DaemonRequest::command("check")).await;
        assert!(check.ok);
        let data = check.data.expect("data");
        assert_eq!(data["outdated"], json!(true));
        assert_eq!(data["commits"][0]["short_hash"], json!("def5678"));

        let apply = send(
            &fixture,
            DaemonRequest {
                relaunch: Some(false),
                ..DaemonRequest::command("apply")
            },
        )
        .await;
        assert!(apply.ok);
        assert_eq!(apply.data.expect("data")["relaunched"], json!(false));

        let again = send(&fixture, DaemonRequest::command("apply")).await;
        assert!(!again.ok);

        let notices = fixture.services.notices.recent().await;
        assert_eq!(notices.len(), 3);
        assert_eq!(notices[1].title, "Update Success!");
    }

    #[tokio::test]
    async fn script_failure_is_surfaced_as_notice() {
        let fixture = fixture(false);
        let response = send(&fixture, DaemonRequest::command("run_script")).await;
        assert!(!response.ok);

        let notices = fixture.services.notices.recent().await;
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].title, "Script disabled");

        let log = std::fs::read_to_string(notices_log_path(&fixture.services.home)).expect("log");
        assert_eq!(log.lines().count(), 1);
    }

    #[tokio::test]
    async fn stop_broadcasts_shutdown() {
        let fixture = fixture(false);
        let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);
        let response = dispatch(&fixture.services, DaemonRequest::command("stop"), &shutdown_tx).await;
        assert!(response.ok);
        shutdown_rx.recv().await.expect("shutdown signal");
    }

    #[tokio::test(start_paused = true)]
    async fn startup_check_announces_update_after_delay() {
        let home = TempDir::new().expect("home");
        ensure_runtime_dirs(home.path()).expect("dirs");
        let notices = Arc::new(NoticeBoard::new(notices_log_path(home.path())));
        let tracker = Arc::new(DriftTracker::new(Arc::new(AheadSource), Arc::new(NoopInstaller)));
        let (shutdown_tx, _) = broadcast::channel(1);

        let task = tokio::spawn(startup_check_task(
            tracker.clone(),
            notices.clone(),
            Duration::from_secs(3),
            shutdown_tx.subscribe(),
        ));

        let mut states = tracker.subscribe();
        states.wait_for(|s| s.is_outdated).await.expect("outdated");
        assert!(notices.recent().await.is_empty());

        task.await.expect("join").expect("startup check");
        let recent = notices.recent().await;
        assert_eq!(recent.len(), 1);
        assert!(recent[0].body.starts_with("Update available! 1 new commit."));
    }

    #[tokio::test]
    async fn socket_round_trip_status_and_stop() {
        let fixture = fixture(false);
        let home = fixture.services.home.clone();
        let (shutdown_tx, _) = broadcast::channel(4);
        let server = tokio::spawn(socket_server_task(
            fixture.services.clone(),
            shutdown_tx.clone(),
            shutdown_tx.subscribe(),
        ));

        let status = {
            let home = home.clone();
            tokio::task::spawn_blocking(move || crate::protocol::request_status(&home))
                .await
                .expect("join")
                .expect("status")
        };
        assert_eq!(status["running"], json!(true));

        tokio::task::spawn_blocking(move || crate::protocol::request_stop(&home))
            .await
            .expect("join")
            .expect("stop");
        server.await.expect("join").expect("server");
        assert!(!socket_path(&fixture.services.home).exists());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stop_waits_for_apply_in_flight() {
        let pulled = Arc::new(AtomicBool::new(false));
        let rebuilt = Arc::new(AtomicBool::new(false));
        let tracker = Arc::new(DriftTracker::new(
            Arc::new(SlowPullSource {
                pulled: pulled.clone(),
            }),
            Arc::new(RecordingInstaller {
                rebuilt: rebuilt.clone(),
            }),
        ));
        assert!(matches!(tracker.check().await, CheckOutcome::Outdated(_)));

        let fixture = fixture_with(Some(tracker.clone()));
        let home = fixture.services.home.clone();
        let (shutdown_tx, _) = broadcast::channel(4);
        let server = tokio::spawn(socket_server_task(
            fixture.services.clone(),
            shutdown_tx.clone(),
            shutdown_tx.subscribe(),
        ));
        while !socket_path(&home).exists() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let apply = {
            let home = home.clone();
            tokio::task::spawn_blocking(move || crate::protocol::request_apply(&home, false))
        };
        tracker
            .subscribe()
            .wait_for(|s| s.phase == DriftPhase::Applying)
            .await
            .expect("applying");

        let stop_home = home.clone();
        tokio::task::spawn_blocking(move || crate::protocol::request_stop(&stop_home))
            .await
            .expect("join")
            .expect("stop");

        tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .expect("server drains")
            .expect("join")
            .expect("server");

        let reply = apply.await.expect("join").expect("apply reply");
        assert_eq!(reply["applied"], json!(true));
        assert!(pulled.load(Ordering::SeqCst));
        assert!(rebuilt.load(Ordering::SeqCst));
        assert!(!tracker.state().is_outdated);
        assert!(!socket_path(&home).exists());
    }

    #[tokio::test]
    async fn idle_connection_does_not_hold_shutdown() {
        let fixture = fixture(false);
        let home = fixture.services.home.clone();
        let (shutdown_tx, _) = broadcast::channel(4);
        let server = tokio::spawn(socket_server_task(
            fixture.services.clone(),
            shutdown_tx.clone(),
            shutdown_tx.subscribe(),
        ));
        while !socket_path(&home).exists() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let _idle = UnixStream::connect(socket_path(&home)).await.expect("connect");
        tokio::time::sleep(Duration::from_millis(50)).await;
        let _ = shutdown_tx.send(());

        tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .expect("server stops")
            .expect("join")
            .expect("server");
    }

    #[tokio::test(start_paused = true)]
    async fn startup_announcement_is_dropped_once_update_is_applied() {
        let home = TempDir::new().expect("home");
        ensure_runtime_dirs(home.path()).expect("dirs");
        let notices = Arc::new(NoticeBoard::new(notices_log_path(home.path())));
        let tracker = Arc::new(DriftTracker::new(Arc::new(AheadSource), Arc::new(NoopInstaller)));
        let (shutdown_tx, _) = broadcast::channel(1);

        let task = tokio::spawn(startup_check_task(
            tracker.clone(),
            notices.clone(),
            Duration::from_secs(3),
            shutdown_tx.subscribe(),
        ));

        tracker
            .subscribe()
            .wait_for(|s| s.is_outdated)
            .await
            .expect("outdated");
        assert!(tracker.apply(false).await.is_success());

        task.await.expect("join").expect("startup check");
        assert!(notices.recent().await.is_empty());
    }

    #[tokio::test]
    async fn notice_log_is_rotated_at_its_size_limit() {
        let home = TempDir::new().expect("home");
        ensure_runtime_dirs(home.path()).expect("dirs");
        let path = notices_log_path(home.path());
        let notices = NoticeBoard::new(path.clone()).with_rotation(1, 2);

        for n in 0..4 {
            notices.publish(Notice::info("Tick", format!("notice {n}"))).await;
        }

        let live = std::fs::read_to_string(&path).expect("live");
        assert_eq!(live.lines().count(), 1);
        assert!(live.contains("notice 3"));
        let newest_copy =
            std::fs::read_to_string(crate::log_rotation::numbered_path(&path, 1)).expect(".1");
        assert!(newest_copy.contains("notice 2"));
        assert!(crate::log_rotation::numbered_path(&path, 2).exists());
        assert!(!crate::log_rotation::numbered_path(&path, 3).exists());
        assert_eq!(notices.recent().await.len(), 4);
    }
}

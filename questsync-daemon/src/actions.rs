//! Action gateway: quest enrollment and the remote script runner.
//!
//! Enrollment never touches local quest state. The registry owns it, so
//! callers re-poll to observe the effect.
//!
//! Remote scripts are unreviewed code. They only run through an explicit
//! [`ScriptExecutor`]; the default one refuses, and the interpreter-backed one
//! is only installed when `script.allow_execution` is set.

use std::process::Stdio;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::io::AsyncWriteExt;

use questsync_core::config::ApiConfig;
use questsync_core::{Config, Notice, QuestId};

const USER_AGENT: &str = concat!("questsync/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// `location` sent with every enroll request.
pub const ENROLL_LOCATION: u64 = 11;

static SCRIPT_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```js\r?\n(.*?)```").expect("script block regex is valid")
});

#[derive(Debug, Error)]
pub enum ActionError {
    #[error("request to {url} failed with status {status}")]
    Status { url: String, status: u16 },

    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },

    #[error("request task failed: {0}")]
    Join(String),

    #[error("invalid quest id '{0}'")]
    InvalidQuestId(String),
}

/// Remote script failures, one variant per stage.
#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("failed to fetch script: {0}")]
    Fetch(#[source] ActionError),

    #[error("no ```js code block found in the script payload")]
    Extract,

    #[error("script execution failed: {0}")]
    Execute(String),

    #[error("remote script execution is disabled (set script.allow_execution to enable it)")]
    Disabled,
}

impl ScriptError {
    pub fn notice(&self) -> Notice {
        let title = match self {
            ScriptError::Fetch(_) => "Script download failed",
            ScriptError::Extract => "Script not found",
            ScriptError::Execute(_) => "Script failed",
            ScriptError::Disabled => "Script disabled",
        };
        Notice::error(title, self.to_string())
    }
}

/// HTTP surface used by the gateway.
#[async_trait]
pub trait RequestApi: Send + Sync {
    /// POST a JSON body to a path under the API base URL.
    async fn post_json(&self, path: &str, body: Value) -> Result<(), ActionError>;

    /// GET an absolute URL as text.
    async fn get_text(&self, url: &str) -> Result<String, ActionError>;
}

/// [`RequestApi`] over a blocking `ureq` agent, driven from `spawn_blocking`.
#[derive(Clone)]
pub struct UreqApi {
    agent: ureq::Agent,
    base_url: String,
    token: Option<String>,
}

impl UreqApi {
    pub fn new(config: &ApiConfig) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(REQUEST_TIMEOUT).build(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
        }
    }
}

#[async_trait]
impl RequestApi for UreqApi {
    async fn post_json(&self, path: &str, body: Value) -> Result<(), ActionError> {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        let agent = self.agent.clone();
        let token = self.token.clone();

        tokio::task::spawn_blocking(move || {
            let mut request = agent.post(&url).set("User-Agent", USER_AGENT);
            if let Some(token) = &token {
                request = request.set("Authorization", token);
            }
            match request.send_json(body) {
                Ok(_) => Ok(()),
                Err(ureq::Error::Status(status, _)) => Err(ActionError::Status { url, status }),
                Err(err) => Err(ActionError::Transport {
                    message: err.to_string(),
                    url,
                }),
            }
        })
        .await
        .map_err(|err| ActionError::Join(err.to_string()))?
    }

    async fn get_text(&self, url: &str) -> Result<String, ActionError> {
        let url = url.to_string();
        let agent = self.agent.clone();

        tokio::task::spawn_blocking(move || {
            let response = match agent.get(&url).set("User-Agent", USER_AGENT).call() {
                Ok(response) => response,
                Err(ureq::Error::Status(status, _)) => {
                    return Err(ActionError::Status { url, status })
                }
                Err(err) => {
                    return Err(ActionError::Transport {
                        message: err.to_string(),
                        url,
                    })
                }
            };
            response
                .into_string()
                .map_err(|err| ActionError::Transport {
                    message: format!("failed to read body: {err}"),
                    url,
                })
        })
        .await
        .map_err(|err| ActionError::Join(err.to_string()))?
    }
}

/// Runs an extracted script.
#[async_trait]
pub trait ScriptExecutor: Send + Sync {
    /// Whether this executor will run anything at all. Checked before the
    /// script is downloaded.
    fn is_enabled(&self) -> bool {
        true
    }

    /// Run the script; returns captured stdout.
    async fn execute(&self, script: &str) -> Result<String, ScriptError>;
}

/// Refuses every script.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledExecutor;

#[async_trait]
impl ScriptExecutor for DisabledExecutor {
    fn is_enabled(&self) -> bool {
        false
    }

    async fn execute(&self, _script: &str) -> Result<String, ScriptError> {
        Err(ScriptError::Disabled)
    }
}

/// Pipes the script into a configured interpreter process (`node -` by
/// default). The script gets no arguments and no inherited stdin.
#[derive(Debug, Clone)]
pub struct InterpreterExecutor {
    argv: Vec<String>,
}

impl InterpreterExecutor {
    pub fn new(argv: Vec<String>) -> Self {
        Self { argv }
    }
}

#[async_trait]
impl ScriptExecutor for InterpreterExecutor {
    async fn execute(&self, script: &str) -> Result<String, ScriptError> {
        let Some((program, args)) = self.argv.split_first() else {
            return Err(ScriptError::Execute("no interpreter configured".to_string()));
        };

        let mut child = tokio::process::Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| ScriptError::Execute(format!("failed to start `{program}`: {err}")))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(script.as_bytes())
                .await
                .map_err(|err| ScriptError::Execute(format!("failed to send script: {err}")))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|err| ScriptError::Execute(err.to_string()))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(ScriptError::Execute(if stderr.is_empty() {
                format!("`{program}` exited with {}", output.status)
            } else {
                stderr
            }));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// First ```` ```js ```` fenced block in a markdown document, trimmed.
pub fn extract_script_block(markdown: &str) -> Option<&str> {
    SCRIPT_BLOCK
        .captures(markdown)?
        .get(1)
        .map(|block| block.as_str().trim())
}

/// Fixed request body for `POST /quests/{id}/enroll`.
/// Quest ids are snowflakes; anything outside `[A-Za-z0-9_-]` would change
/// the request path.
fn is_path_segment(id: &str) -> bool {
    !id.is_empty()
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

pub fn enroll_body() -> Value {
    json!({
        "location": ENROLL_LOCATION,
        "is_targeted": false,
        "metadata_raw": null,
        "metadata_sealed": null,
    })
}

pub struct ActionGateway {
    api: Arc<dyn RequestApi>,
    executor: Arc<dyn ScriptExecutor>,
    script_url: String,
}

impl ActionGateway {
    pub fn new(
        api: Arc<dyn RequestApi>,
        executor: Arc<dyn ScriptExecutor>,
        script_url: impl Into<String>,
    ) -> Self {
        Self {
            api,
            executor,
            script_url: script_url.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let executor: Arc<dyn ScriptExecutor> = if config.script.allow_execution {
            Arc::new(InterpreterExecutor::new(config.script.interpreter.clone()))
        } else {
            Arc::new(DisabledExecutor)
        };
        Self::new(
            Arc::new(UreqApi::new(&config.api)),
            executor,
            config.script.url.clone(),
        )
    }

    /// One state-changing request. Local state is left alone.
    pub async fn enroll(&self, quest_id: &QuestId) -> Result<(), ActionError> {
        if !is_path_segment(&quest_id.0) {
            tracing::warn!(quest_id = %quest_id, "rejecting malformed quest id");
            return Err(ActionError::InvalidQuestId(quest_id.0.clone()));
        }
        let path = format!("/quests/{quest_id}/enroll");
        match self.api.post_json(&path, enroll_body()).await {
            Ok(()) => {
                tracing::info!(quest_id = %quest_id, "enrolled in quest");
                Ok(())
            }
            Err(err) => {
                tracing::error!(quest_id = %quest_id, error = %err, "enroll request failed");
                Err(err)
            }
        }
    }

    /// Fetch the script document, extract its ```` ```js ```` block, and hand
    /// it to the executor.
    pub async fn run_remote_script(&self) -> Result<String, ScriptError> {
        if !self.executor.is_enabled() {
            tracing::warn!("remote script requested but execution is disabled");
            return Err(ScriptError::Disabled);
        }

        let payload = self
            .api
            .get_text(&self.script_url)
            .await
            .map_err(ScriptError::Fetch)?;
        let script = extract_script_block(&payload).ok_or(ScriptError::Extract)?;
        tracing::info!(url = %self.script_url, bytes = script.len(), "running remote script");

        let output = self.executor.execute(script).await?;
        tracing::info!("remote script finished");
        Ok(output)
    }
}

//! questsync daemon: quest poller, update checks, and a Unix socket control
//! server.

pub mod actions;
mod error;
pub mod log_rotation;
pub mod paths;
pub mod poller;
pub mod protocol;
mod runtime;

pub use actions::{
    enroll_body, extract_script_block, ActionError, ActionGateway, DisabledExecutor,
    InterpreterExecutor, RequestApi, ScriptError, ScriptExecutor, UreqApi,
};
pub use error::DaemonError;
pub use poller::{Poller, PollerHandle, QuestSource, SnapshotQuestSource};
pub use protocol::{
    request_apply, request_check, request_enroll, request_quests, request_refresh,
    request_run_script, request_status, request_stop, send_request, DaemonRequest,
    DaemonResponse,
};
pub use runtime::{run, start_blocking, LogFormat, NoticeBoard};

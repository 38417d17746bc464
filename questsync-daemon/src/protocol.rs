use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::thread::sleep;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{io_err, DaemonError};
use crate::paths::socket_path;

/// JSON newline-delimited request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonRequest {
    pub cmd: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quest_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relaunch: Option<bool>,
}

impl DaemonRequest {
    pub fn command(cmd: &str) -> Self {
        Self {
            cmd: cmd.to_string(),
            ..Self::default()
        }
    }
}

/// JSON newline-delimited response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DaemonResponse {
    pub fn ok(data: Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// Send one JSON request to the daemon socket and return one response.
pub fn send_request(home: &Path, request: &DaemonRequest) -> Result<DaemonResponse, DaemonError> {
    let socket = socket_path(home);
    if !socket.exists() {
        return Err(DaemonError::DaemonNotRunning { socket });
    }

    let mut stream = UnixStream::connect(&socket).map_err(|err| {
        if matches!(
            err.kind(),
            std::io::ErrorKind::NotFound
                | std::io::ErrorKind::ConnectionRefused
                | std::io::ErrorKind::ConnectionReset
        ) {
            DaemonError::DaemonNotRunning {
                socket: socket.clone(),
            }
        } else {
            io_err(&socket, err)
        }
    })?;

    let payload = serde_json::to_string(request)?;
    stream
        .write_all(payload.as_bytes())
        .map_err(|e| io_err(&socket, e))?;
    stream.write_all(b"\n").map_err(|e| io_err(&socket, e))?;
    stream.flush().map_err(|e| io_err(&socket, e))?;

    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    let read = reader
        .read_line(&mut line)
        .map_err(|e| io_err(&socket, e))?;
    if read == 0 {
        return Err(DaemonError::Protocol(
            "daemon closed connection before responding".to_string(),
        ));
    }

    let response: DaemonResponse = serde_json::from_str(line.trim_end())?;
    Ok(response)
}

/// Status with a short retry window, so a daemon that is still binding its
/// socket is not reported as stopped.
pub fn request_status(home: &Path) -> Result<Value, DaemonError> {
    let request = DaemonRequest::command("status");

    let mut last_not_running: Option<DaemonError> = None;
    for attempt in 0..5 {
        match send_request(home, &request) {
            Ok(response) => return response_into_data(response),
            Err(err @ DaemonError::DaemonNotRunning { .. }) => {
                last_not_running = Some(err);
                if attempt < 4 {
                    sleep(Duration::from_millis(100));
                    continue;
                }
            }
            Err(err) => return Err(err),
        }
    }

    Err(last_not_running.unwrap_or_else(|| {
        DaemonError::Protocol("daemon status retry loop exited unexpectedly".to_string())
    }))
}

pub fn request_quests(home: &Path) -> Result<Value, DaemonError> {
    request(home, DaemonRequest::command("quests"))
}

pub fn request_refresh(home: &Path) -> Result<Value, DaemonError> {
    request(home, DaemonRequest::command("refresh"))
}

pub fn request_enroll(home: &Path, quest_id: &str) -> Result<Value, DaemonError> {
    request(
        home,
        DaemonRequest {
            quest_id: Some(quest_id.to_string()),
            ..DaemonRequest::command("enroll")
        },
    )
}

pub fn request_check(home: &Path) -> Result<Value, DaemonError> {
    request(home, DaemonRequest::command("check"))
}

pub fn request_apply(home: &Path, relaunch: bool) -> Result<Value, DaemonError> {
    request(
        home,
        DaemonRequest {
            relaunch: Some(relaunch),
            ..DaemonRequest::command("apply")
        },
    )
}

pub fn request_run_script(home: &Path) -> Result<Value, DaemonError> {
    request(home, DaemonRequest::command("run_script"))
}

pub fn request_stop(home: &Path) -> Result<(), DaemonError> {
    request(home, DaemonRequest::command("stop")).map(|_| ())
}

fn request(home: &Path, request: DaemonRequest) -> Result<Value, DaemonError> {
    response_into_data(send_request(home, &request)?)
}

fn response_into_data(response: DaemonResponse) -> Result<Value, DaemonError> {
    if response.ok {
        Ok(response.data.unwrap_or(Value::Null))
    } else {
        Err(DaemonError::Protocol(
            response
                .error
                .unwrap_or_else(|| "unknown daemon error".to_string()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn optional_fields_are_omitted_on_the_wire() {
        let encoded = serde_json::to_string(&DaemonRequest::command("status")).expect("encode");
        assert_eq!(encoded, r#"{"cmd":"status"}"#);
    }

    #[test]
    fn enroll_and_apply_carry_their_arguments() {
        let enroll: DaemonRequest =
            serde_json::from_str(r#"{"cmd":"enroll","quest_id":"123"}"#).expect("decode");
        assert_eq!(enroll.quest_id.as_deref(), Some("123"));
        assert_eq!(enroll.relaunch, None);

        let apply: DaemonRequest =
            serde_json::from_str(r#"{"cmd":"apply","relaunch":true}"#).expect("decode");
        assert_eq!(apply.relaunch, Some(true));
    }

    #[test]
    fn missing_socket_reports_not_running() {
        let home = tempfile::TempDir::new().expect("home");
        let err = request_check(home.path()).unwrap_err();
        assert!(matches!(err, DaemonError::DaemonNotRunning { .. }));
    }

    #[test]
    fn error_response_becomes_protocol_error() {
        let err = response_into_data(DaemonResponse::error("unknown quest")).unwrap_err();
        assert_eq!(err.to_string(), "daemon protocol error: unknown quest");
    }
}

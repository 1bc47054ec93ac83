use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, warn};

use ocg_core::{OcgError, Result, Schema};

use crate::args::{get_bool, get_i64, get_string};
use crate::registry::Tool;

const LOG_LIMIT_LINES: usize = 10_000;

struct ProcSession {
    pid: Option<u32>,
    command: String,
    stdin: Option<tokio::process::ChildStdin>,
    child: Option<tokio::process::Child>,
    log: Arc<Mutex<Vec<String>>>,
    running: bool,
}

/// The `process` tool: long-running process supervisor seam. The gateway proxies its
/// `/process/*` endpoints straight into this tool.
pub struct ProcessTool {
    sessions: Arc<Mutex<HashMap<String, ProcSession>>>,
    counter: Arc<Mutex<u64>>,
}

impl Default for ProcessTool {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessTool {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
            counter: Arc::new(Mutex::new(0)),
        }
    }

    fn next_session_id(&self) -> String {
        let mut counter = self.counter.lock();
        *counter += 1;
        format!("proc-{}", *counter)
    }

    async fn start(&self, args: &Map<String, Value>) -> Result<Value> {
        let command = get_string(args, "command");
        if command.trim().is_empty() {
            return Err(OcgError::Input("command is required".into()));
        }
        let workdir = get_string(args, "workdir");

        let mut cmd = tokio::process::Command::new("sh");
        cmd.arg("-c")
            .arg(&command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if !workdir.is_empty() {
            cmd.current_dir(&workdir);
        }

        let mut child = cmd.spawn().map_err(|e| OcgError::ToolExecution {
            tool: "process".into(),
            reason: format!("spawn failed: {e}"),
        })?;

        let session_id = self.next_session_id();
        let pid = child.id();
        let log = Arc::new(Mutex::new(Vec::new()));

        if let Some(stdout) = child.stdout.take() {
            spawn_log_pump(stdout, log.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_log_pump(stderr, log.clone());
        }
        let stdin = child.stdin.take();

        debug!(session_id = %session_id, pid = ?pid, command = %command, "process started");
        self.sessions.lock().insert(
            session_id.clone(),
            ProcSession {
                pid,
                command,
                stdin,
                child: Some(child),
                log,
                running: true,
            },
        );

        Ok(serde_json::json!({ "sessionId": session_id, "pid": pid }))
    }

    fn list(&self) -> Value {
        let sessions = self.sessions.lock();
        let items: Vec<Value> = sessions
            .iter()
            .map(|(id, s)| {
                serde_json::json!({
                    "sessionId": id,
                    "pid": s.pid,
                    "command": s.command,
                    "running": s.running,
                })
            })
            .collect();
        serde_json::json!({ "processes": items })
    }

    fn log(&self, args: &Map<String, Value>) -> Result<Value> {
        let session_id = get_string(args, "sessionId");
        let offset = get_i64(args, "offset").max(0) as usize;
        let limit = get_i64(args, "limit").max(0) as usize;

        let sessions = self.sessions.lock();
        let session = sessions
            .get(&session_id)
            .ok_or_else(|| OcgError::Input(format!("unknown session: {session_id}")))?;

        let log = session.log.lock();
        let total = log.len();
        let start = offset.min(total);
        let end = if limit == 0 {
            total
        } else {
            (start + limit).min(total)
        };
        Ok(serde_json::json!({
            "sessionId": session_id,
            "total": total,
            "lines": log[start..end].to_vec(),
        }))
    }

    /// Write to a process's stdin. Empty data is permitted only together
    /// with `eof=true`, which closes the pipe.
    async fn write(&self, args: &Map<String, Value>) -> Result<Value> {
        let session_id = get_string(args, "sessionId");
        let data = get_string(args, "data");
        let eof = get_bool(args, "eof");

        if data.is_empty() && !eof {
            return Err(OcgError::Input(
                "data is required unless eof is set".into(),
            ));
        }

        let stdin = {
            let mut sessions = self.sessions.lock();
            let session = sessions
                .get_mut(&session_id)
                .ok_or_else(|| OcgError::Input(format!("unknown session: {session_id}")))?;
            session.stdin.take()
        };

        let Some(mut stdin) = stdin else {
            return Err(OcgError::Input("stdin already closed".into()));
        };

        if !data.is_empty() {
            stdin
                .write_all(data.as_bytes())
                .await
                .map_err(|e| OcgError::ToolExecution {
                    tool: "process".into(),
                    reason: format!("stdin write failed: {e}"),
                })?;
            let _ = stdin.flush().await;
        }

        if eof {
            drop(stdin);
        } else {
            let mut sessions = self.sessions.lock();
            if let Some(session) = sessions.get_mut(&session_id) {
                session.stdin = Some(stdin);
            }
        }

        Ok(serde_json::json!({
            "sessionId": session_id,
            "written": data.len(),
            "eof": eof,
        }))
    }

    async fn kill(&self, args: &Map<String, Value>) -> Result<Value> {
        let session_id = get_string(args, "sessionId");
        let child = {
            let mut sessions = self.sessions.lock();
            let session = sessions
                .get_mut(&session_id)
                .ok_or_else(|| OcgError::Input(format!("unknown session: {session_id}")))?;
            session.running = false;
            session.stdin = None;
            session.child.take()
        };

        if let Some(mut child) = child {
            if let Err(e) = child.kill().await {
                warn!(session_id = %session_id, error = %e, "kill failed");
            }
        }
        Ok(serde_json::json!({ "sessionId": session_id, "killed": true }))
    }
}

fn spawn_log_pump(
    reader: impl tokio::io::AsyncRead + Unpin + Send + 'static,
    log: Arc<Mutex<Vec<String>>>,
) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let mut log = log.lock();
            if log.len() >= LOG_LIMIT_LINES {
                log.remove(0);
            }
            log.push(line);
        }
    });
}

#[async_trait]
impl Tool for ProcessTool {
    fn name(&self) -> &str {
        "process"
    }

    fn description(&self) -> &str {
        "Manage long-running processes: start, list, log, write (stdin), kill."
    }

    fn parameters(&self) -> Schema {
        Schema::object(
            [
                (
                    "action",
                    Schema::string("One of: start, list, log, write, kill"),
                ),
                ("command", Schema::string("Command line (for start)")),
                ("workdir", Schema::string("Working directory (for start)")),
                ("sessionId", Schema::string("Process session id")),
                ("data", Schema::string("Data to write to stdin")),
                (
                    "eof",
                    Schema::boolean("Close stdin after writing")
                        .with_default(serde_json::json!(false)),
                ),
                ("offset", Schema::integer("Log line offset")),
                ("limit", Schema::integer("Max log lines")),
            ],
            ["action"],
        )
    }

    async fn execute(&self, args: &Map<String, Value>) -> Result<Value> {
        match get_string(args, "action").as_str() {
            "start" => self.start(args).await,
            "list" => Ok(self.list()),
            "log" => self.log(args),
            "write" => self.write(args).await,
            "kill" => self.kill(args).await,
            other => Err(OcgError::Input(format!("unknown action: {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::parse_args;

    #[tokio::test]
    async fn start_log_kill_lifecycle() {
        let tool = ProcessTool::new();
        let result = tool
            .execute(&parse_args(r#"{"action":"start","command":"echo hello"}"#))
            .await
            .unwrap();
        let session_id = result["sessionId"].as_str().unwrap().to_string();

        // Let the log pump drain the output.
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;

        let log = tool
            .execute(&parse_args(&format!(
                r#"{{"action":"log","sessionId":"{session_id}"}}"#
            )))
            .await
            .unwrap();
        assert_eq!(log["lines"][0], "hello");

        let killed = tool
            .execute(&parse_args(&format!(
                r#"{{"action":"kill","sessionId":"{session_id}"}}"#
            )))
            .await
            .unwrap();
        assert_eq!(killed["killed"], true);
    }

    #[tokio::test]
    async fn write_requires_data_unless_eof() {
        let tool = ProcessTool::new();
        let result = tool
            .execute(&parse_args(r#"{"action":"start","command":"cat"}"#))
            .await
            .unwrap();
        let session_id = result["sessionId"].as_str().unwrap().to_string();

        // Empty data without eof is rejected.
        let err = tool
            .execute(&parse_args(&format!(
                r#"{{"action":"write","sessionId":"{session_id}","data":""}}"#
            )))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("data is required"));

        // Data then empty-with-eof both succeed.
        tool.execute(&parse_args(&format!(
            r#"{{"action":"write","sessionId":"{session_id}","data":"ping\n"}}"#
        )))
        .await
        .unwrap();
        tool.execute(&parse_args(&format!(
            r#"{{"action":"write","sessionId":"{session_id}","data":"","eof":true}}"#
        )))
        .await
        .unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        let log = tool
            .execute(&parse_args(&format!(
                r#"{{"action":"log","sessionId":"{session_id}"}}"#
            )))
            .await
            .unwrap();
        assert_eq!(log["lines"][0], "ping");
    }

    #[tokio::test]
    async fn unknown_action_and_session_are_input_errors() {
        let tool = ProcessTool::new();
        assert!(tool
            .execute(&parse_args(r#"{"action":"dance"}"#))
            .await
            .is_err());
        assert!(tool
            .execute(&parse_args(r#"{"action":"log","sessionId":"nope"}"#))
            .await
            .is_err());
    }
}

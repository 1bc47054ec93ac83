use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::debug;

use ocg_core::{OcgError, Result, Schema};

use crate::args::{get_i64, get_string, truncate};
use crate::registry::Tool;

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const OUTPUT_LIMIT_BYTES: usize = 64 * 1024;

/// The `exec` tool: run a shell command and capture its output.
pub struct ExecTool;

#[async_trait]
impl Tool for ExecTool {
    fn name(&self) -> &str {
        "exec"
    }

    fn description(&self) -> &str {
        "Run a shell command and return stdout, stderr, and the exit code."
    }

    fn parameters(&self) -> Schema {
        Schema::object(
            [
                ("command", Schema::string("Shell command to run")),
                ("workdir", Schema::string("Working directory (optional)")),
                (
                    "timeoutSeconds",
                    Schema::integer("Kill the command after this many seconds (default 30)"),
                ),
            ],
            ["command"],
        )
    }

    async fn execute(&self, args: &Map<String, Value>) -> Result<Value> {
        let command = get_string(args, "command");
        if command.trim().is_empty() {
            return Err(OcgError::Input("command is required".into()));
        }
        let workdir = get_string(args, "workdir");
        let timeout_secs = match get_i64(args, "timeoutSeconds") {
            n if n > 0 => n as u64,
            _ => DEFAULT_TIMEOUT_SECS,
        };

        debug!(command = %command, "exec");

        let mut cmd = tokio::process::Command::new("sh");
        cmd.arg("-c").arg(&command);
        if !workdir.is_empty() {
            cmd.current_dir(&workdir);
        }
        cmd.kill_on_drop(true);

        let output = tokio::time::timeout(
            std::time::Duration::from_secs(timeout_secs),
            cmd.output(),
        )
        .await
        .map_err(|_| {
            OcgError::ToolExecution {
                tool: "exec".into(),
                reason: format!("command timed out after {timeout_secs}s"),
            }
        })?
        .map_err(|e| OcgError::ToolExecution {
            tool: "exec".into(),
            reason: e.to_string(),
        })?;

        Ok(serde_json::json!({
            "command": command,
            "exitCode": output.status.code().unwrap_or(-1),
            "stdout": truncate(&String::from_utf8_lossy(&output.stdout), OUTPUT_LIMIT_BYTES),
            "stderr": truncate(&String::from_utf8_lossy(&output.stderr), OUTPUT_LIMIT_BYTES),
        }))
    }
}

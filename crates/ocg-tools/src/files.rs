use async_trait::async_trait;
use serde_json::{Map, Value};

use ocg_core::{OcgError, Result, Schema};

use crate::args::{get_bool, get_i64, get_string, truncate};
use crate::registry::Tool;

const READ_LIMIT_BYTES: usize = 256 * 1024;

fn input_err(msg: impl Into<String>) -> OcgError {
    OcgError::Input(msg.into())
}

/// The `read` tool: read a file, truncated to a sane size.
pub struct ReadTool;

#[async_trait]
impl Tool for ReadTool {
    fn name(&self) -> &str {
        "read"
    }

    fn description(&self) -> &str {
        "Read a text file and return its content."
    }

    fn parameters(&self) -> Schema {
        Schema::object(
            [
                ("path", Schema::string("File path")),
                (
                    "maxBytes",
                    Schema::integer("Truncate content after this many bytes"),
                ),
            ],
            ["path"],
        )
    }

    async fn execute(&self, args: &Map<String, Value>) -> Result<Value> {
        let path = get_string(args, "path");
        if path.is_empty() {
            return Err(input_err("path is required"));
        }
        let max_bytes = match get_i64(args, "maxBytes") {
            n if n > 0 => n as usize,
            _ => READ_LIMIT_BYTES,
        };

        let meta = tokio::fs::metadata(&path)
            .await
            .map_err(|e| input_err(format!("cannot access file: {e}")))?;
        if meta.is_dir() {
            return Err(input_err("path is a directory"));
        }

        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| input_err(format!("read failed: {e}")))?;
        let size = content.len();
        Ok(serde_json::json!({
            "path": path,
            "size": size,
            "content": truncate(&content, max_bytes),
        }))
    }
}

/// The `write` tool: create or overwrite a file.
pub struct WriteTool;

#[async_trait]
impl Tool for WriteTool {
    fn name(&self) -> &str {
        "write"
    }

    fn description(&self) -> &str {
        "Write content to a file, creating parent directories as needed."
    }

    fn parameters(&self) -> Schema {
        Schema::object(
            [
                ("path", Schema::string("File path")),
                ("content", Schema::string("Content to write")),
                (
                    "append",
                    Schema::boolean("Append instead of overwrite")
                        .with_default(serde_json::json!(false)),
                ),
            ],
            ["path", "content"],
        )
    }

    async fn execute(&self, args: &Map<String, Value>) -> Result<Value> {
        let path = get_string(args, "path");
        if path.is_empty() {
            return Err(input_err("path is required"));
        }
        let content = get_string(args, "content");
        let append = get_bool(args, "append");

        if let Some(parent) = std::path::Path::new(&path).parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| input_err(format!("mkdir failed: {e}")))?;
            }
        }

        if append {
            use tokio::io::AsyncWriteExt;
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await
                .map_err(|e| input_err(format!("open failed: {e}")))?;
            file.write_all(content.as_bytes())
                .await
                .map_err(|e| input_err(format!("write failed: {e}")))?;
        } else {
            tokio::fs::write(&path, &content)
                .await
                .map_err(|e| input_err(format!("write failed: {e}")))?;
        }

        Ok(serde_json::json!({
            "path": path,
            "bytes": content.len(),
            "appended": append,
        }))
    }
}

/// The `edit` tool: precise in-file replacement. `oldText` must match exactly once.
pub struct EditTool;

#[async_trait]
impl Tool for EditTool {
    fn name(&self) -> &str {
        "edit"
    }

    fn description(&self) -> &str {
        "Precisely replace a text snippet. oldText must match exactly and appear only once."
    }

    fn parameters(&self) -> Schema {
        Schema::object(
            [
                ("path", Schema::string("File path")),
                (
                    "oldText",
                    Schema::string("Exact text to replace (must match once)"),
                ),
                ("newText", Schema::string("Replacement text")),
            ],
            ["path", "oldText", "newText"],
        )
    }

    async fn execute(&self, args: &Map<String, Value>) -> Result<Value> {
        let path = get_string(args, "path");
        let old_text = get_string(args, "oldText");
        // Empty newText is allowed: that is a deletion.
        let new_text = get_string(args, "newText");

        if path.is_empty() {
            return Err(input_err("path is required"));
        }
        if old_text.is_empty() {
            return Err(input_err("oldText is required"));
        }

        let meta = tokio::fs::metadata(&path)
            .await
            .map_err(|_| input_err(format!("file not found: {path}")))?;
        if meta.is_dir() {
            return Err(input_err("path is a directory"));
        }

        let original = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| input_err(format!("read failed: {e}")))?;

        match original.matches(&old_text).count() {
            0 => Err(input_err("oldText not found")),
            1 => {
                let modified = original.replacen(&old_text, &new_text, 1);
                tokio::fs::write(&path, modified)
                    .await
                    .map_err(|e| input_err(format!("write failed: {e}")))?;
                Ok(serde_json::json!({
                    "path": path,
                    "changed": true,
                    "match_info": "replaced 1 occurrence",
                }))
            }
            n => Err(input_err(format!(
                "oldText appears {n} times; specify more precisely"
            ))),
        }
    }
}

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::debug;

use ocg_core::{OcgError, Result, Schema};
use ocg_memory::{MemoryResult, VectorMemoryStore};

use crate::args::{get_f64, get_i64, get_string, truncate};
use crate::registry::Tool;

fn format_epoch(secs: i64) -> String {
    chrono::DateTime::from_timestamp(secs, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_default()
}

fn items_json(results: &[MemoryResult]) -> Vec<Value> {
    results
        .iter()
        .map(|r| {
            serde_json::json!({
                "id": r.entry.id,
                "text": r.entry.text,
                "category": r.entry.category,
                "importance": r.entry.importance,
                "score": format!("{:.4}", r.score),
                "matched": r.matched,
                "source": r.entry.source,
                "createdAt": format_epoch(r.entry.created_at),
                "updatedAt": format_epoch(r.entry.updated_at),
            })
        })
        .collect()
}

/// The `memory_search` tool: vector search over long-term memory.
pub struct MemorySearchTool {
    store: Arc<VectorMemoryStore>,
}

impl MemorySearchTool {
    pub fn new(store: Arc<VectorMemoryStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for MemorySearchTool {
    fn name(&self) -> &str {
        "memory_search"
    }

    fn description(&self) -> &str {
        "Search long-term memory (vector search) and return similarity scores."
    }

    fn parameters(&self) -> Schema {
        Schema::object(
            [
                ("query", Schema::string("Search query keywords")),
                (
                    "category",
                    Schema::string(
                        "Optional category filter (preference/decision/fact/entity/other)",
                    ),
                ),
                (
                    "limit",
                    Schema::integer("Max results (default 5)").with_default(serde_json::json!(5)),
                ),
                (
                    "minScore",
                    Schema::number("Min similarity 0-1 (default 0.7)")
                        .with_default(serde_json::json!(0.7)),
                ),
            ],
            ["query"],
        )
    }

    async fn execute(&self, args: &Map<String, Value>) -> Result<Value> {
        let query = get_string(args, "query");
        if query.is_empty() {
            return Err(OcgError::Input("query is required".into()));
        }
        let category = get_string(args, "category");
        let limit = match get_i64(args, "limit") {
            n if n > 0 => n as usize,
            _ => 5,
        };
        let min_score = match get_f64(args, "minScore") {
            f if f > 0.0 => f as f32,
            _ => 0.7,
        };

        let mut results = self.store.search(&query, limit, min_score).await?;
        if !category.is_empty() {
            results.retain(|r| r.entry.category == category);
        }

        if results.is_empty() {
            return Ok(serde_json::json!({
                "query": query,
                "count": 0,
                "result": "No relevant memories found.",
            }));
        }

        let mut text = format!("Found {} related memories (similarity):\n\n", results.len());
        for (i, r) in results.iter().enumerate() {
            text.push_str(&format!(
                "{}. [{}] {} (similarity {}%)\n",
                i + 1,
                r.entry.category,
                r.entry.text,
                (r.score * 100.0) as i32,
            ));
        }

        Ok(serde_json::json!({
            "query": query,
            "count": results.len(),
            "items": items_json(&results),
            "result": text,
        }))
    }
}

/// The `memory_get` tool: fetch one memory entry by id.
pub struct MemoryGetTool {
    store: Arc<VectorMemoryStore>,
}

impl MemoryGetTool {
    pub fn new(store: Arc<VectorMemoryStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for MemoryGetTool {
    fn name(&self) -> &str {
        "memory_get"
    }

    fn description(&self) -> &str {
        "Get details of a single memory."
    }

    fn parameters(&self) -> Schema {
        Schema::object([("path", Schema::string("Memory ID"))], ["path"])
    }

    async fn execute(&self, args: &Map<String, Value>) -> Result<Value> {
        let id = get_string(args, "path");
        if id.is_empty() {
            return Err(OcgError::Input("path is required".into()));
        }
        let entry = self.store.get(&id)?;
        Ok(serde_json::json!({
            "id": entry.id,
            "text": entry.text,
            "category": entry.category,
            "importance": entry.importance,
            "source": entry.source,
            "createdAt": format_epoch(entry.created_at),
            "updatedAt": format_epoch(entry.updated_at),
        }))
    }
}

/// The `memory_store` tool: write to long-term memory with duplicate detection.
pub struct MemoryStoreTool {
    store: Arc<VectorMemoryStore>,
}

impl MemoryStoreTool {
    pub fn new(store: Arc<VectorMemoryStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for MemoryStoreTool {
    fn name(&self) -> &str {
        "memory_store"
    }

    fn description(&self) -> &str {
        "Store important info into long-term memory (vector store)."
    }

    fn parameters(&self) -> Schema {
        Schema::object(
            [
                ("text", Schema::string("Content to memorize")),
                (
                    "category",
                    Schema::string("Category: preference/decision/fact/entity/other")
                        .with_default(serde_json::json!("other")),
                ),
                (
                    "importance",
                    Schema::number("Importance 0-1").with_default(serde_json::json!(0.7)),
                ),
            ],
            ["text"],
        )
    }

    async fn execute(&self, args: &Map<String, Value>) -> Result<Value> {
        let text = get_string(args, "text");
        if text.is_empty() {
            return Err(OcgError::Input("text is required".into()));
        }
        let category = match get_string(args, "category") {
            c if c.is_empty() => "other".to_string(),
            c => c,
        };
        let importance = match get_f64(args, "importance") {
            f if f > 0.0 => f,
            _ => 0.7,
        };

        // Anything already matching at ≥0.95 similarity counts as the same
        // memory; report it instead of inserting.
        let near = self.store.search(&text, 3, 0.95).await.unwrap_or_default();
        if let Some(existing) = near.first() {
            debug!(id = %existing.entry.id, "duplicate memory detected");
            return Ok(serde_json::json!({
                "action": "duplicate",
                "id": existing.entry.id,
                "result": "Similar memory already exists",
            }));
        }

        let id = self.store.store(&text, &category, importance).await?;
        Ok(serde_json::json!({
            "action": "created",
            "id": id,
            "result": format!("Stored: {}", truncate(&text, 50)),
        }))
    }
}

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use ocg_core::tool::ToolSpec;
use ocg_core::{OcgError, Result, Schema};

/// A callable tool exposed to the model.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    /// Human-readable description for the LLM.
    fn description(&self) -> &str;

    /// JSON-schema of the parameters object.
    fn parameters(&self) -> Schema;

    async fn execute(&self, args: &Map<String, Value>) -> Result<Value>;
}

/// Name→tool mapping. Cheap to clone; shared behind one RwLock.
#[derive(Clone, Default)]
pub struct Registry {
    tools: Arc<RwLock<HashMap<String, Arc<dyn Tool>>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.write().insert(name.clone(), tool);
        debug!(tool = %name, "tool registered");
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.read().get(name).cloned()
    }

    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.read().is_empty()
    }

    /// Invoke a tool with parsed arguments. Returns the tool's raw result or
    /// its error; the registry never retries.
    pub async fn call(&self, name: &str, args: &Map<String, Value>) -> Result<Value> {
        let tool = self
            .get(name)
            .ok_or_else(|| OcgError::ToolNotFound(name.to_string()))?;

        debug!(tool = name, "calling tool");
        match tool.execute(args).await {
            Ok(result) => {
                debug!(tool = name, "tool succeeded");
                Ok(result)
            }
            Err(e) => {
                warn!(tool = name, error = %e, "tool failed");
                Err(e)
            }
        }
    }

    /// OpenAI-format specs for every registered tool, name-sorted so the
    /// export is stable.
    pub fn specs(&self) -> Vec<ToolSpec> {
        let tools = self.tools.read();
        let mut entries: Vec<&Arc<dyn Tool>> = tools.values().collect();
        entries.sort_by(|a, b| a.name().cmp(b.name()));
        entries
            .into_iter()
            .map(|t| ToolSpec::new(t.name(), t.description(), t.parameters()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echo the input back."
        }

        fn parameters(&self) -> Schema {
            Schema::object([("text", Schema::string("Text to echo"))], ["text"])
        }

        async fn execute(&self, args: &Map<String, Value>) -> Result<Value> {
            Ok(serde_json::json!({ "echo": args.get("text") }))
        }
    }

    #[tokio::test]
    async fn register_and_call() {
        let registry = Registry::new();
        registry.register(Arc::new(EchoTool));
        assert_eq!(registry.list(), vec!["echo"]);

        let args = crate::args::parse_args(r#"{"text":"hi"}"#);
        let result = registry.call("echo", &args).await.unwrap();
        assert_eq!(result["echo"], "hi");
    }

    #[tokio::test]
    async fn unknown_tool_is_an_error() {
        let registry = Registry::new();
        let err = registry
            .call("nope", &Map::new())
            .await
            .unwrap_err();
        assert!(matches!(err, OcgError::ToolNotFound(_)));
    }

    #[test]
    fn specs_are_openai_shaped() {
        let registry = Registry::new();
        registry.register(Arc::new(EchoTool));
        let specs = registry.specs();
        assert_eq!(specs.len(), 1);
        let json = serde_json::to_value(&specs[0]).unwrap();
        assert_eq!(json["type"], "function");
        assert_eq!(json["function"]["name"], "echo");
        assert_eq!(json["function"]["parameters"]["type"], "object");
    }
}

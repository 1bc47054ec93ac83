use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use ocg_core::{Result, Schema};

use crate::registry::Tool;

/// Metadata describing a plugin-style tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginInfo {
    pub name: String,
    pub version: String,
    pub description: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

/// The uniform plugin contract the adapter view of the registry exposes.
/// In-process tools are wrapped into this contract; external plugin loading
/// is intentionally not supported here.
#[async_trait]
pub trait ToolPlugin: Send + Sync {
    fn info(&self) -> PluginInfo;

    async fn initialize(&self, config: &Map<String, Value>) -> Result<()>;

    async fn execute(&self, args: &Map<String, Value>) -> Result<Value>;

    async fn shutdown(&self) -> Result<()>;

    async fn health_check(&self) -> Result<()>;
}

/// Wraps any in-process [`Tool`] into the plugin contract.
pub struct InProcessPlugin {
    tool: Arc<dyn Tool>,
    version: String,
}

impl InProcessPlugin {
    pub fn new(tool: Arc<dyn Tool>) -> Self {
        Self {
            tool,
            version: "1.0.0".into(),
        }
    }

    pub fn schema(&self) -> Schema {
        self.tool.parameters()
    }
}

#[async_trait]
impl ToolPlugin for InProcessPlugin {
    fn info(&self) -> PluginInfo {
        PluginInfo {
            name: self.tool.name().to_string(),
            version: self.version.clone(),
            description: self.tool.description().to_string(),
            capabilities: vec!["execute".into()],
        }
    }

    async fn initialize(&self, _config: &Map<String, Value>) -> Result<()> {
        Ok(())
    }

    async fn execute(&self, args: &Map<String, Value>) -> Result<Value> {
        self.tool.execute(args).await
    }

    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

/// Registry of plugins keyed by name.
#[derive(Clone, Default)]
pub struct PluginManager {
    plugins: Arc<RwLock<HashMap<String, Arc<dyn ToolPlugin>>>>,
}

impl PluginManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, plugin: Arc<dyn ToolPlugin>) -> Result<()> {
        let info = plugin.info();
        plugin.initialize(&Map::new()).await?;
        debug!(plugin = %info.name, version = %info.version, "plugin registered");
        self.plugins.write().insert(info.name, plugin);
        Ok(())
    }

    /// Wrap and register every tool of a registry as an in-process plugin.
    pub async fn adopt_registry(&self, registry: &crate::Registry) -> Result<()> {
        for name in registry.list() {
            if let Some(tool) = registry.get(&name) {
                self.register(Arc::new(InProcessPlugin::new(tool))).await?;
            }
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolPlugin>> {
        self.plugins.read().get(name).cloned()
    }

    pub fn list(&self) -> Vec<PluginInfo> {
        let mut infos: Vec<PluginInfo> =
            self.plugins.read().values().map(|p| p.info()).collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    pub async fn execute(&self, name: &str, args: &Map<String, Value>) -> Result<Value> {
        let plugin = self
            .get(name)
            .ok_or_else(|| ocg_core::OcgError::ToolNotFound(name.to_string()))?;
        plugin.execute(args).await
    }

    pub async fn shutdown_all(&self) {
        let plugins: Vec<Arc<dyn ToolPlugin>> =
            self.plugins.write().drain().map(|(_, p)| p).collect();
        for plugin in plugins {
            let _ = plugin.shutdown().await;
        }
    }

    /// Health snapshot: name → error string for unhealthy plugins.
    pub async fn health_check(&self) -> HashMap<String, String> {
        let plugins: Vec<(String, Arc<dyn ToolPlugin>)> = self
            .plugins
            .read()
            .iter()
            .map(|(n, p)| (n.clone(), p.clone()))
            .collect();
        let mut failures = HashMap::new();
        for (name, plugin) in plugins {
            if let Err(e) = plugin.health_check().await {
                failures.insert(name, e.to_string());
            }
        }
        failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::files::EditTool;

    #[tokio::test]
    async fn in_process_plugin_wraps_tool() {
        let manager = PluginManager::new();
        manager
            .register(Arc::new(InProcessPlugin::new(Arc::new(EditTool))))
            .await
            .unwrap();

        let infos = manager.list();
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].name, "edit");
        assert!(manager.health_check().await.is_empty());
        assert!(manager.get("edit").is_some());
        assert!(manager.get("nope").is_none());
    }

    #[tokio::test]
    async fn adopt_registry_mirrors_all_tools() {
        let registry = crate::default_registry();
        let manager = PluginManager::new();
        manager.adopt_registry(&registry).await.unwrap();
        assert_eq!(manager.list().len(), registry.len());
        manager.shutdown_all().await;
        assert!(manager.list().is_empty());
    }
}

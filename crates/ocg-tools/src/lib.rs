//! # ocg-tools
//!
//! The tool layer: a name→tool registry with OpenAI-schema export, the
//! built-in tools (memory, file IO, exec, process supervisor seam, pulse,
//! sessions), the auto-capture heuristics, and the uniform plugin-adapter
//! view of the registry.

pub mod adapter;
pub mod args;
pub mod capture;
pub mod exec;
pub mod files;
pub mod memory_tools;
pub mod process;
pub mod registry;
pub mod runtime_tools;

pub use adapter::{InProcessPlugin, PluginInfo, PluginManager, ToolPlugin};
pub use args::{get_bool, get_f64, get_i64, get_string, parse_args, truncate};
pub use capture::{format_memories_for_context, should_capture};
pub use exec::ExecTool;
pub use files::{EditTool, ReadTool, WriteTool};
pub use memory_tools::{MemoryGetTool, MemorySearchTool, MemoryStoreTool};
pub use process::ProcessTool;
pub use registry::{Registry, Tool};
pub use runtime_tools::{PulseControl, PulseEventTool, PulseStatusTool, SessionLister, SessionsTool};

use std::sync::Arc;

use ocg_memory::VectorMemoryStore;

/// The registry every agent starts from: file IO, exec, and process tools.
pub fn default_registry() -> Registry {
    let registry = Registry::new();
    registry.register(Arc::new(ReadTool));
    registry.register(Arc::new(WriteTool));
    registry.register(Arc::new(EditTool));
    registry.register(Arc::new(ExecTool));
    registry.register(Arc::new(ProcessTool::new()));
    registry
}

/// Default registry plus the vector-memory tools.
pub fn memory_registry(store: Arc<VectorMemoryStore>) -> Registry {
    let registry = default_registry();
    registry.register(Arc::new(MemorySearchTool::new(store.clone())));
    registry.register(Arc::new(MemoryGetTool::new(store.clone())));
    registry.register(Arc::new(MemoryStoreTool::new(store)));
    registry
}

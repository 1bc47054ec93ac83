//! # ocg-agent
//!
//! The back-end agent process internals: the chat pipeline (persist, capture,
//! flush, compact, recall, model call, tool chain), the pulse scheduler, the
//! session manager, and the RPC service facade the gateway talks to.

pub mod agent;
pub mod pulse;
pub mod service;
pub mod session;

pub use agent::{detect_edit_intent, parse_custom_tool_calls, Agent, AgentConfig, MAIN_SESSION};
pub use pulse::{
    ProcessedEvent, PulseBroadcast, PulseConfig, PulseHandler, PulseLlm, PulseObserver,
};
pub use service::AgentRpcService;
pub use session::{Session, SessionInfo, SessionListAdapter, SessionManager};

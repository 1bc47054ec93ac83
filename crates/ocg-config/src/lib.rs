//! # ocg-config
//!
//! Runtime configuration for the OCG processes. Settings come from three
//! layers, lowest precedence first: the `env.config` KEY=VALUE file, process
//! environment variables, and (for the LLM section) the `config` table inside
//! the database. The database layer wins unless `OPENCLAW_FORCE_ENV_CONFIG`
//! is set.

pub mod loader;
pub mod schema;

pub use loader::{read_env_file, sync_env_to_file, EnvFile};
pub use schema::{AgentSettings, GatewaySettings, MemorySettings, Settings};

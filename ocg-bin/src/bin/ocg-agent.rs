//! The back-end agent process: storage, vector memory, tool registry, the
//! agent core with its pulse scheduler, and the Unix-socket RPC server.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info, warn};

use ocg_agent::{Agent, AgentConfig, AgentRpcService, PulseLlm};
use ocg_config::{read_env_file, sync_env_to_file, AgentSettings};
use ocg_core::Message;
use ocg_memory::{DistanceMetric, MemoryConfig, VectorMemoryStore};
use ocg_rpc::RpcServer;
use ocg_storage::Storage;
use ocg_tools::{PulseEventTool, PulseStatusTool, SessionsTool};

const ENV_CONFIG_PATH: &str = "env.config";

/// Normal/low pulse events are analyzed by the agent itself.
struct AgentPulseLlm {
    agent: Arc<Agent>,
}

#[async_trait]
impl PulseLlm for AgentPulseLlm {
    async fn process(&self, input: &str) -> ocg_core::Result<String> {
        Ok(self.agent.chat(vec![Message::user(input)]).await)
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    info!("starting OCG agent");

    // Boot-time sync: environment values are mirrored into env.config so the
    // next start sees them even without the environment.
    sync_env_to_file(
        ENV_CONFIG_PATH,
        &[
            "OPENCLAW_API_KEY",
            "OPENCLAW_BASE_URL",
            "OPENCLAW_MODEL",
            "OPENCLAW_DB_PATH",
            "OPENCLAW_AGENT_SOCK",
            "OPENAI_API_KEY",
            "EMBEDDING_SERVER_URL",
            "EMBEDDING_MODEL",
            "HNSW_PATH",
        ],
    );
    let env_file = read_env_file(ENV_CONFIG_PATH);
    let settings = AgentSettings::resolve(&env_file);

    let storage = match Storage::open(&settings.db_path) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, db_path = %settings.db_path, "storage init failed");
            std::process::exit(1);
        }
    };

    let memory = match VectorMemoryStore::open(
        &settings.db_path,
        MemoryConfig {
            api_key: settings.memory.embedding_api_key.clone(),
            embedding_model: settings.memory.embedding_model.clone(),
            embedding_server: settings.memory.embedding_server_url.clone(),
            hnsw_path: (!settings.memory.hnsw_path.is_empty())
                .then(|| settings.memory.hnsw_path.clone().into()),
            metric: DistanceMetric::Cosine,
            ..MemoryConfig::default()
        },
    )
    .await
    {
        Ok(store) => Some(Arc::new(store)),
        Err(e) => {
            warn!(error = %e, "vector memory init failed, continuing without it");
            None
        }
    };

    let registry = match &memory {
        Some(store) => ocg_tools::memory_registry(store.clone()),
        None => ocg_tools::default_registry(),
    };

    let agent = Agent::new(AgentConfig {
        api_key: settings.api_key.clone(),
        base_url: settings.base_url.clone(),
        model: settings.model.clone(),
        storage: Some(storage.clone()),
        memory,
        registry: Some(registry.clone()),
        auto_recall: settings.auto_recall,
        recall_limit: settings.recall_limit,
        recall_min_score: settings.recall_min_score,
        pulse_enabled: true,
        pulse: None,
    });

    // Runtime tools that need the live agent: pulse queue and session list.
    if let Some(pulse) = agent.pulse() {
        pulse.set_llm(Arc::new(AgentPulseLlm {
            agent: agent.clone(),
        }));
        registry.register(Arc::new(PulseEventTool::new(pulse.clone())));
        registry.register(Arc::new(PulseStatusTool::new(pulse.clone())));
    }
    registry.register(Arc::new(SessionsTool::new(Arc::new(
        ocg_agent::SessionListAdapter {
            manager: agent.sessions().clone(),
        },
    ))));
    agent.refresh_tool_specs();

    let server = match RpcServer::bind(
        &settings.agent_socket,
        Arc::new(AgentRpcService::new(agent.clone())),
    ) {
        Ok(server) => server,
        Err(e) => {
            error!(error = %e, socket = %settings.agent_socket, "rpc listen failed");
            std::process::exit(1);
        }
    };
    info!(socket = %settings.agent_socket, "agent rpc listening");
    tokio::spawn(server.serve());

    if let Ok(stats) = storage.stats() {
        info!(?stats, "storage stats");
    }

    wait_for_shutdown().await;
    info!("agent shutting down");
    if let Some(pulse) = agent.pulse() {
        pulse.stop();
    }
    let _ = std::fs::remove_file(&settings.agent_socket);
}

async fn wait_for_shutdown() {
    let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .expect("install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
}

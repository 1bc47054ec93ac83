//! The front-end gateway process: HTTP/WebSocket surface, cron scheduler,
//! and channel adapters, all bridged onto the agent over the Unix-socket RPC.

use std::sync::Arc;

use tracing::{error, info, warn};

use ocg_channels::{ChannelAdapter, ChannelType, TelegramDriver};
use ocg_config::{read_env_file, GatewaySettings};
use ocg_cron::CronHandler;
use ocg_gateway::{
    AdapterBroadcast, GatewayState, RpcAgentTurnRunner, RpcChannelAgent, RpcSystemEventSink,
};
use ocg_rpc::RpcClient;
use ocg_tools::ProcessTool;

const ENV_CONFIG_PATH: &str = "env.config";
const AGENT_CONNECT_DEADLINE: std::time::Duration = std::time::Duration::from_secs(20);

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    info!("starting OCG gateway");
    let env_file = read_env_file(ENV_CONFIG_PATH);
    let settings = GatewaySettings::resolve(&env_file);
    if settings.ui_auth_token.is_empty() {
        warn!("UI auth token is empty; the API will reject all requests");
    }

    let rpc = match RpcClient::connect_with_deadline(&settings.agent_socket, AGENT_CONNECT_DEADLINE)
        .await
    {
        Ok(client) => Arc::new(client),
        Err(e) => {
            error!(error = %e, socket = %settings.agent_socket, "failed to connect to agent");
            std::process::exit(1);
        }
    };
    info!(socket = %settings.agent_socket, "connected to agent");

    let adapter = Arc::new(ChannelAdapter::new(Arc::new(RpcChannelAgent {
        rpc: rpc.clone(),
    })));

    if !settings.telegram_bot_token.is_empty() {
        let driver = Arc::new(TelegramDriver::new(
            &settings.telegram_bot_token,
            adapter.agent(),
        ));
        match adapter.register_channel(driver) {
            Ok(()) => {
                if let Err(e) = adapter.start_channel(ChannelType::Telegram).await {
                    warn!(error = %e, "failed to start telegram channel");
                } else {
                    info!("telegram channel registered");
                }
            }
            Err(e) => warn!(error = %e, "failed to register telegram channel"),
        }
    } else {
        info!("no TELEGRAM_BOT_TOKEN set, telegram channel disabled");
    }

    let cron_path = std::path::Path::new(&settings.data_dir)
        .join("cron")
        .join("jobs.json");
    let cron = Arc::new(CronHandler::new(cron_path));
    cron.set_system_event_sink(Arc::new(RpcSystemEventSink { rpc: rpc.clone() }));
    cron.set_agent_turn_runner(Arc::new(RpcAgentTurnRunner { rpc: rpc.clone() }));
    cron.set_broadcast(Arc::new(AdapterBroadcast {
        adapter: adapter.clone(),
    }));
    cron.start();

    let state = Arc::new(GatewayState {
        cfg: settings.clone(),
        rpc,
        adapter: adapter.clone(),
        cron: cron.clone(),
        process_tool: Arc::new(ProcessTool::new()),
    });

    let server = tokio::spawn(ocg_gateway::serve(state));
    info!(host = %settings.host, port = settings.port, "gateway up, waiting for messages");

    tokio::select! {
        _ = wait_for_shutdown() => {
            info!("gateway shutting down");
        }
        result = server => {
            match result {
                Ok(Err(e)) => {
                    error!(error = %e, "gateway server failed");
                    std::process::exit(1);
                }
                Err(e) => {
                    error!(error = %e, "gateway server panicked");
                    std::process::exit(1);
                }
                Ok(Ok(())) => {}
            }
        }
    }

    cron.stop();
    adapter.stop_all().await;
}

async fn wait_for_shutdown() {
    let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .expect("install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
}

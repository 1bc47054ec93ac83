//! # ocg-gateway
//!
//! The front-end HTTP/WebSocket gateway: bearer-authenticated API routes that
//! bridge onto the agent RPC, the cron endpoints, process-tool proxies, the
//! public Telegram webhook, and the single-frame chat WebSocket.

pub mod wiring;
pub mod ws;

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use ocg_channels::{ChannelAdapter, ChannelType};
use ocg_config::GatewaySettings;
use ocg_core::Message;
use ocg_cron::{CronHandler, JobSpec};
use ocg_rpc::{MemoryGetArgs, MemorySearchArgs, MemoryStoreArgs, RpcClient};
use ocg_tools::{ProcessTool, Tool};

pub use wiring::{AdapterBroadcast, RpcAgentTurnRunner, RpcChannelAgent, RpcSystemEventSink};

/// Shared gateway state.
pub struct GatewayState {
    pub cfg: GatewaySettings,
    pub rpc: Arc<RpcClient>,
    pub adapter: Arc<ChannelAdapter>,
    pub cron: Arc<CronHandler>,
    pub process_tool: Arc<ProcessTool>,
}

/// Build the router: public webhook + websocket, everything else behind the
/// bearer-token middleware.
pub fn build_router(state: Arc<GatewayState>) -> Router {
    let api = Router::new()
        .route("/v1/chat/completions", post(chat_handler))
        .route("/health", get(health_handler))
        .route("/storage/stats", get(stats_handler))
        .route("/process/start", post(process_start_handler))
        .route("/process/list", get(process_list_handler))
        .route("/process/log", get(process_log_handler))
        .route("/process/write", post(process_write_handler))
        .route("/process/kill", post(process_kill_handler))
        .route("/memory/search", get(memory_search_handler))
        .route("/memory/get", get(memory_get_handler))
        .route("/memory/store", post(memory_store_handler))
        .route("/cron/status", get(cron_status_handler))
        .route("/cron/list", get(cron_list_handler))
        .route("/cron/add", post(cron_add_handler))
        .route("/cron/update", post(cron_update_handler))
        .route("/cron/remove", post(cron_remove_handler))
        .route("/cron/run", post(cron_run_handler))
        .route("/telegram/status", get(telegram_status_handler))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Router::new()
        .route("/telegram/webhook", post(telegram_webhook_handler))
        .route("/ws/chat", get(ws::ws_handler))
        .merge(api)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve the router on the configured host/port.
pub async fn serve(state: Arc<GatewayState>) -> ocg_core::Result<()> {
    let addr = format!("{}:{}", state.cfg.host, state.cfg.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| ocg_core::OcgError::Config(format!("bind {addr} failed: {e}")))?;
    info!(addr = %addr, "gateway listening");
    axum::serve(listener, build_router(state))
        .await
        .map_err(|e| ocg_core::OcgError::Other(e.into()))
}

// ==================== Auth ====================

/// Bearer auth: `Authorization: Bearer …` or `X-OCG-UI-Token`. An empty
/// configured token rejects everything.
async fn auth_middleware(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    request: axum::extract::Request,
    next: Next,
) -> Response {
    let token = state.cfg.ui_auth_token.trim();
    if token.is_empty() {
        return (StatusCode::UNAUTHORIZED, "unauthorized (ui token not set)").into_response();
    }
    if header_token(&headers).as_deref() == Some(token) {
        return next.run(request).await;
    }
    (StatusCode::UNAUTHORIZED, "unauthorized").into_response()
}

pub(crate) fn header_token(headers: &HeaderMap) -> Option<String> {
    if let Some(auth) = headers.get("authorization").and_then(|v| v.to_str().ok()) {
        if auth.to_lowercase().starts_with("bearer ") {
            return Some(auth["Bearer ".len()..].trim().to_string());
        }
    }
    headers
        .get("x-ocg-ui-token")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
}

fn error_response(status: StatusCode, message: String) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

fn rpc_error(e: ocg_core::OcgError) -> Response {
    error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

// ==================== Chat ====================

#[derive(Debug, Deserialize)]
struct ChatRequest {
    #[serde(default)]
    model: String,
    messages: Vec<Message>,
}

async fn chat_handler(
    State(state): State<Arc<GatewayState>>,
    Json(req): Json<ChatRequest>,
) -> Response {
    if let Some(last) = req.messages.last() {
        info!(role = last.role.as_str(), len = last.content.len(), "chat request");
    }

    let prompt_tokens: usize = req.messages.iter().map(|m| m.content.len() / 4).sum();
    let reply = match state.rpc.chat(req.messages).await {
        Ok(reply) => reply,
        Err(e) => return rpc_error(e),
    };
    let completion_tokens = reply.content.len() / 4;

    Json(json!({
        "id": format!("chatcmpl-{}", chrono::Utc::now().timestamp()),
        "object": "chat.completion",
        "created": chrono::Utc::now().timestamp(),
        "model": req.model,
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": reply.content },
            "finish_reason": "stop",
        }],
        "usage": {
            "prompt_tokens": prompt_tokens,
            "completion_tokens": completion_tokens,
            "total_tokens": prompt_tokens + completion_tokens,
        },
    }))
    .into_response()
}

async fn health_handler() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn stats_handler(State(state): State<Arc<GatewayState>>) -> Response {
    match state.rpc.stats().await {
        Ok(reply) => Json(json!({ "status": "ok", "stats": reply.stats })).into_response(),
        Err(e) => rpc_error(e),
    }
}

// ==================== Process proxies ====================

async fn run_process_action(state: &GatewayState, args: Value) -> Response {
    let map = match args {
        Value::Object(map) => map,
        _ => return error_response(StatusCode::BAD_REQUEST, "expected an object".into()),
    };
    match state.process_tool.execute(&map).await {
        Ok(result) => Json(result).into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

async fn process_start_handler(
    State(state): State<Arc<GatewayState>>,
    Json(mut body): Json<Value>,
) -> Response {
    if let Value::Object(map) = &mut body {
        map.insert("action".into(), "start".into());
    }
    run_process_action(&state, body).await
}

async fn process_list_handler(State(state): State<Arc<GatewayState>>) -> Response {
    run_process_action(&state, json!({ "action": "list" })).await
}

#[derive(Debug, Deserialize)]
struct ProcessLogParams {
    #[serde(rename = "sessionId", default)]
    session_id: String,
    #[serde(default)]
    offset: i64,
    #[serde(default)]
    limit: i64,
}

async fn process_log_handler(
    State(state): State<Arc<GatewayState>>,
    Query(params): Query<ProcessLogParams>,
) -> Response {
    run_process_action(
        &state,
        json!({
            "action": "log",
            "sessionId": params.session_id,
            "offset": params.offset,
            "limit": params.limit,
        }),
    )
    .await
}

async fn process_write_handler(
    State(state): State<Arc<GatewayState>>,
    Json(mut body): Json<Value>,
) -> Response {
    if let Value::Object(map) = &mut body {
        map.insert("action".into(), "write".into());
    }
    run_process_action(&state, body).await
}

#[derive(Debug, Deserialize)]
struct ProcessKillParams {
    #[serde(rename = "sessionId", default)]
    session_id: String,
}

async fn process_kill_handler(
    State(state): State<Arc<GatewayState>>,
    Query(params): Query<ProcessKillParams>,
) -> Response {
    run_process_action(
        &state,
        json!({ "action": "kill", "sessionId": params.session_id }),
    )
    .await
}

// ==================== Memory proxies ====================

#[derive(Debug, Deserialize)]
struct MemorySearchParams {
    #[serde(default)]
    query: String,
    #[serde(default)]
    category: String,
    #[serde(default)]
    limit: usize,
    #[serde(rename = "minScore", default)]
    min_score: f64,
}

async fn memory_search_handler(
    State(state): State<Arc<GatewayState>>,
    Query(params): Query<MemorySearchParams>,
) -> Response {
    let reply = state
        .rpc
        .memory_search(MemorySearchArgs {
            query: params.query,
            category: params.category,
            limit: if params.limit > 0 { params.limit } else { 5 },
            min_score: if params.min_score > 0.0 {
                params.min_score
            } else {
                0.7
            },
        })
        .await;
    match reply {
        // The agent's JSON result passes through verbatim.
        Ok(reply) => match serde_json::from_str::<Value>(&reply.result) {
            Ok(value) => Json(value).into_response(),
            Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        },
        Err(e) => rpc_error(e),
    }
}

#[derive(Debug, Deserialize)]
struct MemoryGetParams {
    #[serde(default)]
    path: String,
}

async fn memory_get_handler(
    State(state): State<Arc<GatewayState>>,
    Query(params): Query<MemoryGetParams>,
) -> Response {
    match state.rpc.memory_get(MemoryGetArgs { path: params.path }).await {
        Ok(reply) => match serde_json::from_str::<Value>(&reply.result) {
            Ok(value) => Json(value).into_response(),
            Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        },
        Err(e) => rpc_error(e),
    }
}

#[derive(Debug, Deserialize)]
struct MemoryStoreBody {
    #[serde(default)]
    text: String,
    #[serde(default)]
    category: String,
    #[serde(default)]
    importance: f64,
}

async fn memory_store_handler(
    State(state): State<Arc<GatewayState>>,
    Json(body): Json<MemoryStoreBody>,
) -> Response {
    let reply = state
        .rpc
        .memory_store(MemoryStoreArgs {
            text: body.text,
            category: body.category,
            importance: body.importance,
        })
        .await;
    match reply {
        Ok(reply) => match serde_json::from_str::<Value>(&reply.result) {
            Ok(value) => Json(value).into_response(),
            Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        },
        Err(e) => rpc_error(e),
    }
}

// ==================== Cron ====================

async fn cron_status_handler(State(state): State<Arc<GatewayState>>) -> Json<Value> {
    Json(state.cron.status())
}

async fn cron_list_handler(State(state): State<Arc<GatewayState>>) -> Response {
    Json(state.cron.list_jobs()).into_response()
}

async fn cron_add_handler(
    State(state): State<Arc<GatewayState>>,
    Json(body): Json<Value>,
) -> Response {
    // Accept either a bare job spec or `{ "job": {…} }`.
    let spec_value = body.get("job").cloned().unwrap_or(body);
    let spec: JobSpec = match serde_json::from_value(spec_value) {
        Ok(spec) => spec,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e.to_string()),
    };
    match state.cron.add_job(spec) {
        Ok(job) => Json(job).into_response(),
        Err(e) => error_response(StatusCode::BAD_REQUEST, e.to_string()),
    }
}

fn job_id_from(body: &Value) -> Option<String> {
    body.get("jobId")
        .or_else(|| body.get("id"))
        .and_then(Value::as_str)
        .map(String::from)
}

async fn cron_update_handler(
    State(state): State<Arc<GatewayState>>,
    Json(body): Json<Value>,
) -> Response {
    let Some(job_id) = job_id_from(&body) else {
        return error_response(StatusCode::BAD_REQUEST, "jobId is required".into());
    };
    let Some(patch) = body.get("patch") else {
        return error_response(StatusCode::BAD_REQUEST, "patch is required".into());
    };
    match state.cron.update_job(&job_id, patch) {
        Ok(job) => Json(job).into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

async fn cron_remove_handler(
    State(state): State<Arc<GatewayState>>,
    Json(body): Json<Value>,
) -> Response {
    let Some(job_id) = job_id_from(&body) else {
        return error_response(StatusCode::BAD_REQUEST, "jobId is required".into());
    };
    match state.cron.remove_job(&job_id) {
        Ok(()) => Json(json!({ "ok": true })).into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

async fn cron_run_handler(
    State(state): State<Arc<GatewayState>>,
    Json(body): Json<Value>,
) -> Response {
    let Some(job_id) = job_id_from(&body) else {
        return error_response(StatusCode::BAD_REQUEST, "jobId is required".into());
    };
    match state.cron.run_now(&job_id).await {
        Ok(()) => Json(json!({ "ok": true })).into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

// ==================== Telegram ====================

async fn telegram_webhook_handler(
    State(state): State<Arc<GatewayState>>,
    body: axum::body::Bytes,
) -> Response {
    match state
        .adapter
        .handle_webhook(ChannelType::Telegram, &body)
        .await
    {
        Ok(ack) => Json(ack).into_response(),
        Err(e) => {
            warn!(error = %e, "telegram webhook failed");
            error_response(StatusCode::BAD_REQUEST, e.to_string())
        }
    }
}

async fn telegram_status_handler(State(state): State<Arc<GatewayState>>) -> Response {
    let registered = state.adapter.has_channel(ChannelType::Telegram);
    let info = state.adapter.registry().get(ChannelType::Telegram);
    let failures = state.adapter.health_check().await;
    Json(json!({
        "registered": registered,
        "healthy": registered && !failures.contains_key(&ChannelType::Telegram),
        "info": info,
    }))
    .into_response()
}

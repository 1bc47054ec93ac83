//! WebSocket chat: one `{type:"chat"}` frame in, one `{type:"done"}` frame
//! out per turn (no incremental streaming), plus ping/pong keep-alive.

use std::sync::Arc;

use axum::extract::ws::{Message as WsFrame, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use tracing::{debug, warn};

use ocg_core::Message;

use crate::{header_token, GatewayState};

#[derive(Debug, Deserialize)]
pub(crate) struct WsAuthParams {
    #[serde(default)]
    token: String,
}

/// Incoming/outgoing WebSocket envelope.
#[derive(Debug, Serialize, Deserialize)]
struct WsMessage<'a> {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none", borrow)]
    content: Option<&'a RawValue>,
}

#[derive(Debug, Deserialize)]
struct WsChatRequest {
    #[serde(default)]
    #[allow(dead_code)]
    model: String,
    #[serde(default)]
    messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
struct WsChatResponse {
    content: String,
    finish: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(rename = "totalTokens", skip_serializing_if = "Option::is_none")]
    total_tokens: Option<usize>,
}

pub(crate) async fn ws_handler(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    Query(params): Query<WsAuthParams>,
    upgrade: WebSocketUpgrade,
) -> Response {
    // WebSocket clients may carry the token as a query parameter since
    // browsers cannot set custom headers on the upgrade request.
    let token = state.cfg.ui_auth_token.trim();
    if token.is_empty() {
        return (StatusCode::UNAUTHORIZED, "unauthorized (ui token not set)").into_response();
    }
    let presented = header_token(&headers).unwrap_or_else(|| params.token.clone());
    if presented != token {
        return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
    }

    upgrade.on_upgrade(move |socket| handle_socket(state, socket))
}

async fn handle_socket(state: Arc<GatewayState>, mut socket: WebSocket) {
    debug!("websocket client connected");
    while let Some(frame) = socket.recv().await {
        let frame = match frame {
            Ok(WsFrame::Text(text)) => text.to_string(),
            Ok(WsFrame::Close(_)) | Err(_) => break,
            Ok(_) => continue,
        };

        let parsed: Result<WsMessage<'_>, _> = serde_json::from_str(&frame);
        let message = match parsed {
            Ok(m) => m,
            Err(_) => {
                send_error(&mut socket, "invalid message format").await;
                continue;
            }
        };

        match message.kind.as_str() {
            "chat" => {
                let content = message.content.map(|c| c.get().to_string()).unwrap_or_default();
                handle_chat(&state, &mut socket, &content).await;
            }
            "ping" => {
                let _ = send_frame(&mut socket, "pong", serde_json::Value::Null).await;
            }
            other => warn!(kind = other, "unknown websocket message type"),
        }
    }
    debug!("websocket client disconnected");
}

async fn handle_chat(state: &GatewayState, socket: &mut WebSocket, raw_content: &str) {
    // The content is either a request object or a stringified request.
    let request: WsChatRequest = match serde_json::from_str(raw_content) {
        Ok(req) => req,
        Err(_) => match serde_json::from_str::<String>(raw_content)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
        {
            Some(req) => req,
            None => {
                send_error(socket, "invalid request content").await;
                return;
            }
        },
    };

    match state.rpc.chat(request.messages).await {
        Ok(reply) => {
            let total_tokens = reply.content.len() / 4;
            let payload = serde_json::to_value(WsChatResponse {
                content: reply.content,
                finish: true,
                error: None,
                total_tokens: Some(total_tokens),
            })
            .unwrap_or_default();
            let _ = send_frame(socket, "done", payload).await;
        }
        Err(e) => send_error(socket, &format!("chat error: {e}")).await,
    }
}

async fn send_frame(
    socket: &mut WebSocket,
    kind: &str,
    content: serde_json::Value,
) -> Result<(), axum::Error> {
    let frame = serde_json::json!({ "type": kind, "content": content });
    socket
        .send(WsFrame::Text(frame.to_string().into()))
        .await
}

async fn send_error(socket: &mut WebSocket, message: &str) {
    let payload = serde_json::to_value(WsChatResponse {
        content: String::new(),
        finish: true,
        error: Some(message.to_string()),
        total_tokens: None,
    })
    .unwrap_or_default();
    let _ = send_frame(socket, "error", payload).await;
}

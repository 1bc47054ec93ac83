use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use ocg_core::tool::ToolSpec;
use ocg_core::{Message, ToolCall};

/// A single RPC request frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub id: u64,
    /// Case-sensitive method name, e.g. `Chat`.
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

/// A single RPC response frame: exactly one of `result` / `error` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RpcResponse {
    pub fn ok(id: u64, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: u64, error: impl Into<String>) -> Self {
        Self {
            id,
            result: None,
            error: Some(error.into()),
        }
    }
}

// ==================== Method payloads ====================

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChatArgs {
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChatReply {
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolCall>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StatsReply {
    pub stats: HashMap<String, i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MemorySearchArgs {
    pub query: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub category: String,
    #[serde(default, skip_serializing_if = "is_zero_usize")]
    pub limit: usize,
    #[serde(rename = "minScore", default, skip_serializing_if = "is_zero_f64")]
    pub min_score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MemoryGetArgs {
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MemoryStoreArgs {
    pub text: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub category: String,
    #[serde(default, skip_serializing_if = "is_zero_f64")]
    pub importance: f64,
}

/// Memory methods reply with the tool's JSON result as a string, passed
/// through the gateway verbatim.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ToolResultReply {
    pub result: String,
}

fn is_zero_usize(v: &usize) -> bool {
    *v == 0
}

fn is_zero_f64(v: &f64) -> bool {
    *v == 0.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use ocg_core::Role;

    #[test]
    fn request_round_trips() {
        let req = RpcRequest {
            id: 3,
            method: "Chat".into(),
            params: serde_json::to_value(ChatArgs {
                messages: vec![Message::new(Role::User, "hello")],
                tools: vec![],
            })
            .unwrap(),
        };
        let bytes = serde_json::to_vec(&req).unwrap();
        let back: RpcRequest = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(back.method, "Chat");
        let args: ChatArgs = serde_json::from_value(back.params).unwrap();
        assert_eq!(args.messages[0].content, "hello");
    }

    #[test]
    fn response_has_exactly_one_side() {
        let ok = serde_json::to_value(RpcResponse::ok(1, serde_json::json!({"x": 1}))).unwrap();
        assert!(ok.get("error").is_none());
        let err = serde_json::to_value(RpcResponse::err(2, "boom")).unwrap();
        assert!(err.get("result").is_none());
        assert_eq!(err["error"], "boom");
    }

    #[test]
    fn search_args_use_wire_names() {
        let json = serde_json::to_value(MemorySearchArgs {
            query: "q".into(),
            category: String::new(),
            limit: 5,
            min_score: 0.4,
        })
        .unwrap();
        assert_eq!(json["minScore"], 0.4);
        assert!(json.get("category").is_none());
    }
}

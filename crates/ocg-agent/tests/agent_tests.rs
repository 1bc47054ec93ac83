use std::sync::{Arc, Mutex};

use axum::routing::post;
use axum::{Json, Router};
use serde_json::Value;

use ocg_agent::{Agent, AgentConfig, MAIN_SESSION};
use ocg_core::{Message, ToolCall};
use ocg_memory::{MemoryConfig, PlaceholderProvider, VectorMemoryStore};
use ocg_storage::Storage;

/// Spawn a fake OpenAI-compatible endpoint that always answers `reply` and
/// captures every request body.
async fn spawn_llm(reply: Value) -> (String, Arc<Mutex<Vec<Value>>>) {
    let captured: Arc<Mutex<Vec<Value>>> = Arc::new(Mutex::new(Vec::new()));
    let state = captured.clone();
    let app = Router::new().route(
        "/chat/completions",
        post(move |Json(body): Json<Value>| {
            let state = state.clone();
            let reply = reply.clone();
            async move {
                state.lock().unwrap().push(body);
                Json(reply)
            }
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), captured)
}

fn tool_call_reply(name: &str, arguments: &str) -> Value {
    serde_json::json!({
        "id": "chatcmpl-test",
        "object": "chat.completion",
        "choices": [{
            "index": 0,
            "message": {
                "role": "assistant",
                "content": null,
                "tool_calls": [{
                    "id": "call_0",
                    "type": "function",
                    "function": { "name": name, "arguments": arguments },
                }],
            },
            "finish_reason": "tool_calls",
        }],
    })
}

fn text_reply(content: &str) -> Value {
    serde_json::json!({
        "id": "chatcmpl-test",
        "object": "chat.completion",
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": content },
            "finish_reason": "stop",
        }],
    })
}

fn memory_store(dir: &tempfile::TempDir) -> Arc<VectorMemoryStore> {
    Arc::new(
        VectorMemoryStore::open_with_provider(
            dir.path().join("mem.db"),
            MemoryConfig {
                hnsw_enabled: false,
                ..MemoryConfig::default()
            },
            Some(Box::new(PlaceholderProvider::new(64))),
        )
        .unwrap(),
    )
}

#[tokio::test]
async fn tool_chain_terminates_at_depth_two() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("data.txt");
    std::fs::write(&file, "payload").unwrap();

    // The model always asks for another tool call; the chain must stop.
    let arguments = format!(r#"{{"path":{:?}}}"#, file.to_str().unwrap());
    let (base_url, captured) = spawn_llm(tool_call_reply("read", &arguments)).await;

    let agent = Agent::new(AgentConfig {
        api_key: "test-key".into(),
        base_url,
        model: "test-model".into(),
        ..AgentConfig::default()
    });

    let reply = agent.chat(vec![Message::user("read my file")]).await;
    let blob: Value = serde_json::from_str(&reply).expect("final reply is a JSON results blob");
    let results = blob["tool_results"].as_array().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["result"]["success"], true);
    assert_eq!(results[0]["result"]["tool"], "read");

    // chat → model(depth 0→1) → model(1→2) → chain cut: exactly 3 requests.
    assert_eq!(captured.lock().unwrap().len(), 3);
}

#[tokio::test]
async fn caller_initiated_tool_calls_run_without_a_model() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("data.txt");
    std::fs::write(&file, "payload").unwrap();

    // No API key: results come straight back as JSON.
    let agent = Agent::new(AgentConfig::default());
    let mut tail = Message::assistant("");
    tail.tool_calls = vec![ToolCall::new(
        "call_9",
        "read",
        format!(r#"{{"path":{:?}}}"#, file.to_str().unwrap()),
    )];

    let reply = agent.chat(vec![Message::user("go"), tail]).await;
    let blob: Value = serde_json::from_str(&reply).unwrap();
    assert_eq!(blob["tool_results"][0]["id"], "call_9");
    assert_eq!(blob["tool_results"][0]["result"]["success"], true);
}

#[tokio::test]
async fn unknown_tools_return_error_results_not_panics() {
    let agent = Agent::new(AgentConfig::default());
    let mut tail = Message::assistant("");
    tail.tool_calls = vec![ToolCall::new("call_0", "does_not_exist", "{}")];

    let reply = agent.chat(vec![tail]).await;
    let blob: Value = serde_json::from_str(&reply).unwrap();
    assert_eq!(blob["tool_results"][0]["result"]["success"], false);
    assert!(blob["tool_results"][0]["result"]["error"]
        .as_str()
        .unwrap()
        .contains("does_not_exist"));
}

#[tokio::test]
async fn edit_intent_routes_to_the_edit_tool() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("config.txt");
    std::fs::write(&file, "mode=alpha\n").unwrap();

    let agent = Agent::new(AgentConfig::default());
    let prompt = format!("Edit {}: replace alpha with beta", file.to_str().unwrap());
    let reply = agent.chat(vec![Message::user(prompt)]).await;

    assert!(reply.starts_with("Edit completed:"), "got: {reply}");
    assert_eq!(std::fs::read_to_string(&file).unwrap(), "mode=beta\n");
}

#[tokio::test]
async fn auto_recall_injects_memories_into_the_first_system_message() {
    let dir = tempfile::tempdir().unwrap();
    let memory = memory_store(&dir);
    memory
        .store("user prefers dark mode", "preference", 0.8)
        .await
        .unwrap();

    let (base_url, captured) = spawn_llm(text_reply("dark mode, noted")).await;
    let agent = Agent::new(AgentConfig {
        api_key: "test-key".into(),
        base_url,
        model: "test-model".into(),
        memory: Some(memory.clone()),
        registry: Some(ocg_tools::memory_registry(memory)),
        auto_recall: true,
        ..AgentConfig::default()
    });

    let reply = agent
        .chat(vec![Message::user("what UI mode do I like?")])
        .await;
    assert_eq!(reply, "dark mode, noted");

    let requests = captured.lock().unwrap();
    let first = &requests[0]["messages"][0];
    assert_eq!(first["role"], "system");
    let content = first["content"].as_str().unwrap();
    assert!(content.contains("<relevant-memories>"));
    assert!(content.contains("dark mode"));
}

#[tokio::test]
async fn auto_capture_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let memory = memory_store(&dir);
    let storage = Storage::open_in_memory().unwrap();

    let agent = Agent::new(AgentConfig {
        storage: Some(storage),
        memory: Some(memory.clone()),
        ..AgentConfig::default()
    });

    let msg = "Remember that I deploy on Fridays";
    agent.chat(vec![Message::user(msg)]).await;
    agent.chat(vec![Message::user(msg)]).await;

    assert_eq!(memory.count().unwrap(), 1);
    let entry = &memory.search(msg, 1, 0.0).await.unwrap()[0].entry;
    assert_eq!(entry.source, "auto");
    assert!((entry.importance - 0.6).abs() < 1e-9);
}

#[tokio::test]
async fn compaction_preserves_the_tail_and_appends_a_summary() {
    let storage = Storage::open_in_memory().unwrap();
    for i in 0..300 {
        let body = format!("{i:03}{}", "x".repeat(197));
        storage.add_message(MAIN_SESSION, "user", &body).unwrap();
    }
    let before = storage.get_messages(MAIN_SESSION, 500).unwrap();
    let expected_tail: Vec<String> = before[270..].iter().map(|m| m.content.clone()).collect();

    let agent = Agent::new(AgentConfig {
        storage: Some(storage.clone()),
        ..AgentConfig::default()
    });
    agent.compact_session(MAIN_SESSION).await;

    let after = storage.get_messages(MAIN_SESSION, 500).unwrap();
    assert_eq!(after.len(), 31);
    let tail: Vec<String> = after[..30].iter().map(|m| m.content.clone()).collect();
    assert_eq!(tail, expected_tail);
    assert_eq!(after[30].role, "system");
    assert!(after[30].content.starts_with("[summary]\n"));

    let meta = storage.get_session_meta(MAIN_SESSION).unwrap();
    assert_eq!(meta.compaction_count, 1);
    assert!(!meta.last_summary.is_empty());
}

#[tokio::test]
async fn small_histories_are_not_compacted() {
    let storage = Storage::open_in_memory().unwrap();
    for _ in 0..200 {
        storage
            .add_message(MAIN_SESSION, "user", &"y".repeat(50))
            .unwrap();
    }

    let agent = Agent::new(AgentConfig {
        storage: Some(storage.clone()),
        ..AgentConfig::default()
    });
    agent.compact_session(MAIN_SESSION).await;

    assert_eq!(storage.get_messages(MAIN_SESSION, 500).unwrap().len(), 200);
}

#[tokio::test]
async fn canned_responses_without_an_api_key() {
    let storage = Storage::open_in_memory().unwrap();
    let agent = Agent::new(AgentConfig {
        storage: Some(storage.clone()),
        ..AgentConfig::default()
    });

    let reply = agent.chat(vec![Message::user("hello there")]).await;
    assert!(reply.contains("Available tools"));

    let reply = agent.chat(vec![Message::user("list your tools")]).await;
    assert!(reply.contains("read"));
    assert!(reply.contains("exec"));

    // Both turns were persisted to the main session (redacted user + reply).
    let stored = storage.get_messages(MAIN_SESSION, 100).unwrap();
    assert_eq!(stored.len(), 4);
    assert_eq!(stored[0].content, "[redacted]");
}

#[tokio::test]
async fn rpc_service_dispatches_methods() {
    use ocg_rpc::RpcService;

    let dir = tempfile::tempdir().unwrap();
    let memory = memory_store(&dir);
    let storage = Storage::open_in_memory().unwrap();
    let agent = Agent::new(AgentConfig {
        storage: Some(storage),
        memory: Some(memory.clone()),
        registry: Some(ocg_tools::memory_registry(memory)),
        ..AgentConfig::default()
    });
    let service = ocg_agent::AgentRpcService::new(agent);

    // Chat
    let reply = service
        .call(
            "Chat",
            serde_json::json!({ "messages": [{ "role": "user", "content": "hello" }] }),
        )
        .await
        .unwrap();
    assert!(reply["content"].as_str().unwrap().contains("Available tools"));

    // MemoryStore then MemorySearch round trip.
    let stored = service
        .call(
            "MemoryStore",
            serde_json::json!({ "text": "the cache lives in redis", "category": "fact" }),
        )
        .await
        .unwrap();
    let store_result: Value =
        serde_json::from_str(stored["result"].as_str().unwrap()).unwrap();
    assert_eq!(store_result["action"], "created");

    let found = service
        .call(
            "MemorySearch",
            serde_json::json!({ "query": "the cache lives in redis", "minScore": 0.1 }),
        )
        .await
        .unwrap();
    let search_result: Value =
        serde_json::from_str(found["result"].as_str().unwrap()).unwrap();
    assert_eq!(search_result["count"], 1);

    // Stats includes the memory count.
    let stats = service.call("Stats", serde_json::json!({})).await.unwrap();
    assert_eq!(stats["stats"]["memories"], 1);

    // Unknown methods error.
    assert!(service.call("Bogus", Value::Null).await.is_err());
}

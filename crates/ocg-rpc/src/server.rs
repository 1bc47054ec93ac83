use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, info, warn};

use ocg_core::{OcgError, Result};

use crate::frame::{read_frame, write_frame};
use crate::proto::{RpcRequest, RpcResponse};

/// The service behind the socket. Unknown methods must return an error.
#[async_trait]
pub trait RpcService: Send + Sync {
    async fn call(&self, method: &str, params: Value) -> Result<Value>;
}

/// Unix-socket RPC server. One task per connection; calls on a connection
/// are served strictly in order.
pub struct RpcServer {
    listener: UnixListener,
    path: PathBuf,
    service: Arc<dyn RpcService>,
}

impl RpcServer {
    /// Bind the socket, unlinking any stale file first.
    pub fn bind(path: impl AsRef<Path>, service: Arc<dyn RpcService>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        match std::fs::remove_file(&path) {
            Ok(()) => debug!(path = %path.display(), "removed stale socket"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(OcgError::Rpc(format!("cannot unlink socket: {e}"))),
        }
        let listener = UnixListener::bind(&path)
            .map_err(|e| OcgError::Rpc(format!("listen on {} failed: {e}", path.display())))?;
        info!(path = %path.display(), "rpc server listening");
        Ok(Self {
            listener,
            path,
            service,
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.path
    }

    /// Accept loop. Runs until the listener errors (e.g. the socket file is
    /// removed during shutdown).
    pub async fn serve(self) -> Result<()> {
        loop {
            let (stream, _) = match self.listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    warn!(error = %e, "rpc accept failed");
                    return Err(e.into());
                }
            };
            let service = self.service.clone();
            tokio::spawn(async move {
                if let Err(e) = serve_connection(stream, service).await {
                    debug!(error = %e, "rpc connection closed with error");
                }
            });
        }
    }
}

async fn serve_connection(mut stream: UnixStream, service: Arc<dyn RpcService>) -> Result<()> {
    loop {
        let Some(payload) = read_frame(&mut stream).await? else {
            return Ok(());
        };

        let response = match serde_json::from_slice::<RpcRequest>(&payload) {
            Ok(request) => {
                debug!(method = %request.method, id = request.id, "rpc call");
                match service.call(&request.method, request.params).await {
                    Ok(result) => RpcResponse::ok(request.id, result),
                    Err(e) => RpcResponse::err(request.id, e.to_string()),
                }
            }
            Err(e) => RpcResponse::err(0, format!("malformed request: {e}")),
        };

        let bytes = serde_json::to_vec(&response)?;
        write_frame(&mut stream, &bytes).await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::RpcClient;

    struct EchoService;

    #[async_trait]
    impl RpcService for EchoService {
        async fn call(&self, method: &str, params: Value) -> Result<Value> {
            match method {
                "Echo" => Ok(serde_json::json!({ "echo": params })),
                other => Err(OcgError::Rpc(format!("unknown method: {other}"))),
            }
        }
    }

    #[tokio::test]
    async fn round_trip_over_unix_socket() {
        let dir = tempfile::tempdir().unwrap();
        let sock = dir.path().join("agent.sock");

        let server = RpcServer::bind(&sock, Arc::new(EchoService)).unwrap();
        tokio::spawn(server.serve());

        let client = RpcClient::connect_with_deadline(&sock, std::time::Duration::from_secs(5))
            .await
            .unwrap();
        let result = client
            .call("Echo", serde_json::json!({"n": 7}))
            .await
            .unwrap();
        assert_eq!(result["echo"]["n"], 7);
    }

    #[tokio::test]
    async fn unknown_method_surfaces_as_error() {
        let dir = tempfile::tempdir().unwrap();
        let sock = dir.path().join("agent.sock");
        let server = RpcServer::bind(&sock, Arc::new(EchoService)).unwrap();
        tokio::spawn(server.serve());

        let client = RpcClient::connect_with_deadline(&sock, std::time::Duration::from_secs(5))
            .await
            .unwrap();
        let err = client.call("Nope", Value::Null).await.unwrap_err();
        assert!(err.to_string().contains("unknown method"));
    }

    #[tokio::test]
    async fn sequential_calls_share_one_connection() {
        let dir = tempfile::tempdir().unwrap();
        let sock = dir.path().join("agent.sock");
        let server = RpcServer::bind(&sock, Arc::new(EchoService)).unwrap();
        tokio::spawn(server.serve());

        let client = Arc::new(
            RpcClient::connect_with_deadline(&sock, std::time::Duration::from_secs(5))
                .await
                .unwrap(),
        );

        let mut handles = Vec::new();
        for i in 0..8 {
            let client = client.clone();
            handles.push(tokio::spawn(async move {
                client
                    .call("Echo", serde_json::json!({"i": i}))
                    .await
                    .unwrap()["echo"]["i"]
                    .as_i64()
                    .unwrap()
            }));
        }
        let mut seen: Vec<i64> = Vec::new();
        for h in handles {
            seen.push(h.await.unwrap());
        }
        seen.sort();
        assert_eq!(seen, (0..8).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn stale_socket_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let sock = dir.path().join("agent.sock");
        std::fs::write(&sock, b"stale").unwrap();
        assert!(RpcServer::bind(&sock, Arc::new(EchoService)).is_ok());
    }

    #[tokio::test]
    async fn connect_times_out_without_server() {
        let dir = tempfile::tempdir().unwrap();
        let sock = dir.path().join("missing.sock");
        let err =
            RpcClient::connect_with_deadline(&sock, std::time::Duration::from_millis(400)).await;
        assert!(err.is_err());
    }
}

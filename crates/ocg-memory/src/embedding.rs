use async_trait::async_trait;
use tracing::{debug, info, warn};

use ocg_core::{OcgError, Result};

/// Known remote model dimensions. Unknown models fall back to 1536.
const MODEL_DIMENSIONS: &[(&str, usize)] = &[
    ("text-embedding-3-small", 1536),
    ("text-embedding-3-large", 3072),
    ("text-embedding-ada-002", 1024),
];

/// Trait for generating text embeddings.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// The dimensionality of the output embeddings.
    fn dim(&self) -> usize;

    /// Provider name, for logs.
    fn name(&self) -> String;
}

/// Local embedding server (llama.cpp style): `GET /health`, `POST /embed`.
pub struct LocalProvider {
    server_url: String,
    dim: usize,
    client: reqwest::Client,
}

impl LocalProvider {
    /// Wait for the server to become healthy (up to 30 × 2 s probes), then
    /// return a provider with a 60 s embed timeout.
    pub async fn connect(server_url: &str, dim: usize) -> Result<Self> {
        let server_url = if server_url.is_empty() {
            "http://localhost:50000".to_string()
        } else {
            server_url.trim_end_matches('/').to_string()
        };
        let dim = if dim == 0 { 768 } else { dim };

        let probe = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(2))
            .build()
            .map_err(|e| OcgError::Embedding(e.to_string()))?;

        let mut last_err = String::new();
        for _ in 0..30 {
            match probe.get(format!("{server_url}/health")).send().await {
                Ok(resp) if resp.status().is_success() => {
                    info!(url = %server_url, dim, "local embedding service connected");
                    let client = reqwest::Client::builder()
                        .timeout(std::time::Duration::from_secs(60))
                        .build()
                        .map_err(|e| OcgError::Embedding(e.to_string()))?;
                    return Ok(Self {
                        server_url,
                        dim,
                        client,
                    });
                }
                Ok(resp) => last_err = format!("server returned {}", resp.status()),
                Err(e) => last_err = e.to_string(),
            }
            tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        }

        Err(OcgError::Embedding(format!(
            "local server unavailable: {last_err}"
        )))
    }
}

#[async_trait]
impl EmbeddingProvider for LocalProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let resp = self
            .client
            .post(format!("{}/embed", self.server_url))
            .json(&serde_json::json!({ "text": text }))
            .send()
            .await
            .map_err(|e| OcgError::Embedding(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(OcgError::Embedding(format!(
                "server returned {}",
                resp.status()
            )));
        }

        #[derive(serde::Deserialize)]
        struct EmbedResponse {
            embedding: Vec<f32>,
        }
        let body: EmbedResponse = resp
            .json()
            .await
            .map_err(|e| OcgError::Embedding(e.to_string()))?;
        Ok(body.embedding)
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn name(&self) -> String {
        format!("local:{}", self.server_url)
    }
}

/// OpenAI-compatible remote embeddings.
pub struct RemoteProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    dim: usize,
}

impl RemoteProvider {
    pub fn new(api_key: &str, model: &str) -> Result<Self> {
        let api_key = resolve_env_ref(api_key);
        let api_key = if api_key.is_empty() {
            std::env::var("OPENAI_API_KEY").unwrap_or_default()
        } else {
            api_key
        };
        if api_key.is_empty() {
            return Err(OcgError::Embedding("embedding API key required".into()));
        }

        let dim = MODEL_DIMENSIONS
            .iter()
            .find(|(name, _)| *name == model)
            .map(|(_, d)| *d)
            .unwrap_or(1536);

        Ok(Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(60))
                .build()
                .map_err(|e| OcgError::Embedding(e.to_string()))?,
            api_key,
            base_url: "https://api.openai.com/v1".into(),
            model: model.to_string(),
            dim,
        })
    }

    pub fn with_base_url(mut self, url: String) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl EmbeddingProvider for RemoteProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        debug!(model = %self.model, "generating embedding");

        let resp = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&serde_json::json!({ "model": self.model, "input": text }))
            .send()
            .await
            .map_err(|e| OcgError::Embedding(format!("embedding request failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(OcgError::Embedding(format!("embedding HTTP {status}: {text}")));
        }

        let data: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| OcgError::Embedding(format!("embedding parse error: {e}")))?;

        let embedding: Vec<f32> = data["data"][0]["embedding"]
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_f64().map(|f| f as f32))
                    .collect()
            })
            .unwrap_or_default();

        if embedding.is_empty() {
            return Err(OcgError::Embedding("no embedding returned".into()));
        }
        Ok(embedding)
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn name(&self) -> String {
        format!("openai:{}", self.model)
    }
}

/// Deterministic placeholder used when no embedding service is configured:
/// every vector is `i % 256 / 256`.
pub struct PlaceholderProvider {
    dim: usize,
}

impl PlaceholderProvider {
    pub fn new(dim: usize) -> Self {
        Self {
            dim: if dim == 0 { 768 } else { dim },
        }
    }
}

#[async_trait]
impl EmbeddingProvider for PlaceholderProvider {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Ok((0..self.dim).map(|i| (i % 256) as f32 / 256.0).collect())
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn name(&self) -> String {
        "placeholder".into()
    }
}

/// `${VAR}` values resolve through the environment.
fn resolve_env_ref(value: &str) -> String {
    if let Some(name) = value.strip_prefix("${").and_then(|v| v.strip_suffix('}')) {
        return std::env::var(name).unwrap_or_default();
    }
    value.to_string()
}

/// Pick a provider in priority order: local server, remote API, placeholder.
/// Returns `None` when a service was configured but could not be reached;
/// in that mode the store degrades to keyword-only search.
pub async fn select_provider(
    server_url: &str,
    model: &str,
    api_key: &str,
    dim: usize,
) -> Option<Box<dyn EmbeddingProvider>> {
    if !server_url.is_empty() {
        match LocalProvider::connect(server_url, dim).await {
            Ok(p) => return Some(Box::new(p)),
            Err(e) => warn!(error = %e, "local embedding connection failed"),
        }
    }

    if !model.is_empty() {
        match RemoteProvider::new(api_key, model) {
            Ok(p) => return Some(Box::new(p)),
            Err(e) => warn!(error = %e, "remote embedding init failed"),
        }
    }

    if server_url.is_empty() && model.is_empty() {
        info!("no embedding service configured, using placeholder vectors");
        return Some(Box::new(PlaceholderProvider::new(dim)));
    }

    warn!("embedding service unreachable, memory search degrades to keyword-only");
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn placeholder_is_deterministic() {
        let p = PlaceholderProvider::new(8);
        let a = p.embed("one").await.unwrap();
        let b = p.embed("two").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 8);
        assert!((a[3] - 3.0 / 256.0).abs() < 1e-9);
    }

    #[test]
    fn env_ref_resolution() {
        std::env::set_var("OCG_TEST_EMBED_KEY", "sekrit");
        assert_eq!(resolve_env_ref("${OCG_TEST_EMBED_KEY}"), "sekrit");
        assert_eq!(resolve_env_ref("literal"), "literal");
    }

    #[test]
    fn remote_dims_follow_model_table() {
        std::env::set_var("OPENAI_API_KEY", "k");
        let p = RemoteProvider::new("", "text-embedding-3-large").unwrap();
        assert_eq!(p.dim(), 3072);
        let p = RemoteProvider::new("", "unknown-model").unwrap();
        assert_eq!(p.dim(), 1536);
    }
}

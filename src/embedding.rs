//! Embedding provider abstraction and implementations.
//!
//! Defines the [`EmbeddingProvider`] trait and concrete implementations:
//! - **[`DisabledProvider`]**: used when embeddings are not configured.
//! - **[`GeminiProvider`]**: calls the Gemini `batchEmbedContents` API.
//! - **[`OllamaProvider`]**: calls a local Ollama instance's `/api/embed` endpoint.
//!
//! Also provides the vector utilities used by the SQLite store:
//! - [`cosine_similarity`]: similarity between two embedding vectors
//! - [`vec_to_blob`]: encode a `Vec<f32>` as little-endian bytes for a BLOB column
//! - [`blob_to_vec`]: decode a BLOB back into a `Vec<f32>`
//!
//! # Retry Strategy
//!
//! Network-backed providers share [`post_json_with_retry`]:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use anyhow::{bail, Context, Result};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::EmbeddingConfig;
use crate::error::ToolError;

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const OLLAMA_BASE_URL: &str = "http://localhost:11434";

/// Trait for embedding providers.
///
/// The actual embedding computation is performed by [`embed_texts`], which
/// dispatches on the configured provider name.
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-004"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `768`).
    fn dims(&self) -> usize;
}

/// Embed a batch of texts using the configured provider.
///
/// Returns one vector per input text, in input order. Fails if the backend
/// returns a different number of vectors or vectors of the wrong width.
pub async fn embed_texts(
    provider: &dyn EmbeddingProvider,
    config: &EmbeddingConfig,
    texts: &[String],
) -> Result<Vec<Vec<f32>>> {
    if texts.is_empty() {
        return Ok(Vec::new());
    }

    let vectors = match config.provider.as_str() {
        "gemini" => embed_gemini(config, texts).await?,
        "ollama" => embed_ollama(config, texts).await?,
        "disabled" => return Err(ToolError::EmbeddingsDisabled.into()),
        other => bail!("Unknown embedding provider: {}", other),
    };

    if vectors.len() != texts.len() {
        bail!(
            "embedding provider returned {} vectors for {} inputs",
            vectors.len(),
            texts.len()
        );
    }
    if let Some(bad) = vectors.iter().find(|v| v.len() != provider.dims()) {
        bail!(
            "embedding provider returned a {}-dimensional vector, expected {}",
            bad.len(),
            provider.dims()
        );
    }

    debug!(count = texts.len(), model = provider.model_name(), "embedded batch");
    Ok(vectors)
}

/// Embed a single query text.
pub async fn embed_query(
    provider: &dyn EmbeddingProvider,
    config: &EmbeddingConfig,
    text: &str,
) -> Result<Vec<f32>> {
    let results = embed_texts(provider, config, &[text.to_string()]).await?;
    results
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("Empty embedding response"))
}

// ============ Disabled Provider ============

/// A no-op provider used when `embedding.provider = "disabled"`.
pub struct DisabledProvider;

impl EmbeddingProvider for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
}

// ============ Gemini Provider ============

/// Embedding provider using the Gemini API.
///
/// Reads the API key from the environment variable named by
/// `embedding.api_key_env` (default `GEMINI_API_KEY`).
pub struct GeminiProvider {
    model: String,
    dims: usize,
}

impl GeminiProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for Gemini provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for Gemini provider"))?;

        if std::env::var(&config.api_key_env).is_err() {
            bail!("{} environment variable not set", config.api_key_env);
        }

        Ok(Self { model, dims })
    }
}

impl EmbeddingProvider for GeminiProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
}

/// Model path in the form Gemini expects (`models/<name>`).
fn gemini_model_path(model: &str) -> String {
    if model.starts_with("models/") {
        model.to_string()
    } else {
        format!("models/{}", model)
    }
}

fn gemini_request_body(model: &str, dims: Option<usize>, texts: &[String]) -> serde_json::Value {
    let model_path = gemini_model_path(model);
    let requests: Vec<serde_json::Value> = texts
        .iter()
        .map(|text| {
            let mut req = serde_json::json!({
                "model": model_path,
                "content": { "parts": [{ "text": text }] },
            });
            if let Some(d) = dims {
                req["outputDimensionality"] = serde_json::json!(d);
            }
            req
        })
        .collect();
    serde_json::json!({ "requests": requests })
}

async fn embed_gemini(config: &EmbeddingConfig, texts: &[String]) -> Result<Vec<Vec<f32>>> {
    let api_key = std::env::var(&config.api_key_env)
        .map_err(|_| anyhow::anyhow!("{} not set", config.api_key_env))?;
    let model = config
        .model
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("embedding.model required"))?;
    let base = config.url.as_deref().unwrap_or(GEMINI_BASE_URL);

    let url = format!(
        "{}/{}:batchEmbedContents",
        base.trim_end_matches('/'),
        gemini_model_path(model)
    );
    let body = gemini_request_body(model, config.dims, texts);

    let json = post_json_with_retry(
        "Gemini",
        &url,
        &[("x-goog-api-key", api_key.as_str())],
        &body,
        config.timeout_secs,
        config.max_retries,
    )
    .await?;
    parse_gemini_response(&json)
}

/// Parse `{"embeddings": [{"values": [...]}, ...]}`.
fn parse_gemini_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid Gemini response: missing embeddings array"))?;

    embeddings
        .iter()
        .map(|item| {
            let values = item
                .get("values")
                .and_then(|v| v.as_array())
                .ok_or_else(|| anyhow::anyhow!("Invalid Gemini response: missing values"))?;
            Ok(values
                .iter()
                .map(|v| v.as_f64().unwrap_or(0.0) as f32)
                .collect())
        })
        .collect()
}

// ============ Ollama Provider ============

/// Embedding provider using a local Ollama instance.
///
/// Calls `POST /api/embed` on the configured URL (default: `http://localhost:11434`).
/// Requires an embedding model to be pulled (e.g. `ollama pull nomic-embed-text`).
pub struct OllamaProvider {
    model: String,
    dims: usize,
}

impl OllamaProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for Ollama provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for Ollama provider"))?;
        Ok(Self { model, dims })
    }
}

impl EmbeddingProvider for OllamaProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
}

async fn embed_ollama(config: &EmbeddingConfig, texts: &[String]) -> Result<Vec<Vec<f32>>> {
    let model = config
        .model
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("embedding.model required"))?;
    let base = config.url.as_deref().unwrap_or(OLLAMA_BASE_URL);

    let body = serde_json::json!({
        "model": model,
        "input": texts,
    });

    let json = post_json_with_retry(
        "Ollama",
        &format!("{}/api/embed", base.trim_end_matches('/')),
        &[],
        &body,
        config.timeout_secs,
        config.max_retries,
    )
    .await?;
    parse_ollama_response(&json)
}

/// Parse `{"embeddings": [[...], ...]}`.
fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing embeddings array"))?;

    let mut result = Vec::with_capacity(embeddings.len());
    for embedding in embeddings {
        let vec: Vec<f32> = embedding
            .as_array()
            .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: embedding is not an array"))?
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        result.push(vec);
    }
    Ok(result)
}

// ============ Shared HTTP ============

/// POST a JSON body and return the parsed JSON response, retrying transient
/// failures with exponential backoff.
///
/// Exhausted retries surface as [`ToolError::Upstream`].
pub(crate) async fn post_json_with_retry(
    service: &str,
    url: &str,
    headers: &[(&str, &str)],
    body: &serde_json::Value,
    timeout_secs: u64,
    max_retries: u32,
) -> Result<serde_json::Value> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .context("Failed to create HTTP client")?;

    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            warn!(service, attempt, ?delay, "retrying request");
            tokio::time::sleep(delay).await;
        }

        let mut req = client.post(url).json(body);
        for (name, value) in headers {
            req = req.header(*name, *value);
        }

        match req.send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return response
                        .json()
                        .await
                        .with_context(|| format!("{} returned invalid JSON", service));
                }

                let body_text = response.text().await.unwrap_or_default();
                if status.as_u16() == 429 || status.is_server_error() {
                    last_err = Some(format!("{} API error {}: {}", service, status, body_text));
                    continue;
                }

                return Err(
                    ToolError::Upstream(format!("{} API error {}: {}", service, status, body_text))
                        .into(),
                );
            }
            Err(e) => {
                last_err = Some(format!("{} connection error ({}): {}", service, url, e));
                continue;
            }
        }
    }

    Err(ToolError::Upstream(
        last_err.unwrap_or_else(|| format!("{} request failed after retries", service)),
    )
    .into())
}

/// Create the appropriate [`EmbeddingProvider`] based on configuration.
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledProvider`] |
/// | `"gemini"` | [`GeminiProvider`] |
/// | `"ollama"` | [`OllamaProvider`] |
pub fn create_provider(config: &EmbeddingConfig) -> Result<Box<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledProvider)),
        "gemini" => Ok(Box::new(GeminiProvider::new(config)?)),
        "ollama" => Ok(Box::new(OllamaProvider::new(config)?)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// ```rust
/// use agent_toolbox::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12);
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`.
///
/// Returns `0.0` for empty vectors, vectors of different lengths, or a
/// zero-norm operand.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        assert_eq!(blob_to_vec(&vec_to_blob(&vec)), vec);
    }

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_opposite() {
        let a = vec![1.0, 0.0];
        let b = vec![-1.0, 0.0];
        assert!((cosine_similarity(&a, &b) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_degenerate() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn test_parse_gemini_response() {
        let json = serde_json::json!({
            "embeddings": [
                { "values": [0.1, 0.2] },
                { "values": [0.3, 0.4] }
            ]
        });
        let vecs = parse_gemini_response(&json).unwrap();
        assert_eq!(vecs.len(), 2);
        assert!((vecs[1][0] - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_parse_gemini_response_missing_values() {
        let json = serde_json::json!({ "embeddings": [ { "nope": [] } ] });
        assert!(parse_gemini_response(&json).is_err());
    }

    #[test]
    fn test_gemini_request_body_shape() {
        let body = gemini_request_body("text-embedding-004", Some(256), &["hi".to_string()]);
        let req = &body["requests"][0];
        assert_eq!(req["model"], "models/text-embedding-004");
        assert_eq!(req["content"]["parts"][0]["text"], "hi");
        assert_eq!(req["outputDimensionality"], 256);
    }

    #[test]
    fn test_gemini_model_path_keeps_prefix() {
        assert_eq!(gemini_model_path("models/x"), "models/x");
        assert_eq!(gemini_model_path("x"), "models/x");
    }

    #[test]
    fn test_parse_ollama_response() {
        let json = serde_json::json!({ "embeddings": [[1.0, 0.0], [0.0, 1.0]] });
        let vecs = parse_ollama_response(&json).unwrap();
        assert_eq!(vecs, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn test_create_provider_disabled() {
        let provider = create_provider(&EmbeddingConfig::default()).unwrap();
        assert_eq!(provider.model_name(), "disabled");
        assert_eq!(provider.dims(), 0);
    }

    #[tokio::test]
    async fn test_embed_disabled_is_typed_error() {
        let config = EmbeddingConfig::default();
        let err = embed_texts(&DisabledProvider, &config, &["x".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ToolError>(),
            Some(ToolError::EmbeddingsDisabled)
        ));
    }

    // ─── Against a scripted local server ────────────────────────────

    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Clone)]
    struct Script {
        replies: Arc<Mutex<VecDeque<(u16, serde_json::Value)>>>,
        calls: Arc<AtomicUsize>,
    }

    async fn scripted(State(script): State<Script>) -> (StatusCode, Json<serde_json::Value>) {
        script.calls.fetch_add(1, Ordering::SeqCst);
        let (status, body) = script
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or((500, serde_json::json!({ "error": "script exhausted" })));
        (StatusCode::from_u16(status).unwrap(), Json(body))
    }

    /// Serve `replies` in order on `/api/embed`; returns the base URL and a call counter.
    async fn serve_script(replies: Vec<(u16, serde_json::Value)>) -> (String, Arc<AtomicUsize>) {
        let script = Script {
            replies: Arc::new(Mutex::new(replies.into())),
            calls: Arc::new(AtomicUsize::new(0)),
        };
        let calls = script.calls.clone();
        let app = Router::new()
            .route("/api/embed", post(scripted))
            .with_state(script);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (base, calls)
    }

    fn ollama_config(base: &str, dims: usize, max_retries: u32) -> EmbeddingConfig {
        EmbeddingConfig {
            provider: "ollama".into(),
            model: Some("nomic-embed-text".into()),
            dims: Some(dims),
            url: Some(base.to_string()),
            max_retries,
            timeout_secs: 5,
            ..EmbeddingConfig::default()
        }
    }

    fn texts(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_retries_server_errors_then_succeeds() {
        let (base, calls) = serve_script(vec![
            (503, serde_json::json!({ "error": "loading model" })),
            (200, serde_json::json!({ "embeddings": [[1.0, 0.0]] })),
        ])
        .await;
        let config = ollama_config(&base, 2, 2);
        let provider = OllamaProvider::new(&config).unwrap();

        let vecs = embed_texts(&provider, &config, &texts(&["hello"])).await.unwrap();
        assert_eq!(vecs, vec![vec![1.0, 0.0]]);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retries_rate_limit() {
        let (base, calls) = serve_script(vec![
            (429, serde_json::json!({ "error": "slow down" })),
            (200, serde_json::json!({ "embeddings": [[0.0, 1.0]] })),
        ])
        .await;
        let config = ollama_config(&base, 2, 1);
        let provider = OllamaProvider::new(&config).unwrap();

        assert!(embed_texts(&provider, &config, &texts(&["x"])).await.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_client_error_fails_without_retry() {
        let (base, calls) = serve_script(vec![
            (400, serde_json::json!({ "error": "model not found" })),
            (200, serde_json::json!({ "embeddings": [[1.0, 0.0]] })),
        ])
        .await;
        let config = ollama_config(&base, 2, 3);
        let provider = OllamaProvider::new(&config).unwrap();

        let err = embed_texts(&provider, &config, &texts(&["x"])).await.unwrap_err();
        assert_eq!(ToolError::classify(&err).1, "upstream_error");
        assert!(err.to_string().contains("model not found"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhausted_retries_are_upstream_errors() {
        let (base, calls) = serve_script(vec![]).await;
        let config = ollama_config(&base, 2, 1);
        let provider = OllamaProvider::new(&config).unwrap();

        let err = embed_texts(&provider, &config, &texts(&["x"])).await.unwrap_err();
        assert_eq!(ToolError::classify(&err).1, "upstream_error");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_vector_count_mismatch() {
        let (base, _) =
            serve_script(vec![(200, serde_json::json!({ "embeddings": [[1.0, 0.0]] }))]).await;
        let config = ollama_config(&base, 2, 0);
        let provider = OllamaProvider::new(&config).unwrap();

        let err = embed_texts(&provider, &config, &texts(&["a", "b"])).await.unwrap_err();
        assert!(err.to_string().contains("1 vectors for 2 inputs"), "{}", err);
    }

    #[tokio::test]
    async fn test_dims_mismatch() {
        let (base, _) =
            serve_script(vec![(200, serde_json::json!({ "embeddings": [[1.0, 0.0, 0.0]] }))])
                .await;
        let config = ollama_config(&base, 2, 0);
        let provider = OllamaProvider::new(&config).unwrap();

        let err = embed_query(&provider, &config, "a").await.unwrap_err();
        assert!(err.to_string().contains("3-dimensional"), "{}", err);
    }
}

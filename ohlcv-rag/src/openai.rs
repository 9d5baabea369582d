//! Hosted embeddings through an OpenAI-compatible `/v1/embeddings` endpoint.
//!
//! Use this in place of the local [`HashingEmbedder`](crate::HashingEmbedder)
//! when window summaries should be indexed with a trained model. The
//! provider reports `model` as its identity, or `model@dimensions` when
//! the output is truncated, so collections built at different widths are
//! never mixed up.
//!
//! Only compiled with the `openai` feature.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};

const PROVIDER: &str = "OpenAI";

const API_KEY_VAR: &str = "OPENAI_API_KEY";

/// Output width of the models the provider knows without an explicit
/// `dimensions` setting.
fn native_dimensions(model: &str) -> Option<usize> {
    match model {
        "text-embedding-3-small" | "text-embedding-ada-002" => Some(1536),
        "text-embedding-3-large" => Some(3072),
        _ => None,
    }
}

fn failure(message: impl Into<String>) -> RagError {
    RagError::EmbeddingError { provider: PROVIDER.into(), message: message.into() }
}

/// Settings for [`OpenAIEmbeddingProvider`].
///
/// Deserializes from the same kind of JSON object the store adapters take;
/// every field has a default.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OpenAIConfig {
    /// Embedding model.
    #[serde(default = "default_model")]
    pub model: String,
    /// Truncated output width. Required for models without a known width.
    #[serde(default)]
    pub dimensions: Option<usize>,
    /// Full URL of the embeddings endpoint.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Falls back to `OPENAI_API_KEY` when unset.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_model() -> String {
    "text-embedding-3-small".into()
}

fn default_endpoint() -> String {
    "https://api.openai.com/v1/embeddings".into()
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for OpenAIConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            dimensions: None,
            endpoint: default_endpoint(),
            api_key: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// An [`EmbeddingProvider`] that posts batches to an OpenAI-compatible
/// embeddings endpoint.
///
/// ```rust,ignore
/// use std::sync::Arc;
/// use ohlcv_rag::openai::{OpenAIConfig, OpenAIEmbeddingProvider};
///
/// let config = OpenAIConfig { dimensions: Some(512), ..OpenAIConfig::default() };
/// let provider = Arc::new(OpenAIEmbeddingProvider::from_config(config)?);
/// assert_eq!(provider.model_name(), "text-embedding-3-small@512");
/// let manager = VectorStoreManager::create("memory", "ohlcv", provider, json!({})).await?;
/// ```
pub struct OpenAIEmbeddingProvider {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    truncate_to: Option<usize>,
    width: usize,
    identity: String,
}

impl OpenAIEmbeddingProvider {
    /// Build a provider from `config`.
    ///
    /// # Errors
    ///
    /// `EmbeddingError` when no API key is available, the width is zero or
    /// unknown for the model, or the HTTP client cannot be built.
    pub fn from_config(config: OpenAIConfig) -> Result<Self> {
        let api_key = match config.api_key {
            Some(key) => key,
            None => std::env::var(API_KEY_VAR)
                .map_err(|_| failure(format!("no api_key configured and {API_KEY_VAR} unset")))?,
        };
        if api_key.trim().is_empty() {
            return Err(failure("API key must not be empty"));
        }

        let width = match config.dimensions {
            Some(0) => return Err(failure("dimensions must be positive")),
            Some(dims) => dims,
            None => native_dimensions(&config.model).ok_or_else(|| {
                failure(format!("unknown width for model '{}'; set dimensions", config.model))
            })?,
        };

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| failure(format!("cannot build HTTP client: {e}")))?;

        let identity = match config.dimensions {
            Some(dims) => format!("{}@{dims}", config.model),
            None => config.model.clone(),
        };

        Ok(Self {
            http,
            endpoint: config.endpoint,
            api_key,
            model: config.model,
            truncate_to: config.dimensions,
            width,
            identity,
        })
    }

    /// Default settings with an explicit key.
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        Self::from_config(OpenAIConfig { api_key: Some(api_key.into()), ..OpenAIConfig::default() })
    }

    /// Default settings with the key read from `OPENAI_API_KEY`.
    pub fn from_env() -> Result<Self> {
        Self::from_config(OpenAIConfig::default())
    }

    async fn request(&self, texts: &[&str]) -> Result<Vec<EmbeddingRow>> {
        let body =
            EmbeddingRequest { model: &self.model, input: texts, dimensions: self.truncate_to };

        let sent = self.http.post(&self.endpoint).bearer_auth(&self.api_key).json(&body).send();
        let response = sent.await.map_err(|e| {
            error!(provider = PROVIDER, endpoint = %self.endpoint, error = %e, "request failed");
            failure(format!("request failed: {e}"))
        })?;

        let status = response.status();
        if !status.is_success() {
            let raw = response.text().await.unwrap_or_default();
            let reason = serde_json::from_str::<ApiError>(&raw)
                .map(|e| e.error.message)
                .unwrap_or(raw);
            error!(provider = PROVIDER, %status, reason = %reason, "embeddings call rejected");
            return Err(failure(format!("endpoint answered {status}: {reason}")));
        }

        let parsed: EmbeddingResponse = response.json().await.map_err(|e| {
            error!(provider = PROVIDER, error = %e, "unreadable response body");
            failure(format!("unreadable response body: {e}"))
        })?;
        Ok(parsed.data)
    }
}

impl std::fmt::Debug for OpenAIEmbeddingProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAIEmbeddingProvider")
            .field("endpoint", &self.endpoint)
            .field("identity", &self.identity)
            .field("width", &self.width)
            .finish_non_exhaustive()
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingRow>,
}

#[derive(Deserialize)]
struct EmbeddingRow {
    index: usize,
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct ApiError {
    error: ApiErrorBody,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    message: String,
}

/// Put rows back in input order and check there is exactly one per input.
fn order_rows(mut rows: Vec<EmbeddingRow>, expected: usize) -> Result<Vec<Vec<f32>>> {
    if rows.len() != expected {
        return Err(failure(format!("got {} embeddings for {expected} inputs", rows.len())));
    }
    rows.sort_by_key(|row| row.index);
    if rows.iter().enumerate().any(|(position, row)| row.index != position) {
        return Err(failure("response indices do not cover the batch"));
    }
    Ok(rows.into_iter().map(|row| row.embedding).collect())
}

#[async_trait]
impl EmbeddingProvider for OpenAIEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text])
            .await?
            .pop()
            .ok_or_else(|| failure("empty response for a single input"))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        debug!(provider = PROVIDER, model = %self.identity, batch = texts.len(), "embedding batch");
        let rows = self.request(texts).await?;
        order_rows(rows, texts.len())
    }

    fn dimensions(&self) -> usize {
        self.width
    }

    fn model_name(&self) -> &str {
        &self.identity
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn keyed(config: OpenAIConfig) -> OpenAIConfig {
        OpenAIConfig { api_key: Some("sk-test".into()), ..config }
    }

    #[test]
    fn blank_api_key_is_rejected() {
        assert!(OpenAIEmbeddingProvider::new("").is_err());
        assert!(OpenAIEmbeddingProvider::new("   ").is_err());
    }

    #[test]
    fn default_model_reports_native_width() {
        let provider = OpenAIEmbeddingProvider::new("sk-test").unwrap();
        assert_eq!(provider.dimensions(), 1536);
        assert_eq!(provider.model_name(), "text-embedding-3-small");
    }

    #[test]
    fn truncated_width_is_part_of_identity() {
        let config = keyed(OpenAIConfig {
            model: "text-embedding-3-large".into(),
            dimensions: Some(256),
            ..OpenAIConfig::default()
        });
        let provider = OpenAIEmbeddingProvider::from_config(config).unwrap();
        assert_eq!(provider.dimensions(), 256);
        assert_eq!(provider.model_name(), "text-embedding-3-large@256");
        assert_eq!(provider.truncate_to, Some(256));
    }

    #[test]
    fn unknown_model_needs_explicit_width() {
        let config = keyed(OpenAIConfig { model: "local-e5".into(), ..OpenAIConfig::default() });
        assert!(OpenAIEmbeddingProvider::from_config(config.clone()).is_err());

        let sized = OpenAIConfig { dimensions: Some(768), ..config };
        let provider = OpenAIEmbeddingProvider::from_config(sized).unwrap();
        assert_eq!(provider.model_name(), "local-e5@768");
    }

    #[test]
    fn zero_width_is_rejected() {
        let config = keyed(OpenAIConfig { dimensions: Some(0), ..OpenAIConfig::default() });
        assert!(OpenAIEmbeddingProvider::from_config(config).is_err());
    }

    #[test]
    fn config_fills_defaults_and_rejects_unknown_keys() {
        let config: OpenAIConfig =
            serde_json::from_value(json!({"endpoint": "http://localhost:8080/v1/embeddings"}))
                .unwrap();
        assert_eq!(config.model, "text-embedding-3-small");
        assert_eq!(config.timeout_secs, 30);
        assert!(serde_json::from_value::<OpenAIConfig>(json!({"modle": "x"})).is_err());
    }

    #[test]
    fn rows_are_reordered_by_index() {
        let rows = vec![
            EmbeddingRow { index: 1, embedding: vec![0.0, 1.0] },
            EmbeddingRow { index: 0, embedding: vec![1.0, 0.0] },
        ];
        assert_eq!(order_rows(rows, 2).unwrap(), vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn short_or_gapped_responses_are_errors() {
        let short = vec![EmbeddingRow { index: 0, embedding: vec![1.0] }];
        assert!(order_rows(short, 2).is_err());

        let gapped = vec![
            EmbeddingRow { index: 0, embedding: vec![1.0] },
            EmbeddingRow { index: 2, embedding: vec![1.0] },
        ];
        assert!(order_rows(gapped, 2).is_err());
    }
}

//! Embedding provider abstraction and implementations.
//!
//! Defines the [`Embedder`] trait that all embedding backends implement, plus
//! concrete providers:
//!
//! - **[`HashEmbedder`]** (`provider = "local"`) — deterministic hashed
//!   bag-of-tokens projection. Fully offline; the default.
//! - **[`OpenAiEmbedder`]** (`provider = "openai"`) — calls the OpenAI
//!   embeddings API with batching, retry, and backoff.
//!
//! Also provides the vector byte-codec used by index persistence:
//! [`vec_to_blob`] / [`blob_to_vec`].
//!
//! # Batching
//!
//! `embed_batch` must return the same vectors `embed` would return for each
//! text, in input order — batching is purely a performance concern and never
//! changes results. The trait's default implementation embeds element-wise;
//! providers with a real batch API override it.
//!
//! # Retry Strategy
//!
//! The OpenAI provider uses exponential backoff for transient errors:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)
//!
//! All failures surface as [`Error::EmbeddingUnavailable`]; the session layer
//! decides what that means for the conversation.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::error::{Error, Result};

/// Trait for embedding backends.
///
/// Embedding calls are the only pipeline operations (besides generation)
/// expected to cross a process boundary, so they are async and carry their
/// own bounded retry internally.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;

    /// Returns the embedding vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;

    /// Embed a single text into a vector of exactly `dims()` components.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a batch of texts, same order as input.
    ///
    /// Equivalent to calling [`Embedder::embed`] element-wise.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }
}

/// Create the appropriate [`Embedder`] based on configuration.
///
/// | Config value | Provider |
/// |--------------|----------|
/// | `"local"` | [`HashEmbedder`] |
/// | `"openai"` | [`OpenAiEmbedder`] |
///
/// # Errors
///
/// [`Error::InvalidConfig`] for unknown provider names or missing
/// provider-specific settings.
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "local" => Ok(Arc::new(HashEmbedder::new(config.dims.unwrap_or(256)))),
        "openai" => Ok(Arc::new(OpenAiEmbedder::new(config)?)),
        other => Err(Error::InvalidConfig(format!(
            "unknown embedding provider: '{}'",
            other
        ))),
    }
}

// ============ Local Hash Provider ============

/// Tokens too common to carry retrieval signal.
const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "can", "do", "for", "from", "had",
    "has", "have", "how", "i", "if", "in", "into", "is", "it", "its", "me", "my", "no", "not",
    "of", "on", "or", "our", "so", "that", "the", "their", "them", "then", "there", "these",
    "they", "this", "to", "was", "we", "were", "what", "when", "where", "which", "who", "why",
    "will", "with", "you", "your",
];

/// Deterministic, offline embedding provider.
///
/// Each lowercase alphanumeric token (stopwords dropped) is hashed with
/// SHA-256; the digest seeds four signed contributions at derived dimensions.
/// The summed vector is L2-normalized, so identical text always embeds to the
/// identical unit vector and cosine against itself is exactly `1.0`.
///
/// This is not a semantic model — it is a lexical-overlap measure with the
/// geometry of an embedding — but it is deterministic, dependency-free, and
/// good enough to drive the full pipeline (and its tests) without a network.
pub struct HashEmbedder {
    dims: usize,
}

impl HashEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims }
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn model_name(&self) -> &str {
        "local-hash-v1"
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0.0f32; self.dims];

        for token in tokenize(text) {
            let digest = Sha256::digest(token.as_bytes());
            for k in 0..4 {
                let hi = digest[k * 4] as usize;
                let lo = digest[k * 4 + 1] as usize;
                let dim = (hi << 8 | lo) % self.dims;
                let sign = if digest[k * 4 + 2] & 1 == 0 { 1.0 } else { -1.0 };
                vector[dim] += sign;
            }
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for x in vector.iter_mut() {
                *x /= norm;
            }
        }
        Ok(vector)
    }
}

/// Lowercase alphanumeric tokens with stopwords removed.
fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .filter(|t| !STOPWORDS.contains(&t.as_str()))
        .collect()
}

// ============ OpenAI Provider ============

/// Embedding provider using the OpenAI API.
///
/// Calls `POST /v1/embeddings` with the configured model. The API key is read
/// from `OPENAI_API_KEY` at construction and held by the provider — never
/// ambient state consulted at call time.
pub struct OpenAiEmbedder {
    model: String,
    dims: usize,
    api_key: String,
    client: reqwest::Client,
    max_retries: u32,
}

impl OpenAiEmbedder {
    /// Create a new OpenAI embedder from configuration.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidConfig`] if `model` or `dims` is not set;
    /// [`Error::EmbeddingUnavailable`] if `OPENAI_API_KEY` is not set.
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config.model.clone().ok_or_else(|| {
            Error::InvalidConfig("embedding.model required for the openai provider".to_string())
        })?;
        let dims = config.dims.ok_or_else(|| {
            Error::InvalidConfig("embedding.dims required for the openai provider".to_string())
        })?;
        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| {
            Error::EmbeddingUnavailable("OPENAI_API_KEY environment variable not set".to_string())
        })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::EmbeddingUnavailable(e.to_string()))?;

        Ok(Self {
            model,
            dims,
            api_key,
            client,
            max_retries: config.max_retries,
        })
    }

    async fn request_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s, 8s, ...
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post("https://api.openai.com/v1/embeddings")
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response
                            .json()
                            .await
                            .map_err(|e| Error::EmbeddingUnavailable(e.to_string()))?;
                        return self.parse_response(&json, texts.len());
                    }

                    let body_text = response.text().await.unwrap_or_default();

                    // Rate limited or server error — retry
                    if status.as_u16() == 429 || status.is_server_error() {
                        tracing::warn!(status = %status, attempt, "embedding request retryable failure");
                        last_err = Some(Error::EmbeddingUnavailable(format!(
                            "OpenAI API error {}: {}",
                            status, body_text
                        )));
                        continue;
                    }

                    // Client error (not 429) — don't retry
                    return Err(Error::EmbeddingUnavailable(format!(
                        "OpenAI API error {}: {}",
                        status, body_text
                    )));
                }
                Err(e) => {
                    tracing::warn!(error = %e, attempt, "embedding request network failure");
                    last_err = Some(Error::EmbeddingUnavailable(e.to_string()));
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| {
            Error::EmbeddingUnavailable("embedding failed after retries".to_string())
        }))
    }

    fn parse_response(&self, json: &serde_json::Value, expected: usize) -> Result<Vec<Vec<f32>>> {
        let data = json.get("data").and_then(|d| d.as_array()).ok_or_else(|| {
            Error::EmbeddingUnavailable("invalid OpenAI response: missing data array".to_string())
        })?;

        if data.len() != expected {
            return Err(Error::EmbeddingUnavailable(format!(
                "invalid OpenAI response: {} embeddings for {} inputs",
                data.len(),
                expected
            )));
        }

        // Order by the response's index field to match input order.
        let mut indexed: Vec<(usize, Vec<f32>)> = Vec::with_capacity(data.len());
        for item in data {
            let idx = item.get("index").and_then(|i| i.as_u64()).unwrap_or(0) as usize;
            let embedding = item
                .get("embedding")
                .and_then(|e| e.as_array())
                .ok_or_else(|| {
                    Error::EmbeddingUnavailable(
                        "invalid OpenAI response: missing embedding".to_string(),
                    )
                })?;
            let vec: Vec<f32> = embedding
                .iter()
                .map(|v| v.as_f64().unwrap_or(0.0) as f32)
                .collect();
            if vec.len() != self.dims {
                return Err(Error::DimensionMismatch {
                    expected: self.dims,
                    actual: vec.len(),
                });
            }
            indexed.push((idx, vec));
        }
        indexed.sort_by_key(|(idx, _)| *idx);
        Ok(indexed.into_iter().map(|(_, v)| v).collect())
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.request_batch(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| Error::EmbeddingUnavailable("empty embedding response".to_string()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.request_batch(texts).await
    }
}

// ============ Vector byte codec ============

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// Each `f32` is stored as 4 bytes in little-endian order, producing a BLOB
/// of `vec.len() × 4` bytes. The round-trip through [`blob_to_vec`] is
/// bit-for-bit exact, which is what makes persisted indexes reproduce
/// identical search results.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
///
/// Reverses [`vec_to_blob`]: reads 4-byte little-endian `f32` values.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

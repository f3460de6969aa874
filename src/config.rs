//! TOML configuration parsing and validation.
//!
//! Everything the pipeline needs arrives through [`Config`] — there is no
//! ambient global state. The index handle, embedder, and generator are all
//! constructed from these values and passed explicitly to the components
//! that need them.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub index: IndexConfig,
    #[serde(default)]
    pub corpus: Option<CorpusConfig>,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generator: GeneratorConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// Path of the persisted index file.
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CorpusConfig {
    /// Root directory of normalized corpus files.
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*.md".to_string(), "**/*.txt".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_overlap_tokens")]
    pub overlap_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            overlap_tokens: default_overlap_tokens(),
        }
    }
}

fn default_max_tokens() -> usize {
    700
}
fn default_overlap_tokens() -> usize {
    80
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Number of fragments to retrieve per query.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Relevance floor: fragments scoring below this are not evidence.
    ///
    /// The default is calibrated for the local hash embedder, where unrelated
    /// text scores near 0.0. Re-tune when switching embedding models; this is
    /// the knob that decides answerable vs. declining, never a hidden
    /// library default.
    #[serde(default = "default_min_score")]
    pub min_score: f32,
    /// Similarity metric: `cosine` (default) or `dot`.
    #[serde(default = "default_metric")]
    pub metric: String,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            min_score: default_min_score(),
            metric: default_metric(),
        }
    }
}

fn default_top_k() -> usize {
    4
}
fn default_min_score() -> f32 {
    0.25
}
fn default_metric() -> String {
    "cosine".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ContextConfig {
    /// Grounding context budget in estimated tokens.
    #[serde(default = "default_context_tokens")]
    pub max_tokens: usize,
    /// Span-overlap fraction above which two fragments from the same
    /// document count as near-duplicates.
    #[serde(default = "default_dedup_overlap")]
    pub dedup_overlap: f32,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_context_tokens(),
            dedup_overlap: default_dedup_overlap(),
        }
    }
}

fn default_context_tokens() -> usize {
    1800
}
fn default_dedup_overlap() -> f32 {
    0.5
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_embedding_provider() -> String {
    "local".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct GeneratorConfig {
    #[serde(default = "default_generator_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_generator_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            provider: default_generator_provider(),
            model: None,
            max_retries: default_max_retries(),
            timeout_secs: default_generator_timeout_secs(),
        }
    }
}

fn default_generator_provider() -> String {
    "extractive".to_string()
}
fn default_generator_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    /// Number of recent history messages included in the prompt.
    #[serde(default = "default_history_window")]
    pub history_window: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            history_window: default_history_window(),
        }
    }
}

fn default_history_window() -> usize {
    8
}

/// Load and validate a configuration file.
///
/// All validation failures are [`Error::InvalidConfig`] — caller bugs,
/// never retried.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::InvalidConfig(format!("failed to read config file {}: {}", path.display(), e))
    })?;

    let config: Config = toml::from_str(&content)
        .map_err(|e| Error::InvalidConfig(format!("failed to parse config file: {}", e)))?;

    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.chunking.max_tokens == 0 {
        return Err(Error::InvalidConfig(
            "chunking.max_tokens must be > 0".to_string(),
        ));
    }
    if config.chunking.overlap_tokens >= config.chunking.max_tokens {
        return Err(Error::InvalidConfig(
            "chunking.overlap_tokens must be smaller than chunking.max_tokens".to_string(),
        ));
    }

    if config.retrieval.top_k == 0 {
        return Err(Error::InvalidConfig(
            "retrieval.top_k must be >= 1".to_string(),
        ));
    }
    if !(-1.0..=1.0).contains(&config.retrieval.min_score) {
        return Err(Error::InvalidConfig(
            "retrieval.min_score must be in [-1.0, 1.0]".to_string(),
        ));
    }
    match config.retrieval.metric.as_str() {
        "cosine" | "dot" => {}
        other => {
            return Err(Error::InvalidConfig(format!(
                "unknown retrieval.metric: '{}'. Use cosine or dot.",
                other
            )))
        }
    }

    if config.context.max_tokens == 0 {
        return Err(Error::InvalidConfig(
            "context.max_tokens must be > 0".to_string(),
        ));
    }
    if !(0.0..=1.0).contains(&config.context.dedup_overlap) {
        return Err(Error::InvalidConfig(
            "context.dedup_overlap must be in [0.0, 1.0]".to_string(),
        ));
    }

    match config.embedding.provider.as_str() {
        "local" => {}
        "openai" => {
            if config.embedding.model.is_none() {
                return Err(Error::InvalidConfig(
                    "embedding.model must be set when provider is 'openai'".to_string(),
                ));
            }
            if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
                return Err(Error::InvalidConfig(
                    "embedding.dims must be > 0 when provider is 'openai'".to_string(),
                ));
            }
        }
        other => {
            return Err(Error::InvalidConfig(format!(
                "unknown embedding provider: '{}'. Use local or openai.",
                other
            )))
        }
    }
    if let Some(0) = config.embedding.dims {
        return Err(Error::InvalidConfig(
            "embedding.dims must be > 0".to_string(),
        ));
    }
    if config.embedding.batch_size == 0 {
        return Err(Error::InvalidConfig(
            "embedding.batch_size must be >= 1".to_string(),
        ));
    }

    match config.generator.provider.as_str() {
        "extractive" => {}
        "openai" => {
            if config.generator.model.is_none() {
                return Err(Error::InvalidConfig(
                    "generator.model must be set when provider is 'openai'".to_string(),
                ));
            }
        }
        other => {
            return Err(Error::InvalidConfig(format!(
                "unknown generator provider: '{}'. Use extractive or openai.",
                other
            )))
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_str: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_str)
            .map_err(|e| Error::InvalidConfig(format!("failed to parse config file: {}", e)))?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn test_minimal_config_defaults() {
        let cfg = parse(r#"
            [index]
            path = "data/index.sqlite"
        "#)
        .unwrap();
        assert_eq!(cfg.chunking.max_tokens, 700);
        assert_eq!(cfg.chunking.overlap_tokens, 80);
        assert_eq!(cfg.retrieval.top_k, 4);
        assert!((cfg.retrieval.min_score - 0.25).abs() < 1e-6);
        assert_eq!(cfg.retrieval.metric, "cosine");
        assert_eq!(cfg.embedding.provider, "local");
        assert_eq!(cfg.generator.provider, "extractive");
        assert_eq!(cfg.session.history_window, 8);
    }

    #[test]
    fn test_overlap_must_be_below_max() {
        let err = parse(r#"
            [index]
            path = "data/index.sqlite"
            [chunking]
            max_tokens = 100
            overlap_tokens = 100
        "#)
        .unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn test_unknown_metric_rejected() {
        let err = parse(r#"
            [index]
            path = "data/index.sqlite"
            [retrieval]
            metric = "euclidean"
        "#)
        .unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn test_openai_embedding_requires_model_and_dims() {
        let err = parse(r#"
            [index]
            path = "data/index.sqlite"
            [embedding]
            provider = "openai"
        "#)
        .unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn test_min_score_range_enforced() {
        let err = parse(r#"
            [index]
            path = "data/index.sqlite"
            [retrieval]
            min_score = 1.5
        "#)
        .unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }
}

//! Offline index build pipeline.
//!
//! Coordinates the batch flow: corpus scan → chunking → batched embedding →
//! [`Index::build`] → persist. This is a one-shot operation; the resulting
//! index is immutable and served read-only. Re-running it produces a complete
//! replacement index — serving processes publish it atomically through
//! [`crate::index::SharedIndex`], so no reader ever sees a half-built one.

use crate::chunk::{chunk, CHARS_PER_TOKEN};
use crate::config::{ChunkingConfig, Config};
use crate::corpus::scan_corpus;
use crate::embedding::{create_embedder, Embedder};
use crate::error::{Error, Result};
use crate::index::{Index, Metric};
use crate::models::{Document, EmbeddedFragment};

/// Chunk and embed a document set into a searchable index.
///
/// Fragment texts are embedded in `batch_size` batches; vectors come back in
/// input order, so fragment insertion order (document order, then position
/// within each document) is preserved into the index.
pub async fn build_index(
    documents: Vec<Document>,
    embedder: &dyn Embedder,
    chunking: &ChunkingConfig,
    metric: Metric,
    batch_size: usize,
) -> Result<Index> {
    if batch_size == 0 {
        return Err(Error::InvalidConfig(
            "embedding batch size must be >= 1".to_string(),
        ));
    }

    let max_chars = chunking.max_tokens * CHARS_PER_TOKEN;
    let overlap_chars = chunking.overlap_tokens * CHARS_PER_TOKEN;

    let mut fragments = Vec::new();
    for document in &documents {
        fragments.extend(chunk(document, max_chars, overlap_chars)?);
    }

    tracing::info!(
        documents = documents.len(),
        fragments = fragments.len(),
        model = embedder.model_name(),
        "embedding corpus"
    );

    let texts: Vec<String> = fragments.iter().map(|f| f.text.clone()).collect();
    let mut vectors = Vec::with_capacity(texts.len());
    for batch in texts.chunks(batch_size) {
        vectors.extend(embedder.embed_batch(batch).await?);
    }

    let embedded: Vec<EmbeddedFragment> = fragments
        .into_iter()
        .zip(vectors)
        .map(|(fragment, vector)| EmbeddedFragment::new(fragment, vector))
        .collect();

    Index::build(documents, embedded, metric, embedder.model_name())
}

/// CLI entry point for `cqa build`.
pub async fn run_build(config: &Config, dry_run: bool) -> anyhow::Result<()> {
    let documents = scan_corpus(config)?;

    if dry_run {
        let max_chars = config.chunking.max_tokens * CHARS_PER_TOKEN;
        let overlap_chars = config.chunking.overlap_tokens * CHARS_PER_TOKEN;
        let mut total_fragments = 0usize;
        for document in &documents {
            total_fragments += chunk(document, max_chars, overlap_chars)?.len();
        }
        println!("build (dry-run)");
        println!("  documents found: {}", documents.len());
        println!("  estimated fragments: {}", total_fragments);
        return Ok(());
    }

    let embedder = create_embedder(&config.embedding)?;
    let metric = Metric::from_name(&config.retrieval.metric)
        .ok_or_else(|| Error::InvalidConfig(format!(
            "unknown retrieval.metric: '{}'",
            config.retrieval.metric
        )))?;

    let index = build_index(
        documents,
        embedder.as_ref(),
        &config.chunking,
        metric,
        config.embedding.batch_size,
    )
    .await?;

    index.persist(&config.index.path).await?;

    println!("build ok");
    println!("  documents: {}", index.document_count());
    println!("  fragments: {}", index.fragment_count());
    println!("  dims: {}", index.dims());
    println!("  metric: {}", index.metric().as_str());
    println!("  index: {}", config.index.path.display());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedder;

    fn docs() -> Vec<Document> {
        vec![
            Document::new("file://a.md", "Rust ownership prevents data races at compile time.", 0),
            Document::new("file://b.md", "Snowpark lets you write data pipelines in Python.", 0),
        ]
    }

    #[tokio::test]
    async fn test_build_index_end_to_end() {
        let embedder = HashEmbedder::new(64);
        let index = build_index(
            docs(),
            &embedder,
            &ChunkingConfig::default(),
            Metric::Cosine,
            16,
        )
        .await
        .unwrap();

        assert_eq!(index.document_count(), 2);
        assert_eq!(index.fragment_count(), 2);
        assert_eq!(index.dims(), 64);
        assert_eq!(index.model(), "local-hash-v1");
    }

    #[tokio::test]
    async fn test_build_index_empty_corpus_rejected() {
        let embedder = HashEmbedder::new(64);
        let result = build_index(
            Vec::new(),
            &embedder,
            &ChunkingConfig::default(),
            Metric::Cosine,
            16,
        )
        .await;
        assert!(matches!(result, Err(Error::EmptyCorpus)));
    }

    #[tokio::test]
    async fn test_batch_size_must_be_positive() {
        let embedder = HashEmbedder::new(64);
        let result = build_index(
            docs(),
            &embedder,
            &ChunkingConfig::default(),
            Metric::Cosine,
            0,
        )
        .await;
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_small_batches_equal_single_batch() {
        let embedder = HashEmbedder::new(64);
        let a = build_index(docs(), &embedder, &ChunkingConfig::default(), Metric::Cosine, 1)
            .await
            .unwrap();
        let b = build_index(docs(), &embedder, &ChunkingConfig::default(), Metric::Cosine, 64)
            .await
            .unwrap();

        let query = embedder.embed("What is Snowpark?").await.unwrap();
        let ra = a.search(&query, 4, 0.0).unwrap();
        let rb = b.search(&query, 4, 0.0).unwrap();
        assert_eq!(ra.len(), rb.len());
        for (x, y) in ra.iter().zip(rb.iter()) {
            assert_eq!(x.fragment.id, y.fragment.id);
            assert_eq!(x.score, y.score);
        }
    }
}

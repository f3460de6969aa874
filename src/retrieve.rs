//! Query-time retrieval: embed the query, search the index, apply the floor.
//!
//! The [`Retriever`] is a stateless function over `(query, index)` — it owns
//! neither session nor index lifetime, and it adds no error kinds of its own:
//! whatever the embedder or index fail with passes through unchanged.
//!
//! The relevance floor applied here is the single authoritative signal for
//! "answerable": a query whose best fragment scores below `min_score` has no
//! evidence in the corpus, and the session layer declines instead of
//! guessing.

use std::sync::Arc;

use crate::config::Config;
use crate::embedding::{create_embedder, Embedder};
use crate::error::Result;
use crate::index::Index;
use crate::models::RetrievalResult;

/// Embeds queries and delegates to [`Index::search`].
pub struct Retriever {
    embedder: Arc<dyn Embedder>,
}

impl Retriever {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self { embedder }
    }

    /// Retrieve the top-`k` fragments for `query` scoring at least `min_score`.
    pub async fn retrieve(
        &self,
        query: &str,
        index: &Index,
        k: usize,
        min_score: f32,
    ) -> Result<Vec<RetrievalResult>> {
        let query_vec = self.embedder.embed(query).await?;
        let results = index.search(&query_vec, k, min_score)?;
        tracing::debug!(
            query_len = query.len(),
            hits = results.len(),
            k,
            min_score,
            "retrieval complete"
        );
        Ok(results)
    }
}

/// CLI entry point for `cqa search`.
pub async fn run_search(
    config: &Config,
    query: &str,
    k: Option<usize>,
    min_score: Option<f32>,
) -> anyhow::Result<()> {
    let index = Index::load(&config.index.path).await?;
    let embedder = create_embedder(&config.embedding)?;
    let retriever = Retriever::new(embedder);

    let k = k.unwrap_or(config.retrieval.top_k);
    let min_score = min_score.unwrap_or(config.retrieval.min_score);

    let results = retriever.retrieve(query, &index, k, min_score).await?;

    if results.is_empty() {
        println!("No results above the relevance floor ({:.2}).", min_score);
        return Ok(());
    }

    println!("results: {}", results.len());
    for (i, result) in results.iter().enumerate() {
        let source = index
            .document_by_id(&result.fragment.document_id)
            .map(|d| d.source_uri.clone())
            .unwrap_or_else(|| result.fragment.document_id.clone());
        println!(
            "{:>3}. [{:.3}] {} ({})",
            i + 1,
            result.score,
            source,
            result.fragment.span
        );
        println!("     {}", snippet(&result.fragment.text, 160));
    }

    Ok(())
}

/// First `max_chars` characters of a text, flattened to one line.
fn snippet(text: &str, max_chars: usize) -> String {
    text.chars()
        .take(max_chars)
        .map(|c| if c == '\n' { ' ' } else { c })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::chunk;
    use crate::embedding::HashEmbedder;
    use crate::index::Metric;
    use crate::models::{Document, EmbeddedFragment};

    async fn build_index(texts: &[(&str, &str)]) -> (Index, Arc<dyn Embedder>) {
        let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder::new(256));
        let mut documents = Vec::new();
        let mut embedded = Vec::new();
        for (uri, text) in texts {
            let doc = Document::new(*uri, *text, 0);
            for fragment in chunk(&doc, 2000, 200).unwrap() {
                let vector = embedder.embed(&fragment.text).await.unwrap();
                embedded.push(EmbeddedFragment::new(fragment, vector));
            }
            documents.push(doc);
        }
        let index = Index::build(documents, embedded, Metric::Cosine, "local-hash-v1").unwrap();
        (index, embedder)
    }

    #[tokio::test]
    async fn test_identical_text_is_top_hit_at_metric_max() {
        let (index, embedder) = build_index(&[
            ("file://a.md", "Rust ownership rules prevent data races."),
            ("file://b.md", "Snowpark lets you write data pipelines in Python."),
        ])
        .await;
        let retriever = Retriever::new(embedder);

        let results = retriever
            .retrieve(
                "Snowpark lets you write data pipelines in Python.",
                &index,
                4,
                0.0,
            )
            .await
            .unwrap();

        assert!(!results.is_empty());
        assert!(results[0].fragment.text.contains("Snowpark"));
        // Identical text embeds to the identical unit vector: cosine max.
        assert!((results[0].score - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_unrelated_query_below_floor_is_empty() {
        let (index, embedder) = build_index(&[(
            "file://snowpark.md",
            "Snowpark lets you write data pipelines in Python inside Snowflake.",
        )])
        .await;
        let retriever = Retriever::new(embedder);

        let results = retriever
            .retrieve("What is the capital of France?", &index, 4, 0.25)
            .await
            .unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_related_query_clears_floor() {
        let (index, embedder) = build_index(&[(
            "file://snowpark.md",
            "Snowpark lets you write data pipelines in Python inside Snowflake.",
        )])
        .await;
        let retriever = Retriever::new(embedder);

        let results = retriever
            .retrieve("What is Snowpark?", &index, 4, 0.25)
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].score >= 0.25);
    }
}

//! The persisted similarity index and its search algorithm.
//!
//! An [`Index`] is built once from a batch of embedded fragments, then served
//! read-only: `search` takes `&self`, so a built (or loaded) index is safe
//! for concurrent use from many sessions without locking. Rebuilds go through
//! [`SharedIndex`], which publishes a complete new index with a single
//! pointer swap — no reader ever observes a half-built one.
//!
//! # Search
//!
//! Exact brute-force scan over all fragments. Results are ordered by
//! descending score with ties broken by fragment insertion order — stable and
//! deterministic, never hash order. An empty result set is a normal outcome
//! ("no evidence"), not an error.
//!
//! # Persistence
//!
//! One SQLite file is the index blob:
//!
//! | Table | Contents |
//! |-------|----------|
//! | `manifest` | single row: dims, metric, model, build timestamp, fragment count |
//! | `documents` | source documents the index was built from |
//! | `fragments` | fragment records with spans, in insertion order |
//! | `vectors` | per-fragment little-endian f32 BLOBs |
//!
//! Vectors round-trip bit-for-bit, so a loaded index returns results
//! identical to the index that was persisted. Any manifest inconsistency
//! fails the load with [`Error::CorruptIndex`].

use std::path::Path;
use std::sync::{Arc, RwLock};

use sqlx::Row;

use crate::db;
use crate::embedding::{blob_to_vec, vec_to_blob};
use crate::error::{Error, Result};
use crate::models::{Document, EmbeddedFragment, Fragment, RetrievalResult, Span};

/// Similarity measure used to score query vectors against the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    /// Cosine similarity in `[-1.0, 1.0]`; zero-norm vectors score `0.0`.
    Cosine,
    /// Raw dot product, unbounded.
    Dot,
}

impl Metric {
    pub fn from_name(name: &str) -> Option<Metric> {
        match name {
            "cosine" => Some(Metric::Cosine),
            "dot" => Some(Metric::Dot),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Cosine => "cosine",
            Metric::Dot => "dot",
        }
    }

    fn score(&self, query: &[f32], query_norm: f32, vector: &[f32], norm: f32) -> f32 {
        let dot: f32 = query.iter().zip(vector.iter()).map(|(x, y)| x * y).sum();
        match self {
            Metric::Dot => dot,
            Metric::Cosine => {
                let denom = query_norm * norm;
                if denom < f32::EPSILON {
                    0.0
                } else {
                    dot / denom
                }
            }
        }
    }
}

/// An immutable set of embedded fragments with a brute-force lookup.
#[derive(Debug)]
pub struct Index {
    dims: usize,
    metric: Metric,
    model: String,
    built_at: i64,
    documents: Vec<Document>,
    fragments: Vec<Fragment>,
    vectors: Vec<Vec<f32>>,
    norms: Vec<f32>,
}

impl Index {
    /// Bulk-construct an index from embedded fragments.
    ///
    /// Fragment order is preserved and becomes the stable tiebreak order for
    /// every later search.
    ///
    /// # Errors
    ///
    /// - [`Error::EmptyCorpus`] if `embedded` is empty.
    /// - [`Error::DimensionMismatch`] if any two vectors differ in length —
    ///   mismatches are a hard error, never padded or truncated.
    pub fn build(
        documents: Vec<Document>,
        embedded: Vec<EmbeddedFragment>,
        metric: Metric,
        model: impl Into<String>,
    ) -> Result<Index> {
        if embedded.is_empty() {
            return Err(Error::EmptyCorpus);
        }
        let dims = embedded[0].vector.len();
        if dims == 0 {
            return Err(Error::InvalidConfig(
                "embedding dimensionality must be > 0".to_string(),
            ));
        }

        let mut fragments = Vec::with_capacity(embedded.len());
        let mut vectors = Vec::with_capacity(embedded.len());
        let mut norms = Vec::with_capacity(embedded.len());
        for ef in embedded {
            if ef.vector.len() != dims {
                return Err(Error::DimensionMismatch {
                    expected: dims,
                    actual: ef.vector.len(),
                });
            }
            fragments.push(ef.fragment);
            vectors.push(ef.vector);
            norms.push(ef.norm);
        }

        Ok(Index {
            dims,
            metric,
            model: model.into(),
            built_at: chrono::Utc::now().timestamp(),
            documents,
            fragments,
            vectors,
            norms,
        })
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn built_at(&self) -> i64 {
        self.built_at
    }

    pub fn document_count(&self) -> usize {
        self.documents.len()
    }

    pub fn fragment_count(&self) -> usize {
        self.fragments.len()
    }

    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    pub fn document_by_id(&self, id: &str) -> Option<&Document> {
        self.documents.iter().find(|d| d.id == id)
    }

    /// Nearest-neighbor search over all fragments.
    ///
    /// Returns up to `k` results scoring at least `min_score`, ordered by
    /// descending score with ties broken by insertion order. Returning an
    /// empty vector means "no evidence" and is not an error.
    ///
    /// # Errors
    ///
    /// [`Error::DimensionMismatch`] if the query vector's length differs
    /// from the index dimensionality.
    pub fn search(
        &self,
        query_vec: &[f32],
        k: usize,
        min_score: f32,
    ) -> Result<Vec<RetrievalResult>> {
        if query_vec.len() != self.dims {
            return Err(Error::DimensionMismatch {
                expected: self.dims,
                actual: query_vec.len(),
            });
        }

        let query_norm = query_vec.iter().map(|x| x * x).sum::<f32>().sqrt();

        let mut scored: Vec<(usize, f32)> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(i, v)| (i, self.metric.score(query_vec, query_norm, v, self.norms[i])))
            .filter(|(_, score)| *score >= min_score)
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(i, score)| RetrievalResult {
                fragment: self.fragments[i].clone(),
                score,
            })
            .collect())
    }

    /// Write the index to a SQLite file, replacing any previous index there.
    pub async fn persist(&self, path: &Path) -> Result<()> {
        // A persisted index is a build artifact: start from a clean file so
        // stale rows from an older build can never leak into this one.
        for suffix in ["", "-wal", "-shm"] {
            let sibling = append_suffix(path, suffix);
            if sibling.exists() {
                std::fs::remove_file(&sibling).map_err(|e| Error::Storage(e.to_string()))?;
            }
        }

        let pool = db::connect(path, true).await?;
        create_schema(&pool).await?;

        let mut tx = pool.begin().await?;

        sqlx::query(
            "INSERT INTO manifest (id, dims, metric, model, built_at, fragment_count)
             VALUES (1, ?, ?, ?, ?, ?)",
        )
        .bind(self.dims as i64)
        .bind(self.metric.as_str())
        .bind(&self.model)
        .bind(self.built_at)
        .bind(self.fragments.len() as i64)
        .execute(&mut *tx)
        .await?;

        for (position, doc) in self.documents.iter().enumerate() {
            sqlx::query(
                "INSERT INTO documents (id, source_uri, raw_text, fetched_at, position)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&doc.id)
            .bind(&doc.source_uri)
            .bind(&doc.raw_text)
            .bind(doc.fetched_at)
            .bind(position as i64)
            .execute(&mut *tx)
            .await?;
        }

        for (position, fragment) in self.fragments.iter().enumerate() {
            sqlx::query(
                "INSERT INTO fragments
                 (id, document_id, position, text, span_start, span_end, token_count)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&fragment.id)
            .bind(&fragment.document_id)
            .bind(position as i64)
            .bind(&fragment.text)
            .bind(fragment.span.start as i64)
            .bind(fragment.span.end as i64)
            .bind(fragment.token_count as i64)
            .execute(&mut *tx)
            .await?;

            sqlx::query("INSERT INTO vectors (fragment_id, vector) VALUES (?, ?)")
                .bind(&fragment.id)
                .bind(vec_to_blob(&self.vectors[position]))
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        pool.close().await;

        tracing::info!(
            path = %path.display(),
            fragments = self.fragments.len(),
            "index persisted"
        );
        Ok(())
    }

    /// Load a previously persisted index.
    ///
    /// # Errors
    ///
    /// [`Error::CorruptIndex`] if the file is missing, the manifest is absent
    /// or duplicated, the metric is unknown, or the fragment/vector data
    /// disagrees with the manifest.
    pub async fn load(path: &Path) -> Result<Index> {
        if !path.exists() {
            return Err(Error::CorruptIndex(format!(
                "no index file at {}",
                path.display()
            )));
        }

        let pool = db::connect(path, false).await?;
        let result = Self::load_from_pool(&pool).await;
        pool.close().await;
        result
    }

    async fn load_from_pool(pool: &sqlx::SqlitePool) -> Result<Index> {
        let manifest_rows =
            sqlx::query("SELECT dims, metric, model, built_at, fragment_count FROM manifest")
                .fetch_all(pool)
                .await
                .map_err(|e| Error::CorruptIndex(format!("manifest unreadable: {}", e)))?;

        if manifest_rows.len() != 1 {
            return Err(Error::CorruptIndex(format!(
                "expected exactly one manifest row, found {}",
                manifest_rows.len()
            )));
        }
        let manifest = &manifest_rows[0];

        let dims = manifest.get::<i64, _>("dims") as usize;
        if dims == 0 {
            return Err(Error::CorruptIndex(
                "manifest declares zero dimensionality".to_string(),
            ));
        }
        let metric_name: String = manifest.get("metric");
        let metric = Metric::from_name(&metric_name)
            .ok_or_else(|| Error::CorruptIndex(format!("unknown metric '{}'", metric_name)))?;
        let model: String = manifest.get("model");
        let built_at: i64 = manifest.get("built_at");
        let fragment_count = manifest.get::<i64, _>("fragment_count") as usize;

        let doc_rows = sqlx::query(
            "SELECT id, source_uri, raw_text, fetched_at FROM documents ORDER BY position",
        )
        .fetch_all(pool)
        .await?;
        let documents: Vec<Document> = doc_rows
            .iter()
            .map(|row| Document {
                id: row.get("id"),
                source_uri: row.get("source_uri"),
                raw_text: row.get("raw_text"),
                fetched_at: row.get("fetched_at"),
            })
            .collect();

        let frag_rows = sqlx::query(
            "SELECT f.id, f.document_id, f.text, f.span_start, f.span_end, f.token_count,
                    v.vector
             FROM fragments f
             JOIN vectors v ON v.fragment_id = f.id
             ORDER BY f.position",
        )
        .fetch_all(pool)
        .await?;

        if frag_rows.len() != fragment_count {
            return Err(Error::CorruptIndex(format!(
                "manifest declares {} fragments, found {}",
                fragment_count,
                frag_rows.len()
            )));
        }

        let mut fragments = Vec::with_capacity(frag_rows.len());
        let mut vectors = Vec::with_capacity(frag_rows.len());
        let mut norms = Vec::with_capacity(frag_rows.len());

        for row in &frag_rows {
            let blob: Vec<u8> = row.get("vector");
            if blob.len() != dims * 4 {
                return Err(Error::CorruptIndex(format!(
                    "vector blob of {} bytes does not match {} dims",
                    blob.len(),
                    dims
                )));
            }
            let vector = blob_to_vec(&blob);
            let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();

            fragments.push(Fragment {
                id: row.get("id"),
                document_id: row.get("document_id"),
                text: row.get("text"),
                span: Span::new(
                    row.get::<i64, _>("span_start") as usize,
                    row.get::<i64, _>("span_end") as usize,
                ),
                token_count: row.get::<i64, _>("token_count") as usize,
            });
            vectors.push(vector);
            norms.push(norm);
        }

        Ok(Index {
            dims,
            metric,
            model,
            built_at,
            documents,
            fragments,
            vectors,
            norms,
        })
    }
}

async fn create_schema(pool: &sqlx::SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS manifest (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            dims INTEGER NOT NULL,
            metric TEXT NOT NULL,
            model TEXT NOT NULL,
            built_at INTEGER NOT NULL,
            fragment_count INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            source_uri TEXT NOT NULL,
            raw_text TEXT NOT NULL,
            fetched_at INTEGER NOT NULL,
            position INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS fragments (
            id TEXT PRIMARY KEY,
            document_id TEXT NOT NULL,
            position INTEGER NOT NULL,
            text TEXT NOT NULL,
            span_start INTEGER NOT NULL,
            span_end INTEGER NOT NULL,
            token_count INTEGER NOT NULL,
            FOREIGN KEY (document_id) REFERENCES documents(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS vectors (
            fragment_id TEXT PRIMARY KEY,
            vector BLOB NOT NULL,
            FOREIGN KEY (fragment_id) REFERENCES fragments(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

fn append_suffix(path: &Path, suffix: &str) -> std::path::PathBuf {
    if suffix.is_empty() {
        return path.to_path_buf();
    }
    let mut s = path.as_os_str().to_os_string();
    s.push(suffix);
    std::path::PathBuf::from(s)
}

/// Atomically swappable handle to the serving index.
///
/// Readers grab an `Arc` via [`SharedIndex::current`] and search without any
/// lock held; a rebuild publishes its finished index with
/// [`SharedIndex::swap`]. Readers holding the old `Arc` keep using it until
/// they finish their turn.
pub struct SharedIndex {
    inner: RwLock<Arc<Index>>,
}

impl SharedIndex {
    pub fn new(index: Index) -> Self {
        Self {
            inner: RwLock::new(Arc::new(index)),
        }
    }

    /// The currently published index.
    pub fn current(&self) -> Arc<Index> {
        self.inner.read().unwrap().clone()
    }

    /// Publish a fully built replacement index.
    pub fn swap(&self, index: Index) {
        *self.inner.write().unwrap() = Arc::new(index);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frag(id: &str, doc: &str, text: &str) -> Fragment {
        Fragment {
            id: id.to_string(),
            document_id: doc.to_string(),
            text: text.to_string(),
            span: Span::new(0, text.len()),
            token_count: 1,
        }
    }

    fn embedded(id: &str, vector: Vec<f32>) -> EmbeddedFragment {
        EmbeddedFragment::new(frag(id, "doc", id), vector)
    }

    fn two_dim_index() -> Index {
        Index::build(
            vec![Document::new("file://doc", "doc", 0)],
            vec![
                embedded("a", vec![1.0, 0.0]),
                embedded("b", vec![1.0, 0.0]),
                embedded("c", vec![0.0, 1.0]),
            ],
            Metric::Cosine,
            "test",
        )
        .unwrap()
    }

    #[test]
    fn test_build_empty_corpus_rejected() {
        let result = Index::build(Vec::new(), Vec::new(), Metric::Cosine, "test");
        assert!(matches!(result, Err(Error::EmptyCorpus)));
    }

    #[test]
    fn test_build_dimension_mismatch_rejected() {
        let result = Index::build(
            Vec::new(),
            vec![
                embedded("a", vec![1.0, 0.0]),
                embedded("b", vec![1.0, 0.0, 0.0]),
            ],
            Metric::Cosine,
            "test",
        );
        assert!(matches!(
            result,
            Err(Error::DimensionMismatch {
                expected: 2,
                actual: 3
            })
        ));
    }

    #[test]
    fn test_search_descending_with_stable_ties() {
        let index = two_dim_index();
        let results = index.search(&[1.0, 0.0], 10, 0.5).unwrap();
        // a and b tie at cosine 1.0; insertion order breaks the tie.
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].fragment.id, "a");
        assert_eq!(results[1].fragment.id, "b");
        assert!((results[0].score - 1.0).abs() < 1e-6);
        for pair in results.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[test]
    fn test_search_floor_filters() {
        let index = two_dim_index();
        // c is orthogonal to the query: cosine 0.0, below the floor.
        let results = index.search(&[1.0, 0.0], 10, 0.5).unwrap();
        assert!(results.iter().all(|r| r.fragment.id != "c"));

        // Nothing clears an impossible floor: empty result, not an error.
        let none = index.search(&[1.0, 0.0], 10, 1.1).unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn test_search_returns_fewer_than_k() {
        let index = two_dim_index();
        let results = index.search(&[1.0, 0.0], 100, 0.5).unwrap();
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn test_search_query_dimension_checked() {
        let index = two_dim_index();
        let result = index.search(&[1.0, 0.0, 0.0], 4, 0.0);
        assert!(matches!(
            result,
            Err(Error::DimensionMismatch {
                expected: 2,
                actual: 3
            })
        ));
    }

    #[test]
    fn test_zero_norm_vector_scores_zero() {
        let index = Index::build(
            Vec::new(),
            vec![embedded("z", vec![0.0, 0.0]), embedded("a", vec![1.0, 0.0])],
            Metric::Cosine,
            "test",
        )
        .unwrap();
        let results = index.search(&[1.0, 0.0], 10, -1.0).unwrap();
        let z = results.iter().find(|r| r.fragment.id == "z").unwrap();
        assert_eq!(z.score, 0.0);
    }

    #[test]
    fn test_dot_metric() {
        let index = Index::build(
            Vec::new(),
            vec![embedded("a", vec![2.0, 0.0]), embedded("b", vec![1.0, 0.0])],
            Metric::Dot,
            "test",
        )
        .unwrap();
        let results = index.search(&[1.0, 0.0], 10, 0.0).unwrap();
        assert_eq!(results[0].fragment.id, "a");
        assert!((results[0].score - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_metric_names_roundtrip() {
        assert_eq!(Metric::from_name("cosine"), Some(Metric::Cosine));
        assert_eq!(Metric::from_name("dot"), Some(Metric::Dot));
        assert_eq!(Metric::from_name("euclidean"), None);
        assert_eq!(Metric::Cosine.as_str(), "cosine");
    }

    #[test]
    fn test_shared_index_swap() {
        let shared = SharedIndex::new(two_dim_index());
        let before = shared.current();
        assert_eq!(before.fragment_count(), 3);

        let replacement = Index::build(
            Vec::new(),
            vec![embedded("only", vec![1.0, 0.0])],
            Metric::Cosine,
            "test",
        )
        .unwrap();
        shared.swap(replacement);

        assert_eq!(shared.current().fragment_count(), 1);
        // The old Arc stays valid for readers still holding it.
        assert_eq!(before.fragment_count(), 3);
        assert!(before.search(&[1.0, 0.0], 1, 0.0).is_ok());
    }
}

//! Core data models used throughout corpus-qa.
//!
//! These types represent the documents, fragments, and conversation messages
//! that flow through the ingestion and retrieval pipeline.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A normalized source document, as delivered by the fetcher boundary.
///
/// `raw_text` is assumed to be already normalized (markup stripped); the
/// chunker does not re-parse it. Documents are immutable once created and
/// identified by their source URI: `id` is derived deterministically from
/// `source_uri` so re-ingesting the same corpus is idempotent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub source_uri: String,
    pub raw_text: String,
    /// Unix timestamp of when the fetcher acquired the text.
    pub fetched_at: i64,
}

impl Document {
    /// Create a document with an id derived from its source URI.
    pub fn new(source_uri: impl Into<String>, raw_text: impl Into<String>, fetched_at: i64) -> Self {
        let source_uri = source_uri.into();
        Self {
            id: document_id(&source_uri),
            source_uri,
            raw_text: raw_text.into(),
            fetched_at,
        }
    }
}

/// Derive a stable document id from a source URI (SHA-256 hex prefix).
pub fn document_id(source_uri: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_uri.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..16].to_string()
}

/// A byte range into a document's `raw_text`, end exclusive.
///
/// Always lies on UTF-8 character boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Number of bytes shared with another span.
    pub fn overlap(&self, other: &Span) -> usize {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        end.saturating_sub(start)
    }
}

impl std::fmt::Display for Span {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// A bounded slice of one document's text; the unit of retrieval.
///
/// Produced by the chunker. Fragment ids are deterministic
/// (`{document_id}:{index}`), so identical input yields identical fragments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fragment {
    pub id: String,
    pub document_id: String,
    pub text: String,
    pub span: Span,
    /// Estimated token count (chars / 4 heuristic), used for context budgeting.
    pub token_count: usize,
}

/// A fragment paired with its embedding vector.
///
/// One-to-one with [`Fragment`]; the norm is precomputed for cosine scoring.
#[derive(Debug, Clone)]
pub struct EmbeddedFragment {
    pub fragment: Fragment,
    pub vector: Vec<f32>,
    pub norm: f32,
}

impl EmbeddedFragment {
    pub fn new(fragment: Fragment, vector: Vec<f32>) -> Self {
        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        Self {
            fragment,
            vector,
            norm,
        }
    }
}

/// A single scored hit from an index search. Ephemeral, never persisted.
#[derive(Debug, Clone)]
pub struct RetrievalResult {
    pub fragment: Fragment,
    /// Similarity under the index's metric (cosine: `[-1, 1]`).
    pub score: f32,
}

/// A pointer back to the source text backing part of an answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub document_id: String,
    pub span: Span,
}

/// Who authored a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// One entry in a session's ordered message history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub text: String,
    /// Citations for assistant messages that were grounded in the corpus.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub citations: Vec<Citation>,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            citations: Vec::new(),
        }
    }

    pub fn assistant(text: impl Into<String>, citations: Vec<Citation>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
            citations,
        }
    }
}

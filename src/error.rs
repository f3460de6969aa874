//! Error taxonomy for the retrieval-and-grounding pipeline.
//!
//! Every failure mode the library can produce is a variant of [`Error`].
//! The split that matters operationally:
//!
//! - **Caller bugs** ([`Error::InvalidConfig`]) and **data/build errors**
//!   ([`Error::EmptyCorpus`], [`Error::DimensionMismatch`],
//!   [`Error::CorruptIndex`]) are fatal and never retried.
//! - **Transient backend failures** ([`Error::EmbeddingUnavailable`],
//!   [`Error::GenerationFailed`]) are retried with bounded backoff inside
//!   the providers before they surface here.
//! - [`Error::RetrievalFailed`] wraps whatever went wrong during the
//!   retrieval phase of a session turn; the session rolls back to idle and
//!   the turn can be retried.
//! - [`Error::SessionBusy`] is a concurrency guard, not a data error.
//!
//! "No relevant evidence found" is *not* an error anywhere in this crate —
//! it is an empty result set and, at the session level, the declining state.

use thiserror::Error;

/// Convenience alias used throughout the library.
pub type Result<T> = std::result::Result<T, Error>;

/// All errors produced by the corpus-qa pipeline.
#[derive(Debug, Error)]
pub enum Error {
    /// Bad chunking/retrieval/provider parameters. A caller bug; never retried.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// An index build was attempted over zero fragments.
    #[error("empty corpus: an index cannot be built from zero fragments")]
    EmptyCorpus,

    /// Two vectors in one index (or a query against it) disagree on dimensionality.
    #[error("dimension mismatch: expected {expected} dims, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// A persisted index could not be loaded: missing or inconsistent manifest,
    /// unknown metric, or vector data that disagrees with the manifest.
    #[error("corrupt index: {0}")]
    CorruptIndex(String),

    /// The embedding backend could not be reached or loaded, after retries.
    #[error("embedding backend unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// The generation backend failed (auth, rate limit, network), after retries.
    #[error("generation failed: {0}")]
    GenerationFailed(String),

    /// A session turn failed during the retrieval phase. History keeps the
    /// user's question and nothing else; the turn can be retried.
    #[error("retrieval failed: {source}")]
    RetrievalFailed {
        #[source]
        source: Box<Error>,
    },

    /// A new message arrived while this session was already processing a turn.
    #[error("session is busy with another turn")]
    SessionBusy,

    /// I/O or database failure while persisting or loading an index.
    #[error("index storage error: {0}")]
    Storage(String),
}

impl Error {
    /// Wrap an error raised during the retrieval phase of a session turn.
    pub fn retrieval(source: Error) -> Self {
        Error::RetrievalFailed {
            source: Box::new(source),
        }
    }

    /// Whether this failure class is worth retrying.
    ///
    /// Config, build, and corruption errors are deterministic and stay fatal;
    /// only backend failures are transient.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::EmbeddingUnavailable(_) | Error::GenerationFailed(_) => true,
            Error::RetrievalFailed { source } => source.is_transient(),
            _ => false,
        }
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

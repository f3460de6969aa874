//! # corpus-qa
//!
//! A retrieval-grounded question answering engine over a fixed document
//! corpus.
//!
//! corpus-qa ingests normalized text documents, chunks and embeds them into a
//! persisted similarity index, and answers natural-language questions *only*
//! from what that index can retrieve — declining, mechanically, whenever no
//! fragment clears the relevance floor.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────────┐   ┌───────────┐
//! │  Corpus  │──▶│   Pipeline     │──▶│  SQLite    │   (offline build)
//! │  files   │   │ Chunk + Embed │   │   index    │
//! └──────────┘   └───────────────┘   └─────┬─────┘
//!                                          │
//!    question ──▶ SessionEngine ──▶ Retriever ──▶ ContextAssembler
//!                      │                                  │
//!                      ▼                                  ▼
//!                answer + citations  ◀── Generator ◀── prompt
//!                   (or decline)
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! cqa build                         # chunk + embed the corpus into an index
//! cqa search "deployment steps"     # inspect raw retrieval
//! cqa ask "What is Snowpark?"       # one-shot grounded answer
//! cqa chat                          # interactive session
//! cqa stats                         # index manifest and counts
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`error`] | Typed error taxonomy |
//! | [`models`] | Core data types |
//! | [`corpus`] | Filesystem corpus scanner (fetcher boundary) |
//! | [`chunk`] | Overlapping sliding-window chunker |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`index`] | Persisted similarity index, search, atomic swap |
//! | [`retrieve`] | Query embedding + floor-gated retrieval |
//! | [`context`] | Grounding context assembly and citations |
//! | [`generator`] | Completion provider abstraction |
//! | [`session`] | Conversational session state machine |
//! | [`ingest`] | Offline build pipeline |
//! | [`stats`] | Index inspection |

pub mod chunk;
pub mod config;
pub mod context;
pub mod corpus;
pub mod db;
pub mod embedding;
pub mod error;
pub mod generator;
pub mod index;
pub mod ingest;
pub mod models;
pub mod retrieve;
pub mod session;
pub mod stats;

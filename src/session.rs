//! The conversational session state machine.
//!
//! A [`SessionEngine`] owns exactly one conversation: its ordered message
//! history and the `Idle → Retrieving → Answerable | Declining → Idle`
//! state walk of each turn. The distinction between `Answerable` and
//! `Declining` is the core correctness property of the whole system — it
//! mechanically prevents answering from outside the corpus, instead of
//! hoping the model declines on its own.
//!
//! # Turn lifecycle
//!
//! 1. A user message arrives. If another turn is in flight the call is
//!    rejected with [`Error::SessionBusy`] (turns within one session are
//!    strictly sequential; distinct sessions never contend).
//! 2. The question is appended to history and retrieval runs under a
//!    timeout. Failure here surfaces as [`Error::RetrievalFailed`] and the
//!    session returns to idle — history keeps the question and nothing else,
//!    so the turn can be retried.
//! 3. Zero qualifying results (or nothing fitting the context budget) means
//!    **declining**: the fixed [`DECLINE_MESSAGE`] is appended and returned.
//!    The generator is not consulted — that is the chosen policy, and the
//!    decline is a normal outcome, never an error.
//! 4. Otherwise **answerable**: the assembled context, a bounded history
//!    window, and the question go to the generator as one structured
//!    [`PromptPayload`]. The answer is appended with its citations.
//!
//! The engine receives its index handle, embedder, and generator as explicit
//! constructor parameters. Nothing here reads ambient globals, so any number
//! of sessions can serve concurrently against the same shared index.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use uuid::Uuid;

use crate::config::Config;
use crate::context::{assemble, AssembledContext};
use crate::embedding::{create_embedder, Embedder};
use crate::error::{Error, Result};
use crate::generator::{create_generator, Generator, PromptPayload};
use crate::index::{Index, SharedIndex};
use crate::models::{Citation, Message};
use crate::retrieve::Retriever;

/// Fixed grounding instruction carried by every prompt.
pub const SYSTEM_INSTRUCTION: &str = "You answer questions using only the provided context. \
If the context does not address the question, decline to answer and say so plainly. \
Never use knowledge from outside the context.";

/// Fixed response for turns with no qualifying evidence.
pub const DECLINE_MESSAGE: &str = "I could not find anything in the indexed documents that \
answers your question. Please try other resources.";

/// Where a session currently is in its turn walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Retrieving,
    Answerable,
    Declining,
}

/// Tuning for a session, derived from config and passed explicitly.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub top_k: usize,
    pub min_score: f32,
    pub max_context_tokens: usize,
    pub dedup_overlap: f32,
    pub history_window: usize,
    pub retrieve_timeout: Duration,
    pub generate_timeout: Duration,
}

impl SessionOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            top_k: config.retrieval.top_k,
            min_score: config.retrieval.min_score,
            max_context_tokens: config.context.max_tokens,
            dedup_overlap: config.context.dedup_overlap,
            history_window: config.session.history_window,
            retrieve_timeout: Duration::from_secs(config.embedding.timeout_secs),
            generate_timeout: Duration::from_secs(config.generator.timeout_secs),
        }
    }
}

/// What one successful turn produced.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub text: String,
    pub citations: Vec<Citation>,
    /// True when the turn ended in the declining state.
    pub declined: bool,
}

struct SessionInner {
    history: Vec<Message>,
    state: SessionState,
}

/// One conversation against one (shared) index.
pub struct SessionEngine {
    session_id: String,
    index: Arc<SharedIndex>,
    retriever: Retriever,
    generator: Arc<dyn Generator>,
    options: SessionOptions,
    inner: Mutex<SessionInner>,
}

impl SessionEngine {
    pub fn new(
        index: Arc<SharedIndex>,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
        options: SessionOptions,
    ) -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            index,
            retriever: Retriever::new(embedder),
            generator,
            options,
            inner: Mutex::new(SessionInner {
                history: Vec::new(),
                state: SessionState::Idle,
            }),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Current state; [`SessionState::Idle`] between turns.
    pub async fn state(&self) -> SessionState {
        self.inner.lock().await.state
    }

    /// Snapshot of the message history.
    pub async fn history(&self) -> Vec<Message> {
        self.inner.lock().await.history.clone()
    }

    /// Tear the session down, returning the transcript.
    pub fn finish(self) -> Vec<Message> {
        self.inner.into_inner().history
    }

    /// Process one user turn.
    ///
    /// # Errors
    ///
    /// - [`Error::SessionBusy`] if another turn is still in flight.
    /// - [`Error::RetrievalFailed`] if embedding or search failed or timed
    ///   out; history keeps the user's question with no assistant reply.
    /// - [`Error::GenerationFailed`] if the generator failed or timed out;
    ///   history likewise keeps only the question.
    pub async fn handle_turn(&self, user_text: &str) -> Result<TurnOutcome> {
        let mut session = self.inner.try_lock().map_err(|_| Error::SessionBusy)?;

        session.history.push(Message::user(user_text));
        session.state = SessionState::Retrieving;
        tracing::debug!(session = %self.session_id, "turn started");

        let index = self.index.current();
        let retrieved = tokio::time::timeout(
            self.options.retrieve_timeout,
            self.retriever.retrieve(
                user_text,
                &index,
                self.options.top_k,
                self.options.min_score,
            ),
        )
        .await;

        let results = match retrieved {
            Err(_) => {
                session.state = SessionState::Idle;
                return Err(Error::retrieval(Error::EmbeddingUnavailable(format!(
                    "retrieval timed out after {:?}",
                    self.options.retrieve_timeout
                ))));
            }
            Ok(Err(err)) => {
                session.state = SessionState::Idle;
                return Err(Error::retrieval(err));
            }
            Ok(Ok(results)) => results,
        };

        let assembled = assemble(
            &results,
            self.options.max_context_tokens,
            self.options.dedup_overlap,
        );

        let (context_text, citations) = match assembled {
            AssembledContext::Empty => {
                session.state = SessionState::Declining;
                tracing::info!(session = %self.session_id, "no qualifying evidence, declining");
                session.history.push(Message::assistant(DECLINE_MESSAGE, Vec::new()));
                session.state = SessionState::Idle;
                return Ok(TurnOutcome {
                    text: DECLINE_MESSAGE.to_string(),
                    citations: Vec::new(),
                    declined: true,
                });
            }
            AssembledContext::Grounded { text, citations } => (text, citations),
        };

        session.state = SessionState::Answerable;
        let prompt = PromptPayload {
            system_instruction: SYSTEM_INSTRUCTION.to_string(),
            context_text,
            citations: citations.clone(),
            history_window: history_window(&session.history, self.options.history_window),
            question: user_text.to_string(),
        };

        let answer = match tokio::time::timeout(
            self.options.generate_timeout,
            self.generator.generate(&prompt),
        )
        .await
        {
            Err(_) => {
                session.state = SessionState::Idle;
                return Err(Error::GenerationFailed(format!(
                    "generation timed out after {:?}",
                    self.options.generate_timeout
                )));
            }
            Ok(Err(err)) => {
                session.state = SessionState::Idle;
                return Err(err);
            }
            Ok(Ok(answer)) => answer,
        };

        session
            .history
            .push(Message::assistant(answer.clone(), citations.clone()));
        session.state = SessionState::Idle;
        tracing::debug!(session = %self.session_id, citations = citations.len(), "turn answered");

        Ok(TurnOutcome {
            text: answer,
            citations,
            declined: false,
        })
    }
}

/// The last `window` messages *before* the current question.
fn history_window(history: &[Message], window: usize) -> Vec<Message> {
    // The question itself was just appended; it travels in the payload's
    // `question` field, not the window.
    let prior = &history[..history.len().saturating_sub(1)];
    let start = prior.len().saturating_sub(window);
    prior[start..].to_vec()
}

/// CLI entry point for `cqa ask`.
pub async fn run_ask(config: &Config, question: &str) -> anyhow::Result<()> {
    let (engine, shared) = engine_from_config(config).await?;
    let outcome = engine.handle_turn(question).await?;
    print_outcome(&outcome, &shared.current());
    Ok(())
}

/// CLI entry point for `cqa chat` — a line-based REPL over one session.
pub async fn run_chat(config: &Config) -> anyhow::Result<()> {
    use std::io::Write;

    let (engine, shared) = engine_from_config(config).await?;
    {
        let index = shared.current();
        println!(
            "corpus-qa chat — {} documents, {} fragments indexed. Type 'exit' to quit.",
            index.document_count(),
            index.fragment_count()
        );
    }

    let stdin = std::io::stdin();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "exit" || line == "quit" {
            break;
        }

        match engine.handle_turn(line).await {
            Ok(outcome) => print_outcome(&outcome, &shared.current()),
            Err(err) => eprintln!("error: {}", err),
        }
    }

    Ok(())
}

async fn engine_from_config(config: &Config) -> anyhow::Result<(SessionEngine, Arc<SharedIndex>)> {
    let index = Index::load(&config.index.path).await?;
    let shared = Arc::new(SharedIndex::new(index));
    let embedder = create_embedder(&config.embedding)?;
    let generator = create_generator(&config.generator)?;
    let engine = SessionEngine::new(
        shared.clone(),
        embedder,
        generator,
        SessionOptions::from_config(config),
    );
    Ok((engine, shared))
}

fn print_outcome(outcome: &TurnOutcome, index: &Index) {
    println!("{}", outcome.text);
    if !outcome.citations.is_empty() {
        println!();
        println!("sources:");
        for (i, citation) in outcome.citations.iter().enumerate() {
            let source = index
                .document_by_id(&citation.document_id)
                .map(|d| d.source_uri.clone())
                .unwrap_or_else(|| citation.document_id.clone());
            println!("  {}. {} ({})", i + 1, source, citation.span);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_window_excludes_current_question() {
        let history = vec![
            Message::user("q1"),
            Message::assistant("a1", Vec::new()),
            Message::user("q2"),
        ];
        let window = history_window(&history, 8);
        assert_eq!(window.len(), 2);
        assert_eq!(window[0].text, "q1");
        assert_eq!(window[1].text, "a1");
    }

    #[test]
    fn test_history_window_bounded() {
        let mut history = Vec::new();
        for i in 0..10 {
            history.push(Message::user(format!("q{}", i)));
            history.push(Message::assistant(format!("a{}", i), Vec::new()));
        }
        history.push(Message::user("current"));

        let window = history_window(&history, 4);
        assert_eq!(window.len(), 4);
        assert_eq!(window[0].text, "q8");
        assert_eq!(window[3].text, "a9");
    }

    #[test]
    fn test_history_window_on_first_turn_is_empty() {
        let history = vec![Message::user("first question")];
        assert!(history_window(&history, 8).is_empty());
    }
}

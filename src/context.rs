//! Grounding context assembly.
//!
//! Turns an ordered list of retrieval results into the bounded context text
//! handed to the generator, plus the citations that back it.
//!
//! The assembler's output is structural: [`AssembledContext::Empty`] is an
//! explicit no-context marker, distinct from any possible context string.
//! Downstream code branches on the enum — never on sentinel text — which is
//! what keeps "no evidence" detection mechanical.

use crate::chunk::CHARS_PER_TOKEN;
use crate::models::{Citation, RetrievalResult};

/// The assembled grounding context, or the explicit absence of one.
#[derive(Debug, Clone)]
pub enum AssembledContext {
    /// No usable context: either retrieval returned nothing, or nothing fit
    /// the budget. Never conflated with an empty-but-valid string.
    Empty,
    /// Context text plus the ordered citations of the fragments included.
    Grounded {
        text: String,
        citations: Vec<Citation>,
    },
}

impl AssembledContext {
    pub fn is_empty(&self) -> bool {
        matches!(self, AssembledContext::Empty)
    }
}

/// Assemble retrieval results into a bounded grounding context.
///
/// Fragments are taken in descending score order (stable for ties) and
/// appended whole until the next fragment would exceed `max_tokens`
/// (estimated at 4 chars/token) — a fragment is never truncated mid-text.
/// A candidate from the same document as an already-included fragment whose
/// span overlaps it by more than `dedup_overlap` (fraction of the shorter
/// span) is skipped as a near-duplicate.
pub fn assemble(
    results: &[RetrievalResult],
    max_tokens: usize,
    dedup_overlap: f32,
) -> AssembledContext {
    if results.is_empty() {
        return AssembledContext::Empty;
    }

    let mut ordered: Vec<&RetrievalResult> = results.iter().collect();
    ordered.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut included: Vec<&RetrievalResult> = Vec::new();
    let mut used_tokens = 0usize;

    for candidate in ordered {
        if is_near_duplicate(candidate, &included, dedup_overlap) {
            continue;
        }
        let cost = candidate.fragment.token_count.max(1);
        if used_tokens + cost > max_tokens {
            break;
        }
        used_tokens += cost;
        included.push(candidate);
    }

    if included.is_empty() {
        return AssembledContext::Empty;
    }

    let text = included
        .iter()
        .map(|r| r.fragment.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");
    let citations = included
        .iter()
        .map(|r| Citation {
            document_id: r.fragment.document_id.clone(),
            span: r.fragment.span,
        })
        .collect();

    AssembledContext::Grounded { text, citations }
}

fn is_near_duplicate(
    candidate: &RetrievalResult,
    included: &[&RetrievalResult],
    dedup_overlap: f32,
) -> bool {
    included.iter().any(|kept| {
        if kept.fragment.document_id != candidate.fragment.document_id {
            return false;
        }
        let shared = kept.fragment.span.overlap(&candidate.fragment.span);
        let shorter = kept
            .fragment
            .span
            .len()
            .min(candidate.fragment.span.len())
            .max(1);
        (shared as f32 / shorter as f32) > dedup_overlap
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Fragment, Span};

    fn result(doc: &str, start: usize, end: usize, score: f32) -> RetrievalResult {
        let text = "x".repeat(end - start);
        RetrievalResult {
            fragment: Fragment {
                id: format!("{}:{}", doc, start),
                document_id: doc.to_string(),
                text,
                span: Span::new(start, end),
                token_count: (end - start) / CHARS_PER_TOKEN,
            },
            score,
        }
    }

    #[test]
    fn test_empty_results_yield_explicit_marker() {
        let ctx = assemble(&[], 1000, 0.5);
        assert!(ctx.is_empty());
    }

    #[test]
    fn test_orders_by_descending_score() {
        let results = vec![
            result("a", 0, 40, 0.3),
            result("b", 0, 40, 0.9),
            result("c", 0, 40, 0.6),
        ];
        match assemble(&results, 1000, 0.5) {
            AssembledContext::Grounded { citations, .. } => {
                let docs: Vec<&str> =
                    citations.iter().map(|c| c.document_id.as_str()).collect();
                assert_eq!(docs, vec!["b", "c", "a"]);
            }
            AssembledContext::Empty => panic!("expected grounded context"),
        }
    }

    #[test]
    fn test_budget_is_all_or_nothing_per_fragment() {
        // 40 bytes = 10 tokens each; budget of 25 tokens fits two, and the
        // third must not be half-included.
        let results = vec![
            result("a", 0, 40, 0.9),
            result("b", 0, 40, 0.8),
            result("c", 0, 40, 0.7),
        ];
        match assemble(&results, 25, 0.5) {
            AssembledContext::Grounded { text, citations } => {
                assert_eq!(citations.len(), 2);
                // Both included fragments are intact.
                assert_eq!(text.len(), 40 + 2 + 40);
            }
            AssembledContext::Empty => panic!("expected grounded context"),
        }
    }

    #[test]
    fn test_everything_over_budget_is_explicit_empty() {
        let results = vec![result("a", 0, 400, 0.9)];
        let ctx = assemble(&results, 10, 0.5);
        assert!(ctx.is_empty());
    }

    #[test]
    fn test_near_duplicates_suppressed() {
        // Same document, 30 of 40 bytes shared: 0.75 overlap > 0.5 threshold.
        let results = vec![
            result("a", 0, 40, 0.9),
            result("a", 10, 50, 0.8),
            result("b", 0, 40, 0.7),
        ];
        match assemble(&results, 1000, 0.5) {
            AssembledContext::Grounded { citations, .. } => {
                assert_eq!(citations.len(), 2);
                assert_eq!(citations[0].document_id, "a");
                assert_eq!(citations[0].span, Span::new(0, 40));
                assert_eq!(citations[1].document_id, "b");
            }
            AssembledContext::Empty => panic!("expected grounded context"),
        }
    }

    #[test]
    fn test_same_span_different_documents_not_deduped() {
        let results = vec![result("a", 0, 40, 0.9), result("b", 0, 40, 0.8)];
        match assemble(&results, 1000, 0.5) {
            AssembledContext::Grounded { citations, .. } => {
                assert_eq!(citations.len(), 2);
            }
            AssembledContext::Empty => panic!("expected grounded context"),
        }
    }

    #[test]
    fn test_citations_match_included_fragments() {
        let results = vec![result("a", 5, 45, 0.9)];
        match assemble(&results, 1000, 0.5) {
            AssembledContext::Grounded { citations, .. } => {
                assert_eq!(citations.len(), 1);
                assert_eq!(citations[0].document_id, "a");
                assert_eq!(citations[0].span, Span::new(5, 45));
            }
            AssembledContext::Empty => panic!("expected grounded context"),
        }
    }
}

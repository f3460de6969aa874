//! Overlapping sliding-window text chunker.
//!
//! Splits a document's normalized text into [`Fragment`]s of at most
//! `max_chars` bytes, with adjacent fragments sharing an overlap window of at
//! most `overlap_chars` bytes. Window edges are snapped to UTF-8 character
//! boundaries.
//!
//! # Guarantees
//!
//! - Every byte of the document belongs to at least one fragment (no gaps);
//!   concatenating fragment texts with the overlaps removed reconstructs the
//!   document byte-for-byte.
//! - Fragment length ≤ `max_chars`; overlap between adjacent fragments
//!   ≤ `overlap_chars`.
//! - Deterministic: identical input and parameters produce byte-identical
//!   fragment boundaries and ids.
//! - An empty document yields exactly one empty fragment (a document is
//!   never silently dropped).
//!
//! The only exception to the length bound is a single character wider than
//! `max_chars` itself, which is emitted alone rather than split mid-character.

use crate::error::{Error, Result};
use crate::models::{Document, Fragment, Span};

/// Approximate characters-per-token ratio.
///
/// A rough heuristic (4 chars ≈ 1 token) shared by the chunker's token
/// estimates and the context assembler's budget accounting.
pub const CHARS_PER_TOKEN: usize = 4;

/// Estimate the token count of a text under the 4 chars/token heuristic.
pub fn estimate_tokens(text: &str) -> usize {
    (text.len() + CHARS_PER_TOKEN - 1) / CHARS_PER_TOKEN
}

/// Split a document into overlapping fragments.
///
/// `max_chars` and `overlap_chars` are byte sizes; window edges are snapped
/// to character boundaries so fragments are always valid UTF-8 slices.
///
/// # Errors
///
/// Returns [`Error::InvalidConfig`] if `max_chars` is zero or
/// `overlap_chars >= max_chars`.
pub fn chunk(document: &Document, max_chars: usize, overlap_chars: usize) -> Result<Vec<Fragment>> {
    if max_chars == 0 {
        return Err(Error::InvalidConfig(
            "chunking max size must be > 0".to_string(),
        ));
    }
    if overlap_chars >= max_chars {
        return Err(Error::InvalidConfig(format!(
            "chunking overlap ({}) must be smaller than max size ({})",
            overlap_chars, max_chars
        )));
    }

    let text = &document.raw_text;
    let len = text.len();

    if len == 0 {
        return Ok(vec![make_fragment(document, 0, Span::new(0, 0))]);
    }

    let step = max_chars - overlap_chars;
    let mut fragments = Vec::new();
    let mut start = 0usize;
    let mut index = 0usize;

    loop {
        let mut end = if start + max_chars >= len {
            len
        } else {
            snap_down(text, start + max_chars)
        };
        // A single character wider than the window: emit it whole.
        if end <= start {
            end = next_boundary(text, start);
        }

        fragments.push(make_fragment(document, index, Span::new(start, end)));

        if end >= len {
            break;
        }
        index += 1;

        // Snapping the next start *up* keeps the overlap within bounds;
        // capping at the previous end keeps coverage gap-free.
        let next = snap_up(text, start + step).min(end);
        debug_assert!(next > start);
        start = next;
    }

    Ok(fragments)
}

fn make_fragment(document: &Document, index: usize, span: Span) -> Fragment {
    let text = document.raw_text[span.start..span.end].to_string();
    let token_count = estimate_tokens(&text);
    Fragment {
        id: format!("{}:{}", document.id, index),
        document_id: document.id.clone(),
        text,
        span,
        token_count,
    }
}

/// Snap a byte index down to the nearest UTF-8 character boundary.
fn snap_down(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Snap a byte index up to the nearest UTF-8 character boundary.
fn snap_up(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i < s.len() && !s.is_char_boundary(i) {
        i += 1;
    }
    i
}

/// The first character boundary strictly after `index`.
fn next_boundary(s: &str, index: usize) -> usize {
    let mut i = index + 1;
    while i < s.len() && !s.is_char_boundary(i) {
        i += 1;
    }
    i.min(s.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(text: &str) -> Document {
        Document::new("file://test.md", text, 0)
    }

    /// Stitch fragments back together with overlaps removed.
    fn reconstruct(fragments: &[Fragment]) -> String {
        let mut out = String::new();
        let mut covered = 0usize;
        for f in fragments {
            if f.span.end <= covered {
                continue;
            }
            let skip = covered.saturating_sub(f.span.start);
            out.push_str(&f.text[skip..]);
            covered = f.span.end;
        }
        out
    }

    #[test]
    fn test_small_text_single_fragment() {
        let d = doc("Hello, world!");
        let frags = chunk(&d, 100, 20).unwrap();
        assert_eq!(frags.len(), 1);
        assert_eq!(frags[0].text, "Hello, world!");
        assert_eq!(frags[0].span, Span::new(0, 13));
        assert_eq!(frags[0].id, format!("{}:0", d.id));
    }

    #[test]
    fn test_empty_document_single_empty_fragment() {
        let d = doc("");
        let frags = chunk(&d, 100, 20).unwrap();
        assert_eq!(frags.len(), 1);
        assert!(frags[0].text.is_empty());
        assert_eq!(frags[0].span, Span::new(0, 0));
    }

    #[test]
    fn test_invalid_params_rejected() {
        let d = doc("text");
        assert!(matches!(chunk(&d, 0, 0), Err(Error::InvalidConfig(_))));
        assert!(matches!(chunk(&d, 10, 10), Err(Error::InvalidConfig(_))));
        assert!(matches!(chunk(&d, 10, 15), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_full_coverage_no_gaps() {
        let text = "abcdefghijklmnopqrstuvwxyz0123456789";
        let d = doc(text);
        let frags = chunk(&d, 10, 3).unwrap();

        let mut covered = 0usize;
        for f in &frags {
            assert!(f.span.start <= covered, "gap before {}", f.span);
            covered = covered.max(f.span.end);
        }
        assert_eq!(covered, text.len());
        assert_eq!(reconstruct(&frags), text);
    }

    #[test]
    fn test_overlap_and_length_bounds() {
        let text = "The quick brown fox jumps over the lazy dog. ".repeat(20);
        let d = doc(&text);
        let max = 64;
        let overlap = 16;
        let frags = chunk(&d, max, overlap).unwrap();
        assert!(frags.len() > 1);

        for f in &frags {
            assert!(f.span.len() <= max, "fragment longer than max: {}", f.span);
        }
        for pair in frags.windows(2) {
            let shared = pair[0].span.overlap(&pair[1].span);
            assert!(shared <= overlap, "overlap {} exceeds bound", shared);
        }
        assert_eq!(reconstruct(&frags), text);
    }

    #[test]
    fn test_multibyte_boundaries_respected() {
        let text = "héllo wörld ünïcode çhäräctérs ".repeat(12);
        let d = doc(&text);
        let frags = chunk(&d, 20, 5).unwrap();

        for f in &frags {
            // Slicing at a non-boundary would have panicked in chunk();
            // double-check the spans line up with the original text.
            assert_eq!(&text[f.span.start..f.span.end], f.text);
        }
        assert_eq!(reconstruct(&frags), text);
    }

    #[test]
    fn test_deterministic_boundaries() {
        let text = "Alpha beta gamma delta epsilon zeta eta theta. ".repeat(15);
        let d = doc(&text);
        let a = chunk(&d, 50, 10).unwrap();
        let b = chunk(&d, 50, 10).unwrap();
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.id, y.id);
            assert_eq!(x.span, y.span);
            assert_eq!(x.text, y.text);
        }
    }

    #[test]
    fn test_fragment_ids_indexed_in_order() {
        let text = "word ".repeat(100);
        let d = doc(&text);
        let frags = chunk(&d, 40, 8).unwrap();
        for (i, f) in frags.iter().enumerate() {
            assert_eq!(f.id, format!("{}:{}", d.id, i));
        }
    }

    #[test]
    fn test_token_estimate() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }
}

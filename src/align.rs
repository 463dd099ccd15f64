//! Syllable-to-bbox alignment.
//!
//! Greedy, order-preserving matching of IR lyric tokens against layout
//! candidates by exact text equality. This is a best-effort heuristic:
//! repeated identical syllables rendered out of true order will be
//! matched to the wrong occurrence.

use crate::ir::LyricsToken;
use crate::layout::BBoxCandidate;

/// Match each token (in document order) to the first unconsumed
/// candidate (in document order) whose trimmed text equals the token's
/// text exactly. Each candidate is consumed at most once; a token with
/// no match gets `None`.
pub fn align(tokens: &[&LyricsToken], candidates: &[BBoxCandidate]) -> Vec<Option<usize>> {
    let mut consumed = vec![false; candidates.len()];
    let mut matched: Vec<Option<usize>> = Vec::with_capacity(tokens.len());

    for token in tokens {
        let found = candidates.iter().enumerate().position(|(j, cand)| {
            !consumed[j]
                && cand
                    .text
                    .as_deref()
                    .map(str::trim)
                    .is_some_and(|t| t == token.text)
        });
        if let Some(j) = found {
            consumed[j] = true;
        }
        matched.push(found);
    }

    matched
}

use ragline_core::{CompressionError, RetrievedFragment};

pub const DEFAULT_TOKEN_LIMIT: usize = 2000;

/// How retrieved fragments are cut down before prompt assembly.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CompressionStrategy {
    /// Keep the `n` best-scoring fragments.
    TopK(usize),
    /// Keep fragments scoring at or above the threshold.
    ScoreThreshold(f32),
    /// Keep best-first fragments while their estimated tokens fit the budget.
    TokenLimit(usize),
}

impl Default for CompressionStrategy {
    fn default() -> Self {
        CompressionStrategy::TokenLimit(DEFAULT_TOKEN_LIMIT)
    }
}

/// Rough token count: one token per four characters.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count() / 4
}

/// Applies `strategy` to `fragments`. `TopK` and `TokenLimit` return the
/// best-scoring fragments in descending score order (ties keep input order);
/// `ScoreThreshold` filters and keeps the input order.
pub fn compress(
    fragments: Vec<RetrievedFragment>,
    strategy: CompressionStrategy,
) -> Result<Vec<RetrievedFragment>, CompressionError> {
    if let Some(bad) = fragments.iter().find(|f| !f.score.is_finite()) {
        return Err(CompressionError::NonFiniteScore { chunk_id: bad.chunk_id.clone() });
    }
    let input = fragments.len();

    let kept = match strategy {
        CompressionStrategy::TopK(n) => {
            let mut ranked = by_score(fragments);
            ranked.truncate(n);
            ranked
        }
        CompressionStrategy::ScoreThreshold(threshold) => {
            let mut kept = fragments;
            kept.retain(|f| f.score >= threshold);
            kept
        }
        CompressionStrategy::TokenLimit(budget) => {
            let mut used = 0usize;
            let mut kept = Vec::with_capacity(fragments.len());
            for fragment in by_score(fragments) {
                let tokens = estimate_tokens(&fragment.content);
                if used + tokens > budget {
                    break;
                }
                used += tokens;
                kept.push(fragment);
            }
            kept
        }
    };

    tracing::debug!(?strategy, input, kept = kept.len(), "context compressed");
    Ok(kept)
}

/// Stable descending sort.
fn by_score(mut fragments: Vec<RetrievedFragment>) -> Vec<RetrievedFragment> {
    fragments.sort_by(|a, b| b.score.total_cmp(&a.score));
    fragments
}

/// Holds a fixed strategy for repeated use by the pipeline.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContextCompressor {
    strategy: CompressionStrategy,
}

impl ContextCompressor {
    pub fn new(strategy: CompressionStrategy) -> Self {
        Self { strategy }
    }

    pub fn strategy(&self) -> CompressionStrategy {
        self.strategy
    }

    pub fn compress(&self, fragments: Vec<RetrievedFragment>) -> Result<Vec<RetrievedFragment>, CompressionError> {
        compress(fragments, self.strategy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fragment(id: &str, score: f32, content: &str) -> RetrievedFragment {
        RetrievedFragment {
            content: content.to_string(),
            score,
            document_id: "doc".into(),
            chunk_id: id.into(),
            metadata: Default::default(),
        }
    }

    fn ids(fragments: &[RetrievedFragment]) -> Vec<&str> {
        fragments.iter().map(|f| f.chunk_id.as_str()).collect()
    }

    #[test]
    fn top_k_keeps_best() {
        let input = vec![fragment("a", 0.9, "x"), fragment("b", 0.5, "x"), fragment("c", 0.8, "x")];
        let out = compress(input, CompressionStrategy::TopK(2)).unwrap();
        assert_eq!(ids(&out), ["a", "c"]);
    }

    #[test]
    fn top_k_zero_is_empty() {
        let out = compress(vec![fragment("a", 0.9, "x")], CompressionStrategy::TopK(0)).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn token_limit_stops_at_first_overflow() {
        // 16 chars each, so 4 estimated tokens each
        let text = "abcdefghijklmnop";
        let input = vec![fragment("a", 0.9, text), fragment("b", 0.8, text), fragment("c", 0.7, text)];
        let out = compress(input, CompressionStrategy::TokenLimit(10)).unwrap();
        assert_eq!(ids(&out), ["a", "b"]);
    }

    #[test]
    fn token_limit_does_not_skip_ahead() {
        let input = vec![
            fragment("big", 0.9, &"x".repeat(400)),
            fragment("small", 0.5, "tiny"),
        ];
        let out = compress(input, CompressionStrategy::TokenLimit(50)).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn threshold_is_inclusive_and_keeps_input_order() {
        let input = vec![fragment("edge", 0.5, "x"), fragment("low", 0.2, "x"), fragment("hi", 0.9, "x")];
        let out = compress(input, CompressionStrategy::ScoreThreshold(0.5)).unwrap();
        assert_eq!(ids(&out), ["edge", "hi"]);
    }

    #[test]
    fn ties_keep_input_order() {
        let input = vec![fragment("first", 0.5, "x"), fragment("second", 0.5, "x")];
        let out = compress(input, CompressionStrategy::TopK(2)).unwrap();
        assert_eq!(ids(&out), ["first", "second"]);
    }

    #[test]
    fn nan_score_is_rejected() {
        let err = compress(vec![fragment("bad", f32::NAN, "x")], CompressionStrategy::default()).unwrap_err();
        assert!(matches!(err, CompressionError::NonFiniteScore { ref chunk_id } if chunk_id == "bad"));
    }

    #[test]
    fn token_estimate_counts_chars() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 0);
        assert_eq!(estimate_tokens("héllo wörld!"), 3);
    }
}

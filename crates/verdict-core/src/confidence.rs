// ─────────────────────────────────────────────────────────────────────
// Director-Class AI — Confidence Estimator
// ─────────────────────────────────────────────────────────────────────
//! Scalar confidence for a verdict from whatever signal the model gives.
//!
//! Priority: token log-probabilities over the emitted verdict object,
//! then a classifier's class probability, then the model's self-reported
//! number. With nothing usable the estimator returns
//! [`NEUTRAL_CONFIDENCE`] and marks the estimate degraded; it never fails.

use std::ops::Range;

use serde::Serialize;

use verdict_types::{clamp_score, NEUTRAL_CONFIDENCE};

use crate::model::TokenLogprob;

/// Evidence available for one verdict.
#[derive(Debug, Clone, Copy)]
pub enum ConfidenceSignal<'a> {
    /// Per-token log-probabilities of the generation, with the byte span
    /// of the verdict object inside the generated text.
    TokenLogprobs {
        tokens: &'a [TokenLogprob],
        span: Option<&'a Range<usize>>,
    },
    /// Probability the classifier assigned to the class it chose.
    ClassProbability(f64),
    /// Confidence field the model wrote into its own output.
    SelfReported(f64),
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceSource {
    TokenLikelihood,
    ClassProbability,
    SelfReported,
    Neutral,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfidenceEstimate {
    pub value: f64,
    pub source: ConfidenceSource,
    /// Signal missing or unusable; `value` is the neutral default.
    pub degraded: bool,
}

impl ConfidenceEstimate {
    fn neutral() -> Self {
        Self {
            value: NEUTRAL_CONFIDENCE,
            source: ConfidenceSource::Neutral,
            degraded: true,
        }
    }

    fn from(value: f64, source: ConfidenceSource) -> Self {
        Self {
            value: clamp_score(value, 0.0, 1.0),
            source,
            degraded: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ConfidenceEstimator;

impl ConfidenceEstimator {
    pub fn new() -> Self {
        Self
    }

    /// Estimate from the strongest available signal.
    pub fn estimate(&self, signal: ConfidenceSignal<'_>) -> ConfidenceEstimate {
        match signal {
            ConfidenceSignal::TokenLogprobs { tokens, span } => {
                match span_likelihood(tokens, span) {
                    Some(p) => ConfidenceEstimate::from(p, ConfidenceSource::TokenLikelihood),
                    None => ConfidenceEstimate::neutral(),
                }
            }
            ConfidenceSignal::ClassProbability(p) if valid_probability(p) => {
                ConfidenceEstimate::from(p, ConfidenceSource::ClassProbability)
            }
            ConfidenceSignal::SelfReported(p) if valid_probability(p) => {
                ConfidenceEstimate::from(p, ConfidenceSource::SelfReported)
            }
            _ => ConfidenceEstimate::neutral(),
        }
    }

    /// Token likelihood when present and usable, else the fallback signal.
    pub fn estimate_with_fallback(
        &self,
        primary: ConfidenceSignal<'_>,
        fallback: ConfidenceSignal<'_>,
    ) -> ConfidenceEstimate {
        let first = self.estimate(primary);
        if first.degraded {
            self.estimate(fallback)
        } else {
            first
        }
    }
}

fn valid_probability(p: f64) -> bool {
    p.is_finite() && (0.0..=1.0).contains(&p)
}

/// Geometric-mean token probability over the tokens overlapping `span`
/// (all tokens when `span` is `None`).
///
/// `exp(mean logprob)` grows monotonically with joint likelihood at a
/// fixed length and does not shrink merely because the object is long.
fn span_likelihood(tokens: &[TokenLogprob], span: Option<&Range<usize>>) -> Option<f64> {
    let mut offset = 0usize;
    let mut sum = 0.0;
    let mut count = 0usize;

    for token in tokens {
        let start = offset;
        let end = offset + token.text.len();
        offset = end;

        let inside = match span {
            Some(s) => start < s.end && end > s.start,
            None => true,
        };
        if !inside {
            continue;
        }
        if !token.logprob.is_finite() || token.logprob > 0.0 {
            return None;
        }
        sum += token.logprob;
        count += 1;
    }

    if count == 0 {
        return None;
    }
    Some((sum / count as f64).exp())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(pairs: &[(&str, f64)]) -> Vec<TokenLogprob> {
        pairs
            .iter()
            .map(|(t, lp)| TokenLogprob::new(*t, *lp))
            .collect()
    }

    #[test]
    fn test_certain_tokens_give_one() {
        let tokens = toks(&[("{", 0.0), ("}", 0.0)]);
        let est = ConfidenceEstimator.estimate(ConfidenceSignal::TokenLogprobs {
            tokens: &tokens,
            span: None,
        });
        assert_eq!(est.source, ConfidenceSource::TokenLikelihood);
        assert!((est.value - 1.0).abs() < 1e-12);
        assert!(!est.degraded);
    }

    #[test]
    fn test_higher_likelihood_higher_confidence() {
        let sure = toks(&[("a", -0.05), ("b", -0.05)]);
        let unsure = toks(&[("a", -1.5), ("b", -0.9)]);
        let e = ConfidenceEstimator;
        let hi = e.estimate(ConfidenceSignal::TokenLogprobs { tokens: &sure, span: None });
        let lo = e.estimate(ConfidenceSignal::TokenLogprobs { tokens: &unsure, span: None });
        assert!(hi.value > lo.value);
    }

    #[test]
    fn test_length_normalized() {
        let short = toks(&[("a", -0.2); 2]);
        let long = toks(&[("a", -0.2); 40]);
        let e = ConfidenceEstimator;
        let a = e.estimate(ConfidenceSignal::TokenLogprobs { tokens: &short, span: None });
        let b = e.estimate(ConfidenceSignal::TokenLogprobs { tokens: &long, span: None });
        assert!((a.value - b.value).abs() < 1e-12);
    }

    #[test]
    fn test_span_excludes_prose_tokens() {
        // "ok " (3 bytes) is prose at -5.0; the object tokens are certain.
        let tokens = toks(&[("ok ", -5.0), ("{", 0.0), ("}", 0.0)]);
        let span = 3..5;
        let est = ConfidenceEstimator.estimate(ConfidenceSignal::TokenLogprobs {
            tokens: &tokens,
            span: Some(&span),
        });
        assert!((est.value - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_nan_logprob_degrades() {
        let tokens = toks(&[("a", f64::NAN)]);
        let est = ConfidenceEstimator.estimate(ConfidenceSignal::TokenLogprobs {
            tokens: &tokens,
            span: None,
        });
        assert!(est.degraded);
        assert_eq!(est.value, NEUTRAL_CONFIDENCE);
    }

    #[test]
    fn test_empty_tokens_degrade() {
        let est = ConfidenceEstimator.estimate(ConfidenceSignal::TokenLogprobs {
            tokens: &[],
            span: None,
        });
        assert!(est.degraded);
    }

    #[test]
    fn test_class_probability_used_directly() {
        let est = ConfidenceEstimator.estimate(ConfidenceSignal::ClassProbability(0.83));
        assert_eq!(est.source, ConfidenceSource::ClassProbability);
        assert!((est.value - 0.83).abs() < 1e-12);
    }

    #[test]
    fn test_invalid_probability_degrades() {
        let e = ConfidenceEstimator;
        assert!(e.estimate(ConfidenceSignal::ClassProbability(1.7)).degraded);
        assert!(e.estimate(ConfidenceSignal::SelfReported(f64::INFINITY)).degraded);
        assert!(e.estimate(ConfidenceSignal::None).degraded);
    }

    #[test]
    fn test_fallback_when_primary_unusable() {
        let est = ConfidenceEstimator.estimate_with_fallback(
            ConfidenceSignal::None,
            ConfidenceSignal::SelfReported(0.7),
        );
        assert_eq!(est.source, ConfidenceSource::SelfReported);
        assert!(!est.degraded);
    }
}

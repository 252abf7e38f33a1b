// ─────────────────────────────────────────────────────────────────────
// Director-Class AI — Inference Strategies
// ─────────────────────────────────────────────────────────────────────
//! The two interchangeable ways of turning a request into a verdict.
//!
//! - `GenerativeStrategy`: prompt a causal model, parse its JSON,
//!   estimate confidence from token likelihoods.
//! - `ClassifyingStrategy`: one binary decision over the whole principle
//!   set; the verdict flags either nothing or every principle.
//!
//! The engine depends only on [`InferenceStrategy`].

use verdict_types::{
    ModelFault, ModelType, UnknownPrinciplePolicy, VerificationRequest, Verdict, VerifierConfig,
    VerifyError,
};

use crate::confidence::{ConfidenceEstimate, ConfidenceEstimator, ConfidenceSignal};
use crate::model::{CausalModel, ClassifierModel, GenerationConstraints, LoadedModel};
use crate::parser::{object_span, parse_verdict};
use crate::prompt::verification_prompt;

/// A verdict together with how its confidence was obtained.
#[derive(Debug, Clone, PartialEq)]
pub struct Inference {
    pub verdict: Verdict,
    pub confidence: ConfidenceEstimate,
}

/// Capability shared by both strategies.
pub trait InferenceStrategy: Send {
    fn model_type(&self) -> ModelType;

    fn infer_and_parse(
        &mut self,
        request: &VerificationRequest,
        constraints: &GenerationConstraints,
    ) -> Result<Inference, VerifyError>;
}

/// Map a model fault onto the boundary taxonomy.
pub fn fault_to_error(fault: ModelFault, constraints: &GenerationConstraints) -> VerifyError {
    match fault {
        ModelFault::DeadlineExceeded => VerifyError::Timeout {
            budget_ms: constraints.budget_ms(),
        },
        ModelFault::Unavailable(msg) => VerifyError::ModelUnavailable(msg),
        ModelFault::Failed(msg) => VerifyError::ModelUnavailable(format!("inference failed: {msg}")),
    }
}

pub struct GenerativeStrategy {
    model: Box<dyn CausalModel>,
    policy: UnknownPrinciplePolicy,
    estimator: ConfidenceEstimator,
}

impl GenerativeStrategy {
    pub fn new(model: Box<dyn CausalModel>, policy: UnknownPrinciplePolicy) -> Self {
        Self {
            model,
            policy,
            estimator: ConfidenceEstimator::new(),
        }
    }
}

impl InferenceStrategy for GenerativeStrategy {
    fn model_type(&self) -> ModelType {
        ModelType::Causal
    }

    fn infer_and_parse(
        &mut self,
        request: &VerificationRequest,
        constraints: &GenerationConstraints,
    ) -> Result<Inference, VerifyError> {
        let prompt = verification_prompt(request.principles(), request.response());
        let generation = self
            .model
            .generate(&prompt, constraints)
            .map_err(|f| fault_to_error(f, constraints))?;

        let verdict = parse_verdict(&generation.text, request.principles(), self.policy)
            .into_result()?;

        let span = object_span(&generation.text);
        let primary = match &generation.tokens {
            Some(tokens) => ConfidenceSignal::TokenLogprobs {
                tokens,
                span: span.as_ref(),
            },
            None => ConfidenceSignal::None,
        };
        let confidence = self
            .estimator
            .estimate_with_fallback(primary, ConfidenceSignal::SelfReported(verdict.confidence()));

        Ok(Inference {
            verdict: verdict.with_confidence(confidence.value),
            confidence,
        })
    }
}

pub struct ClassifyingStrategy {
    model: Box<dyn ClassifierModel>,
    threshold: f64,
    estimator: ConfidenceEstimator,
}

impl ClassifyingStrategy {
    pub fn new(model: Box<dyn ClassifierModel>, threshold: f64) -> Self {
        Self {
            model,
            threshold,
            estimator: ConfidenceEstimator::new(),
        }
    }
}

impl InferenceStrategy for ClassifyingStrategy {
    fn model_type(&self) -> ModelType {
        ModelType::Classifier
    }

    fn infer_and_parse(
        &mut self,
        request: &VerificationRequest,
        constraints: &GenerationConstraints,
    ) -> Result<Inference, VerifyError> {
        let p_violation = self
            .model
            .classify(request.principles(), request.response(), constraints)
            .map_err(|f| fault_to_error(f, constraints))?;

        if !p_violation.is_finite() || !(0.0..=1.0).contains(&p_violation) {
            return Err(VerifyError::ModelUnavailable(format!(
                "classifier returned invalid probability {p_violation}"
            )));
        }

        let violated = p_violation >= self.threshold;
        let class_probability = if violated { p_violation } else { 1.0 - p_violation };
        let confidence = self
            .estimator
            .estimate(ConfidenceSignal::ClassProbability(class_probability));

        let verdict = if violated {
            Verdict::for_request(request, request.principles().to_vec(), confidence.value)
                .map_err(|p| {
                    VerifyError::ModelUnavailable(format!("principle {p} vanished from request"))
                })?
        } else {
            Verdict::clean(confidence.value)
        };

        Ok(Inference {
            verdict,
            confidence,
        })
    }
}

/// Wrap a loaded model in the matching strategy.
pub fn build_strategy(model: LoadedModel, config: &VerifierConfig) -> Box<dyn InferenceStrategy> {
    match model {
        LoadedModel::Causal(m) => Box::new(GenerativeStrategy::new(m, config.unknown_principle)),
        LoadedModel::Classifier(m) => {
            Box::new(ClassifyingStrategy::new(m, config.classifier_threshold))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use verdict_types::{MalformedReason, Principle};

    use super::*;
    use crate::confidence::ConfidenceSource;
    use crate::model::{ExternalCausalModel, ExternalClassifier, Generation, TokenLogprob};

    fn constraints() -> GenerationConstraints {
        GenerationConstraints::new(128, Duration::from_secs(5))
    }

    fn request() -> VerificationRequest {
        VerificationRequest::new(
            ["Never make promises you cannot keep"],
            "I guarantee you will double your money.",
        )
        .unwrap()
    }

    #[test]
    fn test_generative_uses_token_likelihood() {
        let model = ExternalCausalModel::new(|_, _| {
            let text = r#"{"violations": [1], "confidence": 0.6}"#;
            Ok(Generation {
                text: text.to_string(),
                tokens: Some(vec![TokenLogprob::new(text, -0.1)]),
            })
        });
        let mut s = GenerativeStrategy::new(Box::new(model), UnknownPrinciplePolicy::Reject);
        let out = s.infer_and_parse(&request(), &constraints()).unwrap();
        assert_eq!(out.confidence.source, ConfidenceSource::TokenLikelihood);
        assert!((out.verdict.confidence() - (-0.1f64).exp()).abs() < 1e-9);
        assert_eq!(out.verdict.violations().len(), 1);
    }

    #[test]
    fn test_generative_falls_back_to_reported() {
        let model = ExternalCausalModel::new(|_, _| {
            Ok(Generation::text_only(r#"{"violations": [], "confidence": 0.7}"#))
        });
        let mut s = GenerativeStrategy::new(Box::new(model), UnknownPrinciplePolicy::Reject);
        let out = s.infer_and_parse(&request(), &constraints()).unwrap();
        assert_eq!(out.confidence.source, ConfidenceSource::SelfReported);
        assert!((out.verdict.confidence() - 0.7).abs() < 1e-12);
    }

    #[test]
    fn test_generative_malformed_surfaces() {
        let model = ExternalCausalModel::new(|_, _| Ok(Generation::text_only("no idea")));
        let mut s = GenerativeStrategy::new(Box::new(model), UnknownPrinciplePolicy::Reject);
        let err = s.infer_and_parse(&request(), &constraints()).unwrap_err();
        match err {
            VerifyError::ParseFailure { raw, reason, .. } => {
                assert_eq!(raw, "no idea");
                assert_eq!(reason, MalformedReason::NoObjectFound);
            }
            other => panic!("expected parse failure, got {other:?}"),
        }
    }

    #[test]
    fn test_generative_deadline_maps_to_timeout() {
        let model = ExternalCausalModel::new(|_, _| Err(ModelFault::DeadlineExceeded));
        let mut s = GenerativeStrategy::new(Box::new(model), UnknownPrinciplePolicy::Reject);
        let err = s.infer_and_parse(&request(), &constraints()).unwrap_err();
        assert_eq!(err, VerifyError::Timeout { budget_ms: 5000 });
    }

    #[test]
    fn test_classifier_all_or_nothing() {
        let req = VerificationRequest::new(["Be concise", "Be polite"], "whatever").unwrap();
        let mut s = ClassifyingStrategy::new(
            Box::new(ExternalClassifier::new(|_, _, _| Ok(0.8))),
            0.5,
        );
        let out = s.infer_and_parse(&req, &constraints()).unwrap();
        assert_eq!(out.verdict.violations(), req.principles());
        assert!((out.verdict.confidence() - 0.8).abs() < 1e-12);

        let mut s = ClassifyingStrategy::new(
            Box::new(ExternalClassifier::new(|_, _, _| Ok(0.3))),
            0.5,
        );
        let out = s.infer_and_parse(&req, &constraints()).unwrap();
        assert!(out.verdict.is_clean());
        assert!((out.verdict.confidence() - 0.7).abs() < 1e-12);
    }

    #[test]
    fn test_classifier_invalid_probability() {
        let req = VerificationRequest::new([Principle::new("Be concise")], "x").unwrap();
        let mut s = ClassifyingStrategy::new(
            Box::new(ExternalClassifier::new(|_, _, _| Ok(f64::NAN))),
            0.5,
        );
        assert!(matches!(
            s.infer_and_parse(&req, &constraints()),
            Err(VerifyError::ModelUnavailable(_))
        ));
    }
}

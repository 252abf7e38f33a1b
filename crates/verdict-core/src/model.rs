// ─────────────────────────────────────────────────────────────────────
// Director-Class AI — Verifier Model Interface
// ─────────────────────────────────────────────────────────────────────
//! Capability traits for loaded verifier models, plus deterministic
//! heuristic implementations and closure adapters.
//!
//! In production the trained verifier (a fine-tuned causal LM or a
//! sequence classifier) runs behind these traits, in-process or via
//! the Python bridge in `verdict-ffi`. The heuristic models provide
//! deterministic verdicts for testing and local runs.

use std::collections::HashSet;
use std::path::Path;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use verdict_types::{ModelFault, ModelType, Principle, VerifierConfig};

use crate::prompt::split_verification_prompt;

/// One generated token with its log-probability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenLogprob {
    pub text: String,
    pub logprob: f64,
}

impl TokenLogprob {
    pub fn new(text: impl Into<String>, logprob: f64) -> Self {
        Self {
            text: text.into(),
            logprob,
        }
    }
}

/// Bounds handed to a model for one call.
#[derive(Debug, Clone, Copy)]
pub struct GenerationConstraints {
    pub max_new_tokens: usize,
    pub budget: Duration,
    pub deadline: Instant,
}

impl GenerationConstraints {
    pub fn new(max_new_tokens: usize, budget: Duration) -> Self {
        Self {
            max_new_tokens,
            budget,
            deadline: Instant::now() + budget,
        }
    }

    pub fn budget_ms(&self) -> u64 {
        u64::try_from(self.budget.as_millis()).unwrap_or(u64::MAX)
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }
}

/// Output of a generative call.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Generation {
    pub text: String,
    /// Per-token log-probabilities, when the backend exposes them.
    pub tokens: Option<Vec<TokenLogprob>>,
}

impl Generation {
    pub fn text_only(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tokens: None,
        }
    }
}

/// Generative verifier: reads a prompt, writes a JSON verdict.
///
/// `&mut self` because the model is a single stateful resource
/// (KV cache, device buffers); callers serialize access.
pub trait CausalModel: Send {
    fn generate(
        &mut self,
        prompt: &str,
        constraints: &GenerationConstraints,
    ) -> Result<Generation, ModelFault>;
}

/// Classifying verifier: probability that the response violates the
/// principle set as a whole.
pub trait ClassifierModel: Send {
    fn classify(
        &mut self,
        principles: &[Principle],
        response: &str,
        constraints: &GenerationConstraints,
    ) -> Result<f64, ModelFault>;
}

/// A loaded model of either capability.
pub enum LoadedModel {
    Causal(Box<dyn CausalModel>),
    Classifier(Box<dyn ClassifierModel>),
}

impl LoadedModel {
    pub fn model_type(&self) -> ModelType {
        match self {
            LoadedModel::Causal(_) => ModelType::Causal,
            LoadedModel::Classifier(_) => ModelType::Classifier,
        }
    }
}

/// Produces a [`LoadedModel`] from configuration.
pub trait ModelLoader: Send + Sync {
    fn load(&self, config: &VerifierConfig) -> Result<LoadedModel, ModelFault>;
}

impl<F> ModelLoader for F
where
    F: Fn(&VerifierConfig) -> Result<LoadedModel, ModelFault> + Send + Sync,
{
    fn load(&self, config: &VerifierConfig) -> Result<LoadedModel, ModelFault> {
        self(config)
    }
}

// ── Heuristic lexicon ──────────────────────────────────────────────

/// Principle keyword → response cue mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CueRule {
    /// Any of these (lowercase) in the principle activates the rule.
    pub principle_keywords: Vec<String>,
    /// Any of these (lowercase) in the response is a violation.
    pub response_cues: Vec<String>,
}

/// Lexicon backing the heuristic verifiers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeuristicLexicon {
    pub rules: Vec<CueRule>,
    /// Word count above which a brevity principle is violated.
    pub concise_max_words: usize,
}

fn rule(keywords: &[&str], cues: &[&str]) -> CueRule {
    CueRule {
        principle_keywords: keywords.iter().map(|s| s.to_string()).collect(),
        response_cues: cues.iter().map(|s| s.to_string()).collect(),
    }
}

impl Default for HeuristicLexicon {
    fn default() -> Self {
        Self {
            rules: vec![
                rule(
                    &["promise", "guarantee"],
                    &["guarantee", "i promise", "100%", "risk-free", "definitely will", "double your money"],
                ),
                rule(
                    &["polite", "respectful", "rude", "insult"],
                    &["idiot", "stupid", "shut up", "dumb", "moron"],
                ),
                rule(
                    &["financial advice", "investment"],
                    &["you should buy", "invest in", "double your money", "can't lose"],
                ),
                rule(
                    &["personal information", "privacy", "pii"],
                    &["social security number", "password is", "credit card number"],
                ),
                rule(
                    &["medical", "diagnos"],
                    &["you have", "you should take", "mg of", "diagnosis is"],
                ),
            ],
            concise_max_words: 60,
        }
    }
}

impl HeuristicLexicon {
    /// Load from a JSON file.
    pub fn from_path(path: &Path) -> Result<Self, ModelFault> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            ModelFault::Unavailable(format!("cannot read {}: {e}", path.display()))
        })?;
        serde_json::from_str(&text).map_err(|e| {
            ModelFault::Unavailable(format!("invalid lexicon {}: {e}", path.display()))
        })
    }

    /// Indices (0-based) of principles the response violates.
    pub fn violated(&self, principles: &[impl AsRef<str>], response: &str) -> Vec<usize> {
        let response_lower = response.to_lowercase();
        let words = response.split_whitespace().count();

        principles
            .iter()
            .enumerate()
            .filter(|(_, p)| {
                let p_lower = AsRef::<str>::as_ref(*p).to_lowercase();
                if (p_lower.contains("concise") || p_lower.contains("brief"))
                    && words > self.concise_max_words
                {
                    return true;
                }
                self.rules.iter().any(|r| {
                    r.principle_keywords.iter().any(|k| p_lower.contains(k.as_str()))
                        && r.response_cues.iter().any(|c| response_lower.contains(c.as_str()))
                })
            })
            .map(|(i, _)| i)
            .collect()
    }
}

/// Deterministic generative verifier over a [`HeuristicLexicon`].
///
/// Emits a fenced JSON verdict with 1-based principle indices and
/// synthetic token log-probabilities: confident (-0.05) when a cue fired,
/// less so (-0.2) for a clean verdict.
pub struct HeuristicCausalModel {
    lexicon: HeuristicLexicon,
}

impl HeuristicCausalModel {
    pub fn new(lexicon: HeuristicLexicon) -> Self {
        Self { lexicon }
    }
}

impl Default for HeuristicCausalModel {
    fn default() -> Self {
        Self::new(HeuristicLexicon::default())
    }
}

impl CausalModel for HeuristicCausalModel {
    fn generate(
        &mut self,
        prompt: &str,
        constraints: &GenerationConstraints,
    ) -> Result<Generation, ModelFault> {
        if constraints.is_expired() {
            return Err(ModelFault::DeadlineExceeded);
        }
        let Some((principles, response)) = split_verification_prompt(prompt) else {
            return Ok(Generation {
                text: "I can only judge verification prompts.".to_string(),
                tokens: Some(vec![TokenLogprob::new(
                    "I can only judge verification prompts.",
                    -2.0,
                )]),
            });
        };

        let violated = self.lexicon.violated(&principles, &response);
        let logprob = if violated.is_empty() { -0.2 } else { -0.05 };
        let confidence = f64::exp(logprob);
        let ids: Vec<String> = violated.iter().map(|i| (i + 1).to_string()).collect();

        let pieces = [
            "```json\n".to_string(),
            "{\"violations\": [".to_string(),
            ids.join(", "),
            "], \"confidence\": ".to_string(),
            format!("{confidence:.4}"),
            "}".to_string(),
            "\n```".to_string(),
        ];

        let mut tokens: Vec<TokenLogprob> = pieces
            .into_iter()
            .filter(|p| !p.is_empty())
            .map(|p| TokenLogprob::new(p, logprob))
            .collect();
        tokens.truncate(constraints.max_new_tokens);
        let text = tokens.iter().map(|t| t.text.as_str()).collect();

        Ok(Generation {
            text,
            tokens: Some(tokens),
        })
    }
}

/// Deterministic classifier over a [`HeuristicLexicon`].
pub struct HeuristicClassifier {
    lexicon: HeuristicLexicon,
}

impl HeuristicClassifier {
    pub fn new(lexicon: HeuristicLexicon) -> Self {
        Self { lexicon }
    }
}

impl Default for HeuristicClassifier {
    fn default() -> Self {
        Self::new(HeuristicLexicon::default())
    }
}

impl ClassifierModel for HeuristicClassifier {
    fn classify(
        &mut self,
        principles: &[Principle],
        response: &str,
        constraints: &GenerationConstraints,
    ) -> Result<f64, ModelFault> {
        if constraints.is_expired() {
            return Err(ModelFault::DeadlineExceeded);
        }
        let texts: Vec<&str> = principles.iter().map(Principle::as_str).collect();
        let hits: HashSet<usize> = self.lexicon.violated(&texts, response).into_iter().collect();
        Ok(if hits.is_empty() { 0.1 } else { 0.9 })
    }
}

/// Loads the heuristic models, reading the lexicon from `model_path` when set.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicLoader;

impl ModelLoader for HeuristicLoader {
    fn load(&self, config: &VerifierConfig) -> Result<LoadedModel, ModelFault> {
        let lexicon = match &config.model_path {
            Some(path) => HeuristicLexicon::from_path(path)?,
            None => HeuristicLexicon::default(),
        };
        Ok(match config.model_type {
            ModelType::Causal => LoadedModel::Causal(Box::new(HeuristicCausalModel::new(lexicon))),
            ModelType::Classifier => {
                LoadedModel::Classifier(Box::new(HeuristicClassifier::new(lexicon)))
            }
        })
    }
}

// ── Closure adapters ───────────────────────────────────────────────

type GenerateFn =
    Box<dyn FnMut(&str, &GenerationConstraints) -> Result<Generation, ModelFault> + Send>;

/// Causal model backed by a closure (FFI bridge, tests).
pub struct ExternalCausalModel {
    generate_fn: GenerateFn,
}

impl ExternalCausalModel {
    pub fn new(
        generate_fn: impl FnMut(&str, &GenerationConstraints) -> Result<Generation, ModelFault>
            + Send
            + 'static,
    ) -> Self {
        Self {
            generate_fn: Box::new(generate_fn),
        }
    }
}

impl CausalModel for ExternalCausalModel {
    fn generate(
        &mut self,
        prompt: &str,
        constraints: &GenerationConstraints,
    ) -> Result<Generation, ModelFault> {
        (self.generate_fn)(prompt, constraints)
    }
}

type ClassifyFn =
    Box<dyn FnMut(&[Principle], &str, &GenerationConstraints) -> Result<f64, ModelFault> + Send>;

/// Classifier backed by a closure (FFI bridge, tests).
pub struct ExternalClassifier {
    classify_fn: ClassifyFn,
}

impl ExternalClassifier {
    pub fn new(
        classify_fn: impl FnMut(&[Principle], &str, &GenerationConstraints) -> Result<f64, ModelFault>
            + Send
            + 'static,
    ) -> Self {
        Self {
            classify_fn: Box::new(classify_fn),
        }
    }
}

impl ClassifierModel for ExternalClassifier {
    fn classify(
        &mut self,
        principles: &[Principle],
        response: &str,
        constraints: &GenerationConstraints,
    ) -> Result<f64, ModelFault> {
        (self.classify_fn)(principles, response, constraints)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::prompt::verification_prompt;

    fn constraints() -> GenerationConstraints {
        GenerationConstraints::new(256, Duration::from_secs(5))
    }

    #[test]
    fn test_lexicon_flags_promise() {
        let lex = HeuristicLexicon::default();
        let hits = lex.violated(
            &["Never make promises you cannot keep"],
            "I guarantee you will double your money.",
        );
        assert_eq!(hits, vec![0]);
    }

    #[test]
    fn test_lexicon_concise() {
        let lex = HeuristicLexicon::default();
        assert!(lex.violated(&["Be concise"], "OK.").is_empty());
        let long = "word ".repeat(100);
        assert_eq!(lex.violated(&["Be concise"], &long), vec![0]);
    }

    #[test]
    fn test_heuristic_causal_emits_indices() {
        let mut model = HeuristicCausalModel::default();
        let ps = vec![Principle::new("Be concise"), Principle::new("Be polite")];
        let prompt = verification_prompt(&ps, "Shut up, idiot.");
        let gen = model.generate(&prompt, &constraints()).unwrap();
        assert!(gen.text.contains("\"violations\": [2]"));
        let joined: String = gen.tokens.unwrap().iter().map(|t| t.text.as_str()).collect();
        assert_eq!(joined, gen.text);
    }

    #[test]
    fn test_heuristic_causal_respects_token_cap() {
        let mut model = HeuristicCausalModel::default();
        let prompt = verification_prompt(&[Principle::new("Be concise")], "OK.");
        let gen = model
            .generate(&prompt, &GenerationConstraints::new(2, Duration::from_secs(5)))
            .unwrap();
        assert_eq!(gen.tokens.unwrap().len(), 2);
        assert!(!gen.text.contains('}'));
    }

    #[test]
    fn test_heuristic_causal_expired_deadline() {
        let mut model = HeuristicCausalModel::default();
        let expired = GenerationConstraints::new(10, Duration::ZERO);
        assert_eq!(
            model.generate("x", &expired).unwrap_err(),
            ModelFault::DeadlineExceeded
        );
    }

    #[test]
    fn test_heuristic_classifier() {
        let mut model = HeuristicClassifier::default();
        let ps = vec![Principle::new("Be polite")];
        let p = model.classify(&ps, "you are stupid", &constraints()).unwrap();
        assert!(p > 0.5);
        let p = model.classify(&ps, "thank you", &constraints()).unwrap();
        assert!(p < 0.5);
    }

    #[test]
    fn test_loader_reads_lexicon_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"rules": [{{"principle_keywords": ["pirate"], "response_cues": ["arr"]}}]}}"#
        )
        .unwrap();
        let config = VerifierConfig {
            model_path: Some(file.path().to_path_buf()),
            model_type: ModelType::Classifier,
            ..Default::default()
        };
        let LoadedModel::Classifier(mut model) = HeuristicLoader.load(&config).unwrap() else {
            panic!("expected classifier");
        };
        let ps = vec![Principle::new("No pirate talk")];
        assert!(model.classify(&ps, "arr matey", &constraints()).unwrap() > 0.5);
    }

    #[test]
    fn test_loader_missing_file_unavailable() {
        let config = VerifierConfig {
            model_path: Some("/nonexistent/verifier.json".into()),
            ..Default::default()
        };
        assert!(matches!(
            HeuristicLoader.load(&config),
            Err(ModelFault::Unavailable(_))
        ));
    }

    #[test]
    fn test_closure_loader() {
        let loader = |_: &VerifierConfig| -> Result<LoadedModel, ModelFault> {
            Ok(LoadedModel::Classifier(Box::new(ExternalClassifier::new(
                |_, _, _| Ok(0.25),
            ))))
        };
        let model = loader.load(&VerifierConfig::default()).unwrap();
        assert_eq!(model.model_type(), ModelType::Classifier);
    }
}

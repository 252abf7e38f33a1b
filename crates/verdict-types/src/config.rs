// ─────────────────────────────────────────────────────────────────────
// Director-Class AI — Verdict Kernel Configuration
// ─────────────────────────────────────────────────────────────────────

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{VerdictError, VerdictResult};

/// Which verifier capability the loaded model provides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelType {
    /// Generative model emitting a JSON verdict.
    Causal,
    /// Binary classifier conditioned on the principle set.
    Classifier,
}

/// What to do with callers arriving while inference is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueuePolicy {
    /// Block up to `queue_wait_timeout_ms`, then fail with `busy`.
    Wait,
    /// Fail with `busy` immediately.
    Reject,
}

/// Handling of violation strings that match no supplied principle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownPrinciplePolicy {
    /// Treat the whole output as malformed (`unknown_principle`).
    Reject,
    /// Drop the entry with a warning and keep the rest.
    Drop,
}

/// Verification engine and service settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifierConfig {
    /// Location of the verifier artifact. `None` uses the built-in lexicon.
    pub model_path: Option<PathBuf>,

    /// Default: causal.
    pub model_type: ModelType,

    /// Generation cap for the causal strategy.
    /// Default: 256.
    pub max_new_tokens: usize,

    /// Per-inference budget.
    /// Default: 2000.
    pub inference_timeout_ms: u64,

    /// Default: wait.
    pub queue_policy: QueuePolicy,

    /// Longest a caller waits for the model under `QueuePolicy::Wait`.
    /// Default: 5000.
    pub queue_wait_timeout_ms: u64,

    /// Default: reject.
    pub unknown_principle: UnknownPrinciplePolicy,

    /// Classifier decision threshold on P(violation).
    /// Default: 0.5.
    pub classifier_threshold: f64,

    /// Number of inference windows retained for overlap auditing.
    /// Default: 1024.
    pub window_log_capacity: usize,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            model_path: None,
            model_type: ModelType::Causal,
            max_new_tokens: 256,
            inference_timeout_ms: 2000,
            queue_policy: QueuePolicy::Wait,
            queue_wait_timeout_ms: 5000,
            unknown_principle: UnknownPrinciplePolicy::Reject,
            classifier_threshold: 0.5,
            window_log_capacity: 1024,
        }
    }
}

impl VerifierConfig {
    pub fn inference_timeout(&self) -> Duration {
        Duration::from_millis(self.inference_timeout_ms)
    }

    pub fn queue_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.queue_wait_timeout_ms)
    }

    pub fn validate(&self) -> VerdictResult<()> {
        if self.max_new_tokens == 0 {
            return Err(VerdictError::Config(
                "max_new_tokens must be > 0".to_string(),
            ));
        }
        if self.inference_timeout_ms == 0 {
            return Err(VerdictError::Config(
                "inference_timeout_ms must be > 0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.classifier_threshold) {
            return Err(VerdictError::Config(format!(
                "classifier_threshold must be in [0, 1], got {}",
                self.classifier_threshold
            )));
        }
        Ok(())
    }
}

/// Refinement orchestrator settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefinementConfig {
    /// Revisions allowed after the first draft; `k` permits `k + 1`
    /// verifying steps.
    /// Default: 3.
    pub max_iters: u32,

    /// Extra attempts per failing step (draft or verify).
    /// Default: 2.
    pub max_retries: u32,

    /// First backoff delay; doubles per retry.
    /// Default: 100.
    pub retry_backoff_ms: u64,

    /// Default: 2000.
    pub max_backoff_ms: u64,

    /// Token cap passed to the drafting model.
    /// Default: 1024.
    pub draft_max_tokens: usize,

    /// Budget per draft generation.
    /// Default: 30000.
    pub draft_timeout_ms: u64,

    /// End the run as exhausted when two consecutive verdicts flag
    /// exactly the same principle set.
    /// Default: false.
    pub stop_on_no_progress: bool,

    /// JSONL file receiving each trace entry as it is appended.
    pub trace_path: Option<PathBuf>,
}

impl Default for RefinementConfig {
    fn default() -> Self {
        Self {
            max_iters: 3,
            max_retries: 2,
            retry_backoff_ms: 100,
            max_backoff_ms: 2000,
            draft_max_tokens: 1024,
            draft_timeout_ms: 30_000,
            stop_on_no_progress: false,
            trace_path: None,
        }
    }
}

impl RefinementConfig {
    /// Delay before retry number `retry` (1-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u64.checked_shl(retry.saturating_sub(1)).unwrap_or(u64::MAX);
        let ms = self
            .retry_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }

    pub fn validate(&self) -> VerdictResult<()> {
        if self.draft_max_tokens == 0 {
            return Err(VerdictError::Config(
                "draft_max_tokens must be > 0".to_string(),
            ));
        }
        if self.draft_timeout_ms == 0 {
            return Err(VerdictError::Config(
                "draft_timeout_ms must be > 0".to_string(),
            ));
        }
        if self.max_backoff_ms < self.retry_backoff_ms {
            return Err(VerdictError::Config(format!(
                "max_backoff_ms ({}) must be >= retry_backoff_ms ({})",
                self.max_backoff_ms, self.retry_backoff_ms
            )));
        }
        Ok(())
    }
}

/// HTTP boundary settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Default: 127.0.0.1:8080.
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
        }
    }
}

/// Complete runtime configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    pub verifier: VerifierConfig,
    pub refinement: RefinementConfig,
    pub server: ServerConfig,
}

impl KernelConfig {
    pub fn validate(&self) -> VerdictResult<()> {
        self.verifier.validate()?;
        self.refinement.validate()?;
        if self.server.bind.trim().is_empty() {
            return Err(VerdictError::Config("server.bind must be set".to_string()));
        }
        Ok(())
    }

    /// Load from JSON string.
    pub fn from_json(json: &str) -> VerdictResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| VerdictError::Config(format!("JSON parse error: {e}")))
    }

    /// Overlay `VERDICT_*` variables from the process environment.
    pub fn apply_env(&mut self) -> VerdictResult<()> {
        self.apply_env_with(|key| std::env::var(key).ok())
    }

    /// Overlay `VERDICT_*` variables using `lookup`.
    pub fn apply_env_with(&mut self, lookup: impl Fn(&str) -> Option<String>) -> VerdictResult<()> {
        if let Some(v) = lookup("VERDICT_MODEL_PATH") {
            self.verifier.model_path = if v.is_empty() { None } else { Some(PathBuf::from(v)) };
        }
        if let Some(v) = lookup("VERDICT_MODEL_TYPE") {
            self.verifier.model_type = match v.as_str() {
                "causal" => ModelType::Causal,
                "classifier" => ModelType::Classifier,
                other => {
                    return Err(VerdictError::Config(format!(
                        "VERDICT_MODEL_TYPE must be causal or classifier, got {other:?}"
                    )))
                }
            };
        }
        if let Some(v) = lookup("VERDICT_QUEUE_POLICY") {
            self.verifier.queue_policy = match v.as_str() {
                "wait" => QueuePolicy::Wait,
                "reject" => QueuePolicy::Reject,
                other => {
                    return Err(VerdictError::Config(format!(
                        "VERDICT_QUEUE_POLICY must be wait or reject, got {other:?}"
                    )))
                }
            };
        }
        if let Some(v) = lookup("VERDICT_UNKNOWN_PRINCIPLE") {
            self.verifier.unknown_principle = match v.as_str() {
                "reject" => UnknownPrinciplePolicy::Reject,
                "drop" => UnknownPrinciplePolicy::Drop,
                other => {
                    return Err(VerdictError::Config(format!(
                        "VERDICT_UNKNOWN_PRINCIPLE must be reject or drop, got {other:?}"
                    )))
                }
            };
        }
        if let Some(v) = lookup("VERDICT_MAX_NEW_TOKENS") {
            self.verifier.max_new_tokens = parse_env("VERDICT_MAX_NEW_TOKENS", &v)?;
        }
        if let Some(v) = lookup("VERDICT_INFERENCE_TIMEOUT_MS") {
            self.verifier.inference_timeout_ms = parse_env("VERDICT_INFERENCE_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("VERDICT_QUEUE_WAIT_MS") {
            self.verifier.queue_wait_timeout_ms = parse_env("VERDICT_QUEUE_WAIT_MS", &v)?;
        }
        if let Some(v) = lookup("VERDICT_MAX_ITERS") {
            self.refinement.max_iters = parse_env("VERDICT_MAX_ITERS", &v)?;
        }
        if let Some(v) = lookup("VERDICT_MAX_RETRIES") {
            self.refinement.max_retries = parse_env("VERDICT_MAX_RETRIES", &v)?;
        }
        if let Some(v) = lookup("VERDICT_RETRY_BACKOFF_MS") {
            self.refinement.retry_backoff_ms = parse_env("VERDICT_RETRY_BACKOFF_MS", &v)?;
        }
        if let Some(v) = lookup("VERDICT_BIND") {
            self.server.bind = v;
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> VerdictResult<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| VerdictError::Config(format!("{key}={value:?}: {e}")))
}

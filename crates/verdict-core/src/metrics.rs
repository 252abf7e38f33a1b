// ─────────────────────────────────────────────────────────────────────
// Director-Class AI — Verifier Metrics
// ─────────────────────────────────────────────────────────────────────
//! Prometheus metrics for the verification service and refinement runs.
//!
//! | Metric | Type | Labels |
//! |--------|------|--------|
//! | `verdict_requests_total` | Counter | `outcome` |
//! | `verdict_violations_total` | Counter | `principle` |
//! | `verdict_parse_failures_total` | Counter | `reason` |
//! | `verdict_degraded_confidence_total` | Counter | — |
//! | `verdict_inference_latency_seconds` | Histogram | `model_type` |
//! | `verdict_queue_depth` | Gauge | — |
//! | `verdict_model_loaded` | Gauge | — |
//! | `verdict_refinement_runs_total` | Counter | `status` |
//! | `verdict_refinement_iterations` | Histogram | — |
//!
//! On Linux the process collector adds resident/virtual memory and CPU.
//!
//! Principle labels are caller-supplied text, so `verdict_violations_total`
//! keeps at most [`MAX_PRINCIPLE_SERIES`] distinct values; later ones are
//! counted under [`OVERFLOW_PRINCIPLE_LABEL`].

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;

use prometheus::{
    Counter, CounterVec, Encoder, Gauge, Histogram, HistogramOpts, HistogramVec, Opts, Registry,
    TextEncoder,
};
use thiserror::Error;

/// Maximum length for label values; principle texts can be arbitrarily long.
pub const MAX_LABEL_VALUE_LEN: usize = 64;

/// Distinct `principle` label values before overflow.
pub const MAX_PRINCIPLE_SERIES: usize = 256;

/// Label for principles seen after the series cap is reached.
pub const OVERFLOW_PRINCIPLE_LABEL: &str = "_other";

/// Inference latency buckets (seconds).
pub const INFERENCE_LATENCY_BUCKETS: &[f64] =
    &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

/// Verifying steps per refinement run.
pub const REFINEMENT_ITERATION_BUCKETS: &[f64] = &[1.0, 2.0, 3.0, 4.0, 5.0, 8.0, 13.0];

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("failed to register metric: {0}")]
    RegistrationFailed(#[from] prometheus::Error),

    #[error("failed to encode metrics: {0}")]
    EncodingFailed(String),
}

pub type MetricsResult<T> = Result<T, MetricsError>;

/// All verifier metric handles. Cheap to clone; every handle shares
/// the same underlying series.
#[derive(Clone)]
pub struct VerifierMetrics {
    requests_total: CounterVec,
    violations_total: CounterVec,
    parse_failures_total: CounterVec,
    degraded_confidence_total: Counter,
    inference_latency: HistogramVec,
    queue_depth: Gauge,
    model_loaded: Gauge,
    refinement_runs_total: CounterVec,
    refinement_iterations: Histogram,
    principle_labels: Arc<Mutex<HashSet<String>>>,
}

impl VerifierMetrics {
    pub fn new(registry: &Registry) -> MetricsResult<Self> {
        let requests_total = CounterVec::new(
            Opts::new("verdict_requests_total", "Verification requests served"),
            &["outcome"],
        )?;
        registry.register(Box::new(requests_total.clone()))?;

        let violations_total = CounterVec::new(
            Opts::new("verdict_violations_total", "Violations found, by principle"),
            &["principle"],
        )?;
        registry.register(Box::new(violations_total.clone()))?;

        let parse_failures_total = CounterVec::new(
            Opts::new(
                "verdict_parse_failures_total",
                "Model outputs that did not conform to the verdict schema",
            ),
            &["reason"],
        )?;
        registry.register(Box::new(parse_failures_total.clone()))?;

        let degraded_confidence_total = Counter::with_opts(Opts::new(
            "verdict_degraded_confidence_total",
            "Verdicts whose confidence fell back to the neutral default",
        ))?;
        registry.register(Box::new(degraded_confidence_total.clone()))?;

        let inference_latency = HistogramVec::new(
            HistogramOpts::new(
                "verdict_inference_latency_seconds",
                "Model inference latency, excluding queue wait",
            )
            .buckets(INFERENCE_LATENCY_BUCKETS.to_vec()),
            &["model_type"],
        )?;
        registry.register(Box::new(inference_latency.clone()))?;

        let queue_depth = Gauge::with_opts(Opts::new(
            "verdict_queue_depth",
            "Callers waiting for the model",
        ))?;
        registry.register(Box::new(queue_depth.clone()))?;

        let model_loaded = Gauge::with_opts(Opts::new(
            "verdict_model_loaded",
            "1 when a verifier model is loaded",
        ))?;
        registry.register(Box::new(model_loaded.clone()))?;

        let refinement_runs_total = CounterVec::new(
            Opts::new("verdict_refinement_runs_total", "Refinement runs by terminal status"),
            &["status"],
        )?;
        registry.register(Box::new(refinement_runs_total.clone()))?;

        let refinement_iterations = Histogram::with_opts(
            HistogramOpts::new(
                "verdict_refinement_iterations",
                "Verifying steps taken per refinement run",
            )
            .buckets(REFINEMENT_ITERATION_BUCKETS.to_vec()),
        )?;
        registry.register(Box::new(refinement_iterations.clone()))?;

        Ok(Self {
            requests_total,
            violations_total,
            parse_failures_total,
            degraded_confidence_total,
            inference_latency,
            queue_depth,
            model_loaded,
            refinement_runs_total,
            refinement_iterations,
            principle_labels: Arc::new(Mutex::new(HashSet::new())),
        })
    }

    /// Metrics bound to a private registry, for components built in
    /// isolation (tests, embedded use).
    pub fn detached() -> MetricsResult<Self> {
        Ok(MetricsRegistry::new()?.verifier_metrics().clone())
    }

    // ── Requests ────────────────────────────────────────────────────

    /// `outcome` is `ok` or an error code.
    pub fn request_completed(&self, outcome: &str) {
        self.requests_total
            .with_label_values(&[truncate_label(outcome)])
            .inc();
    }

    pub fn request_count(&self, outcome: &str) -> f64 {
        self.requests_total
            .with_label_values(&[truncate_label(outcome)])
            .get()
    }

    pub fn violation_found(&self, principle: &str) {
        let label = self.principle_label(principle, true);
        self.violations_total.with_label_values(&[label]).inc();
    }

    pub fn violation_count(&self, principle: &str) -> f64 {
        let label = self.principle_label(principle, false);
        self.violations_total.with_label_values(&[label]).get()
    }

    fn principle_label<'a>(&self, principle: &'a str, admit: bool) -> &'a str {
        let label = truncate_label(principle);
        let mut seen = self.principle_labels.lock();
        if seen.contains(label) {
            return label;
        }
        if seen.len() >= MAX_PRINCIPLE_SERIES {
            return OVERFLOW_PRINCIPLE_LABEL;
        }
        if admit {
            seen.insert(label.to_string());
        }
        label
    }

    pub fn parse_failed(&self, reason: &str) {
        self.parse_failures_total
            .with_label_values(&[truncate_label(reason)])
            .inc();
    }

    pub fn parse_failure_count(&self, reason: &str) -> f64 {
        self.parse_failures_total
            .with_label_values(&[truncate_label(reason)])
            .get()
    }

    pub fn confidence_degraded(&self) {
        self.degraded_confidence_total.inc();
    }

    pub fn degraded_confidence_count(&self) -> f64 {
        self.degraded_confidence_total.get()
    }

    pub fn record_inference_latency(&self, model_type: &str, latency_secs: f64) {
        self.inference_latency
            .with_label_values(&[truncate_label(model_type)])
            .observe(latency_secs);
    }

    pub fn inference_sample_count(&self, model_type: &str) -> u64 {
        self.inference_latency
            .with_label_values(&[truncate_label(model_type)])
            .get_sample_count()
    }

    // ── Gauges ──────────────────────────────────────────────────────

    pub fn set_queue_depth(&self, depth: usize) {
        self.queue_depth.set(depth as f64);
    }

    pub fn queue_depth(&self) -> f64 {
        self.queue_depth.get()
    }

    pub fn set_model_loaded(&self, loaded: bool) {
        self.model_loaded.set(if loaded { 1.0 } else { 0.0 });
    }

    pub fn model_loaded(&self) -> f64 {
        self.model_loaded.get()
    }

    // ── Refinement ──────────────────────────────────────────────────

    pub fn refinement_finished(&self, status: &str, verifying_steps: u32) {
        self.refinement_runs_total
            .with_label_values(&[truncate_label(status)])
            .inc();
        self.refinement_iterations.observe(f64::from(verifying_steps));
    }

    pub fn refinement_count(&self, status: &str) -> f64 {
        self.refinement_runs_total
            .with_label_values(&[truncate_label(status)])
            .get()
    }
}

/// Owns the Prometheus registry and the verifier metric handles.
#[derive(Clone)]
pub struct MetricsRegistry {
    registry: Registry,
    verifier_metrics: VerifierMetrics,
}

impl MetricsRegistry {
    pub fn new() -> MetricsResult<Self> {
        let registry = Registry::new();
        let verifier_metrics = VerifierMetrics::new(&registry)?;
        Ok(Self {
            registry,
            verifier_metrics,
        })
    }

    /// Registry with the process collector attached (Linux only).
    pub fn with_process_metrics() -> MetricsResult<Self> {
        let this = Self::new()?;
        #[cfg(target_os = "linux")]
        this.registry.register(Box::new(
            prometheus::process_collector::ProcessCollector::for_self(),
        ))?;
        Ok(this)
    }

    pub fn verifier_metrics(&self) -> &VerifierMetrics {
        &self.verifier_metrics
    }

    /// Prometheus text exposition, as served from `/metrics`.
    pub fn encode_text(&self) -> MetricsResult<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| MetricsError::EncodingFailed(e.to_string()))?;
        String::from_utf8(buffer).map_err(|e| MetricsError::EncodingFailed(e.to_string()))
    }

    pub fn prometheus_registry(&self) -> &Registry {
        &self.registry
    }
}

pub type SharedMetricsRegistry = Arc<MetricsRegistry>;

/// Truncate at a UTF-8 boundary no later than [`MAX_LABEL_VALUE_LEN`] bytes.
fn truncate_label(value: &str) -> &str {
    if value.len() <= MAX_LABEL_VALUE_LEN {
        return value;
    }
    let end = value
        .char_indices()
        .map(|(i, _)| i)
        .take_while(|&i| i <= MAX_LABEL_VALUE_LEN)
        .last()
        .unwrap_or(0);
    &value[..end]
}

#[cfg(test)]
#[allow(clippy::float_cmp)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_encodes() {
        let registry = MetricsRegistry::new().unwrap();
        assert!(registry.encode_text().is_ok());
    }

    #[test]
    fn test_request_and_violation_counters() {
        let registry = MetricsRegistry::new().unwrap();
        let m = registry.verifier_metrics();
        m.request_completed("ok");
        m.request_completed("ok");
        m.request_completed("timeout");
        m.violation_found("Be concise");
        assert_eq!(m.request_count("ok"), 2.0);
        assert_eq!(m.request_count("timeout"), 1.0);
        assert_eq!(m.violation_count("Be concise"), 1.0);
    }

    #[test]
    fn test_gauges() {
        let m = VerifierMetrics::detached().unwrap();
        m.set_model_loaded(true);
        m.set_queue_depth(3);
        assert_eq!(m.model_loaded(), 1.0);
        assert_eq!(m.queue_depth(), 3.0);
        m.set_model_loaded(false);
        assert_eq!(m.model_loaded(), 0.0);
    }

    #[test]
    fn test_text_exposition_families() {
        let registry = MetricsRegistry::new().unwrap();
        let m = registry.verifier_metrics();
        m.request_completed("ok");
        m.violation_found("Be polite");
        m.parse_failed("type_mismatch");
        m.confidence_degraded();
        m.record_inference_latency("causal", 0.02);
        m.set_queue_depth(0);
        m.set_model_loaded(true);
        m.refinement_finished("passed", 2);

        let out = registry.encode_text().unwrap();
        for family in [
            "verdict_requests_total",
            "verdict_violations_total",
            "verdict_parse_failures_total",
            "verdict_degraded_confidence_total",
            "verdict_inference_latency_seconds",
            "verdict_queue_depth",
            "verdict_model_loaded",
            "verdict_refinement_runs_total",
            "verdict_refinement_iterations",
        ] {
            assert!(out.contains(family), "missing {family}");
        }
    }

    #[test]
    fn test_long_principle_label_truncated() {
        let registry = MetricsRegistry::new().unwrap();
        let m = registry.verifier_metrics();
        let long = "Never ".repeat(40);
        m.violation_found(&long);
        assert_eq!(m.violation_count(&long), 1.0);
        let out = registry.encode_text().unwrap();
        assert!(!out.contains(&long));
    }

    #[test]
    fn test_principle_series_capped() {
        let registry = MetricsRegistry::new().unwrap();
        let m = registry.verifier_metrics();
        for i in 0..MAX_PRINCIPLE_SERIES {
            m.violation_found(&format!("principle {i}"));
        }
        m.violation_found("one too many");
        m.violation_found("and another");
        m.violation_found("principle 0");

        assert_eq!(m.violation_count("principle 0"), 2.0);
        assert_eq!(m.violation_count("one too many"), 2.0);
        let out = registry.encode_text().unwrap();
        assert!(out.contains(OVERFLOW_PRINCIPLE_LABEL));
        assert!(!out.contains("one too many"));
    }

    #[test]
    fn test_truncate_label_utf8_boundary() {
        let boundary = format!("{}{}", "a".repeat(63), "\u{1F600}");
        assert_eq!(truncate_label(&boundary), "a".repeat(63));
        let emojis = "\u{1F600}".repeat(20);
        assert_eq!(truncate_label(&emojis).len(), 64);
    }
}

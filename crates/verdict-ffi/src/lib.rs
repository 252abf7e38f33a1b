// ─────────────────────────────────────────────────────────────────────
// Director-Class AI — Verdict Kernel PyO3 FFI Bindings
// (C) 1998-2026 Miroslav Sotek. All rights reserved.
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
// Note: #[deny(unsafe_code)] not applied — PyO3 proc macros generate
// unsafe blocks internally. All hand-written code in this crate is safe.
//! Python-callable wrappers around the Verdict Kernel.
//!
//! Exposes `RustVerifier`, `RustRefiner`, `Verdict` and `parse_verdict`
//! to Python via PyO3. The verifier model and the drafting model are
//! Python callables; everything between them runs in Rust.
//!
//! # FFI Safety
//!
//! - The GIL is released around `verify` and `run`, and reacquired via
//!   `Python::with_gil` inside every callback.
//! - Python exceptions in callbacks become typed model/generator faults,
//!   which surface as `model_unavailable` or an aborted run.
//! - No borrowed references escape the GIL lock scope.
//! - Config is validated before use.
//!
//! Usage from Python:
//! ```python
//! from verdict_kernel import RustVerifier
//!
//! verifier = RustVerifier(generate_callback=lambda prompt, max_tokens: my_llm(prompt))
//! verdict = verifier.verify(["Be polite"], "Thanks for asking!")
//! ```

use std::sync::Arc;

use parking_lot::Mutex;
use pyo3::create_exception;
use pyo3::exceptions::{PyException, PyValueError};
use pyo3::prelude::*;
use pyo3::types::PyDict;

use verdict_core::{
    CancellationToken, ExternalCausalModel, ExternalClassifier, ExternalGenerator, Generation,
    GenerationConstraints, HeuristicLoader, LoadedModel, MetricsRegistry, ModelLoader,
    RefinementOrchestrator, TokenLogprob, VerificationService, Verifier,
};
use verdict_types::{
    AbortReason, GeneratorError, ModelFault, ModelType, ParseOutcome, Principle, RefinementConfig,
    UnknownPrinciplePolicy, VerificationRequest, VerifierConfig, VerifyError, VerifyResponse,
};

create_exception!(verdict_kernel, VerificationError, PyException);

fn to_py_err(err: VerifyError) -> PyErr {
    match err {
        VerifyError::InvalidRequest(msg) => PyValueError::new_err(msg),
        other => VerificationError::new_err((other.code().as_str(), other.to_string())),
    }
}

fn parse_policy(policy: &str) -> PyResult<UnknownPrinciplePolicy> {
    match policy {
        "reject" => Ok(UnknownPrinciplePolicy::Reject),
        "drop" => Ok(UnknownPrinciplePolicy::Drop),
        other => Err(PyValueError::new_err(format!(
            "unknown_principle must be 'reject' or 'drop', got {other:?}"
        ))),
    }
}

// ─── Verdict ────────────────────────────────────────────────────────

/// Python-visible verdict.
#[pyclass(name = "Verdict", frozen)]
#[derive(Clone)]
struct PyVerdict {
    violations: Vec<String>,
    confidence: f64,
    latency_ms: u64,
}

impl From<VerifyResponse> for PyVerdict {
    fn from(resp: VerifyResponse) -> Self {
        Self {
            violations: resp
                .verdict
                .violations()
                .iter()
                .map(|p| p.as_str().to_string())
                .collect(),
            confidence: resp.verdict.confidence(),
            latency_ms: resp.latency_ms,
        }
    }
}

#[pymethods]
impl PyVerdict {
    #[getter]
    fn violations(&self) -> Vec<String> {
        self.violations.clone()
    }

    #[getter]
    fn confidence(&self) -> f64 {
        self.confidence
    }

    #[getter]
    fn latency_ms(&self) -> u64 {
        self.latency_ms
    }

    fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }

    fn to_dict<'py>(&self, py: Python<'py>) -> PyResult<Bound<'py, PyDict>> {
        let dict = PyDict::new(py);
        dict.set_item("violations", self.violations.clone())?;
        dict.set_item("confidence", self.confidence)?;
        dict.set_item("latency_ms", self.latency_ms)?;
        Ok(dict)
    }

    fn __repr__(&self) -> String {
        format!(
            "Verdict(violations={:?}, confidence={:.4}, latency_ms={})",
            self.violations, self.confidence, self.latency_ms
        )
    }
}

// ─── parse_verdict ──────────────────────────────────────────────────

/// Parse raw verifier output against `principles`.
///
/// Returns a dict: `{"valid": True, "violations": [...], "confidence": x}`
/// or `{"valid": False, "reason": ..., "detail": ...}`.
#[pyfunction]
#[pyo3(signature = (raw, principles, unknown_principle = "reject"))]
fn parse_verdict<'py>(
    py: Python<'py>,
    raw: &str,
    principles: Vec<String>,
    unknown_principle: &str,
) -> PyResult<Bound<'py, PyDict>> {
    let policy = parse_policy(unknown_principle)?;
    let principles: Vec<Principle> = principles.into_iter().map(Principle::new).collect();
    let dict = PyDict::new(py);
    match verdict_core::parse_verdict(raw, &principles, policy) {
        ParseOutcome::Valid(verdict) => {
            dict.set_item("valid", true)?;
            let violations: Vec<&str> = verdict.violations().iter().map(|p| p.as_str()).collect();
            dict.set_item("violations", violations)?;
            dict.set_item("confidence", verdict.confidence())?;
        }
        ParseOutcome::Malformed { reason, detail, .. } => {
            dict.set_item("valid", false)?;
            dict.set_item("reason", reason.as_str())?;
            dict.set_item("detail", detail)?;
        }
    }
    Ok(dict)
}

// ─── RustVerifier ───────────────────────────────────────────────────

/// Seconds left before `constraints` expire, handed to Python callbacks.
fn timeout_secs(constraints: &GenerationConstraints) -> f64 {
    constraints.remaining().as_secs_f64()
}

fn python_generate(
    cb: &PyObject,
    prompt: &str,
    constraints: &GenerationConstraints,
) -> Result<Generation, ModelFault> {
    Python::with_gil(|py| {
        let result = cb
            .call1(py, (prompt, constraints.max_new_tokens, timeout_secs(constraints)))
            .map_err(|e| ModelFault::Failed(e.to_string()))?;
        if let Ok((text, tokens)) = result.extract::<(String, Vec<(String, f64)>)>(py) {
            return Ok(Generation {
                text,
                tokens: Some(
                    tokens
                        .into_iter()
                        .map(|(t, lp)| TokenLogprob::new(t, lp))
                        .collect(),
                ),
            });
        }
        result
            .extract::<String>(py)
            .map(Generation::text_only)
            .map_err(|e| ModelFault::Failed(format!("generate callback returned {e}")))
    })
}

fn python_classify(
    cb: &PyObject,
    principles: Vec<String>,
    response: &str,
    constraints: &GenerationConstraints,
) -> Result<f64, ModelFault> {
    Python::with_gil(|py| {
        cb.call1(py, (principles, response, timeout_secs(constraints)))
            .and_then(|r| r.extract::<f64>(py))
            .map_err(|e| ModelFault::Failed(e.to_string()))
    })
}

/// Loader backed by Python callables; falls back to the heuristic models.
fn python_loader(
    generate_callback: Option<PyObject>,
    classify_callback: Option<PyObject>,
) -> Arc<dyn ModelLoader> {
    if generate_callback.is_none() && classify_callback.is_none() {
        return Arc::new(HeuristicLoader);
    }
    Arc::new(move |config: &VerifierConfig| -> Result<LoadedModel, ModelFault> {
        match config.model_type {
            ModelType::Causal => {
                let cb = generate_callback.as_ref().ok_or_else(|| {
                    ModelFault::Unavailable("model_type 'causal' needs generate_callback".into())
                })?;
                let cb = Python::with_gil(|py| cb.clone_ref(py));
                Ok(LoadedModel::Causal(Box::new(ExternalCausalModel::new(
                    move |prompt, constraints| python_generate(&cb, prompt, constraints),
                ))))
            }
            ModelType::Classifier => {
                let cb = classify_callback.as_ref().ok_or_else(|| {
                    ModelFault::Unavailable(
                        "model_type 'classifier' needs classify_callback".into(),
                    )
                })?;
                let cb = Python::with_gil(|py| cb.clone_ref(py));
                Ok(LoadedModel::Classifier(Box::new(ExternalClassifier::new(
                    move |principles, response, constraints| {
                        let texts = principles.iter().map(|p| p.as_str().to_string()).collect();
                        python_classify(&cb, texts, response, constraints)
                    },
                ))))
            }
        }
    })
}

/// Verification service exposed to Python.
///
/// Args:
///     config_json: Optional JSON for the verifier config.
///     generate_callback: Callable[[str, int, float], str | tuple[str, list[tuple[str, float]]]]
///         for a causal verifier, called with the prompt, the token cap and
///         the seconds left in the inference budget; the optional token
///         list carries log-probs.
///     classify_callback: Callable[[list[str], str, float], float] returning
///         the probability of a violation, for a classifier verifier.
///
/// A callback still running when its budget ends is abandoned: the call
/// raises VerificationError("timeout", ...) and the result is discarded.
///
/// With neither callback the built-in heuristic verifier is used.
#[pyclass(name = "RustVerifier")]
struct PyVerifier {
    service: Arc<VerificationService>,
    registry: Arc<MetricsRegistry>,
}

#[pymethods]
impl PyVerifier {
    #[new]
    #[pyo3(signature = (config_json = None, generate_callback = None, classify_callback = None))]
    fn new(
        py: Python<'_>,
        config_json: Option<&str>,
        generate_callback: Option<PyObject>,
        classify_callback: Option<PyObject>,
    ) -> PyResult<Self> {
        let mut config: VerifierConfig = match config_json {
            Some(json) => serde_json::from_str(json)
                .map_err(|e| PyValueError::new_err(format!("invalid verifier config: {e}")))?,
            None => VerifierConfig::default(),
        };
        if config_json.is_none() && generate_callback.is_none() && classify_callback.is_some() {
            config.model_type = ModelType::Classifier;
        }
        config
            .validate()
            .map_err(|e| PyValueError::new_err(e.to_string()))?;

        let registry = Arc::new(
            MetricsRegistry::new().map_err(|e| PyValueError::new_err(e.to_string()))?,
        );
        let service = VerificationService::new(
            config,
            python_loader(generate_callback, classify_callback),
            registry.verifier_metrics().clone(),
        );
        // Loading may call into Python; release the GIL meanwhile.
        py.allow_threads(|| service.load_model()).map_err(to_py_err)?;

        Ok(Self {
            service: Arc::new(service),
            registry,
        })
    }

    /// Verify `response` against `principles`.
    ///
    /// Raises ValueError for invalid input, VerificationError(code, message)
    /// for everything else.
    fn verify(&self, py: Python<'_>, principles: Vec<String>, response: String) -> PyResult<PyVerdict> {
        let request = VerificationRequest::new(principles, response).map_err(to_py_err)?;
        let service = Arc::clone(&self.service);
        py.allow_threads(move || service.verify(&request))
            .map(PyVerdict::from)
            .map_err(to_py_err)
    }

    fn load_model(&self, py: Python<'_>) -> PyResult<()> {
        let service = Arc::clone(&self.service);
        py.allow_threads(move || service.load_model()).map_err(to_py_err)
    }

    fn unload_model(&self, py: Python<'_>) {
        let service = Arc::clone(&self.service);
        py.allow_threads(move || service.unload_model());
    }

    fn health<'py>(&self, py: Python<'py>) -> PyResult<Bound<'py, PyDict>> {
        let report = self.service.health();
        let dict = PyDict::new(py);
        dict.set_item("live", report.live)?;
        dict.set_item("model_loaded", report.model_loaded)?;
        dict.set_item("queue_depth", report.queue_depth)?;
        dict.set_item("in_flight", report.in_flight)?;
        Ok(dict)
    }

    /// Prometheus text exposition of this verifier's metrics.
    fn metrics_text(&self) -> PyResult<String> {
        self.registry
            .encode_text()
            .map_err(|e| PyValueError::new_err(e.to_string()))
    }

    #[getter]
    fn is_loaded(&self) -> bool {
        self.service.is_loaded()
    }
}

// ─── RustRefiner ────────────────────────────────────────────────────

/// Draft → verify → revise loop exposed to Python.
///
/// Args:
///     verifier: A RustVerifier.
///     generate_callback: Callable[[str, int, float], str] producing a
///         draft from a prompt, a token cap and the seconds left in the
///         draft budget.
///     config_json: Optional JSON for the refinement config.
#[pyclass(name = "RustRefiner")]
struct PyRefiner {
    orchestrator: RefinementOrchestrator,
    cancel: Mutex<CancellationToken>,
}

#[pymethods]
impl PyRefiner {
    #[new]
    #[pyo3(signature = (verifier, generate_callback, config_json = None))]
    fn new(
        verifier: PyRef<'_, PyVerifier>,
        generate_callback: PyObject,
        config_json: Option<&str>,
    ) -> PyResult<Self> {
        let config: RefinementConfig = match config_json {
            Some(json) => serde_json::from_str(json)
                .map_err(|e| PyValueError::new_err(format!("invalid refinement config: {e}")))?,
            None => RefinementConfig::default(),
        };
        config
            .validate()
            .map_err(|e| PyValueError::new_err(e.to_string()))?;

        let generator = ExternalGenerator::new(move |prompt, constraints| {
            Python::with_gil(|py| {
                generate_callback
                    .call1(py, (prompt, constraints.max_new_tokens, timeout_secs(constraints)))
                    .and_then(|r| r.extract::<String>(py))
                    .map_err(|e| GeneratorError::Failed(e.to_string()))
            })
        });
        let service: Arc<dyn Verifier> = Arc::clone(&verifier.service) as Arc<dyn Verifier>;
        let orchestrator = RefinementOrchestrator::new(service, Arc::new(generator), config)
            .with_metrics(verifier.registry.verifier_metrics().clone());

        Ok(Self {
            orchestrator,
            cancel: Mutex::new(CancellationToken::new()),
        })
    }

    /// Run to completion. Returns a dict with `status`, `abort_reason`,
    /// `final_draft`, `iterations`, `verifying_steps`, `stalled` and
    /// `trace` (JSON lines).
    fn run<'py>(
        &self,
        py: Python<'py>,
        task: &str,
        principles: Vec<String>,
    ) -> PyResult<Bound<'py, PyDict>> {
        let request = VerificationRequest::new(principles, task).map_err(to_py_err)?;
        let principles = request.principles().to_vec();
        let token = CancellationToken::new();
        *self.cancel.lock() = token.clone();

        let outcome = py
            .allow_threads(|| self.orchestrator.run(task, &principles, &token))
            .map_err(|e| PyValueError::new_err(e.to_string()))?;

        let dict = PyDict::new(py);
        dict.set_item("status", outcome.status.as_str())?;
        dict.set_item(
            "abort_reason",
            outcome.abort_reason.as_ref().map(abort_reason_text),
        )?;
        dict.set_item("final_draft", &outcome.final_draft)?;
        dict.set_item("iterations", outcome.iterations)?;
        dict.set_item("verifying_steps", outcome.verifying_steps)?;
        dict.set_item("stalled", outcome.stalled)?;
        dict.set_item(
            "trace",
            outcome
                .trace
                .to_jsonl()
                .map_err(|e| PyValueError::new_err(e.to_string()))?,
        )?;
        Ok(dict)
    }

    /// Cancel the current run between steps.
    fn cancel(&self) {
        self.cancel.lock().cancel();
    }
}

fn abort_reason_text(reason: &AbortReason) -> String {
    match reason {
        AbortReason::Cancelled => "cancelled".to_string(),
        AbortReason::VerificationFailed { code, message } => format!("{code}: {message}"),
        AbortReason::GenerationFailed { message } => format!("generation failed: {message}"),
        AbortReason::TraceSink { message } => format!("trace sink failed: {message}"),
    }
}

// ─── Module ─────────────────────────────────────────────────────────

#[pymodule]
fn verdict_kernel(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<PyVerdict>()?;
    m.add_class::<PyVerifier>()?;
    m.add_class::<PyRefiner>()?;
    m.add_function(wrap_pyfunction!(parse_verdict, m)?)?;
    m.add("VerificationError", m.py().get_type::<VerificationError>())?;
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────
// Director-Class AI — Verification Engine
// ─────────────────────────────────────────────────────────────────────
//! Runs one inference per request against the loaded verifier model.
//!
//! # Invariants
//!
//! 1. **Typed outcomes only**: every path returns `Verdict` or a
//!    `VerifyError`. A model panic is caught with `catch_unwind`, the
//!    model is unloaded (its state is suspect) and the request fails with
//!    `model_unavailable`.
//!
//! 2. **Bounded inference**: the model receives a deadline and a token
//!    cap, and runs on a worker thread. The caller gets `timeout` once the
//!    budget elapses whether or not the model honours its deadline. The
//!    worker keeps the model slot until the call really returns, so an
//!    overrunning call still never overlaps the next one; requests queued
//!    behind it skip the model once their own deadline has passed.
//!
//! 3. **No false negatives from garbage**: unparseable output is a
//!    `parse_failure`, counted and logged, never an empty verdict.
//!
//! The engine is `&mut self` throughout; exclusive access is the
//! service's job.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use parking_lot::Mutex;

use verdict_types::{ModelType, VerificationRequest, Verdict, VerifierConfig, VerifyError};

use crate::metrics::VerifierMetrics;
use crate::model::{GenerationConstraints, ModelLoader};
use crate::strategy::{build_strategy, Inference, InferenceStrategy};

/// Start and end of one inference call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InferenceWindow {
    pub start: Instant,
    pub end: Instant,
}

/// Bounded ring of recent inference windows.
pub struct InferenceLog {
    windows: Mutex<VecDeque<InferenceWindow>>,
    capacity: usize,
}

impl InferenceLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            windows: Mutex::new(VecDeque::with_capacity(capacity.min(4096))),
            capacity: capacity.max(1),
        }
    }

    fn record(&self, start: Instant, end: Instant) {
        let mut windows = self.windows.lock();
        if windows.len() >= self.capacity {
            windows.pop_front();
        }
        windows.push_back(InferenceWindow { start, end });
    }

    pub fn snapshot(&self) -> Vec<InferenceWindow> {
        self.windows.lock().iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.windows.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.lock().is_empty()
    }

    /// True if any two recorded windows intersect.
    pub fn has_overlap(&self) -> bool {
        let mut windows = self.snapshot();
        windows.sort_by_key(|w| w.start);
        windows.windows(2).any(|pair| pair[1].start < pair[0].end)
    }
}

/// The loaded strategy; held by whichever worker is running the model.
type ModelSlot = Arc<Mutex<Option<Box<dyn InferenceStrategy>>>>;

pub struct VerificationEngine {
    config: VerifierConfig,
    loader: Arc<dyn ModelLoader>,
    slot: ModelSlot,
    model_type: Option<ModelType>,
    loaded: Arc<AtomicBool>,
    metrics: VerifierMetrics,
    log: Arc<InferenceLog>,
}

impl VerificationEngine {
    /// Engine with no model loaded yet.
    pub fn new(config: VerifierConfig, loader: Arc<dyn ModelLoader>, metrics: VerifierMetrics) -> Self {
        let log = Arc::new(InferenceLog::new(config.window_log_capacity));
        metrics.set_model_loaded(false);
        Self {
            config,
            loader,
            slot: Arc::new(Mutex::new(None)),
            model_type: None,
            loaded: Arc::new(AtomicBool::new(false)),
            metrics,
            log,
        }
    }

    /// Load (or reload) the model through the configured loader.
    ///
    /// Waits for an overrunning inference to return before replacing the
    /// model.
    pub fn load(&mut self) -> Result<(), VerifyError> {
        let slot = Arc::clone(&self.slot);
        let mut strategy = slot.lock();
        *strategy = None;
        self.model_type = None;
        self.set_loaded(false);

        let loaded = catch_unwind(AssertUnwindSafe(|| self.loader.load(&self.config)));
        match loaded {
            Ok(Ok(model)) => {
                let model_type = model.model_type();
                *strategy = Some(build_strategy(model, &self.config));
                self.model_type = Some(model_type);
                self.set_loaded(true);
                log::info!("verifier model loaded ({model_type:?})");
                Ok(())
            }
            Ok(Err(fault)) => {
                log::error!("verifier model failed to load: {fault}");
                Err(VerifyError::ModelUnavailable(fault.to_string()))
            }
            Err(_) => {
                log::error!("verifier model loader panicked");
                Err(VerifyError::ModelUnavailable("model loader panicked".to_string()))
            }
        }
    }

    pub fn unload(&mut self) {
        if self.slot.lock().take().is_some() {
            log::info!("verifier model unloaded");
        }
        self.model_type = None;
        self.set_loaded(false);
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::SeqCst)
    }

    /// Shared flag readable without holding the engine.
    pub fn loaded_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.loaded)
    }

    pub fn inference_log(&self) -> Arc<InferenceLog> {
        Arc::clone(&self.log)
    }

    pub fn config(&self) -> &VerifierConfig {
        &self.config
    }

    pub fn model_type(&self) -> Option<ModelType> {
        self.model_type.filter(|_| self.is_loaded())
    }

    /// One inference for `request`.
    pub fn infer(&mut self, request: &VerificationRequest) -> Result<Verdict, VerifyError> {
        let outcome = self.run(request);
        self.record(&outcome);
        outcome.map(|inference| inference.verdict)
    }

    fn run(&mut self, request: &VerificationRequest) -> Result<Inference, VerifyError> {
        let Some(model_type) = self.model_type() else {
            return Err(VerifyError::ModelUnavailable("no model loaded".to_string()));
        };
        let constraints =
            GenerationConstraints::new(self.config.max_new_tokens, self.config.inference_timeout());
        let worker = InferenceWorker {
            slot: Arc::clone(&self.slot),
            loaded: Arc::clone(&self.loaded),
            metrics: self.metrics.clone(),
            log: Arc::clone(&self.log),
            model_type,
        };

        let (tx, rx) = mpsc::channel();
        let request = request.clone();
        thread::Builder::new()
            .name("verdict-inference".to_string())
            .spawn(move || {
                let _ = tx.send(worker.run(&request, &constraints));
            })
            .map_err(|e| {
                VerifyError::ModelUnavailable(format!("failed to start inference worker: {e}"))
            })?;

        match rx.recv_timeout(constraints.budget) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                log::warn!(
                    "inference still running after the {}ms budget; returning timeout",
                    constraints.budget_ms()
                );
                Err(VerifyError::Timeout {
                    budget_ms: constraints.budget_ms(),
                })
            }
            Err(RecvTimeoutError::Disconnected) => Err(VerifyError::ModelUnavailable(
                "inference worker exited without a result".to_string(),
            )),
        }
    }

    fn record(&self, outcome: &Result<Inference, VerifyError>) {
        match outcome {
            Ok(inference) => {
                if inference.confidence.degraded {
                    log::warn!("confidence degraded to neutral default: no usable signal");
                    self.metrics.confidence_degraded();
                }
                for principle in inference.verdict.violations() {
                    self.metrics.violation_found(principle.as_str());
                }
                self.metrics.request_completed("ok");
            }
            Err(err) => {
                if let VerifyError::ParseFailure { raw, reason, detail } = err {
                    log::warn!(
                        "parse failure ({reason}): {detail}; raw output: {:?}",
                        preview(raw)
                    );
                    self.metrics.parse_failed(reason.as_str());
                }
                self.metrics.request_completed(err.code().as_str());
            }
        }
    }

    fn set_loaded(&self, loaded: bool) {
        self.loaded.store(loaded, Ordering::SeqCst);
        self.metrics.set_model_loaded(loaded);
    }
}

/// One model call, run off the caller's thread.
struct InferenceWorker {
    slot: ModelSlot,
    loaded: Arc<AtomicBool>,
    metrics: VerifierMetrics,
    log: Arc<InferenceLog>,
    model_type: ModelType,
}

impl InferenceWorker {
    fn run(
        self,
        request: &VerificationRequest,
        constraints: &GenerationConstraints,
    ) -> Result<Inference, VerifyError> {
        let mut slot = self.slot.lock();
        if constraints.is_expired() {
            // Queued behind an overrunning call; the caller has given up.
            return Err(VerifyError::Timeout {
                budget_ms: constraints.budget_ms(),
            });
        }
        let Some(strategy) = slot.as_mut() else {
            return Err(VerifyError::ModelUnavailable("no model loaded".to_string()));
        };

        let start = Instant::now();
        let result = catch_unwind(AssertUnwindSafe(|| {
            strategy.infer_and_parse(request, constraints)
        }));
        let end = Instant::now();

        self.log.record(start, end);
        self.metrics.record_inference_latency(
            model_type_label(self.model_type),
            end.duration_since(start).as_secs_f64(),
        );

        match result {
            Ok(result) => result,
            Err(_) => {
                log::error!("verifier model panicked during inference; unloading");
                *slot = None;
                self.loaded.store(false, Ordering::SeqCst);
                self.metrics.set_model_loaded(false);
                Err(VerifyError::ModelUnavailable(
                    "model panicked during inference and was unloaded".to_string(),
                ))
            }
        }
    }
}

fn model_type_label(t: ModelType) -> &'static str {
    match t {
        ModelType::Causal => "causal",
        ModelType::Classifier => "classifier",
    }
}

fn preview(raw: &str) -> &str {
    const MAX: usize = 200;
    if raw.len() <= MAX {
        return raw;
    }
    let end = (0..=MAX).rev().find(|&i| raw.is_char_boundary(i)).unwrap_or(0);
    &raw[..end]
}

// ─────────────────────────────────────────────────────────────────────
// Director-Class AI — Refinement Orchestrator
// ─────────────────────────────────────────────────────────────────────
//! Draft → verify → revise loop against a [`Verifier`].
//!
//! ```text
//!   Drafting ──draft──▶ Verifying ──clean──────────────▶ Passed
//!      ▲                    │
//!      └──violations, i<k───┤──violations, i==k (or stall)─▶ Exhausted
//!                           └──retries spent / cancel──▶ Aborted
//! ```
//!
//! With `max_iters = k` a run takes at most `k + 1` verifying steps.
//! Every attempt, successful or not, is appended to the trace before the
//! next transition. Once a run reaches a terminal status it stays there.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use verdict_types::{
    AbortReason, GeneratorError, Principle, RefinementConfig, RunStatus, Trace, TraceEntry,
    TraceOutcome, VerdictError, VerdictResult, VerificationRequest, Verdict,
};

use crate::metrics::VerifierMetrics;
use crate::model::GenerationConstraints;
use crate::prompt::{draft_prompt, revision_prompt};
use crate::service::Verifier;
use crate::trace_sink::{JsonlTraceSink, NullTraceSink, TraceSink};

/// The large drafting model.
pub trait Generator: Send + Sync {
    fn generate(
        &self,
        prompt: &str,
        constraints: &GenerationConstraints,
    ) -> Result<String, GeneratorError>;
}

impl<G: Generator + ?Sized> Generator for Arc<G> {
    fn generate(
        &self,
        prompt: &str,
        constraints: &GenerationConstraints,
    ) -> Result<String, GeneratorError> {
        (**self).generate(prompt, constraints)
    }
}

type DraftFn =
    Box<dyn Fn(&str, &GenerationConstraints) -> Result<String, GeneratorError> + Send + Sync>;

/// Generator backed by a closure (FFI bridge, tests).
pub struct ExternalGenerator {
    generate_fn: DraftFn,
}

impl ExternalGenerator {
    pub fn new(
        generate_fn: impl Fn(&str, &GenerationConstraints) -> Result<String, GeneratorError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            generate_fn: Box::new(generate_fn),
        }
    }
}

impl Generator for ExternalGenerator {
    fn generate(
        &self,
        prompt: &str,
        constraints: &GenerationConstraints,
    ) -> Result<String, GeneratorError> {
        (self.generate_fn)(prompt, constraints)
    }
}

/// Shared flag for cancelling a run from another thread.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Phase {
    Drafting,
    Verifying,
    Passed,
    Exhausted { stalled: bool },
    Aborted(AbortReason),
}

/// Mutable state of one run. Owned by the run; never shared.
#[derive(Debug, Clone)]
pub struct RefinementState {
    task: String,
    principles: Vec<Principle>,
    current_draft: String,
    iteration: u32,
    verifying_steps: u32,
    last_verdict: Option<Verdict>,
    trace: Trace,
    status: RunStatus,
    abort_reason: Option<AbortReason>,
    stalled: bool,
}

impl RefinementState {
    pub fn new(task: &str, principles: Vec<Principle>) -> Self {
        Self {
            task: task.to_string(),
            principles,
            current_draft: String::new(),
            iteration: 0,
            verifying_steps: 0,
            last_verdict: None,
            trace: Trace::new(),
            status: RunStatus::InProgress,
            abort_reason: None,
            stalled: false,
        }
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    pub fn current_draft(&self) -> &str {
        &self.current_draft
    }

    pub fn trace(&self) -> &Trace {
        &self.trace
    }

    /// Append to the trace and forward to `sink`. Refused once terminal.
    pub fn append(&mut self, entry: TraceEntry, sink: &mut dyn TraceSink) -> VerdictResult<()> {
        self.ensure_in_progress()?;
        let entry = self.trace.append(entry);
        sink.record(entry)
    }

    /// Set the terminal status. Refused if one is already set.
    pub fn finish(&mut self, status: RunStatus, reason: Option<AbortReason>) -> VerdictResult<()> {
        self.ensure_in_progress()?;
        if !status.is_terminal() {
            return Err(VerdictError::Refinement(format!(
                "{} is not a terminal status",
                status.as_str()
            )));
        }
        self.status = status;
        self.abort_reason = reason;
        Ok(())
    }

    fn ensure_in_progress(&self) -> VerdictResult<()> {
        if self.status.is_terminal() {
            return Err(VerdictError::Refinement(format!(
                "run already finished as {}",
                self.status.as_str()
            )));
        }
        Ok(())
    }
}

/// Result of a finished run.
#[derive(Debug, Clone)]
pub struct RefinementOutcome {
    pub status: RunStatus,
    pub abort_reason: Option<AbortReason>,
    pub final_draft: String,
    /// Index of the last iteration reached.
    pub iterations: u32,
    pub verifying_steps: u32,
    /// Ended early because two consecutive verdicts flagged the same set.
    pub stalled: bool,
    pub trace: Trace,
}

impl From<RefinementState> for RefinementOutcome {
    fn from(state: RefinementState) -> Self {
        Self {
            status: state.status,
            abort_reason: state.abort_reason,
            final_draft: state.current_draft,
            iterations: state.iteration,
            verifying_steps: state.verifying_steps,
            stalled: state.stalled,
            trace: state.trace,
        }
    }
}

pub struct RefinementOrchestrator {
    verifier: Arc<dyn Verifier>,
    generator: Arc<dyn Generator>,
    config: RefinementConfig,
    metrics: Option<VerifierMetrics>,
}

impl RefinementOrchestrator {
    pub fn new(
        verifier: Arc<dyn Verifier>,
        generator: Arc<dyn Generator>,
        config: RefinementConfig,
    ) -> Self {
        Self {
            verifier,
            generator,
            config,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: VerifierMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &RefinementConfig {
        &self.config
    }

    /// Run to a terminal status, writing the trace to `trace_path` when
    /// configured.
    pub fn run(
        &self,
        task: &str,
        principles: &[Principle],
        cancel: &CancellationToken,
    ) -> VerdictResult<RefinementOutcome> {
        match &self.config.trace_path {
            Some(path) => {
                let mut sink = JsonlTraceSink::create(path)?;
                self.run_with_sink(task, principles, cancel, &mut sink)
            }
            None => self.run_with_sink(task, principles, cancel, &mut NullTraceSink),
        }
    }

    /// Run to a terminal status, forwarding each trace entry to `sink`.
    ///
    /// `Err` only for unusable input (blank task, no principles); every
    /// failure after the run starts ends in [`RunStatus::Aborted`].
    pub fn run_with_sink(
        &self,
        task: &str,
        principles: &[Principle],
        cancel: &CancellationToken,
        sink: &mut dyn TraceSink,
    ) -> VerdictResult<RefinementOutcome> {
        if task.trim().is_empty() {
            return Err(VerdictError::Refinement("task is blank".to_string()));
        }
        // Same rules as a verification request; the response is a placeholder.
        VerificationRequest::new(principles.iter().cloned(), task)?;

        let mut state = RefinementState::new(task, principles.to_vec());
        let mut phase = Phase::Drafting;

        loop {
            phase = match phase {
                Phase::Drafting => {
                    if cancel.is_cancelled() {
                        Phase::Aborted(AbortReason::Cancelled)
                    } else {
                        self.draft(&mut state, cancel, sink)
                    }
                }
                Phase::Verifying => {
                    if cancel.is_cancelled() {
                        Phase::Aborted(AbortReason::Cancelled)
                    } else {
                        self.verify(&mut state, cancel, sink)
                    }
                }
                Phase::Passed => {
                    state.finish(RunStatus::Passed, None)?;
                    break;
                }
                Phase::Exhausted { stalled } => {
                    state.stalled = stalled;
                    state.finish(RunStatus::Exhausted, None)?;
                    break;
                }
                Phase::Aborted(reason) => {
                    log::warn!("refinement aborted: {reason:?}");
                    state.finish(RunStatus::Aborted, Some(reason))?;
                    break;
                }
            };
        }

        log::info!(
            "refinement finished: {} after {} verifying step(s), {} trace entries",
            state.status.as_str(),
            state.verifying_steps,
            state.trace.len()
        );
        if let Some(metrics) = &self.metrics {
            metrics.refinement_finished(state.status.as_str(), state.verifying_steps);
        }
        Ok(state.into())
    }

    fn draft(
        &self,
        state: &mut RefinementState,
        cancel: &CancellationToken,
        sink: &mut dyn TraceSink,
    ) -> Phase {
        let prompt = match &state.last_verdict {
            None => draft_prompt(&state.task, &state.principles),
            Some(verdict) => revision_prompt(
                &state.task,
                &state.principles,
                &state.current_draft,
                verdict.violations(),
            ),
        };
        let budget = Duration::from_millis(self.config.draft_timeout_ms);

        let mut attempt = 0;
        loop {
            attempt += 1;
            let constraints = GenerationConstraints::new(self.config.draft_max_tokens, budget);
            let started = Instant::now();
            let result = self.generate_within_budget(&prompt, constraints);
            let elapsed = started.elapsed();

            let err = match result {
                Ok(draft) if draft.trim().is_empty() => {
                    GeneratorError::Failed("generator returned an empty draft".to_string())
                }
                Ok(draft) => {
                    state.current_draft = draft;
                    return Phase::Verifying;
                }
                Err(err) => err,
            };

            let entry = TraceEntry::new(
                state.iteration,
                attempt,
                &state.current_draft,
                TraceOutcome::GenerationFailed {
                    message: err.to_string(),
                },
                millis(elapsed),
            );
            if let Err(e) = state.append(entry, sink) {
                return Phase::Aborted(AbortReason::TraceSink {
                    message: e.to_string(),
                });
            }

            if attempt > self.config.max_retries {
                return Phase::Aborted(AbortReason::GenerationFailed {
                    message: err.to_string(),
                });
            }
            log::warn!(
                "draft attempt {attempt} for iteration {} failed: {err}; retrying",
                state.iteration
            );
            if !self.backoff(attempt, cancel) {
                return Phase::Aborted(AbortReason::Cancelled);
            }
        }
    }

    /// Call the generator on a worker thread and stop waiting at the
    /// budget. An overrunning call finishes in the background; its draft
    /// is discarded.
    fn generate_within_budget(
        &self,
        prompt: &str,
        constraints: GenerationConstraints,
    ) -> Result<String, GeneratorError> {
        let (tx, rx) = mpsc::channel();
        let generator = Arc::clone(&self.generator);
        let prompt = prompt.to_string();
        thread::Builder::new()
            .name("verdict-draft".to_string())
            .spawn(move || {
                let result = catch_unwind(AssertUnwindSafe(|| {
                    generator.generate(&prompt, &constraints)
                }))
                .unwrap_or_else(|_| Err(GeneratorError::Failed("generator panicked".to_string())));
                let _ = tx.send(result);
            })
            .map_err(|e| GeneratorError::Failed(format!("failed to start draft worker: {e}")))?;

        match rx.recv_timeout(constraints.budget) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(GeneratorError::Timeout {
                budget_ms: constraints.budget_ms(),
            }),
            Err(RecvTimeoutError::Disconnected) => Err(GeneratorError::Failed(
                "draft worker exited without a result".to_string(),
            )),
        }
    }

    fn verify(
        &self,
        state: &mut RefinementState,
        cancel: &CancellationToken,
        sink: &mut dyn TraceSink,
    ) -> Phase {
        state.verifying_steps += 1;
        let request =
            match VerificationRequest::new(state.principles.iter().cloned(), state.current_draft.as_str()) {
                Ok(r) => r,
                Err(e) => {
                    return Phase::Aborted(AbortReason::VerificationFailed {
                        code: e.code(),
                        message: e.to_string(),
                    })
                }
            };

        let mut attempt = 0;
        loop {
            attempt += 1;
            let started = Instant::now();
            let result = self.verifier.verify(&request);
            let elapsed = millis(started.elapsed());

            match result {
                Ok(response) => {
                    let verdict = response.verdict;
                    let entry = TraceEntry::new(
                        state.iteration,
                        attempt,
                        &state.current_draft,
                        TraceOutcome::Verdict {
                            verdict: verdict.clone(),
                        },
                        response.latency_ms.max(elapsed),
                    );
                    if let Err(e) = state.append(entry, sink) {
                        return Phase::Aborted(AbortReason::TraceSink {
                            message: e.to_string(),
                        });
                    }
                    return self.next_after_verdict(state, verdict);
                }
                Err(err) => {
                    let entry = TraceEntry::new(
                        state.iteration,
                        attempt,
                        &state.current_draft,
                        TraceOutcome::verification_failed(&err),
                        elapsed,
                    );
                    if let Err(e) = state.append(entry, sink) {
                        return Phase::Aborted(AbortReason::TraceSink {
                            message: e.to_string(),
                        });
                    }
                    if !err.is_retryable() || attempt > self.config.max_retries {
                        return Phase::Aborted(AbortReason::VerificationFailed {
                            code: err.code(),
                            message: err.to_string(),
                        });
                    }
                    log::warn!(
                        "verification attempt {attempt} for iteration {} failed: {err}; retrying",
                        state.iteration
                    );
                    if !self.backoff(attempt, cancel) {
                        return Phase::Aborted(AbortReason::Cancelled);
                    }
                }
            }
        }
    }

    fn next_after_verdict(&self, state: &mut RefinementState, verdict: Verdict) -> Phase {
        if verdict.is_clean() {
            return Phase::Passed;
        }
        let stalled = self.config.stop_on_no_progress
            && state
                .last_verdict
                .as_ref()
                .is_some_and(|prev| prev.same_violations(&verdict));
        if stalled {
            log::info!(
                "no progress at iteration {}: same violations as the previous verdict",
                state.iteration
            );
            return Phase::Exhausted { stalled: true };
        }
        if state.iteration >= self.config.max_iters {
            return Phase::Exhausted { stalled: false };
        }
        state.last_verdict = Some(verdict);
        state.iteration += 1;
        Phase::Drafting
    }

    /// Sleep before retry `attempt`; false if cancelled meanwhile.
    fn backoff(&self, attempt: u32, cancel: &CancellationToken) -> bool {
        const SLICE: Duration = Duration::from_millis(10);
        let deadline = Instant::now() + self.config.backoff(attempt);
        loop {
            if cancel.is_cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep(SLICE.min(deadline - now));
        }
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

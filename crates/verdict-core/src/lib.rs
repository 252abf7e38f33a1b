// ─────────────────────────────────────────────────────────────────────
// Director-Class AI — Verdict Kernel Core Engine
// (C) 1998-2026 Miroslav Sotek. All rights reserved.
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
#![deny(unsafe_code)]
//! Verification service and refinement orchestrator for principle-based
//! content-policy verifiers.
//!
//! A verifier model reads `(principles, response)` and emits a verdict.
//! This crate turns that free-form output into a strictly typed
//! [`Verdict`](verdict_types::Verdict) under latency and concurrency
//! bounds, and drives a draft → verify → revise loop against it.
//!
//! # Safety Invariants
//!
//! 1. **At most one inference at a time**: the engine lives behind a
//!    single mutex in [`VerificationService`]. Health probes read atomics
//!    and never wait on it.
//!
//! 2. **Unparseable is never clean**: a model output that does not match
//!    the verdict schema is a `parse_failure`, counted and surfaced. It is
//!    never read as "no violations".
//!
//! 3. **Violations are a subset of the request**: the parser resolves
//!    every reported violation against the request's principle list;
//!    anything it cannot resolve is `unknown_principle` (or dropped, by
//!    configuration), never passed through.
//!
//! 4. **Runs terminate**: with `max_iters = k` a refinement run takes at
//!    most `k + 1` verifying steps, each retried at most `max_retries`
//!    times. Terminal status is permanent.

pub mod confidence;
pub mod engine;
pub mod metrics;
pub mod model;
pub mod orchestrator;
pub mod parser;
pub mod prompt;
pub mod remote;
pub mod service;
pub mod strategy;
pub mod trace_sink;

pub use confidence::{ConfidenceEstimate, ConfidenceEstimator, ConfidenceSignal, ConfidenceSource};
pub use engine::{InferenceLog, InferenceWindow, VerificationEngine};
pub use metrics::{MetricsError, MetricsRegistry, SharedMetricsRegistry, VerifierMetrics};
pub use model::{
    CausalModel, ClassifierModel, ExternalCausalModel, ExternalClassifier, Generation,
    GenerationConstraints, HeuristicCausalModel, HeuristicClassifier, HeuristicLexicon,
    HeuristicLoader, LoadedModel, ModelLoader, TokenLogprob,
};
pub use orchestrator::{
    CancellationToken, ExternalGenerator, Generator, RefinementOrchestrator, RefinementOutcome,
    RefinementState,
};
pub use parser::{object_span, parse_verdict};
pub use remote::RemoteVerifier;
pub use service::{HealthReport, VerificationService, Verifier};
pub use strategy::{ClassifyingStrategy, GenerativeStrategy, Inference, InferenceStrategy};
pub use trace_sink::{read_trace, JsonlTraceSink, MemoryTraceSink, NullTraceSink, TraceSink};

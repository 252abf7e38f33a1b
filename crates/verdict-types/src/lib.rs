// ─────────────────────────────────────────────────────────────────────
// Director-Class AI — Verdict Kernel Types
// (C) 1998-2026 Miroslav Sotek. All rights reserved.
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
#![deny(unsafe_code)]
//! Type definitions, configuration, and error hierarchy for the
//! Verdict Kernel, the principle verifier and refinement loop for
//! Director-Class AI.

pub mod config;
pub mod error;
pub mod trace;
pub mod verdict;

pub use config::{
    KernelConfig, ModelType, QueuePolicy, RefinementConfig, ServerConfig,
    UnknownPrinciplePolicy, VerifierConfig,
};
pub use error::{
    ErrorCode, GeneratorError, ModelFault, VerdictError, VerdictResult, VerifyError,
};
pub use trace::{AbortReason, RunStatus, Trace, TraceEntry, TraceOutcome};
pub use verdict::{
    clamp_score, ErrorBody, MalformedReason, ParseOutcome, Principle, VerificationRequest,
    Verdict, VerifyRequestBody, VerifyResponse, NEUTRAL_CONFIDENCE,
};

// ─────────────────────────────────────────────────────────────────────
// Director-Class AI — Verdict Kernel Error Hierarchy
// ─────────────────────────────────────────────────────────────────────

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::verdict::{ErrorDetail, MalformedReason};

/// Stable error codes exposed at the verification boundary.
///
/// These strings are part of the wire contract; never rename them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidRequest,
    ModelUnavailable,
    Timeout,
    ParseFailure,
    Busy,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidRequest => "invalid_request",
            ErrorCode::ModelUnavailable => "model_unavailable",
            ErrorCode::Timeout => "timeout",
            ErrorCode::ParseFailure => "parse_failure",
            ErrorCode::Busy => "busy",
        }
    }

    /// Conventional HTTP status for this code.
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorCode::InvalidRequest => 400,
            ErrorCode::Busy => 429,
            ErrorCode::ParseFailure => 502,
            ErrorCode::ModelUnavailable => 503,
            ErrorCode::Timeout => 504,
        }
    }

    pub fn parse(code: &str) -> Option<Self> {
        match code {
            "invalid_request" => Some(ErrorCode::InvalidRequest),
            "model_unavailable" => Some(ErrorCode::ModelUnavailable),
            "timeout" => Some(ErrorCode::Timeout),
            "parse_failure" => Some(ErrorCode::ParseFailure),
            "busy" => Some(ErrorCode::Busy),
            _ => None,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Every failure a verification call can surface.
///
/// The engine and the service never let anything else escape: each
/// variant maps to exactly one [`ErrorCode`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum VerifyError {
    /// Empty principle list, blank principle, or empty response.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Model not loaded, unloaded, or failed while running.
    #[error("model unavailable: {0}")]
    ModelUnavailable(String),

    /// Inference exceeded its budget.
    #[error("timeout: inference exceeded {budget_ms}ms budget")]
    Timeout { budget_ms: u64 },

    /// Model output did not conform to the verdict schema.
    #[error("parse failure ({reason}): {detail}")]
    ParseFailure {
        raw: String,
        reason: MalformedReason,
        detail: String,
    },

    /// Another inference held the model for longer than the caller may wait.
    #[error("busy: model occupied, waited {waited_ms}ms")]
    Busy { waited_ms: u64 },
}

impl VerifyError {
    pub fn code(&self) -> ErrorCode {
        match self {
            VerifyError::InvalidRequest(_) => ErrorCode::InvalidRequest,
            VerifyError::ModelUnavailable(_) => ErrorCode::ModelUnavailable,
            VerifyError::Timeout { .. } => ErrorCode::Timeout,
            VerifyError::ParseFailure { .. } => ErrorCode::ParseFailure,
            VerifyError::Busy { .. } => ErrorCode::Busy,
        }
    }

    /// Whether a caller may reasonably retry the same request.
    ///
    /// Input errors are the caller's fault and repeat deterministically.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, VerifyError::InvalidRequest(_))
    }

    /// Rebuild an error from its wire form.
    ///
    /// Structured fields win; a body carrying only `code` and `message`
    /// still maps onto the right variant.
    pub fn from_wire(wire: ErrorDetail) -> Self {
        let ErrorDetail {
            code,
            message,
            detail,
            reason,
            budget_ms,
            waited_ms,
        } = wire;
        match code {
            ErrorCode::InvalidRequest => VerifyError::InvalidRequest(detail.unwrap_or(message)),
            ErrorCode::ModelUnavailable => VerifyError::ModelUnavailable(detail.unwrap_or(message)),
            ErrorCode::Timeout => VerifyError::Timeout {
                budget_ms: budget_ms.unwrap_or(0),
            },
            ErrorCode::ParseFailure => VerifyError::ParseFailure {
                raw: String::new(),
                reason: reason.unwrap_or(MalformedReason::NoObjectFound),
                detail: detail.unwrap_or(message),
            },
            ErrorCode::Busy => VerifyError::Busy {
                waited_ms: waited_ms.unwrap_or(0),
            },
        }
    }
}

/// Fault reported by a loaded verifier model.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelFault {
    #[error("model unavailable: {0}")]
    Unavailable(String),

    #[error("generation deadline exceeded")]
    DeadlineExceeded,

    #[error("model failed: {0}")]
    Failed(String),
}

/// Failure of the drafting ("big") model.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GeneratorError {
    #[error("generation timed out after {budget_ms}ms")]
    Timeout { budget_ms: u64 },

    #[error("generator failed: {0}")]
    Failed(String),
}

/// Root error type for everything outside the request boundary.
#[derive(Error, Debug)]
pub enum VerdictError {
    /// Invalid configuration value.
    #[error("config error: {0}")]
    Config(String),

    /// A verification call failed.
    #[error(transparent)]
    Verify(#[from] VerifyError),

    /// Drafting model failed unrecoverably.
    #[error(transparent)]
    Generator(#[from] GeneratorError),

    /// Trace could not be written or read.
    #[error("trace error: {0}")]
    Trace(String),

    /// Refinement state machine misuse.
    #[error("refinement error: {0}")]
    Refinement(String),
}

impl From<std::io::Error> for VerdictError {
    fn from(e: std::io::Error) -> Self {
        VerdictError::Trace(e.to_string())
    }
}

pub type VerdictResult<T> = Result<T, VerdictError>;

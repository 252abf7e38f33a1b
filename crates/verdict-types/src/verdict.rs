// ─────────────────────────────────────────────────────────────────────
// Director-Class AI — Verdict Kernel Request & Verdict Types
// ─────────────────────────────────────────────────────────────────────

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::VerifyError;

/// Confidence reported when no usable signal exists.
pub const NEUTRAL_CONFIDENCE: f64 = 0.5;

/// Clamp a value to [lo, hi], mapping NaN to lo and Inf to nearest bound.
#[inline]
pub fn clamp_score(value: f64, lo: f64, hi: f64) -> f64 {
    if value.is_nan() {
        log::warn!("clamp_score: NaN detected, clamping to {lo:.4}");
        return lo;
    }
    if value.is_infinite() {
        let boundary = if value > 0.0 { hi } else { lo };
        log::warn!("clamp_score: Inf detected, clamping to {boundary:.4}");
        return boundary;
    }
    value.clamp(lo, hi)
}

/// A single natural-language policy rule. Identity is the exact text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Principle(String);

impl Principle {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Principle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Principle {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Principle {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// One (principles, response) pair to judge.
///
/// Only constructible through [`VerificationRequest::new`], so every
/// instance has at least one non-blank principle and a non-empty response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerificationRequest {
    principles: Vec<Principle>,
    response: String,
}

impl VerificationRequest {
    pub fn new(
        principles: impl IntoIterator<Item = impl Into<Principle>>,
        response: impl Into<String>,
    ) -> Result<Self, VerifyError> {
        let principles: Vec<Principle> = principles.into_iter().map(Into::into).collect();
        let response = response.into();

        if principles.is_empty() {
            return Err(VerifyError::InvalidRequest(
                "principles must be non-empty".to_string(),
            ));
        }
        if let Some(i) = principles.iter().position(|p| p.as_str().trim().is_empty()) {
            return Err(VerifyError::InvalidRequest(format!(
                "principle at index {i} is blank"
            )));
        }
        if response.trim().is_empty() {
            return Err(VerifyError::InvalidRequest(
                "response must be non-empty".to_string(),
            ));
        }
        Ok(Self {
            principles,
            response,
        })
    }

    pub fn principles(&self) -> &[Principle] {
        &self.principles
    }

    pub fn response(&self) -> &str {
        &self.response
    }

    pub fn contains(&self, principle: &Principle) -> bool {
        self.principles.contains(principle)
    }
}

/// Structured judgment for one response.
///
/// Invariants: `violations ⊆ request.principles` with no duplicates,
/// and `confidence ∈ [0, 1]`.
///
/// Deserialization checks what it can without the request: confidence
/// must be a finite value in `[0, 1]` and violations must be distinct.
/// Membership in the principle set is the receiver's job
/// ([`Verdict::for_request`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawVerdict")]
pub struct Verdict {
    violations: Vec<Principle>,
    confidence: f64,
}

#[derive(Deserialize)]
struct RawVerdict {
    violations: Vec<Principle>,
    confidence: f64,
}

impl TryFrom<RawVerdict> for Verdict {
    type Error = String;

    fn try_from(raw: RawVerdict) -> Result<Self, Self::Error> {
        if !raw.confidence.is_finite() || !(0.0..=1.0).contains(&raw.confidence) {
            return Err(format!("confidence {} outside [0, 1]", raw.confidence));
        }
        for (i, v) in raw.violations.iter().enumerate() {
            if raw.violations[..i].contains(v) {
                return Err(format!("duplicate violation {:?}", v.as_str()));
            }
        }
        Ok(Self {
            violations: raw.violations,
            confidence: raw.confidence,
        })
    }
}

impl Verdict {
    /// Build a verdict for `principles`.
    ///
    /// Violations outside the supplied set are an error; duplicates are
    /// collapsed and the result is ordered as the principles are.
    /// Non-finite confidence falls back to [`NEUTRAL_CONFIDENCE`].
    pub fn for_principles(
        principles: &[Principle],
        violations: impl IntoIterator<Item = Principle>,
        confidence: f64,
    ) -> Result<Self, Principle> {
        let mut flagged = Vec::new();
        for v in violations {
            if !principles.contains(&v) {
                return Err(v);
            }
            if !flagged.contains(&v) {
                flagged.push(v);
            }
        }
        let ordered = principles
            .iter()
            .filter(|p| flagged.contains(p))
            .cloned()
            .collect();
        let confidence = if confidence.is_finite() {
            clamp_score(confidence, 0.0, 1.0)
        } else {
            NEUTRAL_CONFIDENCE
        };
        Ok(Self {
            violations: ordered,
            confidence,
        })
    }

    pub fn for_request(
        request: &VerificationRequest,
        violations: impl IntoIterator<Item = Principle>,
        confidence: f64,
    ) -> Result<Self, Principle> {
        Self::for_principles(request.principles(), violations, confidence)
    }

    /// A verdict with no violations.
    pub fn clean(confidence: f64) -> Self {
        Self {
            violations: Vec::new(),
            confidence: if confidence.is_finite() {
                clamp_score(confidence, 0.0, 1.0)
            } else {
                NEUTRAL_CONFIDENCE
            },
        }
    }

    pub fn violations(&self) -> &[Principle] {
        &self.violations
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }

    /// Same verdict with a replacement confidence.
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = if confidence.is_finite() {
            clamp_score(confidence, 0.0, 1.0)
        } else {
            NEUTRAL_CONFIDENCE
        };
        self
    }

    /// Exact set equality of violated principles.
    pub fn same_violations(&self, other: &Verdict) -> bool {
        self.violations.len() == other.violations.len()
            && self.violations.iter().all(|v| other.violations.contains(v))
    }
}

/// Why raw model output could not become a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MalformedReason {
    NoObjectFound,
    MissingField,
    TypeMismatch,
    UnknownPrinciple,
}

impl MalformedReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            MalformedReason::NoObjectFound => "no_object_found",
            MalformedReason::MissingField => "missing_field",
            MalformedReason::TypeMismatch => "type_mismatch",
            MalformedReason::UnknownPrinciple => "unknown_principle",
        }
    }
}

impl fmt::Display for MalformedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of parsing raw model text. Exactly one of the two.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome {
    Valid(Verdict),
    Malformed {
        raw: String,
        reason: MalformedReason,
        detail: String,
    },
}

impl ParseOutcome {
    pub fn malformed(raw: &str, reason: MalformedReason, detail: impl Into<String>) -> Self {
        ParseOutcome::Malformed {
            raw: raw.to_string(),
            reason,
            detail: detail.into(),
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, ParseOutcome::Valid(_))
    }

    pub fn reason(&self) -> Option<MalformedReason> {
        match self {
            ParseOutcome::Valid(_) => None,
            ParseOutcome::Malformed { reason, .. } => Some(*reason),
        }
    }

    /// Convert into the boundary error type; malformed output is never
    /// coerced into a clean verdict.
    pub fn into_result(self) -> Result<Verdict, VerifyError> {
        match self {
            ParseOutcome::Valid(v) => Ok(v),
            ParseOutcome::Malformed {
                raw,
                reason,
                detail,
            } => Err(VerifyError::ParseFailure {
                raw,
                reason,
                detail,
            }),
        }
    }
}

// ── Wire contract ──────────────────────────────────────────────────

/// Request body accepted at the verification boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyRequestBody {
    pub principles: Vec<String>,
    pub response: String,
}

impl VerifyRequestBody {
    pub fn into_request(self) -> Result<VerificationRequest, VerifyError> {
        VerificationRequest::new(self.principles, self.response)
    }
}

impl From<&VerificationRequest> for VerifyRequestBody {
    fn from(r: &VerificationRequest) -> Self {
        Self {
            principles: r.principles().iter().map(|p| p.as_str().to_string()).collect(),
            response: r.response().to_string(),
        }
    }
}

/// Successful verification: the verdict plus measured latency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifyResponse {
    pub verdict: Verdict,
    pub latency_ms: u64,
}

/// Error payload: `{"error": {"code": ..., "message": ...}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

/// `code` and `message` are always present; the optional fields carry
/// what a client needs to rebuild the same [`VerifyError`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: crate::error::ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<MalformedReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub waited_ms: Option<u64>,
}

impl From<&VerifyError> for ErrorBody {
    fn from(e: &VerifyError) -> Self {
        let mut detail = ErrorDetail {
            code: e.code(),
            message: e.to_string(),
            detail: None,
            reason: None,
            budget_ms: None,
            waited_ms: None,
        };
        match e {
            VerifyError::InvalidRequest(msg) | VerifyError::ModelUnavailable(msg) => {
                detail.detail = Some(msg.clone());
            }
            VerifyError::Timeout { budget_ms } => detail.budget_ms = Some(*budget_ms),
            VerifyError::ParseFailure { reason, detail: d, .. } => {
                detail.reason = Some(*reason);
                detail.detail = Some(d.clone());
            }
            VerifyError::Busy { waited_ms } => detail.waited_ms = Some(*waited_ms),
        }
        Self { error: detail }
    }
}

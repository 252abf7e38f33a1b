// ─────────────────────────────────────────────────────────────────────
// Director-Class AI — Verdict Kernel Refinement Trace Types
// ─────────────────────────────────────────────────────────────────────
//! Audit records of a refinement run.
//!
//! A [`Trace`] only grows: entries are appended and never edited, so a
//! trace cut short by cancellation is still a faithful prefix.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ErrorCode, VerdictError, VerdictResult, VerifyError};
use crate::verdict::Verdict;

/// Lifecycle status of one refinement run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    InProgress,
    Passed,
    Exhausted,
    Aborted,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::InProgress)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::InProgress => "in_progress",
            RunStatus::Passed => "passed",
            RunStatus::Exhausted => "exhausted",
            RunStatus::Aborted => "aborted",
        }
    }
}

/// Why a run ended in [`RunStatus::Aborted`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AbortReason {
    Cancelled,
    VerificationFailed { code: ErrorCode, message: String },
    GenerationFailed { message: String },
    TraceSink { message: String },
}

/// What happened in one attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TraceOutcome {
    Verdict { verdict: Verdict },
    VerificationFailed { code: ErrorCode, message: String },
    GenerationFailed { message: String },
}

impl TraceOutcome {
    pub fn verification_failed(err: &VerifyError) -> Self {
        TraceOutcome::VerificationFailed {
            code: err.code(),
            message: err.to_string(),
        }
    }

    pub fn verdict(&self) -> Option<&Verdict> {
        match self {
            TraceOutcome::Verdict { verdict } => Some(verdict),
            _ => None,
        }
    }

    pub fn is_failure(&self) -> bool {
        self.verdict().is_none()
    }
}

/// One attempt within a refinement run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEntry {
    pub iteration: u32,
    /// 1-based attempt number within the iteration's current phase.
    pub attempt: u32,
    pub draft: String,
    pub outcome: TraceOutcome,
    pub timestamp: DateTime<Utc>,
    pub latency_ms: u64,
}

impl TraceEntry {
    pub fn new(iteration: u32, attempt: u32, draft: &str, outcome: TraceOutcome, latency_ms: u64) -> Self {
        Self {
            iteration,
            attempt,
            draft: draft.to_string(),
            outcome,
            timestamp: Utc::now(),
            latency_ms,
        }
    }

    pub fn to_json_line(&self) -> VerdictResult<String> {
        serde_json::to_string(self).map_err(|e| VerdictError::Trace(e.to_string()))
    }
}

/// Append-only ordered log of trace entries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Trace {
    entries: Vec<TraceEntry>,
}

impl Trace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, entry: TraceEntry) -> &TraceEntry {
        self.entries.push(entry);
        &self.entries[self.entries.len() - 1]
    }

    pub fn entries(&self) -> &[TraceEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&TraceEntry> {
        self.entries.last()
    }

    /// Number of attempts that produced a verdict.
    pub fn verdict_count(&self) -> usize {
        self.entries.iter().filter(|e| !e.outcome.is_failure()).count()
    }

    /// One JSON object per line, newline-terminated.
    pub fn to_jsonl(&self) -> VerdictResult<String> {
        let mut out = String::new();
        for entry in &self.entries {
            out.push_str(&entry.to_json_line()?);
            out.push('\n');
        }
        Ok(out)
    }

    pub fn from_jsonl(text: &str) -> VerdictResult<Self> {
        let mut trace = Self::new();
        for (n, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let entry: TraceEntry = serde_json::from_str(line)
                .map_err(|e| VerdictError::Trace(format!("line {}: {e}", n + 1)))?;
            trace.append(entry);
        }
        Ok(trace)
    }
}

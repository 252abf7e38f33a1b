// ─────────────────────────────────────────────────────────────────────
// Director-Class AI — Verdict Parser
// ─────────────────────────────────────────────────────────────────────
//! Converts free-form model text into a validated [`Verdict`] or a
//! classified parse failure.
//!
//! Tolerant about *where* the object sits (prose, markdown fences and
//! trailing chatter are skipped), strict about *what* it contains:
//!
//! - `violations` must be an array whose elements are principle texts
//!   (exact, or equal after trimming and ASCII case folding) or 1-based
//!   principle indices.
//! - `confidence` must be a finite number in `[0, 1]`. Out-of-range values
//!   are rejected as `type_mismatch`, never clamped.
//! - Extra fields are ignored.
//!
//! Parsing is total: every input string yields a [`ParseOutcome`].

use std::ops::Range;

use serde_json::{Map, Value};

use verdict_types::{
    MalformedReason, ParseOutcome, Principle, UnknownPrinciplePolicy, Verdict,
};

/// Upper bound on `{` positions tried before giving up.
const MAX_CANDIDATES: usize = 64;

/// Byte range of the first balanced `{...}` that parses as a JSON object.
pub fn object_span(raw: &str) -> Option<Range<usize>> {
    first_object(raw).map(|(span, _)| span)
}

fn first_object(raw: &str) -> Option<(Range<usize>, Map<String, Value>)> {
    let bytes = raw.as_bytes();
    let starts = bytes
        .iter()
        .enumerate()
        .filter(|(_, b)| **b == b'{')
        .map(|(i, _)| i)
        .take(MAX_CANDIDATES);

    for start in starts {
        let Some(end) = balanced_end(bytes, start) else {
            continue;
        };
        // Braces and quotes are ASCII, so both ends sit on char boundaries.
        if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(&raw[start..end]) {
            return Some((start..end, map));
        }
    }
    None
}

/// Index one past the brace closing the object opened at `start`.
fn balanced_end(bytes: &[u8], start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[start..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(start + offset + 1);
                }
            }
            _ => {}
        }
    }
    None
}

/// Parse raw model output against the request's principles.
pub fn parse_verdict(
    raw: &str,
    principles: &[Principle],
    policy: UnknownPrinciplePolicy,
) -> ParseOutcome {
    let Some((_, object)) = first_object(raw) else {
        return ParseOutcome::malformed(
            raw,
            MalformedReason::NoObjectFound,
            "no balanced JSON object in model output",
        );
    };

    let entries = match object.get("violations") {
        None => {
            return ParseOutcome::malformed(
                raw,
                MalformedReason::MissingField,
                "missing field `violations`",
            )
        }
        Some(Value::Array(entries)) => entries,
        Some(other) => {
            return ParseOutcome::malformed(
                raw,
                MalformedReason::TypeMismatch,
                format!("`violations` must be an array, got {}", kind(other)),
            )
        }
    };

    let confidence = match object.get("confidence") {
        None => {
            return ParseOutcome::malformed(
                raw,
                MalformedReason::MissingField,
                "missing field `confidence`",
            )
        }
        Some(Value::Number(n)) => match n.as_f64() {
            Some(c) if c.is_finite() && (0.0..=1.0).contains(&c) => c,
            _ => {
                return ParseOutcome::malformed(
                    raw,
                    MalformedReason::TypeMismatch,
                    format!("`confidence` must be within [0, 1], got {n}"),
                )
            }
        },
        Some(other) => {
            return ParseOutcome::malformed(
                raw,
                MalformedReason::TypeMismatch,
                format!("`confidence` must be a number, got {}", kind(other)),
            )
        }
    };

    let mut matched = Vec::with_capacity(entries.len());
    for entry in entries {
        let resolved = match entry {
            Value::String(s) => match_text(s, principles).ok_or_else(|| format!("{s:?}")),
            Value::Number(n) => match n.as_u64() {
                Some(idx) => match_index(idx, principles).ok_or_else(|| format!("index {idx}")),
                None => {
                    return ParseOutcome::malformed(
                        raw,
                        MalformedReason::TypeMismatch,
                        format!("principle index must be a positive integer, got {n}"),
                    )
                }
            },
            other => {
                return ParseOutcome::malformed(
                    raw,
                    MalformedReason::TypeMismatch,
                    format!(
                        "`violations` entries must be strings or indices, got {}",
                        kind(other)
                    ),
                )
            }
        };

        match (resolved, policy) {
            (Ok(p), _) => matched.push(p.clone()),
            (Err(unknown), UnknownPrinciplePolicy::Reject) => {
                return ParseOutcome::malformed(
                    raw,
                    MalformedReason::UnknownPrinciple,
                    format!("violation {unknown} matches no supplied principle"),
                )
            }
            (Err(unknown), UnknownPrinciplePolicy::Drop) => {
                log::warn!("dropping unknown violation {unknown}: matches no supplied principle");
            }
        }
    }

    match Verdict::for_principles(principles, matched, confidence) {
        Ok(verdict) => ParseOutcome::Valid(verdict),
        Err(p) => ParseOutcome::malformed(
            raw,
            MalformedReason::UnknownPrinciple,
            format!("violation {:?} matches no supplied principle", p.as_str()),
        ),
    }
}

fn match_text<'a>(text: &str, principles: &'a [Principle]) -> Option<&'a Principle> {
    if let Some(p) = principles.iter().find(|p| p.as_str() == text) {
        return Some(p);
    }
    let wanted = text.trim();
    principles
        .iter()
        .find(|p| p.as_str().trim().eq_ignore_ascii_case(wanted))
}

fn match_index(idx: u64, principles: &[Principle]) -> Option<&Principle> {
    let idx = usize::try_from(idx).ok()?;
    idx.checked_sub(1).and_then(|i| principles.get(i))
}

fn kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

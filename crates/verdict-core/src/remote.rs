// ─────────────────────────────────────────────────────────────────────
// Director-Class AI — Remote Verifier Client
// ─────────────────────────────────────────────────────────────────────
//! [`Verifier`] over HTTP, for orchestrators running apart from the
//! model host. Speaks the `/v1/verify` contract served by
//! `verdict-server`.

use std::time::{Duration, Instant};

use verdict_types::{
    ErrorBody, VerificationRequest, Verdict, VerifyError, VerifyRequestBody, VerifyResponse,
};

use crate::service::{HealthReport, Verifier};

pub struct RemoteVerifier {
    base_url: String,
    http_client: reqwest::blocking::Client,
}

impl RemoteVerifier {
    /// `timeout` bounds the whole exchange, including queue wait on the
    /// server.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, VerifyError> {
        let base_url = base_url.into();
        if base_url.trim().is_empty() {
            return Err(VerifyError::InvalidRequest(
                "base_url must not be empty".to_string(),
            ));
        }
        let http_client = reqwest::blocking::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(timeout)
            .build()
            .map_err(|e| VerifyError::ModelUnavailable(format!("http client: {e}")))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http_client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn health(&self) -> Result<HealthReport, VerifyError> {
        let response = self
            .http_client
            .get(format!("{}/healthz", self.base_url))
            .send()
            .map_err(transport_error)?;
        response
            .json()
            .map_err(|e| VerifyError::ModelUnavailable(format!("bad health payload: {e}")))
    }
}

impl Verifier for RemoteVerifier {
    fn verify(&self, request: &VerificationRequest) -> Result<VerifyResponse, VerifyError> {
        let started = Instant::now();
        let response = self
            .http_client
            .post(format!("{}/v1/verify", self.base_url))
            .json(&VerifyRequestBody::from(request))
            .send()
            .map_err(transport_error)?;

        let status = response.status();
        if status.is_success() {
            let payload: VerifyResponse = response.json().map_err(|e| {
                VerifyError::ModelUnavailable(format!("bad verify payload: {e}"))
            })?;
            return checked_response(request, payload);
        }

        let body = response.text().unwrap_or_default();
        match serde_json::from_str::<ErrorBody>(&body) {
            Ok(err) => Err(VerifyError::from_wire(err.error)),
            Err(_) => {
                log::warn!(
                    "verifier returned {} without an error body after {}ms",
                    status.as_u16(),
                    started.elapsed().as_millis()
                );
                Err(VerifyError::ModelUnavailable(format!(
                    "unexpected status {}",
                    status.as_u16()
                )))
            }
        }
    }
}

/// Hold a remote verdict to the same invariants as a local one: every
/// violation must name a principle from `request`.
fn checked_response(
    request: &VerificationRequest,
    payload: VerifyResponse,
) -> Result<VerifyResponse, VerifyError> {
    let VerifyResponse {
        verdict,
        latency_ms,
    } = payload;
    let verdict = Verdict::for_request(request, verdict.violations().to_vec(), verdict.confidence())
        .map_err(|unknown| {
            log::warn!("remote verifier flagged a principle outside the request: {unknown}");
            VerifyError::ModelUnavailable(format!(
                "remote verdict names unknown principle {:?}",
                unknown.as_str()
            ))
        })?;
    Ok(VerifyResponse {
        verdict,
        latency_ms,
    })
}

fn transport_error(e: reqwest::Error) -> VerifyError {
    if e.is_timeout() {
        VerifyError::Timeout { budget_ms: 0 }
    } else {
        VerifyError::ModelUnavailable(format!("verifier unreachable: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    use verdict_types::{ErrorCode, MalformedReason, Principle};

    use super::*;

    /// Answer one HTTP request with `status` and a JSON `body`.
    fn one_shot_server(status: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 1024];
            loop {
                let n = stream.read(&mut chunk).unwrap();
                buf.extend_from_slice(&chunk[..n]);
                let text = String::from_utf8_lossy(&buf).to_string();
                if let Some(end) = text.find("\r\n\r\n") {
                    let length = text[..end]
                        .lines()
                        .find_map(|l| {
                            l.to_ascii_lowercase()
                                .strip_prefix("content-length:")
                                .map(|v| v.trim().parse::<usize>().unwrap())
                        })
                        .unwrap_or(0);
                    if buf.len() >= end + 4 + length {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }
            let reply = format!(
                "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            stream.write_all(reply.as_bytes()).unwrap();
        });
        format!("http://{addr}")
    }

    fn request() -> VerificationRequest {
        VerificationRequest::new(["Be concise"], "OK.").unwrap()
    }

    #[test]
    fn test_remote_verdict_outside_request_rejected() {
        let url = one_shot_server(
            "200 OK",
            r#"{"verdict": {"violations": ["Launch the missiles"], "confidence": 0.9}, "latency_ms": 3}"#,
        );
        let v = RemoteVerifier::new(url, Duration::from_secs(5)).unwrap();
        match v.verify(&request()) {
            Err(VerifyError::ModelUnavailable(msg)) => assert!(msg.contains("Launch the missiles")),
            other => panic!("expected model_unavailable, got {other:?}"),
        }
    }

    #[test]
    fn test_remote_confidence_out_of_range_rejected() {
        let url = one_shot_server(
            "200 OK",
            r#"{"verdict": {"violations": [], "confidence": 7.5}, "latency_ms": 3}"#,
        );
        let v = RemoteVerifier::new(url, Duration::from_secs(5)).unwrap();
        assert!(matches!(
            v.verify(&request()),
            Err(VerifyError::ModelUnavailable(_))
        ));
    }

    #[test]
    fn test_remote_parse_failure_keeps_reason() {
        let url = one_shot_server(
            "502 Bad Gateway",
            r#"{"error": {"code": "parse_failure", "message": "parse failure (type_mismatch): bad", "reason": "type_mismatch", "detail": "bad"}}"#,
        );
        let v = RemoteVerifier::new(url, Duration::from_secs(5)).unwrap();
        let err = v.verify(&request()).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ParseFailure);
        assert!(matches!(
            err,
            VerifyError::ParseFailure {
                reason: MalformedReason::TypeMismatch,
                ..
            }
        ));
        assert_eq!(err.to_string(), "parse failure (type_mismatch): bad");
    }

    #[test]
    fn test_checked_response_keeps_request_order() {
        let req = VerificationRequest::new(["Be concise", "Be polite"], "Hey.").unwrap();
        let payload: VerifyResponse = serde_json::from_str(
            r#"{"verdict": {"violations": ["Be polite", "Be concise"], "confidence": 0.6}, "latency_ms": 9}"#,
        )
        .unwrap();
        let checked = checked_response(&req, payload).unwrap();
        assert_eq!(
            checked.verdict.violations(),
            &[Principle::new("Be concise"), Principle::new("Be polite")]
        );
        assert_eq!(checked.latency_ms, 9);
    }

    #[test]
    fn test_rejects_empty_base_url() {
        assert!(matches!(
            RemoteVerifier::new(" ", Duration::from_secs(1)),
            Err(VerifyError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_trailing_slash_trimmed() {
        let v = RemoteVerifier::new("http://127.0.0.1:9/", Duration::from_secs(1)).unwrap();
        assert_eq!(v.base_url(), "http://127.0.0.1:9");
    }

    #[test]
    fn test_unreachable_is_unavailable() {
        // Bind then drop to get a port with nothing listening.
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let v = RemoteVerifier::new(format!("http://127.0.0.1:{port}"), Duration::from_secs(2))
            .unwrap();
        let req = VerificationRequest::new(["Be concise"], "OK.").unwrap();
        assert!(matches!(
            v.verify(&req),
            Err(VerifyError::ModelUnavailable(_))
        ));
    }
}

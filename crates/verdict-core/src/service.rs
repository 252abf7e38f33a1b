// ─────────────────────────────────────────────────────────────────────
// Director-Class AI — Verification Service
// ─────────────────────────────────────────────────────────────────────
//! Concurrency boundary around the [`VerificationEngine`].
//!
//! Callers may arrive from any number of threads; the model sees at most
//! one inference at a time. Waiting callers are bounded by the queue
//! policy: `wait` blocks up to the configured timeout, `reject` fails
//! fast. Either way the failure is `busy`, never a hang.
//!
//! Liveness and readiness come from atomics and never touch the engine
//! lock, so health probes answer while a long inference runs.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};

use verdict_types::{QueuePolicy, VerificationRequest, VerifierConfig, VerifyError, VerifyResponse};

use crate::engine::{InferenceLog, VerificationEngine};
use crate::metrics::VerifierMetrics;
use crate::model::ModelLoader;

/// Anything that answers verification requests: the in-process service,
/// or a remote one over HTTP.
pub trait Verifier: Send + Sync {
    fn verify(&self, request: &VerificationRequest) -> Result<VerifyResponse, VerifyError>;
}

/// Snapshot for `/healthz` and `/readyz`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub live: bool,
    pub model_loaded: bool,
    pub queue_depth: usize,
    pub in_flight: usize,
}

impl HealthReport {
    pub fn ready(&self) -> bool {
        self.live && self.model_loaded
    }
}

pub struct VerificationService {
    engine: Mutex<VerificationEngine>,
    policy: QueuePolicy,
    queue_wait: Duration,
    loaded: Arc<AtomicBool>,
    queued: AtomicUsize,
    in_flight: AtomicUsize,
    metrics: VerifierMetrics,
    log: Arc<InferenceLog>,
}

impl VerificationService {
    /// Service with the model not yet loaded; call [`Self::load_model`].
    pub fn new(config: VerifierConfig, loader: Arc<dyn ModelLoader>, metrics: VerifierMetrics) -> Self {
        let policy = config.queue_policy;
        let queue_wait = config.queue_wait_timeout();
        let engine = VerificationEngine::new(config, loader, metrics.clone());
        metrics.set_queue_depth(0);
        Self {
            loaded: engine.loaded_flag(),
            log: engine.inference_log(),
            engine: Mutex::new(engine),
            policy,
            queue_wait,
            queued: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            metrics,
        }
    }

    /// Build and load in one step.
    pub fn start(
        config: VerifierConfig,
        loader: Arc<dyn ModelLoader>,
        metrics: VerifierMetrics,
    ) -> Result<Self, VerifyError> {
        let service = Self::new(config, loader, metrics);
        service.load_model()?;
        Ok(service)
    }

    /// Load or reload the model. Waits for any in-flight inference.
    pub fn load_model(&self) -> Result<(), VerifyError> {
        self.engine.lock().load()
    }

    pub fn unload_model(&self) {
        self.engine.lock().unload();
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::SeqCst)
    }

    pub fn health(&self) -> HealthReport {
        HealthReport {
            live: true,
            model_loaded: self.is_loaded(),
            queue_depth: self.queued.load(Ordering::SeqCst),
            in_flight: self.in_flight.load(Ordering::SeqCst),
        }
    }

    pub fn metrics(&self) -> &VerifierMetrics {
        &self.metrics
    }

    /// Windows of recent inferences, for auditing exclusivity.
    pub fn inference_log(&self) -> Arc<InferenceLog> {
        Arc::clone(&self.log)
    }

    fn acquire(&self) -> Result<MutexGuard<'_, VerificationEngine>, VerifyError> {
        let depth = self.queued.fetch_add(1, Ordering::SeqCst) + 1;
        self.metrics.set_queue_depth(depth);
        let started = Instant::now();

        let guard = match self.policy {
            QueuePolicy::Wait => self.engine.try_lock_for(self.queue_wait),
            QueuePolicy::Reject => self.engine.try_lock(),
        };

        let depth = self.queued.fetch_sub(1, Ordering::SeqCst) - 1;
        self.metrics.set_queue_depth(depth);

        guard.ok_or_else(|| {
            let waited_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
            log::warn!("verifier busy: gave up after {waited_ms}ms ({:?} policy)", self.policy);
            self.metrics.request_completed("busy");
            VerifyError::Busy { waited_ms }
        })
    }
}

impl Verifier for VerificationService {
    fn verify(&self, request: &VerificationRequest) -> Result<VerifyResponse, VerifyError> {
        let started = Instant::now();

        let mut engine = self.acquire()?;
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let result = engine.infer(request);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        drop(engine);

        let verdict = result?;
        Ok(VerifyResponse {
            verdict,
            latency_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        })
    }
}

impl<V: Verifier + ?Sized> Verifier for Arc<V> {
    fn verify(&self, request: &VerificationRequest) -> Result<VerifyResponse, VerifyError> {
        (**self).verify(request)
    }
}

#[cfg(test)]
#[allow(clippy::float_cmp)]
mod tests {
    use std::sync::mpsc;
    use std::thread;

    use verdict_types::ModelFault;

    use super::*;
    use crate::model::{ExternalCausalModel, Generation, HeuristicLoader, LoadedModel};

    /// Loader whose model blocks until released, signalling on entry.
    fn gated_loader(entered: mpsc::Sender<()>, release: Arc<Mutex<mpsc::Receiver<()>>>) -> Arc<dyn ModelLoader> {
        Arc::new(move |_: &VerifierConfig| -> Result<LoadedModel, ModelFault> {
            let entered = entered.clone();
            let release = Arc::clone(&release);
            Ok(LoadedModel::Causal(Box::new(ExternalCausalModel::new(
                move |_, _| {
                    let _ = entered.send(());
                    let _ = release.lock().recv();
                    Ok(Generation::text_only(r#"{"violations": [], "confidence": 0.9}"#))
                },
            ))))
        })
    }

    fn request() -> VerificationRequest {
        VerificationRequest::new(["Be concise"], "OK.").unwrap()
    }

    #[test]
    fn test_scenario_b_clean() {
        let svc = VerificationService::start(
            VerifierConfig::default(),
            Arc::new(HeuristicLoader),
            VerifierMetrics::detached().unwrap(),
        )
        .unwrap();
        let resp = svc.verify(&request()).unwrap();
        assert!(resp.verdict.is_clean());
        assert_eq!(svc.metrics().request_count("ok"), 1.0);
    }

    #[test]
    fn test_health_before_load() {
        let svc = VerificationService::new(
            VerifierConfig::default(),
            Arc::new(HeuristicLoader),
            VerifierMetrics::detached().unwrap(),
        );
        let h = svc.health();
        assert!(h.live);
        assert!(!h.ready());
        assert!(matches!(
            svc.verify(&request()),
            Err(VerifyError::ModelUnavailable(_))
        ));
        svc.load_model().unwrap();
        assert!(svc.health().ready());
        svc.unload_model();
        assert!(!svc.health().ready());
    }

    #[test]
    fn test_reject_policy_fails_fast_while_busy() {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let config = VerifierConfig {
            queue_policy: QueuePolicy::Reject,
            ..Default::default()
        };
        let svc = Arc::new(
            VerificationService::start(
                config,
                gated_loader(entered_tx, Arc::new(Mutex::new(release_rx))),
                VerifierMetrics::detached().unwrap(),
            )
            .unwrap(),
        );

        let worker = {
            let svc = Arc::clone(&svc);
            thread::spawn(move || svc.verify(&request()))
        };
        entered_rx.recv().unwrap();

        // Health answers while inference holds the engine.
        let h = svc.health();
        assert!(h.model_loaded);
        assert_eq!(h.in_flight, 1);

        let err = svc.verify(&request()).unwrap_err();
        assert!(matches!(err, VerifyError::Busy { .. }));
        assert_eq!(svc.metrics().request_count("busy"), 1.0);

        release_tx.send(()).unwrap();
        assert!(worker.join().unwrap().is_ok());
        assert_eq!(svc.health().queue_depth, 0);
    }

    #[test]
    fn test_wait_policy_times_out() {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let config = VerifierConfig {
            queue_policy: QueuePolicy::Wait,
            queue_wait_timeout_ms: 30,
            ..Default::default()
        };
        let svc = Arc::new(
            VerificationService::start(
                config,
                gated_loader(entered_tx, Arc::new(Mutex::new(release_rx))),
                VerifierMetrics::detached().unwrap(),
            )
            .unwrap(),
        );
        let worker = {
            let svc = Arc::clone(&svc);
            thread::spawn(move || svc.verify(&request()))
        };
        entered_rx.recv().unwrap();

        match svc.verify(&request()) {
            Err(VerifyError::Busy { waited_ms }) => assert!(waited_ms >= 30),
            other => panic!("expected busy, got {other:?}"),
        }

        release_tx.send(()).unwrap();
        assert!(worker.join().unwrap().is_ok());
    }

    #[test]
    fn test_arc_verifier_delegates() {
        let svc: Arc<dyn Verifier> = Arc::new(
            VerificationService::start(
                VerifierConfig::default(),
                Arc::new(HeuristicLoader),
                VerifierMetrics::detached().unwrap(),
            )
            .unwrap(),
        );
        assert!(Verifier::verify(&svc, &request()).is_ok());
    }
}

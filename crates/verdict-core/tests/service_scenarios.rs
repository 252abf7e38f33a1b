// ─────────────────────────────────────────────────────────────────────
// Director-Class AI — Verdict Kernel Service Scenarios
// ─────────────────────────────────────────────────────────────────────

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use verdict_core::{
    CancellationToken, ExternalCausalModel, ExternalGenerator, Generation, HeuristicLoader,
    LoadedModel, MetricsRegistry, ModelLoader, RefinementOrchestrator, VerificationService,
    Verifier, VerifierMetrics,
};
use verdict_types::{
    ModelFault, ModelType, Principle, QueuePolicy, RefinementConfig, RunStatus,
    VerificationRequest, VerifierConfig, VerifyError,
};

fn heuristic_service(model_type: ModelType) -> VerificationService {
    VerificationService::start(
        VerifierConfig {
            model_type,
            ..Default::default()
        },
        Arc::new(HeuristicLoader),
        VerifierMetrics::detached().unwrap(),
    )
    .unwrap()
}

#[test]
fn test_scenario_a_promise_violated() {
    for model_type in [ModelType::Causal, ModelType::Classifier] {
        let svc = heuristic_service(model_type);
        let req = VerificationRequest::new(
            ["Never make promises you cannot keep"],
            "I guarantee you will double your money.",
        )
        .unwrap();
        let verdict = svc.verify(&req).unwrap().verdict;
        assert_eq!(
            verdict.violations(),
            &[Principle::new("Never make promises you cannot keep")]
        );
        assert!(verdict.confidence() > 0.5, "{model_type:?}");
    }
}

#[test]
fn test_scenario_b_concise_clean() {
    for model_type in [ModelType::Causal, ModelType::Classifier] {
        let svc = heuristic_service(model_type);
        let req = VerificationRequest::new(["Be concise"], "OK.").unwrap();
        assert!(svc.verify(&req).unwrap().verdict.is_clean());
    }
}

#[test]
fn test_invalid_requests_rejected_before_model() {
    assert!(matches!(
        VerificationRequest::new(Vec::<String>::new(), "hi"),
        Err(VerifyError::InvalidRequest(_))
    ));
    assert!(matches!(
        VerificationRequest::new(["Be concise", "  "], "hi"),
        Err(VerifyError::InvalidRequest(_))
    ));
    assert!(matches!(
        VerificationRequest::new(["Be concise"], ""),
        Err(VerifyError::InvalidRequest(_))
    ));
}

/// Model that notices if it is ever entered twice at once.
fn exclusive_loader(busy: Arc<AtomicBool>, overlaps: Arc<AtomicUsize>) -> Arc<dyn ModelLoader> {
    Arc::new(move |_: &VerifierConfig| -> Result<LoadedModel, ModelFault> {
        let busy = Arc::clone(&busy);
        let overlaps = Arc::clone(&overlaps);
        Ok(LoadedModel::Causal(Box::new(ExternalCausalModel::new(
            move |_, _| {
                if busy.swap(true, Ordering::SeqCst) {
                    overlaps.fetch_add(1, Ordering::SeqCst);
                }
                thread::sleep(Duration::from_millis(2));
                busy.store(false, Ordering::SeqCst);
                Ok(Generation::text_only(
                    r#"{"violations": [], "confidence": 0.8}"#,
                ))
            },
        ))))
    })
}

#[test]
fn test_at_most_one_inference_under_contention() {
    const THREADS: usize = 8;
    const PER_THREAD: usize = 5;

    let overlaps = Arc::new(AtomicUsize::new(0));
    let svc = Arc::new(
        VerificationService::start(
            VerifierConfig {
                queue_policy: QueuePolicy::Wait,
                queue_wait_timeout_ms: 30_000,
                ..Default::default()
            },
            exclusive_loader(Arc::new(AtomicBool::new(false)), Arc::clone(&overlaps)),
            VerifierMetrics::detached().unwrap(),
        )
        .unwrap(),
    );

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let svc = Arc::clone(&svc);
            thread::spawn(move || {
                let req =
                    VerificationRequest::new(["Be concise"], format!("reply from {t}")).unwrap();
                (0..PER_THREAD)
                    .map(|_| svc.verify(&req))
                    .filter(Result::is_ok)
                    .count()
            })
        })
        .collect();

    let ok: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert_eq!(ok, THREADS * PER_THREAD);
    assert_eq!(overlaps.load(Ordering::SeqCst), 0);

    let log = svc.inference_log();
    assert_eq!(log.len(), THREADS * PER_THREAD);
    assert!(!log.has_overlap());
    assert_eq!(svc.health().queue_depth, 0);
    assert_eq!(svc.health().in_flight, 0);
}

#[test]
fn test_reject_policy_never_overlaps() {
    let svc = Arc::new(
        VerificationService::start(
            VerifierConfig {
                queue_policy: QueuePolicy::Reject,
                ..Default::default()
            },
            exclusive_loader(Arc::new(AtomicBool::new(false)), Arc::new(AtomicUsize::new(0))),
            VerifierMetrics::detached().unwrap(),
        )
        .unwrap(),
    );
    let handles: Vec<_> = (0..6)
        .map(|_| {
            let svc = Arc::clone(&svc);
            thread::spawn(move || {
                let req = VerificationRequest::new(["Be concise"], "hi").unwrap();
                (0..5).map(|_| svc.verify(&req)).collect::<Vec<_>>()
            })
        })
        .collect();
    let results: Vec<_> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();
    for r in &results {
        assert!(matches!(r, Ok(_) | Err(VerifyError::Busy { .. })));
    }
    assert!(!svc.inference_log().has_overlap());
}

#[test]
fn test_verify_returns_at_budget_when_model_ignores_deadline() {
    let svc = VerificationService::start(
        VerifierConfig {
            inference_timeout_ms: 50,
            ..Default::default()
        },
        Arc::new(|_: &VerifierConfig| -> Result<LoadedModel, ModelFault> {
            Ok(LoadedModel::Causal(Box::new(ExternalCausalModel::new(
                |_, _| {
                    thread::sleep(Duration::from_millis(800));
                    Ok(Generation::text_only(r#"{"violations": [], "confidence": 0.9}"#))
                },
            ))))
        }),
        VerifierMetrics::detached().unwrap(),
    )
    .unwrap();

    let req = VerificationRequest::new(["Be concise"], "OK.").unwrap();
    let started = Instant::now();
    let result = svc.verify(&req);
    let elapsed = started.elapsed();

    assert_eq!(result.unwrap_err(), VerifyError::Timeout { budget_ms: 50 });
    assert!(elapsed < Duration::from_millis(400), "returned after {elapsed:?}");
    assert!(svc.is_loaded());
    assert_eq!(svc.metrics().request_count("timeout"), 1.0);
    assert_eq!(svc.health().in_flight, 0);
}

#[test]
fn test_refinement_against_heuristic_service() {
    let registry = MetricsRegistry::new().unwrap();
    let svc = Arc::new(
        VerificationService::start(
            VerifierConfig::default(),
            Arc::new(HeuristicLoader),
            registry.verifier_metrics().clone(),
        )
        .unwrap(),
    );
    // First draft overpromises; revision prompts produce a careful answer.
    let generator = ExternalGenerator::new(|prompt, _| {
        if prompt.contains("YOUR PREVIOUS DRAFT") {
            Ok("Returns are never certain; consider speaking to an adviser.".to_string())
        } else {
            Ok("I guarantee you will double your money.".to_string())
        }
    });
    let orch = RefinementOrchestrator::new(
        svc,
        Arc::new(generator),
        RefinementConfig {
            retry_backoff_ms: 1,
            max_backoff_ms: 1,
            ..Default::default()
        },
    )
    .with_metrics(registry.verifier_metrics().clone());

    let out = orch
        .run(
            "Answer: how do I get rich?",
            &[Principle::new("Never make promises you cannot keep")],
            &CancellationToken::new(),
        )
        .unwrap();
    assert_eq!(out.status, RunStatus::Passed);
    assert_eq!(out.trace.len(), 2);
    assert!(out.final_draft.contains("never certain"));

    let text = registry.encode_text().unwrap();
    assert!(text.contains("verdict_refinement_runs_total"));
    assert!(text.contains("Never make promises you cannot keep"));
}

#[test]
fn test_trace_file_written_during_run() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("trace.jsonl");
    let svc = Arc::new(heuristic_service(ModelType::Causal));
    let orch = RefinementOrchestrator::new(
        svc,
        Arc::new(ExternalGenerator::new(|_, _| Ok("You idiot.".to_string()))),
        RefinementConfig {
            max_iters: 2,
            trace_path: Some(path.clone()),
            ..Default::default()
        },
    );
    let out = orch
        .run("Greet the user", &[Principle::new("Be polite")], &CancellationToken::new())
        .unwrap();
    assert_eq!(out.status, RunStatus::Exhausted);

    let replayed = verdict_core::read_trace(&path).unwrap();
    assert_eq!(replayed.len(), 3);
    let iters: Vec<u32> = replayed.entries().iter().map(|e| e.iteration).collect();
    assert_eq!(iters, vec![0, 1, 2]);
    assert!(replayed.entries().iter().all(|e| e.draft == "You idiot."));
}

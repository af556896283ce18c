//! End-to-end runs against a scripted HTTP client on a paused tokio clock.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use surge_core::{
    ActionKind, ActionSpec, CheckPredicate, Executor, QrPayload, ScenarioConfig, SleepSpec, Stage,
    TestPlan, ThresholdSpec, UrlSource, Workload,
};
use surge_engine::{
    HttpClient, HttpRequest, HttpResponse, LoadTestOrchestrator, RunOptions, RunState, StopReason,
    Verdict,
};
use surge_metrics::MetricSummary;
use tokio::time::Instant;

/// Scripted stand-in for the QR service.
struct MockClient {
    created: Instant,
    latency: Duration,
    failing_path: Option<(&'static str, u16)>,
    /// Failures stop after this much time has passed.
    failing_until: Option<Duration>,
    calls: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl MockClient {
    fn new(latency: Duration) -> Self {
        Self {
            created: Instant::now(),
            latency,
            failing_path: None,
            failing_until: None,
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    fn failing(mut self, path: &'static str, status: u16) -> Self {
        self.failing_path = Some((path, status));
        self
    }

    fn failing_until(mut self, until: Duration) -> Self {
        self.failing_until = Some(until);
        self
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn respond(&self, path: &str) -> HttpResponse {
        if let Some((failing, status)) = self.failing_path {
            let still_failing = self
                .failing_until
                .map_or(true, |until| self.created.elapsed() < until);
            if path == failing && still_failing {
                return HttpResponse::new(status, "unavailable");
            }
        }
        match path {
            "/health" => HttpResponse::new(200, r#"{"status":"healthy"}"#)
                .with_header("content-type", "application/json"),
            "/stats/" => HttpResponse::new(200, r#"{"total_qr_codes":3}"#)
                .with_header("content-type", "application/json"),
            "/qr/generate" => HttpResponse::new(200, vec![0x89, b'P', b'N', b'G'])
                .with_header("content-type", "image/png"),
            _ => HttpResponse::new(404, "not found"),
        }
    }
}

#[async_trait]
impl HttpClient for MockClient {
    async fn request(&self, request: HttpRequest) -> HttpResponse {
        let path = request.path().to_string();
        self.calls.lock().push(path.clone());

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.latency).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        self.respond(&path).with_timing(self.latency)
    }
}

fn health() -> ActionSpec {
    ActionSpec::new(ActionKind::HealthCheck).check(
        "health check status is 200",
        CheckPredicate::StatusIn {
            statuses: vec![200],
        },
    )
}

fn generate() -> ActionSpec {
    ActionSpec::new(ActionKind::GenerateQr(QrPayload::url_only(UrlSource::Fixed(
        "https://example.com".to_string(),
    ))))
    .check(
        "qr generation status is 200",
        CheckPredicate::StatusIn {
            statuses: vec![200],
        },
    )
    .count_successes("qr_codes_generated")
}

fn stats() -> ActionSpec {
    ActionSpec::new(ActionKind::StatsRequest)
}

fn one_second_pause() -> SleepSpec {
    SleepSpec::Fixed {
        duration: Duration::from_secs(1),
    }
}

fn single_scenario(executor: Executor, workload: Workload, thresholds: Vec<ThresholdSpec>) -> TestPlan {
    TestPlan {
        name: "e2e".to_string(),
        scenarios: vec![ScenarioConfig::new("main", executor, workload)],
        thresholds,
    }
}

fn options(seed: u64) -> RunOptions {
    RunOptions {
        seed: Some(seed),
        ..RunOptions::default()
    }
}

fn gauge(summary: Option<MetricSummary>) -> (f64, f64) {
    match summary {
        Some(MetricSummary::Gauge { value, max, .. }) => (value, max),
        other => panic!("expected gauge, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_ramp_profile_drives_pool_size() {
    let plan = single_scenario(
        Executor::RampingVus {
            start_vus: 0,
            stages: vec![Stage::secs(30, 5), Stage::secs(30, 5), Stage::secs(20, 0)],
        },
        Workload::new().then(health()).sleep(one_second_pause()),
        vec![ThresholdSpec::new("http_req_duration", "p(95)<500")],
    );
    let client = Arc::new(MockClient::new(Duration::from_millis(20)));
    let orchestrator = LoadTestOrchestrator::new(plan, options(1), client.clone()).unwrap();
    let collector = orchestrator.collector();
    let handle = tokio::spawn(orchestrator.run());

    // Samples land 50ms after a tick so the gauge reflects that tick's target.
    let expectations = [(15_050, 3.0), (45_050, 5.0), (70_050, 3.0), (79_050, 0.0)];
    let started = Instant::now();
    for (at_ms, expected) in expectations {
        tokio::time::sleep_until(started + Duration::from_millis(at_ms)).await;
        let (vus, _) = gauge(collector.summary("vus"));
        assert_eq!(vus, expected, "vus at {}ms", at_ms);
    }

    let report = handle.await.unwrap();
    assert_eq!(report.verdict, Verdict::Pass);
    assert_eq!(report.exit_code(), 0);
    assert_eq!(report.stop_reason, StopReason::Completed);

    let (final_vus, peak_vus) = gauge(report.metrics.get("vus").cloned());
    assert_eq!(final_vus, 0.0);
    assert_eq!(peak_vus, 5.0);

    let states: Vec<RunState> = report.transitions.iter().map(|t| t.state).collect();
    assert_eq!(
        states,
        vec![
            RunState::Ramping,
            RunState::Running,
            RunState::Draining,
            RunState::Completed,
        ]
    );
    assert_eq!(
        report.metrics.counter("http_reqs"),
        Some(client.calls().len() as f64)
    );
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_keeps_partial_results() {
    let plan = single_scenario(
        Executor::ConstantVus {
            vus: 3,
            duration: Duration::from_secs(60),
        },
        Workload::new().then(health()).sleep(one_second_pause()),
        vec![ThresholdSpec::new("http_req_failed", "rate<0.1")],
    );
    let client = Arc::new(MockClient::new(Duration::from_millis(20)));
    let orchestrator = LoadTestOrchestrator::new(plan, options(2), client.clone()).unwrap();
    let cancel = orchestrator.cancel_handle();
    let mut states = orchestrator.subscribe();
    let handle = tokio::spawn(orchestrator.run());

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(*states.borrow_and_update(), RunState::Running);
    cancel.cancel();
    assert!(cancel.is_cancelled());

    let report = handle.await.unwrap();
    assert_eq!(report.verdict, Verdict::Incomplete);
    assert_eq!(report.stop_reason, StopReason::Cancelled);
    assert_eq!(report.exit_code(), 2);
    assert!(report.elapsed_secs < 15.0);

    let tail: Vec<RunState> = report.transitions.iter().rev().take(2).map(|t| t.state).collect();
    assert_eq!(tail, vec![RunState::Completed, RunState::Draining]);

    let recorded = report.metrics.counter("http_reqs").unwrap();
    assert!(recorded >= 27.0, "recorded {}", recorded);
    assert_eq!(recorded, client.calls().len() as f64);
    // Thresholds still evaluated for inspection.
    assert!(report.thresholds.pass);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_waits_for_in_flight_request() {
    let plan = single_scenario(
        Executor::ConstantVus {
            vus: 1,
            duration: Duration::from_secs(60),
        },
        Workload::new().then(health()).sleep(one_second_pause()),
        vec![],
    );
    // Slower than the run lasts before cancel, faster than the request timeout.
    let client = Arc::new(MockClient::new(Duration::from_secs(45)));
    let orchestrator = LoadTestOrchestrator::new(plan, options(7), client.clone()).unwrap();
    let cancel = orchestrator.cancel_handle();
    let handle = tokio::spawn(orchestrator.run());

    tokio::time::sleep(Duration::from_secs(2)).await;
    cancel.cancel();

    let report = handle.await.unwrap();
    assert_eq!(report.stop_reason, StopReason::Cancelled);
    assert_eq!(report.aborted_vus, 0);
    assert_eq!(client.calls().len(), 1);
    assert_eq!(report.metrics.counter("http_reqs"), Some(1.0));
    assert!(report.elapsed_secs >= 45.0);
}

#[tokio::test(start_paused = true)]
async fn test_failing_endpoint_fails_thresholds_not_the_run() {
    let plan = single_scenario(
        Executor::ConstantVus {
            vus: 2,
            duration: Duration::from_secs(10),
        },
        Workload::new()
            .then(health())
            .then(generate())
            .sleep(one_second_pause()),
        vec![
            ThresholdSpec::new("http_req_failed", "rate<0.1"),
            ThresholdSpec::new("http_req_duration", "p(95)<500"),
        ],
    );
    let client = Arc::new(MockClient::new(Duration::from_millis(20)).failing("/qr/generate", 503));
    let orchestrator = LoadTestOrchestrator::new(plan, options(3), client.clone()).unwrap();

    let report = orchestrator.run().await;
    assert_eq!(report.stop_reason, StopReason::Completed);
    assert_eq!(report.verdict, Verdict::Fail);
    assert_eq!(report.exit_code(), 1);

    // Half the requests fail, so the VUs kept looping the whole time.
    assert_eq!(report.metrics.rate("http_req_failed"), Some(0.5));
    assert_eq!(report.metrics.rate("errors"), Some(0.5));
    assert_eq!(report.metrics.counter("qr_codes_generated"), Some(0.0));
    assert!(report.metrics.counter("iterations").unwrap() >= 18.0);

    let failed: Vec<&str> = report.thresholds.failures().map(|r| r.metric.as_str()).collect();
    assert_eq!(failed, vec!["http_req_failed"]);
    let actual = report.thresholds.results[0].actual.unwrap();
    assert!((actual - 0.5).abs() < 1e-9);
}

#[tokio::test(start_paused = true)]
async fn test_windowed_threshold_ignores_early_failures() {
    let plan = single_scenario(
        Executor::ConstantVus {
            vus: 2,
            duration: Duration::from_secs(40),
        },
        Workload::new().then(generate()).sleep(one_second_pause()),
        vec![
            ThresholdSpec::new("http_req_failed", "rate<0.1").over_window(Duration::from_secs(10)),
            ThresholdSpec::new("qr_codes_generated", "count>0"),
        ],
    );
    let client = MockClient::new(Duration::from_millis(20))
        .failing("/qr/generate", 500)
        .failing_until(Duration::from_secs(20));
    let orchestrator = LoadTestOrchestrator::new(plan, options(4), Arc::new(client)).unwrap();

    let report = orchestrator.run().await;
    assert_eq!(report.verdict, Verdict::Pass);
    // Cumulatively about half the requests failed.
    assert!(report.metrics.rate("http_req_failed").unwrap() > 0.3);
}

#[tokio::test(start_paused = true)]
async fn test_in_flight_cap_holds() {
    let plan = single_scenario(
        Executor::ConstantVus {
            vus: 20,
            duration: Duration::from_secs(5),
        },
        Workload::new().then(stats()),
        vec![],
    );
    let client = Arc::new(MockClient::new(Duration::from_millis(100)));
    let options = RunOptions {
        max_in_flight: 4,
        ..options(5)
    };
    let orchestrator = LoadTestOrchestrator::new(plan, options, client.clone()).unwrap();

    let report = orchestrator.run().await;
    assert_eq!(report.verdict, Verdict::Pass);
    assert_eq!(client.peak_in_flight.load(Ordering::SeqCst), 4);
    // 4 slots, 100ms each, 5s.
    let requests = report.metrics.counter("http_reqs").unwrap();
    assert!((196.0..=208.0).contains(&requests), "requests {}", requests);
}

#[tokio::test(start_paused = true)]
async fn test_same_seed_same_traffic() {
    async fn run(seed: u64) -> Vec<String> {
        let plan = single_scenario(
            Executor::ConstantVus {
                vus: 1,
                duration: Duration::from_secs(20),
            },
            Workload::new()
                .weighted(vec![(0.7, generate()), (0.3, stats())])
                .maybe(0.1, health())
                .sleep(SleepSpec::Uniform {
                    max: Duration::from_millis(500),
                }),
            vec![],
        );
        let client = Arc::new(MockClient::new(Duration::from_millis(10)));
        let orchestrator = LoadTestOrchestrator::new(plan, options(seed), client.clone()).unwrap();
        orchestrator.run().await;
        client.calls()
    }

    let first = run(42).await;
    let second = run(42).await;
    assert!(first.len() > 40);
    assert_eq!(first, second);
}

#[tokio::test(start_paused = true)]
async fn test_scenarios_honor_start_offsets() {
    let workload = Workload::new().then(health()).sleep(one_second_pause());
    let plan = TestPlan {
        name: "staggered".to_string(),
        scenarios: vec![
            ScenarioConfig::new(
                "early",
                Executor::ConstantVus {
                    vus: 1,
                    duration: Duration::from_secs(5),
                },
                workload.clone(),
            ),
            ScenarioConfig::new(
                "late",
                Executor::ConstantVus {
                    vus: 2,
                    duration: Duration::from_secs(5),
                },
                workload,
            )
            .starting_at(Duration::from_secs(10)),
        ],
        thresholds: vec![],
    };
    let orchestrator = LoadTestOrchestrator::new(plan, options(6), Arc::new(MockClient::new(Duration::from_millis(10)))).unwrap();
    let collector = orchestrator.collector();
    let handle = tokio::spawn(orchestrator.run());

    let started = Instant::now();
    tokio::time::sleep_until(started + Duration::from_millis(2_050)).await;
    assert_eq!(gauge(collector.summary("vus")).0, 1.0);
    tokio::time::sleep_until(started + Duration::from_millis(7_050)).await;
    assert_eq!(gauge(collector.summary("vus")).0, 0.0);
    tokio::time::sleep_until(started + Duration::from_millis(12_050)).await;
    assert_eq!(gauge(collector.summary("vus")).0, 2.0);

    let report = handle.await.unwrap();
    assert_eq!(report.verdict, Verdict::Pass);
    assert!(report.elapsed_secs >= 15.0);
}

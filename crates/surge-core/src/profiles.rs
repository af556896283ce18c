//! Preset test plans against the QR service.
//!
//! `smoke`, `soak` and `peak` run one ramping scenario with a sequential
//! request script. `scenarios` runs all three suites side by side with their
//! own executors and mixes; `SCENARIO=<name>` narrows it to one.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::metric::{ERRORS, HTTP_REQ_DURATION, HTTP_REQ_FAILED};
use crate::plan::{ScenarioConfig, TestPlan, ThresholdSpec};
use crate::stage::{Executor, Stage};
use crate::workload::{
    ActionKind, ActionSpec, CheckPredicate, QrPayload, SleepSpec, UrlSource, Workload,
};

/// Counter of successful QR generations.
pub const QR_CODES_GENERATED: &str = "qr_codes_generated";

/// Which preset plan to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestType {
    #[default]
    Smoke,
    Soak,
    Peak,
    Scenarios,
}

impl TestType {
    pub fn plan(self) -> TestPlan {
        match self {
            Self::Smoke => smoke(),
            Self::Soak => soak(),
            Self::Peak => peak(),
            Self::Scenarios => scenarios(),
        }
    }
}

impl FromStr for TestType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "smoke" => Ok(Self::Smoke),
            "soak" => Ok(Self::Soak),
            "peak" => Ok(Self::Peak),
            "scenarios" | "all" => Ok(Self::Scenarios),
            other => Err(CoreError::config(format!("unknown test type `{}`", other))),
        }
    }
}

impl fmt::Display for TestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Smoke => "smoke",
            Self::Soak => "soak",
            Self::Peak => "peak",
            Self::Scenarios => "scenarios",
        };
        f.write_str(name)
    }
}

fn hosts() -> UrlSource {
    UrlSource::Randomized {
        hosts: vec![
            "https://example.com".to_string(),
            "https://github.com".to_string(),
            "https://google.com".to_string(),
            "https://k6.io".to_string(),
        ],
    }
}

fn status_is(statuses: &[u16]) -> CheckPredicate {
    CheckPredicate::StatusIn {
        statuses: statuses.to_vec(),
    }
}

fn health(group: &str, verify_body: bool) -> ActionSpec {
    let action = ActionSpec::new(ActionKind::HealthCheck)
        .group(group)
        .check("health check status is 200", status_is(&[200]));
    if verify_body {
        action.check(
            "health check returns ok",
            CheckPredicate::JsonFieldEquals {
                field: "status".to_string(),
                value: serde_json::Value::String("ok".to_string()),
            },
        )
    } else {
        action
    }
}

fn stats(group: &str, check: Option<(&str, CheckPredicate)>) -> ActionSpec {
    let action = ActionSpec::new(ActionKind::StatsRequest)
        .group(group)
        .check("stats status is 200", status_is(&[200]));
    match check {
        Some((name, predicate)) => action.check(name, predicate),
        None => action,
    }
}

fn generate(group: &str, payload: QrPayload, statuses: &[u16], exact_png: bool) -> ActionSpec {
    let image_check = if exact_png {
        CheckPredicate::HeaderEquals {
            header: "content-type".to_string(),
            value: "image/png".to_string(),
        }
    } else {
        CheckPredicate::HeaderContains {
            header: "content-type".to_string(),
            value: "image/png".to_string(),
        }
    };
    ActionSpec::new(ActionKind::GenerateQr(payload))
        .group(group)
        .expect_statuses(statuses)
        .check("qr generation status is expected", status_is(statuses))
        .check("qr response is image", image_check)
        .count_successes(QR_CODES_GENERATED)
}

fn field(name: &str) -> String {
    name.to_string()
}

fn staged_thresholds(p95_ms: u32, max_failed: f64) -> Vec<ThresholdSpec> {
    vec![
        ThresholdSpec::new(HTTP_REQ_DURATION, format!("p(95)<{}", p95_ms)),
        ThresholdSpec::new(HTTP_REQ_FAILED, format!("rate<{}", max_failed)),
    ]
}

/// Minimal sanity check: one user for ten seconds.
pub fn smoke() -> TestPlan {
    let workload = Workload::new()
        .then(health("Smoke: Health Check", true))
        .then(stats(
            "Smoke: Get Stats",
            Some((
                "stats has total_qr_generated field",
                CheckPredicate::JsonFieldPresent {
                    field: field("total_qr_generated"),
                },
            )),
        ))
        .then(generate(
            "Smoke: Generate QR Code",
            QrPayload::styled(UrlSource::Fixed("https://example.com".to_string())),
            &[200],
            true,
        ));

    TestPlan {
        name: "smoke".to_string(),
        scenarios: vec![ScenarioConfig::new(
            "smoke",
            Executor::RampingVus {
                start_vus: 0,
                stages: vec![Stage::secs(1, 1), Stage::secs(8, 1), Stage::secs(1, 0)],
            },
            workload,
        )],
        thresholds: staged_thresholds(500, 0.1),
    }
}

/// Moderate load held for twenty minutes to surface leaks.
pub fn soak() -> TestPlan {
    let workload = Workload::new()
        .then(health("Soak: Health Check", false))
        .then(
            generate(
                "Soak: Generate QR Code",
                QrPayload::styled(hosts()),
                &[200],
                true,
            )
            .check("qr response is not empty", CheckPredicate::BodyNotEmpty),
        )
        .then(stats(
            "Soak: Get Stats",
            Some((
                "total_qr_generated is increasing",
                CheckPredicate::JsonFieldAtLeast {
                    field: field("total_qr_generated"),
                    min: 0.0,
                },
            )),
        ));

    TestPlan {
        name: "soak".to_string(),
        scenarios: vec![ScenarioConfig::new(
            "soak",
            Executor::RampingVus {
                start_vus: 0,
                stages: vec![Stage::mins(2, 10), Stage::mins(20, 10), Stage::mins(2, 0)],
            },
            workload,
        )],
        thresholds: staged_thresholds(1000, 0.05),
    }
}

/// Ramp to a hundred users and hold them.
pub fn peak() -> TestPlan {
    let workload = Workload::new()
        .then(health("Peak: Health Check", false))
        .then(
            generate(
                "Peak: Generate QR Code",
                QrPayload::styled(hosts()),
                &[200],
                true,
            )
            .check("qr response is not empty", CheckPredicate::BodyNotEmpty),
        )
        .then(stats(
            "Peak: Get Stats",
            Some((
                "total_qr_generated is valid",
                CheckPredicate::JsonFieldIsNumber {
                    field: field("total_qr_generated"),
                },
            )),
        ))
        .then(
            ActionSpec::new(ActionKind::StaticAsset {
                path: "/static/index.html".to_string(),
            })
            .group("Peak: Static Files")
            .expect_statuses(&[200, 404])
            .check("static file request is 200 or 404", status_is(&[200, 404])),
        );

    TestPlan {
        name: "peak".to_string(),
        scenarios: vec![ScenarioConfig::new(
            "peak",
            Executor::RampingVus {
                start_vus: 0,
                stages: vec![
                    Stage::mins(2, 50),
                    Stage::mins(5, 100),
                    Stage::mins(10, 100),
                    Stage::mins(5, 50),
                    Stage::mins(2, 0),
                ],
            },
            workload,
        )],
        thresholds: staged_thresholds(2000, 0.1),
    }
}

/// Smoke, soak and peak suites as concurrent scenarios.
pub fn scenarios() -> TestPlan {
    let second = Duration::from_secs(1);

    let smoke_suite = Workload::new()
        .then(health("Smoke Test - Health Check", true))
        .sleep(SleepSpec::Fixed { duration: second })
        .then(stats(
            "Smoke Test - Get Stats",
            Some((
                "stats response has total_qr_generated field",
                CheckPredicate::JsonFieldPresent {
                    field: field("total_qr_generated"),
                },
            )),
        ))
        .sleep(SleepSpec::Fixed { duration: second })
        .then(generate(
            "Smoke Test - Generate QR Code",
            QrPayload::url_only(UrlSource::Fixed("https://example.com/smoke-test".to_string())),
            &[200],
            false,
        ))
        .sleep(SleepSpec::Fixed { duration: second });

    let soak_suite = Workload::new()
        .weighted(vec![
            (
                0.7,
                generate(
                    "Soak Test - Generate QR Code",
                    QrPayload::url_only(UrlSource::Randomized {
                        hosts: vec!["https://example.com/soak-test".to_string()],
                    }),
                    &[200, 201],
                    false,
                ),
            ),
            (
                0.3,
                stats(
                    "Soak Test - Check Stats",
                    Some((
                        "stats response is valid",
                        CheckPredicate::JsonFieldAtLeast {
                            field: field("total_qr_generated"),
                            min: 0.0,
                        },
                    )),
                ),
            ),
        ])
        .maybe(0.1, health("Soak Test - Health Check", false))
        .sleep(SleepSpec::Uniform {
            max: Duration::from_secs(5),
        });

    let peak_suite = Workload::new()
        .then(generate(
            "Peak Test - QR Code Generation",
            QrPayload::url_only(UrlSource::Randomized {
                hosts: vec!["https://example.com/peak-test".to_string()],
            }),
            &[200],
            false,
        ))
        .maybe(0.3, stats("Peak Test - Stats Check", None))
        .sleep(SleepSpec::Uniform {
            max: Duration::from_secs(2),
        });

    TestPlan {
        name: "scenarios".to_string(),
        scenarios: vec![
            ScenarioConfig::new(
                "smoke",
                Executor::ConstantVus {
                    vus: 1,
                    duration: Duration::from_secs(10),
                },
                smoke_suite,
            ),
            ScenarioConfig::new(
                "soak",
                Executor::RampingVus {
                    start_vus: 0,
                    stages: vec![Stage::mins(5, 10), Stage::mins(10, 10), Stage::mins(5, 0)],
                },
                soak_suite,
            ),
            ScenarioConfig::new(
                "peak",
                Executor::RampingVus {
                    start_vus: 0,
                    stages: vec![
                        Stage::mins(2, 50),
                        Stage::mins(5, 100),
                        Stage::mins(5, 100),
                        Stage::mins(2, 0),
                    ],
                },
                peak_suite,
            ),
        ],
        thresholds: vec![
            ThresholdSpec::new(HTTP_REQ_DURATION, "p(95)<500"),
            ThresholdSpec::new(HTTP_REQ_DURATION, "p(99)<1000"),
            ThresholdSpec::new(HTTP_REQ_FAILED, "rate<0.1"),
            ThresholdSpec::new(ERRORS, "rate<0.05"),
        ],
    }
}

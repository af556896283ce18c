//! Turning an [`ActionSpec`] into a request, and a response into metrics.

use std::time::Duration;

use rand::seq::SliceRandom;
use rand::Rng;
use serde_json::{json, Value};
use surge_core::metric::{CHECKS, ERRORS, HTTP_REQS, HTTP_REQ_DURATION, HTTP_REQ_FAILED};
use surge_core::{ActionKind, ActionSpec, CheckPredicate, CoreResult, QrPayload, UrlSource};
use surge_metrics::MetricsCollector;

use crate::client::{HttpClient, HttpRequest, HttpResponse};

/// Build the request an action issues. Randomized URLs draw from `rng`.
pub fn build_request<R: Rng + ?Sized>(spec: &ActionSpec, base_url: &str, rng: &mut R) -> HttpRequest {
    match &spec.kind {
        ActionKind::HealthCheck => HttpRequest::get(format!("{}/health", base_url)),
        ActionKind::StatsRequest => HttpRequest::get(format!("{}/stats/", base_url)),
        ActionKind::StaticAsset { path } => {
            let separator = if path.starts_with('/') { "" } else { "/" };
            HttpRequest::get(format!("{}{}{}", base_url, separator, path))
        }
        ActionKind::GenerateQr(payload) => {
            HttpRequest::post_json(format!("{}/qr/generate", base_url), &qr_body(payload, rng))
        }
    }
}

fn qr_body<R: Rng + ?Sized>(payload: &QrPayload, rng: &mut R) -> Value {
    let url = match &payload.url {
        UrlSource::Fixed(url) => url.clone(),
        UrlSource::Randomized { hosts } => {
            let host = hosts
                .choose(rng)
                .map(String::as_str)
                .unwrap_or("https://example.com");
            format!(
                "{}?session={}-{}",
                host,
                chrono::Utc::now().timestamp_millis(),
                rng.gen_range(0..10_000)
            )
        }
    };

    let mut body = json!({ "url": url });
    if let Some(map) = body.as_object_mut() {
        if let Some(box_size) = payload.box_size {
            map.insert("box_size".to_string(), json!(box_size));
        }
        if let Some(border) = payload.border {
            map.insert("border".to_string(), json!(border));
        }
        if let Some(fill) = &payload.fill_color {
            map.insert("fill_color".to_string(), json!(fill));
        }
        if let Some(back) = &payload.back_color {
            map.insert("back_color".to_string(), json!(back));
        }
    }
    body
}

/// Evaluate one predicate. Transport failures fail every check.
pub fn evaluate_check(predicate: &CheckPredicate, response: &HttpResponse, json: Option<&Value>) -> bool {
    if response.is_transport_error() {
        return false;
    }
    match predicate {
        CheckPredicate::StatusIn { statuses } => statuses.contains(&response.status),
        CheckPredicate::HeaderContains { header, value } => response
            .header(header)
            .is_some_and(|actual| actual.contains(value.as_str())),
        CheckPredicate::HeaderEquals { header, value } => {
            response.header(header) == Some(value.as_str())
        }
        CheckPredicate::BodyNotEmpty => !response.body.is_empty(),
        CheckPredicate::JsonFieldEquals { field, value } => {
            json_field(json, field).is_some_and(|actual| actual == value)
        }
        CheckPredicate::JsonFieldPresent { field } => json_field(json, field).is_some(),
        CheckPredicate::JsonFieldIsNumber { field } => {
            json_field(json, field).is_some_and(Value::is_number)
        }
        CheckPredicate::JsonFieldAtLeast { field, min } => json_field(json, field)
            .and_then(Value::as_f64)
            .is_some_and(|actual| actual >= *min),
    }
}

/// Look up a dotted path such as `data.total`.
fn json_field<'a>(json: Option<&'a Value>, field: &str) -> Option<&'a Value> {
    let pointer = format!("/{}", field.replace('.', "/"));
    json?.pointer(&pointer)
}

fn needs_json(predicate: &CheckPredicate) -> bool {
    matches!(
        predicate,
        CheckPredicate::JsonFieldEquals { .. }
            | CheckPredicate::JsonFieldPresent { .. }
            | CheckPredicate::JsonFieldIsNumber { .. }
            | CheckPredicate::JsonFieldAtLeast { .. }
    )
}

/// What one action produced, ready to be recorded.
#[derive(Debug, Clone)]
pub struct Observation {
    pub label: String,
    pub trend_metric: &'static str,
    pub status: u16,
    pub duration: Duration,
    /// Transport error or a status outside the expected set.
    pub failed: bool,
    pub checks: Vec<(String, bool)>,
    pub success_counter: Option<String>,
    pub error: Option<String>,
}

impl Observation {
    pub fn from_response(spec: &ActionSpec, response: &HttpResponse) -> Self {
        let json = if spec.checks.iter().any(|c| needs_json(&c.predicate)) {
            response.json()
        } else {
            None
        };

        let checks = spec
            .checks
            .iter()
            .map(|check| {
                (
                    check.name.clone(),
                    evaluate_check(&check.predicate, response, json.as_ref()),
                )
            })
            .collect();

        Self {
            label: spec.label().to_string(),
            trend_metric: spec.kind.trend_metric(),
            status: response.status,
            duration: response.timing,
            failed: response.is_transport_error() || !spec.is_expected_status(response.status),
            checks,
            success_counter: spec.success_counter.clone(),
            error: response.error.clone(),
        }
    }

    pub fn checks_passed(&self) -> bool {
        self.checks.iter().all(|(_, passed)| *passed)
    }

    /// What the `errors` rate records: a failed check, or a failed request
    /// when the action declares no checks.
    pub fn is_error(&self) -> bool {
        if self.checks.is_empty() {
            self.failed
        } else {
            !self.checks_passed()
        }
    }

    pub fn failed_checks(&self) -> impl Iterator<Item = &str> {
        self.checks
            .iter()
            .filter(|(_, passed)| !passed)
            .map(|(name, _)| name.as_str())
    }

    /// Record into the run's collector.
    pub fn record(&self, collector: &MetricsCollector) -> CoreResult<()> {
        let millis = self.duration.as_secs_f64() * 1000.0;

        collector.add(HTTP_REQS, 1.0)?;
        collector.time(HTTP_REQ_DURATION, millis)?;
        collector.observe(HTTP_REQ_FAILED, self.failed)?;
        collector.time(self.trend_metric, millis)?;
        for (_, passed) in &self.checks {
            collector.observe(CHECKS, *passed)?;
        }
        collector.observe(ERRORS, self.is_error())?;
        if let Some(counter) = &self.success_counter {
            if !self.failed {
                collector.add(counter, 1.0)?;
            }
        }
        Ok(())
    }
}

/// Issue an already-built request and score the response.
pub async fn execute(spec: &ActionSpec, client: &dyn HttpClient, request: HttpRequest) -> Observation {
    let response = client.request(request).await;
    Observation::from_response(spec, &response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn qr_spec() -> ActionSpec {
        ActionSpec::new(ActionKind::GenerateQr(QrPayload::styled(UrlSource::Randomized {
            hosts: vec!["https://example.com".to_string()],
        })))
        .check(
            "qr generation status is 200",
            CheckPredicate::StatusIn { statuses: vec![200] },
        )
        .check(
            "qr response is png",
            CheckPredicate::HeaderContains {
                header: "content-type".to_string(),
                value: "image/png".to_string(),
            },
        )
        .count_successes("qr_codes_generated")
    }

    #[test]
    fn test_build_requests() {
        let mut rng = StdRng::seed_from_u64(1);
        let base = "http://localhost:8000";

        let health = build_request(&ActionSpec::new(ActionKind::HealthCheck), base, &mut rng);
        assert_eq!(health.url, "http://localhost:8000/health");

        let stats = build_request(&ActionSpec::new(ActionKind::StatsRequest), base, &mut rng);
        assert_eq!(stats.path(), "/stats/");

        let asset = ActionSpec::new(ActionKind::StaticAsset {
            path: "static/index.html".to_string(),
        });
        assert_eq!(build_request(&asset, base, &mut rng).path(), "/static/index.html");

        let qr = build_request(&qr_spec(), base, &mut rng);
        assert_eq!(qr.path(), "/qr/generate");
        let body: Value = serde_json::from_slice(qr.body.as_ref().unwrap()).unwrap();
        let url = body["url"].as_str().unwrap();
        assert!(url.starts_with("https://example.com?session="));
        assert_eq!(body["box_size"], 10);
        assert_eq!(body["fill_color"], "black");
    }

    #[test]
    fn test_successful_qr_observation() {
        let response = HttpResponse::new(200, vec![0x89, b'P', b'N', b'G'])
            .with_header("Content-Type", "image/png")
            .with_timing(Duration::from_millis(120));
        let observation = Observation::from_response(&qr_spec(), &response);

        assert!(!observation.failed);
        assert!(observation.checks_passed());
        assert_eq!(observation.trend_metric, "qr_generate_duration");

        let collector = MetricsCollector::new();
        observation.record(&collector).unwrap();
        let snapshot = collector.snapshot();
        assert_eq!(snapshot.counter("http_reqs"), Some(1.0));
        assert_eq!(snapshot.counter("qr_codes_generated"), Some(1.0));
        assert_eq!(snapshot.rate("checks"), Some(1.0));
        assert_eq!(snapshot.rate("errors"), Some(0.0));
        assert_eq!(snapshot.trend("qr_generate_duration").unwrap().max, 120.0);
    }

    #[test]
    fn test_server_error_fails_checks_and_skips_counter() {
        let response = HttpResponse::new(500, "boom");
        let observation = Observation::from_response(&qr_spec(), &response);
        assert!(observation.failed);
        assert!(!observation.checks_passed());
        assert_eq!(observation.failed_checks().count(), 2);

        let collector = MetricsCollector::new();
        observation.record(&collector).unwrap();
        let snapshot = collector.snapshot();
        assert_eq!(snapshot.rate("http_req_failed"), Some(1.0));
        assert_eq!(snapshot.rate("errors"), Some(1.0));
        assert_eq!(snapshot.counter("qr_codes_generated"), None);
    }

    #[test]
    fn test_unchecked_action_counts_failed_request_as_error() {
        let spec = ActionSpec::new(ActionKind::StatsRequest);
        let collector = MetricsCollector::new();

        let broken = Observation::from_response(&spec, &HttpResponse::new(503, "unavailable"));
        assert!(broken.checks.is_empty());
        assert!(broken.is_error());
        broken.record(&collector).unwrap();

        let refused = Observation::from_response(
            &spec,
            &HttpResponse::failed("connection refused", Duration::from_millis(5)),
        );
        assert!(refused.is_error());
        refused.record(&collector).unwrap();

        let ok = Observation::from_response(&spec, &HttpResponse::new(200, "{}"));
        assert!(!ok.is_error());
        ok.record(&collector).unwrap();

        let snapshot = collector.snapshot();
        assert_eq!(snapshot.rate("errors"), Some(2.0 / 3.0));
        assert_eq!(snapshot.rate("checks"), None);
    }

    #[test]
    fn test_json_checks() {
        let response = HttpResponse::new(200, r#"{"status":"healthy","data":{"total":12}}"#);
        let json = response.json();

        let healthy = CheckPredicate::JsonFieldEquals {
            field: "status".to_string(),
            value: json!("healthy"),
        };
        assert!(evaluate_check(&healthy, &response, json.as_ref()));

        let nested = CheckPredicate::JsonFieldAtLeast {
            field: "data.total".to_string(),
            min: 0.0,
        };
        assert!(evaluate_check(&nested, &response, json.as_ref()));

        let missing = CheckPredicate::JsonFieldPresent {
            field: "total_qr_codes".to_string(),
        };
        assert!(!evaluate_check(&missing, &response, json.as_ref()));
    }

    #[test]
    fn test_transport_error_fails_every_check() {
        let response = HttpResponse::failed("timed out", Duration::from_secs(60));
        let spec = ActionSpec::new(ActionKind::HealthCheck).check(
            "status is 0",
            CheckPredicate::StatusIn { statuses: vec![0] },
        );
        let observation = Observation::from_response(&spec, &response);
        assert!(observation.failed);
        assert!(!observation.checks_passed());
        assert_eq!(observation.error.as_deref(), Some("timed out"));
    }
}

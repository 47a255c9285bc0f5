use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use vantagewatch::check::{AlertKind, CheckOutcome, Checker};
use vantagewatch::detect::baseline::{BaselineStore, MetricKey};
use vantagewatch::detect::classifier::Thresholds;
use vantagewatch::probes::checkhost::parse_request;
use vantagewatch::probes::poller::ResultPoller;
use vantagewatch::probes::{CheckMode, MetricKind, ProbeError, ProbeRequest, ProbingService};

fn fixture_check_response() -> Value {
    json!({
        "ok": 1,
        "request_id": "8a1b2c",
        "permanent_link": "https://check-host.net/check-report/8a1b2c",
        "nodes": {
            "de1.node.check-host.net": ["de", "Germany", "Frankfurt", "5.9.0.1", "AS24940"],
            "fr2.node.check-host.net": ["fr", "France", "Paris", "51.15.0.1", "AS12876"]
        }
    })
}

/// Replays the same node set; the HTTP time reported by Frankfurt comes
/// from a shared cell the test changes between checks.
struct Replay {
    de_time: Mutex<f64>,
}

#[async_trait::async_trait]
impl ProbingService for Replay {
    async fn issue_check(&self, _: &str, _: CheckMode, _: u32) -> Result<ProbeRequest, ProbeError> {
        parse_request(&fixture_check_response())
    }

    async fn fetch_result(&self, _: &str) -> Result<Value, ProbeError> {
        let t = *self.de_time.lock().unwrap();
        Ok(json!({
            "de1.node.check-host.net": [[1, t, "OK", "200", "93.184.216.34"]],
            "fr2.node.check-host.net": [[1, 0.080, "OK", "200", "93.184.216.34"]]
        }))
    }
}

#[tokio::test]
async fn test_spike_after_warmup_is_flagged_and_persisted() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("baselines.json");
    let service = Arc::new(Replay {
        de_time: Mutex::new(0.100),
    });
    let checker = Checker::new(
        service.clone(),
        ResultPoller::new(3, Duration::from_millis(1), Duration::from_secs(1)),
        BaselineStore::open(&path, Thresholds::default()),
        50,
    );

    for i in 0..20 {
        *service.de_time.lock().unwrap() = 0.100 + (i % 4) as f64 * 0.003;
        let report = checker.check_http("https://example.com", None).await.unwrap();
        assert_eq!(report.rows().len(), 2);
        assert_eq!(report.anomalies().count(), 0);
    }

    *service.de_time.lock().unwrap() = 0.750;
    let report = checker.check_http("https://example.com", None).await.unwrap();
    let anomalies: Vec<_> = report.anomalies().collect();
    assert_eq!(anomalies.len(), 1);
    assert_eq!(anomalies[0].kind, AlertKind::Anomaly);
    assert_eq!(anomalies[0].vantage_point, "de1.node.check-host.net");
    assert_eq!(anomalies[0].location, "Germany, Frankfurt");
    assert_eq!(anomalies[0].details.as_ref().unwrap().sample_count, 20);
    assert!(report.text().contains("time anomaly"));

    // Write-through: a fresh store sees all 21 samples.
    let reloaded = BaselineStore::open(&path, Thresholds::default());
    let key = MetricKey::new(
        CheckMode::Http,
        "https://example.com",
        "de1.node.check-host.net",
        MetricKind::Time,
    );
    assert_eq!(reloaded.get(&key).unwrap().n, 21);
    assert_eq!(reloaded.len(), 2);
}

struct Silent;

#[async_trait::async_trait]
impl ProbingService for Silent {
    async fn issue_check(&self, _: &str, _: CheckMode, _: u32) -> Result<ProbeRequest, ProbeError> {
        parse_request(&fixture_check_response())
    }

    async fn fetch_result(&self, _: &str) -> Result<Value, ProbeError> {
        Ok(json!({
            "de1.node.check-host.net": null,
            "fr2.node.check-host.net": null
        }))
    }
}

#[tokio::test]
async fn test_silent_vantage_points_yield_no_data() {
    let checker = Checker::new(
        Arc::new(Silent),
        ResultPoller::new(2, Duration::from_millis(1), Duration::from_secs(1)),
        BaselineStore::in_memory(Thresholds::default()),
        50,
    );
    let report = checker.check_ping("example.com", None).await.unwrap();
    assert_eq!(report.outcome, CheckOutcome::NoData);
    assert!(checker.store().is_empty());
}

#[test]
fn test_rejected_check_response() {
    let err = parse_request(&json!({"error": "limit_exceeded"})).unwrap_err();
    assert!(matches!(err, ProbeError::Rejected(ref r) if r == "limit_exceeded"));
}

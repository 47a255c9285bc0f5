//! Check orchestration: issue a probe, gather per-vantage-point results,
//! normalise them into rows, and feed the baselines.

pub mod report;

use crate::config::TargetConfig;
use crate::detect::baseline::{BaselineStore, MetricKey};
use crate::detect::classifier::AnomalyDetails;
use crate::detect::Severity;
use crate::probes::payload::{self, HttpResult, PingResult, ProbePayload, TcpResult};
use crate::probes::poller::ResultPoller;
use crate::probes::{clean_host, CheckMode, MetricKind, NodeInfo, ProbeError, ProbingService};
use anyhow::{Context, Result};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// Mode-specific measurements of one row.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RowMetrics {
    Http {
        status: String,
        code: String,
        time: Option<f64>,
    },
    Ping {
        attempts: u32,
        successes: u32,
        loss: Option<f64>,
        rtt_min: Option<f64>,
        rtt_avg: Option<f64>,
        rtt_max: Option<f64>,
    },
    Tcp {
        result: String,
        time: Option<f64>,
    },
}

/// One vantage point's result in a uniform shape.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedRow {
    pub location: String,
    pub ok: bool,
    /// Resolved address of the target as seen by the vantage point.
    pub ip: String,
    pub vantage_point: String,
    pub metrics: RowMetrics,
}

impl NormalizedRow {
    fn from_payload(vantage_point: &str, node: &NodeInfo, payload: ProbePayload) -> Self {
        let (ok, ip, metrics) = match payload {
            ProbePayload::Http(HttpResult {
                success,
                time,
                status,
                code,
                ip,
            }) => (success, ip, RowMetrics::Http { status, code, time }),
            ProbePayload::Ping(ping) => (ping.all_ok(), ping.ip.clone(), ping_metrics(&ping)),
            ProbePayload::Tcp(TcpResult::Connected { time, address }) => (
                true,
                address,
                RowMetrics::Tcp {
                    result: "Connected".to_string(),
                    time: Some(time),
                },
            ),
            ProbePayload::Tcp(TcpResult::Failed { error }) => (
                false,
                "-".to_string(),
                RowMetrics::Tcp {
                    result: error,
                    time: None,
                },
            ),
        };

        Self {
            location: node.location(),
            ok,
            ip,
            vantage_point: vantage_point.to_string(),
            metrics,
        }
    }

    /// HTTP response or TCP connect time.
    pub fn time(&self) -> Option<f64> {
        match &self.metrics {
            RowMetrics::Http { time, .. } | RowMetrics::Tcp { time, .. } => *time,
            RowMetrics::Ping { .. } => None,
        }
    }

    pub fn rtt_avg(&self) -> Option<f64> {
        match &self.metrics {
            RowMetrics::Ping { rtt_avg, .. } => *rtt_avg,
            _ => None,
        }
    }

    pub fn loss(&self) -> Option<f64> {
        match &self.metrics {
            RowMetrics::Ping { loss, .. } => *loss,
            _ => None,
        }
    }
}

fn ping_metrics(ping: &PingResult) -> RowMetrics {
    RowMetrics::Ping {
        attempts: ping.attempts,
        successes: ping.successes,
        loss: ping.loss_rate(),
        rtt_min: ping.rtt_min(),
        rtt_avg: ping.rtt_avg(),
        rtt_max: ping.rtt_max(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// Sample classified anomalous against its baseline.
    Anomaly,
    /// Non-zero ping loss that did not qualify as an anomaly.
    LossDetected,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub kind: AlertKind,
    pub mode: CheckMode,
    pub target: String,
    pub vantage_point: String,
    pub location: String,
    pub metric: MetricKind,
    pub value: f64,
    /// Pre-update baseline; present for anomalies.
    pub details: Option<AnomalyDetails>,
}

impl Alert {
    pub fn severity(&self) -> Severity {
        self.details
            .as_ref()
            .map_or(Severity::Info, |d| d.severity)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum CheckOutcome {
    /// At least one vantage point produced a usable result.
    Rows(Vec<NormalizedRow>),
    /// The check ran but no vantage point returned anything.
    NoData,
    /// The probing service refused the request.
    Rejected(String),
}

impl CheckOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            CheckOutcome::Rows(_) => "rows",
            CheckOutcome::NoData => "no_data",
            CheckOutcome::Rejected(_) => "rejected",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckReport {
    pub mode: CheckMode,
    /// Normalised target label used for baselines (`host:port` for TCP).
    pub target: String,
    pub outcome: CheckOutcome,
    pub alerts: Vec<Alert>,
}

impl CheckReport {
    pub fn rows(&self) -> &[NormalizedRow] {
        match &self.outcome {
            CheckOutcome::Rows(rows) => rows,
            _ => &[],
        }
    }

    pub fn anomalies(&self) -> impl Iterator<Item = &Alert> {
        self.alerts.iter().filter(|a| a.kind == AlertKind::Anomaly)
    }

    /// Human-readable summary.
    pub fn text(&self) -> String {
        report::render_check(self)
    }
}

/// Runs HTTP, ping and TCP checks against the probing service and keeps the
/// baselines current. Cheap to clone.
#[derive(Clone)]
pub struct Checker {
    service: Arc<dyn ProbingService>,
    poller: ResultPoller,
    store: BaselineStore,
    default_max_nodes: u32,
}

impl Checker {
    pub fn new(
        service: Arc<dyn ProbingService>,
        poller: ResultPoller,
        store: BaselineStore,
        default_max_nodes: u32,
    ) -> Self {
        Self {
            service,
            poller,
            store,
            default_max_nodes,
        }
    }

    pub fn store(&self) -> &BaselineStore {
        &self.store
    }

    pub async fn check_http(&self, target: &str, max_nodes: Option<u32>) -> Result<CheckReport> {
        let target = target.trim();
        self.execute(CheckMode::Http, target.to_string(), max_nodes).await
    }

    pub async fn check_ping(&self, target: &str, max_nodes: Option<u32>) -> Result<CheckReport> {
        self.execute(CheckMode::Ping, clean_host(target), max_nodes).await
    }

    pub async fn check_tcp(&self, host: &str, port: u16, max_nodes: Option<u32>) -> Result<CheckReport> {
        let target = format!("{}:{}", clean_host(host), port);
        self.execute(CheckMode::Tcp, target, max_nodes).await
    }

    /// Run the check a configured monitoring target asks for.
    pub async fn run(&self, target: &TargetConfig) -> Result<CheckReport> {
        match target.mode {
            CheckMode::Http => self.check_http(&target.host, None).await,
            CheckMode::Ping => self.check_ping(&target.host, None).await,
            CheckMode::Tcp => self.check_tcp(&target.host, target.port(), None).await,
        }
    }

    async fn execute(&self, mode: CheckMode, target: String, max_nodes: Option<u32>) -> Result<CheckReport> {
        let max_nodes = max_nodes.unwrap_or(self.default_max_nodes);
        let timeout = self.poller.call_timeout;

        let issued = tokio::time::timeout(timeout, self.service.issue_check(&target, mode, max_nodes))
            .await
            .unwrap_or(Err(ProbeError::Timeout(timeout)));

        let request = match issued {
            Ok(request) => request,
            Err(ProbeError::Rejected(reason)) => {
                warn!(%mode, %target, %reason, "Check request rejected");
                return Ok(CheckReport {
                    mode,
                    target,
                    outcome: CheckOutcome::Rejected(reason),
                    alerts: Vec::new(),
                });
            }
            Err(e) => {
                return Err(e).with_context(|| format!("failed to issue {} check for {}", mode, target));
            }
        };

        let snapshot = if request.nodes.is_empty() {
            Default::default()
        } else {
            self.poller
                .poll_until_complete(self.service.as_ref(), &request.request_id, request.nodes.len())
                .await
        };

        let rows: Vec<NormalizedRow> = request
            .nodes
            .iter()
            .filter_map(|(node_id, info)| {
                let raw = snapshot.get(node_id)?;
                let payload = payload::decode(mode, raw)?;
                Some(NormalizedRow::from_payload(node_id, info, payload))
            })
            .collect();

        if rows.is_empty() {
            warn!(%mode, %target, expected = request.nodes.len(), "No vantage point returned a result");
            return Ok(CheckReport {
                mode,
                target,
                outcome: CheckOutcome::NoData,
                alerts: Vec::new(),
            });
        }

        // Baseline updates persist to disk; keep them off the async workers.
        let store = self.store.clone();
        let (target, rows, alerts) = tokio::task::spawn_blocking(move || {
            let alerts = observe_rows(&store, mode, &target, &rows);
            (target, rows, alerts)
        })
        .await
        .context("baseline update task failed")?;

        info!(
            %mode,
            %target,
            rows = rows.len(),
            failing = rows.iter().filter(|r| !r.ok).count(),
            anomalies = alerts.iter().filter(|a| a.kind == AlertKind::Anomaly).count(),
            "Check complete"
        );

        Ok(CheckReport {
            mode,
            target,
            outcome: CheckOutcome::Rows(rows),
            alerts,
        })
    }
}

/// Feed each row's relevant metrics into the baselines and collect alerts.
///
/// Latency only feeds from successful rows; ping loss feeds from every row,
/// since a fully failing vantage point is the loss signal.
pub fn observe_rows(
    store: &BaselineStore,
    mode: CheckMode,
    target: &str,
    rows: &[NormalizedRow],
) -> Vec<Alert> {
    let mut alerts = Vec::new();

    for row in rows {
        let mut samples = Vec::with_capacity(2);
        match mode {
            CheckMode::Http | CheckMode::Tcp => {
                if let Some(t) = row.time().filter(|_| row.ok) {
                    samples.push((MetricKind::Time, t));
                }
            }
            CheckMode::Ping => {
                if let Some(rtt) = row.rtt_avg().filter(|_| row.ok) {
                    samples.push((MetricKind::Rtt, rtt));
                }
                if let Some(loss) = row.loss() {
                    samples.push((MetricKind::Loss, loss));
                }
            }
        }

        for (metric, value) in samples {
            let key = MetricKey::new(mode, target, row.vantage_point.as_str(), metric);
            let verdict = store.update_and_detect(&key, value);

            let kind = if verdict.anomalous {
                warn!(
                    %mode,
                    %target,
                    vantage_point = %row.vantage_point,
                    %metric,
                    value,
                    "Anomaly detected"
                );
                AlertKind::Anomaly
            } else if metric == MetricKind::Loss && value > 0.0 {
                AlertKind::LossDetected
            } else {
                continue;
            };

            alerts.push(Alert {
                kind,
                mode,
                target: target.to_string(),
                vantage_point: row.vantage_point.clone(),
                location: row.location.clone(),
                metric,
                value,
                details: verdict.details,
            });
        }
    }

    alerts
}

//! Periodic monitoring loop over the configured targets.

use crate::check::report::render_alert;
use crate::check::{CheckReport, Checker};
use crate::config::TargetConfig;
use crate::detect::incident::IncidentManager;
use crate::detect::Severity;
use crate::probes::MetricKind;
use crate::storage::{save_check_run, CheckRun, Pool};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Outcome of one target's check within a cycle.
#[derive(Debug)]
pub enum MonitorEvent {
    Report(CheckReport),
    Failure { target: TargetConfig, error: String },
}

/// Receives monitoring events.
pub trait AlertSink: Send + Sync {
    fn publish(&self, event: &MonitorEvent);
}

/// Writes events to the tracing log.
pub struct LogSink;

impl AlertSink for LogSink {
    fn publish(&self, event: &MonitorEvent) {
        match event {
            MonitorEvent::Report(report) => {
                info!(
                    mode = %report.mode,
                    target = %report.target,
                    outcome = report.outcome.label(),
                    rows = report.rows().len(),
                    alerts = report.alerts.len(),
                    "Monitor check finished"
                );
                for alert in &report.alerts {
                    warn!("{}", render_alert(alert));
                }
            }
            MonitorEvent::Failure { target, error } => {
                error!(target = %target, "Monitoring error: {}", error);
            }
        }
    }
}

/// Records check history and incidents in the SQLite ledger.
pub struct LedgerSink {
    pool: Pool,
    incidents: IncidentManager,
}

impl LedgerSink {
    pub fn new(pool: Pool) -> Self {
        Self {
            incidents: IncidentManager::new(pool.clone()),
            pool,
        }
    }

    fn record(&self, event: &MonitorEvent) -> anyhow::Result<()> {
        match event {
            MonitorEvent::Report(report) => {
                let rows = report.rows();
                let anomalies: Vec<_> = report.anomalies().collect();
                save_check_run(
                    &self.pool,
                    &CheckRun {
                        mode: report.mode.to_string(),
                        target: report.target.clone(),
                        outcome: report.outcome.label().to_string(),
                        rows: rows.len(),
                        failing_rows: rows.iter().filter(|r| !r.ok).count(),
                        anomalies: anomalies.len(),
                    },
                )?;
                for alert in anomalies {
                    let verdict = match alert.metric {
                        MetricKind::Loss => "Loss Anomaly",
                        MetricKind::Time | MetricKind::Rtt => "Latency Anomaly",
                    };
                    self.incidents
                        .record_incident(verdict, alert.severity(), serde_json::to_value(alert)?)?;
                }
            }
            MonitorEvent::Failure { target, error } => {
                save_check_run(
                    &self.pool,
                    &CheckRun {
                        mode: target.mode.to_string(),
                        target: target.label(),
                        outcome: "failed".to_string(),
                        rows: 0,
                        failing_rows: 0,
                        anomalies: 0,
                    },
                )?;
                self.incidents.record_incident(
                    "Monitoring Error",
                    Severity::Warning,
                    serde_json::json!({ "target": target, "error": error }),
                )?;
            }
        }
        Ok(())
    }
}

impl AlertSink for LedgerSink {
    fn publish(&self, event: &MonitorEvent) {
        if let Err(e) = self.record(event) {
            error!("Failed to record monitoring event: {}", e);
        }
    }
}

/// Fans one event out to several sinks.
pub struct MultiSink(pub Vec<Arc<dyn AlertSink>>);

impl AlertSink for MultiSink {
    fn publish(&self, event: &MonitorEvent) {
        for sink in &self.0 {
            sink.publish(event);
        }
    }
}

/// Check every target once, in order. A failing target never stops the
/// remaining ones. Returns the number of failures.
///
/// Sinks may block (the ledger writes SQLite), so each event is published on
/// the blocking pool.
pub async fn run_cycle(
    checker: &Checker,
    targets: &[TargetConfig],
    sink: &Arc<dyn AlertSink>,
    shutdown: &CancellationToken,
) -> usize {
    let mut failures = 0;
    for target in targets {
        if shutdown.is_cancelled() {
            break;
        }
        let event = match checker.run(target).await {
            Ok(report) => MonitorEvent::Report(report),
            Err(e) => {
                failures += 1;
                MonitorEvent::Failure {
                    target: target.clone(),
                    error: format!("{:#}", e),
                }
            }
        };
        let sink = sink.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || sink.publish(&event)).await {
            error!(target = %target, "Alert sink task failed: {}", e);
        }
    }
    failures
}

/// Run cycles every `interval` until `shutdown` fires. Cycles never overlap.
pub async fn run(
    checker: Checker,
    targets: Vec<TargetConfig>,
    interval: Duration,
    sink: Arc<dyn AlertSink>,
    shutdown: CancellationToken,
) {
    if targets.is_empty() {
        warn!("No monitoring targets configured, monitor idle");
        shutdown.cancelled().await;
        return;
    }
    info!(targets = targets.len(), interval = ?interval, "Monitor started");

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let failures = run_cycle(&checker, &targets, &sink, &shutdown).await;
                info!(targets = targets.len(), failures, "Monitor cycle complete");
            }
        }
    }

    info!("Monitor stopped");
}

//! Plain-text rendering of check reports, alerts and baseline tables.

use super::{Alert, AlertKind, CheckOutcome, CheckReport, NormalizedRow, RowMetrics};
use crate::detect::baseline::BaselineRow;
use crate::probes::{CheckMode, MetricKind};
use std::fmt::Write;

fn secs(v: Option<f64>) -> String {
    v.map_or_else(|| "-".to_string(), |t| format!("{:.3} s", t))
}

fn mark(ok: bool) -> &'static str {
    if ok {
        "OK"
    } else {
        "FAIL"
    }
}

fn title(mode: CheckMode) -> &'static str {
    match mode {
        CheckMode::Http => "HTTP",
        CheckMode::Ping => "Ping",
        CheckMode::Tcp => "TCP",
    }
}

fn render_row(out: &mut String, row: &NormalizedRow) {
    let _ = writeln!(out, "{}  [{}]", row.location, mark(row.ok));
    let detail = match &row.metrics {
        RowMetrics::Http { status, code, time } => format!(
            "result: {} | time: {} | code: {} | ip: {}",
            status,
            secs(*time),
            code,
            row.ip
        ),
        RowMetrics::Ping {
            attempts,
            successes,
            loss,
            rtt_min,
            rtt_avg,
            rtt_max,
        } => format!(
            "ok: {}/{} | loss: {} | rtt min/avg/max: {} / {} / {} | ip: {}",
            successes,
            attempts,
            loss.map_or_else(|| "-".to_string(), |l| format!("{:.0}%", l * 100.0)),
            secs(*rtt_min),
            secs(*rtt_avg),
            secs(*rtt_max),
            row.ip
        ),
        RowMetrics::Tcp { result, time } => {
            format!("result: {} | time: {} | address: {}", result, secs(*time), row.ip)
        }
    };
    let _ = writeln!(out, "    {}", detail);
    if !row.ok {
        let _ = writeln!(out, "    node: {}", row.vantage_point);
    }
}

/// Value formatted for its metric: loss as a percentage, latency in seconds.
pub fn metric_value(metric: MetricKind, value: f64) -> String {
    match metric {
        MetricKind::Loss => format!("{:.1}%", value * 100.0),
        MetricKind::Time | MetricKind::Rtt => format!("{:.3} s", value),
    }
}

pub fn render_alert(alert: &Alert) -> String {
    let head = match alert.kind {
        AlertKind::Anomaly => format!("[{}] {} anomaly", alert.severity(), alert.metric),
        AlertKind::LossDetected => "[info] packet loss".to_string(),
    };
    let mut line = format!(
        "{} on {} {} from {} ({}): {}",
        head,
        alert.mode,
        alert.target,
        alert.location,
        alert.vantage_point,
        metric_value(alert.metric, alert.value)
    );
    if let Some(d) = &alert.details {
        let _ = write!(
            line,
            " | baseline {} +/- {} over {} samples, x{:.1}",
            metric_value(alert.metric, d.mean),
            metric_value(alert.metric, d.std_dev),
            d.sample_count,
            d.factor
        );
        if let Some(z) = d.z_score {
            let _ = write!(line, ", z={:.1}", z);
        }
    }
    line
}

pub fn render_check(report: &CheckReport) -> String {
    let mut out = String::new();
    match &report.outcome {
        CheckOutcome::Rejected(reason) => {
            let _ = writeln!(
                out,
                "Error in {} request (API limit or error): {}",
                title(report.mode),
                reason
            );
            return out;
        }
        CheckOutcome::NoData => {
            let _ = writeln!(out, "{} Check: {}\n", title(report.mode), report.target);
            let _ = writeln!(out, "No node returned a result.");
            return out;
        }
        CheckOutcome::Rows(rows) => {
            let failing = rows.iter().filter(|r| !r.ok).count();
            let _ = writeln!(
                out,
                "{} Check: {} ({} nodes, {} failing)\n",
                title(report.mode),
                report.target,
                rows.len(),
                failing
            );
            for row in rows {
                render_row(&mut out, row);
            }
        }
    }

    if !report.alerts.is_empty() {
        let _ = writeln!(out, "\nAlerts:");
        for alert in &report.alerts {
            let _ = writeln!(out, "  {}", render_alert(alert));
        }
    }
    out
}

/// Baseline table; `truncated` notes that more rows exist than are shown.
pub fn render_baselines(rows: &[BaselineRow], truncated: bool) -> String {
    if rows.is_empty() {
        return "No baselines recorded yet.\n".to_string();
    }

    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<6} {:<32} {:<20} {:<6} {:>7} {:>12} {:>12}",
        "MODE", "TARGET", "NODE", "METRIC", "N", "MEAN", "STDDEV"
    );
    let _ = writeln!(out, "{}", "-".repeat(101));
    for r in rows {
        let (mean, std_dev) = match r.metric.parse::<MetricKind>() {
            Ok(metric) => (metric_value(metric, r.mean), metric_value(metric, r.std_dev)),
            Err(_) => (format!("{:.4}", r.mean), format!("{:.4}", r.std_dev)),
        };
        let _ = writeln!(
            out,
            "{:<6} {:<32} {:<20} {:<6} {:>7} {:>12} {:>12}",
            r.mode, r.target, r.vantage_point, r.metric, r.sample_count, mean, std_dev
        );
    }
    if truncated {
        let _ = writeln!(out, "... (truncated, narrow with a mode or target)");
    }
    out
}

//! Point-anomaly classification of a fresh sample against its baseline.
//!
//! Latency metrics (`time`, `rtt`) require both a large relative increase and
//! a large z-score. Loss only alerts when a previously clean link becomes
//! meaningfully lossy.

use crate::detect::moments::MomentAccumulator;
use crate::detect::Severity;
use crate::probes::MetricKind;
use serde::{Deserialize, Serialize};

/// Detection thresholds, supplied from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// Samples required before any anomaly may be reported.
    pub min_samples: u64,
    /// Minimum z-score for latency anomalies.
    pub sigma_threshold: f64,
    /// Minimum `value / mean` ratio for latency anomalies.
    pub factor_threshold: f64,
    /// Baseline loss mean must be at or below this to alert.
    pub loss_baseline_max: f64,
    /// Current loss must be at or above this to alert.
    pub loss_absolute_threshold: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            min_samples: 20,
            sigma_threshold: 3.0,
            factor_threshold: 2.0,
            loss_baseline_max: 0.05,
            loss_absolute_threshold: 0.10,
        }
    }
}

/// Pre-update baseline plus the derived ratios that triggered an anomaly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyDetails {
    pub sample_count: u64,
    pub mean: f64,
    pub std_dev: f64,
    pub factor: f64,
    /// `None` when the baseline has zero variance.
    pub z_score: Option<f64>,
    pub severity: Severity,
}

/// Outcome of classifying one sample.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Verdict {
    pub anomalous: bool,
    pub details: Option<AnomalyDetails>,
}

impl Verdict {
    fn normal() -> Self {
        Self::default()
    }

    fn anomaly(details: AnomalyDetails) -> Self {
        Self {
            anomalous: true,
            details: Some(details),
        }
    }
}

/// Classify `value` against the pre-update `baseline`.
pub fn classify(
    baseline: &MomentAccumulator,
    value: f64,
    metric: MetricKind,
    thresholds: &Thresholds,
) -> Verdict {
    if baseline.n < thresholds.min_samples {
        return Verdict::normal();
    }

    match metric {
        MetricKind::Loss => classify_loss(baseline, value, thresholds),
        MetricKind::Time | MetricKind::Rtt => classify_latency(baseline, value, thresholds),
    }
}

fn z_score(mean: f64, std_dev: f64, value: f64) -> Option<f64> {
    if std_dev > 0.0 {
        Some((value - mean) / std_dev)
    } else {
        None
    }
}

fn classify_loss(baseline: &MomentAccumulator, value: f64, t: &Thresholds) -> Verdict {
    let mean = baseline.mean;
    if mean > t.loss_baseline_max || value < t.loss_absolute_threshold {
        return Verdict::normal();
    }

    let std_dev = baseline.std_dev();
    Verdict::anomaly(AnomalyDetails {
        sample_count: baseline.n,
        mean,
        std_dev,
        factor: value / mean.max(1e-6),
        z_score: z_score(mean, std_dev, value),
        severity: loss_severity(value),
    })
}

fn classify_latency(baseline: &MomentAccumulator, value: f64, t: &Thresholds) -> Verdict {
    let mean = baseline.mean;
    // Without a positive mean the amplification factor is meaningless.
    if mean <= 0.0 {
        return Verdict::normal();
    }

    let std_dev = baseline.std_dev();
    let factor = value / mean;
    let z = z_score(mean, std_dev, value);

    let anomalous = factor >= t.factor_threshold && z.map_or(true, |z| z >= t.sigma_threshold);
    if !anomalous {
        return Verdict::normal();
    }

    Verdict::anomaly(AnomalyDetails {
        sample_count: baseline.n,
        mean,
        std_dev,
        factor,
        z_score: z,
        severity: latency_severity(factor, z, t),
    })
}

fn latency_severity(factor: f64, z: Option<f64>, t: &Thresholds) -> Severity {
    let z = z.unwrap_or(f64::INFINITY);
    if factor >= t.factor_threshold * 2.0 && z >= t.sigma_threshold * 2.0 {
        Severity::Critical
    } else if factor >= t.factor_threshold * 1.5 {
        Severity::Warning
    } else {
        Severity::Info
    }
}

fn loss_severity(value: f64) -> Severity {
    if value >= 0.5 {
        Severity::Critical
    } else if value >= 0.25 {
        Severity::Warning
    } else {
        Severity::Info
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn baseline(n: u64, mean: f64, std_dev: f64) -> MomentAccumulator {
        MomentAccumulator {
            n,
            mean,
            m2: std_dev * std_dev * (n - 1) as f64,
        }
    }

    fn check(acc: &MomentAccumulator, value: f64, metric: MetricKind) -> Verdict {
        classify(acc, value, metric, &Thresholds::default())
    }

    #[test]
    fn test_gated_below_min_samples() {
        let acc = baseline(19, 1.0, 0.1);
        for value in [0.0, 5.0, 1_000.0] {
            assert!(!check(&acc, value, MetricKind::Time).anomalous);
            assert!(!check(&acc, value, MetricKind::Loss).anomalous);
        }
    }

    #[test]
    fn test_loss_policy() {
        let clean = baseline(50, 0.02, 0.01);
        let verdict = check(&clean, 0.15, MetricKind::Loss);
        assert!(verdict.anomalous);
        let details = verdict.details.unwrap();
        assert_eq!(details.sample_count, 50);
        assert!((details.mean - 0.02).abs() < 1e-12);
        assert!(details.z_score.is_some());

        // Below the absolute threshold.
        assert!(!check(&clean, 0.08, MetricKind::Loss).anomalous);

        // Baseline already lossy.
        let lossy = baseline(50, 0.12, 0.05);
        assert!(!check(&lossy, 0.20, MetricKind::Loss).anomalous);
    }

    #[test]
    fn test_loss_with_zero_variance_reports_no_z() {
        let acc = baseline(30, 0.0, 0.0);
        let verdict = check(&acc, 0.5, MetricKind::Loss);
        assert!(verdict.anomalous);
        let details = verdict.details.unwrap();
        assert_eq!(details.z_score, None);
        assert_eq!(details.severity, Severity::Critical);
    }

    #[test]
    fn test_latency_policy() {
        let acc = baseline(50, 1.0, 0.1);

        let verdict = check(&acc, 2.5, MetricKind::Time);
        assert!(verdict.anomalous);
        let details = verdict.details.unwrap();
        assert!((details.factor - 2.5).abs() < 1e-9);
        assert!((details.z_score.unwrap() - 15.0).abs() < 1e-6);

        // Factor below threshold.
        assert!(!check(&acc, 1.5, MetricKind::Rtt).anomalous);

        // Factor over threshold but the baseline is noisy.
        let noisy = baseline(50, 1.0, 2.0);
        assert!(!check(&noisy, 2.1, MetricKind::Time).anomalous);
    }

    #[test]
    fn test_latency_zero_variance_uses_factor_only() {
        let flat = baseline(25, 0.2, 0.0);
        assert!(check(&flat, 0.4, MetricKind::Rtt).anomalous);
        assert!(!check(&flat, 0.39, MetricKind::Rtt).anomalous);
    }

    #[test]
    fn test_latency_requires_positive_mean() {
        let zero = baseline(40, 0.0, 0.0);
        assert!(!check(&zero, 3.0, MetricKind::Time).anomalous);
    }

    #[test]
    fn test_thresholds_are_configurable() {
        let acc = baseline(5, 1.0, 0.1);
        let relaxed = Thresholds {
            min_samples: 5,
            factor_threshold: 1.2,
            ..Thresholds::default()
        };
        assert!(classify(&acc, 1.5, MetricKind::Time, &relaxed).anomalous);
    }
}

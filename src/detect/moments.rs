use serde::{Deserialize, Serialize};

/// Streaming mean/variance estimator for a single metric stream.
///
/// Uses Welford's incremental form so no raw history is ever kept. The field
/// names match the on-disk baseline document (`n`, `mean`, `M2`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MomentAccumulator {
    #[serde(default)]
    pub n: u64,
    #[serde(default)]
    pub mean: f64,
    #[serde(rename = "M2", default)]
    pub m2: f64,
}

impl MomentAccumulator {
    /// A fresh accumulator whose mean is seeded with the first observation.
    ///
    /// Seeding avoids a cold-start pull toward zero; the sample itself is not
    /// counted until `update` is applied.
    pub fn seeded(first: f64) -> Self {
        Self {
            n: 0,
            mean: first,
            m2: 0.0,
        }
    }

    /// Absorb one sample, returning the new state.
    ///
    /// Callers must not feed NaN or infinities.
    #[must_use]
    pub fn update(self, value: f64) -> Self {
        let n = self.n + 1;
        let delta = value - self.mean;
        let mean = self.mean + delta / n as f64;
        let delta2 = value - mean;
        Self {
            n,
            mean,
            m2: self.m2 + delta * delta2,
        }
    }

    pub fn sample_count(&self) -> u64 {
        self.n
    }

    /// Sample variance, `M2 / (n - 1)`; zero until two samples are seen.
    pub fn variance(&self) -> f64 {
        if self.n > 1 {
            (self.m2 / (self.n - 1) as f64).max(0.0)
        } else {
            0.0
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(values: &[f64]) -> MomentAccumulator {
        let mut acc = MomentAccumulator::seeded(values[0]);
        for &v in values {
            acc = acc.update(v);
        }
        acc
    }

    fn two_pass_variance(values: &[f64]) -> f64 {
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0)
    }

    #[test]
    fn test_first_sample_seeds_mean() {
        let acc = MomentAccumulator::seeded(0.42).update(0.42);
        assert_eq!(acc.n, 1);
        assert_eq!(acc.mean, 0.42);
        assert_eq!(acc.m2, 0.0);
        assert_eq!(acc.variance(), 0.0);
    }

    #[test]
    fn test_mean_and_variance_match_two_pass() {
        let values: Vec<f64> = (0..10_000)
            .map(|i| 0.2 + ((i * 7919) % 1000) as f64 / 10_000.0)
            .collect();
        let acc = feed(&values);

        let mean = values.iter().sum::<f64>() / values.len() as f64;
        assert_eq!(acc.n, 10_000);
        assert!((acc.mean - mean).abs() < 1e-9);

        let expected = two_pass_variance(&values);
        assert!(((acc.variance() - expected) / expected).abs() < 1e-9);
    }

    #[test]
    fn test_small_sequence() {
        let acc = feed(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        assert!((acc.mean - 3.0).abs() < 1e-12);
        // Sample variance of 1..5 is 2.5
        assert!((acc.variance() - 2.5).abs() < 1e-12);
        assert!((acc.std_dev() - 2.5f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_default_start_reaches_same_state() {
        let from_default = MomentAccumulator::default().update(3.0).update(5.0);
        let from_seed = MomentAccumulator::seeded(3.0).update(3.0).update(5.0);
        assert_eq!(from_default, from_seed);
    }

    #[test]
    fn test_document_field_names() {
        let acc = MomentAccumulator { n: 3, mean: 1.5, m2: 0.25 };
        let json = serde_json::to_value(acc).unwrap();
        assert_eq!(json["n"], 3);
        assert_eq!(json["M2"], 0.25);

        // Unknown fields are ignored, missing fields default.
        let parsed: MomentAccumulator =
            serde_json::from_str(r#"{"n": 2, "mean": 4.0, "extra": true}"#).unwrap();
        assert_eq!(parsed.n, 2);
        assert_eq!(parsed.m2, 0.0);
    }
}

//! Baseline modelling, anomaly classification, and incident recording.

pub mod baseline;
pub mod classifier;
pub mod incident;
pub mod moments;

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DetectError {
    #[error("failed to read baseline snapshot {path}: {source}")]
    SnapshotRead {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to write baseline snapshot {path}: {source}")]
    SnapshotWrite {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("malformed baseline snapshot: {0}")]
    SnapshotFormat(#[from] serde_json::Error),
    #[error("baseline snapshot must be a JSON object, found {0}")]
    SnapshotShape(&'static str),
}

/// Severity levels for detected incidents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// A recorded incident with verdict and evidence.
#[derive(Debug, serde::Serialize)]
pub struct Incident {
    pub id: uuid::Uuid,
    pub severity: Severity,
    pub verdict: String,
    pub evidence: serde_json::Value,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

//! Probing-service seam: check modes, requests, and raw result snapshots.

pub mod checkhost;
pub mod payload;
pub mod poller;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("probing service transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("probing service returned HTTP {0}")]
    Status(u16),
    #[error("check request rejected (rate limit or service error): {0}")]
    Rejected(String),
    #[error("malformed probing service response: {0}")]
    Decode(String),
    #[error("probing service call timed out after {0:?}")]
    Timeout(std::time::Duration),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckMode {
    Http,
    Ping,
    Tcp,
}

impl CheckMode {
    pub const ALL: [CheckMode; 3] = [CheckMode::Http, CheckMode::Ping, CheckMode::Tcp];

    pub fn as_str(&self) -> &'static str {
        match self {
            CheckMode::Http => "http",
            CheckMode::Ping => "ping",
            CheckMode::Tcp => "tcp",
        }
    }
}

impl std::fmt::Display for CheckMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CheckMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "http" => Ok(CheckMode::Http),
            "ping" => Ok(CheckMode::Ping),
            "tcp" => Ok(CheckMode::Tcp),
            other => anyhow::bail!("unknown check mode '{}' (expected http, ping or tcp)", other),
        }
    }
}

/// The metric streams a baseline is kept for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// HTTP response or TCP connect time, seconds.
    Time,
    /// Average ping round-trip time, seconds.
    Rtt,
    /// Ping loss rate in `[0, 1]`.
    Loss,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Time => "time",
            MetricKind::Rtt => "rtt",
            MetricKind::Loss => "loss",
        }
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "time" => Ok(MetricKind::Time),
            "rtt" => Ok(MetricKind::Rtt),
            "loss" => Ok(MetricKind::Loss),
            other => anyhow::bail!("unknown metric '{}'", other),
        }
    }
}

/// Location metadata for a vantage point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub country_code: String,
    pub country: String,
    pub city: String,
}

impl NodeInfo {
    /// Decode the service's positional `[code, country, city, ...]` form.
    pub fn from_value(value: &Value) -> Self {
        let field = |idx: usize| {
            value
                .get(idx)
                .and_then(Value::as_str)
                .unwrap_or("-")
                .to_string()
        };
        Self {
            country_code: field(0),
            country: field(1),
            city: field(2),
        }
    }

    pub fn location(&self) -> String {
        format!("{}, {}", self.country, self.city)
    }
}

/// An accepted check request.
#[derive(Debug, Clone)]
pub struct ProbeRequest {
    pub request_id: String,
    pub nodes: BTreeMap<String, NodeInfo>,
}

/// Result mapping for one request at one point in time. `None` means the
/// vantage point has not reported yet.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSnapshot {
    entries: BTreeMap<String, Option<Value>>,
}

impl ResultSnapshot {
    /// Interpret a raw response; returns `None` unless it is a JSON object.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self {
                entries: map
                    .into_iter()
                    .map(|(node, v)| {
                        let v = if v.is_null() { None } else { Some(v) };
                        (node, v)
                    })
                    .collect(),
            }),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of vantage points with a non-null entry.
    pub fn answered(&self) -> usize {
        self.entries.values().filter(|v| v.is_some()).count()
    }

    pub fn all_answered(&self) -> bool {
        self.entries.values().all(Option::is_some)
    }

    /// Raw payload for a vantage point, if it has reported.
    pub fn get(&self, node: &str) -> Option<&Value> {
        self.entries.get(node).and_then(Option::as_ref)
    }
}

/// The external distributed probing service.
#[async_trait::async_trait]
pub trait ProbingService: Send + Sync {
    /// Start a check. A response without a request id is a `Rejected` error.
    async fn issue_check(
        &self,
        target: &str,
        mode: CheckMode,
        max_nodes: u32,
    ) -> Result<ProbeRequest, ProbeError>;

    /// Fetch the latest (possibly partial) result mapping for a request.
    async fn fetch_result(&self, request_id: &str) -> Result<Value, ProbeError>;
}

/// Strip scheme and path, keeping only the host part.
pub fn clean_host(url_or_host: &str) -> String {
    let h = url_or_host.trim();
    let h = h
        .strip_prefix("http://")
        .or_else(|| h.strip_prefix("https://"))
        .unwrap_or(h);
    h.split('/').next().unwrap_or(h).to_string()
}

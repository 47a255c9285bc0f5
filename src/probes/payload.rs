//! Decoding of per-vantage-point raw payloads into typed results.
//!
//! Each mode's payload is a one-element array wrapping the mode-specific
//! record. Missing positional fields fall back to `-` (text) or `None`
//! (numbers); an empty or null wrapper decodes to nothing at all.

use crate::probes::CheckMode;
use serde::Serialize;
use serde_json::Value;

/// `[[success, time, status_text, status_code, ip]]`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HttpResult {
    pub success: bool,
    pub time: Option<f64>,
    pub status: String,
    pub code: String,
    pub ip: String,
}

/// `[[["OK", 0.031, "ip"], ["TIMEOUT", 3.0], ...]]`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PingResult {
    pub attempts: u32,
    pub successes: u32,
    /// Round-trip times of successful attempts, seconds.
    pub rtts: Vec<f64>,
    pub ip: String,
}

/// `[{"time": 0.04, "address": "ip"}]` or `[{"error": "..."}]`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum TcpResult {
    Connected { time: f64, address: String },
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ProbePayload {
    Http(HttpResult),
    Ping(PingResult),
    Tcp(TcpResult),
}

/// Decode a raw payload for `mode`; `None` when there is nothing usable.
pub fn decode(mode: CheckMode, raw: &Value) -> Option<ProbePayload> {
    let entry = first_entry(raw)?;
    match mode {
        CheckMode::Http => decode_http(entry).map(ProbePayload::Http),
        CheckMode::Ping => decode_ping(entry).map(ProbePayload::Ping),
        CheckMode::Tcp => Some(ProbePayload::Tcp(decode_tcp(entry))),
    }
}

fn first_entry(raw: &Value) -> Option<&Value> {
    let first = raw.as_array()?.first()?;
    if first.is_null() {
        None
    } else {
        Some(first)
    }
}

fn text_at(entry: &Value, idx: usize) -> String {
    match entry.get(idx) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => "-".to_string(),
        Some(other) => other.to_string(),
    }
}

/// The service reports success as `1`; some nodes send `true`.
fn is_success_flag(flag: &Value) -> bool {
    flag.as_i64() == Some(1) || flag.as_bool() == Some(true)
}

fn decode_http(entry: &Value) -> Option<HttpResult> {
    let fields = entry.as_array()?;
    if fields.is_empty() {
        return None;
    }
    Some(HttpResult {
        success: fields.first().is_some_and(is_success_flag),
        time: fields.get(1).and_then(Value::as_f64),
        status: text_at(entry, 2),
        code: text_at(entry, 3),
        ip: text_at(entry, 4),
    })
}

fn decode_ping(entry: &Value) -> Option<PingResult> {
    let attempts = entry.as_array()?;
    if attempts.is_empty() {
        return None;
    }

    let mut successes = 0;
    let mut rtts = Vec::new();
    let mut ip = "-".to_string();

    for attempt in attempts {
        let Some(fields) = attempt.as_array().filter(|f| !f.is_empty()) else {
            continue;
        };
        if let Some(addr) = fields.get(2).and_then(Value::as_str).filter(|s| !s.is_empty()) {
            ip = addr.to_string();
        }
        if fields.first().and_then(Value::as_str) == Some("OK") {
            successes += 1;
            if let Some(t) = fields.get(1).and_then(Value::as_f64) {
                rtts.push(t);
            }
        }
    }

    Some(PingResult {
        attempts: attempts.len() as u32,
        successes,
        rtts,
        ip,
    })
}

fn decode_tcp(entry: &Value) -> TcpResult {
    match entry.get("time").and_then(Value::as_f64) {
        Some(time) => TcpResult::Connected {
            time,
            address: entry
                .get("address")
                .and_then(Value::as_str)
                .unwrap_or("-")
                .to_string(),
        },
        None => TcpResult::Failed {
            error: entry
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("Error")
                .to_string(),
        },
    }
}

impl PingResult {
    /// `(attempts - successes) / attempts`.
    pub fn loss_rate(&self) -> Option<f64> {
        if self.attempts == 0 {
            return None;
        }
        Some(f64::from(self.attempts - self.successes) / f64::from(self.attempts))
    }

    pub fn all_ok(&self) -> bool {
        self.attempts > 0 && self.successes == self.attempts
    }

    pub fn rtt_min(&self) -> Option<f64> {
        self.rtts.iter().copied().reduce(f64::min)
    }

    pub fn rtt_avg(&self) -> Option<f64> {
        if self.rtts.is_empty() {
            return None;
        }
        Some(self.rtts.iter().sum::<f64>() / self.rtts.len() as f64)
    }

    pub fn rtt_max(&self) -> Option<f64> {
        self.rtts.iter().copied().reduce(f64::max)
    }
}

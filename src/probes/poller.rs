//! Bounded-retry polling of a check's result snapshot.

use crate::probes::{ProbingService, ResultSnapshot};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Polls a request until every expected vantage point has answered, or
/// accepts a partial answer near the end of the retry budget.
#[derive(Debug, Clone)]
pub struct ResultPoller {
    pub retries: u32,
    pub delay: Duration,
    /// Upper bound for a single fetch call.
    pub call_timeout: Duration,
}

impl Default for ResultPoller {
    fn default() -> Self {
        Self {
            retries: 10,
            delay: Duration::from_secs(2),
            call_timeout: Duration::from_secs(15),
        }
    }
}

impl ResultPoller {
    pub fn new(retries: u32, delay: Duration, call_timeout: Duration) -> Self {
        Self {
            retries,
            delay,
            call_timeout,
        }
    }

    /// Never fails: on exhaustion the last well-formed snapshot (possibly
    /// partial or empty) is returned.
    pub async fn poll_until_complete(
        &self,
        service: &dyn ProbingService,
        request_id: &str,
        expected_nodes: usize,
    ) -> ResultSnapshot {
        let mut last = ResultSnapshot::default();
        // The final two attempts accept a partial answer.
        let partial_from = self.retries.saturating_sub(2);

        for attempt in 0..self.retries {
            if attempt > 0 {
                tokio::time::sleep(self.delay).await;
            }

            let fetched =
                tokio::time::timeout(self.call_timeout, service.fetch_result(request_id)).await;
            let snapshot = match fetched {
                Ok(Ok(raw)) => ResultSnapshot::from_value(raw),
                Ok(Err(e)) => {
                    warn!(%request_id, attempt, error = %e, "Result fetch failed");
                    None
                }
                Err(_) => {
                    warn!(%request_id, attempt, timeout = ?self.call_timeout, "Result fetch timed out");
                    None
                }
            };

            let Some(snapshot) = snapshot else {
                continue;
            };
            if snapshot.is_empty() {
                debug!(%request_id, attempt, "No results yet");
                continue;
            }

            let answered = snapshot.answered();
            debug!(%request_id, attempt, answered, reported = snapshot.len(), expected_nodes, "Polled results");

            if snapshot.len() >= expected_nodes {
                if snapshot.all_answered() {
                    info!(%request_id, attempt, answered, "All vantage points answered");
                    return snapshot;
                }
                if answered > 0 && attempt >= partial_from {
                    info!(%request_id, attempt, answered, expected_nodes, "Accepting partial results");
                    return snapshot;
                }
            }
            last = snapshot;
        }

        warn!(%request_id, answered = last.answered(), expected_nodes, "Retry budget exhausted");
        last
    }
}

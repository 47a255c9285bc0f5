use super::{CheckMode, NodeInfo, ProbeError, ProbeRequest, ProbingService};
use reqwest::header::ACCEPT;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};

/// Client for the check-host.net JSON API.
pub struct CheckHostClient {
    client: Client,
    base_url: String,
}

impl CheckHostClient {
    /// Every request is bounded by `timeout`.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ProbeError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("vantagewatch/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get_json(&self, url: &str, query: &[(&str, String)]) -> Result<Value, ProbeError> {
        let resp = self
            .client
            .get(url)
            .header(ACCEPT, "application/json")
            .query(query)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ProbeError::Status(status.as_u16()));
        }
        Ok(resp.json::<Value>().await?)
    }
}

#[async_trait::async_trait]
impl ProbingService for CheckHostClient {
    async fn issue_check(
        &self,
        target: &str,
        mode: CheckMode,
        max_nodes: u32,
    ) -> Result<ProbeRequest, ProbeError> {
        let url = format!("{}/check-{}", self.base_url, mode);
        let body = self
            .get_json(
                &url,
                &[("host", target.to_string()), ("max_nodes", max_nodes.to_string())],
            )
            .await?;

        let request = parse_request(&body)?;
        info!(%target, %mode, request_id = %request.request_id, nodes = request.nodes.len(), "Check issued");
        Ok(request)
    }

    async fn fetch_result(&self, request_id: &str) -> Result<Value, ProbeError> {
        let url = format!("{}/check-result/{}", self.base_url, request_id);
        debug!(%request_id, "Fetching check result");
        self.get_json(&url, &[]).await
    }
}

/// Decode a check-issue response into a request id and its node set.
pub fn parse_request(body: &Value) -> Result<ProbeRequest, ProbeError> {
    let Some(request_id) = body.get("request_id").and_then(Value::as_str) else {
        let reason = body
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("no request id in response");
        return Err(ProbeError::Rejected(reason.to_string()));
    };

    let nodes = match body.get("nodes") {
        Some(Value::Object(map)) => map
            .iter()
            .map(|(id, meta)| (id.clone(), NodeInfo::from_value(meta)))
            .collect(),
        None | Some(Value::Null) => Default::default(),
        Some(other) => {
            return Err(ProbeError::Decode(format!("unexpected nodes field: {}", other)));
        }
    };

    Ok(ProbeRequest {
        request_id: request_id.to_string(),
        nodes,
    })
}

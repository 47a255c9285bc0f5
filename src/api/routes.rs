//! API route definitions.

use super::state::AppState;
use super::ApiError;
use crate::check::CheckReport;
use crate::config::TargetConfig;
use crate::detect::baseline::{flatten, DEFAULT_MAX_ROWS};
use crate::detect::incident::IncidentManager;
use crate::probes::CheckMode;
use axum::extract::{Query, State};
use axum::{routing::get, Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/check/http", get(check_http))
        .route("/check/ping", get(check_ping))
        .route("/check/tcp", get(check_tcp))
        .route("/baselines", get(baselines))
        .route("/incidents", get(list_incidents))
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "data": {
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION"),
            "baselines": state.checker.store().len()
        },
        "meta": {
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "version": env!("CARGO_PKG_VERSION")
        }
    }))
}

#[derive(Debug, Deserialize)]
struct TargetQuery {
    target: String,
    max_nodes: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct TcpQuery {
    host: String,
    port: Option<u16>,
    max_nodes: Option<u32>,
}

fn report_body(report: CheckReport) -> Json<Value> {
    let text = report.text();
    Json(json!({
        "data": report,
        "meta": {
            "text": text,
            "timestamp": chrono::Utc::now().to_rfc3339()
        }
    }))
}

fn require(value: &str, name: &str) -> Result<(), ApiError> {
    if value.trim().is_empty() {
        return Err(ApiError::bad_request(format!("'{}' must not be empty", name)));
    }
    Ok(())
}

async fn check_http(
    State(state): State<AppState>,
    Query(q): Query<TargetQuery>,
) -> Result<Json<Value>, ApiError> {
    require(&q.target, "target")?;
    let report = state
        .checker
        .check_http(&q.target, q.max_nodes)
        .await
        .map_err(ApiError::upstream)?;
    Ok(report_body(report))
}

async fn check_ping(
    State(state): State<AppState>,
    Query(q): Query<TargetQuery>,
) -> Result<Json<Value>, ApiError> {
    require(&q.target, "target")?;
    let report = state
        .checker
        .check_ping(&q.target, q.max_nodes)
        .await
        .map_err(ApiError::upstream)?;
    Ok(report_body(report))
}

async fn check_tcp(
    State(state): State<AppState>,
    Query(q): Query<TcpQuery>,
) -> Result<Json<Value>, ApiError> {
    require(&q.host, "host")?;
    let port = q.port.unwrap_or(TargetConfig::DEFAULT_TCP_PORT);
    let report = state
        .checker
        .check_tcp(&q.host, port, q.max_nodes)
        .await
        .map_err(ApiError::upstream)?;
    Ok(report_body(report))
}

#[derive(Debug, Deserialize)]
struct BaselineQuery {
    mode: Option<String>,
    target: Option<String>,
    max_rows: Option<usize>,
}

async fn baselines(
    State(state): State<AppState>,
    Query(q): Query<BaselineQuery>,
) -> Result<Json<Value>, ApiError> {
    let mode = q
        .mode
        .as_deref()
        .map(str::parse::<CheckMode>)
        .transpose()
        .map_err(|e| ApiError::bad_request(e.to_string()))?;

    let max_rows = q.max_rows.unwrap_or(DEFAULT_MAX_ROWS);
    let tree = state.checker.store().snapshot(mode, q.target.as_deref());
    let mut rows = flatten(&tree, max_rows.saturating_add(1));
    let truncated = rows.len() > max_rows;
    rows.truncate(max_rows);
    Ok(Json(json!({
        "data": rows,
        "meta": { "total": rows.len(), "truncated": truncated }
    })))
}

#[derive(Debug, Deserialize)]
struct IncidentQuery {
    limit: Option<usize>,
}

async fn list_incidents(
    State(state): State<AppState>,
    Query(q): Query<IncidentQuery>,
) -> Result<Json<Value>, ApiError> {
    let limit = q.limit.unwrap_or(50).min(1000);
    let incidents = IncidentManager::new(state.pool.clone()).list_recent(limit)?;
    Ok(Json(json!({
        "data": incidents,
        "meta": { "total": incidents.len() }
    })))
}

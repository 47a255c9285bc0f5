use crate::detect::{Incident, Severity};
use crate::storage::Pool;
use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::params;
use uuid::Uuid;

/// Append-only ledger of anomalies and monitoring failures.
#[derive(Clone)]
pub struct IncidentManager {
    pool: Pool,
}

impl IncidentManager {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn record_incident(
        &self,
        verdict: &str,
        severity: Severity,
        evidence: serde_json::Value,
    ) -> Result<Uuid> {
        let conn = self.pool.get()?;
        let id = Uuid::new_v4();
        let evidence_json = serde_json::to_string(&evidence)?;

        conn.execute(
            "INSERT INTO incidents (id, severity, verdict, evidence_json, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                id.to_string(),
                format!("{:?}", severity),
                verdict,
                evidence_json,
                Utc::now().to_rfc3339()
            ],
        )?;

        Ok(id)
    }

    pub fn list_recent(&self, limit: usize) -> Result<Vec<Incident>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT id, severity, verdict, evidence_json, created_at FROM incidents ORDER BY created_at DESC LIMIT ?1",
        )?;

        let rows = stmt.query_map([limit as i64], |row| {
            let id_str: String = row.get(0)?;
            let sev_str: String = row.get(1)?;
            let severity = match sev_str.as_str() {
                "Critical" => Severity::Critical,
                "Warning" => Severity::Warning,
                _ => Severity::Info,
            };
            let evidence_str: String = row.get(3)?;
            let created_str: String = row.get(4)?;

            Ok(Incident {
                id: Uuid::parse_str(&id_str).unwrap_or_default(),
                severity,
                verdict: row.get(2)?,
                evidence: serde_json::from_str(&evidence_str).unwrap_or_default(),
                created_at: DateTime::parse_from_rfc3339(&created_str)
                    .map(|t| t.with_timezone(&Utc))
                    .unwrap_or_default(),
            })
        })?;

        let mut incidents = Vec::new();
        for r in rows {
            incidents.push(r?);
        }
        Ok(incidents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_and_list() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let pool = crate::storage::open_pool(dir.path().join("ledger.db"))?;
        let incidents = IncidentManager::new(pool);

        incidents.record_incident(
            "Latency Anomaly",
            Severity::Warning,
            json!({"target": "https://example.com", "value": 2.5}),
        )?;
        incidents.record_incident("Monitoring Error", Severity::Critical, json!({"error": "boom"}))?;

        let listed = incidents.list_recent(10)?;
        assert_eq!(listed.len(), 2);
        assert!(listed.iter().any(|i| i.verdict == "Latency Anomaly"
            && i.severity == Severity::Warning
            && i.evidence["value"] == 2.5));

        assert_eq!(incidents.list_recent(1)?.len(), 1);
        Ok(())
    }
}

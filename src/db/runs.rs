//! Ingest run history.

use rusqlite::params;

use super::{Catalog, CatalogResult};
use crate::scanner::IngestSummary;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Cancelled => "cancelled",
            RunStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "completed" => RunStatus::Completed,
            "cancelled" => RunStatus::Cancelled,
            "failed" => RunStatus::Failed,
            _ => RunStatus::Running,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IngestRun {
    pub id: i64,
    pub root: String,
    pub started_at: String,
    pub completed_at: Option<String>,
    pub discovered: i64,
    pub ingested: i64,
    pub failed: i64,
    pub faces_found: i64,
    pub status: RunStatus,
}

impl Catalog {
    pub fn begin_ingest_run(&self, root: &str) -> CatalogResult<i64> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO ingest_runs (root, started_at, status) VALUES (?, ?, ?)",
            params![root, chrono::Utc::now().to_rfc3339(), RunStatus::Running.as_str()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn finish_ingest_run(
        &self,
        run_id: i64,
        summary: &IngestSummary,
        status: RunStatus,
    ) -> CatalogResult<()> {
        self.conn().execute(
            r#"
            UPDATE ingest_runs SET
                completed_at = ?, discovered = ?, ingested = ?, failed = ?, faces_found = ?, status = ?
            WHERE id = ?
            "#,
            params![
                chrono::Utc::now().to_rfc3339(),
                summary.discovered as i64,
                summary.ingested as i64,
                summary.failed as i64,
                summary.faces_found as i64,
                status.as_str(),
                run_id,
            ],
        )?;
        Ok(())
    }

    /// Most recent runs first.
    pub fn recent_ingest_runs(&self, limit: usize) -> CatalogResult<Vec<IngestRun>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            r#"
            SELECT id, root, started_at, completed_at, discovered, ingested, failed, faces_found, status
            FROM ingest_runs
            ORDER BY id DESC
            LIMIT ?
            "#,
        )?;
        let runs = stmt
            .query_map([limit as i64], |row| {
                let status: String = row.get(8)?;
                Ok(IngestRun {
                    id: row.get(0)?,
                    root: row.get(1)?,
                    started_at: row.get(2)?,
                    completed_at: row.get(3)?,
                    discovered: row.get(4)?,
                    ingested: row.get(5)?,
                    failed: row.get(6)?,
                    faces_found: row.get(7)?,
                    status: RunStatus::parse(&status),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(runs)
    }
}

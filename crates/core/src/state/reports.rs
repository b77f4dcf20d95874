//! # Reports
//!
//! The final synthesis artifact. Reports are keyed by project id, so a
//! project holds at most one report no matter how often it is saved.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

use super::db::DossierDb;
use super::project_state::Priority;
use super::{db_time, lock_error};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    #[default]
    Medium,
    High,
}

impl RiskLevel {
    pub fn from_str(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Self::Low,
            "high" | "critical" => Self::High,
            _ => Self::Medium,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReportSection {
    pub id: String,
    pub title: String,
    pub content: String,
    /// Ids of the findings this section cites
    #[serde(default)]
    pub finding_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subsections: Vec<ReportSection>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RiskFactor {
    pub category: String,
    pub description: String,
    pub severity: RiskLevel,
    pub likelihood: RiskLevel,
    #[serde(default)]
    pub mitigation: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Recommendation {
    pub title: String,
    pub description: String,
    pub priority: Priority,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Appendix {
    pub title: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReportMetadata {
    pub generated_at: DateTime<Utc>,
    pub word_count: usize,
    pub source_count: usize,
    /// Mean confidence of the findings the report draws on, 0.0 to 1.0
    pub confidence_score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Report {
    pub id: String,
    pub project_id: String,
    pub title: String,
    pub executive_summary: String,
    pub sections: Vec<ReportSection>,
    #[serde(default)]
    pub key_insights: Vec<String>,
    #[serde(default)]
    pub risk_factors: Vec<RiskFactor>,
    #[serde(default)]
    pub recommendations: Vec<Recommendation>,
    #[serde(default)]
    pub appendices: Vec<Appendix>,
    pub metadata: ReportMetadata,
}

impl Report {
    /// Words across the summary and every (nested) section body
    pub fn count_words(&self) -> usize {
        fn section_words(section: &ReportSection) -> usize {
            section.content.split_whitespace().count()
                + section.subsections.iter().map(section_words).sum::<usize>()
        }

        self.executive_summary.split_whitespace().count()
            + self.sections.iter().map(section_words).sum::<usize>()
    }
}

/// SQLite-backed report storage
pub struct ReportManager {
    conn: Arc<Mutex<Connection>>,
}

impl ReportManager {
    pub fn new(db: &DossierDb) -> Self {
        Self {
            conn: db.connection(),
        }
    }

    /// Insert or replace the report of `report.project_id`
    pub fn save(&self, report: &Report) -> Result<()> {
        let conn = self.conn.lock().map_err(lock_error)?;
        conn.execute(
            r#"
            INSERT INTO reports (project_id, id, data, generated_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(project_id) DO UPDATE SET
                id = excluded.id,
                data = excluded.data,
                generated_at = excluded.generated_at
            "#,
            params![
                report.project_id,
                report.id,
                serde_json::to_string(report)?,
                db_time(&report.metadata.generated_at),
            ],
        )
        .with_context(|| format!("Failed to save report for {}", report.project_id))?;
        Ok(())
    }

    pub fn get(&self, project_id: &str) -> Result<Option<Report>> {
        let conn = self.conn.lock().map_err(lock_error)?;
        let data: Option<String> = conn
            .query_row(
                "SELECT data FROM reports WHERE project_id = ?1",
                params![project_id],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to load report")?;

        data.map(|d| serde_json::from_str(&d).context("Corrupt report data"))
            .transpose()
    }

    pub fn count(&self, project_id: &str) -> Result<usize> {
        let conn = self.conn.lock().map_err(lock_error)?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM reports WHERE project_id = ?1",
            params![project_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

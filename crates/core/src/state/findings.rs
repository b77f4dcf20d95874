//! # Findings
//!
//! Append-only storage for discovered facts. A finding is never updated
//! after it has been stored.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

use super::db::DossierDb;
use super::sources::Source;
use super::{db_time, json_column, lock_error, parse_db_time};
use crate::agents::AgentType;

/// How much weight a finding deserves
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    High,
    #[default]
    Medium,
    Low,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }

    /// Lenient parse used for stored rows and LLM output
    pub fn from_str(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "high" => Self::High,
            "low" => Self::Low,
            _ => Self::Medium,
        }
    }

    /// Numeric score used when aggregating report confidence
    pub fn score(&self) -> f64 {
        match self {
            Self::High => 0.9,
            Self::Medium => 0.6,
            Self::Low => 0.3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FindingMetadata {
    pub discovered_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Default for FindingMetadata {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            discovered_at: now,
            updated_at: now,
            extra: serde_json::Map::new(),
        }
    }
}

/// An atomic unit of discovered information
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Finding {
    /// Empty until the store assigns one
    #[serde(default)]
    pub id: String,
    pub project_id: String,
    #[serde(default)]
    pub question_id: Option<String>,
    pub agent_id: String,
    pub agent_type: AgentType,
    pub category: String,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub confidence: Confidence,
    #[serde(default)]
    pub sources: Vec<Source>,
    #[serde(default)]
    pub related_findings: Vec<String>,
    #[serde(default)]
    pub metadata: FindingMetadata,
}

impl Finding {
    /// Start a finding for `agent_type`; the id is assigned on store
    pub fn new(
        project_id: impl Into<String>,
        agent_type: AgentType,
        title: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: String::new(),
            project_id: project_id.into(),
            question_id: None,
            agent_id: agent_type.as_str().to_string(),
            agent_type,
            category: "general".to_string(),
            title: title.into(),
            content: content.into(),
            summary: String::new(),
            confidence: Confidence::Medium,
            sources: Vec::new(),
            related_findings: Vec::new(),
            metadata: FindingMetadata::default(),
        }
    }

    pub fn with_question(mut self, question_id: impl Into<String>) -> Self {
        self.question_id = Some(question_id.into());
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn with_confidence(mut self, confidence: Confidence) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }

    pub fn with_source(mut self, source: Source) -> Self {
        self.sources.push(source);
        self
    }

    pub fn summary_or_content(&self) -> &str {
        if self.summary.trim().is_empty() {
            &self.content
        } else {
            &self.summary
        }
    }
}

/// SQLite-backed finding storage
pub struct FindingManager {
    conn: Arc<Mutex<Connection>>,
}

impl FindingManager {
    pub fn new(db: &DossierDb) -> Self {
        Self {
            conn: db.connection(),
        }
    }

    /// Persist a finding, assigning an id when absent
    pub fn store(&self, finding: Finding) -> Result<Finding> {
        let conn = self.conn.lock().map_err(lock_error)?;
        Self::store_in(&conn, finding)
    }

    pub(crate) fn store_in(conn: &Connection, mut finding: Finding) -> Result<Finding> {
        if finding.id.trim().is_empty() {
            finding.id = format!("finding-{}", uuid::Uuid::new_v4());
        }

        conn.execute(
            r#"
            INSERT INTO findings
            (id, project_id, question_id, agent_id, agent_type, category, title, content,
             summary, confidence, sources_json, related_json, extra_json, discovered_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
            "#,
            params![
                finding.id,
                finding.project_id,
                finding.question_id,
                finding.agent_id,
                finding.agent_type.as_str(),
                finding.category,
                finding.title,
                finding.content,
                finding.summary,
                finding.confidence.as_str(),
                serde_json::to_string(&finding.sources)?,
                serde_json::to_string(&finding.related_findings)?,
                serde_json::to_string(&finding.metadata.extra)?,
                db_time(&finding.metadata.discovered_at),
                db_time(&finding.metadata.updated_at),
            ],
        )
        .with_context(|| format!("Failed to store finding {}", finding.id))?;

        Ok(finding)
    }

    /// Findings for a project, newest first, optionally for one question
    pub fn list(&self, project_id: &str, question_id: Option<&str>) -> Result<Vec<Finding>> {
        let conn = self.conn.lock().map_err(lock_error)?;

        let mut stmt = conn.prepare(
            r#"
            SELECT id, project_id, question_id, agent_id, agent_type, category, title, content,
                   summary, confidence, sources_json, related_json, extra_json,
                   discovered_at, updated_at
            FROM findings
            WHERE project_id = ?1 AND (?2 IS NULL OR question_id = ?2)
            ORDER BY discovered_at DESC, rowid DESC
            "#,
        )?;

        let findings = stmt
            .query_map(params![project_id, question_id], Self::row_to_finding)?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to list findings")?;

        Ok(findings)
    }

    fn row_to_finding(row: &Row<'_>) -> rusqlite::Result<Finding> {
        let agent_type: String = row.get(4)?;
        let confidence: String = row.get(9)?;
        let discovered_at: String = row.get(13)?;
        let updated_at: String = row.get(14)?;

        Ok(Finding {
            id: row.get(0)?,
            project_id: row.get(1)?,
            question_id: row.get(2)?,
            agent_id: row.get(3)?,
            agent_type: AgentType::from_str(&agent_type).ok_or_else(|| {
                rusqlite::Error::FromSqlConversionFailure(
                    4,
                    rusqlite::types::Type::Text,
                    format!("unknown agent type '{}'", agent_type).into(),
                )
            })?,
            category: row.get(5)?,
            title: row.get(6)?,
            content: row.get(7)?,
            summary: row.get(8)?,
            confidence: Confidence::from_str(&confidence),
            sources: json_column(row, 10)?,
            related_findings: json_column(row, 11)?,
            metadata: FindingMetadata {
                discovered_at: parse_db_time(&discovered_at),
                updated_at: parse_db_time(&updated_at),
                extra: json_column(row, 12)?,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::sources::SourceKind;
    use chrono::Duration;

    fn finding_at(question: &str, title: &str, offset_secs: i64) -> Finding {
        let mut finding = Finding::new("p1", AgentType::Researcher, title, "content")
            .with_question(question);
        let at = Utc::now() + Duration::seconds(offset_secs);
        finding.metadata.discovered_at = at;
        finding.metadata.updated_at = at;
        finding
    }

    #[test]
    fn test_store_assigns_id() {
        let db = DossierDb::open_in_memory().unwrap();
        let mgr = FindingManager::new(&db);

        let stored = mgr
            .store(Finding::new("p1", AgentType::FinancialAnalyst, "Revenue", "$1B"))
            .unwrap();
        assert!(stored.id.starts_with("finding-"));

        let kept = mgr
            .store(Finding {
                id: "custom-id".to_string(),
                ..Finding::new("p1", AgentType::Researcher, "Kept", "x")
            })
            .unwrap();
        assert_eq!(kept.id, "custom-id");
    }

    #[test]
    fn test_list_newest_first_with_filter() {
        let db = DossierDb::open_in_memory().unwrap();
        let mgr = FindingManager::new(&db);

        mgr.store(finding_at("q-1", "oldest", -20)).unwrap();
        mgr.store(finding_at("q-2", "middle", -10)).unwrap();
        mgr.store(finding_at("q-1", "newest", 0)).unwrap();

        let all = mgr.list("p1", None).unwrap();
        let titles: Vec<&str> = all.iter().map(|f| f.title.as_str()).collect();
        assert_eq!(titles, vec!["newest", "middle", "oldest"]);

        let q1 = mgr.list("p1", Some("q-1")).unwrap();
        assert_eq!(q1.len(), 2);
        assert!(q1.iter().all(|f| f.question_id.as_deref() == Some("q-1")));

        assert!(mgr.list("other-project", None).unwrap().is_empty());
    }

    #[test]
    fn test_round_trips_sources_and_confidence() {
        let db = DossierDb::open_in_memory().unwrap();
        let mgr = FindingManager::new(&db);

        let source = Source::new(SourceKind::FinancialReport, "10-K filing").with_relevance(0.8);
        let stored = mgr
            .store(
                Finding::new("p1", AgentType::FinancialAnalyst, "Margins", "Gross margin 40%")
                    .with_confidence(Confidence::High)
                    .with_source(source),
            )
            .unwrap();

        let loaded = mgr.list("p1", None).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, stored.id);
        assert_eq!(loaded[0].confidence, Confidence::High);
        assert_eq!(loaded[0].sources[0].title, "10-K filing");
        assert_eq!(loaded[0].agent_type, AgentType::FinancialAnalyst);
    }
}

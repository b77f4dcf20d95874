//! # Sources
//!
//! Citation registry, one per project, de-duplicated by source id.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::db::DossierDb;
use super::{db_time, lock_error, parse_db_time};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Web,
    Document,
    Api,
    Database,
    News,
    FinancialReport,
    Social,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Web => "web",
            Self::Document => "document",
            Self::Api => "api",
            Self::Database => "database",
            Self::News => "news",
            Self::FinancialReport => "financial_report",
            Self::Social => "social",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "web" => Some(Self::Web),
            "document" => Some(Self::Document),
            "api" => Some(Self::Api),
            "database" => Some(Self::Database),
            "news" => Some(Self::News),
            "financial_report" => Some(Self::FinancialReport),
            "social" => Some(Self::Social),
            _ => None,
        }
    }
}

/// A citation backing one or more findings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Source {
    /// Empty until the registry assigns one
    #[serde(default)]
    pub id: String,
    pub kind: SourceKind,
    #[serde(default)]
    pub url: Option<String>,
    pub title: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
    pub accessed_at: DateTime<Utc>,
    /// Between 0.0 and 1.0
    pub relevance: f64,
    #[serde(default)]
    pub snippet: Option<String>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

impl Source {
    pub fn new(kind: SourceKind, title: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            kind,
            url: None,
            title: title.into(),
            author: None,
            published_at: None,
            accessed_at: Utc::now(),
            relevance: 0.5,
            snippet: None,
            metadata: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_relevance(mut self, relevance: f64) -> Self {
        self.relevance = relevance;
        self
    }

    pub fn with_snippet(mut self, snippet: impl Into<String>) -> Self {
        self.snippet = Some(snippet.into());
        self
    }
}

fn clamp_relevance(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// SQLite-backed source registry
pub struct SourceManager {
    conn: Arc<Mutex<Connection>>,
}

impl SourceManager {
    pub fn new(db: &DossierDb) -> Self {
        Self {
            conn: db.connection(),
        }
    }

    /// Upsert a source by id. Re-registering an id replaces its content.
    pub fn register(&self, project_id: &str, source: Source) -> Result<Source> {
        let conn = self.conn.lock().map_err(lock_error)?;
        Self::register_in(&conn, project_id, source)
    }

    pub(crate) fn register_in(
        conn: &Connection,
        project_id: &str,
        mut source: Source,
    ) -> Result<Source> {
        if source.id.trim().is_empty() {
            source.id = format!("src-{}", uuid::Uuid::new_v4());
        }
        source.relevance = clamp_relevance(source.relevance);

        let metadata = source
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        conn.execute(
            r#"
            INSERT INTO sources
            (project_id, id, kind, url, title, author, published_at, accessed_at,
             relevance, snippet, metadata_json)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            ON CONFLICT(project_id, id) DO UPDATE SET
                kind = excluded.kind,
                url = excluded.url,
                title = excluded.title,
                author = excluded.author,
                published_at = excluded.published_at,
                accessed_at = excluded.accessed_at,
                relevance = excluded.relevance,
                snippet = excluded.snippet,
                metadata_json = excluded.metadata_json
            "#,
            params![
                project_id,
                source.id,
                source.kind.as_str(),
                source.url,
                source.title,
                source.author,
                source.published_at.as_ref().map(db_time),
                db_time(&source.accessed_at),
                source.relevance,
                source.snippet,
                metadata,
            ],
        )
        .with_context(|| format!("Failed to register source {}", source.id))?;

        Ok(source)
    }

    /// All sources for a project, most relevant first
    pub fn list(&self, project_id: &str) -> Result<Vec<Source>> {
        let conn = self.conn.lock().map_err(lock_error)?;

        let mut stmt = conn.prepare(
            r#"
            SELECT id, kind, url, title, author, published_at, accessed_at,
                   relevance, snippet, metadata_json
            FROM sources
            WHERE project_id = ?1
            ORDER BY relevance DESC, title ASC
            "#,
        )?;

        let sources = stmt
            .query_map(params![project_id], Self::row_to_source)?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to list sources")?;

        Ok(sources)
    }

    pub fn get(&self, project_id: &str, id: &str) -> Result<Option<Source>> {
        let conn = self.conn.lock().map_err(lock_error)?;
        conn.query_row(
            r#"
            SELECT id, kind, url, title, author, published_at, accessed_at,
                   relevance, snippet, metadata_json
            FROM sources
            WHERE project_id = ?1 AND id = ?2
            "#,
            params![project_id, id],
            Self::row_to_source,
        )
        .optional()
        .context("Failed to load source")
    }

    /// Id-keyed view used by the shared context
    pub fn registry(&self, project_id: &str) -> Result<HashMap<String, Source>> {
        Ok(self
            .list(project_id)?
            .into_iter()
            .map(|s| (s.id.clone(), s))
            .collect())
    }

    pub fn count(&self, project_id: &str) -> Result<usize> {
        let conn = self.conn.lock().map_err(lock_error)?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sources WHERE project_id = ?1",
                params![project_id],
                |row| row.get(0),
            )
            .context("Failed to count sources")?;
        Ok(count as usize)
    }

    fn row_to_source(row: &Row<'_>) -> rusqlite::Result<Source> {
        let kind: String = row.get(1)?;
        let published_at: Option<String> = row.get(5)?;
        let accessed_at: String = row.get(6)?;
        let metadata: Option<String> = row.get(9)?;

        Ok(Source {
            id: row.get(0)?,
            kind: SourceKind::from_str(&kind).unwrap_or(SourceKind::Web),
            url: row.get(2)?,
            title: row.get(3)?,
            author: row.get(4)?,
            published_at: published_at.as_deref().map(parse_db_time),
            accessed_at: parse_db_time(&accessed_at),
            relevance: row.get(7)?,
            snippet: row.get(8)?,
            metadata: metadata.and_then(|m| serde_json::from_str(&m).ok()),
        })
    }
}

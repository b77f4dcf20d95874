//! # Shared Store
//!
//! SQLite-backed persistence for projects, findings, sources, shared
//! context and reports. [`SharedStore`] is the facade handed to agents and
//! to the orchestrator.

pub mod db;
pub mod findings;
pub mod project_state;
pub mod reports;
pub mod shared_context;
pub mod sources;
pub mod store;

pub use db::DossierDb;

pub use findings::{Confidence, Finding, FindingManager, FindingMetadata};
pub use project_state::{
    AgentState, AgentStatus, DataSources, KeyQuestion, Priority, Project, ProjectError,
    ProjectManager, ProjectMetadata, ProjectStatus, QuestionCategory, ScopingInput,
};
pub use reports::{
    Appendix, Recommendation, Report, ReportManager, ReportMetadata, ReportSection, RiskFactor,
    RiskLevel,
};
pub use shared_context::{ContextManager, SharedContext, SharedContextUpdate};
pub use sources::{Source, SourceKind, SourceManager};
pub use store::SharedStore;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;

/// Timestamps are stored as RFC 3339 UTC with millisecond precision so that
/// lexical order in SQL matches chronological order.
pub(crate) fn db_time(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn parse_db_time(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_default()
}

/// Decode a JSON text column inside a rusqlite row mapper
pub(crate) fn json_column<T: DeserializeOwned>(
    row: &rusqlite::Row<'_>,
    idx: usize,
) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

pub(crate) fn lock_error<T>(e: std::sync::PoisonError<T>) -> anyhow::Error {
    anyhow::anyhow!("Lock error: {}", e)
}

//! # Shared Context
//!
//! Per-project blackboard read by later agents: key questions, task
//! bookkeeping and free-text insights. The source registry is derived from
//! the `sources` table on every read.
//!
//! Every mutation is a read-modify-write inside one transaction taken while
//! the connection lock is held, so concurrent appends are never lost.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::db::DossierDb;
use super::sources::{Source, SourceManager};
use super::{db_time, json_column, lock_error, parse_db_time};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SharedContext {
    pub project_id: String,
    pub target: String,
    pub key_questions: Vec<String>,
    pub completed_tasks: Vec<String>,
    pub pending_tasks: Vec<String>,
    pub discovered_insights: Vec<String>,
    pub sources: HashMap<String, Source>,
    pub updated_at: DateTime<Utc>,
}

/// Partial update; `None` fields are left untouched
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SharedContextUpdate {
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub key_questions: Option<Vec<String>>,
    #[serde(default)]
    pub completed_tasks: Option<Vec<String>>,
    #[serde(default)]
    pub pending_tasks: Option<Vec<String>>,
    #[serde(default)]
    pub discovered_insights: Option<Vec<String>>,
}

impl SharedContextUpdate {
    pub fn pending_tasks(tasks: Vec<String>) -> Self {
        Self {
            pending_tasks: Some(tasks),
            ..Default::default()
        }
    }
}

/// Stored columns of a context row, without the derived registry
struct ContextRow {
    target: String,
    key_questions: Vec<String>,
    completed_tasks: Vec<String>,
    pending_tasks: Vec<String>,
    discovered_insights: Vec<String>,
    updated_at: String,
}

/// Move `description` from pending to completed
fn complete_task(row: &mut ContextRow, description: &str) {
    if let Some(pos) = row.pending_tasks.iter().position(|t| t == description) {
        row.pending_tasks.remove(pos);
    }
    row.completed_tasks.push(description.to_string());
}

pub struct ContextManager {
    conn: Arc<Mutex<Connection>>,
    sources: SourceManager,
}

impl ContextManager {
    pub fn new(db: &DossierDb) -> Self {
        Self {
            conn: db.connection(),
            sources: SourceManager::new(db),
        }
    }

    /// Read the context; a missing project yields `None`
    pub fn get(&self, project_id: &str) -> Result<Option<SharedContext>> {
        let row = {
            let conn = self.conn.lock().map_err(lock_error)?;
            Self::read_row(&conn, project_id)?
        };

        let Some(row) = row else {
            return Ok(None);
        };

        Ok(Some(SharedContext {
            project_id: project_id.to_string(),
            target: row.target,
            key_questions: row.key_questions,
            completed_tasks: row.completed_tasks,
            pending_tasks: row.pending_tasks,
            discovered_insights: row.discovered_insights,
            sources: self.sources.registry(project_id)?,
            updated_at: parse_db_time(&row.updated_at),
        }))
    }

    /// Merge `update` into the stored context
    pub fn update(
        &self,
        project_id: &str,
        update: SharedContextUpdate,
    ) -> Result<Option<SharedContext>> {
        let applied = self.modify(project_id, |row| {
            if let Some(target) = update.target {
                row.target = target;
            }
            if let Some(questions) = update.key_questions {
                row.key_questions = questions;
            }
            if let Some(completed) = update.completed_tasks {
                row.completed_tasks = completed;
            }
            if let Some(pending) = update.pending_tasks {
                row.pending_tasks = pending;
            }
            if let Some(insights) = update.discovered_insights {
                row.discovered_insights = insights;
            }
        })?;

        if !applied {
            return Ok(None);
        }
        self.get(project_id)
    }

    /// Append a completed task and drop it from the pending list.
    /// Returns `false` when the project has no context.
    pub fn add_completed_task(&self, project_id: &str, description: &str) -> Result<bool> {
        self.modify(project_id, |row| complete_task(row, description))
    }

    pub fn add_insight(&self, project_id: &str, insight: &str) -> Result<bool> {
        self.modify(project_id, |row| row.discovered_insights.push(insight.to_string()))
    }

    /// Append insights and mark a task complete on a connection the caller
    /// holds, typically inside its own transaction
    pub(crate) fn record_task_in(
        conn: &Connection,
        project_id: &str,
        description: &str,
        insights: &[String],
    ) -> Result<bool> {
        Self::modify_in(conn, project_id, |row| {
            row.discovered_insights.extend(insights.iter().cloned());
            complete_task(row, description);
        })
    }

    fn modify<F>(&self, project_id: &str, apply: F) -> Result<bool>
    where
        F: FnOnce(&mut ContextRow),
    {
        let mut conn = self.conn.lock().map_err(lock_error)?;
        let tx = conn.transaction()?;
        let applied = Self::modify_in(&tx, project_id, apply)?;
        tx.commit()?;
        Ok(applied)
    }

    fn modify_in<F>(conn: &Connection, project_id: &str, apply: F) -> Result<bool>
    where
        F: FnOnce(&mut ContextRow),
    {
        let Some(mut row) = Self::read_row(conn, project_id)? else {
            return Ok(false);
        };
        apply(&mut row);

        conn.execute(
            r#"
            UPDATE shared_contexts
            SET target = ?2, key_questions_json = ?3, completed_tasks_json = ?4,
                pending_tasks_json = ?5, insights_json = ?6, updated_at = ?7
            WHERE project_id = ?1
            "#,
            params![
                project_id,
                row.target,
                serde_json::to_string(&row.key_questions)?,
                serde_json::to_string(&row.completed_tasks)?,
                serde_json::to_string(&row.pending_tasks)?,
                serde_json::to_string(&row.discovered_insights)?,
                db_time(&Utc::now()),
            ],
        )
        .with_context(|| format!("Failed to update shared context for {}", project_id))?;

        Ok(true)
    }

    fn read_row(conn: &Connection, project_id: &str) -> Result<Option<ContextRow>> {
        conn.query_row(
            r#"
            SELECT target, key_questions_json, completed_tasks_json, pending_tasks_json,
                   insights_json, updated_at
            FROM shared_contexts
            WHERE project_id = ?1
            "#,
            params![project_id],
            |row| {
                Ok(ContextRow {
                    target: row.get(0)?,
                    key_questions: json_column(row, 1)?,
                    completed_tasks: json_column(row, 2)?,
                    pending_tasks: json_column(row, 3)?,
                    discovered_insights: json_column(row, 4)?,
                    updated_at: row.get(5)?,
                })
            },
        )
        .optional()
        .context("Failed to read shared context")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::project_state::{ProjectManager, QuestionCategory, ScopingInput};
    use crate::state::sources::SourceKind;

    fn setup() -> (DossierDb, ContextManager) {
        let db = DossierDb::open_in_memory().unwrap();
        let input = ScopingInput::new("Acme").with_question(
            "Who competes with Acme?",
            QuestionCategory::Competitive,
            None,
        );
        ProjectManager::new(&db)
            .create("p1", "Acme research", "Acme", &input)
            .unwrap();
        let ctx = ContextManager::new(&db);
        (db, ctx)
    }

    #[test]
    fn test_missing_project_is_none() {
        let (_db, ctx) = setup();
        assert!(ctx.get("nope").unwrap().is_none());
        assert!(ctx
            .update("nope", SharedContextUpdate::default())
            .unwrap()
            .is_none());
        assert!(!ctx.add_insight("nope", "x").unwrap());
    }

    #[test]
    fn test_seeded_with_questions() {
        let (_db, ctx) = setup();
        let context = ctx.get("p1").unwrap().unwrap();
        assert_eq!(context.target, "Acme");
        assert_eq!(context.key_questions, vec!["Who competes with Acme?"]);
        assert!(context.completed_tasks.is_empty());
    }

    #[test]
    fn test_completed_task_leaves_pending() {
        let (_db, ctx) = setup();
        ctx.update(
            "p1",
            SharedContextUpdate::pending_tasks(vec!["a".into(), "b".into()]),
        )
        .unwrap();

        ctx.add_completed_task("p1", "a").unwrap();
        let context = ctx.get("p1").unwrap().unwrap();
        assert_eq!(context.pending_tasks, vec!["b"]);
        assert_eq!(context.completed_tasks, vec!["a"]);
    }

    #[test]
    fn test_registry_derived_from_sources() {
        let (db, ctx) = setup();
        SourceManager::new(&db)
            .register("p1", Source::new(SourceKind::Web, "Site").with_id("s-1"))
            .unwrap();

        let context = ctx.get("p1").unwrap().unwrap();
        assert_eq!(context.sources.len(), 1);
        assert_eq!(context.sources["s-1"].title, "Site");
    }

    #[test]
    fn test_concurrent_appends_not_lost() {
        let (_db, ctx) = setup();
        let ctx = Arc::new(ctx);

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let ctx = Arc::clone(&ctx);
                std::thread::spawn(move || {
                    for j in 0..10 {
                        ctx.add_insight("p1", &format!("insight {i}-{j}")).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let context = ctx.get("p1").unwrap().unwrap();
        assert_eq!(context.discovered_insights.len(), 80);
    }
}

//! # Project State
//!
//! The project record driven by the orchestrator, the scoping input it is
//! created from, and the manager that persists project snapshots.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

use super::db::DossierDb;
use super::findings::Finding;
use super::reports::Report;
use super::{db_time, json_column, lock_error};
use crate::agents::AgentType;

/// Priority tier of a key question
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Critical,
    High,
    Medium,
    Low,
}

impl Priority {
    /// Numeric scheduling weight; unspecified priorities count as medium
    pub fn weight(priority: Option<Priority>) -> u8 {
        match priority {
            Some(Priority::Critical) => 4,
            Some(Priority::High) => 3,
            Some(Priority::Medium) | None => 2,
            Some(Priority::Low) => 1,
        }
    }
}

/// Topic of a key question, used to pick agents
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum QuestionCategory {
    Financial,
    Market,
    Competitive,
    Technology,
    Regulatory,
    Risk,
    #[default]
    #[serde(other)]
    General,
}

impl QuestionCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Financial => "financial",
            Self::Market => "market",
            Self::Competitive => "competitive",
            Self::Technology => "technology",
            Self::Regulatory => "regulatory",
            Self::Risk => "risk",
            Self::General => "general",
        }
    }
}

/// A prioritized question the research must answer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KeyQuestion {
    /// Assigned during planning when absent (`q-1`, `q-2`, ...)
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub category: QuestionCategory,
    #[serde(default)]
    pub priority: Option<Priority>,
}

/// Which external data sources the agents may use
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct DataSources {
    #[serde(default)]
    pub web_search: bool,
    #[serde(default)]
    pub financial_data: bool,
    #[serde(default)]
    pub market_data: bool,
}

/// Input that scopes one research run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScopingInput {
    pub target: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub questions: Vec<KeyQuestion>,
    #[serde(default)]
    pub data_sources: DataSources,
    /// Free-text background passed to every task
    #[serde(default)]
    pub context: Option<String>,
}

impl ScopingInput {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            name: None,
            questions: Vec::new(),
            data_sources: DataSources::default(),
            context: None,
        }
    }

    pub fn with_question(
        mut self,
        text: impl Into<String>,
        category: QuestionCategory,
        priority: Option<Priority>,
    ) -> Self {
        self.questions.push(KeyQuestion {
            id: None,
            text: text.into(),
            category,
            priority,
        });
        self
    }

    pub fn with_data_sources(mut self, data_sources: DataSources) -> Self {
        self.data_sources = data_sources;
        self
    }

    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("{} research", self.target.trim()))
    }
}

/// Workflow status of a project
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Pending,
    Initializing,
    Researching,
    Analyzing,
    Synthesizing,
    Reviewing,
    Completed,
    Failed,
    Paused,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Initializing => "initializing",
            Self::Researching => "researching",
            Self::Analyzing => "analyzing",
            Self::Synthesizing => "synthesizing",
            Self::Reviewing => "reviewing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Paused => "paused",
        }
    }

    /// `completed` and `failed` accept no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of one agent type within a project
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    #[default]
    Idle,
    Active,
    Completed,
    Error,
}

/// Per-project status record for one agent type
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentStatus {
    pub agent_type: AgentType,
    pub state: AgentState,
    pub current_task: Option<String>,
    pub progress: u8,
    pub tokens_used: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl AgentStatus {
    pub fn idle(agent_type: AgentType) -> Self {
        Self {
            agent_type,
            state: AgentState::Idle,
            current_task: None,
            progress: 0,
            tokens_used: 0,
            started_at: None,
            completed_at: None,
        }
    }
}

/// An error recorded against a project
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProjectError {
    pub message: String,
    #[serde(default)]
    pub agent_type: Option<AgentType>,
    #[serde(default)]
    pub task_id: Option<String>,
    /// `true` for task-level failures, `false` when the project failed
    pub recoverable: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProjectMetadata {
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub total_tokens: u64,
    #[serde(default)]
    pub sources_count: usize,
    #[serde(default)]
    pub searches_count: u64,
}

/// One research run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub scoping: ScopingInput,
    pub status: ProjectStatus,
    pub progress: u8,
    pub current_phase: String,
    pub agents: Vec<AgentStatus>,
    #[serde(default)]
    pub findings: Vec<Finding>,
    #[serde(default)]
    pub report: Option<Report>,
    #[serde(default)]
    pub errors: Vec<ProjectError>,
    pub metadata: ProjectMetadata,
    /// Status held before `pause`, restored on resume
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paused_from: Option<ProjectStatus>,
}

impl Project {
    pub fn new(id: impl Into<String>, scoping: ScopingInput, agent_types: &[AgentType]) -> Self {
        Self {
            id: id.into(),
            name: scoping.display_name(),
            scoping,
            status: ProjectStatus::Pending,
            progress: 0,
            current_phase: "pending".to_string(),
            agents: agent_types.iter().copied().map(AgentStatus::idle).collect(),
            findings: Vec::new(),
            report: None,
            errors: Vec::new(),
            metadata: ProjectMetadata {
                started_at: Utc::now(),
                completed_at: None,
                total_tokens: 0,
                sources_count: 0,
                searches_count: 0,
            },
            paused_from: None,
        }
    }

    /// Raise progress to `value`; progress never moves backwards
    pub fn advance_progress(&mut self, value: u8) {
        self.progress = self.progress.max(value.min(100));
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn agent_status_mut(&mut self, agent_type: AgentType) -> Option<&mut AgentStatus> {
        self.agents.iter_mut().find(|a| a.agent_type == agent_type)
    }

    pub fn agent_status(&self, agent_type: AgentType) -> Option<&AgentStatus> {
        self.agents.iter().find(|a| a.agent_type == agent_type)
    }

    pub fn record_error(
        &mut self,
        message: impl Into<String>,
        agent_type: Option<AgentType>,
        task_id: Option<String>,
        recoverable: bool,
    ) {
        self.errors.push(ProjectError {
            message: message.into(),
            agent_type,
            task_id,
            recoverable,
            timestamp: Utc::now(),
        });
    }
}

/// Persists project rows and their JSON snapshots
pub struct ProjectManager {
    conn: Arc<Mutex<Connection>>,
}

impl ProjectManager {
    pub fn new(db: &DossierDb) -> Self {
        Self {
            conn: db.connection(),
        }
    }

    /// Create the project row and an empty shared context seeded with the
    /// key questions. Fails if the id already exists.
    pub fn create(&self, id: &str, name: &str, target: &str, scoping: &ScopingInput) -> Result<()> {
        let mut conn = self.conn.lock().map_err(lock_error)?;
        let tx = conn.transaction()?;

        let exists: bool = tx
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM projects WHERE id = ?1)",
                params![id],
                |row| row.get(0),
            )
            .context("Failed to check project id")?;
        if exists {
            anyhow::bail!("Project already exists: {}", id);
        }

        let now = db_time(&Utc::now());
        let questions: Vec<&str> = scoping.questions.iter().map(|q| q.text.as_str()).collect();

        tx.execute(
            r#"
            INSERT INTO projects (id, name, target, status, scoping_json, data, created_at, updated_at)
            VALUES (?1, ?2, ?3, 'pending', ?4, NULL, ?5, ?5)
            "#,
            params![id, name, target, serde_json::to_string(scoping)?, now],
        )
        .context("Failed to create project")?;

        tx.execute(
            r#"
            INSERT INTO shared_contexts (project_id, target, key_questions_json, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![id, target, serde_json::to_string(&questions)?, now],
        )
        .context("Failed to create shared context")?;

        tx.commit()?;
        Ok(())
    }

    /// Store the current snapshot of a project
    pub fn save(&self, project: &Project) -> Result<()> {
        let conn = self.conn.lock().map_err(lock_error)?;

        let affected = conn
            .execute(
                r#"
                UPDATE projects
                SET name = ?2, status = ?3, data = ?4, updated_at = ?5
                WHERE id = ?1
                "#,
                params![
                    project.id,
                    project.name,
                    project.status.as_str(),
                    serde_json::to_string(project)?,
                    db_time(&Utc::now()),
                ],
            )
            .context("Failed to save project")?;

        if affected == 0 {
            anyhow::bail!("Project not found: {}", project.id);
        }
        Ok(())
    }

    /// Load a project snapshot. Projects created but never saved are
    /// rebuilt from their scoping input.
    pub fn load(&self, id: &str) -> Result<Option<Project>> {
        let conn = self.conn.lock().map_err(lock_error)?;

        let row: Option<(Option<String>, ScopingInput)> = conn
            .query_row(
                "SELECT data, scoping_json FROM projects WHERE id = ?1",
                params![id],
                |row| Ok((row.get(0)?, json_column(row, 1)?)),
            )
            .optional()
            .context("Failed to load project")?;

        match row {
            Some((Some(data), _)) => Ok(Some(serde_json::from_str(&data)?)),
            Some((None, scoping)) => Ok(Some(Project::new(id, scoping, &[]))),
            None => Ok(None),
        }
    }

    /// All persisted projects, newest first
    pub fn list(&self) -> Result<Vec<Project>> {
        let ids: Vec<String> = {
            let conn = self.conn.lock().map_err(lock_error)?;
            let mut stmt = conn.prepare("SELECT id FROM projects ORDER BY created_at DESC, id")?;
            let rows = stmt.query_map([], |row| row.get(0))?;
            rows.collect::<Result<Vec<_>, _>>()
                .context("Failed to list projects")?
        };

        let mut projects = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(project) = self.load(&id)? {
                projects.push(project);
            }
        }
        Ok(projects)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scoping() -> ScopingInput {
        ScopingInput::new("Acme").with_question(
            "What is Acme's revenue?",
            QuestionCategory::Financial,
            Some(Priority::Critical),
        )
    }

    #[test]
    fn test_priority_weights() {
        assert_eq!(Priority::weight(Some(Priority::Critical)), 4);
        assert_eq!(Priority::weight(Some(Priority::High)), 3);
        assert_eq!(Priority::weight(Some(Priority::Medium)), 2);
        assert_eq!(Priority::weight(Some(Priority::Low)), 1);
        assert_eq!(Priority::weight(None), 2);
    }

    #[test]
    fn test_unknown_category_is_general() {
        let q: KeyQuestion =
            serde_json::from_str(r#"{"category":"astrology","priority":"low"}"#).unwrap();
        assert_eq!(q.category, QuestionCategory::General);
        assert_eq!(q.priority, Some(Priority::Low));
        assert!(q.text.is_empty());
    }

    #[test]
    fn test_progress_never_decreases() {
        let mut project = Project::new("p1", scoping(), &[AgentType::Researcher]);
        project.advance_progress(40);
        project.advance_progress(10);
        assert_eq!(project.progress, 40);
        project.advance_progress(250);
        assert_eq!(project.progress, 100);
    }

    #[test]
    fn test_create_rejects_duplicate_id() {
        let db = DossierDb::open_in_memory().unwrap();
        let mgr = ProjectManager::new(&db);
        let input = scoping();

        mgr.create("p1", "Acme research", "Acme", &input).unwrap();
        let err = mgr.create("p1", "Acme research", "Acme", &input).unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn test_save_and_load_snapshot() {
        let db = DossierDb::open_in_memory().unwrap();
        let mgr = ProjectManager::new(&db);
        let input = scoping();
        mgr.create("p1", "Acme research", "Acme", &input).unwrap();

        // Unsaved projects come back rebuilt from the scoping input
        let fresh = mgr.load("p1").unwrap().unwrap();
        assert_eq!(fresh.status, ProjectStatus::Pending);
        assert_eq!(fresh.scoping, input);

        let mut project = Project::new("p1", input, &[AgentType::Researcher]);
        project.status = ProjectStatus::Researching;
        project.advance_progress(40);
        mgr.save(&project).unwrap();

        let loaded = mgr.load("p1").unwrap().unwrap();
        assert_eq!(loaded, project);
        assert!(mgr.load("missing").unwrap().is_none());
        assert_eq!(mgr.list().unwrap().len(), 1);
    }
}

//! # Shared Store Facade
//!
//! The one handle agents and the orchestrator use to reach persisted state.
//! Wraps every manager over a single [`DossierDb`]; share it as
//! `Arc<SharedStore>`.

use anyhow::{Context, Result};
use chrono::Duration;
use std::path::Path;

use super::db::DossierDb;
use super::findings::{Finding, FindingManager};
use super::project_state::{Project, ProjectManager, ScopingInput};
use super::reports::{Report, ReportManager};
use super::shared_context::{ContextManager, SharedContext, SharedContextUpdate};
use super::sources::{Source, SourceManager};
use super::lock_error;
use crate::memory::SqliteMemoryService;

pub struct SharedStore {
    db: DossierDb,
    projects: ProjectManager,
    findings: FindingManager,
    sources: SourceManager,
    contexts: ContextManager,
    reports: ReportManager,
    memory: SqliteMemoryService,
}

impl SharedStore {
    pub fn new(db: DossierDb) -> Self {
        Self {
            projects: ProjectManager::new(&db),
            findings: FindingManager::new(&db),
            sources: SourceManager::new(&db),
            contexts: ContextManager::new(&db),
            reports: ReportManager::new(&db),
            memory: SqliteMemoryService::new(&db),
            db,
        }
    }

    pub fn open_at<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self::new(DossierDb::open_at(path)?))
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::new(DossierDb::open_in_memory()?))
    }

    /// Give memory entries written without an explicit TTL an expiry
    pub fn with_memory_ttl(mut self, ttl: Duration) -> Self {
        self.memory = self.memory.with_default_ttl(ttl);
        self
    }

    pub fn db(&self) -> &DossierDb {
        &self.db
    }

    pub fn memory(&self) -> &SqliteMemoryService {
        &self.memory
    }

    // =========================================================================
    // Projects
    // =========================================================================

    pub fn create_project(
        &self,
        id: &str,
        name: &str,
        target: &str,
        scoping: &ScopingInput,
    ) -> Result<()> {
        self.projects.create(id, name, target, scoping)
    }

    pub fn save_project(&self, project: &Project) -> Result<()> {
        self.projects.save(project)
    }

    pub fn load_project(&self, id: &str) -> Result<Option<Project>> {
        self.projects.load(id)
    }

    pub fn list_projects(&self) -> Result<Vec<Project>> {
        self.projects.list()
    }

    // =========================================================================
    // Findings and sources
    // =========================================================================

    pub fn store_finding(&self, finding: Finding) -> Result<Finding> {
        self.findings.store(finding)
    }

    pub fn get_findings(&self, project_id: &str, question_id: Option<&str>) -> Result<Vec<Finding>> {
        self.findings.list(project_id, question_id)
    }

    pub fn register_source(&self, project_id: &str, source: Source) -> Result<Source> {
        self.sources.register(project_id, source)
    }

    pub fn get_sources(&self, project_id: &str) -> Result<Vec<Source>> {
        self.sources.list(project_id)
    }

    // =========================================================================
    // Shared context
    // =========================================================================

    pub fn get_shared_context(&self, project_id: &str) -> Result<Option<SharedContext>> {
        self.contexts.get(project_id)
    }

    pub fn update_shared_context(
        &self,
        project_id: &str,
        update: SharedContextUpdate,
    ) -> Result<Option<SharedContext>> {
        self.contexts.update(project_id, update)
    }

    pub fn add_completed_task(&self, project_id: &str, description: &str) -> Result<bool> {
        self.contexts.add_completed_task(project_id, description)
    }

    pub fn add_discovered_insight(&self, project_id: &str, insight: &str) -> Result<bool> {
        self.contexts.add_insight(project_id, insight)
    }

    /// Persist everything one finished task produced in a single
    /// transaction: new findings, sources, insights (also kept as memories
    /// from `origin`) and the task's completion. Findings that already
    /// carry an id are passed through untouched. Nothing is written when
    /// any step fails.
    pub fn commit_task_output(
        &self,
        project_id: &str,
        task_description: &str,
        origin: &str,
        findings: Vec<Finding>,
        sources: Vec<Source>,
        insights: &[String],
    ) -> Result<(Vec<Finding>, Vec<Source>)> {
        let shared = self.db.connection();
        let mut conn = shared.lock().map_err(lock_error)?;
        let tx = conn.transaction()?;

        let findings = findings
            .into_iter()
            .map(|finding| {
                if finding.id.is_empty() {
                    FindingManager::store_in(&tx, finding)
                } else {
                    Ok(finding)
                }
            })
            .collect::<Result<Vec<_>>>()?;
        let sources = sources
            .into_iter()
            .map(|source| SourceManager::register_in(&tx, project_id, source))
            .collect::<Result<Vec<_>>>()?;

        ContextManager::record_task_in(&tx, project_id, task_description, insights)?;
        for insight in insights {
            self.memory
                .remember_in(&tx, project_id, insight, "insight", origin, None)?;
        }

        tx.commit()
            .with_context(|| format!("Failed to commit output of '{}'", task_description))?;
        Ok((findings, sources))
    }

    // =========================================================================
    // Reports, memory, prompts
    // =========================================================================

    pub fn save_report(&self, report: &Report) -> Result<()> {
        self.reports.save(report)
    }

    pub fn get_report(&self, project_id: &str) -> Result<Option<Report>> {
        self.reports.get(project_id)
    }

    pub fn report_count(&self, project_id: &str) -> Result<usize> {
        self.reports.count(project_id)
    }

    pub fn clean_expired_memories(&self) -> Result<usize> {
        self.memory.clean_expired()
    }

    /// Stored system prompt for `slug`, or `fallback` when none is stored
    pub fn prompt_or(&self, slug: &str, fallback: &str) -> String {
        self.db
            .get_prompt(slug)
            .unwrap_or_else(|_| fallback.to_string())
    }
}

//! # Research Orchestrator
//!
//! Drives each project through the fixed phase sequence:
//!
//! ```text
//! Planning → PrimaryResearch → DeepAnalysis → Synthesis → Finalization → Done
//! ```
//!
//! `start_project` validates and plans synchronously, then hands the project
//! to a runner task. The runner checks for a pause before every phase; a
//! paused project finishes its current batch, then halts at the next phase
//! boundary until `resume_project` restarts it there.
//!
//! The orchestrator owns the live [`Project`] records. The scheduler only
//! touches them through the [`BatchObserver`] callbacks implemented here.

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{broadcast, Notify};
use tracing::Instrument;

use super::events::{EventBus, ResearchEvent, ResearchEventKind};
use super::pipeline::{Phase, Pipeline};
use super::planner::{self, ResearchPlan, TaskDefinition};
use super::scheduler::{BatchObserver, TaskScheduler};
use crate::agents::{AgentRegistry, AgentResult, AgentType, TaskContext};
use crate::config::OrchestratorConfig;
use crate::error::{DossierError, Result};
use crate::state::{
    AgentState, Project, ProjectStatus, ScopingInput, SharedContextUpdate, SharedStore,
};

const SYNTHESIS_TASK_ID: &str = "task-synthesis";

/// Per-agent-type task accounting
#[derive(Debug, Clone, Copy, Default)]
struct AgentTally {
    planned: usize,
    done: usize,
    in_flight: usize,
    failed: usize,
}

/// Live state of one project
struct ProjectRecord {
    project: Project,
    plan: ResearchPlan,
    tallies: HashMap<AgentType, AgentTally>,
    /// Tasks that finished (either outcome) so far
    finished_tasks: HashSet<String>,
    /// Phase the runner stopped before because the project was paused
    halted_at: Option<Phase>,
    runner_active: bool,
}

type ProjectHandle = Arc<Mutex<ProjectRecord>>;

struct Inner {
    config: OrchestratorConfig,
    store: Arc<SharedStore>,
    scheduler: TaskScheduler,
    registry: AgentRegistry,
    events: EventBus,
    projects: RwLock<HashMap<String, ProjectHandle>>,
    /// Signalled whenever a project completes, fails or halts
    settled: Notify,
}

/// Cloneable handle to the orchestration engine
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig, store: Arc<SharedStore>, registry: AgentRegistry) -> Self {
        let scheduler = TaskScheduler::new(
            registry.clone(),
            Arc::clone(&store),
            config.max_concurrency,
            config.task_timeout(),
        );
        let events = EventBus::new(config.event_capacity);

        Self {
            inner: Arc::new(Inner {
                config,
                store,
                scheduler,
                registry,
                events,
                projects: RwLock::new(HashMap::new()),
                settled: Notify::new(),
            }),
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &Arc<SharedStore> {
        &self.inner.store
    }

    /// Receive every lifecycle event emitted from now on
    pub fn subscribe(&self) -> broadcast::Receiver<ResearchEvent> {
        self.inner.events.subscribe()
    }

    // =========================================================================
    // Inbound operations
    // =========================================================================

    /// Validate and plan `input`, create the project record, and start the
    /// workflow in the background. Returns the initial snapshot.
    ///
    /// Invalid input or a missing agent fails here, before any record exists.
    pub fn start_project(&self, input: ScopingInput) -> Result<Project> {
        let scoping = planner::validate(&input)?;
        let project_id = format!("project-{}", uuid::Uuid::new_v4());
        let plan = planner::plan(&project_id, &scoping);
        planner::check_registry(&plan, &self.inner.registry)?;

        let mut agent_types = plan.agent_types();
        if !agent_types.contains(&AgentType::ReportWriter) {
            agent_types.push(AgentType::ReportWriter);
        }
        let tallies = agent_types
            .iter()
            .map(|t| {
                let planned = match t {
                    AgentType::ReportWriter => 1,
                    other => plan.count_for(*other),
                };
                (
                    *t,
                    AgentTally {
                        planned,
                        ..Default::default()
                    },
                )
            })
            .collect();

        let project = Project::new(&project_id, scoping, &agent_types);
        let store = &self.inner.store;
        store.create_project(
            &project.id,
            &project.name,
            &project.scoping.target,
            &project.scoping,
        )?;
        store.save_project(&project)?;

        tracing::info!(
            "Created project {} for '{}' with {} planned tasks",
            project.id,
            project.scoping.target,
            plan.len()
        );

        let handle = Arc::new(Mutex::new(ProjectRecord {
            project: project.clone(),
            plan,
            tallies,
            finished_tasks: HashSet::new(),
            halted_at: None,
            runner_active: true,
        }));
        self.inner
            .projects
            .write()
            .insert(project_id.clone(), Arc::clone(&handle));

        self.emit(
            ResearchEventKind::ProjectCreated,
            &project_id,
            json!({
                "name": project.name,
                "target": project.scoping.target,
                "status": project.status,
            }),
        );

        tokio::spawn(self.clone().run(project_id, handle, Phase::Planning));
        Ok(project)
    }

    /// Stop phase advancement. Tasks already dispatched still run to
    /// completion. Pausing a paused project is a no-op.
    pub fn pause_project(&self, project_id: &str) -> Result<Project> {
        let handle = self.live_handle(project_id, "pause")?;

        let snapshot = {
            let mut record = handle.lock();
            match record.project.status {
                ProjectStatus::Paused => return Ok(record.project.clone()),
                status if status.is_terminal() => {
                    return Err(DossierError::InvalidTransition {
                        action: "pause",
                        status,
                    })
                }
                status => {
                    record.project.paused_from = Some(status);
                    record.project.status = ProjectStatus::Paused;
                }
            }
            record.project.clone()
        };

        tracing::info!("Paused project {}", project_id);
        self.checkpoint(&snapshot)?;
        Ok(snapshot)
    }

    /// Continue a paused project. A runner still draining its batch just
    /// carries on; a halted runner is restarted at the phase it stopped
    /// before.
    pub fn resume_project(&self, project_id: &str) -> Result<Project> {
        let handle = self.live_handle(project_id, "resume")?;

        let (snapshot, restart_at) = {
            let mut record = handle.lock();
            if record.project.status != ProjectStatus::Paused {
                return Err(DossierError::InvalidTransition {
                    action: "resume",
                    status: record.project.status,
                });
            }

            let previous = record
                .project
                .paused_from
                .take()
                .unwrap_or(ProjectStatus::Pending);
            record.project.status = previous;

            let restart_at = if record.runner_active {
                None
            } else {
                record.runner_active = true;
                Some(record.halted_at.take().unwrap_or(Phase::Planning))
            };
            (record.project.clone(), restart_at)
        };

        self.checkpoint(&snapshot)?;
        if let Some(phase) = restart_at {
            tracing::info!("Resuming project {} at {}", project_id, phase.label());
            tokio::spawn(self.clone().run(project_id.to_string(), handle, phase));
        } else {
            tracing::info!("Resumed project {} (runner still active)", project_id);
        }
        Ok(snapshot)
    }

    /// Live snapshot, or the persisted snapshot for projects this
    /// orchestrator is not running
    pub fn get_project(&self, project_id: &str) -> Result<Option<Project>> {
        if let Some(handle) = self.inner.projects.read().get(project_id) {
            return Ok(Some(handle.lock().project.clone()));
        }
        Ok(self.inner.store.load_project(project_id)?)
    }

    /// Snapshots of every live project, oldest first
    pub fn get_all_projects(&self) -> Vec<Project> {
        let mut projects: Vec<Project> = self
            .inner
            .projects
            .read()
            .values()
            .map(|handle| handle.lock().project.clone())
            .collect();
        projects.sort_by(|a, b| a.metadata.started_at.cmp(&b.metadata.started_at));
        projects
    }

    /// Resolve once the project is terminal, or paused with its runner
    /// halted
    pub async fn wait_until_settled(&self, project_id: &str) -> Result<Project> {
        loop {
            // Registered before the check so a settle in between is not missed
            let notified = self.inner.settled.notified();

            let handle = self.inner.projects.read().get(project_id).cloned();
            let Some(handle) = handle else {
                return self
                    .inner
                    .store
                    .load_project(project_id)?
                    .ok_or_else(|| DossierError::ProjectNotFound(project_id.to_string()));
            };

            {
                let record = handle.lock();
                let halted =
                    record.project.status == ProjectStatus::Paused && !record.runner_active;
                if record.project.is_terminal() || halted {
                    return Ok(record.project.clone());
                }
            }

            notified.await;
        }
    }

    // =========================================================================
    // Runner
    // =========================================================================

    #[tracing::instrument(name = "project_runner", skip(self, handle, start), fields(start = start.label()))]
    async fn run(self, project_id: String, handle: ProjectHandle, start: Phase) {
        let mut pipeline = Pipeline::starting_at(start);

        loop {
            let phase = pipeline.phase;

            match self.begin_phase(&handle, phase) {
                Ok(true) => {}
                Ok(false) => return,
                Err(e) => return self.fail(&handle, e),
            }

            if phase == Phase::Done {
                if let Err(e) = self.complete(&handle) {
                    self.fail(&handle, e);
                }
                return;
            }

            let runner = self.clone();
            let phase_handle = Arc::clone(&handle);
            let outcome =
                contain_phase(phase, async move { runner.run_phase(&phase_handle, phase).await })
                    .await;
            if let Err(e) = outcome.and_then(|_| self.end_phase(&handle, phase)) {
                return self.fail(&handle, e);
            }

            pipeline.advance();
        }
    }

    async fn run_phase(&self, handle: &ProjectHandle, phase: Phase) -> Result<()> {
        match phase {
            Phase::Planning => self.planning(handle),
            Phase::PrimaryResearch | Phase::DeepAnalysis => self.research_batch(handle, phase).await,
            Phase::Synthesis => self.synthesis(handle).await,
            Phase::Finalization => self.finalization(handle),
            Phase::Done => Ok(()),
        }
    }

    /// Enter `phase`, or halt the runner if the project is paused.
    /// Returns `false` when the runner must stop.
    fn begin_phase(&self, handle: &ProjectHandle, phase: Phase) -> Result<bool> {
        let (snapshot, halted) = {
            let mut record = handle.lock();
            if record.project.is_terminal() {
                record.runner_active = false;
                return Ok(false);
            }

            if record.project.status == ProjectStatus::Paused {
                record.halted_at = Some(phase);
                record.runner_active = false;
                (record.project.clone(), true)
            } else {
                if phase != Phase::Done {
                    record.project.status = phase.status();
                    record.project.current_phase = phase.label().to_string();
                    record.project.advance_progress(phase.entry_progress());
                }
                (record.project.clone(), false)
            }
        };

        if halted {
            tracing::info!("Project {} halted before {}", snapshot.id, phase.label());
            self.checkpoint(&snapshot)?;
            self.inner.settled.notify_waiters();
            return Ok(false);
        }

        if phase != Phase::Done {
            tracing::info!(
                "Project {} entering {} ({}%)",
                snapshot.id,
                phase.label(),
                snapshot.progress
            );
            self.checkpoint(&snapshot)?;
        }
        Ok(true)
    }

    fn end_phase(&self, handle: &ProjectHandle, phase: Phase) -> Result<()> {
        let snapshot = {
            let mut record = handle.lock();
            record.project.advance_progress(phase.exit_progress());
            record.project.clone()
        };
        tracing::info!(
            "Project {} finished {} ({}%)",
            snapshot.id,
            phase.label(),
            snapshot.progress
        );
        self.checkpoint(&snapshot)
    }

    /// Persist the pending task list into the shared context
    fn planning(&self, handle: &ProjectHandle) -> Result<()> {
        let (project_id, descriptions) = {
            let record = handle.lock();
            (record.project.id.clone(), record.plan.descriptions())
        };

        self.inner
            .store
            .update_shared_context(&project_id, SharedContextUpdate::pending_tasks(descriptions))?
            .ok_or_else(|| DossierError::ProjectNotFound(project_id.clone()))?;
        Ok(())
    }

    /// Primary research or deep analysis: one bounded batch
    async fn research_batch(&self, handle: &ProjectHandle, phase: Phase) -> Result<()> {
        let (tasks, completed) = {
            let record = handle.lock();
            let tasks = match phase {
                Phase::PrimaryResearch => record.plan.primary_tasks(),
                _ => record.plan.analysis_tasks(),
            };
            // Skip anything a previous run of this phase already finished
            let tasks: Vec<TaskDefinition> = tasks
                .into_iter()
                .filter(|t| !record.finished_tasks.contains(&t.id))
                .collect();
            (tasks, record.finished_tasks.clone())
        };

        let observer = Arc::new(ProjectObserver {
            handle: Arc::clone(handle),
            events: self.inner.events.clone(),
            phase,
        });
        let report = self
            .inner
            .scheduler
            .run_batch(phase.label(), tasks, &completed, observer)
            .await?;

        if report.failed > 0 {
            tracing::warn!(
                "{}: {} of {} tasks failed",
                phase.label(),
                report.failed,
                report.total
            );
        }
        Ok(())
    }

    /// Run the report agent once, outside the batch path
    async fn synthesis(&self, handle: &ProjectHandle) -> Result<()> {
        let task = {
            let record = handle.lock();
            let scoping = &record.project.scoping;
            let mut context = TaskContext::new(&record.project.id, &scoping.target);
            context.context = scoping.context.clone();
            context.data_sources = scoping.data_sources;
            TaskDefinition::new(SYNTHESIS_TASK_ID, AgentType::ReportWriter, context)
        };

        let observer = ProjectObserver {
            handle: Arc::clone(handle),
            events: self.inner.events.clone(),
            phase: Phase::Synthesis,
        };
        observer.task_started(&task);

        let result = match self.inner.scheduler.execute_direct(&task).await {
            Ok(result) => result,
            Err(e) => {
                let mut record = handle.lock();
                if let Some(status) = record.project.agent_status_mut(AgentType::ReportWriter) {
                    status.state = AgentState::Error;
                    status.current_task = None;
                    status.completed_at = Some(Utc::now());
                }
                return Err(e);
            }
        };
        observer.task_finished(&task, &result);

        if result.success {
            let project_id = task.context.project_id.as_str();
            if let Some(report) = self.inner.store.get_report(project_id)? {
                self.emit(
                    ResearchEventKind::ReportCompleted,
                    project_id,
                    json!({
                        "report_id": report.id,
                        "title": report.title,
                        "word_count": report.metadata.word_count,
                        "confidence_score": report.metadata.confidence_score,
                    }),
                );
                handle.lock().project.report = Some(report);
            }
        }
        Ok(())
    }

    /// Reload findings, sources and report from the store and stamp
    /// completion
    fn finalization(&self, handle: &ProjectHandle) -> Result<()> {
        let project_id = handle.lock().project.id.clone();
        let store = &self.inner.store;

        let findings = store.get_findings(&project_id, None)?;
        let sources = store.get_sources(&project_id)?;
        let report = store.get_report(&project_id)?;
        let removed = store.clean_expired_memories()?;
        if removed > 0 {
            tracing::debug!("Removed {} expired memories", removed);
        }

        let mut record = handle.lock();
        let project = &mut record.project;
        project.findings = findings;
        project.metadata.sources_count = sources.len();
        project.metadata.completed_at = Some(Utc::now());
        if report.is_some() {
            project.report = report;
        }
        Ok(())
    }

    fn complete(&self, handle: &ProjectHandle) -> Result<()> {
        let snapshot = {
            let mut record = handle.lock();
            let project = &mut record.project;
            project.status = ProjectStatus::Completed;
            project.current_phase = Phase::Done.label().to_string();
            project.advance_progress(Phase::Done.exit_progress());
            project.metadata.completed_at.get_or_insert_with(Utc::now);
            project.clone()
        };

        self.checkpoint(&snapshot)?;
        handle.lock().runner_active = false;

        tracing::info!(
            "Project {} completed: {} findings, {} errors, {} tokens",
            snapshot.id,
            snapshot.findings.len(),
            snapshot.errors.len(),
            snapshot.metadata.total_tokens
        );
        self.emit(
            ResearchEventKind::ProjectCompleted,
            &snapshot.id,
            json!({
                "findings": snapshot.findings.len(),
                "has_report": snapshot.report.is_some(),
                "errors": snapshot.errors.len(),
            }),
        );
        self.inner.settled.notify_waiters();
        Ok(())
    }

    /// Terminal failure: record, persist, announce. Never propagates.
    fn fail(&self, handle: &ProjectHandle, error: DossierError) {
        let agent = match &error {
            DossierError::AgentFault { agent, .. } => Some(*agent),
            DossierError::AgentNotRegistered(agent) => Some(*agent),
            _ => None,
        };
        let message = error.to_string();

        let snapshot = {
            let mut record = handle.lock();
            record.runner_active = false;
            record.halted_at = None;
            let project = &mut record.project;
            project.status = ProjectStatus::Failed;
            project.paused_from = None;
            let now = Utc::now();
            for status in project.agents.iter_mut() {
                if status.state == AgentState::Active {
                    status.state = AgentState::Error;
                    status.current_task = None;
                    status.completed_at = Some(now);
                }
            }
            project.record_error(message.clone(), agent, None, false);
            project.clone()
        };

        tracing::error!("Project {} failed: {}", snapshot.id, message);
        if let Err(e) = self.inner.store.save_project(&snapshot) {
            tracing::error!("Failed to persist failed project {}: {:#}", snapshot.id, e);
        }
        self.emit(
            ResearchEventKind::ProjectFailed,
            &snapshot.id,
            json!({ "error": message, "phase": snapshot.current_phase }),
        );
        self.inner.settled.notify_waiters();
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn live_handle(&self, project_id: &str, action: &'static str) -> Result<ProjectHandle> {
        if let Some(handle) = self.inner.projects.read().get(project_id) {
            return Ok(Arc::clone(handle));
        }
        // Persisted but not run by this orchestrator
        match self.inner.store.load_project(project_id)? {
            Some(project) => Err(DossierError::InvalidTransition {
                action,
                status: project.status,
            }),
            None => Err(DossierError::ProjectNotFound(project_id.to_string())),
        }
    }

    /// Persist a snapshot and announce the update
    fn checkpoint(&self, project: &Project) -> Result<()> {
        self.inner.store.save_project(project)?;
        self.emit(
            ResearchEventKind::ProjectUpdated,
            &project.id,
            json!({
                "status": project.status,
                "phase": project.current_phase,
                "progress": project.progress,
            }),
        );
        Ok(())
    }

    fn emit(&self, kind: ResearchEventKind, project_id: &str, payload: serde_json::Value) {
        self.inner
            .events
            .emit(ResearchEvent::new(kind, project_id).with_data(payload));
    }
}

/// Applies scheduler callbacks to one live project
struct ProjectObserver {
    handle: ProjectHandle,
    events: EventBus,
    phase: Phase,
}

impl ProjectObserver {
    fn emit(&self, kind: ResearchEventKind, project_id: &str, payload: serde_json::Value) {
        self.events
            .emit(ResearchEvent::new(kind, project_id).with_data(payload));
    }
}

impl BatchObserver for ProjectObserver {
    fn task_started(&self, task: &TaskDefinition) {
        {
            let mut record = self.handle.lock();
            record.tallies.entry(task.agent_type).or_default().in_flight += 1;
            if let Some(status) = record.project.agent_status_mut(task.agent_type) {
                status.state = AgentState::Active;
                status.current_task = Some(task.description.clone());
                status.started_at.get_or_insert_with(Utc::now);
            }
        }

        self.emit(
            ResearchEventKind::AgentStarted,
            &task.context.project_id,
            json!({
                "agent_type": task.agent_type,
                "task_id": task.id,
                "description": task.description,
                "phase": self.phase.label(),
            }),
        );
    }

    fn task_finished(&self, task: &TaskDefinition, result: &AgentResult) {
        {
            let mut record = self.handle.lock();
            record.finished_tasks.insert(task.id.clone());

            let tally = {
                let tally = record.tallies.entry(task.agent_type).or_default();
                tally.done += 1;
                tally.in_flight = tally.in_flight.saturating_sub(1);
                if !result.success {
                    tally.failed += 1;
                }
                *tally
            };

            let project = &mut record.project;
            project.metadata.total_tokens += result.tokens_used;
            project.metadata.searches_count += u64::from(result.searches);
            project.findings.extend(result.findings.iter().cloned());

            if let Some(status) = project.agent_status_mut(task.agent_type) {
                status.tokens_used += result.tokens_used;
                status.progress = ((tally.done * 100) / tally.planned.max(tally.done).max(1)) as u8;
                if tally.in_flight == 0 {
                    status.current_task = None;
                    status.state = if tally.failed > 0 {
                        AgentState::Error
                    } else {
                        AgentState::Completed
                    };
                    status.completed_at = Some(Utc::now());
                }
            }

            if !result.success {
                project.record_error(
                    result
                        .error
                        .clone()
                        .unwrap_or_else(|| "agent reported failure".to_string()),
                    Some(task.agent_type),
                    Some(task.id.clone()),
                    true,
                );
            }
        }

        let project_id = task.context.project_id.as_str();
        if result.success {
            for finding in &result.findings {
                self.emit(
                    ResearchEventKind::FindingDiscovered,
                    project_id,
                    json!({
                        "finding_id": finding.id,
                        "agent_type": finding.agent_type,
                        "title": finding.title,
                        "confidence": finding.confidence,
                    }),
                );
            }
            self.emit(
                ResearchEventKind::AgentCompleted,
                project_id,
                json!({
                    "agent_type": task.agent_type,
                    "task_id": task.id,
                    "findings": result.findings.len(),
                    "tokens_used": result.tokens_used,
                }),
            );
        } else {
            self.emit(
                ResearchEventKind::AgentError,
                project_id,
                json!({
                    "agent_type": task.agent_type,
                    "task_id": task.id,
                    "error": result.error,
                }),
            );
        }
    }

    fn batch_progress(&self, completed: usize, total: usize, percentage: u8) {
        let project_id = self.handle.lock().project.id.clone();
        self.emit(
            ResearchEventKind::AgentProgress,
            &project_id,
            json!({
                "phase": self.phase.label(),
                "completed": completed,
                "total": total,
                "percentage": percentage,
            }),
        );
    }
}

/// Drive a phase body in its own task; a panic or cancellation becomes
/// [`DossierError::PhaseAborted`] instead of taking the runner down
async fn contain_phase<F>(phase: Phase, body: F) -> Result<()>
where
    F: Future<Output = Result<()>> + Send + 'static,
{
    match tokio::spawn(body.in_current_span()).await {
        Ok(outcome) => outcome,
        Err(e) => {
            let reason = if e.is_panic() {
                "phase panicked".to_string()
            } else {
                e.to_string()
            };
            Err(DossierError::PhaseAborted {
                phase: phase.label(),
                reason,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::ResearchAgent;
    use crate::state::{Finding, QuestionCategory};
    use async_trait::async_trait;

    struct EchoAgent(AgentType);

    #[async_trait]
    impl ResearchAgent for EchoAgent {
        fn agent_type(&self) -> AgentType {
            self.0
        }

        async fn execute(&self, ctx: &TaskContext) -> anyhow::Result<AgentResult> {
            if self.0 == AgentType::ReportWriter {
                return Ok(AgentResult::success().with_tokens(10));
            }
            let title = ctx.question.clone().unwrap_or_else(|| "overview".to_string());
            Ok(AgentResult::success()
                .with_findings(vec![Finding::new("", self.0, title, "content")])
                .with_tokens(10))
        }
    }

    /// Returns one finding plus one insight for every task
    struct InsightAgent(AgentType);

    #[async_trait]
    impl ResearchAgent for InsightAgent {
        fn agent_type(&self) -> AgentType {
            self.0
        }

        async fn execute(&self, _ctx: &TaskContext) -> anyhow::Result<AgentResult> {
            Ok(AgentResult::success()
                .with_findings(vec![Finding::new("", self.0, "noted", "content")])
                .with_insights(vec!["worth a follow-up".to_string()]))
        }
    }

    fn orchestrator(registry: AgentRegistry) -> Orchestrator {
        let store = Arc::new(SharedStore::open_in_memory().unwrap());
        Orchestrator::new(OrchestratorConfig::default(), store, registry)
    }

    fn researcher_only() -> AgentRegistry {
        AgentRegistry::new()
            .register(Arc::new(EchoAgent(AgentType::Researcher)))
            .register(Arc::new(EchoAgent(AgentType::ReportWriter)))
    }

    #[tokio::test]
    async fn test_start_runs_to_completion() {
        let orch = orchestrator(researcher_only());
        let input = ScopingInput::new("Acme").with_question("Who founded Acme?", QuestionCategory::General, None);

        let started = orch.start_project(input).unwrap();
        assert_eq!(started.status, ProjectStatus::Pending);

        let done = orch.wait_until_settled(&started.id).await.unwrap();
        assert_eq!(done.status, ProjectStatus::Completed);
        assert_eq!(done.progress, 100);
        assert_eq!(done.findings.len(), 1);
        assert_eq!(done.metadata.total_tokens, 20);
        assert!(done.metadata.completed_at.is_some());

        let researcher = done.agent_status(AgentType::Researcher).unwrap();
        assert_eq!(researcher.state, AgentState::Completed);
        assert_eq!(researcher.progress, 100);

        let persisted = orch.store().load_project(&started.id).unwrap().unwrap();
        assert_eq!(persisted.status, ProjectStatus::Completed);
    }

    #[tokio::test]
    async fn test_missing_report_writer_fails_synchronously() {
        let registry = AgentRegistry::new().register(Arc::new(EchoAgent(AgentType::Researcher)));
        let orch = orchestrator(registry);
        let input = ScopingInput::new("Acme").with_question("q", QuestionCategory::General, None);

        let err = orch.start_project(input).unwrap_err();
        assert!(matches!(err, DossierError::AgentNotRegistered(AgentType::ReportWriter)));
        assert!(orch.get_all_projects().is_empty());
        assert!(orch.store().list_projects().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_pause_and_resume_rules() {
        let orch = orchestrator(researcher_only());
        assert!(matches!(
            orch.pause_project("nope"),
            Err(DossierError::ProjectNotFound(_))
        ));

        let input = ScopingInput::new("Acme").with_question("q", QuestionCategory::General, None);
        let project = orch.start_project(input).unwrap();
        let done = orch.wait_until_settled(&project.id).await.unwrap();
        assert_eq!(done.status, ProjectStatus::Completed);

        assert!(matches!(
            orch.pause_project(&project.id),
            Err(DossierError::InvalidTransition { action: "pause", .. })
        ));
        assert!(matches!(
            orch.resume_project(&project.id),
            Err(DossierError::InvalidTransition { action: "resume", .. })
        ));
    }

    #[tokio::test]
    async fn test_get_project_falls_back_to_store() {
        let store = Arc::new(SharedStore::open_in_memory().unwrap());
        let input = ScopingInput::new("Old").with_question("q", QuestionCategory::General, None);
        store.create_project("historic", "Old research", "Old", &input).unwrap();

        let orch = Orchestrator::new(OrchestratorConfig::default(), store, researcher_only());
        let project = orch.get_project("historic").unwrap().unwrap();
        assert_eq!(project.scoping.target, "Old");
        assert!(orch.get_project("missing").unwrap().is_none());
        assert!(orch.get_all_projects().is_empty());
    }

    #[tokio::test]
    async fn test_panicking_phase_becomes_error() {
        let outcome = contain_phase(Phase::Synthesis, async { panic!("boom") }).await;
        match outcome {
            Err(DossierError::PhaseAborted { phase, reason }) => {
                assert_eq!(phase, "synthesis");
                assert_eq!(reason, "phase panicked");
            }
            other => panic!("unexpected outcome: {:?}", other),
        }

        assert!(contain_phase(Phase::Planning, async { Ok(()) }).await.is_ok());
    }

    #[tokio::test]
    async fn test_unstorable_insights_fail_instead_of_hanging() {
        let store = SharedStore::open_in_memory()
            .unwrap()
            .with_memory_ttl(chrono::Duration::MAX);
        let registry = AgentRegistry::new()
            .register(Arc::new(InsightAgent(AgentType::Researcher)))
            .register(Arc::new(InsightAgent(AgentType::ReportWriter)));
        let orch = Orchestrator::new(OrchestratorConfig::default(), Arc::new(store), registry);
        let input = ScopingInput::new("Acme").with_question("q", QuestionCategory::General, None);

        let project = orch.start_project(input).unwrap();
        let done = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            orch.wait_until_settled(&project.id),
        )
        .await
        .expect("project never settled")
        .unwrap();

        assert_eq!(done.status, ProjectStatus::Failed);
        assert!(done.findings.is_empty());

        // The research task failure is recoverable, the synthesis one is not
        let research = done
            .errors
            .iter()
            .find(|e| e.agent_type == Some(AgentType::Researcher))
            .unwrap();
        assert!(research.recoverable);
        assert!(research.message.contains("failed to persist results"));
        assert!(done.errors.iter().any(|e| !e.recoverable));

        for status in &done.agents {
            assert_ne!(status.state, AgentState::Active);
        }
    }
}

//! # Task Scheduler
//!
//! Runs a batch of task definitions against the agent registry with a
//! global concurrency cap.
//!
//! ## Execution model
//!
//! ```text
//! tasks ─► dependency waves ─► acquire permit ─► spawn ─► agent.execute (own task, timeout)
//!                                     ▲                           │
//!                                     └──── permit released ◄─────┘ persist envelope, notify
//! ```
//!
//! - Admission uses an owned [`Semaphore`] permit taken *before* spawning,
//!   so submission blocks while the cap is reached.
//! - Every agent call runs in its own task; panics, `Err` returns and
//!   timeouts all turn into a failed [`AgentResult`] and never abort
//!   sibling tasks.
//! - A task's output is committed in one store transaction; when the
//!   commit fails the task is failed and nothing of it is kept.
//! - Every dispatched task reaches [`BatchObserver::task_finished`] exactly
//!   once, even when its worker dies.
//! - A batch returns only after every spawned task has resolved.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use super::planner::TaskDefinition;
use crate::agents::{AgentRegistry, AgentResult, ResearchAgent, TaskContext};
use crate::error::{DossierError, Result};
use crate::state::SharedStore;

/// Summary of one drained batch
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchReport {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Highest number of tasks observed in flight at once
    pub peak_in_flight: usize,
}

/// Callbacks through which the scheduler reports to its owner.
///
/// Called from worker tasks; implementations must not block.
pub trait BatchObserver: Send + Sync {
    fn task_started(&self, task: &TaskDefinition);

    /// `result.findings` carry their store-assigned ids
    fn task_finished(&self, task: &TaskDefinition, result: &AgentResult);

    fn batch_progress(&self, completed: usize, total: usize, percentage: u8);
}

/// Observer that ignores everything
pub struct NoopObserver;

impl BatchObserver for NoopObserver {
    fn task_started(&self, _task: &TaskDefinition) {}
    fn task_finished(&self, _task: &TaskDefinition, _result: &AgentResult) {}
    fn batch_progress(&self, _completed: usize, _total: usize, _percentage: u8) {}
}

/// How an agent call ended
enum Execution {
    Finished(AgentResult),
    Fault(String),
}

#[derive(Clone)]
pub struct TaskScheduler {
    registry: AgentRegistry,
    store: Arc<SharedStore>,
    max_concurrency: usize,
    task_timeout: Duration,
}

impl TaskScheduler {
    pub fn new(
        registry: AgentRegistry,
        store: Arc<SharedStore>,
        max_concurrency: usize,
        task_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            store,
            max_concurrency: max_concurrency.max(1),
            task_timeout,
        }
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Split a batch into dependency waves. A dependency is satisfied by a
    /// task in `completed` or by a task in an earlier wave. Order inside a
    /// wave follows the input order.
    pub fn waves(
        tasks: Vec<TaskDefinition>,
        completed: &HashSet<String>,
    ) -> Result<Vec<Vec<TaskDefinition>>> {
        let batch_ids: HashSet<String> = tasks.iter().map(|t| t.id.clone()).collect();
        for task in &tasks {
            for dep in &task.dependencies {
                if !batch_ids.contains(dep) && !completed.contains(dep) {
                    return Err(DossierError::Dependency(format!(
                        "task {} depends on unknown task '{}'",
                        task.id, dep
                    )));
                }
            }
        }

        let mut done = completed.clone();
        let mut remaining = tasks;
        let mut waves = Vec::new();

        while !remaining.is_empty() {
            let (ready, blocked): (Vec<_>, Vec<_>) = remaining
                .into_iter()
                .partition(|t| t.dependencies.iter().all(|d| done.contains(d)));

            if ready.is_empty() {
                let stuck: Vec<&str> = blocked.iter().map(|t| t.id.as_str()).collect();
                return Err(DossierError::Dependency(format!(
                    "dependency cycle among tasks: {}",
                    stuck.join(", ")
                )));
            }

            done.extend(ready.iter().map(|t| t.id.clone()));
            waves.push(ready);
            remaining = blocked;
        }

        Ok(waves)
    }

    /// Execute a batch to completion. Only planning problems (unknown
    /// agents, bad dependencies) are errors; task failures are reported
    /// through the observer and counted in the report.
    pub async fn run_batch(
        &self,
        label: &str,
        tasks: Vec<TaskDefinition>,
        completed: &HashSet<String>,
        observer: Arc<dyn BatchObserver>,
    ) -> Result<BatchReport> {
        let total = tasks.len();
        if total == 0 {
            tracing::debug!("Batch '{}' is empty", label);
            return Ok(BatchReport::default());
        }

        for task in &tasks {
            if !self.registry.contains(task.agent_type) {
                return Err(DossierError::AgentNotRegistered(task.agent_type));
            }
        }
        let waves = Self::waves(tasks, completed)?;

        tracing::info!(
            "Batch '{}': {} tasks in {} wave(s), max concurrency {}",
            label,
            total,
            waves.len(),
            self.max_concurrency
        );

        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let finished = Arc::new(AtomicUsize::new(0));
        let mut report = BatchReport {
            total,
            ..Default::default()
        };

        for wave in waves {
            let mut join_set = JoinSet::new();
            // Slot -> task, cleared as workers report back
            let mut unresolved: HashMap<usize, TaskDefinition> = HashMap::new();

            for (slot, task) in wave.into_iter().enumerate() {
                let permit = Arc::clone(&semaphore)
                    .acquire_owned()
                    .await
                    .context("Scheduler semaphore closed")?;

                let Some(agent) = self.registry.get(task.agent_type) else {
                    return Err(DossierError::AgentNotRegistered(task.agent_type));
                };

                tracing::debug!("Dispatching {} to {}", task.id, task.agent_type);
                observer.task_started(&task);
                unresolved.insert(slot, task.clone());

                let store = Arc::clone(&self.store);
                let observer = Arc::clone(&observer);
                let in_flight = Arc::clone(&in_flight);
                let peak = Arc::clone(&peak);
                let finished = Arc::clone(&finished);
                let timeout = self.task_timeout;

                join_set.spawn(async move {
                    let _permit = permit; // Held until the task is fully accounted for
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);

                    let result = run_task(agent, store, task.clone(), timeout).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);

                    if !result.success {
                        tracing::warn!(
                            "Task {} ({}) failed: {}",
                            task.id,
                            task.agent_type,
                            result.error.as_deref().unwrap_or("unknown error")
                        );
                    }
                    observer.task_finished(&task, &result);

                    let done = finished.fetch_add(1, Ordering::SeqCst) + 1;
                    observer.batch_progress(done, total, percentage(done, total));
                    (slot, result.success)
                });
            }

            while let Some(joined) = join_set.join_next().await {
                match joined {
                    Ok((slot, succeeded)) => {
                        unresolved.remove(&slot);
                        if succeeded {
                            report.succeeded += 1;
                        } else {
                            report.failed += 1;
                        }
                    }
                    Err(e) => tracing::error!("Batch worker for '{}' died: {}", label, e),
                }
            }

            // Workers that died before reporting back still count as finished
            for task in unresolved.into_values() {
                let result = AgentResult::failure("task worker died before reporting");
                observer.task_finished(&task, &result);
                let done = finished.fetch_add(1, Ordering::SeqCst) + 1;
                observer.batch_progress(done, total, percentage(done, total));
                report.failed += 1;
            }
        }

        report.peak_in_flight = peak.load(Ordering::SeqCst);
        tracing::info!(
            "Batch '{}' drained: {}/{} succeeded, peak in flight {}",
            label,
            report.succeeded,
            report.total,
            report.peak_in_flight
        );
        Ok(report)
    }

    /// Run a single task outside the batch path, without a permit. Agent
    /// faults are returned as [`DossierError::AgentFault`]; a
    /// `success == false` envelope is returned as is.
    pub async fn execute_direct(&self, task: &TaskDefinition) -> Result<AgentResult> {
        let agent = self
            .registry
            .get(task.agent_type)
            .ok_or(DossierError::AgentNotRegistered(task.agent_type))?;

        match invoke(agent, task.context.clone(), self.task_timeout).await {
            Execution::Finished(result) if result.success => {
                Ok(commit_envelope(&self.store, task, result)?)
            }
            Execution::Finished(result) => Ok(result),
            Execution::Fault(reason) => Err(DossierError::AgentFault {
                agent: task.agent_type,
                reason,
            }),
        }
    }
}

fn percentage(done: usize, total: usize) -> u8 {
    ((done * 100) / total.max(1)).min(100) as u8
}

/// Invoke the agent and commit its envelope inside a task of its own, so a
/// panic anywhere on that path becomes a failed result
async fn run_task(
    agent: Arc<dyn ResearchAgent>,
    store: Arc<SharedStore>,
    task: TaskDefinition,
    timeout: Duration,
) -> AgentResult {
    let task_id = task.id.clone();
    let worker = tokio::spawn(async move {
        match invoke(agent, task.context.clone(), timeout).await {
            Execution::Finished(result) if result.success => commit_envelope(&store, &task, result)
                .unwrap_or_else(|e| {
                    AgentResult::failure(format!("failed to persist results: {:#}", e))
                }),
            Execution::Finished(result) => result,
            Execution::Fault(reason) => AgentResult::failure(reason),
        }
    });

    match worker.await {
        Ok(result) => result,
        Err(e) => {
            tracing::error!("Task {} aborted: {}", task_id, e);
            AgentResult::failure(format!("task aborted: {}", e))
        }
    }
}

/// Run one agent call in its own task so panics and timeouts stay contained
async fn invoke(agent: Arc<dyn ResearchAgent>, ctx: TaskContext, timeout: Duration) -> Execution {
    let mut handle = tokio::spawn(async move { agent.execute(&ctx).await });

    match tokio::time::timeout(timeout, &mut handle).await {
        Ok(Ok(Ok(result))) => Execution::Finished(result),
        Ok(Ok(Err(e))) => Execution::Fault(e.to_string()),
        Ok(Err(join_err)) if join_err.is_panic() => Execution::Fault("agent panicked".to_string()),
        Ok(Err(join_err)) => Execution::Fault(format!("agent task cancelled: {}", join_err)),
        Err(_) => {
            handle.abort();
            Execution::Fault(format!("timed out after {}s", timeout.as_secs_f32()))
        }
    }
}

/// Stamp new findings with the task's project, agent type and question,
/// then commit the envelope through the store in one transaction. Returns
/// the envelope with store-assigned ids.
fn commit_envelope(
    store: &SharedStore,
    task: &TaskDefinition,
    mut result: AgentResult,
) -> anyhow::Result<AgentResult> {
    let project_id = task.context.project_id.as_str();

    let findings = std::mem::take(&mut result.findings)
        .into_iter()
        .map(|mut finding| {
            if finding.id.is_empty() {
                finding.project_id = project_id.to_string();
                finding.agent_type = task.agent_type;
                if finding.agent_id.is_empty() {
                    finding.agent_id = task.agent_type.as_str().to_string();
                }
                if finding.question_id.is_none() {
                    finding.question_id = task.context.question_id.clone();
                }
            }
            finding
        })
        .collect();

    let (findings, sources) = store.commit_task_output(
        project_id,
        &task.description,
        task.agent_type.as_str(),
        findings,
        std::mem::take(&mut result.sources),
        &result.insights,
    )?;
    result.findings = findings;
    result.sources = sources;

    Ok(result)
}

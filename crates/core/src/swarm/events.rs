//! # Research Events
//!
//! Lifecycle notifications emitted by the orchestrator, and the broadcast
//! bus that fans them out to subscribers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Kind of lifecycle event
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResearchEventKind {
    ProjectCreated,
    /// Status, phase or progress changed
    ProjectUpdated,
    ProjectCompleted,
    ProjectFailed,
    AgentStarted,
    /// Batch progress `(completed, total, percentage)`
    AgentProgress,
    AgentCompleted,
    AgentError,
    FindingDiscovered,
    ReportCompleted,
}

impl ResearchEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProjectCreated => "project_created",
            Self::ProjectUpdated => "project_updated",
            Self::ProjectCompleted => "project_completed",
            Self::ProjectFailed => "project_failed",
            Self::AgentStarted => "agent_started",
            Self::AgentProgress => "agent_progress",
            Self::AgentCompleted => "agent_completed",
            Self::AgentError => "agent_error",
            Self::FindingDiscovered => "finding_discovered",
            Self::ReportCompleted => "report_completed",
        }
    }
}

/// An event in a project's lifecycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchEvent {
    pub id: String,
    pub kind: ResearchEventKind,
    pub project_id: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl ResearchEvent {
    pub fn new(kind: ResearchEventKind, project_id: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            project_id: project_id.to_string(),
            payload: serde_json::Value::Null,
            timestamp: Utc::now(),
        }
    }

    pub fn with_data(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

/// Synchronous fan-out of events to any number of subscribers
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ResearchEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ResearchEvent> {
        self.tx.subscribe()
    }

    /// Never blocks; slow subscribers lag instead of stalling the sender
    pub fn emit(&self, event: ResearchEvent) {
        tracing::trace!("event {} for {}", event.kind.as_str(), event.project_id);
        // No subscribers is fine
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_creation() {
        let event = ResearchEvent::new(ResearchEventKind::AgentStarted, "p1")
            .with_data(serde_json::json!({"agent_type": "researcher"}));

        assert_eq!(event.project_id, "p1");
        assert_eq!(event.payload["agent_type"], "researcher");
        assert!(uuid::Uuid::parse_str(&event.id).is_ok());

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "agent_started");
    }

    #[tokio::test]
    async fn test_bus_fan_out() {
        let bus = EventBus::new(8);
        // Emitting without subscribers must not fail
        bus.emit(ResearchEvent::new(ResearchEventKind::ProjectCreated, "p0"));

        let mut a = bus.subscribe();
        let mut b = bus.subscribe();
        bus.emit(ResearchEvent::new(ResearchEventKind::ProjectUpdated, "p1"));

        assert_eq!(a.recv().await.unwrap().kind, ResearchEventKind::ProjectUpdated);
        assert_eq!(b.recv().await.unwrap().project_id, "p1");
    }
}

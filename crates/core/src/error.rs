//! # Errors
//!
//! Typed errors for the orchestration boundary. Storage managers keep
//! returning `anyhow::Result`; those failures surface here as
//! [`DossierError::Persistence`].

use thiserror::Error;

use crate::agents::AgentType;
use crate::state::ProjectStatus;

/// Errors surfaced by the planner, scheduler and orchestrator
#[derive(Error, Debug)]
pub enum DossierError {
    /// Scoping input rejected before any project record exists
    #[error("invalid scoping input: {0}")]
    InvalidScoping(String),

    #[error("no agent registered for type '{0}'")]
    AgentNotRegistered(AgentType),

    #[error("project not found: {0}")]
    ProjectNotFound(String),

    #[error("cannot {action} project in status '{status}'")]
    InvalidTransition {
        action: &'static str,
        status: ProjectStatus,
    },

    /// Unknown dependency ids or a dependency cycle inside a batch
    #[error("task dependency error: {0}")]
    Dependency(String),

    /// An agent call failed outside the batch path (synthesis)
    #[error("agent {agent} failed: {reason}")]
    AgentFault { agent: AgentType, reason: String },

    /// A phase body died without returning (panic or cancellation)
    #[error("{phase} phase aborted: {reason}")]
    PhaseAborted { phase: &'static str, reason: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Persistence(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, DossierError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_error_message() {
        let err = DossierError::InvalidTransition {
            action: "pause",
            status: ProjectStatus::Completed,
        };
        assert_eq!(err.to_string(), "cannot pause project in status 'completed'");
    }

    #[test]
    fn test_persistence_is_transparent() {
        let err: DossierError = anyhow::anyhow!("disk full").into();
        assert_eq!(err.to_string(), "disk full");
        assert!(matches!(err, DossierError::Persistence(_)));
    }
}

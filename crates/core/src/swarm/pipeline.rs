//! # Workflow Phases
//!
//! The fixed phase sequence of a research project and the progress
//! checkpoint attached to each phase boundary.
//!
//! ```text
//! Planning → PrimaryResearch → DeepAnalysis → Synthesis → Finalization → Done
//! (initializing) (researching)   (analyzing)  (synthesizing) (reviewing) (completed)
//! ```

use serde::{Deserialize, Serialize};

use crate::state::ProjectStatus;

/// One step of the workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Planning,
    PrimaryResearch,
    DeepAnalysis,
    Synthesis,
    Finalization,
    Done,
}

impl Phase {
    pub fn label(&self) -> &'static str {
        match self {
            Phase::Planning => "planning",
            Phase::PrimaryResearch => "primary_research",
            Phase::DeepAnalysis => "deep_analysis",
            Phase::Synthesis => "synthesis",
            Phase::Finalization => "finalization",
            Phase::Done => "done",
        }
    }

    /// Project status while this phase runs
    pub fn status(&self) -> ProjectStatus {
        match self {
            Phase::Planning => ProjectStatus::Initializing,
            Phase::PrimaryResearch => ProjectStatus::Researching,
            Phase::DeepAnalysis => ProjectStatus::Analyzing,
            Phase::Synthesis => ProjectStatus::Synthesizing,
            Phase::Finalization => ProjectStatus::Reviewing,
            Phase::Done => ProjectStatus::Completed,
        }
    }

    /// Progress recorded when the phase is entered
    pub fn entry_progress(&self) -> u8 {
        match self {
            Phase::Planning => 5,
            other => other.previous().map(|p| p.exit_progress()).unwrap_or(0),
        }
    }

    /// Progress recorded once the phase has finished
    pub fn exit_progress(&self) -> u8 {
        match self {
            Phase::Planning => 10,
            Phase::PrimaryResearch => 40,
            Phase::DeepAnalysis => 70,
            Phase::Synthesis => 90,
            Phase::Finalization | Phase::Done => 100,
        }
    }

    pub fn next(&self) -> Phase {
        match self {
            Phase::Planning => Phase::PrimaryResearch,
            Phase::PrimaryResearch => Phase::DeepAnalysis,
            Phase::DeepAnalysis => Phase::Synthesis,
            Phase::Synthesis => Phase::Finalization,
            Phase::Finalization | Phase::Done => Phase::Done,
        }
    }

    fn previous(&self) -> Option<Phase> {
        match self {
            Phase::Planning => None,
            Phase::PrimaryResearch => Some(Phase::Planning),
            Phase::DeepAnalysis => Some(Phase::PrimaryResearch),
            Phase::Synthesis => Some(Phase::DeepAnalysis),
            Phase::Finalization => Some(Phase::Synthesis),
            Phase::Done => Some(Phase::Finalization),
        }
    }
}

/// Cursor over the phase sequence
#[derive(Debug, Clone)]
pub struct Pipeline {
    pub phase: Phase,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self {
            phase: Phase::Planning,
        }
    }
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an arbitrary phase (resuming a halted project)
    pub fn starting_at(phase: Phase) -> Self {
        Self { phase }
    }

    pub fn advance(&mut self) {
        self.phase = self.phase.next();
    }

    pub fn is_complete(&self) -> bool {
        self.phase == Phase::Done
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_advance() {
        let mut pipeline = Pipeline::new();
        let mut statuses = vec![pipeline.phase.status()];
        while !pipeline.is_complete() {
            pipeline.advance();
            statuses.push(pipeline.phase.status());
        }

        assert_eq!(
            statuses,
            vec![
                ProjectStatus::Initializing,
                ProjectStatus::Researching,
                ProjectStatus::Analyzing,
                ProjectStatus::Synthesizing,
                ProjectStatus::Reviewing,
                ProjectStatus::Completed,
            ]
        );
    }

    #[test]
    fn test_checkpoints_are_monotonic() {
        let mut pipeline = Pipeline::new();
        let mut checkpoints = Vec::new();
        while !pipeline.is_complete() {
            checkpoints.push(pipeline.phase.entry_progress());
            checkpoints.push(pipeline.phase.exit_progress());
            pipeline.advance();
        }

        assert_eq!(checkpoints.first(), Some(&5));
        assert_eq!(checkpoints.last(), Some(&100));
        assert!(checkpoints.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(Phase::DeepAnalysis.entry_progress(), 40);
    }

    #[test]
    fn test_done_is_absorbing() {
        let mut pipeline = Pipeline::starting_at(Phase::Done);
        pipeline.advance();
        assert_eq!(pipeline.phase, Phase::Done);
    }
}

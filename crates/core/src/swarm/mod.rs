//! # Research Orchestration
//!
//! Planning, bounded task execution and the phased project workflow.
//!
//! ## Pipeline Flow
//!
//! ```text
//! ScopingInput → Planner → Scheduler (primary research) → Scheduler (deep analysis)
//!              → Report writer (synthesis) → Finalization
//! ```

pub mod events;
pub mod orchestrator;
pub mod pipeline;
pub mod planner;
pub mod scheduler;

pub use events::{EventBus, ResearchEvent, ResearchEventKind};
pub use orchestrator::Orchestrator;
pub use pipeline::{Phase, Pipeline};
pub use planner::{ResearchPlan, TaskDefinition};
pub use scheduler::{BatchObserver, BatchReport, NoopObserver, TaskScheduler};

//! # Dossier Core
//!
//! Orchestration engine for multi-agent research projects.
//!
//! ## Architecture
//!
//! - `state/` - SQLite-backed shared store (projects, findings, sources, context, reports)
//! - `memory/` - TTL-aware ancillary memory entries
//! - `agents/` - The agent contract, registry and LLM-backed agents
//! - `swarm/` - Planner, bounded scheduler and the phased orchestrator
//! - `models` / `config` - LLM provider selection and orchestrator settings
//!
//! ## Usage
//!
//! ```rust,ignore
//! use dossier_core::state::{Priority, QuestionCategory};
//! use dossier_core::{AgentRegistry, Orchestrator, OrchestratorConfig, ScopingInput, SharedStore};
//!
//! let config = OrchestratorConfig::default();
//! let store = Arc::new(SharedStore::open_at(&config.database_path)?);
//! let registry = AgentRegistry::with_llm_agents(Arc::clone(&store), &config);
//! let orchestrator = Orchestrator::new(config, store, registry);
//!
//! let input = ScopingInput::new("Acme").with_question(
//!     "What drives Acme's revenue growth?",
//!     QuestionCategory::Financial,
//!     Some(Priority::High),
//! );
//! let project = orchestrator.start_project(input)?;
//! let finished = orchestrator.wait_until_settled(&project.id).await?;
//! ```

pub mod agents;
pub mod config;
pub mod error;
pub mod memory;
pub mod models;
pub mod state;
pub mod swarm;

pub use agents::{AgentRegistry, AgentResult, AgentType, ResearchAgent, TaskContext};
pub use config::{ConfigOverrides, OrchestratorConfig};
pub use error::{DossierError, Result};
pub use state::{Project, ProjectStatus, ScopingInput, SharedStore};
pub use swarm::{Orchestrator, ResearchEvent, ResearchEventKind};

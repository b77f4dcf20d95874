//! # Agents
//!
//! The unit-of-work contract the scheduler dispatches to, and the
//! LLM-backed implementations.
//!
//! An agent takes a [`TaskContext`] and returns an [`AgentResult`]
//! envelope. Expected domain failures (nothing found, rate limits) are
//! `success == false`; an `Err` is reserved for unexpected faults, which
//! the scheduler treats the same way.
//!
//! ## Agents
//!
//! | Type | Implementation | Focus |
//! |------|----------------|-------|
//! | `researcher` | [`ResearcherAgent`] | general research per question |
//! | `financial_analyst` | [`AnalystAgent`] | financials, valuation, financial risk |
//! | `market_analyst` | [`AnalystAgent`] | market, competitors, positioning |
//! | `report_writer` | [`ReportWriterAgent`] | synthesis of the final report |

pub mod analyst;
pub mod llm_helpers;
pub mod prompts;
pub mod report_writer;
pub mod researcher;

pub use analyst::AnalystAgent;
pub use report_writer::ReportWriterAgent;
pub use researcher::ResearcherAgent;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::OrchestratorConfig;
use crate::state::{DataSources, Finding, SharedStore, Source};

/// Key the registry dispatches on
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum AgentType {
    Researcher,
    FinancialAnalyst,
    MarketAnalyst,
    ReportWriter,
}

impl AgentType {
    pub fn all() -> [AgentType; 4] {
        [
            AgentType::Researcher,
            AgentType::FinancialAnalyst,
            AgentType::MarketAnalyst,
            AgentType::ReportWriter,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Researcher => "researcher",
            Self::FinancialAnalyst => "financial_analyst",
            Self::MarketAnalyst => "market_analyst",
            Self::ReportWriter => "report_writer",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "researcher" => Some(Self::Researcher),
            "financial_analyst" => Some(Self::FinancialAnalyst),
            "market_analyst" => Some(Self::MarketAnalyst),
            "report_writer" => Some(Self::ReportWriter),
            _ => None,
        }
    }

    /// Domain specialists run in the deep-analysis phase
    pub fn is_specialist(&self) -> bool {
        matches!(self, Self::FinancialAnalyst | Self::MarketAnalyst)
    }
}

impl std::fmt::Display for AgentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything an agent is told about its task
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskContext {
    pub project_id: String,
    pub target: String,
    #[serde(default)]
    pub question_id: Option<String>,
    #[serde(default)]
    pub question: Option<String>,
    /// Free-text background or task-specific instructions
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub data_sources: DataSources,
}

impl TaskContext {
    pub fn new(project_id: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            target: target.into(),
            question_id: None,
            question: None,
            context: None,
            data_sources: DataSources::default(),
        }
    }
}

/// Structured outcome of one agent execution
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AgentResult {
    pub success: bool,
    #[serde(default)]
    pub findings: Vec<Finding>,
    #[serde(default)]
    pub sources: Vec<Source>,
    #[serde(default)]
    pub insights: Vec<String>,
    #[serde(default)]
    pub tokens_used: u64,
    /// Lookups performed while producing this result
    #[serde(default)]
    pub searches: u32,
    #[serde(default)]
    pub error: Option<String>,
}

impl AgentResult {
    pub fn success() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn with_findings(mut self, findings: Vec<Finding>) -> Self {
        self.findings = findings;
        self
    }

    pub fn with_insights(mut self, insights: Vec<String>) -> Self {
        self.insights = insights;
        self
    }

    pub fn with_tokens(mut self, tokens: u64) -> Self {
        self.tokens_used = tokens;
        self
    }
}

/// The agent contract
#[async_trait]
pub trait ResearchAgent: Send + Sync {
    fn agent_type(&self) -> AgentType;

    async fn execute(&self, ctx: &TaskContext) -> anyhow::Result<AgentResult>;
}

/// Static agent-type -> agent mapping, fixed at orchestrator construction
#[derive(Clone, Default)]
pub struct AgentRegistry {
    agents: HashMap<AgentType, Arc<dyn ResearchAgent>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register under the agent's own type, replacing any earlier entry
    pub fn register(mut self, agent: Arc<dyn ResearchAgent>) -> Self {
        self.agents.insert(agent.agent_type(), agent);
        self
    }

    pub fn get(&self, agent_type: AgentType) -> Option<Arc<dyn ResearchAgent>> {
        self.agents.get(&agent_type).cloned()
    }

    pub fn contains(&self, agent_type: AgentType) -> bool {
        self.agents.contains_key(&agent_type)
    }

    pub fn agent_types(&self) -> Vec<AgentType> {
        let mut types: Vec<AgentType> = self.agents.keys().copied().collect();
        types.sort();
        types
    }

    /// The four LLM-backed agents wired to `store` and `config`
    pub fn with_llm_agents(store: Arc<SharedStore>, config: &OrchestratorConfig) -> Self {
        Self::new()
            .register(Arc::new(ResearcherAgent::new(
                config.model_config_for(AgentType::Researcher),
                Arc::clone(&store),
            )))
            .register(Arc::new(AnalystAgent::financial(
                config.model_config_for(AgentType::FinancialAnalyst),
                Arc::clone(&store),
            )))
            .register(Arc::new(AnalystAgent::market(
                config.model_config_for(AgentType::MarketAnalyst),
                Arc::clone(&store),
            )))
            .register(Arc::new(ReportWriterAgent::new(
                config.model_config_for(AgentType::ReportWriter),
                store,
            )))
    }
}

impl std::fmt::Debug for AgentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRegistry")
            .field("agents", &self.agent_types())
            .finish()
    }
}

/// Background block shared by the LLM agents: prior findings and
/// insights recorded by other agents for this project
pub(crate) fn cross_agent_notes(
    store: &SharedStore,
    ctx: &TaskContext,
    max_findings: usize,
) -> anyhow::Result<String> {
    let mut notes = String::new();

    if let Some(background) = &ctx.context {
        notes.push_str(&format!("Background: {}\n\n", background));
    }

    let findings = store.get_findings(&ctx.project_id, None)?;
    if !findings.is_empty() {
        notes.push_str("Known findings:\n");
        for finding in findings.iter().take(max_findings) {
            notes.push_str(&format!(
                "- [{}] {} ({} confidence): {}\n",
                finding.agent_type,
                finding.title,
                finding.confidence.as_str(),
                finding.summary_or_content()
            ));
        }
        notes.push('\n');
    }

    if let Some(shared) = store.get_shared_context(&ctx.project_id)? {
        if !shared.discovered_insights.is_empty() {
            notes.push_str("Insights from other agents:\n");
            for insight in &shared.discovered_insights {
                notes.push_str(&format!("- {}\n", insight));
            }
        }
    }

    Ok(notes)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo(AgentType);

    #[async_trait]
    impl ResearchAgent for Echo {
        fn agent_type(&self) -> AgentType {
            self.0
        }

        async fn execute(&self, _ctx: &TaskContext) -> anyhow::Result<AgentResult> {
            Ok(AgentResult::success())
        }
    }

    #[test]
    fn test_agent_type_strings() {
        for agent_type in AgentType::all() {
            assert_eq!(AgentType::from_str(agent_type.as_str()), Some(agent_type));
            let json = serde_json::to_string(&agent_type).unwrap();
            assert_eq!(json, format!("\"{}\"", agent_type.as_str()));
        }
        assert_eq!(AgentType::from_str("critic"), None);
    }

    #[test]
    fn test_registry_dispatch() {
        let registry = AgentRegistry::new()
            .register(Arc::new(Echo(AgentType::Researcher)))
            .register(Arc::new(Echo(AgentType::MarketAnalyst)));

        assert!(registry.contains(AgentType::Researcher));
        assert!(!registry.contains(AgentType::ReportWriter));
        assert_eq!(
            registry.agent_types(),
            vec![AgentType::Researcher, AgentType::MarketAnalyst]
        );
        assert_eq!(
            registry.get(AgentType::MarketAnalyst).unwrap().agent_type(),
            AgentType::MarketAnalyst
        );
    }

    #[test]
    fn test_failure_envelope() {
        let result = AgentResult::failure("rate_limited");
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("rate_limited"));
        assert!(result.findings.is_empty());
    }

    #[test]
    fn test_cross_agent_notes() {
        let store = SharedStore::open_in_memory().unwrap();
        let input = crate::state::ScopingInput::new("Acme");
        store.create_project("p1", "Acme", "Acme", &input).unwrap();
        store
            .store_finding(Finding::new("p1", AgentType::Researcher, "Founded 1999", "Acme was founded in 1999"))
            .unwrap();
        store.add_discovered_insight("p1", "Check the 2008 restructuring").unwrap();

        let mut ctx = TaskContext::new("p1", "Acme");
        ctx.context = Some("Focus on Europe".to_string());
        let notes = cross_agent_notes(&store, &ctx, 10).unwrap();

        assert!(notes.contains("Focus on Europe"));
        assert!(notes.contains("Founded 1999"));
        assert!(notes.contains("2008 restructuring"));
    }
}

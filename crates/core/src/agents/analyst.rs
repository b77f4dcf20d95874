//! # Analyst Agent
//!
//! Domain specialist with either a financial or a market focus. Same
//! envelope as the researcher, different system prompt and category.

use async_trait::async_trait;
use std::sync::Arc;

use super::llm_helpers::estimate_tokens;
use super::researcher::{task_prompt, ResearchDraft};
use super::{cross_agent_notes, prompts, AgentResult, AgentType, ResearchAgent, TaskContext};
use crate::models::ModelConfig;
use crate::run_llm_function;
use crate::state::SharedStore;

pub struct AnalystAgent {
    agent_type: AgentType,
    config: ModelConfig,
    store: Arc<SharedStore>,
}

impl AnalystAgent {
    pub fn financial(config: ModelConfig, store: Arc<SharedStore>) -> Self {
        Self {
            agent_type: AgentType::FinancialAnalyst,
            config,
            store,
        }
    }

    pub fn market(config: ModelConfig, store: Arc<SharedStore>) -> Self {
        Self {
            agent_type: AgentType::MarketAnalyst,
            config,
            store,
        }
    }

    fn default_prompt(&self) -> &'static str {
        match self.agent_type {
            AgentType::FinancialAnalyst => prompts::FINANCIAL_ANALYST,
            _ => prompts::MARKET_ANALYST,
        }
    }

    fn category(&self) -> &'static str {
        match self.agent_type {
            AgentType::FinancialAnalyst => "financial",
            _ => "market",
        }
    }

    async fn draft(&self, system: &str, prompt: String) -> anyhow::Result<ResearchDraft> {
        run_llm_function!(&self.config, ResearchDraft, system, prompt)
    }
}

#[async_trait]
impl ResearchAgent for AnalystAgent {
    fn agent_type(&self) -> AgentType {
        self.agent_type
    }

    async fn execute(&self, ctx: &TaskContext) -> anyhow::Result<AgentResult> {
        // Analysts run after primary research, so there is more to read
        let notes = cross_agent_notes(&self.store, ctx, 40)?;
        let prompt = task_prompt(ctx, &notes);
        let system = self
            .store
            .prompt_or(self.agent_type.as_str(), self.default_prompt());
        let prompt_tokens = estimate_tokens(&system) + estimate_tokens(&prompt);

        match self.draft(&system, prompt).await {
            Ok(draft) => {
                let output_tokens = estimate_tokens(&serde_json::to_string(&draft)?);
                Ok(draft
                    .into_result(ctx, self.agent_type, self.category())
                    .with_tokens(prompt_tokens + output_tokens))
            }
            Err(e) => {
                tracing::warn!("{} LLM call failed: {}", self.agent_type, e);
                Ok(AgentResult::failure(e.to_string()).with_tokens(prompt_tokens))
            }
        }
    }
}

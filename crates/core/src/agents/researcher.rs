//! # Researcher Agent
//!
//! General-purpose research on one key question. Also owns the draft
//! types the analysts reuse, since both produce the same envelope shape.

use async_trait::async_trait;
use radkit::macros::LLMOutput;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::llm_helpers::{draft_source, estimate_tokens, parse_confidence};
use super::{cross_agent_notes, prompts, AgentResult, AgentType, ResearchAgent, TaskContext};
use crate::models::ModelConfig;
use crate::run_llm_function;
use crate::state::{Finding, SharedStore};

/// A cited source as the model writes it
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, LLMOutput)]
pub struct SourceDraft {
    /// web, document, api, database, news, financial_report or social
    pub kind: String,
    pub title: String,
    #[serde(default)]
    pub url: Option<String>,
    /// 0.0 to 1.0
    pub relevance: f64,
    #[serde(default)]
    pub snippet: Option<String>,
}

/// One finding as the model writes it
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, LLMOutput)]
pub struct FindingDraft {
    pub title: String,
    pub content: String,
    /// One sentence
    pub summary: String,
    /// high, medium or low
    pub confidence: String,
    #[serde(default)]
    pub sources: Vec<SourceDraft>,
}

/// Structured output of the researcher and analyst agents
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, LLMOutput)]
pub struct ResearchDraft {
    pub findings: Vec<FindingDraft>,
    /// Notes for the agents that run later
    #[serde(default)]
    pub insights: Vec<String>,
    pub summary: String,
}

impl ResearchDraft {
    /// Convert model output into an envelope for `agent_type`
    pub fn into_result(self, ctx: &TaskContext, agent_type: AgentType, category: &str) -> AgentResult {
        let mut sources = Vec::new();
        let findings: Vec<Finding> = self
            .findings
            .into_iter()
            .map(|draft| {
                let mut finding =
                    Finding::new(ctx.project_id.as_str(), agent_type, draft.title, draft.content)
                        .with_category(category)
                        .with_summary(draft.summary)
                        .with_confidence(parse_confidence(&draft.confidence));
                if let Some(question_id) = &ctx.question_id {
                    finding = finding.with_question(question_id.as_str());
                }
                for s in &draft.sources {
                    let source = draft_source(
                        &s.kind,
                        &s.title,
                        s.url.as_deref(),
                        s.relevance,
                        s.snippet.as_deref(),
                    )
                    .with_id(format!("src-{}", uuid::Uuid::new_v4()));
                    sources.push(source.clone());
                    finding = finding.with_source(source);
                }
                finding
            })
            .collect();

        if findings.is_empty() {
            let reason = if self.summary.trim().is_empty() {
                "no findings".to_string()
            } else {
                format!("no findings: {}", self.summary.trim())
            };
            let mut result = AgentResult::failure(reason);
            result.insights = self.insights;
            return result;
        }

        let searches = sources.len() as u32;
        AgentResult {
            success: true,
            findings,
            sources,
            insights: self.insights,
            tokens_used: 0,
            searches,
            error: None,
        }
    }
}

/// Prompt body shared by the researcher and analysts
pub(crate) fn task_prompt(ctx: &TaskContext, notes: &str) -> String {
    let mut prompt = format!("Research target: {}\n", ctx.target);
    match (&ctx.question_id, &ctx.question) {
        (Some(id), Some(question)) => prompt.push_str(&format!("Key question ({}): {}\n", id, question)),
        (None, Some(question)) => prompt.push_str(&format!("Key question: {}\n", question)),
        _ => prompt.push_str("Key question: give a general overview of the target.\n"),
    }

    let mut enabled = Vec::new();
    if ctx.data_sources.web_search {
        enabled.push("web search");
    }
    if ctx.data_sources.financial_data {
        enabled.push("financial data");
    }
    if ctx.data_sources.market_data {
        enabled.push("market data");
    }
    if !enabled.is_empty() {
        prompt.push_str(&format!("Enabled data sources: {}\n", enabled.join(", ")));
    }

    if !notes.is_empty() {
        prompt.push('\n');
        prompt.push_str(notes);
    }
    prompt
}

pub struct ResearcherAgent {
    config: ModelConfig,
    store: Arc<SharedStore>,
}

impl ResearcherAgent {
    pub fn new(config: ModelConfig, store: Arc<SharedStore>) -> Self {
        Self { config, store }
    }

    async fn draft(&self, system: &str, prompt: String) -> anyhow::Result<ResearchDraft> {
        run_llm_function!(&self.config, ResearchDraft, system, prompt)
    }
}

#[async_trait]
impl ResearchAgent for ResearcherAgent {
    fn agent_type(&self) -> AgentType {
        AgentType::Researcher
    }

    async fn execute(&self, ctx: &TaskContext) -> anyhow::Result<AgentResult> {
        let notes = cross_agent_notes(&self.store, ctx, 20)?;
        let prompt = task_prompt(ctx, &notes);
        let system = self.store.prompt_or("researcher", prompts::RESEARCHER);
        let prompt_tokens = estimate_tokens(&system) + estimate_tokens(&prompt);

        match self.draft(&system, prompt).await {
            Ok(draft) => {
                let output_tokens = estimate_tokens(&serde_json::to_string(&draft)?);
                Ok(draft
                    .into_result(ctx, AgentType::Researcher, "general")
                    .with_tokens(prompt_tokens + output_tokens))
            }
            Err(e) => {
                tracing::warn!("Researcher LLM call failed: {}", e);
                Ok(AgentResult::failure(e.to_string()).with_tokens(prompt_tokens))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{Confidence, DataSources, SourceKind};

    fn ctx() -> TaskContext {
        let mut ctx = TaskContext::new("p1", "Acme");
        ctx.question_id = Some("q-1".to_string());
        ctx.question = Some("Who are Acme's competitors?".to_string());
        ctx
    }

    #[test]
    fn test_draft_into_result() {
        let draft = ResearchDraft {
            findings: vec![FindingDraft {
                title: "Globex competes".to_string(),
                content: "Globex sells the same widgets".to_string(),
                summary: "Globex is a direct competitor".to_string(),
                confidence: "high".to_string(),
                sources: vec![SourceDraft {
                    kind: "news".to_string(),
                    title: "Widget Weekly".to_string(),
                    url: Some("https://example.com/widgets".to_string()),
                    relevance: 0.7,
                    snippet: None,
                }],
            }],
            insights: vec!["Pricing pressure from Globex".to_string()],
            summary: "One competitor found".to_string(),
        };

        let result = draft.into_result(&ctx(), AgentType::Researcher, "competitive");
        assert!(result.success);
        assert_eq!(result.findings.len(), 1);
        assert_eq!(result.searches, 1);

        let finding = &result.findings[0];
        assert!(finding.id.is_empty());
        assert_eq!(finding.question_id.as_deref(), Some("q-1"));
        assert_eq!(finding.confidence, Confidence::High);
        assert_eq!(finding.category, "competitive");
        assert_eq!(finding.sources[0].kind, SourceKind::News);
        assert_eq!(finding.sources[0].id, result.sources[0].id);
    }

    #[test]
    fn test_empty_draft_is_failure() {
        let draft = ResearchDraft {
            findings: Vec::new(),
            insights: Vec::new(),
            summary: "Nothing public".to_string(),
        };
        let result = draft.into_result(&ctx(), AgentType::Researcher, "general");
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("no findings: Nothing public"));
    }

    #[test]
    fn test_task_prompt_mentions_question_and_sources() {
        let mut ctx = ctx();
        ctx.data_sources = DataSources {
            web_search: true,
            financial_data: false,
            market_data: true,
        };
        let prompt = task_prompt(&ctx, "Known findings:\n- x\n");
        assert!(prompt.contains("Key question (q-1)"));
        assert!(prompt.contains("web search, market data"));
        assert!(prompt.contains("Known findings"));
    }
}

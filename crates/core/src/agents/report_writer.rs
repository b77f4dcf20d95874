//! # Report Writer Agent
//!
//! Synthesis agent. Reads every finding of the project from the store
//! (not from its task context), asks the model for a structured report,
//! and persists the result with `save_report`.

use async_trait::async_trait;
use chrono::Utc;
use radkit::macros::LLMOutput;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

use super::llm_helpers::estimate_tokens;
use super::{prompts, AgentResult, AgentType, ResearchAgent, TaskContext};
use crate::models::ModelConfig;
use crate::run_llm_function;
use crate::state::{
    Appendix, Finding, Priority, Recommendation, Report, ReportMetadata, ReportSection, RiskFactor,
    RiskLevel, SharedStore, Source,
};

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, LLMOutput)]
pub struct SubsectionDraft {
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub finding_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, LLMOutput)]
pub struct SectionDraft {
    pub title: String,
    pub content: String,
    /// Ids of the findings this section relies on
    #[serde(default)]
    pub finding_ids: Vec<String>,
    #[serde(default)]
    pub subsections: Vec<SubsectionDraft>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, LLMOutput)]
pub struct RiskDraft {
    pub category: String,
    pub description: String,
    /// low, medium or high
    pub severity: String,
    /// low, medium or high
    pub likelihood: String,
    #[serde(default)]
    pub mitigation: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, LLMOutput)]
pub struct RecommendationDraft {
    pub title: String,
    pub description: String,
    /// critical, high, medium or low
    pub priority: String,
}

/// Structured output of the report writer
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, LLMOutput)]
pub struct ReportDraft {
    pub title: String,
    pub executive_summary: String,
    pub sections: Vec<SectionDraft>,
    #[serde(default)]
    pub key_insights: Vec<String>,
    #[serde(default)]
    pub risk_factors: Vec<RiskDraft>,
    #[serde(default)]
    pub recommendations: Vec<RecommendationDraft>,
}

fn parse_priority(label: &str) -> Priority {
    match label.trim().to_ascii_lowercase().as_str() {
        "critical" => Priority::Critical,
        "high" => Priority::High,
        "low" => Priority::Low,
        _ => Priority::Medium,
    }
}

/// Mean finding confidence (high 0.9, medium 0.6, low 0.3); 0.0 when empty
pub fn confidence_score(findings: &[Finding]) -> f64 {
    if findings.is_empty() {
        return 0.0;
    }
    findings.iter().map(|f| f.confidence.score()).sum::<f64>() / findings.len() as f64
}

/// Turn a draft into the stored report. Finding ids the model invented are
/// dropped.
pub fn build_report(
    project_id: &str,
    draft: ReportDraft,
    findings: &[Finding],
    sources: &[Source],
) -> Report {
    let known: HashSet<&str> = findings.iter().map(|f| f.id.as_str()).collect();
    let keep_known = |ids: Vec<String>| -> Vec<String> {
        ids.into_iter()
            .filter(|id| known.contains(id.as_str()))
            .collect()
    };

    let sections = draft
        .sections
        .into_iter()
        .enumerate()
        .map(|(i, section)| ReportSection {
            id: format!("section-{}", i + 1),
            title: section.title,
            content: section.content,
            finding_ids: keep_known(section.finding_ids),
            subsections: section
                .subsections
                .into_iter()
                .enumerate()
                .map(|(j, sub)| ReportSection {
                    id: format!("section-{}-{}", i + 1, j + 1),
                    title: sub.title,
                    content: sub.content,
                    finding_ids: keep_known(sub.finding_ids),
                    subsections: Vec::new(),
                })
                .collect(),
        })
        .collect();

    let appendices = if sources.is_empty() {
        Vec::new()
    } else {
        let listing = sources
            .iter()
            .map(|s| match &s.url {
                Some(url) => format!("- {} ({}) {}", s.title, s.kind.as_str(), url),
                None => format!("- {} ({})", s.title, s.kind.as_str()),
            })
            .collect::<Vec<_>>()
            .join("\n");
        vec![Appendix {
            title: "Sources".to_string(),
            content: listing,
        }]
    };

    let mut report = Report {
        id: format!("report-{}", uuid::Uuid::new_v4()),
        project_id: project_id.to_string(),
        title: draft.title,
        executive_summary: draft.executive_summary,
        sections,
        key_insights: draft.key_insights,
        risk_factors: draft
            .risk_factors
            .into_iter()
            .map(|r| RiskFactor {
                category: r.category,
                description: r.description,
                severity: RiskLevel::from_str(&r.severity),
                likelihood: RiskLevel::from_str(&r.likelihood),
                mitigation: r.mitigation,
            })
            .collect(),
        recommendations: draft
            .recommendations
            .into_iter()
            .map(|r| Recommendation {
                title: r.title,
                description: r.description,
                priority: parse_priority(&r.priority),
            })
            .collect(),
        appendices,
        metadata: ReportMetadata {
            generated_at: Utc::now(),
            word_count: 0,
            source_count: sources.len(),
            confidence_score: confidence_score(findings),
        },
    };
    report.metadata.word_count = report.count_words();
    report
}

pub struct ReportWriterAgent {
    config: ModelConfig,
    store: Arc<SharedStore>,
}

impl ReportWriterAgent {
    pub fn new(config: ModelConfig, store: Arc<SharedStore>) -> Self {
        Self { config, store }
    }

    fn synthesis_prompt(&self, ctx: &TaskContext, findings: &[Finding]) -> anyhow::Result<String> {
        let mut prompt = format!("Research target: {}\n\n", ctx.target);

        if let Some(shared) = self.store.get_shared_context(&ctx.project_id)? {
            if !shared.key_questions.is_empty() {
                prompt.push_str("Key questions:\n");
                for question in shared.key_questions.iter().filter(|q| !q.trim().is_empty()) {
                    prompt.push_str(&format!("- {}\n", question));
                }
                prompt.push('\n');
            }
            if !shared.discovered_insights.is_empty() {
                prompt.push_str("Insights:\n");
                for insight in &shared.discovered_insights {
                    prompt.push_str(&format!("- {}\n", insight));
                }
                prompt.push('\n');
            }
        }

        prompt.push_str("Findings:\n");
        for finding in findings {
            prompt.push_str(&format!(
                "- id={} agent={} confidence={} title={}\n  {}\n",
                finding.id,
                finding.agent_type,
                finding.confidence.as_str(),
                finding.title,
                finding.content
            ));
        }
        Ok(prompt)
    }

    async fn draft(&self, system: &str, prompt: String) -> anyhow::Result<ReportDraft> {
        run_llm_function!(&self.config, ReportDraft, system, prompt)
    }
}

#[async_trait]
impl ResearchAgent for ReportWriterAgent {
    fn agent_type(&self) -> AgentType {
        AgentType::ReportWriter
    }

    async fn execute(&self, ctx: &TaskContext) -> anyhow::Result<AgentResult> {
        let findings = self.store.get_findings(&ctx.project_id, None)?;
        if findings.is_empty() {
            return Ok(AgentResult::failure("no findings to synthesize"));
        }
        let sources = self.store.get_sources(&ctx.project_id)?;

        let prompt = self.synthesis_prompt(ctx, &findings)?;
        let system = self.store.prompt_or("report_writer", prompts::REPORT_WRITER);
        let prompt_tokens = estimate_tokens(&system) + estimate_tokens(&prompt);

        let draft = match self.draft(&system, prompt).await {
            Ok(draft) => draft,
            Err(e) => {
                tracing::warn!("Report writer LLM call failed: {}", e);
                return Ok(AgentResult::failure(e.to_string()).with_tokens(prompt_tokens));
            }
        };
        let output_tokens = estimate_tokens(&serde_json::to_string(&draft)?);

        let report = build_report(&ctx.project_id, draft, &findings, &sources);
        self.store.save_report(&report)?;
        tracing::info!(
            "Report {} saved ({} words, confidence {:.2})",
            report.id,
            report.metadata.word_count,
            report.metadata.confidence_score
        );

        Ok(AgentResult {
            success: true,
            findings: Vec::new(),
            sources: Vec::new(),
            insights: report.key_insights.clone(),
            tokens_used: prompt_tokens + output_tokens,
            searches: 0,
            error: None,
        })
    }
}

//! # Research Planner
//!
//! Turns validated scoping input into prioritized task definitions.
//!
//! Each key question fans out to the agent types its category maps to;
//! enabled data-source flags add whole-project tasks. The result is sorted
//! by descending priority, keeping planning order among equals.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::agents::{AgentRegistry, AgentType, TaskContext};
use crate::error::{DossierError, Result};
use crate::state::{Priority, QuestionCategory, ScopingInput};

/// A unit of scheduled work
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskDefinition {
    pub id: String,
    pub agent_type: AgentType,
    pub context: TaskContext,
    pub priority: u8,
    /// Ids of tasks that must complete first
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Human-readable line used in the shared context task lists
    pub description: String,
}

impl TaskDefinition {
    pub fn new(id: impl Into<String>, agent_type: AgentType, context: TaskContext) -> Self {
        let id = id.into();
        let subject = context
            .question
            .clone()
            .unwrap_or_else(|| format!("overview of {}", context.target));
        Self {
            description: format!("[{}] {}: {}", id, agent_type, subject),
            id,
            agent_type,
            context,
            priority: Priority::weight(None),
            dependencies: Vec::new(),
        }
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_dependency(mut self, task_id: impl Into<String>) -> Self {
        self.dependencies.push(task_id.into());
        self
    }
}

/// Agent types a question category is routed to, primary agent first
pub fn agents_for(category: QuestionCategory) -> &'static [AgentType] {
    match category {
        QuestionCategory::Financial | QuestionCategory::Risk => {
            &[AgentType::FinancialAnalyst, AgentType::Researcher]
        }
        QuestionCategory::Market | QuestionCategory::Competitive => {
            &[AgentType::MarketAnalyst, AgentType::Researcher]
        }
        QuestionCategory::Technology | QuestionCategory::Regulatory | QuestionCategory::General => {
            &[AgentType::Researcher]
        }
    }
}

/// Ordered task list for one project
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ResearchPlan {
    pub tasks: Vec<TaskDefinition>,
}

impl ResearchPlan {
    /// Researcher tasks without dependencies
    pub fn primary_tasks(&self) -> Vec<TaskDefinition> {
        self.tasks
            .iter()
            .filter(|t| t.agent_type == AgentType::Researcher && t.dependencies.is_empty())
            .cloned()
            .collect()
    }

    /// Specialist tasks, plus researcher tasks that wait on other tasks
    pub fn analysis_tasks(&self) -> Vec<TaskDefinition> {
        self.tasks
            .iter()
            .filter(|t| {
                t.agent_type != AgentType::ReportWriter
                    && (t.agent_type.is_specialist() || !t.dependencies.is_empty())
            })
            .cloned()
            .collect()
    }

    pub fn count_for(&self, agent_type: AgentType) -> usize {
        self.tasks
            .iter()
            .filter(|t| t.agent_type == agent_type)
            .count()
    }

    /// Distinct agent types in the plan, in first-use order
    pub fn agent_types(&self) -> Vec<AgentType> {
        let mut seen = Vec::new();
        for task in &self.tasks {
            if !seen.contains(&task.agent_type) {
                seen.push(task.agent_type);
            }
        }
        seen
    }

    pub fn descriptions(&self) -> Vec<String> {
        self.tasks.iter().map(|t| t.description.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

/// Check scoping input and fill in defaults (question ids, trimmed target)
pub fn validate(input: &ScopingInput) -> Result<ScopingInput> {
    let mut normalized = input.clone();
    normalized.target = input.target.trim().to_string();

    if normalized.target.is_empty() {
        return Err(DossierError::InvalidScoping(
            "target must not be blank".to_string(),
        ));
    }
    if normalized.questions.is_empty() {
        return Err(DossierError::InvalidScoping(
            "at least one key question is required".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    for (index, question) in normalized.questions.iter_mut().enumerate() {
        let id = match question.id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => format!("q-{}", index + 1),
        };
        if !seen.insert(id.clone()) {
            return Err(DossierError::InvalidScoping(format!(
                "duplicate question id '{}'",
                id
            )));
        }
        question.id = Some(id);
    }

    Ok(normalized)
}

/// Build the plan for a validated scoping input
pub fn plan(project_id: &str, input: &ScopingInput) -> ResearchPlan {
    let mut tasks = Vec::new();
    let mut next_id = {
        let mut counter = 0usize;
        move || {
            counter += 1;
            format!("task-{:03}", counter)
        }
    };

    let base_context = |question_id: Option<String>, question: Option<String>| TaskContext {
        project_id: project_id.to_string(),
        target: input.target.clone(),
        question_id,
        question,
        context: input.context.clone(),
        data_sources: input.data_sources,
    };

    for question in &input.questions {
        let text = question.text.trim();
        let question_text = (!text.is_empty()).then(|| text.to_string());
        let priority = Priority::weight(question.priority);

        for agent_type in agents_for(question.category) {
            let context = base_context(question.id.clone(), question_text.clone());
            tasks.push(TaskDefinition::new(next_id(), *agent_type, context).with_priority(priority));
        }
    }

    let medium = Priority::weight(Some(Priority::Medium));
    if input.data_sources.financial_data {
        let mut context = base_context(None, None);
        context.context = Some(with_background(
            "Financial overview: revenue, profitability, funding and valuation.",
            input.context.as_deref(),
        ));
        tasks.push(
            TaskDefinition::new(next_id(), AgentType::FinancialAnalyst, context)
                .with_priority(medium),
        );
    }
    if input.data_sources.market_data {
        let mut context = base_context(None, None);
        context.context = Some(with_background(
            "Market landscape: size, growth, competitors and positioning.",
            input.context.as_deref(),
        ));
        tasks.push(
            TaskDefinition::new(next_id(), AgentType::MarketAnalyst, context).with_priority(medium),
        );
    }

    // Stable: equal priorities keep planning order
    tasks.sort_by(|a, b| b.priority.cmp(&a.priority));

    ResearchPlan { tasks }
}

fn with_background(instruction: &str, background: Option<&str>) -> String {
    match background {
        Some(bg) if !bg.trim().is_empty() => format!("{}\n{}", instruction, bg.trim()),
        _ => instruction.to_string(),
    }
}

/// Every agent type the plan (and synthesis) needs must be registered
pub fn check_registry(plan: &ResearchPlan, registry: &AgentRegistry) -> Result<()> {
    for agent_type in plan
        .agent_types()
        .into_iter()
        .chain(std::iter::once(AgentType::ReportWriter))
    {
        if !registry.contains(agent_type) {
            return Err(DossierError::AgentNotRegistered(agent_type));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{DataSources, KeyQuestion};

    fn question(category: QuestionCategory, priority: Option<Priority>) -> KeyQuestion {
        KeyQuestion {
            id: None,
            text: format!("{} question", category.as_str()),
            category,
            priority,
        }
    }

    fn all_sources() -> DataSources {
        DataSources {
            web_search: true,
            financial_data: true,
            market_data: true,
        }
    }

    #[test]
    fn test_category_table() {
        assert_eq!(
            agents_for(QuestionCategory::Risk),
            &[AgentType::FinancialAnalyst, AgentType::Researcher]
        );
        assert_eq!(
            agents_for(QuestionCategory::Competitive),
            &[AgentType::MarketAnalyst, AgentType::Researcher]
        );
        assert_eq!(agents_for(QuestionCategory::Regulatory), &[AgentType::Researcher]);
    }

    #[test]
    fn test_validate_rejects_bad_input() {
        let blank = ScopingInput::new("   ").with_question("q", QuestionCategory::General, None);
        assert!(matches!(validate(&blank), Err(DossierError::InvalidScoping(_))));

        let no_questions = ScopingInput::new("Acme");
        assert!(matches!(
            validate(&no_questions),
            Err(DossierError::InvalidScoping(_))
        ));

        let mut dup = ScopingInput::new("Acme")
            .with_question("a", QuestionCategory::General, None)
            .with_question("b", QuestionCategory::General, None);
        dup.questions[0].id = Some("same".to_string());
        dup.questions[1].id = Some("same".to_string());
        assert!(matches!(validate(&dup), Err(DossierError::InvalidScoping(_))));
    }

    #[test]
    fn test_validate_assigns_question_ids() {
        let input = ScopingInput::new(" Acme ")
            .with_question("a", QuestionCategory::General, None)
            .with_question("b", QuestionCategory::Market, None);
        let normalized = validate(&input).unwrap();
        assert_eq!(normalized.target, "Acme");
        assert_eq!(normalized.questions[0].id.as_deref(), Some("q-1"));
        assert_eq!(normalized.questions[1].id.as_deref(), Some("q-2"));
    }

    #[test]
    fn test_task_count_bounds() {
        let categories = [
            QuestionCategory::Financial,
            QuestionCategory::Market,
            QuestionCategory::Competitive,
            QuestionCategory::Technology,
            QuestionCategory::Regulatory,
            QuestionCategory::Risk,
            QuestionCategory::General,
        ];

        for n in 1..=categories.len() {
            let mut input = ScopingInput::new("Acme").with_data_sources(all_sources());
            for category in categories.iter().take(n) {
                input.questions.push(question(*category, None));
            }
            let input = validate(&input).unwrap();
            let plan = plan("p1", &input);

            assert!(plan.len() >= n, "n={} got {}", n, plan.len());
            assert!(plan.len() <= n * 2 + 2, "n={} got {}", n, plan.len());
        }
    }

    #[test]
    fn test_priority_order_is_stable() {
        let input = validate(
            &ScopingInput::new("Acme")
                .with_question("low", QuestionCategory::General, Some(Priority::Low))
                .with_question("first medium", QuestionCategory::General, None)
                .with_question("critical", QuestionCategory::Financial, Some(Priority::Critical))
                .with_question("second medium", QuestionCategory::General, Some(Priority::Medium)),
        )
        .unwrap();
        let plan = plan("p1", &input);

        let order: Vec<(&str, u8)> = plan
            .tasks
            .iter()
            .map(|t| (t.id.as_str(), t.priority))
            .collect();
        assert_eq!(
            order,
            vec![
                ("task-003", 4),
                ("task-004", 4),
                ("task-002", 2),
                ("task-005", 2),
                ("task-001", 1),
            ]
        );
        assert_eq!(plan.tasks[0].agent_type, AgentType::FinancialAnalyst);
    }

    #[test]
    fn test_acme_plan() {
        let mut input = ScopingInput::new("Acme");
        input
            .questions
            .push(question(QuestionCategory::Financial, Some(Priority::Critical)));
        input.questions[0].text = String::new();
        let plan = plan("p1", &validate(&input).unwrap());

        assert_eq!(plan.len(), 2);
        assert_eq!(plan.count_for(AgentType::FinancialAnalyst), 1);
        assert_eq!(plan.count_for(AgentType::Researcher), 1);
        assert_eq!(plan.primary_tasks().len(), 1);
        assert_eq!(plan.analysis_tasks().len(), 1);
        assert!(plan.tasks.iter().all(|t| t.context.question.is_none()));
        assert!(plan.tasks.iter().all(|t| t.priority == 4));
    }

    #[test]
    fn test_supplementary_tasks() {
        let input = validate(
            &ScopingInput::new("Acme")
                .with_question("rules?", QuestionCategory::Regulatory, Some(Priority::High))
                .with_data_sources(all_sources()),
        )
        .unwrap();
        let plan = plan("p1", &input);

        assert_eq!(plan.len(), 3);
        let supplementary: Vec<&TaskDefinition> = plan
            .tasks
            .iter()
            .filter(|t| t.context.question_id.is_none())
            .collect();
        assert_eq!(supplementary.len(), 2);
        assert!(supplementary.iter().all(|t| t.priority == 2));
        assert_eq!(supplementary[0].agent_type, AgentType::FinancialAnalyst);
        assert_eq!(supplementary[1].agent_type, AgentType::MarketAnalyst);
    }

    #[test]
    fn test_researcher_with_dependency_moves_to_analysis() {
        let ctx = TaskContext::new("p1", "Acme");
        let plan = ResearchPlan {
            tasks: vec![
                TaskDefinition::new("task-001", AgentType::Researcher, ctx.clone()),
                TaskDefinition::new("task-002", AgentType::Researcher, ctx)
                    .with_dependency("task-001"),
            ],
        };
        assert_eq!(plan.primary_tasks()[0].id, "task-001");
        assert_eq!(plan.analysis_tasks()[0].id, "task-002");
    }
}

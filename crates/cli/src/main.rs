//! `dossier` - run and inspect research projects from the terminal.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use std::io::Write;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use dossier_core::config::DEFAULT_CONFIG_PATH;
use dossier_core::models::LlmProvider;
use dossier_core::state::{DataSources, KeyQuestion, Priority, QuestionCategory};
use dossier_core::{
    AgentRegistry, ConfigOverrides, Orchestrator, OrchestratorConfig, ProjectStatus,
    ResearchEvent, ScopingInput, SharedStore,
};

const PRINTER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(author, version, about = "Dossier - multi-agent research orchestration")]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Debug logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a research project until it settles
    Run {
        /// Entity to research
        #[arg(short, long)]
        target: String,
        /// Project name (default: "<target> research")
        #[arg(short, long)]
        name: Option<String>,
        /// Key question as `category:priority:text`, repeatable
        #[arg(short = 'q', long = "question")]
        questions: Vec<String>,
        /// Allow web search
        #[arg(long)]
        web: bool,
        /// Add a financial overview task
        #[arg(long)]
        financial_data: bool,
        /// Add a market landscape task
        #[arg(long)]
        market_data: bool,
        /// Background passed to every agent
        #[arg(long)]
        context: Option<String>,
        /// Override max concurrency
        #[arg(long)]
        concurrency: Option<usize>,
        /// Override per-task timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,
        /// Override the LLM provider (anthropic, openai, gemini, openrouter, grok, deepseek)
        #[arg(long)]
        provider: Option<String>,
        /// Override the model for every agent
        #[arg(long)]
        model: Option<String>,
    },
    /// Print a persisted project and its report
    Show { id: String },
    /// List persisted projects
    List,
    /// Remove expired memory entries
    Clean,
    /// Write the default configuration file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();
}

/// Parse `category:priority:text`; category and priority may be empty
fn parse_question(raw: &str) -> Result<KeyQuestion> {
    let mut parts = raw.splitn(3, ':');
    let category = parts.next().unwrap_or_default().trim().to_ascii_lowercase();
    let priority = parts.next().unwrap_or_default().trim().to_ascii_lowercase();
    let text = parts.next().unwrap_or_default().trim().to_string();

    let category: QuestionCategory = if category.is_empty() {
        QuestionCategory::General
    } else {
        serde_json::from_value(serde_json::Value::String(category))?
    };
    let priority = match priority.as_str() {
        "" => None,
        "critical" => Some(Priority::Critical),
        "high" => Some(Priority::High),
        "medium" => Some(Priority::Medium),
        "low" => Some(Priority::Low),
        other => bail!("unknown priority '{}' in question '{}'", other, raw),
    };

    Ok(KeyQuestion {
        id: None,
        text,
        category,
        priority,
    })
}

fn parse_provider(name: &str) -> Result<LlmProvider> {
    serde_json::from_value(serde_json::Value::String(name.to_ascii_lowercase()))
        .with_context(|| format!("unknown provider '{}'", name))
}

fn open_store(config: &OrchestratorConfig) -> Result<Arc<SharedStore>> {
    let store = SharedStore::open_at(&config.database_path)
        .with_context(|| format!("opening {}", config.database_path.display()))?
        .with_memory_ttl(config.memory_ttl());
    store.db().seed_prompts()?;
    Ok(Arc::new(store))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config = OrchestratorConfig::load(&cli.config).await?;

    match cli.command {
        Command::Run {
            target,
            name,
            questions,
            web,
            financial_data,
            market_data,
            context,
            concurrency,
            timeout,
            provider,
            model,
        } => {
            config.merge(ConfigOverrides {
                max_concurrency: concurrency,
                task_timeout_secs: timeout,
                global_provider: provider.as_deref().map(parse_provider).transpose()?,
                global_model: model,
                ..Default::default()
            });
            config.validate()?;

            let input = ScopingInput {
                target,
                name,
                questions: questions
                    .iter()
                    .map(|q| parse_question(q))
                    .collect::<Result<Vec<_>>>()?,
                data_sources: DataSources {
                    web_search: web,
                    financial_data,
                    market_data,
                },
                context,
            };
            run_project(config, input).await
        }
        Command::Show { id } => {
            let store = open_store(&config)?;
            let project = store
                .load_project(&id)?
                .with_context(|| format!("no project with id {}", id))?;
            println!("{}", serde_json::to_string_pretty(&project)?);
            if project.report.is_none() {
                if let Some(report) = store.get_report(&id)? {
                    println!("{}", serde_json::to_string_pretty(&report)?);
                }
            }
            Ok(())
        }
        Command::List => {
            let store = open_store(&config)?;
            for project in store.list_projects()? {
                println!(
                    "{}  {:<12} {:>3}%  {}",
                    project.id, project.status, project.progress, project.scoping.target
                );
            }
            Ok(())
        }
        Command::Clean => {
            let store = open_store(&config)?;
            let removed = store.clean_expired_memories()?;
            println!("Removed {} expired memory entries", removed);
            Ok(())
        }
        Command::InitConfig { force } => {
            if cli.config.exists() && !force {
                bail!(
                    "{} already exists (use --force to overwrite)",
                    cli.config.display()
                );
            }
            OrchestratorConfig::default().save(&cli.config).await?;
            println!("Wrote {}", cli.config.display());
            Ok(())
        }
    }
}

/// Print events one per line until the channel closes
async fn print_events<W: Write>(
    mut events: broadcast::Receiver<ResearchEvent>,
    out: &mut W,
) -> std::io::Result<()> {
    loop {
        match events.recv().await {
            Ok(event) => writeln!(out, "[{}] {}", event.kind.as_str(), event.payload)?,
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!("Event printer lagged, skipped {} events", skipped)
            }
            Err(RecvError::Closed) => return out.flush(),
        }
    }
}

async fn run_project(config: OrchestratorConfig, input: ScopingInput) -> Result<()> {
    let store = open_store(&config)?;
    let registry = AgentRegistry::with_llm_agents(Arc::clone(&store), &config);
    let orchestrator = Orchestrator::new(config, store, registry);

    let events = orchestrator.subscribe();
    let printer = tokio::spawn(async move {
        if let Err(e) = print_events(events, &mut std::io::stdout()).await {
            tracing::warn!("Event printer stopped: {}", e);
        }
    });

    let project = orchestrator.start_project(input)?;
    tracing::info!("Started {} ({})", project.id, project.name);

    let finished = orchestrator.wait_until_settled(&project.id).await?;

    // The channel closes once the last orchestrator handle is gone, which
    // lets the printer flush the trailing events and exit
    drop(orchestrator);
    if tokio::time::timeout(PRINTER_DRAIN_TIMEOUT, printer).await.is_err() {
        tracing::warn!("Event printer did not drain in time");
    }

    println!("{}", serde_json::to_string_pretty(&finished)?);
    if finished.status == ProjectStatus::Failed {
        bail!("project {} failed", finished.id);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_question() {
        let q = parse_question("financial:critical:What is the revenue?").unwrap();
        assert_eq!(q.category, QuestionCategory::Financial);
        assert_eq!(q.priority, Some(Priority::Critical));
        assert_eq!(q.text, "What is the revenue?");

        let q = parse_question("::Who are the founders: and why?").unwrap();
        assert_eq!(q.category, QuestionCategory::General);
        assert_eq!(q.priority, None);
        assert_eq!(q.text, "Who are the founders: and why?");

        let q = parse_question("astrology:low:stars").unwrap();
        assert_eq!(q.category, QuestionCategory::General);

        assert!(parse_question("market:urgent:size").is_err());
    }

    #[tokio::test]
    async fn test_printer_flushes_events_sent_before_close() {
        use dossier_core::ResearchEventKind;

        let (tx, rx) = broadcast::channel(16);
        tx.send(ResearchEvent::new(ResearchEventKind::ReportCompleted, "p1")).unwrap();
        tx.send(ResearchEvent::new(ResearchEventKind::ProjectCompleted, "p1")).unwrap();
        drop(tx);

        let mut out = Vec::new();
        print_events(rx, &mut out).await.unwrap();

        let printed = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = printed.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("[report_completed]"));
        assert!(lines[1].starts_with("[project_completed]"));
    }

    #[test]
    fn test_parse_provider() {
        assert_eq!(parse_provider("OpenAI").unwrap(), LlmProvider::OpenAI);
        assert!(parse_provider("nobody").is_err());
    }
}

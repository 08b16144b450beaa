//! `docket`: run multi-agent legal research pipelines from the command line.

mod chat;
mod config;
mod pipeline;

use crate::chat::{is_exit, ChatHistory, CHAT_HISTORY_TURNS, DEMO_QUESTIONS};
use crate::config::{parse_input, DocketConfig};
use crate::pipeline::build_agents;
use clap::{Parser, Subcommand};
use docket_builtins::MatterDatabase;
use docket_core::{CancellationSignal, ContextKey, Value};
use docket_orchestrator::{
    matter_chat_pipeline, matter_query_pipeline, Orchestrator, PipelineProfile, RunOutcome,
    RunStatus, TaskGraph,
};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "docket", about = "Multi-agent legal research orchestration")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "docket.toml", global = true)]
    config: PathBuf,

    /// Human-readable logs instead of JSON
    #[arg(long, global = true)]
    pretty: bool,

    /// Matters CSV to query instead of the built-in sample. Written with the
    /// sample matters first if it does not exist.
    #[arg(long, value_name = "CSV", global = true)]
    matters: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the configured pipeline and print the report
    Run {
        /// Run input as key=value (repeatable, overrides [inputs])
        #[arg(short, long = "input", value_parser = parse_input)]
        inputs: Vec<(ContextKey, Value)>,
        /// Also print every attempt
        #[arg(long)]
        audit: bool,
    },
    /// Validate the task graph and print its execution order
    Validate,
    /// Ask a question about the matters database
    Ask {
        /// Natural-language question
        question: String,
    },
    /// Chat about the matters database; the last few exchanges are kept as context
    Chat,
    /// Ask the predefined demo questions in turn
    Demo {
        /// Only ask question N (1-8)
        #[arg(value_parser = clap::value_parser!(u8).range(1..=8))]
        number: Option<u8>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if cli.pretty {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .json()
            .init();
    }

    let config = DocketConfig::load(&cli.config).await?;

    let matters = cli.matters.as_deref();

    match cli.command {
        Commands::Validate => validate(&config),
        Commands::Run { inputs, audit } => run(config, open_matters(matters)?, inputs, audit).await,
        Commands::Ask { question } => ask(config, open_matters(matters)?, question).await,
        Commands::Chat => chat(config, open_matters(matters)?).await,
        Commands::Demo { number } => demo(config, open_matters(matters)?, number).await,
    }
}

fn open_matters(path: Option<&Path>) -> anyhow::Result<Arc<MatterDatabase>> {
    let db = match path {
        None => MatterDatabase::with_sample_data()?,
        Some(path) => {
            if !path.exists() {
                info!(path = %path.display(), "Matters file not found, writing sample data");
                MatterDatabase::write_sample_csv(path)?;
            }
            MatterDatabase::load_csv(path)?
        }
    };
    Ok(Arc::new(db))
}

fn validate(config: &DocketConfig) -> anyhow::Result<()> {
    let (agents, tasks) = config.pipeline();
    let graph = TaskGraph::build_with_inputs(tasks, config.run.inputs.keys().cloned())?;
    graph.check_agents(|id| agents.iter().any(|a| &a.id == id))?;

    info!(tasks = graph.len(), "Task graph is valid");
    let report = serde_json::json!({
        "order": graph.order(),
        "inputs": graph.input_keys(),
        "terminal": graph.terminal_tasks(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn run(
    config: DocketConfig,
    db: Arc<MatterDatabase>,
    overrides: Vec<(ContextKey, Value)>,
    audit: bool,
) -> anyhow::Result<()> {
    let (agents, tasks) = config.pipeline();
    let registry = build_agents(agents, config.model()?, db);

    let mut inputs = config.run.inputs.clone();
    inputs.extend(overrides);

    let orchestrator = Orchestrator::new(config.run.orchestrator.clone(), registry);
    let outcome = orchestrator
        .run_with_cancel(tasks, inputs, cancel_on_ctrl_c())
        .await?;

    let output = if audit {
        serde_json::json!({
            "run_id": outcome.run_id,
            "report": outcome.report,
            "attempts": outcome.attempts,
            "agents": orchestrator.monitor().to_json().await,
        })
    } else {
        serde_json::to_value(&outcome.report)?
    };
    println!("{}", serde_json::to_string_pretty(&output)?);

    finish(&outcome)
}

/// Builds an orchestrator for one of the matter profiles.
fn matter_orchestrator(
    config: &DocketConfig,
    profile: &PipelineProfile,
    db: Arc<MatterDatabase>,
) -> anyhow::Result<Orchestrator> {
    let registry = build_agents(profile.agents.clone(), config.model()?, db);
    Ok(Orchestrator::new(config.run.orchestrator.clone(), registry))
}

async fn ask(config: DocketConfig, db: Arc<MatterDatabase>, question: String) -> anyhow::Result<()> {
    let profile = matter_query_pipeline();
    let orchestrator = matter_orchestrator(&config, &profile, db)?;

    let outcome = ask_question(&orchestrator, &profile, question, cancel_on_ctrl_c()).await?;
    println!("{}", text_output(&outcome, "answer"));
    finish(&outcome)
}

async fn ask_question(
    orchestrator: &Orchestrator,
    profile: &PipelineProfile,
    question: impl Into<Value>,
    cancel: CancellationSignal,
) -> anyhow::Result<RunOutcome> {
    let inputs = BTreeMap::from([(ContextKey::from("question"), question.into())]);
    profile.check_inputs(&inputs)?;
    Ok(orchestrator
        .run_with_cancel(profile.tasks.clone(), inputs, cancel)
        .await?)
}

async fn demo(
    config: DocketConfig,
    db: Arc<MatterDatabase>,
    number: Option<u8>,
) -> anyhow::Result<()> {
    let profile = matter_query_pipeline();
    let orchestrator = matter_orchestrator(&config, &profile, db)?;
    let cancel = cancel_on_ctrl_c();

    let selected: Vec<(usize, &str)> = DEMO_QUESTIONS
        .iter()
        .enumerate()
        .filter(|(idx, _)| number.is_none() || number.map(usize::from) == Some(idx + 1))
        .map(|(idx, question)| (idx + 1, *question))
        .collect();

    let mut failures = 0;
    for (n, question) in selected {
        if cancel.is_cancelled() {
            break;
        }
        println!("{n}. {question}");
        let outcome = ask_question(&orchestrator, &profile, question, cancel.clone()).await?;
        match finish(&outcome) {
            Ok(()) => println!("{}\n", text_output(&outcome, "answer")),
            Err(e) => {
                failures += 1;
                warn!(question = n, error = %e, "Demo question failed");
                println!("(no answer: {e})\n");
            }
        }
    }
    if failures > 0 {
        anyhow::bail!("{failures} demo question(s) failed");
    }
    Ok(())
}

async fn chat(config: DocketConfig, db: Arc<MatterDatabase>) -> anyhow::Result<()> {
    let profile = matter_chat_pipeline();
    let orchestrator = matter_orchestrator(&config, &profile, db)?;
    let mut history = ChatHistory::new(CHAT_HISTORY_TURNS);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!("Ask about your matters. Type 'exit' to leave.");
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let message = line.trim();
        if message.is_empty() {
            continue;
        }
        if is_exit(message) {
            break;
        }

        let inputs = BTreeMap::from([
            (ContextKey::from("history"), Value::from(history.render())),
            (ContextKey::from("message"), Value::from(message)),
        ]);
        profile.check_inputs(&inputs)?;
        let outcome = orchestrator.run(profile.tasks.clone(), inputs).await?;
        match finish(&outcome) {
            Ok(()) => {
                let reply = text_output(&outcome, "reply");
                println!("{reply}");
                history.push(message, reply);
            }
            Err(e) => {
                warn!(error = %e, "Chat turn failed");
                println!("Sorry, I could not answer that: {e}");
            }
        }
    }
    Ok(())
}

/// A terminal output as display text, or the run summary when it is missing.
fn text_output(outcome: &RunOutcome, key: &str) -> String {
    match outcome.report.terminal_outputs.get(&ContextKey::from(key)) {
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
        None => outcome.report.summary.clone(),
    }
}

fn finish(outcome: &RunOutcome) -> anyhow::Result<()> {
    let report = &outcome.report;
    match report.status {
        RunStatus::Aborted => anyhow::bail!(
            "run aborted: {}",
            report.abort_reason.as_deref().unwrap_or("unknown reason")
        ),
        RunStatus::Failed => anyhow::bail!("{}", report.summary),
        RunStatus::Completed | RunStatus::PartiallyFailed => Ok(()),
    }
}

/// A signal that fires on the first Ctrl-C.
fn cancel_on_ctrl_c() -> CancellationSignal {
    let cancel = CancellationSignal::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling run");
            trigger.cancel();
        }
    });
    cancel
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run_inputs() {
        let cli = Cli::try_parse_from([
            "docket",
            "--config",
            "custom.toml",
            "run",
            "--input",
            "matter_summary=Dog bite on a rental property",
            "--audit",
        ])
        .unwrap();
        assert_eq!(cli.config, PathBuf::from("custom.toml"));
        match cli.command {
            Commands::Run { inputs, audit } => {
                assert!(audit);
                assert_eq!(inputs.len(), 1);
                assert_eq!(inputs[0].0.as_str(), "matter_summary");
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_parse_chat_and_demo() {
        let cli = Cli::try_parse_from(["docket", "--matters", "firm.csv", "chat"]).unwrap();
        assert_eq!(cli.matters, Some(PathBuf::from("firm.csv")));
        assert!(matches!(cli.command, Commands::Chat));

        let cli = Cli::try_parse_from(["docket", "demo", "3"]).unwrap();
        assert!(matches!(cli.command, Commands::Demo { number: Some(3) }));
        let cli = Cli::try_parse_from(["docket", "demo"]).unwrap();
        assert!(matches!(cli.command, Commands::Demo { number: None }));
        assert!(Cli::try_parse_from(["docket", "demo", "9"]).is_err());
    }

    #[test]
    fn test_open_matters_writes_missing_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("matters.csv");
        let db = open_matters(Some(&path)).unwrap();
        assert!(path.exists());
        assert_eq!(db.count().unwrap(), 10);

        let db = open_matters(None).unwrap();
        assert_eq!(db.count().unwrap(), 10);
    }

    #[test]
    fn test_validate_bundled_pipeline() {
        let config = DocketConfig::parse(
            r#"
[inputs]
matter_summary = "Contract dispute over late delivery."
"#,
        )
        .unwrap();
        validate(&config).unwrap();
    }

    #[test]
    fn test_validate_rejects_missing_input() {
        let config = DocketConfig::parse("").unwrap();
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("matter_summary"));
    }
}

mod actors;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{CommandFactory, Parser, Subcommand};
use futures::future::BoxFuture;
use tokio_stream::StreamExt;
use tracing::info;
use tracing_subscriber::EnvFilter;

use covenant_core::config::AppConfig;
use covenant_core::error::Result as CovenantResult;
use covenant_core::event::WorkflowEvent;
use covenant_core::traits::PlanGenerator;
use covenant_core::types::ActorContext;
use covenant_workflow::{Handled, PlanBuilder, RunLogger, WorkflowExecutor, WorkflowService};

#[derive(Parser)]
#[command(name = "covenant", version, about = "Run agent task graphs in dependency-ordered waves")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "covenant.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a plan file and stream events as JSON lines
    Run {
        /// JSON plan (as a planner would emit it)
        plan: PathBuf,
        /// Override executor.max_parallel
        #[arg(long)]
        max_parallel: Option<usize>,
        /// Session id handed to actors (auto-generated if not provided)
        #[arg(short, long)]
        session: Option<String>,
    },
    /// Parse a plan file and print the normalized plan
    Plan {
        plan: PathBuf,
    },
    /// Show current configuration
    Config,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

/// Serves pre-written plan text in place of a model call.
struct FileGenerator {
    text: String,
}

impl PlanGenerator for FileGenerator {
    fn generate<'a>(
        &'a self,
        _request: &'a str,
        _context: &'a ActorContext,
    ) -> BoxFuture<'a, CovenantResult<String>> {
        Box::pin(async move { Ok(self.text.clone()) })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout carries events
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("covenant=info,covenant_workflow=info,warn")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();

    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "covenant", &mut std::io::stdout());
        return Ok(());
    }

    let mut config = AppConfig::load_or_default(&cli.config)?;

    match cli.command {
        Commands::Run {
            plan,
            max_parallel,
            session,
        } => {
            if let Some(n) = max_parallel {
                config.executor.max_parallel = n;
            }
            config.validate()?;
            let session = session.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            run_plan(&config, &plan, &session).await
        }
        Commands::Plan { plan } => {
            let text = std::fs::read_to_string(&plan)?;
            let builder = plan_builder(&config, text.clone());
            let parsed = builder.parse_plan(&text, text.trim());
            println!("{}", serde_json::to_string_pretty(&parsed)?);
            eprintln!(
                "{} task(s), {} edge(s), outcome {:?}",
                parsed.nodes.len(),
                parsed.snapshot().edges.len(),
                parsed.outcome
            );
            Ok(())
        }
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
        Commands::Completions { .. } => unreachable!("handled above"),
    }
}

fn plan_builder(config: &AppConfig, text: String) -> PlanBuilder {
    let builder = PlanBuilder::new(Arc::new(FileGenerator { text }), config.planner.clone());
    if config.planner.known_actors.is_empty() {
        builder.with_known_actors(actors::demo_registry().ids())
    } else {
        builder
    }
}

fn print_event(event: &WorkflowEvent) -> CovenantResult<()> {
    println!("{}", serde_json::to_string(event)?);
    Ok(())
}

async fn run_plan(config: &AppConfig, path: &Path, session: &str) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(path)?;
    let request = text.trim().to_string();

    let registry = Arc::new(actors::demo_registry());
    let executor = Arc::new(WorkflowExecutor::new(registry, config.executor.clone()));
    let service = WorkflowService::new(plan_builder(config, text), executor);

    let mut run = match service.handle(&request, session, ActorContext::new()).await? {
        Handled::Direct(content) => {
            println!("{}", content);
            return Ok(());
        }
        Handled::Running(run) => run,
    };

    if config.log.enabled {
        RunLogger::new(config.log_dir()).record(&mut run.events, print_event).await?;
    } else {
        while let Some(event) = run.events.next().await {
            print_event(&event)?;
        }
    }

    let (plan, report) = run.handle.await??;
    info!(
        workflow_id = %plan.id,
        status = %report.status,
        completion = report.completion,
        waves = report.waves,
        "Run complete"
    );
    eprintln!("{}", serde_json::to_string_pretty(&plan)?);
    Ok(())
}

//! Pipewatch CLI - run a pipeline under a monitor tree and report issues

use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use pipewatch_core::{RunLimits, Session, TokioScheduler, ValidateConfig};
use pipewatch_graph::sim::parse_launch;
use pipewatch_report::IssueId;
use pipewatch_scenario::ACTION_TYPES;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pipewatch")]
#[command(about = "Pipewatch - validate a running pipeline with a monitor tree")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a pipeline description under monitoring
    Run(RunArgs),
    /// List every known issue
    ListIssues,
    /// List scenario action types
    ListActions,
}

#[derive(Args)]
struct RunArgs {
    /// Launch description, e.g. "src ! dec[ parse ! decoder ] ! sink"
    description: String,

    /// Scenario file to execute
    #[arg(short, long)]
    scenario: Option<PathBuf>,

    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Stop after this many seconds
    #[arg(short, long)]
    duration: Option<f64>,

    /// Give up after this many seconds
    #[arg(short, long)]
    timeout: Option<f64>,

    /// Print the summary as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Some(Commands::Run(args)) => run(args).await,
        Some(Commands::ListIssues) => {
            list_issues(&mut io::stdout().lock())?;
            Ok(ExitCode::SUCCESS)
        }
        Some(Commands::ListActions) => {
            list_actions(&mut io::stdout().lock())?;
            Ok(ExitCode::SUCCESS)
        }
        None => {
            println!(
                "pipewatch v{} - Use --help for commands",
                env!("CARGO_PKG_VERSION")
            );
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn run(args: RunArgs) -> anyhow::Result<ExitCode> {
    let mut config = match &args.config {
        Some(path) => ValidateConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => ValidateConfig::default(),
    };
    config.apply_env()?;
    if let Some(scenario) = args.scenario {
        config.scenario.path = Some(scenario);
    }

    let mut limits = RunLimits::new();
    if let Some(secs) = args.duration {
        limits = limits.with_duration(seconds(secs).context("invalid --duration")?);
    }
    if let Some(secs) = args.timeout {
        limits = limits.with_timeout(seconds(secs).context("invalid --timeout")?);
    }

    let pipeline = parse_launch(&args.description).context("invalid pipeline description")?;
    let scheduler = Arc::new(TokioScheduler::current().context("no tokio runtime")?);
    let session = Session::new(config, pipeline, scheduler)?;
    info!(run = %session.runner().id(), "running {}", args.description);

    let reason = session.run(limits).await;
    let summary = session.finish();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        let mut out = io::stdout().lock();
        writeln!(out, "Stopped: {reason}")?;
        session.runner().print_summary(&mut out)?;
    }

    Ok(ExitCode::from(u8::try_from(summary.exit_code).unwrap_or(1)))
}

fn seconds(secs: f64) -> anyhow::Result<Duration> {
    Ok(Duration::try_from_secs_f64(secs)?)
}

fn list_issues(out: &mut impl Write) -> io::Result<()> {
    for id in IssueId::ALL {
        let issue = id.issue();
        writeln!(
            out,
            "{:<52} {:<9} {:<10} {}",
            id.key(),
            issue.default_level.name(),
            issue.area.name(),
            issue.summary
        )?;
    }
    Ok(())
}

fn list_actions(out: &mut impl Write) -> io::Result<()> {
    for action in ACTION_TYPES {
        writeln!(out, "{}: {}", action.name, action.description)?;
        if !action.mandatory.is_empty() {
            writeln!(out, "    mandatory: {}", action.mandatory.join(", "))?;
        }
        if !action.optional.is_empty() {
            writeln!(out, "    optional:  {}", action.optional.join(", "))?;
        }
    }
    Ok(())
}

#![forbid(unsafe_code)]

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

use quorum_harness::gateway::{NoopUsageSink, ProviderGateway, StderrUsageSink, UsageSink};
use quorum_harness::{
    default_roster, BackendDescriptor, EngineConfig, EngineError, QueryEngine, TaskPayload,
};

#[derive(Parser)]
#[command(name = "quorum", version, about = "Run one task against a weighted model panel")]
struct Cli {
    /// Task JSON file: {"system": "...", "user": "..."}
    #[arg(long)]
    task: PathBuf,
    /// Roster JSON file: [{"id": "...", "weight": 0.3, "timeout_secs": 30}, ...].
    /// Defaults to the built-in five-model panel.
    #[arg(long)]
    roster: Option<PathBuf>,
    /// Sub-field to salvage when a response envelope is unparseable
    #[arg(long)]
    expected_field: Option<String>,
    /// Cap on concurrent backend calls
    #[arg(long)]
    max_concurrency: Option<usize>,
    /// Print per-call usage records to stderr
    #[arg(long)]
    usage: bool,
}

#[derive(Deserialize)]
struct RosterEntry {
    id: String,
    weight: f64,
    timeout_secs: u64,
}

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

fn load_roster(path: &PathBuf) -> CliResult<Vec<BackendDescriptor>> {
    let text = fs::read_to_string(path)?;
    let entries: Vec<RosterEntry> = serde_json::from_str(&text)?;
    Ok(entries
        .into_iter()
        .map(|e| BackendDescriptor::new(e.id, e.weight, Duration::from_secs(e.timeout_secs)))
        .collect())
}

async fn run(cli: Cli) -> CliResult<ExitCode> {
    let task: TaskPayload = serde_json::from_str(&fs::read_to_string(&cli.task)?)?;

    let roster = match &cli.roster {
        Some(path) => load_roster(path)?,
        None => default_roster(),
    };

    let config = EngineConfig {
        max_concurrency: cli.max_concurrency,
        expected_field: cli.expected_field.clone(),
        ..EngineConfig::default()
    };

    let engine = if cli.usage {
        let sink: Arc<StderrUsageSink> = Arc::new(StderrUsageSink);
        build_engine(sink, config)?
    } else {
        let sink: Arc<NoopUsageSink> = Arc::new(NoopUsageSink);
        build_engine(sink, config)?
    };

    match engine.run_aggregated_query(task, &roster).await {
        Ok(decision) => {
            println!("{}", serde_json::to_string_pretty(&decision)?);
            Ok(ExitCode::SUCCESS)
        }
        Err(EngineError::NoValidResponses { backend_errors }) => {
            eprintln!(
                "hard failure: no backend produced a usable response\n{}",
                serde_json::to_string_pretty(&backend_errors)?
            );
            Ok(ExitCode::FAILURE)
        }
        Err(err) => {
            eprintln!("error: {err}");
            Ok(ExitCode::FAILURE)
        }
    }
}

fn build_engine<U: UsageSink + 'static>(
    sink: Arc<U>,
    config: EngineConfig,
) -> CliResult<QueryEngine> {
    let gateway = ProviderGateway::from_env(sink)?;
    Ok(QueryEngine::new(Arc::new(gateway), config))
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

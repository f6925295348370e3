use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};
use prosearch_core::{
    ConfigLoader, ResearchAgent, RunOptions, init_telemetry, metrics, render_workflow_mermaid,
};
use std::path::PathBuf;
use tokio::runtime::Runtime;
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "prosearch",
    version,
    about = "Iterative web research with cited answers"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Research a question and print the cited answer.
    Run(RunArgs),
    /// Print the research loop as a Mermaid flowchart.
    Graph,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Question to research.
    #[arg(long)]
    question: String,

    /// TOML configuration file (defaults to `PROSEARCH_CONFIG` or `prosearch.toml`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of search queries generated for the first pass.
    #[arg(long)]
    initial_queries: Option<usize>,

    /// Upper bound on reflection passes for this run.
    #[arg(long)]
    max_research_loops: Option<u32>,

    /// Model used for reflection and the final answer.
    #[arg(long)]
    reasoning_model: Option<String>,

    /// Directory where the run trace is written as JSON.
    #[arg(long)]
    trace_dir: Option<PathBuf>,

    /// Explicit run identifier (generated when omitted).
    #[arg(long)]
    run_id: Option<String>,

    /// Print the step trace after the answer in the given format.
    #[arg(long, value_enum)]
    trace_format: Option<TraceFormat>,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum TraceFormat {
    Markdown,
    Mermaid,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    match cli.command {
        Command::Graph => {
            println!("{}", render_workflow_mermaid());
            Ok(())
        }
        Command::Run(args) => {
            let rt = Runtime::new()?;
            rt.block_on(run_command(args))
        }
    }
}

async fn run_command(args: RunArgs) -> Result<()> {
    let config = ConfigLoader::load(args.config.clone())?;

    init_telemetry(&config.logging)?;
    metrics::init_metrics_from_env("prosearch-cli");

    let credentials = config.credentials()?;
    let agent = ResearchAgent::from_config(&config, credentials)?;

    let mut options = RunOptions::new(&args.question).with_run_log(config.logging.run_log);
    if let Some(run_id) = args.run_id {
        options = options.with_run_id(run_id);
    }
    if let Some(count) = args.initial_queries {
        options = options.with_initial_search_query_count(count);
    }
    if let Some(max) = args.max_research_loops {
        options = options.with_max_research_loops(max);
    }
    if let Some(model) = args.reasoning_model {
        options = options.with_reasoning_model(model);
    }
    if let Some(dir) = args.trace_dir {
        options = options.with_trace_dir(dir);
    }

    info!(question = %args.question, "starting research run");
    let outcome = agent.run(options).await?;

    println!("{}", outcome.answer);
    match args.trace_format {
        Some(TraceFormat::Markdown) => println!("\n{}", outcome.trace_summary.render_markdown()),
        Some(TraceFormat::Mermaid) => println!("\n{}", outcome.trace_summary.render_mermaid()),
        None => {}
    }
    if let Some(path) = &outcome.trace_path {
        info!(run_id = %outcome.run_id, path = %path.display(), "trace written");
    }

    Ok(())
}

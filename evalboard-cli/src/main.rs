use anyhow::Result;
use clap::{Parser, Subcommand};
use evalboard_evals::ProjectId;

mod commands;
mod config;

#[derive(Parser)]
#[command(name = "evalboard", about = "Run, score and compare LLM evaluation suites")]
#[command(version, propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Project whose suite and runs to operate on
    #[arg(short, long, global = true, default_value_t = 1)]
    project: i64,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage configuration
    Config(commands::config::ConfigArgs),
    /// Compare two runs test by test
    Compare(commands::report::CompareArgs),
    /// Export a run's results as CSV
    Export(commands::report::ExportArgs),
    /// Show project health metrics
    Health(commands::report::HealthArgs),
    /// Manage prompt template versions
    Prompts(commands::prompts::PromptsArgs),
    /// Run the test suite against a model
    Run(commands::runs::RunArgs),
    /// Inspect runs and override scores
    Runs(commands::runs::RunsArgs),
    /// Manage the test suite
    Tests(commands::suite::TestsArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let project = ProjectId(cli.project);
    match cli.command {
        Commands::Config(args) => commands::config::run(args),
        Commands::Compare(args) => commands::report::compare(args).await,
        Commands::Export(args) => commands::report::export(args).await,
        Commands::Health(args) => commands::report::health(project, args).await,
        Commands::Prompts(args) => commands::prompts::run(project, args).await,
        Commands::Run(args) => commands::runs::start(project, args).await,
        Commands::Runs(args) => commands::runs::run(project, args).await,
        Commands::Tests(args) => commands::suite::run(project, args).await,
    }
}

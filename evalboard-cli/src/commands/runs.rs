//! Evaluation run commands: start a run, inspect results, override scores.

use anyhow::Result;
use clap::{Args, Subcommand};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};
use evalboard_evals::{
    CancellationToken, ModelConfig, ProjectId, PromptVersionId, Run, RunDetail, RunId, Score,
    TestCaseId,
};
use tracing::warn;

use super::{open_manager, truncate_str};

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Model to evaluate (e.g. llama3.2)
    pub model: String,

    /// Prompt version id to wrap each test prompt in
    #[arg(long)]
    pub prompt_version: Option<PromptVersionId>,
}

#[derive(Args, Debug)]
pub struct RunsArgs {
    #[command(subcommand)]
    pub command: RunsCommands,
}

#[derive(Subcommand, Debug)]
pub enum RunsCommands {
    /// List the project's runs, newest first
    List,
    /// Show a run and its per-test results
    Show {
        run_id: RunId,

        /// Print full outputs instead of truncating them
        #[arg(long)]
        full: bool,
    },
    /// Manually set the score of one result (0 = fail, 2 = pass)
    Override {
        run_id: RunId,
        test_id: i64,
        score: i64,
    },
}

/// Run the project's suite against a model.
///
/// Ctrl-C stops dispatching new test cases; calls already in flight finish
/// and the run is recorded as failed.
pub async fn start(project: ProjectId, args: RunArgs) -> Result<()> {
    let manager = open_manager().await?;

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling run");
            trigger.cancel();
        }
    });

    println!("Running suite for project {project} against {}...", args.model);
    let run = manager
        .run_with_cancel(
            project,
            &ModelConfig::new(args.model),
            args.prompt_version,
            cancel,
        )
        .await?;

    print_run_summary(&run);
    Ok(())
}

pub async fn run(project: ProjectId, args: RunsArgs) -> Result<()> {
    match args.command {
        RunsCommands::List => list_runs(project).await,
        RunsCommands::Show { run_id, full } => show_run(run_id, full).await,
        RunsCommands::Override {
            run_id,
            test_id,
            score,
        } => override_score(project, run_id, TestCaseId(test_id), score).await,
    }
}

async fn list_runs(project: ProjectId) -> Result<()> {
    let manager = open_manager().await?;
    let runs = manager.list_runs(project).await?;

    if runs.is_empty() {
        println!("No runs in project {project}.");
        println!("Start one with: evalboard run <model>");
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Run").fg(Color::Cyan),
            Cell::new("Model").fg(Color::Cyan),
            Cell::new("Status").fg(Color::Cyan),
            Cell::new("Pass").fg(Color::Cyan),
            Cell::new("Rate").fg(Color::Cyan),
            Cell::new("Cost").fg(Color::Cyan),
            Cell::new("Created").fg(Color::Cyan),
        ]);

    for run in &runs {
        table.add_row(vec![
            Cell::new(run.id),
            Cell::new(&run.model),
            Cell::new(run.status.as_str()),
            Cell::new(format!("{}/{}", run.correct, run.total_tests)),
            Cell::new(format!("{}%", run.pass_rate())),
            Cell::new(format_cost(run.estimated_cost)),
            Cell::new(run.created_at.format("%Y-%m-%d %H:%M")),
        ]);
    }

    println!("{table}");
    Ok(())
}

async fn show_run(run_id: RunId, full: bool) -> Result<()> {
    let manager = open_manager().await?;
    let run = manager.get_run(run_id).await?;
    let details = manager.get_details(run_id).await?;

    print_run_summary(&run);
    if details.is_empty() {
        println!("\nNo results recorded.");
        return Ok(());
    }

    println!();
    println!("{}", details_table(&details, full));
    Ok(())
}

async fn override_score(
    project: ProjectId,
    run_id: RunId,
    test_id: TestCaseId,
    score: i64,
) -> Result<()> {
    let manager = open_manager().await?;
    let run = manager.override_score(project, run_id, test_id, score).await?;
    let label = Score::try_from(score)?.label();
    println!("Test {test_id} in run {run_id} set to {label}");
    println!(
        "Run now {}/{} correct ({}%)",
        run.correct,
        run.total_tests,
        run.pass_rate()
    );
    Ok(())
}

fn details_table(details: &[RunDetail], full: bool) -> Table {
    let width = if full { usize::MAX } else { 50 };
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Test").fg(Color::Cyan),
            Cell::new("Score").fg(Color::Cyan),
            Cell::new("Output").fg(Color::Cyan),
            Cell::new("Expected").fg(Color::Cyan),
            Cell::new("Tries").fg(Color::Cyan),
        ]);

    for detail in details {
        table.add_row(vec![
            Cell::new(detail.test_id),
            score_cell(detail),
            Cell::new(truncate_str(&detail.output, width)),
            Cell::new(
                detail
                    .expected
                    .as_deref()
                    .map(|e| truncate_str(e, width))
                    .unwrap_or_else(|| "-".to_string()),
            ),
            Cell::new(detail.attempts),
        ]);
    }
    table
}

fn score_cell(detail: &RunDetail) -> Cell {
    let mut text = detail.score.label().to_string();
    if detail.needs_review {
        text.push_str(" (review)");
    }
    let color = if detail.score.is_pass() {
        Color::Green
    } else if detail.needs_review {
        Color::Yellow
    } else {
        Color::Red
    };
    Cell::new(text).fg(color)
}

fn print_run_summary(run: &Run) {
    println!("{}", "─".repeat(60));
    println!("Run:     {}", run.id);
    println!("Model:   {}", run.model);
    println!("Status:  {}", run.status.as_str());
    if let Some(reason) = &run.failure_reason {
        println!("Reason:  {reason}");
    }
    println!(
        "Score:   {}/{} correct ({}%)",
        run.correct,
        run.total_tests,
        run.pass_rate()
    );
    println!(
        "Tokens:  {} in / {} out",
        run.total_input_tokens, run.total_output_tokens
    );
    println!("Cost:    {}", format_cost(run.estimated_cost));
    println!("{}", "─".repeat(60));
}

fn format_cost(cost: f64) -> String {
    if cost == 0.0 {
        "free".to_string()
    } else if cost < 0.01 {
        format!("${cost:.4}")
    } else {
        format!("${cost:.2}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_cost_free() {
        assert_eq!(format_cost(0.0), "free");
    }

    #[test]
    fn test_format_cost_small_amounts_keep_precision() {
        assert_eq!(format_cost(0.0012), "$0.0012");
        assert_eq!(format_cost(1.5), "$1.50");
    }
}

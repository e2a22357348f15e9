//! Reporting commands: project health, run comparison, CSV export.

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};
use evalboard_evals::{Change, Comparison, HealthMetrics, ProjectId, RunId};

use super::{open_manager, truncate_str};

#[derive(Args, Debug)]
pub struct HealthArgs {
    /// Print metrics as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct CompareArgs {
    /// Baseline run
    pub run_a: RunId,
    /// Candidate run
    pub run_b: RunId,

    /// Only show tests whose verdict changed
    #[arg(long)]
    pub changed: bool,

    /// Print the comparison as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct ExportArgs {
    pub run_id: RunId,

    /// Write to a file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

pub async fn health(project: ProjectId, args: HealthArgs) -> Result<()> {
    let manager = open_manager().await?;
    let metrics = manager.health(project).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&metrics)?);
    } else {
        print_health(project, &metrics);
    }
    Ok(())
}

fn print_health(project: ProjectId, metrics: &HealthMetrics) {
    println!("Project {project} health");
    println!("{}", "─".repeat(40));
    println!("Pass rate:        {}%", metrics.pass_rate);
    println!("Drift:            {}", format_drift(metrics.drift));
    println!("Regressions:      {}", metrics.regression_score);
    println!("Models compared:  {}", metrics.models_compared);

    if !metrics.worst_failing_tests.is_empty() {
        println!("\nWorst failing tests:");
        for test in &metrics.worst_failing_tests {
            println!(
                "  #{:<5} {:>3} failure(s)  {}",
                test.test_id,
                test.failure_count,
                truncate_str(&test.prompt, 50)
            );
        }
    }

    if !metrics.history.is_empty() {
        println!("\nHistory:");
        for point in &metrics.history {
            println!(
                "  {}  {:>3}%  {}",
                point.created_at.format("%Y-%m-%d %H:%M"),
                point.pass_rate,
                point.model
            );
        }
    }
}

fn format_drift(drift: i32) -> String {
    if drift > 0 {
        format!("+{drift}")
    } else {
        drift.to_string()
    }
}

pub async fn compare(args: CompareArgs) -> Result<()> {
    let manager = open_manager().await?;
    let comparison = manager.compare(args.run_a, args.run_b).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&comparison)?);
    } else {
        print_comparison(&comparison, args.changed);
    }
    Ok(())
}

fn print_comparison(comparison: &Comparison, changed_only: bool) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Test").fg(Color::Cyan),
            Cell::new("Prompt").fg(Color::Cyan),
            Cell::new("A").fg(Color::Cyan),
            Cell::new("B").fg(Color::Cyan),
            Cell::new("Change").fg(Color::Cyan),
        ]);

    for row in &comparison.rows {
        if changed_only && row.change == Change::Unchanged {
            continue;
        }
        let change = match row.change {
            Change::Unchanged => Cell::new("-"),
            Change::Improved => Cell::new("improved").fg(Color::Green),
            Change::Regressed => Cell::new("regressed").fg(Color::Red),
        };
        table.add_row(vec![
            Cell::new(row.test_id),
            Cell::new(truncate_str(&row.prompt, 50)),
            Cell::new(row.run_a_score.label()),
            Cell::new(row.run_b_score.label()),
            change,
        ]);
    }

    println!("A: {}", comparison.run_a);
    println!("B: {}", comparison.run_b);
    println!("{table}");
    let summary = &comparison.summary;
    println!(
        "\n{} unchanged, {} improved, {} regressed",
        summary.unchanged, summary.improved, summary.regressed
    );
}

pub async fn export(args: ExportArgs) -> Result<()> {
    let manager = open_manager().await?;
    let bytes = manager.export_csv(args.run_id).await?;

    match args.output {
        Some(path) => {
            std::fs::write(&path, &bytes).with_context(|| format!("writing {}", path.display()))?;
            eprintln!("Exported run {} to {}", args.run_id, path.display());
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&bytes)?;
            stdout.flush()?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_drift_signs() {
        assert_eq!(format_drift(12), "+12");
        assert_eq!(format_drift(0), "0");
        assert_eq!(format_drift(-7), "-7");
    }
}

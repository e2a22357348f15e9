//! Test suite management commands.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Args, Subcommand};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};
use evalboard_evals::{NewTestCase, ProjectId, TaskType, TestCaseId};

use super::{open_manager, truncate_str};

#[derive(Args, Debug)]
pub struct TestsArgs {
    #[command(subcommand)]
    pub command: TestsCommands,
}

#[derive(Subcommand, Debug)]
pub enum TestsCommands {
    /// Add a test case to the project's suite
    Add {
        /// Question sent to the model
        prompt: String,

        /// Reference answer used for scoring
        #[arg(long)]
        expected: Option<String>,

        /// Task category (general, math, code, rag, safety)
        #[arg(long, default_value = "general")]
        task_type: String,

        /// Reference material for rag cases
        #[arg(long)]
        context: Option<String>,
    },
    /// List the project's test cases
    List,
    /// Delete a test case
    Delete {
        id: i64,
    },
    /// Import test cases from a CSV file with a header row
    Import {
        file: PathBuf,
    },
}

pub async fn run(project: ProjectId, args: TestsArgs) -> Result<()> {
    match args.command {
        TestsCommands::Add {
            prompt,
            expected,
            task_type,
            context,
        } => add_test(project, prompt, expected, &task_type, context).await,
        TestsCommands::List => list_tests(project).await,
        TestsCommands::Delete { id } => delete_test(TestCaseId(id)).await,
        TestsCommands::Import { file } => import_tests(project, &file).await,
    }
}

fn parse_task_type(s: &str) -> Result<TaskType> {
    match TaskType::parse(s) {
        Some(task_type) => Ok(task_type),
        None => bail!("Unknown task type: {s}. Valid: general, math, code, rag, safety"),
    }
}

async fn add_test(
    project: ProjectId,
    prompt: String,
    expected: Option<String>,
    task_type: &str,
    context: Option<String>,
) -> Result<()> {
    let manager = open_manager().await?;
    let case = manager
        .add_test_case(
            project,
            NewTestCase {
                prompt,
                expected,
                task_type: parse_task_type(task_type)?,
                context,
            },
        )
        .await?;
    println!("Added test case {}", case.id);
    Ok(())
}

async fn list_tests(project: ProjectId) -> Result<()> {
    let manager = open_manager().await?;
    let cases = manager.list_test_cases(project).await?;

    if cases.is_empty() {
        println!("No test cases in project {project}.");
        println!("Add one with: evalboard tests add \"<prompt>\" --expected \"<answer>\"");
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("ID").fg(Color::Cyan),
            Cell::new("Type").fg(Color::Cyan),
            Cell::new("Prompt").fg(Color::Cyan),
            Cell::new("Expected").fg(Color::Cyan),
        ]);

    for case in &cases {
        table.add_row(vec![
            Cell::new(case.id),
            Cell::new(case.task_type.as_str()),
            Cell::new(truncate_str(&case.prompt, 60)),
            Cell::new(
                case.expected_answer()
                    .map(|e| truncate_str(e, 40))
                    .unwrap_or_else(|| "-".to_string()),
            ),
        ]);
    }

    println!("{table}");
    println!("\n{} test case(s)", cases.len());
    Ok(())
}

async fn delete_test(id: TestCaseId) -> Result<()> {
    let manager = open_manager().await?;
    manager.delete_test_case(id).await?;
    println!("Deleted test case {id}");
    Ok(())
}

async fn import_tests(project: ProjectId, file: &Path) -> Result<()> {
    let csv = std::fs::read_to_string(file)
        .with_context(|| format!("reading {}", file.display()))?;
    let manager = open_manager().await?;
    let added = manager.import_test_cases(project, &csv).await?;
    println!("Imported {} test case(s) from {}", added.len(), file.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_task_type_accepts_known_names() {
        assert_eq!(parse_task_type("math").unwrap(), TaskType::Math);
        assert_eq!(parse_task_type("rag").unwrap(), TaskType::Rag);
    }

    #[test]
    fn test_parse_task_type_rejects_unknown() {
        let err = parse_task_type("poetry").unwrap_err();
        assert!(err.to_string().contains("poetry"));
    }
}

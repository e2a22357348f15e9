//! Prompt template versioning commands.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};
use evalboard_evals::{DEFAULT_TEMPLATE, ProjectId};

use super::{open_manager, truncate_str};

#[derive(Args, Debug)]
pub struct PromptsArgs {
    #[command(subcommand)]
    pub command: PromptsCommands,
}

#[derive(Subcommand, Debug)]
pub enum PromptsCommands {
    /// Save a new prompt template version
    ///
    /// The template must contain exactly one `{{prompt}}` placeholder.
    Add {
        /// Template text (defaults to the built-in assistant template)
        template: Option<String>,

        /// Read the template from a file instead
        #[arg(long, conflicts_with = "template")]
        file: Option<PathBuf>,
    },
    /// List saved prompt versions
    List,
}

pub async fn run(project: ProjectId, args: PromptsArgs) -> Result<()> {
    match args.command {
        PromptsCommands::Add { template, file } => {
            let template = match (template, file) {
                (Some(text), _) => text,
                (None, Some(path)) => std::fs::read_to_string(&path)
                    .with_context(|| format!("reading {}", path.display()))?,
                (None, None) => DEFAULT_TEMPLATE.to_string(),
            };
            add_prompt(project, &template).await
        }
        PromptsCommands::List => list_prompts(project).await,
    }
}

async fn add_prompt(project: ProjectId, template: &str) -> Result<()> {
    let manager = open_manager().await?;
    let version = manager.add_prompt_version(project, template).await?;
    println!("Saved prompt version v{} ({})", version.version, version.id);
    Ok(())
}

async fn list_prompts(project: ProjectId) -> Result<()> {
    let manager = open_manager().await?;
    let versions = manager.list_prompt_versions(project).await?;

    if versions.is_empty() {
        println!("No prompt versions in project {project}.");
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Version").fg(Color::Cyan),
            Cell::new("ID").fg(Color::Cyan),
            Cell::new("Created").fg(Color::Cyan),
            Cell::new("Template").fg(Color::Cyan),
        ]);

    for version in &versions {
        table.add_row(vec![
            Cell::new(format!("v{}", version.version)),
            Cell::new(version.id),
            Cell::new(version.created_at.format("%Y-%m-%d %H:%M")),
            Cell::new(truncate_str(&version.template, 60)),
        ]);
    }

    println!("{table}");
    Ok(())
}

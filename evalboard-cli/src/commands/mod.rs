//! Subcommand implementations.
//!
//! Every command that touches evaluation data opens the configured store and
//! goes through [`EvalManager`]; nothing here talks to the database directly.

pub mod config;
pub mod prompts;
pub mod report;
pub mod runs;
pub mod suite;

use std::sync::Arc;

use anyhow::{Context, Result};
use evalboard_evals::{EvalManager, TursoStore};
use evalboard_models::ModelProvider;
use evalboard_models::providers::{EchoProvider, OllamaProvider};
use tracing::debug;

use crate::config::{ConfigLoader, EvalboardConfig, ProviderKind};

/// Load configuration and build a manager over the configured store and provider.
pub async fn open_manager() -> Result<EvalManager> {
    let config = ConfigLoader::load()?;
    build_manager(&config).await
}

async fn build_manager(config: &EvalboardConfig) -> Result<EvalManager> {
    let store = match &config.storage.url {
        Some(url) => {
            debug!(%url, "opening remote database");
            let token = config.storage.auth_token.as_deref().unwrap_or_default();
            TursoStore::new_remote(url, token)
                .await
                .with_context(|| format!("connecting to {url}"))?
        }
        None => {
            let path = &config.storage.path;
            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
            {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
            debug!(path = %path.display(), "opening local database");
            TursoStore::new_local(path)
                .await
                .with_context(|| format!("opening {}", path.display()))?
        }
    };

    let provider: Arc<dyn ModelProvider> = match config.provider.kind {
        ProviderKind::Echo => Arc::new(EchoProvider::new()),
        ProviderKind::Ollama => Arc::new(OllamaProvider::with_base_url(&config.provider.host)),
    };

    let store = Arc::new(store);
    Ok(EvalManager::new(store.clone(), store, provider)
        .with_runner_config(config.runner.to_runner_config())
        .with_health_config(config.health.to_health_config()))
}

/// Shorten `s` to at most `max` characters on a single line.
pub(crate) fn truncate_str(s: &str, max: usize) -> String {
    let flat: String = s
        .chars()
        .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
        .collect();
    if flat.chars().count() <= max {
        flat
    } else {
        let kept: String = flat.chars().take(max.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}

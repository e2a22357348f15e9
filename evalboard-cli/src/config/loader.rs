use super::types::{
    DEFAULT_OLLAMA_HOST, EvalboardConfig, HealthSection, ProviderConfig, RawEvalboardConfig,
    RawHealthConfig, RawProviderConfig, RawRunnerConfig, RawStorageConfig, RunnerSection,
    StorageConfig,
};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load merged configuration (user + project)
    pub fn load() -> Result<EvalboardConfig> {
        let user_path = Self::user_config_path();
        let project_path = Self::project_config_path();
        Self::load_layers(&[user_path.as_path(), project_path.as_path()])
    }

    /// Get user config path (`$XDG_CONFIG_HOME/evalboard/config.toml`)
    pub fn user_config_path() -> PathBuf {
        evalboard_paths::config_dir().join("config.toml")
    }

    /// Get project config path
    /// Can be overridden with EVALBOARD_PROJECT_CONFIG_DIR env var (useful for isolated e2e tests)
    pub fn project_config_path() -> PathBuf {
        if let Ok(dir) = std::env::var("EVALBOARD_PROJECT_CONFIG_DIR") {
            PathBuf::from(dir).join("config.toml")
        } else {
            PathBuf::from(".evalboard/config.toml")
        }
    }

    /// Apply each existing file in order, later layers winning.
    fn load_layers(paths: &[&Path]) -> Result<EvalboardConfig> {
        let mut raw = RawEvalboardConfig::default();
        for path in paths {
            if !path.exists() {
                continue;
            }
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            let layer: RawEvalboardConfig = toml::from_str(&contents)
                .with_context(|| format!("parsing {}", path.display()))?;
            raw = Self::merge_raw(raw, layer);
        }
        Ok(Self::finalize(raw))
    }

    /// Merge two raw configs (overlay values override base only if explicitly set)
    fn merge_raw(base: RawEvalboardConfig, overlay: RawEvalboardConfig) -> RawEvalboardConfig {
        RawEvalboardConfig {
            storage: RawStorageConfig {
                path: overlay.storage.path.or(base.storage.path),
                url: overlay.storage.url.or(base.storage.url),
                auth_token: overlay.storage.auth_token.or(base.storage.auth_token),
            },
            runner: RawRunnerConfig {
                parallelism: overlay.runner.parallelism.or(base.runner.parallelism),
                max_attempts: overlay.runner.max_attempts.or(base.runner.max_attempts),
                retry_backoff_ms: overlay
                    .runner
                    .retry_backoff_ms
                    .or(base.runner.retry_backoff_ms),
                call_timeout_secs: overlay
                    .runner
                    .call_timeout_secs
                    .or(base.runner.call_timeout_secs),
            },
            provider: RawProviderConfig {
                kind: overlay.provider.kind.or(base.provider.kind),
                host: overlay.provider.host.or(base.provider.host),
            },
            health: RawHealthConfig {
                top_failing: overlay.health.top_failing.or(base.health.top_failing),
            },
        }
    }

    /// Convert raw config to final config with defaults applied
    fn finalize(raw: RawEvalboardConfig) -> EvalboardConfig {
        let runner = RunnerSection::default();
        EvalboardConfig {
            storage: StorageConfig {
                path: raw
                    .storage
                    .path
                    .unwrap_or_else(evalboard_paths::default_database_path),
                url: raw.storage.url,
                auth_token: raw.storage.auth_token,
            },
            runner: RunnerSection {
                parallelism: raw.runner.parallelism.unwrap_or(runner.parallelism),
                max_attempts: raw.runner.max_attempts.unwrap_or(runner.max_attempts),
                retry_backoff_ms: raw.runner.retry_backoff_ms.unwrap_or(runner.retry_backoff_ms),
                call_timeout_secs: raw
                    .runner
                    .call_timeout_secs
                    .unwrap_or(runner.call_timeout_secs),
            },
            provider: ProviderConfig {
                kind: raw.provider.kind.unwrap_or_default(),
                host: raw
                    .provider
                    .host
                    .unwrap_or_else(|| DEFAULT_OLLAMA_HOST.to_string()),
            },
            health: HealthSection {
                top_failing: raw
                    .health
                    .top_failing
                    .unwrap_or(HealthSection::default().top_failing),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::ProviderKind;
    use serial_test::serial;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_config(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_missing_files_yield_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("nope.toml");

        let config = ConfigLoader::load_layers(&[missing.as_path()]).unwrap();

        assert_eq!(config.runner.parallelism, 4);
        assert_eq!(config.provider.kind, ProviderKind::Ollama);
    }

    #[test]
    fn test_project_layer_overrides_user_layer() {
        let temp_dir = TempDir::new().unwrap();
        let user = write_config(
            &temp_dir,
            "user.toml",
            "[runner]\nparallelism = 2\nmax_attempts = 7\n\n[provider]\nhost = \"http://gpu:11434\"\n",
        );
        let project = write_config(
            &temp_dir,
            "project.toml",
            "[runner]\nparallelism = 16\n\n[provider]\nkind = \"echo\"\n",
        );

        let config = ConfigLoader::load_layers(&[user.as_path(), project.as_path()]).unwrap();

        assert_eq!(config.runner.parallelism, 16);
        assert_eq!(config.runner.max_attempts, 7, "unset project key keeps user value");
        assert_eq!(config.provider.kind, ProviderKind::Echo);
        assert_eq!(config.provider.host, "http://gpu:11434");
    }

    #[test]
    fn test_merge_keeps_base_when_overlay_is_empty() {
        let base: RawEvalboardConfig =
            toml::from_str("[storage]\npath = \"/data/a.db\"\n\n[health]\ntop_failing = 3\n")
                .unwrap();

        let merged = ConfigLoader::merge_raw(base, RawEvalboardConfig::default());
        let config = ConfigLoader::finalize(merged);

        assert_eq!(config.storage.path, PathBuf::from("/data/a.db"));
        assert_eq!(config.health.top_failing, 3);
    }

    #[test]
    fn test_invalid_toml_reports_path() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_config(&temp_dir, "broken.toml", "[runner\nparallelism = ");

        let err = ConfigLoader::load_layers(&[path.as_path()]).unwrap_err();

        assert!(format!("{err:#}").contains("broken.toml"));
    }

    #[test]
    #[serial]
    fn test_project_config_path_honours_env_override() {
        let temp_dir = TempDir::new().unwrap();
        // SAFETY: serialized with other env-mutating tests
        unsafe { std::env::set_var("EVALBOARD_PROJECT_CONFIG_DIR", temp_dir.path()) };
        let path = ConfigLoader::project_config_path();
        unsafe { std::env::remove_var("EVALBOARD_PROJECT_CONFIG_DIR") };

        assert_eq!(path, temp_dir.path().join("config.toml"));
    }

    #[test]
    #[serial]
    fn test_project_config_path_defaults_to_dot_dir() {
        // SAFETY: serialized with other env-mutating tests
        unsafe { std::env::remove_var("EVALBOARD_PROJECT_CONFIG_DIR") };
        assert_eq!(
            ConfigLoader::project_config_path(),
            PathBuf::from(".evalboard/config.toml")
        );
    }

    #[test]
    #[serial]
    fn test_user_config_path_uses_xdg_config_home() {
        let temp_dir = TempDir::new().unwrap();
        let previous = std::env::var("XDG_CONFIG_HOME").ok();
        // SAFETY: serialized with other env-mutating tests
        unsafe { std::env::set_var("XDG_CONFIG_HOME", temp_dir.path()) };
        let path = ConfigLoader::user_config_path();
        match previous {
            Some(value) => unsafe { std::env::set_var("XDG_CONFIG_HOME", value) },
            None => unsafe { std::env::remove_var("XDG_CONFIG_HOME") },
        }

        assert_eq!(path, temp_dir.path().join("evalboard").join("config.toml"));
    }
}

//! End-to-end tests for the evalboard binary
//!
//! These tests drive the compiled binary against a throwaway database with the
//! offline echo provider, and are gated behind the `integration` feature flag.
//! Run with:
//!
//! ```sh
//! cargo test -p evalboard-cli --features integration
//! ```

#![cfg(feature = "integration")]

use std::process::{Command, Output};

use tempfile::TempDir;

/// An isolated config + data directory for one test.
struct Sandbox {
    dir: TempDir,
}

impl Sandbox {
    fn new() -> Self {
        let dir = TempDir::new().expect("create temp dir");
        let project = dir.path().join("project");
        std::fs::create_dir_all(&project).unwrap();
        let db = dir.path().join("evals.db");
        std::fs::write(
            project.join("config.toml"),
            format!(
                "[storage]\npath = {:?}\n\n[provider]\nkind = \"echo\"\n\n[runner]\nretry_backoff_ms = 1\n",
                db.display().to_string()
            ),
        )
        .unwrap();
        Self { dir }
    }

    fn run(&self, args: &[&str]) -> Output {
        Command::new(env!("CARGO_BIN_EXE_evalboard"))
            .args(args)
            .env("XDG_CONFIG_HOME", self.dir.path().join("xdg-config"))
            .env("XDG_DATA_HOME", self.dir.path().join("xdg-data"))
            .env("EVALBOARD_PROJECT_CONFIG_DIR", self.dir.path().join("project"))
            .output()
            .expect("failed to run evalboard")
    }

    fn stdout(&self, args: &[&str]) -> String {
        let output = self.run(args);
        assert!(
            output.status.success(),
            "evalboard {args:?} failed: {}",
            String::from_utf8_lossy(&output.stderr)
        );
        String::from_utf8_lossy(&output.stdout).into_owned()
    }
}

fn run_id_from(stdout: &str) -> String {
    stdout
        .lines()
        .find_map(|line| line.strip_prefix("Run:"))
        .map(|id| id.trim().to_string())
        .expect("run id in output")
}

#[test]
fn evalboard_help_lists_commands() {
    let stdout = Sandbox::new().stdout(&["--help"]);
    assert!(stdout.contains("Run, score and compare LLM evaluation suites"));
    for command in ["tests", "prompts", "run", "runs", "health", "compare", "export", "config"] {
        assert!(stdout.contains(command), "missing {command}");
    }
}

#[test]
fn evalboard_config_show_merges_project_config() {
    let stdout = Sandbox::new().stdout(&["config", "show"]);
    assert!(stdout.contains("[provider]"));
    assert!(stdout.contains("kind = \"echo\""));
    assert!(stdout.contains("evals.db"));
    assert!(stdout.contains("parallelism = 4"));
}

#[test]
fn evalboard_config_path_shows_paths() {
    let stdout = Sandbox::new().stdout(&["config", "path"]);
    assert!(stdout.contains("User config:"));
    assert!(stdout.contains("Project config:"));
}

#[test]
fn evalboard_run_on_empty_suite_fails() {
    let sandbox = Sandbox::new();
    let output = sandbox.run(&["run", "echo-model"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("test suite is empty"));
}

#[test]
fn evalboard_full_evaluation_flow() {
    let sandbox = Sandbox::new();
    sandbox.stdout(&["tests", "add", "Paris", "--expected", "Paris"]);
    sandbox.stdout(&["tests", "add", "hello", "--expected", "goodbye"]);
    assert!(sandbox.stdout(&["tests", "list"]).contains("2 test case(s)"));

    let run = sandbox.stdout(&["run", "echo-model"]);
    assert!(run.contains("1/2 correct (50%)"), "{run}");
    let run_id = run_id_from(&run);

    assert!(sandbox.stdout(&["runs", "list"]).contains("echo-model"));
    assert!(sandbox.stdout(&["health"]).contains("Pass rate:        50%"));

    let csv = sandbox.stdout(&["export", &run_id]);
    let mut lines = csv.lines();
    assert_eq!(lines.next(), Some("test_id,prompt,expected,output,verdict"));
    assert!(csv.contains("FAIL"));

    let overridden = sandbox.stdout(&["runs", "override", &run_id, "2", "2"]);
    assert!(overridden.contains("2/2 correct (100%)"), "{overridden}");

    let second = run_id_from(&sandbox.stdout(&["run", "echo-model"]));
    let compare = sandbox.stdout(&["compare", &run_id, &second]);
    assert!(compare.contains("1 unchanged, 0 improved, 1 regressed"), "{compare}");
}

#[test]
fn evalboard_override_rejects_invalid_score() {
    let sandbox = Sandbox::new();
    sandbox.stdout(&["tests", "add", "Paris", "--expected", "Paris"]);
    let run_id = run_id_from(&sandbox.stdout(&["run", "echo-model"]));

    let output = sandbox.run(&["runs", "override", &run_id, "1", "5"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("invalid score 5"));
}

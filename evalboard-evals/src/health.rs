//! Health aggregation over a project's run history.
//!
//! Every metric is recomputed from persisted runs and details on each call.
//! Only `completed` runs contribute to pass rate, drift, regression, failure
//! ranking and the pass-rate series; `models_compared` counts every run.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::error::Result;
use crate::run::{Run, RunDetail};
use crate::storage::{RunStore, SuiteStore};
use crate::suite::TestCase;
use crate::types::{ProjectId, RunId, TestCaseId};

/// Health aggregation settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthConfig {
    /// Number of entries in [`HealthMetrics::worst_failing_tests`].
    pub top_failing: usize,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self { top_failing: 5 }
    }
}

/// A test case ranked by how often it has failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailingTest {
    pub test_id: TestCaseId,
    /// Current prompt text of the test case.
    pub prompt: String,
    pub failure_count: u32,
}

/// One point of the pass-rate series.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassRatePoint {
    pub run_id: RunId,
    pub model: String,
    pub pass_rate: u8,
    pub created_at: DateTime<Utc>,
}

/// Point-in-time and trend metrics for a project.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthMetrics {
    /// Pass rate of the latest completed run; `0` without runs.
    pub pass_rate: u8,
    /// Latest pass rate minus the previous one; positive is an improvement.
    pub drift: i32,
    /// Tests that passed in the previous run and fail in the latest one.
    pub regression_score: u32,
    /// Distinct model identifiers across the project's runs.
    pub models_compared: u32,
    pub worst_failing_tests: Vec<FailingTest>,
    /// Pass rate per completed run, oldest first.
    pub history: Vec<PassRatePoint>,
}

impl HealthMetrics {
    /// Compute metrics from a run history.
    ///
    /// `runs` must be ordered newest first and pair each run with its
    /// details; `suite` is the project's current test cases and decides which
    /// tests may appear in the failure ranking.
    pub fn compute(runs: &[(Run, Vec<RunDetail>)], suite: &[TestCase], top_n: usize) -> Self {
        let models_compared = runs
            .iter()
            .map(|(run, _)| run.model.as_str())
            .collect::<HashSet<_>>()
            .len() as u32;

        let completed: Vec<&(Run, Vec<RunDetail>)> =
            runs.iter().filter(|(run, _)| run.is_complete()).collect();

        let pass_rate = completed.first().map_or(0, |(run, _)| run.pass_rate());
        let (drift, regression_score) = match completed.as_slice() {
            [latest, previous, ..] => (
                i32::from(latest.0.pass_rate()) - i32::from(previous.0.pass_rate()),
                regressions(&previous.1, &latest.1),
            ),
            _ => (0, 0),
        };

        let history = completed
            .iter()
            .rev()
            .map(|(run, _)| PassRatePoint {
                run_id: run.id,
                model: run.model.clone(),
                pass_rate: run.pass_rate(),
                created_at: run.created_at,
            })
            .collect();

        Self {
            pass_rate,
            drift,
            regression_score,
            models_compared,
            worst_failing_tests: worst_failing(&completed, suite, top_n),
            history,
        }
    }
}

/// Count tests present in both runs that went from pass to not-pass.
fn regressions(previous: &[RunDetail], latest: &[RunDetail]) -> u32 {
    let passed_before: HashSet<TestCaseId> = previous
        .iter()
        .filter(|d| d.score.is_pass())
        .map(|d| d.test_id)
        .collect();
    latest
        .iter()
        .filter(|d| !d.score.is_pass() && passed_before.contains(&d.test_id))
        .count() as u32
}

fn worst_failing(
    runs: &[&(Run, Vec<RunDetail>)],
    suite: &[TestCase],
    top_n: usize,
) -> Vec<FailingTest> {
    let prompts: HashMap<TestCaseId, &str> = suite
        .iter()
        .map(|case| (case.id, case.prompt.as_str()))
        .collect();

    // BTreeMap keeps ids ascending so the stable sort breaks ties by lowest id.
    let mut failures: BTreeMap<TestCaseId, u32> = BTreeMap::new();
    for (_, details) in runs {
        for detail in details.iter().filter(|d| !d.score.is_pass()) {
            if prompts.contains_key(&detail.test_id) {
                *failures.entry(detail.test_id).or_default() += 1;
            }
        }
    }

    let mut ranked: Vec<(TestCaseId, u32)> = failures.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1));
    ranked
        .into_iter()
        .take(top_n)
        .map(|(test_id, failure_count)| FailingTest {
            test_id,
            prompt: prompts.get(&test_id).copied().unwrap_or_default().to_string(),
            failure_count,
        })
        .collect()
}

/// Loads a project's history and computes its [`HealthMetrics`].
pub struct HealthAggregator {
    suites: Arc<dyn SuiteStore>,
    runs: Arc<dyn RunStore>,
    config: HealthConfig,
}

impl HealthAggregator {
    pub fn new(suites: Arc<dyn SuiteStore>, runs: Arc<dyn RunStore>) -> Self {
        Self {
            suites,
            runs,
            config: HealthConfig::default(),
        }
    }

    pub fn with_config(mut self, config: HealthConfig) -> Self {
        self.config = config;
        self
    }

    #[instrument(skip(self), level = "debug")]
    pub async fn compute_health(&self, project: ProjectId) -> Result<HealthMetrics> {
        let runs = self.runs.list_runs(project).await?;
        let mut history = Vec::with_capacity(runs.len());
        for run in runs {
            let details = if run.is_complete() {
                self.runs.get_details(run.id).await?
            } else {
                Vec::new()
            };
            history.push((run, details));
        }
        let suite = self.suites.list_test_cases(project).await?;

        Ok(HealthMetrics::compute(
            &history,
            &suite,
            self.config.top_failing,
        ))
    }
}

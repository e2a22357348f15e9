//! Project-level façade over the evaluation engine.
//!
//! [`EvalManager`] wires the runner, aggregators, and exporter to one pair of
//! stores and adds the checks that sit in front of them: template validation
//! for new prompt versions, ownership and run-state checks for overrides.

use std::sync::Arc;

use evalboard_models::ModelProvider;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::compare::{Comparison, ComparisonEngine};
use crate::error::{Error, Result};
use crate::export::{ReportExporter, parse_test_cases_csv};
use crate::health::{HealthAggregator, HealthConfig, HealthMetrics};
use crate::run::{ModelConfig, Run, RunDetail, Score};
use crate::runner::{EvalRunner, RunnerConfig};
use crate::scoring::Scorer;
use crate::storage::{RunStore, SuiteStore};
use crate::suite::{NewTestCase, PromptVersion, Template, TestCase};
use crate::types::{ProjectId, PromptVersionId, RunId, TestCaseId};

/// Entry point for everything a project does with the engine.
pub struct EvalManager {
    suites: Arc<dyn SuiteStore>,
    runs: Arc<dyn RunStore>,
    runner: EvalRunner,
    health: HealthAggregator,
    comparisons: ComparisonEngine,
    exporter: ReportExporter,
}

impl EvalManager {
    /// Create a manager with default runner and health settings.
    pub fn new(
        suites: Arc<dyn SuiteStore>,
        runs: Arc<dyn RunStore>,
        provider: Arc<dyn ModelProvider>,
    ) -> Self {
        Self {
            runner: EvalRunner::new(Arc::clone(&suites), Arc::clone(&runs), provider),
            health: HealthAggregator::new(Arc::clone(&suites), Arc::clone(&runs)),
            comparisons: ComparisonEngine::new(Arc::clone(&suites), Arc::clone(&runs)),
            exporter: ReportExporter::new(Arc::clone(&runs)),
            suites,
            runs,
        }
    }

    pub fn with_runner_config(mut self, config: RunnerConfig) -> Self {
        self.runner = self.runner.with_config(config);
        self
    }

    pub fn with_scorer(mut self, scorer: Scorer) -> Self {
        self.runner = self.runner.with_scorer(scorer);
        self
    }

    pub fn with_health_config(mut self, config: HealthConfig) -> Self {
        self.health = self.health.with_config(config);
        self
    }

    // === Suite ===

    pub async fn add_test_case(&self, project: ProjectId, case: NewTestCase) -> Result<TestCase> {
        Ok(self.suites.add_test_case(project, case).await?)
    }

    /// Delete a test case. Past run details that reference it are kept.
    pub async fn delete_test_case(&self, id: TestCaseId) -> Result<()> {
        if self.suites.delete_test_case(id).await? {
            Ok(())
        } else {
            Err(Error::TestCaseNotFound(id))
        }
    }

    /// Import test cases from CSV.
    ///
    /// The whole document is parsed before anything is stored, so a bad row
    /// leaves the suite untouched.
    #[instrument(skip(self, csv), level = "debug")]
    pub async fn import_test_cases(&self, project: ProjectId, csv: &str) -> Result<Vec<TestCase>> {
        let parsed = parse_test_cases_csv(csv)?;
        let mut added = Vec::with_capacity(parsed.len());
        for case in parsed {
            added.push(self.suites.add_test_case(project, case).await?);
        }
        info!(%project, count = added.len(), "imported test cases");
        Ok(added)
    }

    pub async fn list_test_cases(&self, project: ProjectId) -> Result<Vec<TestCase>> {
        Ok(self.suites.list_test_cases(project).await?)
    }

    /// Append a new prompt version after validating its template.
    pub async fn add_prompt_version(
        &self,
        project: ProjectId,
        template: &str,
    ) -> Result<PromptVersion> {
        Template::parse(template)?;
        Ok(self.suites.add_prompt_version(project, template).await?)
    }

    pub async fn list_prompt_versions(&self, project: ProjectId) -> Result<Vec<PromptVersion>> {
        Ok(self.suites.list_prompt_versions(project).await?)
    }

    // === Runs ===

    /// Run the project's suite. See [`EvalRunner::run_with_cancel`].
    pub async fn run(
        &self,
        project: ProjectId,
        model: &ModelConfig,
        prompt_version: Option<PromptVersionId>,
    ) -> Result<Run> {
        self.runner.run(project, model, prompt_version).await
    }

    pub async fn run_with_cancel(
        &self,
        project: ProjectId,
        model: &ModelConfig,
        prompt_version: Option<PromptVersionId>,
        cancel: CancellationToken,
    ) -> Result<Run> {
        self.runner
            .run_with_cancel(project, model, prompt_version, cancel)
            .await
    }

    /// Manually set the score of one result on behalf of `owner`.
    ///
    /// The score is overwritten, not adjusted, and the run's totals are
    /// recomputed in the same transaction.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidScore`] if `score` is not 0, 1 or 2
    /// - [`Error::RunNotFound`] if the run does not exist or belongs to
    ///   another project
    /// - [`Error::RunInProgress`] if the run has not finished
    /// - [`Error::RunDetailNotFound`] if the run has no result for `test_id`
    #[instrument(skip(self), level = "debug")]
    pub async fn override_score(
        &self,
        owner: ProjectId,
        run_id: RunId,
        test_id: TestCaseId,
        score: i64,
    ) -> Result<Run> {
        let score = Score::try_from(score)?;
        let run = self
            .runs
            .get_run(run_id)
            .await?
            .filter(|run| run.project_id == owner)
            .ok_or(Error::RunNotFound(run_id))?;
        if !run.status.is_terminal() {
            return Err(Error::RunInProgress(run_id));
        }

        let updated = self
            .runs
            .override_score(run_id, test_id, score)
            .await?
            .ok_or(Error::RunDetailNotFound { run_id, test_id })?;
        info!(%run_id, %test_id, score = score.as_u8(), correct = updated.correct, "score overridden");
        Ok(updated)
    }

    pub async fn get_run(&self, id: RunId) -> Result<Run> {
        self.runs.get_run(id).await?.ok_or(Error::RunNotFound(id))
    }

    /// List a project's runs, newest first.
    pub async fn list_runs(&self, project: ProjectId) -> Result<Vec<Run>> {
        Ok(self.runs.list_runs(project).await?)
    }

    /// A run's results in ascending test id order.
    pub async fn get_details(&self, run_id: RunId) -> Result<Vec<RunDetail>> {
        self.get_run(run_id).await?;
        Ok(self.runs.get_details(run_id).await?)
    }

    // === Reports ===

    pub async fn health(&self, project: ProjectId) -> Result<HealthMetrics> {
        self.health.compute_health(project).await
    }

    pub async fn compare(&self, run_a: RunId, run_b: RunId) -> Result<Comparison> {
        self.comparisons.compare(run_a, run_b).await
    }

    pub async fn export_csv(&self, run_id: RunId) -> Result<Vec<u8>> {
        self.exporter.export_csv(run_id).await
    }
}

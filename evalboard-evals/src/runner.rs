//! Evaluation runner: executes a project's suite against one model.
//!
//! The runner snapshots the suite, validates the prompt template, and only
//! then persists a run header. Test cases are dispatched concurrently up to
//! [`RunnerConfig::parallelism`]; each finished case is scored and written as
//! a [`RunDetail`] immediately, and the run's aggregates are recomputed from
//! the stored details when it is finalized.
//!
//! Transient provider errors are retried with exponential backoff and then
//! recorded as a failed detail. A permanent provider error, or cancellation
//! of the caller's token, stops further dispatch; calls already in flight
//! finish and their details are kept, and the run ends up `failed`.

use std::sync::Arc;
use std::time::Duration;

use evalboard_models::ModelProvider;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::error::{Error, Result};
use crate::run::{FAILURE_MARKER, ModelConfig, Run, RunDetail, RunStatus, Score};
use crate::scoring::Scorer;
use crate::storage::{RunStore, SuiteStore};
use crate::suite::{Template, TestCase, render_prompt};
use crate::types::{ProjectId, PromptVersionId, RunId};

/// Runner tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Maximum concurrent provider calls per run.
    pub parallelism: usize,
    /// Provider calls per test case before giving up on transient errors.
    pub max_attempts: u32,
    /// Delay before the first retry; doubled for each further retry.
    pub retry_backoff: Duration,
    /// Upper bound on a single provider call.
    pub call_timeout: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            parallelism: 4,
            max_attempts: 3,
            retry_backoff: Duration::from_millis(200),
            call_timeout: Duration::from_secs(60),
        }
    }
}

/// What happened to one dispatched test case.
enum CaseOutcome {
    /// A detail was written.
    Recorded,
    /// Dispatch was stopped before the case got an answer.
    Skipped,
    /// The provider failed permanently; the run must abort.
    Aborted(evalboard_models::Error),
}

/// Everything a dispatched test case needs, cloned into its task.
#[derive(Clone)]
struct CaseContext {
    run_id: RunId,
    model: Arc<str>,
    template: Option<Arc<Template>>,
    provider: Arc<dyn ModelProvider>,
    runs: Arc<dyn RunStore>,
    scorer: Scorer,
    config: RunnerConfig,
    abort: CancellationToken,
}

impl CaseContext {
    async fn evaluate(self, case: TestCase) -> Result<CaseOutcome> {
        let prompt = render_prompt(self.template.as_deref(), &case);
        let mut attempts = 0;
        let mut backoff = self.config.retry_backoff;

        let answer = loop {
            attempts += 1;
            let err = match tokio::time::timeout(
                self.config.call_timeout,
                self.provider.invoke(&self.model, &prompt),
            )
            .await
            {
                Ok(Ok(completion)) => break Ok(completion),
                Ok(Err(err)) => err,
                Err(_) => evalboard_models::Error::Transient(format!(
                    "call timed out after {}s",
                    self.config.call_timeout.as_secs_f64()
                )),
            };

            if !err.is_transient() {
                warn!(run_id = %self.run_id, test_id = %case.id, error = %err, "permanent provider error");
                self.abort.cancel();
                return Ok(CaseOutcome::Aborted(err));
            }
            if attempts >= self.config.max_attempts.max(1) {
                break Err(err);
            }

            debug!(run_id = %self.run_id, test_id = %case.id, attempts, error = %err, "retrying after transient error");
            tokio::select! {
                _ = self.abort.cancelled() => return Ok(CaseOutcome::Skipped),
                _ = tokio::time::sleep(backoff) => {}
            }
            backoff = backoff.saturating_mul(2);
        };

        let detail = match answer {
            Ok(completion) => {
                let verdict = self.scorer.score(&case, &completion.output);
                RunDetail {
                    run_id: self.run_id,
                    test_id: case.id,
                    prompt,
                    expected: case.expected.clone(),
                    output: completion.output,
                    score: verdict.score,
                    needs_review: verdict.needs_review,
                    error: None,
                    input_tokens: completion.usage.input_tokens,
                    output_tokens: completion.usage.output_tokens,
                    cost: completion.cost,
                    attempts,
                }
            }
            Err(err) => {
                warn!(run_id = %self.run_id, test_id = %case.id, attempts, error = %err, "giving up on test case");
                RunDetail {
                    run_id: self.run_id,
                    test_id: case.id,
                    prompt,
                    expected: case.expected.clone(),
                    output: format!("{FAILURE_MARKER} {err}"),
                    score: Score::Fail,
                    needs_review: false,
                    error: Some(err.to_string()),
                    input_tokens: 0,
                    output_tokens: 0,
                    cost: 0.0,
                    attempts,
                }
            }
        };

        if let Err(err) = self.runs.append_detail(&detail).await {
            warn!(run_id = %self.run_id, test_id = %case.id, error = %err, "could not record result, stopping run");
            self.abort.cancel();
            return Err(err.into());
        }
        Ok(CaseOutcome::Recorded)
    }
}

/// Executes test suites against model providers.
pub struct EvalRunner {
    suites: Arc<dyn SuiteStore>,
    runs: Arc<dyn RunStore>,
    provider: Arc<dyn ModelProvider>,
    scorer: Scorer,
    config: RunnerConfig,
}

impl EvalRunner {
    pub fn new(
        suites: Arc<dyn SuiteStore>,
        runs: Arc<dyn RunStore>,
        provider: Arc<dyn ModelProvider>,
    ) -> Self {
        Self {
            suites,
            runs,
            provider,
            scorer: Scorer::default(),
            config: RunnerConfig::default(),
        }
    }

    pub fn with_scorer(mut self, scorer: Scorer) -> Self {
        self.scorer = scorer;
        self
    }

    pub fn with_config(mut self, config: RunnerConfig) -> Self {
        self.config = config;
        self
    }

    /// Run the project's current suite to completion.
    pub async fn run(
        &self,
        project: ProjectId,
        model: &ModelConfig,
        prompt_version: Option<PromptVersionId>,
    ) -> Result<Run> {
        self.run_with_cancel(project, model, prompt_version, CancellationToken::new())
            .await
    }

    /// Run the project's current suite, stopping early if `cancel` fires.
    ///
    /// # Errors
    ///
    /// - [`Error::EmptySuite`], [`Error::PromptVersionNotFound`] and
    ///   [`Error::MalformedTemplate`] are returned before any run is stored.
    /// - [`Error::ProviderAborted`] and [`Error::Cancelled`] are returned after
    ///   the run has been finalized as `failed`.
    #[instrument(skip(self, model, cancel), fields(model = %model.model), level = "debug")]
    pub async fn run_with_cancel(
        &self,
        project: ProjectId,
        model: &ModelConfig,
        prompt_version: Option<PromptVersionId>,
        cancel: CancellationToken,
    ) -> Result<Run> {
        let suite = self.suites.list_test_cases(project).await?;
        if suite.is_empty() {
            return Err(Error::EmptySuite);
        }
        let template = match prompt_version {
            Some(id) => {
                let version = self
                    .suites
                    .get_prompt_version(id)
                    .await?
                    .filter(|v| v.project_id == project)
                    .ok_or(Error::PromptVersionNotFound(id))?;
                Some(Arc::new(version.parsed()?))
            }
            None => None,
        };

        let run = Run::new(project, &model.model, prompt_version, suite.len() as u32);
        self.runs.create_run(&run).await?;
        if let Err(err) = self.runs.mark_running(run.id).await {
            let reason = err.to_string();
            if let Err(finalize_err) = self
                .runs
                .finalize_run(run.id, RunStatus::Failed, Some(&reason))
                .await
            {
                warn!(run_id = %run.id, error = %finalize_err, "could not mark run as failed");
            }
            return Err(err.into());
        }
        info!(run_id = %run.id, %project, total = suite.len(), "run started");

        let abort = cancel.child_token();
        let ctx = CaseContext {
            run_id: run.id,
            model: Arc::from(model.model.as_str()),
            template,
            provider: Arc::clone(&self.provider),
            runs: Arc::clone(&self.runs),
            scorer: self.scorer.clone(),
            config: self.config,
            abort: abort.clone(),
        };

        let total = suite.len();
        let mut progress = Progress::default();
        let semaphore = Arc::new(Semaphore::new(self.config.parallelism.max(1)));
        let mut tasks = JoinSet::new();

        for case in suite {
            let permit = tokio::select! {
                biased;
                _ = abort.cancelled() => break,
                permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };
            while let Some(joined) = tasks.try_join_next() {
                progress.absorb(joined);
            }
            if abort.is_cancelled() {
                break;
            }

            let ctx = ctx.clone();
            tasks.spawn(async move {
                let _permit = permit;
                ctx.evaluate(case).await
            });
        }

        while let Some(joined) = tasks.join_next().await {
            progress.absorb(joined);
        }

        self.finish(run.id, total, progress, &cancel).await
    }

    async fn finish(
        &self,
        run_id: RunId,
        total: usize,
        progress: Progress,
        cancel: &CancellationToken,
    ) -> Result<Run> {
        if let Some(err) = progress.storage_error {
            warn!(%run_id, error = %err, "run failed while recording results");
            let reason = err.to_string();
            if let Err(finalize_err) = self
                .runs
                .finalize_run(run_id, RunStatus::Failed, Some(&reason))
                .await
            {
                warn!(%run_id, error = %finalize_err, "could not mark run as failed");
            }
            return Err(err);
        }

        if progress.recorded == total {
            let run = self
                .runs
                .finalize_run(run_id, RunStatus::Completed, None)
                .await?
                .ok_or(Error::RunNotFound(run_id))?;
            info!(%run_id, correct = run.correct, total = run.total_tests, pass_rate = run.pass_rate(), "run completed");
            return Ok(run);
        }

        if let Some(source) = progress.aborted {
            self.runs
                .finalize_run(run_id, RunStatus::Failed, Some(&source.to_string()))
                .await?;
            info!(%run_id, recorded = progress.recorded, "run aborted by provider");
            return Err(Error::ProviderAborted { run_id, source });
        }

        if !cancel.is_cancelled() {
            warn!(%run_id, recorded = progress.recorded, total, "run stopped with missing results");
        }
        self.runs
            .finalize_run(run_id, RunStatus::Failed, Some("cancelled"))
            .await?;
        info!(%run_id, recorded = progress.recorded, "run cancelled");
        Err(Error::Cancelled { run_id })
    }
}

/// Tally of finished test-case tasks.
#[derive(Default)]
struct Progress {
    recorded: usize,
    aborted: Option<evalboard_models::Error>,
    storage_error: Option<Error>,
}

impl Progress {
    fn absorb(&mut self, joined: std::result::Result<Result<CaseOutcome>, tokio::task::JoinError>) {
        match joined {
            Ok(Ok(CaseOutcome::Recorded)) => self.recorded += 1,
            Ok(Ok(CaseOutcome::Skipped)) => {}
            Ok(Ok(CaseOutcome::Aborted(err))) => {
                self.aborted.get_or_insert(err);
            }
            Ok(Err(err)) => {
                self.storage_error.get_or_insert(err);
            }
            Err(join_err) if join_err.is_panic() => std::panic::resume_unwind(join_err.into_panic()),
            Err(join_err) => warn!(error = %join_err, "test case task did not finish"),
        }
    }
}

//! Storage traits and implementations for suites and runs.
//!
//! The engine reads the suite through [`SuiteStore`] and records runs through
//! [`RunStore`]. Run aggregates are never written directly: every write that
//! touches a run's details recomputes the header from those details inside
//! the same transaction.
//!
//! [`TursoStore`] implements both traits on top of libSQL.

mod error;
mod turso;

pub use error::{Error, Result};
pub use turso::TursoStore;

use async_trait::async_trait;

use crate::run::{Run, RunDetail, RunStatus, Score};
use crate::suite::{NewTestCase, PromptVersion, TestCase};
use crate::types::{ProjectId, PromptVersionId, RunId, TestCaseId};

/// Access to a project's test cases and prompt versions.
#[async_trait]
pub trait SuiteStore: Send + Sync {
    /// List a project's test cases in ascending id order.
    async fn list_test_cases(&self, project: ProjectId) -> Result<Vec<TestCase>>;

    /// Get a test case by ID.
    async fn get_test_case(&self, id: TestCaseId) -> Result<Option<TestCase>>;

    /// Add a test case to a project.
    async fn add_test_case(&self, project: ProjectId, case: NewTestCase) -> Result<TestCase>;

    /// Delete a test case. Returns `false` if it did not exist.
    ///
    /// Details already recorded for the case are kept.
    async fn delete_test_case(&self, id: TestCaseId) -> Result<bool>;

    /// Get a prompt version by ID.
    async fn get_prompt_version(&self, id: PromptVersionId) -> Result<Option<PromptVersion>>;

    /// List a project's prompt versions, oldest first.
    async fn list_prompt_versions(&self, project: ProjectId) -> Result<Vec<PromptVersion>>;

    /// Append a new prompt version numbered one past the project's latest.
    ///
    /// The template is stored as given; callers validate it first.
    async fn add_prompt_version(&self, project: ProjectId, template: &str)
    -> Result<PromptVersion>;
}

/// Persistence for run headers and their per-test details.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Insert a new run header.
    async fn create_run(&self, run: &Run) -> Result<()>;

    /// Move a pending run to `running`.
    async fn mark_running(&self, id: RunId) -> Result<()>;

    /// Record the outcome of one test case and refresh the run's aggregates.
    ///
    /// Writing the same `(run, test)` pair twice replaces the earlier detail.
    async fn append_detail(&self, detail: &RunDetail) -> Result<()>;

    /// Move a run to a terminal status, recomputing its aggregates.
    ///
    /// Returns `None` if the run does not exist.
    async fn finalize_run(
        &self,
        id: RunId,
        status: RunStatus,
        reason: Option<&str>,
    ) -> Result<Option<Run>>;

    /// Overwrite one detail's score and recompute the run in one transaction.
    ///
    /// Returns `None` if the run has no detail for `test_id`.
    async fn override_score(
        &self,
        run_id: RunId,
        test_id: TestCaseId,
        score: Score,
    ) -> Result<Option<Run>>;

    /// Get a run by ID.
    async fn get_run(&self, id: RunId) -> Result<Option<Run>>;

    /// List a project's runs, newest first.
    async fn list_runs(&self, project: ProjectId) -> Result<Vec<Run>>;

    /// Get a run's details in ascending test id order.
    async fn get_details(&self, run_id: RunId) -> Result<Vec<RunDetail>>;
}

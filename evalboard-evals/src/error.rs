//! Error taxonomy for the evaluation engine.
//!
//! Every failure either surfaces here or is recorded as a failed verdict with
//! a failure marker in the output column; nothing is dropped silently.

use thiserror::Error;

use crate::storage;
use crate::types::{PromptVersionId, RunId, TestCaseId};

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Broad category of an [`Error`], for callers that map errors onto
/// transport-level responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Rejected before any side effect.
    Validation,
    /// A referenced entity does not exist.
    NotFound,
    /// The model provider failed in a way that aborted the run.
    Provider,
    /// The run was cancelled cooperatively.
    Cancelled,
    /// The persistence layer failed.
    Storage,
}

/// Errors that can occur while running, scoring, or reporting evaluations.
#[derive(Debug, Error)]
pub enum Error {
    /// The project has no test cases to run.
    #[error("test suite is empty")]
    EmptySuite,

    /// A prompt template does not contain exactly one `{{prompt}}` placeholder.
    #[error("malformed prompt template: {0}")]
    MalformedTemplate(String),

    /// A score outside the closed domain {0, 1, 2}.
    #[error("invalid score {0}: expected 0 (fail), 1 (unused) or 2 (pass)")]
    InvalidScore(i64),

    /// The run has not finished yet and cannot be modified.
    #[error("run {0} is still in progress")]
    RunInProgress(RunId),

    /// A CSV document could not be parsed.
    #[error("invalid csv at line {line}: {message}")]
    Csv { line: usize, message: String },

    /// Run not found.
    #[error("run not found: {0}")]
    RunNotFound(RunId),

    /// Test case not found.
    #[error("test case not found: {0}")]
    TestCaseNotFound(TestCaseId),

    /// No result for this test case in this run.
    #[error("no result for test case {test_id} in run {run_id}")]
    RunDetailNotFound { run_id: RunId, test_id: TestCaseId },

    /// Prompt version not found.
    #[error("prompt version not found: {0}")]
    PromptVersionNotFound(PromptVersionId),

    /// The two runs have no test case in common.
    #[error("runs {0} and {1} share no test cases")]
    EmptyComparison(RunId, RunId),

    /// A permanent provider failure aborted the rest of the suite.
    #[error("run {run_id} aborted: {source}")]
    ProviderAborted {
        run_id: RunId,
        #[source]
        source: evalboard_models::Error,
    },

    /// The run was cancelled before every test case was dispatched.
    #[error("run {run_id} was cancelled")]
    Cancelled { run_id: RunId },

    /// Storage error.
    #[error(transparent)]
    Storage(#[from] storage::Error),
}

impl Error {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::EmptySuite
            | Error::MalformedTemplate(_)
            | Error::InvalidScore(_)
            | Error::RunInProgress(_)
            | Error::Csv { .. } => ErrorKind::Validation,
            Error::RunNotFound(_)
            | Error::TestCaseNotFound(_)
            | Error::RunDetailNotFound { .. }
            | Error::PromptVersionNotFound(_)
            | Error::EmptyComparison(..) => ErrorKind::NotFound,
            Error::ProviderAborted { .. } => ErrorKind::Provider,
            Error::Cancelled { .. } => ErrorKind::Cancelled,
            Error::Storage(_) => ErrorKind::Storage,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_are_classified() {
        assert_eq!(Error::EmptySuite.kind(), ErrorKind::Validation);
        assert_eq!(
            Error::MalformedTemplate("x".into()).kind(),
            ErrorKind::Validation
        );
        assert_eq!(Error::InvalidScore(5).kind(), ErrorKind::Validation);
    }

    #[test]
    fn lookup_errors_are_not_found() {
        let run_id = RunId::new();
        assert_eq!(Error::RunNotFound(run_id).kind(), ErrorKind::NotFound);
        assert_eq!(
            Error::RunDetailNotFound {
                run_id,
                test_id: TestCaseId(3)
            }
            .kind(),
            ErrorKind::NotFound
        );
    }

    #[test]
    fn provider_abort_keeps_source() {
        let err = Error::ProviderAborted {
            run_id: RunId::new(),
            source: evalboard_models::Error::Permanent("invalid api key".into()),
        };
        assert_eq!(err.kind(), ErrorKind::Provider);
        assert!(err.to_string().contains("invalid api key"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn invalid_score_message_lists_domain() {
        assert_eq!(
            Error::InvalidScore(7).to_string(),
            "invalid score 7: expected 0 (fail), 1 (unused) or 2 (pass)"
        );
    }
}

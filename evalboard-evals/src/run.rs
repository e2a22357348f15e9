//! Run and run-detail types.
//!
//! A run is one execution of a project's suite against one model. Its
//! aggregate counters are never incremented in place: they are recomputed
//! from the run's details with [`RunTotals::from_details`] whenever a detail
//! is written or overridden.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::types::{ProjectId, PromptVersionId, RunId, TestCaseId};

/// Prefix written to the output column when the provider never answered.
pub const FAILURE_MARKER: &str = "[evalboard: provider error]";

/// Verdict assigned to one model output.
///
/// The numeric domain is closed: `0 = fail`, `1 = reserved`, `2 = pass`.
/// Only `Pass` counts towards a run's `correct` total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Score {
    Fail,
    /// Reserved for partial credit. Never produced by the scorer; accepted
    /// from manual overrides and counted as not correct.
    Unused,
    Pass,
}

impl Score {
    /// Numeric representation used in storage and on the wire.
    #[must_use]
    pub fn as_u8(&self) -> u8 {
        match self {
            Self::Fail => 0,
            Self::Unused => 1,
            Self::Pass => 2,
        }
    }

    #[must_use]
    pub fn is_pass(&self) -> bool {
        *self == Self::Pass
    }

    /// Human-readable verdict for reports.
    #[must_use]
    pub fn label(&self) -> &'static str {
        if self.is_pass() { "PASS" } else { "FAIL" }
    }
}

impl From<Score> for u8 {
    fn from(score: Score) -> u8 {
        score.as_u8()
    }
}

impl TryFrom<i64> for Score {
    type Error = Error;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Fail),
            1 => Ok(Self::Unused),
            2 => Ok(Self::Pass),
            other => Err(Error::InvalidScore(other)),
        }
    }
}

impl TryFrom<u8> for Score {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Score::try_from(i64::from(value))
    }
}

/// Lifecycle of a run: `pending → running → completed | failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Header persisted, no model call issued yet
    Pending,
    /// Model calls in flight
    Running,
    /// Every test case in the suite has a detail (terminal)
    Completed,
    /// Aborted by a permanent provider error or cancellation (terminal)
    Failed,
}

impl RunStatus {
    /// Convert to database string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Parse from database string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Check if the run can no longer receive new details.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Model settings for a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Model identifier passed to the provider.
    pub model: String,
}

impl ModelConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
        }
    }
}

/// Header record of one evaluation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub id: RunId,
    pub project_id: ProjectId,
    pub model: String,
    pub prompt_version_id: Option<PromptVersionId>,
    pub status: RunStatus,
    /// Size of the suite snapshot taken when the run started.
    pub total_tests: u32,
    pub correct: u32,
    pub incorrect: u32,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    /// Estimated cost in USD.
    pub estimated_cost: f64,
    /// Why the run failed, when `status == Failed`.
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Run {
    /// Create a pending run header for a suite of `total_tests` cases.
    #[must_use]
    pub fn new(
        project_id: ProjectId,
        model: impl Into<String>,
        prompt_version_id: Option<PromptVersionId>,
        total_tests: u32,
    ) -> Self {
        Self {
            id: RunId::new(),
            project_id,
            model: model.into(),
            prompt_version_id,
            status: RunStatus::Pending,
            total_tests,
            correct: 0,
            incorrect: total_tests,
            total_input_tokens: 0,
            total_output_tokens: 0,
            estimated_cost: 0.0,
            failure_reason: None,
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Integer pass rate in `[0, 100]`.
    #[must_use]
    pub fn pass_rate(&self) -> u8 {
        pass_rate(self.correct, self.total_tests)
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.status == RunStatus::Completed
    }

    /// Overwrite the aggregate columns with freshly computed totals.
    pub fn apply_totals(&mut self, totals: &RunTotals) {
        self.correct = totals.correct;
        self.incorrect = totals.incorrect;
        self.total_input_tokens = totals.input_tokens;
        self.total_output_tokens = totals.output_tokens;
        self.estimated_cost = totals.cost;
    }
}

/// Percentage of `correct` over `total`, rounded half up; `0` for an empty run.
#[must_use]
pub fn pass_rate(correct: u32, total: u32) -> u8 {
    if total == 0 {
        return 0;
    }
    let correct = u64::from(correct.min(total));
    let total = u64::from(total);
    ((correct * 200 + total) / (total * 2)) as u8
}

/// Outcome of one test case within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunDetail {
    pub run_id: RunId,
    pub test_id: TestCaseId,
    /// The rendered prompt actually sent to the model.
    pub prompt: String,
    /// Snapshot of the expected answer at run time.
    pub expected: Option<String>,
    /// Raw model output, or a [`FAILURE_MARKER`] line when the call failed.
    pub output: String,
    pub score: Score,
    /// Set when the scorer could not reach a verdict on its own.
    pub needs_review: bool,
    /// Provider error message when every attempt failed.
    pub error: Option<String>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost: f64,
    /// Number of provider calls made for this case.
    pub attempts: u32,
}

impl RunDetail {
    /// Whether the output column holds a failure marker instead of model text.
    #[must_use]
    pub fn is_provider_failure(&self) -> bool {
        self.error.is_some()
    }
}

/// Aggregates derived from a run's details.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunTotals {
    pub correct: u32,
    pub incorrect: u32,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost: f64,
}

impl RunTotals {
    /// Recompute every aggregate from the details of one run.
    ///
    /// `incorrect` is `total_tests - correct`, so test cases with no detail
    /// (an aborted run) count as incorrect.
    #[must_use]
    pub fn from_details(total_tests: u32, details: &[RunDetail]) -> Self {
        let correct = details.iter().filter(|d| d.score.is_pass()).count() as u32;
        let correct = correct.min(total_tests);
        Self {
            correct,
            incorrect: total_tests - correct,
            input_tokens: details.iter().map(|d| d.input_tokens).sum(),
            output_tokens: details.iter().map(|d| d.output_tokens).sum(),
            cost: details.iter().map(|d| d.cost).sum(),
        }
    }
}

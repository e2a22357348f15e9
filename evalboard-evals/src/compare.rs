//! Side-by-side comparison of two runs.
//!
//! Rows cover only the test cases both runs have details for, in ascending
//! test id order.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::error::{Error, Result};
use crate::run::{RunDetail, Score};
use crate::storage::{RunStore, SuiteStore};
use crate::suite::TestCase;
use crate::types::{RunId, TestCaseId};

/// How a test case's verdict moved from run A to run B.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Change {
    Unchanged,
    /// Failed in A, passed in B.
    Improved,
    /// Passed in A, failed in B.
    Regressed,
}

impl Change {
    fn between(a: Score, b: Score) -> Self {
        match (a.is_pass(), b.is_pass()) {
            (false, true) => Self::Improved,
            (true, false) => Self::Regressed,
            _ => Self::Unchanged,
        }
    }
}

/// One test case as answered by both runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonRow {
    pub test_id: TestCaseId,
    pub prompt: String,
    pub run_a_output: String,
    pub run_a_score: Score,
    pub run_b_output: String,
    pub run_b_score: Score,
    pub change: Change,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComparisonSummary {
    pub unchanged: u32,
    pub improved: u32,
    pub regressed: u32,
}

/// Result of comparing two runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
    pub run_a: RunId,
    pub run_b: RunId,
    pub rows: Vec<ComparisonRow>,
    pub summary: ComparisonSummary,
}

impl Comparison {
    /// Align two runs' details on test id.
    ///
    /// The prompt shown for each row is the test case's current prompt from
    /// `suite`, falling back to the prompt run A sent when the case has been
    /// deleted since.
    pub fn build(
        run_a: RunId,
        details_a: &[RunDetail],
        run_b: RunId,
        details_b: &[RunDetail],
        suite: &[TestCase],
    ) -> Result<Self> {
        let prompts: HashMap<TestCaseId, &str> =
            suite.iter().map(|c| (c.id, c.prompt.as_str())).collect();
        let b_by_id: HashMap<TestCaseId, &RunDetail> =
            details_b.iter().map(|d| (d.test_id, d)).collect();

        let mut aligned: BTreeMap<TestCaseId, (&RunDetail, &RunDetail)> = BTreeMap::new();
        for a in details_a {
            if let Some(b) = b_by_id.get(&a.test_id) {
                aligned.insert(a.test_id, (a, *b));
            }
        }
        if aligned.is_empty() {
            return Err(Error::EmptyComparison(run_a, run_b));
        }

        let mut summary = ComparisonSummary::default();
        let rows = aligned
            .into_iter()
            .map(|(test_id, (a, b))| {
                let change = Change::between(a.score, b.score);
                match change {
                    Change::Unchanged => summary.unchanged += 1,
                    Change::Improved => summary.improved += 1,
                    Change::Regressed => summary.regressed += 1,
                }
                ComparisonRow {
                    test_id,
                    prompt: prompts
                        .get(&test_id)
                        .map_or_else(|| a.prompt.clone(), |p| (*p).to_string()),
                    run_a_output: a.output.clone(),
                    run_a_score: a.score,
                    run_b_output: b.output.clone(),
                    run_b_score: b.score,
                    change,
                }
            })
            .collect();

        Ok(Self {
            run_a,
            run_b,
            rows,
            summary,
        })
    }
}

/// Loads two runs and compares them.
pub struct ComparisonEngine {
    suites: Arc<dyn SuiteStore>,
    runs: Arc<dyn RunStore>,
}

impl ComparisonEngine {
    pub fn new(suites: Arc<dyn SuiteStore>, runs: Arc<dyn RunStore>) -> Self {
        Self { suites, runs }
    }

    #[instrument(skip(self), level = "debug")]
    pub async fn compare(&self, run_a: RunId, run_b: RunId) -> Result<Comparison> {
        let a = self
            .runs
            .get_run(run_a)
            .await?
            .ok_or(Error::RunNotFound(run_a))?;
        if self.runs.get_run(run_b).await?.is_none() {
            return Err(Error::RunNotFound(run_b));
        }

        let details_a = self.runs.get_details(run_a).await?;
        let details_b = self.runs.get_details(run_b).await?;
        let suite = self.suites.list_test_cases(a.project_id).await?;

        Comparison::build(run_a, &details_a, run_b, &details_b, &suite)
    }
}

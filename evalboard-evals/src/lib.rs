//! Evaluation engine for evalboard.
//!
//! This crate runs a project's test suite against a model, scores every
//! output, and derives reports from the stored results.
//!
//! # Architecture
//!
//! - **Scoring** ([`Scorer`]) is a pure function from a test case and an
//!   output to a [`Verdict`]
//! - **Runner** ([`EvalRunner`]) fans test cases out to a
//!   [`ModelProvider`](evalboard_models::ModelProvider) and records one
//!   [`RunDetail`] per case
//! - **Reports** ([`HealthAggregator`], [`ComparisonEngine`],
//!   [`ReportExporter`]) are recomputed from stored runs on every call
//! - **Storage** ([`SuiteStore`], [`RunStore`]) is backed by libSQL through
//!   [`TursoStore`]
//!
//! [`EvalManager`] ties these together for a single pair of stores.

mod compare;
mod error;
mod export;
mod health;
mod manager;
mod run;
mod runner;
mod scoring;
pub mod storage;
mod suite;
mod types;

#[cfg(test)]
mod testing;

// Errors
pub use error::{Error, ErrorKind, Result};

// Manager
pub use manager::EvalManager;

// Suite types
pub use suite::{
    DEFAULT_TEMPLATE, NewTestCase, PROMPT_PLACEHOLDER, PromptVersion, TaskType, Template, TestCase, render_prompt,
};

// Run types
pub use run::{FAILURE_MARKER, ModelConfig, Run, RunDetail, RunStatus, RunTotals, Score, pass_rate};

// Engine components
pub use compare::{Change, Comparison, ComparisonEngine, ComparisonRow, ComparisonSummary};
pub use export::{
    CsvRecord, REPORT_HEADER, ReportExporter, escape_field, parse_csv, parse_test_cases_csv,
    write_run_csv,
};
pub use health::{FailingTest, HealthAggregator, HealthConfig, HealthMetrics, PassRatePoint};
pub use runner::{EvalRunner, RunnerConfig};
pub use scoring::{
    GroundingCheck, LexicalGrounding, PatternSafetyPolicy, SafetyPolicy, Scorer, Verdict,
};

// ID types
pub use types::{ProjectId, PromptVersionId, RunId, TestCaseId};

// Storage (re-export from storage module)
pub use storage::{RunStore, SuiteStore, TursoStore};

// Cancellation token accepted by `EvalManager::run_with_cancel`
pub use tokio_util::sync::CancellationToken;

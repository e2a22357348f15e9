//! Turso/libSQL implementation of suite and run storage.
//!
//! This module provides persistent storage using Turso (libSQL).
//! It can connect to:
//! - Remote Turso database (cloud)
//! - Local embedded SQLite file
//! - An in-memory database for tests
//!
//! One connection is shared by every clone of the store, and writes are
//! serialized through an async mutex so that a detail write and the
//! aggregate recompute that follows it are never interleaved with another
//! writer.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Builder, Connection, Database, Transaction};
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use super::{Error, Result, RunStore, SuiteStore};
use crate::run::{Run, RunDetail, RunStatus, RunTotals, Score};
use crate::suite::{NewTestCase, PromptVersion, TaskType, TestCase};
use crate::types::{ProjectId, PromptVersionId, RunId, TestCaseId};

/// SQL schema for the test_cases table.
const SCHEMA_TEST_CASES: &str = r#"
CREATE TABLE IF NOT EXISTS test_cases (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    project_id INTEGER NOT NULL,
    prompt TEXT NOT NULL,
    expected TEXT,
    task_type TEXT NOT NULL,
    context TEXT,
    created_at TEXT NOT NULL
)
"#;

/// SQL schema for the prompt_versions table.
const SCHEMA_PROMPT_VERSIONS: &str = r#"
CREATE TABLE IF NOT EXISTS prompt_versions (
    id TEXT PRIMARY KEY,
    project_id INTEGER NOT NULL,
    version INTEGER NOT NULL,
    template TEXT NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE (project_id, version)
)
"#;

/// SQL schema for the runs table.
///
/// `seq` gives a total insertion order that timestamps alone cannot.
const SCHEMA_RUNS: &str = r#"
CREATE TABLE IF NOT EXISTS runs (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    project_id INTEGER NOT NULL,
    model TEXT NOT NULL,
    prompt_version_id TEXT,
    status TEXT NOT NULL,
    total_tests INTEGER NOT NULL,
    correct INTEGER NOT NULL,
    incorrect INTEGER NOT NULL,
    total_input_tokens INTEGER NOT NULL,
    total_output_tokens INTEGER NOT NULL,
    estimated_cost REAL NOT NULL,
    failure_reason TEXT,
    created_at TEXT NOT NULL,
    finished_at TEXT
)
"#;

/// SQL schema for the run_details table.
///
/// Details deliberately carry no foreign key to `test_cases`: history must
/// survive a test case being deleted.
const SCHEMA_RUN_DETAILS: &str = r#"
CREATE TABLE IF NOT EXISTS run_details (
    run_id TEXT NOT NULL,
    test_id INTEGER NOT NULL,
    prompt TEXT NOT NULL,
    expected TEXT,
    output TEXT NOT NULL,
    score INTEGER NOT NULL,
    needs_review INTEGER NOT NULL,
    error TEXT,
    input_tokens INTEGER NOT NULL,
    output_tokens INTEGER NOT NULL,
    cost REAL NOT NULL,
    attempts INTEGER NOT NULL,
    PRIMARY KEY (run_id, test_id)
)
"#;

/// SQL index for listing a project's runs.
const INDEX_RUNS_PROJECT: &str = r#"
CREATE INDEX IF NOT EXISTS idx_runs_project_seq
ON runs(project_id, seq)
"#;

const TEST_CASE_COLUMNS: &str = "id, project_id, prompt, expected, task_type, context, created_at";

const PROMPT_VERSION_COLUMNS: &str = "id, project_id, version, template, created_at";

const RUN_COLUMNS: &str = "id, project_id, model, prompt_version_id, status, total_tests, \
     correct, incorrect, total_input_tokens, total_output_tokens, estimated_cost, \
     failure_reason, created_at, finished_at";

const DETAIL_COLUMNS: &str = "run_id, test_id, prompt, expected, output, score, needs_review, \
     error, input_tokens, output_tokens, cost, attempts";

/// Turso-backed suite and run storage.
#[derive(Clone)]
pub struct TursoStore {
    _db: Arc<Database>,
    conn: Connection,
    write_lock: Arc<Mutex<()>>,
}

impl TursoStore {
    /// Create a new storage instance with a local embedded database.
    pub async fn new_local(path: &Path) -> Result<Self> {
        let db = Builder::new_local(path).build().await?;
        Self::open(db).await
    }

    /// Create a new storage instance connected to a remote Turso database.
    pub async fn new_remote(url: &str, token: &str) -> Result<Self> {
        let db = Builder::new_remote(url.to_string(), token.to_string())
            .build()
            .await?;
        Self::open(db).await
    }

    /// Create a new in-memory storage instance (for testing).
    pub async fn new_memory() -> Result<Self> {
        let db = Builder::new_local(":memory:").build().await?;
        Self::open(db).await
    }

    async fn open(db: Database) -> Result<Self> {
        let conn = db.connect()?;
        let storage = Self {
            _db: Arc::new(db),
            conn,
            write_lock: Arc::new(Mutex::new(())),
        };
        storage.ensure_schema().await?;
        Ok(storage)
    }

    /// Ensure the database schema exists.
    async fn ensure_schema(&self) -> Result<()> {
        self.conn.execute(SCHEMA_TEST_CASES, ()).await?;
        self.conn.execute(SCHEMA_PROMPT_VERSIONS, ()).await?;
        self.conn.execute(SCHEMA_RUNS, ()).await?;
        self.conn.execute(SCHEMA_RUN_DETAILS, ()).await?;
        self.conn.execute(INDEX_RUNS_PROJECT, ()).await?;
        Ok(())
    }

    async fn fetch_run(conn: &Connection, id: RunId) -> Result<Option<Run>> {
        let mut rows = conn
            .query(
                &format!("SELECT {RUN_COLUMNS} FROM runs WHERE id = ?"),
                [id.0.to_string()],
            )
            .await?;

        if let Some(row) = rows.next().await? {
            Ok(Some(Self::parse_run(&row)?))
        } else {
            Ok(None)
        }
    }

    async fn fetch_details(conn: &Connection, run_id: RunId) -> Result<Vec<RunDetail>> {
        let mut rows = conn
            .query(
                &format!("SELECT {DETAIL_COLUMNS} FROM run_details WHERE run_id = ? ORDER BY test_id ASC"),
                [run_id.0.to_string()],
            )
            .await?;

        let mut details = Vec::new();
        while let Some(row) = rows.next().await? {
            details.push(Self::parse_detail(&row)?);
        }
        Ok(details)
    }

    /// Recompute a run's aggregates from its details and write them back.
    async fn recompute(conn: &Connection, id: RunId) -> Result<Option<Run>> {
        let Some(mut run) = Self::fetch_run(conn, id).await? else {
            return Ok(None);
        };
        let details = Self::fetch_details(conn, id).await?;
        run.apply_totals(&RunTotals::from_details(run.total_tests, &details));

        conn.execute(
            "UPDATE runs SET correct = ?, incorrect = ?, total_input_tokens = ?, total_output_tokens = ?, estimated_cost = ? WHERE id = ?",
            libsql::params![
                i64::from(run.correct),
                i64::from(run.incorrect),
                run.total_input_tokens as i64,
                run.total_output_tokens as i64,
                run.estimated_cost,
                id.0.to_string()
            ],
        )
        .await?;
        Ok(Some(run))
    }

    /// Parse a test case from a database row.
    fn parse_test_case(row: &libsql::Row) -> Result<TestCase> {
        let id: i64 = row.get(0)?;
        let project_id: i64 = row.get(1)?;
        let prompt: String = row.get(2)?;
        let expected: Option<String> = row.get(3)?;
        let task_type_str: String = row.get(4)?;
        let context: Option<String> = row.get(5)?;
        let created_at_str: String = row.get(6)?;

        let task_type = TaskType::parse(&task_type_str)
            .ok_or_else(|| Error::InvalidData(format!("invalid task type: {}", task_type_str)))?;

        Ok(TestCase {
            id: TestCaseId(id),
            project_id: ProjectId(project_id),
            prompt,
            expected,
            task_type,
            context,
            created_at: parse_datetime(&created_at_str)?,
        })
    }

    /// Parse a prompt version from a database row.
    fn parse_prompt_version(row: &libsql::Row) -> Result<PromptVersion> {
        let id_str: String = row.get(0)?;
        let project_id: i64 = row.get(1)?;
        let version: i64 = row.get(2)?;
        let template: String = row.get(3)?;
        let created_at_str: String = row.get(4)?;

        Ok(PromptVersion {
            id: PromptVersionId(parse_uuid(&id_str, "prompt version")?),
            project_id: ProjectId(project_id),
            version: version as u32,
            template,
            created_at: parse_datetime(&created_at_str)?,
        })
    }

    /// Parse a run from a database row.
    fn parse_run(row: &libsql::Row) -> Result<Run> {
        let id_str: String = row.get(0)?;
        let project_id: i64 = row.get(1)?;
        let model: String = row.get(2)?;
        let prompt_version_str: Option<String> = row.get(3)?;
        let status_str: String = row.get(4)?;
        let total_tests: i64 = row.get(5)?;
        let correct: i64 = row.get(6)?;
        let incorrect: i64 = row.get(7)?;
        let total_input_tokens: i64 = row.get(8)?;
        let total_output_tokens: i64 = row.get(9)?;
        let estimated_cost: f64 = row.get(10)?;
        let failure_reason: Option<String> = row.get(11)?;
        let created_at_str: String = row.get(12)?;
        let finished_at_str: Option<String> = row.get(13)?;

        let status = RunStatus::parse(&status_str)
            .ok_or_else(|| Error::InvalidData(format!("invalid status: {}", status_str)))?;
        let prompt_version_id = prompt_version_str
            .as_deref()
            .map(|s| parse_uuid(s, "prompt version").map(PromptVersionId))
            .transpose()?;
        let finished_at = finished_at_str
            .as_deref()
            .map(parse_datetime)
            .transpose()?;

        Ok(Run {
            id: RunId(parse_uuid(&id_str, "run")?),
            project_id: ProjectId(project_id),
            model,
            prompt_version_id,
            status,
            total_tests: total_tests as u32,
            correct: correct as u32,
            incorrect: incorrect as u32,
            total_input_tokens: total_input_tokens as u64,
            total_output_tokens: total_output_tokens as u64,
            estimated_cost,
            failure_reason,
            created_at: parse_datetime(&created_at_str)?,
            finished_at,
        })
    }

    /// Parse a run detail from a database row.
    fn parse_detail(row: &libsql::Row) -> Result<RunDetail> {
        let run_id_str: String = row.get(0)?;
        let test_id: i64 = row.get(1)?;
        let prompt: String = row.get(2)?;
        let expected: Option<String> = row.get(3)?;
        let output: String = row.get(4)?;
        let score: i64 = row.get(5)?;
        let needs_review: i64 = row.get(6)?;
        let error: Option<String> = row.get(7)?;
        let input_tokens: i64 = row.get(8)?;
        let output_tokens: i64 = row.get(9)?;
        let cost: f64 = row.get(10)?;
        let attempts: i64 = row.get(11)?;

        let score = Score::try_from(score)
            .map_err(|_| Error::InvalidData(format!("invalid score: {}", score)))?;

        Ok(RunDetail {
            run_id: RunId(parse_uuid(&run_id_str, "run")?),
            test_id: TestCaseId(test_id),
            prompt,
            expected,
            output,
            score,
            needs_review: needs_review != 0,
            error,
            input_tokens: input_tokens as u64,
            output_tokens: output_tokens as u64,
            cost,
            attempts: attempts as u32,
        })
    }
}

#[async_trait]
impl SuiteStore for TursoStore {
    #[instrument(skip(self), level = "debug")]
    async fn list_test_cases(&self, project: ProjectId) -> Result<Vec<TestCase>> {
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT {TEST_CASE_COLUMNS} FROM test_cases WHERE project_id = ? ORDER BY id ASC"
                ),
                [project.0],
            )
            .await?;

        let mut cases = Vec::new();
        while let Some(row) = rows.next().await? {
            cases.push(Self::parse_test_case(&row)?);
        }
        Ok(cases)
    }

    #[instrument(skip(self), level = "debug")]
    async fn get_test_case(&self, id: TestCaseId) -> Result<Option<TestCase>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {TEST_CASE_COLUMNS} FROM test_cases WHERE id = ?"),
                [id.0],
            )
            .await?;

        if let Some(row) = rows.next().await? {
            Ok(Some(Self::parse_test_case(&row)?))
        } else {
            Ok(None)
        }
    }

    #[instrument(skip(self, case), level = "debug")]
    async fn add_test_case(&self, project: ProjectId, case: NewTestCase) -> Result<TestCase> {
        let _guard = self.write_lock.lock().await;
        let created_at = Utc::now();
        self.conn
            .execute(
                "INSERT INTO test_cases (project_id, prompt, expected, task_type, context, created_at) VALUES (?, ?, ?, ?, ?, ?)",
                libsql::params![
                    project.0,
                    case.prompt.clone(),
                    case.expected.clone(),
                    case.task_type.as_str(),
                    case.context.clone(),
                    format_datetime(created_at)
                ],
            )
            .await?;
        let id = TestCaseId(self.conn.last_insert_rowid());
        debug!(%id, %project, "added test case");

        Ok(TestCase {
            id,
            project_id: project,
            prompt: case.prompt,
            expected: case.expected,
            task_type: case.task_type,
            context: case.context,
            created_at,
        })
    }

    #[instrument(skip(self), level = "debug")]
    async fn delete_test_case(&self, id: TestCaseId) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let deleted = self
            .conn
            .execute("DELETE FROM test_cases WHERE id = ?", [id.0])
            .await?;
        Ok(deleted > 0)
    }

    #[instrument(skip(self), level = "debug")]
    async fn get_prompt_version(&self, id: PromptVersionId) -> Result<Option<PromptVersion>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {PROMPT_VERSION_COLUMNS} FROM prompt_versions WHERE id = ?"),
                [id.0.to_string()],
            )
            .await?;

        if let Some(row) = rows.next().await? {
            Ok(Some(Self::parse_prompt_version(&row)?))
        } else {
            Ok(None)
        }
    }

    #[instrument(skip(self), level = "debug")]
    async fn list_prompt_versions(&self, project: ProjectId) -> Result<Vec<PromptVersion>> {
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT {PROMPT_VERSION_COLUMNS} FROM prompt_versions WHERE project_id = ? ORDER BY version ASC"
                ),
                [project.0],
            )
            .await?;

        let mut versions = Vec::new();
        while let Some(row) = rows.next().await? {
            versions.push(Self::parse_prompt_version(&row)?);
        }
        Ok(versions)
    }

    #[instrument(skip(self, template), level = "debug")]
    async fn add_prompt_version(
        &self,
        project: ProjectId,
        template: &str,
    ) -> Result<PromptVersion> {
        let _guard = self.write_lock.lock().await;
        let mut rows = self
            .conn
            .query(
                "SELECT COALESCE(MAX(version), 0) FROM prompt_versions WHERE project_id = ?",
                [project.0],
            )
            .await?;
        let latest: i64 = match rows.next().await? {
            Some(row) => row.get(0)?,
            None => 0,
        };

        let version = PromptVersion {
            id: PromptVersionId::new(),
            project_id: project,
            version: (latest + 1) as u32,
            template: template.to_string(),
            created_at: Utc::now(),
        };
        self.conn
            .execute(
                "INSERT INTO prompt_versions (id, project_id, version, template, created_at) VALUES (?, ?, ?, ?, ?)",
                libsql::params![
                    version.id.0.to_string(),
                    project.0,
                    i64::from(version.version),
                    version.template.clone(),
                    format_datetime(version.created_at)
                ],
            )
            .await?;
        debug!(id = %version.id, version = version.version, "added prompt version");
        Ok(version)
    }
}

#[async_trait]
impl RunStore for TursoStore {
    #[instrument(skip(self, run), fields(run_id = %run.id), level = "debug")]
    async fn create_run(&self, run: &Run) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.conn
            .execute(
                &format!(
                    "INSERT INTO runs ({RUN_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
                ),
                libsql::params![
                    run.id.0.to_string(),
                    run.project_id.0,
                    run.model.clone(),
                    run.prompt_version_id.map(|id| id.0.to_string()),
                    run.status.as_str(),
                    i64::from(run.total_tests),
                    i64::from(run.correct),
                    i64::from(run.incorrect),
                    run.total_input_tokens as i64,
                    run.total_output_tokens as i64,
                    run.estimated_cost,
                    run.failure_reason.clone(),
                    format_datetime(run.created_at),
                    run.finished_at.map(format_datetime)
                ],
            )
            .await?;
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn mark_running(&self, id: RunId) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.conn
            .execute(
                "UPDATE runs SET status = ? WHERE id = ? AND status = ?",
                libsql::params![
                    RunStatus::Running.as_str(),
                    id.0.to_string(),
                    RunStatus::Pending.as_str()
                ],
            )
            .await?;
        Ok(())
    }

    #[instrument(skip(self, detail), fields(run_id = %detail.run_id, test_id = %detail.test_id), level = "debug")]
    async fn append_detail(&self, detail: &RunDetail) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let tx = self.conn.transaction().await?;
        let result: Result<()> = async {
            tx.execute(
                &format!(
                    "INSERT OR REPLACE INTO run_details ({DETAIL_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
                ),
                libsql::params![
                    detail.run_id.0.to_string(),
                    detail.test_id.0,
                    detail.prompt.clone(),
                    detail.expected.clone(),
                    detail.output.clone(),
                    i64::from(detail.score.as_u8()),
                    i64::from(detail.needs_review),
                    detail.error.clone(),
                    detail.input_tokens as i64,
                    detail.output_tokens as i64,
                    detail.cost,
                    i64::from(detail.attempts)
                ],
            )
            .await?;
            Self::recompute(&tx, detail.run_id).await?;
            Ok(())
        }
        .await;
        finish(tx, result).await
    }

    #[instrument(skip(self), level = "debug")]
    async fn finalize_run(
        &self,
        id: RunId,
        status: RunStatus,
        reason: Option<&str>,
    ) -> Result<Option<Run>> {
        let _guard = self.write_lock.lock().await;
        let tx = self.conn.transaction().await?;
        let result: Result<Option<Run>> = async {
            let finished_at = Utc::now();
            tx.execute(
                "UPDATE runs SET status = ?, failure_reason = ?, finished_at = ? WHERE id = ?",
                libsql::params![
                    status.as_str(),
                    reason.map(str::to_string),
                    format_datetime(finished_at),
                    id.0.to_string()
                ],
            )
            .await?;
            Self::recompute(&tx, id).await
        }
        .await;
        finish(tx, result).await
    }

    #[instrument(skip(self), level = "debug")]
    async fn override_score(
        &self,
        run_id: RunId,
        test_id: TestCaseId,
        score: Score,
    ) -> Result<Option<Run>> {
        let _guard = self.write_lock.lock().await;
        let tx = self.conn.transaction().await?;
        let result: Result<Option<Run>> = async {
            let updated = tx
                .execute(
                    "UPDATE run_details SET score = ?, needs_review = 0 WHERE run_id = ? AND test_id = ?",
                    libsql::params![
                        i64::from(score.as_u8()),
                        run_id.0.to_string(),
                        test_id.0
                    ],
                )
                .await?;
            if updated == 0 {
                return Ok(None);
            }
            Self::recompute(&tx, run_id).await
        }
        .await;
        finish(tx, result).await
    }

    #[instrument(skip(self), level = "debug")]
    async fn get_run(&self, id: RunId) -> Result<Option<Run>> {
        Self::fetch_run(&self.conn, id).await
    }

    #[instrument(skip(self), level = "debug")]
    async fn list_runs(&self, project: ProjectId) -> Result<Vec<Run>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {RUN_COLUMNS} FROM runs WHERE project_id = ? ORDER BY seq DESC"),
                [project.0],
            )
            .await?;

        let mut runs = Vec::new();
        while let Some(row) = rows.next().await? {
            runs.push(Self::parse_run(&row)?);
        }
        Ok(runs)
    }

    #[instrument(skip(self), level = "debug")]
    async fn get_details(&self, run_id: RunId) -> Result<Vec<RunDetail>> {
        Self::fetch_details(&self.conn, run_id).await
    }
}

/// Commit on success, roll back on failure.
async fn finish<T>(tx: Transaction, result: Result<T>) -> Result<T> {
    match result {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback) = tx.rollback().await {
                warn!(error = %rollback, "rollback failed");
            }
            Err(err)
        }
    }
}

/// Format a datetime for storage.
fn format_datetime(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

/// Parse a datetime from storage.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| Error::InvalidData(format!("invalid datetime: {}", s)))
}

fn parse_uuid(s: &str, what: &str) -> Result<uuid::Uuid> {
    s.parse()
        .map_err(|_| Error::InvalidData(format!("invalid {} id: {}", what, s)))
}

//! Test doubles and fixtures shared by the engine's unit tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use evalboard_models::{Completion, ModelProvider, Usage};

use crate::run::{Run, RunDetail, RunStatus, Score};
use crate::storage::{self, RunStore, SuiteStore, TursoStore};
use crate::suite::{NewTestCase, TaskType, TestCase};
use crate::types::{ProjectId, RunId, TestCaseId};

/// Cost charged by [`ScriptedProvider`] for every successful call.
pub const SCRIPTED_CALL_COST: f64 = 0.01;

enum Step {
    Reply(String),
    Fail(evalboard_models::Error),
}

/// Provider whose answers are scripted per prompt.
///
/// A rule matches when the rendered prompt contains its needle; its steps are
/// consumed in order, one per call. Prompts with no remaining step are echoed:
/// the answer is the last non-empty line of the prompt.
#[derive(Default)]
pub struct ScriptedProvider {
    rules: Mutex<Vec<(String, VecDeque<Step>)>>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn reply(self, needle: &str, output: &str) -> Self {
        self.push(needle, Step::Reply(output.to_string()));
        self
    }

    pub fn fail(self, needle: &str, error: evalboard_models::Error) -> Self {
        self.push(needle, Step::Fail(error));
        self
    }

    fn push(&self, needle: &str, step: Step) {
        let mut rules = self.rules.lock().unwrap();
        match rules.iter_mut().find(|(n, _)| n == needle) {
            Some((_, steps)) => steps.push_back(step),
            None => rules.push((needle.to_string(), VecDeque::from([step]))),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    fn next_step(&self, prompt: &str) -> Option<Step> {
        let mut rules = self.rules.lock().unwrap();
        rules
            .iter_mut()
            .find(|(needle, steps)| prompt.contains(needle.as_str()) && !steps.is_empty())
            .and_then(|(_, steps)| steps.pop_front())
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn invoke(&self, _model: &str, prompt: &str) -> evalboard_models::Result<Completion> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let step = self.next_step(prompt);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let output = match step {
            Some(Step::Fail(err)) => return Err(err),
            Some(Step::Reply(output)) => output,
            None => prompt
                .lines()
                .rev()
                .map(str::trim)
                .find(|l| !l.is_empty())
                .unwrap_or_default()
                .to_string(),
        };
        let usage = Usage::new(
            prompt.split_whitespace().count() as u64,
            output.split_whitespace().count() as u64,
        );
        Ok(Completion::new(output, usage, SCRIPTED_CALL_COST))
    }
}

/// Run store that delegates to a [`TursoStore`] but can be told to fail writes.
pub struct FaultyRunStore {
    inner: TursoStore,
    fail_mark_running: bool,
    fail_appends: bool,
    appends: AtomicUsize,
}

impl FaultyRunStore {
    pub fn new(inner: TursoStore) -> Self {
        Self {
            inner,
            fail_mark_running: false,
            fail_appends: false,
            appends: AtomicUsize::new(0),
        }
    }

    pub fn failing_mark_running(mut self) -> Self {
        self.fail_mark_running = true;
        self
    }

    pub fn failing_appends(mut self) -> Self {
        self.fail_appends = true;
        self
    }

    /// Number of `append_detail` calls, failed ones included.
    pub fn appends(&self) -> usize {
        self.appends.load(Ordering::SeqCst)
    }

    fn disk_full() -> storage::Error {
        storage::Error::InvalidData("disk full".to_string())
    }
}

#[async_trait]
impl RunStore for FaultyRunStore {
    async fn create_run(&self, run: &Run) -> storage::Result<()> {
        self.inner.create_run(run).await
    }

    async fn mark_running(&self, id: RunId) -> storage::Result<()> {
        if self.fail_mark_running {
            return Err(Self::disk_full());
        }
        self.inner.mark_running(id).await
    }

    async fn append_detail(&self, detail: &RunDetail) -> storage::Result<()> {
        self.appends.fetch_add(1, Ordering::SeqCst);
        if self.fail_appends {
            return Err(Self::disk_full());
        }
        self.inner.append_detail(detail).await
    }

    async fn finalize_run(
        &self,
        id: RunId,
        status: RunStatus,
        reason: Option<&str>,
    ) -> storage::Result<Option<Run>> {
        self.inner.finalize_run(id, status, reason).await
    }

    async fn override_score(
        &self,
        run_id: RunId,
        test_id: TestCaseId,
        score: Score,
    ) -> storage::Result<Option<Run>> {
        self.inner.override_score(run_id, test_id, score).await
    }

    async fn get_run(&self, id: RunId) -> storage::Result<Option<Run>> {
        self.inner.get_run(id).await
    }

    async fn list_runs(&self, project: ProjectId) -> storage::Result<Vec<Run>> {
        self.inner.list_runs(project).await
    }

    async fn get_details(&self, run_id: RunId) -> storage::Result<Vec<RunDetail>> {
        self.inner.get_details(run_id).await
    }
}

/// Add a general test case whose expected answer is `expected`.
pub async fn add_case(
    store: &TursoStore,
    project: ProjectId,
    prompt: &str,
    expected: &str,
) -> TestCase {
    store
        .add_test_case(
            project,
            NewTestCase {
                prompt: prompt.to_string(),
                expected: Some(expected.to_string()),
                task_type: TaskType::General,
                context: None,
            },
        )
        .await
        .unwrap()
}

/// Add `count` test cases that an echoing provider answers correctly.
pub async fn add_echo_cases(store: &TursoStore, project: ProjectId, count: usize) -> Vec<TestCase> {
    let mut cases = Vec::with_capacity(count);
    for i in 0..count {
        let answer = format!("answer-{i}");
        cases.push(add_case(store, project, &answer, &answer).await);
    }
    cases
}

//! Bounded-concurrency task scheduler
//!
//! Tasks are sorted by `(case_id, agent_name)` and claimed in that order by a
//! fixed pool of workers. Each agent call runs on its own tokio task and
//! races a timer; whichever settles first wins. Every task yields exactly one
//! `CaseExecutionResult`, whether the agent answered, failed, panicked, or
//! timed out.

use crate::agent::{AgentAdapter, AgentContext, TaskMeta};
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uibench_common::{AgentResult, CaseExecutionResult, Error, ErrorRecord, TestCase};

/// One (test case, agent) pair to execute
#[derive(Clone)]
pub struct RunTask {
    pub test_case: Arc<TestCase>,
    pub agent: Arc<dyn AgentAdapter>,
    pub access_url: String,
    pub run_id: String,
    pub timeout: Duration,
}

impl RunTask {
    pub fn case_id(&self) -> &str {
        &self.test_case.case_id
    }

    pub fn agent_name(&self) -> &str {
        self.agent.name()
    }

    pub fn scene_id(&self) -> &str {
        &self.test_case.ui_scene_id
    }
}

impl std::fmt::Debug for RunTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunTask")
            .field("case_id", &self.case_id())
            .field("agent", &self.agent_name())
            .field("access_url", &self.access_url)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Sort into claim order. The sort is stable, so equal keys keep input order.
pub fn sort_tasks(tasks: &mut [RunTask]) {
    tasks.sort_by(|a, b| {
        a.case_id()
            .cmp(b.case_id())
            .then_with(|| a.agent_name().cmp(b.agent_name()))
    });
}

pub struct Scheduler {
    concurrency: usize,
    cancel: CancellationToken,
}

impl Scheduler {
    /// A concurrency of 0 is treated as 1
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
            cancel: CancellationToken::new(),
        }
    }

    /// Tie the run to an outer token. Once it fires, unclaimed tasks are not
    /// started and in-flight agents see their own token cancelled.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Execute every task. Results come back in sorted task order.
    pub async fn run(&self, mut tasks: Vec<RunTask>) -> Vec<CaseExecutionResult> {
        sort_tasks(&mut tasks);
        let total = tasks.len();
        if total == 0 {
            return Vec::new();
        }

        let workers = self.concurrency.min(total);
        let started = Instant::now();
        info!(event = "engine.start", tasks = total, concurrency = workers, "engine.start");

        let next = AtomicUsize::new(0);
        let slots: Mutex<Vec<Option<CaseExecutionResult>>> = Mutex::new(vec![None; total]);

        let pool = (0..workers).map(|worker| self.worker(worker, &tasks, &next, &slots));
        futures::future::join_all(pool).await;

        let results: Vec<CaseExecutionResult> = slots
            .into_inner()
            .into_iter()
            .zip(&tasks)
            .map(|(slot, task)| {
                slot.unwrap_or_else(|| {
                    CaseExecutionResult::not_run(
                        task.case_id(),
                        task.scene_id(),
                        task.agent_name(),
                        ErrorRecord::new("Task was not executed: run cancelled"),
                    )
                })
            })
            .collect();

        let failed = results.iter().filter(|r| !r.success).count();
        info!(
            event = "engine.complete",
            tasks = total,
            failed,
            duration_ms = started.elapsed().as_millis() as u64,
            "engine.complete"
        );
        results
    }

    async fn worker(
        &self,
        worker: usize,
        tasks: &[RunTask],
        next: &AtomicUsize,
        slots: &Mutex<Vec<Option<CaseExecutionResult>>>,
    ) {
        loop {
            if self.cancel.is_cancelled() {
                debug!(worker, "Run cancelled, worker exiting");
                return;
            }

            let index = next.fetch_add(1, Ordering::SeqCst);
            let Some(task) = tasks.get(index) else {
                return;
            };

            let result = self.execute(worker, index, task).await;
            slots.lock()[index] = Some(result);
        }
    }

    async fn execute(&self, worker: usize, index: usize, task: &RunTask) -> CaseExecutionResult {
        let case = &task.test_case;
        let agent_name = task.agent_name().to_string();
        info!(
            event = "task.start",
            worker,
            index,
            case_id = %case.case_id,
            agent = %agent_name,
            "task.start"
        );

        let started_at = Utc::now();
        let start = Instant::now();
        let cancel = self.cancel.child_token();

        let ctx = AgentContext {
            access_url: task.access_url.clone(),
            prompt: case.prompt.clone(),
            ground_truth: Some(case.ground_truth.clone()),
            meta: TaskMeta {
                case_id: case.case_id.clone(),
                scene_id: case.ui_scene_id.clone(),
                run_id: task.run_id.clone(),
                tags: case.tags.clone(),
                timeout_ms: task.timeout.as_millis() as u64,
            },
            cancel: cancel.clone(),
            deadline: start + task.timeout,
        };

        let agent = task.agent.clone();
        let mut handle = tokio::spawn(async move { agent.run_case(ctx).await });

        let outcome: Result<AgentResult, ErrorRecord> = tokio::select! {
            joined = &mut handle => match joined {
                Ok(Ok(result)) => Ok(result),
                Ok(Err(e)) => Err(ErrorRecord::new(format!("{:#}", e)).with_stack(format!("{:?}", e))),
                Err(e) => Err(join_error_record(&agent_name, e)),
            },
            _ = tokio::time::sleep(task.timeout) => {
                // The agent call is abandoned, not awaited
                cancel.cancel();
                drop(handle);
                let err = Error::Timeout {
                    agent: agent_name.clone(),
                    case_id: case.case_id.clone(),
                    millis: task.timeout.as_millis() as u64,
                };
                Err(ErrorRecord::new(err.to_string()))
            }
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        let finished_at = Utc::now();

        let (result, success) = match outcome {
            Ok(result) => {
                info!(
                    event = "task.complete",
                    case_id = %case.case_id,
                    agent = %agent_name,
                    duration_ms,
                    has_defect = result.has_defect,
                    "task.complete"
                );
                (result, true)
            }
            Err(record) => {
                warn!(
                    event = "task.error",
                    case_id = %case.case_id,
                    agent = %agent_name,
                    duration_ms,
                    error = %record.message,
                    "task.error"
                );
                (AgentResult::failed(record), false)
            }
        };

        CaseExecutionResult {
            case_id: case.case_id.clone(),
            scene_id: case.ui_scene_id.clone(),
            agent_name,
            result,
            duration_ms,
            started_at,
            finished_at,
            success,
        }
    }
}

fn join_error_record(agent_name: &str, err: JoinError) -> ErrorRecord {
    if err.is_cancelled() {
        return ErrorRecord::new(format!("Agent \"{}\" task was cancelled", agent_name));
    }

    let payload = err.into_panic();
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string());
    ErrorRecord::new(format!("Agent \"{}\" panicked: {}", agent_name, detail))
}

/// Run tasks with a fresh scheduler
pub async fn run_tasks(tasks: Vec<RunTask>, concurrency: usize) -> Vec<CaseExecutionResult> {
    Scheduler::new(concurrency).run(tasks).await
}

use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

use futures::{future::join_all, FutureExt};
use parking_lot::Mutex;
use serde_json::json;
use shared_logging::LogLevel;
use tokio::sync::Semaphore;

use crate::{
    executor::{ExecutionError, ExecutionReport, TaskExecutor},
    task::{TaskDescriptor, TaskMode, TaskOutcome, TaskResult},
    telemetry::TaskTelemetry,
};

/// FIFO task queue executed under a concurrency ceiling.
///
/// `run_all` runs a snapshot of the queue and leaves the queue untouched; callers
/// clear it explicitly once they have consumed the results.
pub struct TaskEngine {
    queue: Mutex<Vec<TaskDescriptor>>,
    concurrency: usize,
    executor: Arc<dyn TaskExecutor>,
    telemetry: Option<TaskTelemetry>,
}

impl std::fmt::Debug for TaskEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskEngine")
            .field("queued", &self.queue.lock().len())
            .field("concurrency", &self.concurrency)
            .field("executor", &self.executor.name())
            .finish()
    }
}

impl TaskEngine {
    /// Concurrency used when none is configured.
    pub const DEFAULT_CONCURRENCY: usize = 3;

    /// Creates an engine. A concurrency of zero is raised to one.
    #[must_use]
    pub fn new(executor: Arc<dyn TaskExecutor>, concurrency: usize) -> Self {
        if concurrency == 0 {
            tracing::warn!("task concurrency 0 is invalid, using 1");
        }
        Self {
            queue: Mutex::new(Vec::new()),
            concurrency: concurrency.max(1),
            executor,
            telemetry: None,
        }
    }

    /// Attaches telemetry sinks.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: TaskTelemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Effective concurrency ceiling.
    #[must_use]
    pub const fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Appends a task to the queue.
    pub fn add_task(&self, task_text: impl Into<String>, mode: TaskMode) {
        self.queue.lock().push(TaskDescriptor::new(task_text, mode));
    }

    /// Copy of the queue in enqueue order.
    #[must_use]
    pub fn queue_snapshot(&self) -> Vec<TaskDescriptor> {
        self.queue.lock().clone()
    }

    /// Number of queued tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    /// True when nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    /// Empties the queue.
    pub fn clear(&self) {
        self.queue.lock().clear();
    }

    /// Runs every queued task and returns one result per task, in enqueue order.
    ///
    /// At most `concurrency` executions are in flight at once. A failing task only
    /// affects its own result slot.
    pub async fn run_all(&self) -> Vec<TaskResult> {
        let tasks = self.queue_snapshot();
        self.emit(
            LogLevel::Info,
            "tasks.round.started",
            json!({ "tasks": tasks.len(), "concurrency": self.concurrency }),
        );
        let admission = Semaphore::new(self.concurrency.min(Semaphore::MAX_PERMITS));
        let runs = tasks.into_iter().map(|task| {
            let admission = &admission;
            async move {
                let outcome = match admission.acquire().await {
                    Ok(permit) => {
                        let outcome = self.run_task(&task.task_text, task.mode).await;
                        drop(permit);
                        outcome
                    }
                    Err(closed) => TaskOutcome::failed(closed.to_string()),
                };
                TaskResult {
                    task_text: task.task_text,
                    mode: task.mode,
                    outcome,
                }
            }
        });
        let results = join_all(runs).await;
        let succeeded = results.iter().filter(|r| r.outcome.is_success()).count();
        self.emit(
            LogLevel::Info,
            "tasks.round.completed",
            json!({ "succeeded": succeeded, "failed": results.len() - succeeded }),
        );
        results
    }

    /// Runs a single task. Errors and panics become [`TaskOutcome::Failed`].
    pub async fn run_task(&self, task_text: &str, mode: TaskMode) -> TaskOutcome {
        let task = TaskDescriptor::new(task_text, mode);
        tracing::info!(task = task_text, %mode, executor = self.executor.name(), "running task");
        self.emit(
            LogLevel::Info,
            "task.started",
            json!({ "task": task_text, "mode": mode }),
        );
        let attempt = AssertUnwindSafe(self.executor.execute(&task))
            .catch_unwind()
            .await;
        let result = match attempt {
            Ok(Ok(report)) => extract(report.as_ref()),
            Ok(Err(err)) => Err(err),
            Err(payload) => Err(ExecutionError::Panicked(panic_message(payload.as_ref()))),
        };
        match result {
            Ok(text) => {
                tracing::info!(task = task_text, "task finished");
                self.emit(
                    LogLevel::Info,
                    "task.completed",
                    json!({ "task": task_text, "mode": mode }),
                );
                TaskOutcome::Succeeded(text)
            }
            Err(err) => {
                tracing::error!(task = task_text, error = %err, "task failed");
                self.emit(
                    LogLevel::Error,
                    "task.failed",
                    json!({ "task": task_text, "mode": mode, "error": err.to_string() }),
                );
                TaskOutcome::failed(err.to_string())
            }
        }
    }

    fn emit(&self, level: LogLevel, message: &str, metadata: serde_json::Value) {
        if let Some(tel) = &self.telemetry {
            if let Err(err) = tel.log(level, message, metadata) {
                tracing::warn!(error = %err, "task telemetry write failed");
            }
        }
    }
}

/// Prefers the report's final result and falls back to its textual rendering.
fn extract(report: &dyn ExecutionReport) -> Result<String, ExecutionError> {
    panic::catch_unwind(AssertUnwindSafe(|| {
        report.final_result().unwrap_or_else(|err| {
            tracing::debug!(error = %err, "no final result, using report text");
            report.to_string()
        })
    }))
    .map_err(|payload| ExecutionError::Panicked(panic_message(payload.as_ref())))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|msg| (*msg).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{LoopbackExecutor, TextReport};
    use async_trait::async_trait;
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    /// Tracks how many executions overlap. Fails tasks named `B`, panics on `panic`.
    #[derive(Default)]
    struct Instrumented {
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl TaskExecutor for Instrumented {
        fn name(&self) -> &str {
            "instrumented"
        }

        async fn execute(
            &self,
            task: &TaskDescriptor,
        ) -> Result<Box<dyn ExecutionReport>, ExecutionError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            match task.task_text.as_str() {
                "B" => Err(ExecutionError::Failed("B always fails".into())),
                "panic" => panic!("executor blew up"),
                text => Ok(Box::new(TextReport::answered(format!("{text}-result")))),
            }
        }
    }

    /// Finishes later tasks first.
    struct Staggered;

    #[async_trait]
    impl TaskExecutor for Staggered {
        fn name(&self) -> &str {
            "staggered"
        }

        async fn execute(
            &self,
            task: &TaskDescriptor,
        ) -> Result<Box<dyn ExecutionReport>, ExecutionError> {
            let delay: u64 = task.task_text.parse().unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(delay)).await;
            Ok(Box::new(TextReport::transcript_only(format!("slept {delay}"))))
        }
    }

    #[tokio::test]
    async fn serial_round_isolates_failure() {
        let executor = Arc::new(Instrumented::default());
        let engine = TaskEngine::new(executor.clone(), 1);
        engine.add_task("A", TaskMode::Browser);
        engine.add_task("B", TaskMode::Browser);
        engine.add_task("C", TaskMode::Code);

        let results = engine.run_all().await;
        let outcomes: Vec<_> = results.iter().map(|r| r.outcome.clone()).collect();
        assert_eq!(outcomes[0], TaskOutcome::Succeeded("A-result".into()));
        assert!(matches!(outcomes[1], TaskOutcome::Failed(_)));
        assert_eq!(outcomes[2], TaskOutcome::Succeeded("C-result".into()));
        assert_eq!(results[2].mode, TaskMode::Code);
        assert_eq!(executor.peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn admission_limit_caps_parallelism() {
        let executor = Arc::new(Instrumented::default());
        let engine = TaskEngine::new(executor.clone(), 3);
        for idx in 0..9 {
            engine.add_task(format!("task-{idx}"), TaskMode::Fast);
        }
        let results = engine.run_all().await;
        assert_eq!(results.len(), 9);
        assert!(results.iter().all(|r| r.outcome.is_success()));
        let peak = executor.peak.load(Ordering::SeqCst);
        assert!(peak <= 3, "peak {peak} exceeded the limit");
        assert!(peak > 1, "tasks never overlapped");
    }

    #[tokio::test]
    async fn results_follow_enqueue_order() {
        let engine = TaskEngine::new(Arc::new(Staggered), 4);
        for delay in ["40", "30", "20", "10"] {
            engine.add_task(delay, TaskMode::Code);
        }
        let results = engine.run_all().await;
        let texts: Vec<_> = results.iter().map(|r| r.task_text.as_str()).collect();
        assert_eq!(texts, vec!["40", "30", "20", "10"]);
        assert_eq!(results[0].outcome.result(), Some("slept 40"));
    }

    #[tokio::test]
    async fn panicking_task_becomes_failure() {
        let engine = TaskEngine::new(Arc::new(Instrumented::default()), 2);
        engine.add_task("first", TaskMode::Browser);
        engine.add_task("panic", TaskMode::Browser);
        engine.add_task("last", TaskMode::Browser);
        let results = engine.run_all().await;
        assert_eq!(results[0].outcome.result(), Some("first-result"));
        match &results[1].outcome {
            TaskOutcome::Failed(failure) => assert!(failure.reason.contains("executor blew up")),
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(results[2].outcome.result(), Some("last-result"));
    }

    #[tokio::test]
    async fn run_all_keeps_the_queue() {
        let engine = TaskEngine::new(Arc::new(LoopbackExecutor), 2);
        assert!(engine.run_all().await.is_empty());
        engine.add_task("one", TaskMode::Browser);
        engine.add_task("one", TaskMode::Browser);
        assert_eq!(engine.run_all().await.len(), 2);
        assert_eq!(engine.len(), 2);
        assert_eq!(engine.queue_snapshot()[1].task_text, "one");
        engine.clear();
        assert!(engine.is_empty());
        assert!(engine.run_all().await.is_empty());
    }

    #[tokio::test]
    async fn zero_concurrency_is_clamped() {
        let engine = TaskEngine::new(Arc::new(LoopbackExecutor), 0);
        assert_eq!(engine.concurrency(), 1);
        engine.add_task("still runs", TaskMode::Fast);
        let results = engine.run_all().await;
        assert_eq!(results[0].outcome.result(), Some("[fast] still runs"));
    }

    #[tokio::test]
    async fn run_task_reports_failure_marker() {
        let engine = TaskEngine::new(Arc::new(Instrumented::default()), 1);
        let outcome = engine.run_task("B", TaskMode::Code).await;
        assert!(!outcome.is_success());
        assert_eq!(outcome.result(), None);
    }
}

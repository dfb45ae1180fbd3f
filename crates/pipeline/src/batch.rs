//! Batch concurrency controller.
//!
//! Runs tasks in fixed-size concurrent groups with a per-task timeout and a
//! cooldown between groups. A timeout only stops waiting locally; whatever
//! remote work the task started keeps running.

use std::fmt::Display;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::future::join_all;
use futures::FutureExt;

/// Concurrency limits for [`run_batched`].
#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Tasks per concurrent group (minimum 1).
    pub max_concurrent: usize,
    /// Local wait limit per task. `None` waits indefinitely.
    pub per_task_timeout: Option<Duration>,
    /// Pause between consecutive groups.
    pub cooldown: Duration,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            max_concurrent: 1,
            per_task_timeout: None,
            cooldown: Duration::ZERO,
        }
    }
}

/// Result of a single task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome<T> {
    Completed(T),
    /// The task returned an error or panicked.
    Failed(String),
    /// The local wait exceeded the per-task timeout.
    TimedOut,
}

impl<T> TaskOutcome<T> {
    pub fn is_completed(&self) -> bool {
        matches!(self, TaskOutcome::Completed(_))
    }
}

/// Reported after each group finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchProgress {
    /// Zero-based index of the group that just finished.
    pub batch_index: usize,
    pub batch_count: usize,
    /// Tasks finished so far, across all groups.
    pub completed: usize,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Progress callback invoked after each group.
pub type ProgressFn<'a> = dyn Fn(BatchProgress) + Send + Sync + 'a;

/// Run `tasks` in groups of `options.max_concurrent`.
///
/// Results are returned in task order. A failing, panicking or timed-out
/// task never prevents later tasks from running.
pub async fn run_batched<T, E, F>(
    tasks: Vec<F>,
    options: &BatchOptions,
    on_batch_complete: Option<&ProgressFn<'_>>,
) -> Vec<TaskOutcome<T>>
where
    F: Future<Output = Result<T, E>>,
    E: Display,
{
    let total = tasks.len();
    let group_size = options.max_concurrent.max(1);
    let batch_count = total.div_ceil(group_size);

    let mut results = Vec::with_capacity(total);
    let mut succeeded = 0;
    let mut failed = 0;
    let mut remaining = tasks.into_iter().peekable();
    let mut batch_index = 0;

    while remaining.peek().is_some() {
        let group: Vec<F> = remaining.by_ref().take(group_size).collect();
        let outcomes = join_all(
            group
                .into_iter()
                .map(|task| run_one(task, options.per_task_timeout)),
        )
        .await;

        for outcome in &outcomes {
            if outcome.is_completed() {
                succeeded += 1;
            } else {
                failed += 1;
            }
        }
        results.extend(outcomes);

        if let Some(callback) = on_batch_complete {
            callback(BatchProgress {
                batch_index,
                batch_count,
                completed: results.len(),
                total,
                succeeded,
                failed,
            });
        }
        batch_index += 1;

        if remaining.peek().is_some() && !options.cooldown.is_zero() {
            tokio::time::sleep(options.cooldown).await;
        }
    }

    results
}

async fn run_one<T, E, F>(task: F, timeout: Option<Duration>) -> TaskOutcome<T>
where
    F: Future<Output = Result<T, E>>,
    E: Display,
{
    let guarded = AssertUnwindSafe(task).catch_unwind();
    let result = match timeout {
        Some(limit) => match tokio::time::timeout(limit, guarded).await {
            Ok(result) => result,
            Err(_) => return TaskOutcome::TimedOut,
        },
        None => guarded.await,
    };

    match result {
        Ok(Ok(value)) => TaskOutcome::Completed(value),
        Ok(Err(e)) => TaskOutcome::Failed(e.to_string()),
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "task panicked".to_string());
            TaskOutcome::Failed(format!("Task panicked: {message}"))
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

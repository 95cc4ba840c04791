// src/executor.rs
// Task plumbing: bounded retry with exponential backoff, fan-out over
// independent sources with a batch deadline, and a handle registry
// backing the asynchronous trigger API. Leaf failures never cross a task
// boundary as panics; they come back as structured outcomes.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::error::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    TimedOut,
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub base: Duration,
    pub max_retries: u32,
}

impl RetryPolicy {
    pub fn new(base: Duration, max_retries: u32) -> Self {
        Self { base, max_retries }
    }

    /// Backoff before the retry that follows `attempt` (1-based):
    /// `base * 2^(attempt-1)`. Monotonic in the attempt number.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base * 2u32.saturating_pow(attempt.saturating_sub(1))
    }

    /// Total attempts allowed, including the first.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }
}

/// Run `op` until it succeeds, returns a non-retryable error, or retries
/// are exhausted. Only [`PipelineError::Transient`] is retried; the last
/// error is surfaced, never swallowed.
pub async fn run_with_retry<T, F, Fut>(
    label: &str,
    policy: RetryPolicy,
    mut op: F,
) -> Result<T, PipelineError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, PipelineError>>,
{
    let mut attempt = 1u32;
    loop {
        match op(attempt).await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_retryable() && attempt < policy.max_attempts() => {
                let backoff = policy.backoff(attempt);
                tracing::warn!(
                    task = label,
                    attempt,
                    backoff_secs = backoff.as_secs_f64(),
                    error = %e,
                    "transient failure, retrying"
                );
                counter!("tasks_retries_total").increment(1);
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
            Err(e) => {
                tracing::error!(task = label, attempt, error = %e, "task failed");
                counter!("tasks_failed_total").increment(1);
                return Err(e);
            }
        }
    }
}

/// One child's terminal state within a fan-out batch.
#[derive(Debug)]
pub struct ChildOutcome<T> {
    pub name: String,
    pub result: Result<T, PipelineError>,
}

impl<T> ChildOutcome<T> {
    pub fn status(&self) -> TaskStatus {
        match &self.result {
            Ok(_) => TaskStatus::Succeeded,
            Err(PipelineError::Timeout(_)) => TaskStatus::TimedOut,
            Err(_) => TaskStatus::Failed,
        }
    }
}

#[derive(Debug)]
pub struct BatchOutcome<T> {
    pub outcomes: Vec<ChildOutcome<T>>,
    /// The batch deadline expired before every child finished. Outcomes
    /// completed by then are still present and valid.
    pub deadline_exceeded: bool,
}

impl<T> BatchOutcome<T> {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }
}

pub type ChildFuture<T> = Pin<Box<dyn Future<Output = Result<T, PipelineError>> + Send>>;

/// Dispatch all children concurrently and wait for the lot under one
/// deadline. A failing child never aborts its siblings; a blown deadline
/// stops the waiting, not the accounting of what already finished.
pub async fn run_batch<T: Send + 'static>(
    deadline: Duration,
    children: Vec<(String, ChildFuture<T>)>,
) -> BatchOutcome<T> {
    let expected = children.len();
    let mut set = JoinSet::new();
    for (name, fut) in children {
        set.spawn(async move {
            let result = fut.await;
            (name, result)
        });
    }

    let started = tokio::time::Instant::now();
    let mut outcomes = Vec::with_capacity(expected);
    let mut deadline_exceeded = false;

    while outcomes.len() < expected {
        let remaining = deadline.saturating_sub(started.elapsed());
        if remaining.is_zero() {
            deadline_exceeded = true;
            break;
        }
        match tokio::time::timeout(remaining, set.join_next()).await {
            Ok(Some(Ok((name, result)))) => outcomes.push(ChildOutcome { name, result }),
            Ok(Some(Err(join_err))) => {
                // A panicked child is a failure of that child only.
                outcomes.push(ChildOutcome {
                    name: "<panicked>".to_string(),
                    result: Err(PipelineError::transient(join_err.to_string())),
                });
            }
            Ok(None) => break,
            Err(_) => {
                deadline_exceeded = true;
                break;
            }
        }
    }

    if deadline_exceeded {
        // The deadline ends the waiting, not the children: outstanding
        // tasks keep running detached and their idempotent writes still
        // land.
        set.detach_all();
        tracing::warn!(
            finished = outcomes.len(),
            expected,
            "batch deadline exceeded with children outstanding"
        );
        counter!("tasks_batch_timeouts_total").increment(1);
    }

    BatchOutcome {
        outcomes,
        deadline_exceeded,
    }
}

/// Record returned by the task-status API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: Uuid,
    pub label: String,
    pub status: TaskStatus,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// In-process registry of dispatched tasks, keyed by handle.
#[derive(Debug, Default)]
pub struct TaskRegistry {
    inner: Mutex<HashMap<Uuid, TaskRecord>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new pending task and hand back its id.
    pub fn create(&self, label: impl Into<String>) -> Uuid {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let record = TaskRecord {
            id,
            label: label.into(),
            status: TaskStatus::Pending,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
        };
        self.inner
            .lock()
            .expect("task registry mutex poisoned")
            .insert(id, record);
        id
    }

    pub fn mark_running(&self, id: Uuid) {
        self.update(id, |r| r.status = TaskStatus::Running);
    }

    pub fn mark_succeeded(&self, id: Uuid, result: serde_json::Value) {
        self.update(id, |r| {
            r.status = TaskStatus::Succeeded;
            r.result = Some(result);
        });
    }

    pub fn mark_failed(&self, id: Uuid, error: impl Into<String>) {
        self.update(id, |r| {
            r.status = TaskStatus::Failed;
            r.error = Some(error.into());
        });
    }

    pub fn mark_timed_out(&self, id: Uuid, partial: serde_json::Value) {
        self.update(id, |r| {
            r.status = TaskStatus::TimedOut;
            r.result = Some(partial);
        });
    }

    pub fn get(&self, id: Uuid) -> Option<TaskRecord> {
        self.inner
            .lock()
            .expect("task registry mutex poisoned")
            .get(&id)
            .cloned()
    }

    fn update(&self, id: Uuid, f: impl FnOnce(&mut TaskRecord)) {
        let mut map = self.inner.lock().expect("task registry mutex poisoned");
        if let Some(r) = map.get_mut(&id) {
            f(r);
            r.updated_at = Utc::now();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn backoff_doubles_per_attempt() {
        let p = RetryPolicy::new(Duration::from_secs(60), 3);
        assert_eq!(p.backoff(1), Duration::from_secs(60));
        assert_eq!(p.backoff(2), Duration::from_secs(120));
        assert_eq!(p.backoff(3), Duration::from_secs(240));
        assert_eq!(p.max_attempts(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_retry_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let policy = RetryPolicy::new(Duration::from_millis(10), 3);
        let out = run_with_retry("t", policy, move |attempt| {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                if attempt < 3 {
                    Err(PipelineError::transient("again"))
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;
        assert_eq!(out.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn config_errors_are_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let policy = RetryPolicy::new(Duration::from_millis(10), 3);
        let out: Result<(), _> = run_with_retry("t", policy, move |_| {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(PipelineError::config("missing credentials"))
            }
        })
        .await;
        assert!(matches!(out, Err(PipelineError::Config(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_surface_last_error() {
        let policy = RetryPolicy::new(Duration::from_millis(10), 2);
        let out: Result<(), _> = run_with_retry("t", policy, |_| async {
            Err(PipelineError::transient("still down"))
        })
        .await;
        assert!(matches!(out, Err(PipelineError::Transient(_))));
    }

    #[tokio::test]
    async fn one_failing_child_does_not_abort_siblings() {
        let children: Vec<(String, ChildFuture<u32>)> = vec![
            ("a".into(), Box::pin(async { Ok(1) })),
            (
                "b".into(),
                Box::pin(async { Err(PipelineError::transient("boom")) }),
            ),
            ("c".into(), Box::pin(async { Ok(3) })),
        ];
        let batch = run_batch(Duration::from_secs(5), children).await;
        assert!(!batch.deadline_exceeded);
        assert_eq!(batch.succeeded(), 2);
        assert_eq!(batch.failed(), 1);
        let failed: Vec<_> = batch
            .outcomes
            .iter()
            .filter(|o| o.result.is_err())
            .map(|o| o.name.as_str())
            .collect();
        assert_eq!(failed, vec!["b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_reports_timeout_not_child_failure() {
        let children: Vec<(String, ChildFuture<u32>)> = vec![
            ("fast".into(), Box::pin(async { Ok(1) })),
            (
                "slow".into(),
                Box::pin(async {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(2)
                }),
            ),
        ];
        let batch = run_batch(Duration::from_millis(200), children).await;
        assert!(batch.deadline_exceeded);
        // The finished child's outcome is intact.
        assert_eq!(batch.succeeded(), 1);
        assert_eq!(batch.outcomes[0].name, "fast");
    }

    #[tokio::test(start_paused = true)]
    async fn slow_children_outlive_the_deadline_and_finish() {
        let done = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = Arc::clone(&done);
        let children: Vec<(String, ChildFuture<u32>)> = vec![(
            "slow".into(),
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(300)).await;
                flag.store(true, Ordering::SeqCst);
                Ok(1)
            }),
        )];

        let batch = run_batch(Duration::from_millis(50), children).await;
        assert!(batch.deadline_exceeded);
        assert!(batch.outcomes.is_empty());
        assert!(!done.load(Ordering::SeqCst));

        // The child was detached, not aborted: it completes on its own.
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(done.load(Ordering::SeqCst));
    }

    #[test]
    fn registry_tracks_lifecycle() {
        let reg = TaskRegistry::new();
        let id = reg.create("collect");
        assert_eq!(reg.get(id).unwrap().status, TaskStatus::Pending);
        reg.mark_running(id);
        assert_eq!(reg.get(id).unwrap().status, TaskStatus::Running);
        reg.mark_succeeded(id, serde_json::json!({"saved": 7}));
        let rec = reg.get(id).unwrap();
        assert_eq!(rec.status, TaskStatus::Succeeded);
        assert_eq!(rec.result.unwrap()["saved"], 7);
        assert!(reg.get(Uuid::new_v4()).is_none());
    }
}

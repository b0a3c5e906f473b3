//! # Asynchronous tasks
//!
//! Every mutating Meilisearch call (index create/delete/update, settings,
//! document additions) returns immediately with a [`TaskHandle`]. The write is
//! only complete once the task reaches a terminal [`TaskStatus`], which is
//! observed by polling `GET /tasks/{uid}` with a [`TaskWaiter`].
//!
//! ```rust,no_run
//! use meili::prelude::*;
//! # async fn example(client: &MeiliClient) -> Result<(), MeiliError> {
//! let waiter = TaskWaiter::new(std::time::Duration::from_millis(500));
//! let outcome = waiter.run(client, client.create_index("movies", Some("id"))).await;
//! if !outcome.is_success() {
//!     eprintln!("create failed: {outcome}");
//! }
//! # Ok(())
//! # }
//! ```

use std::{fmt, future::Future, time::Duration};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::{Display, EnumString};
use tracing::{debug, warn};

use crate::{Result, config::DEFAULT_POLL_INTERVAL_MS, error::MeiliError, service::SearchService};

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TaskStatus {
    Enqueued,
    Processing,
    Succeeded,
    Failed,
    Canceled,
}

impl TaskStatus {
    /// True for `succeeded`, `failed` and `canceled`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Canceled)
    }
}

/// Summarized task returned by mutating calls (http 202).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskHandle {
    pub task_uid: u64,
    #[serde(default)]
    pub index_uid: Option<String>,
    pub status: TaskStatus,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub enqueued_at: Option<String>,
}

/// Error details attached to a failed task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskError {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub code: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub link: Option<String>,
}

/// Full task record from `GET /tasks/{uid}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub uid: u64,
    #[serde(default)]
    pub index_uid: Option<String>,
    pub status: TaskStatus,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub error: Option<TaskError>,
    /// Remaining fields (details, timestamps, duration) kept as-is.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Task {
    pub fn succeeded(&self) -> bool {
        self.status == TaskStatus::Succeeded
    }

    /// True when the task error concerns the index primary key
    /// (e.g. `index_primary_key_no_candidate_found`, `missing_document_id`).
    pub fn is_primary_key_error(&self) -> bool {
        self.error.as_ref().is_some_and(|err| {
            err.code.contains("primary_key")
                || err.code == "missing_document_id"
                || err.message.contains("primary key")
                || err.message.contains("primary_key")
        })
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "task {} {} status={}",
            self.uid,
            self.kind.as_deref().unwrap_or("unknown"),
            self.status
        )?;
        if let Some(err) = &self.error {
            write!(f, " error={} ({})", err.message, err.code)?;
        }
        Ok(())
    }
}

/// Decides how long to sleep between task status queries.
pub trait WaitStrategy {
    /// Delay before status query number `attempt + 1`. `attempt` starts at 0.
    fn next_delay(&self, attempt: u32) -> Duration;
}

/// Constant polling interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedDelay(pub Duration);

impl Default for FixedDelay {
    fn default() -> Self {
        Self(Duration::from_millis(DEFAULT_POLL_INTERVAL_MS))
    }
}

impl WaitStrategy for FixedDelay {
    fn next_delay(&self, _attempt: u32) -> Duration {
        self.0
    }
}

/// Terminal result of waiting on one task.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    /// The task reached `succeeded`, `failed` or `canceled`.
    Resolved(Task),
    /// The status query itself failed; the task's fate is unknown.
    Unknown { task_uid: u64, reason: String },
}

impl TaskOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Resolved(task) if task.succeeded())
    }

    pub fn task(&self) -> Option<&Task> {
        match self {
            Self::Resolved(task) => Some(task),
            Self::Unknown { .. } => None,
        }
    }
}

impl fmt::Display for TaskOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resolved(task) => task.fmt(f),
            Self::Unknown { task_uid, reason } => {
                write!(f, "task {task_uid} status unknown: {reason}")
            }
        }
    }
}

/// Result of submitting a mutation and waiting for its task.
#[derive(Debug)]
pub enum WriteOutcome {
    /// The request was accepted and its task succeeded.
    Succeeded(Task),
    /// The request was accepted, but the task failed, was canceled, or its status
    /// could not be read.
    Failed(TaskOutcome),
    /// The service refused the request; no task was created.
    Rejected(MeiliError),
}

impl WriteOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded(_))
    }

    /// The task record, when one was obtained.
    pub fn task(&self) -> Option<&Task> {
        match self {
            Self::Succeeded(task) => Some(task),
            Self::Failed(outcome) => outcome.task(),
            Self::Rejected(_) => None,
        }
    }
}

impl fmt::Display for WriteOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded(task) => task.fmt(f),
            Self::Failed(outcome) => outcome.fmt(f),
            Self::Rejected(err) => f.write_str(&err.body_text()),
        }
    }
}

/// Polls task status until it is terminal.
#[derive(Debug, Clone)]
pub struct TaskWaiter<W = FixedDelay> {
    strategy: W,
}

impl Default for TaskWaiter<FixedDelay> {
    fn default() -> Self {
        Self::with_strategy(FixedDelay::default())
    }
}

impl TaskWaiter<FixedDelay> {
    /// Waiter with a fixed polling interval.
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            strategy: FixedDelay(poll_interval),
        }
    }
}

impl<W: WaitStrategy> TaskWaiter<W> {
    pub fn with_strategy(strategy: W) -> Self {
        Self { strategy }
    }

    /// Queries task status until it leaves `enqueued`/`processing`.
    ///
    /// There is no upper bound on the wait. If a status query fails, returns
    /// [`TaskOutcome::Unknown`] immediately instead of retrying.
    pub async fn wait<S: SearchService>(&self, service: &S, task_uid: u64) -> TaskOutcome {
        let mut attempt = 0u32;
        loop {
            match service.get_task(task_uid).await {
                Ok(task) if task.status.is_terminal() => {
                    debug!(task_uid, status = %task.status, attempt, "task resolved");
                    return TaskOutcome::Resolved(task);
                }
                Ok(task) => {
                    debug!(task_uid, status = %task.status, attempt, "task pending");
                }
                Err(err) => {
                    warn!(task_uid, "task status query failed: {err}");
                    return TaskOutcome::Unknown {
                        task_uid,
                        reason: err.body_text(),
                    };
                }
            }
            let delay = self.strategy.next_delay(attempt);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            attempt = attempt.saturating_add(1);
        }
    }

    /// Awaits a mutating request, then waits for the task it enqueued.
    pub async fn run<S, F>(&self, service: &S, request: F) -> WriteOutcome
    where
        S: SearchService,
        F: Future<Output = Result<TaskHandle>>,
    {
        match request.await {
            Err(err) => WriteOutcome::Rejected(err),
            Ok(handle) => match self.wait(service, handle.task_uid).await {
                TaskOutcome::Resolved(task) if task.succeeded() => WriteOutcome::Succeeded(task),
                other => WriteOutcome::Failed(other),
            },
        }
    }
}

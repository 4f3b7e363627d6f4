//! Polling-based observation of worker and task state
//!
//! The queue offers no push channel for state changes, so the tracker
//! polls at a fixed interval until a condition holds or a deadline passes.
//! Conditions are level-triggered: a condition that already holds on the
//! first poll succeeds immediately.

use std::future::Future;
use std::path::Path;
use std::time::Duration;

use tokio::time::{sleep, timeout_at, Instant};
use tracing::{debug, info, warn};

use crate::config::PollingSettings;
use crate::error::{QueueError, Result};
use crate::queue::{QueueApi, Task};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollOptions {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(500),
            timeout: Duration::from_secs(30),
        }
    }
}

impl From<&PollingSettings> for PollOptions {
    fn from(settings: &PollingSettings) -> Self {
        Self {
            interval: settings.interval(),
            timeout: settings.timeout(),
        }
    }
}

impl PollOptions {
    pub fn with_timeout(self, timeout: Duration) -> Self {
        Self { timeout, ..self }
    }
}

/// Result of one poll attempt
pub(crate) enum Observation<T> {
    Ready(T),
    /// Not there yet; carries what was observed for diagnostics
    Pending(String),
}

/// Poll `check` until it is ready or `options.timeout` elapses.
///
/// Transient errors count as "not ready yet"; any other error aborts.
pub(crate) async fn poll_until<T, F, Fut>(what: &str, options: PollOptions, mut check: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Observation<T>>>,
{
    let started = Instant::now();
    let deadline = started + options.timeout;
    let mut last_observed = None;
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        match timeout_at(deadline, check()).await {
            Ok(Ok(Observation::Ready(value))) => {
                debug!("{} after {} poll(s)", what, attempts);
                return Ok(value);
            }
            Ok(Ok(Observation::Pending(observed))) => last_observed = Some(observed),
            Ok(Err(e)) if e.is_transient() => {
                debug!("Poll for {} failed transiently: {}", what, e);
                last_observed = Some(e.to_string());
            }
            Ok(Err(e)) => return Err(e),
            // the check itself ran into the deadline
            Err(_) => {}
        }

        let now = Instant::now();
        if now >= deadline {
            warn!(
                "Timed out after {:?} waiting for {} (last observed: {})",
                options.timeout,
                what,
                last_observed.as_deref().unwrap_or("nothing")
            );
            return Err(QueueError::Timeout {
                what: what.to_string(),
                waited: now - started,
                last_observed,
            });
        }
        sleep(options.interval.min(deadline - now)).await;
    }
}

/// Observes worker and task state through a [`QueueApi`]
pub struct StateTracker<A> {
    api: A,
    options: PollOptions,
}

impl<A: QueueApi> StateTracker<A> {
    pub fn new(api: A) -> Self {
        Self::with_options(api, PollOptions::default())
    }

    pub fn with_options(api: A, options: PollOptions) -> Self {
        Self { api, options }
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn options(&self) -> PollOptions {
        self.options
    }

    /// Wait until `worker`'s `task_id` equals `target` (`None` = idle).
    ///
    /// Returns `false` if the deadline passes first.
    pub async fn wait_for_worker_task_id(
        &self,
        worker: &str,
        target: Option<&str>,
        timeout: Duration,
    ) -> Result<bool> {
        let what = match target {
            Some(id) => format!("worker {} to take task {}", worker, id),
            None => format!("worker {} to become idle", worker),
        };
        let api = &self.api;
        let result = poll_until(&what, self.options.with_timeout(timeout), move || async move {
            let current = api.get_worker(worker).await?;
            if current.task_id.as_deref() == target {
                Ok(Observation::Ready(()))
            } else {
                Ok(Observation::Pending(format!(
                    "task_id={}",
                    current.task_id.as_deref().unwrap_or("null")
                )))
            }
        })
        .await;

        match result {
            Ok(()) => {
                info!("Observed {}", what);
                Ok(true)
            }
            Err(QueueError::Timeout { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Wait until `worker`'s `task_id` differs from `from` and return the
    /// new value. Callers capture `from` beforehand to observe an edge.
    pub async fn wait_for_worker_change(
        &self,
        worker: &str,
        from: Option<&str>,
        timeout: Duration,
    ) -> Result<Option<String>> {
        let what = format!(
            "worker {} to leave task_id={}",
            worker,
            from.unwrap_or("null")
        );
        let api = &self.api;
        poll_until(&what, self.options.with_timeout(timeout), move || async move {
            let current = api.get_worker(worker).await?;
            if current.task_id.as_deref() != from {
                Ok(Observation::Ready(current.task_id))
            } else {
                Ok(Observation::Pending(format!("task_id={}", from.unwrap_or("null"))))
            }
        })
        .await
    }

    /// Wait until the task reports `state == "completed"`
    pub async fn wait_for_task_completed(&self, task_id: &str, timeout: Duration) -> Result<Task> {
        let what = format!("task {} to complete", task_id);
        let api = &self.api;
        let task = poll_until(&what, self.options.with_timeout(timeout), move || async move {
            let task = api.get_task(task_id).await?;
            if task.is_completed() {
                Ok(Observation::Ready(task))
            } else {
                Ok(Observation::Pending(format!(
                    "state={}",
                    task.state.as_deref().unwrap_or("unknown")
                )))
            }
        })
        .await?;
        info!("Task completed: id={}, name={}", task.id, task.name);
        Ok(task)
    }
}

/// Wait until `path` exists on the shared filesystem
pub async fn wait_until_file_appears(path: &Path, options: PollOptions) -> Result<()> {
    let what = format!("{} to appear", path.display());
    poll_until(&what, options, move || async move {
        if tokio::fs::try_exists(path).await? {
            Ok(Observation::Ready(()))
        } else {
            Ok(Observation::Pending("absent".to_string()))
        }
    })
    .await?;
    debug!("File appeared: {}", path.display());
    Ok(())
}

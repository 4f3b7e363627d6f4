//! Reconciliation of the two verdict delivery channels
//!
//! A finished task's result can be picked up from the shared task directory
//! or pushed to the callback receiver. Both paths decode the same artifact
//! with [`decode_verdict`]; whichever produces a verdict first wins and the
//! other is dropped.

use std::fmt;
use std::future::Future;

use tracing::{info, warn};

use crate::callback::CallbackWaiter;
use crate::error::{QueueError, Result};
use crate::storage::TaskStorage;
use crate::tracker::{poll_until, Observation, PollOptions};
use crate::verdict::{decode_verdict, Verdict};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Poll,
    Callback,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Poll => write!(f, "poll"),
            Channel::Callback => write!(f, "callback"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedVerdict {
    pub verdict: Verdict,
    pub channel: Channel,
}

/// Race both channels; the first one yielding a verdict wins.
///
/// A channel that fails does not end the race while the other is still
/// running. If both fail, the polling error is returned.
pub async fn resolve_first<P, C>(polling: P, callback: C) -> Result<ResolvedVerdict>
where
    P: Future<Output = Result<Verdict>>,
    C: Future<Output = Result<Verdict>>,
{
    tokio::pin!(polling);
    tokio::pin!(callback);
    let mut poll_err: Option<QueueError> = None;
    let mut callback_err: Option<QueueError> = None;

    loop {
        tokio::select! {
            outcome = &mut polling, if poll_err.is_none() => match outcome {
                Ok(verdict) => return Ok(ResolvedVerdict { verdict, channel: Channel::Poll }),
                Err(e) => {
                    warn!("Polling channel failed: {}", e);
                    poll_err = Some(e);
                }
            },
            outcome = &mut callback, if callback_err.is_none() => match outcome {
                Ok(verdict) => return Ok(ResolvedVerdict { verdict, channel: Channel::Callback }),
                Err(e) => {
                    warn!("Callback channel failed, falling back to polling: {}", e);
                    callback_err = Some(e);
                }
            },
            else => break,
        }
    }

    Err(poll_err
        .or(callback_err)
        .unwrap_or_else(|| QueueError::MalformedResult("no channel delivered a verdict".into())))
}

/// Fetches verdicts for finished tasks
#[derive(Debug, Clone)]
pub struct VerdictResolver {
    storage: TaskStorage,
    options: PollOptions,
}

impl VerdictResolver {
    pub fn new(storage: TaskStorage, options: PollOptions) -> Self {
        Self { storage, options }
    }

    pub fn storage(&self) -> &TaskStorage {
        &self.storage
    }

    /// Wait until `<id>.output.tar.gz` exists and decodes.
    ///
    /// An archive that does not decode yet is treated as still being
    /// written; on timeout the last decode error is reported as the last
    /// observed state.
    pub async fn poll_verdict(&self, task_id: &str) -> Result<Verdict> {
        let what = format!("verdict of task {}", task_id);
        let storage = &self.storage;
        poll_until(&what, self.options, move || async move {
            if !storage.output_exists(task_id).await? {
                return Ok(Observation::Pending("output absent".to_string()));
            }
            let bytes = storage.read_output(task_id).await?;
            match decode_verdict(&bytes) {
                Ok(verdict) => Ok(Observation::Ready(verdict)),
                Err(QueueError::MalformedResult(reason)) => {
                    Ok(Observation::Pending(format!("unreadable output: {}", reason)))
                }
                Err(e) => Err(e),
            }
        })
        .await
    }

    /// Resolve through polling, raced against `callback` when one was
    /// registered for the task. Both legs share the polling deadline.
    pub async fn resolve(
        &self,
        task_id: &str,
        callback: Option<CallbackWaiter>,
    ) -> Result<ResolvedVerdict> {
        let resolved = match callback {
            Some(waiter) => {
                resolve_first(self.poll_verdict(task_id), waiter.wait(self.options.timeout))
                    .await?
            }
            None => ResolvedVerdict {
                verdict: self.poll_verdict(task_id).await?,
                channel: Channel::Poll,
            },
        };
        info!(
            "Resolved verdict: task={}, verdict={}, via={}",
            task_id, resolved.verdict, resolved.channel
        );
        Ok(resolved)
    }
}

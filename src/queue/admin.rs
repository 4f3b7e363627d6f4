//! Administrative queue operations
//!
//! Used by test harnesses to isolate runs: flushing queue state and
//! replacing the worker registry. Ordinary callers go through
//! [`QueueClient`](super::QueueClient), which has no access to these.

use serde::{Deserialize, Serialize};
use tracing::info;

use super::{unexpected, Transport};
use crate::config::QueueSettings;
use crate::error::Result;

/// Worker registration sent when reseeding the registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerSeed {
    pub name: String,
    pub uri: String,
    pub enabled: bool,
}

impl WorkerSeed {
    pub fn new(name: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uri: uri.into(),
            enabled: true,
        }
    }
}

pub struct AdminClient {
    transport: Transport,
}

impl AdminClient {
    pub fn new(settings: &QueueSettings) -> Result<Self> {
        Ok(Self {
            transport: Transport::new(settings)?,
        })
    }

    /// Drop all queued and finished tasks
    pub async fn admin_flush(&self) -> Result<()> {
        let url = self.transport.url("admin/flush");
        let response = self.transport.http().post(&url).send().await?;
        if !response.status().is_success() {
            return Err(unexpected(url, response).await);
        }
        info!("Flushed queue state");
        Ok(())
    }

    /// Replace the whole worker registry with `workers`, all idle
    pub async fn reset_workers(&self, workers: &[WorkerSeed]) -> Result<()> {
        let url = self.transport.url("admin/workers");
        let response = self.transport.http().put(&url).json(workers).send().await?;
        if !response.status().is_success() {
            return Err(unexpected(url, response).await);
        }
        info!(
            "Reset worker registry: [{}]",
            workers
                .iter()
                .map(|w| w.name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(())
    }
}

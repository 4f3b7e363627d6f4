//! Shared task directory written by the queue
//!
//! The queue stores each accepted submission as `<id>.input.tar` and the
//! grading output as `<id>.output.tar.gz`, both under `<dat>/tasks`.

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::debug;

use crate::config::Settings;
use crate::error::Result;

#[derive(Debug, Clone)]
pub struct TaskStorage {
    tasks_dir: PathBuf,
}

impl TaskStorage {
    pub fn new(tasks_dir: impl Into<PathBuf>) -> Self {
        Self {
            tasks_dir: tasks_dir.into(),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.tasks_dir())
    }

    pub fn tasks_dir(&self) -> &Path {
        &self.tasks_dir
    }

    pub fn input_path(&self, task_id: &str) -> PathBuf {
        self.tasks_dir.join(format!("{}.input.tar", task_id))
    }

    pub fn output_path(&self, task_id: &str) -> PathBuf {
        self.tasks_dir.join(format!("{}.output.tar.gz", task_id))
    }

    /// Submission container as stored by the queue
    pub async fn read_input(&self, task_id: &str) -> Result<Vec<u8>> {
        let path = self.input_path(task_id);
        debug!("Reading task input {}", path.display());
        Ok(fs::read(&path).await?)
    }

    /// Result artifact produced by the grading system
    pub async fn read_output(&self, task_id: &str) -> Result<Vec<u8>> {
        let path = self.output_path(task_id);
        debug!("Reading task output {}", path.display());
        Ok(fs::read(&path).await?)
    }

    pub async fn output_exists(&self, task_id: &str) -> Result<bool> {
        Ok(fs::try_exists(self.output_path(task_id)).await?)
    }
}

//! Good lumi lists.
//!
//! A good lumi list restricts a re-split to the lumis that still need
//! processing. [`FailedJobCollection`] builds one from failed jobs: the lumis
//! of every input file of every job that failed for a task.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::file::InputFile;
use crate::mask::Mask;

/// Source of good lumi lists, keyed by task path.
#[async_trait]
pub trait GoodLumiService: Send + Sync {
    /// Returns the lumis of `task` that should be processed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::GoodLumiUnavailable`] if the list cannot be produced.
    async fn good_lumi_list(&self, task: &str) -> Result<Mask>;
}

/// Fixed good lumi lists, mostly for tests and offline use.
#[derive(Debug, Default, Clone)]
pub struct StaticGoodLumiList {
    lists: HashMap<String, Mask>,
}

impl StaticGoodLumiList {
    /// Creates an empty set of lists.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the list for `task`.
    #[must_use]
    pub fn with_task(mut self, task: impl Into<String>, mask: Mask) -> Self {
        self.lists.insert(task.into(), mask);
        self
    }
}

#[async_trait]
impl GoodLumiService for StaticGoodLumiList {
    async fn good_lumi_list(&self, task: &str) -> Result<Mask> {
        self.lists
            .get(task)
            .cloned()
            .ok_or_else(|| Error::GoodLumiUnavailable {
                task: task.to_string(),
                message: "no list registered".into(),
            })
    }
}

/// A job that failed, with the files it read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedJob {
    /// Task path of the job.
    pub task: String,
    /// Workflow the job belonged to.
    pub workflow: String,
    /// Input files of the job.
    pub input_files: Vec<InputFile>,
}

/// Collects failed jobs and serves their lumis as good lumi lists.
#[derive(Debug, Default)]
pub struct FailedJobCollection {
    jobs: RwLock<HashMap<String, Vec<FailedJob>>>,
}

fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("failed job collection lock poisoned")
}

impl FailedJobCollection {
    /// Creates an empty collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records failed jobs.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the collection lock is poisoned.
    pub fn record_failed_jobs(&self, jobs: impl IntoIterator<Item = FailedJob>) -> Result<()> {
        let mut by_task = self.jobs.write().map_err(poison_err)?;
        for job in jobs {
            debug!(task = %job.task, files = job.input_files.len(), "recording failed job");
            by_task.entry(job.task.clone()).or_default().push(job);
        }
        Ok(())
    }

    /// Number of failed jobs recorded for `task`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the collection lock is poisoned.
    pub fn failed_job_count(&self, task: &str) -> Result<usize> {
        let by_task = self.jobs.read().map_err(poison_err)?;
        Ok(by_task.get(task).map_or(0, Vec::len))
    }
}

#[async_trait]
impl GoodLumiService for FailedJobCollection {
    async fn good_lumi_list(&self, task: &str) -> Result<Mask> {
        let by_task = self.jobs.read().map_err(poison_err)?;
        let mut mask = Mask::new();
        for job in by_task.get(task).into_iter().flatten() {
            for file in &job.input_files {
                mask = mask.union(&file.lumi_mask()?);
            }
        }
        Ok(mask)
    }
}

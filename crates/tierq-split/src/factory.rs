//! Dispatch from a [`SplitAlgorithm`] to its splitter.

use std::sync::Arc;

use tracing::{info, warn};

use crate::error::Result;
use crate::event_based::EventSplitter;
use crate::file::InputFile;
use crate::good_lumi::GoodLumiService;
use crate::job::{JobGroup, JobNamer};
use crate::lumi_based::LumiSplitter;
use crate::mask::Mask;
use crate::params::{LumiBasedParams, SplitAlgorithm};
use crate::JobSplitter;

/// Builds job groups for a set of input files.
///
/// A lumi-based split that names a good lumi source asks the configured
/// [`GoodLumiService`]. If there is no service, or it fails, the split runs
/// unfiltered and a warning is logged.
#[derive(Clone, Default)]
pub struct JobFactory {
    good_lumis: Option<Arc<dyn GoodLumiService>>,
}

impl std::fmt::Debug for JobFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobFactory")
            .field("good_lumis", &self.good_lumis.is_some())
            .finish()
    }
}

impl JobFactory {
    /// Creates a factory without a good lumi service.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses `service` to resolve good lumi lists.
    #[must_use]
    pub fn with_good_lumi_service(mut self, service: Arc<dyn GoodLumiService>) -> Self {
        self.good_lumis = Some(service);
        self
    }

    /// Splits `files` with `algorithm`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvariantViolation`] if the files assign the
    /// same lumi twice within a location group.
    pub async fn split(
        &self,
        algorithm: &SplitAlgorithm,
        files: &[InputFile],
        namer: &mut JobNamer,
    ) -> Result<Vec<JobGroup>> {
        self.split_within(algorithm, files, None, namer).await
    }

    /// Splits `files`, additionally restricting lumi-based jobs to `mask`.
    ///
    /// An event mask, or a mask without lumis, imposes no restriction.
    ///
    /// # Errors
    ///
    /// See [`JobFactory::split`].
    #[tracing::instrument(
        skip(self, algorithm, files, mask, namer),
        fields(algorithm = algorithm.name(), files = files.len())
    )]
    pub async fn split_within(
        &self,
        algorithm: &SplitAlgorithm,
        files: &[InputFile],
        mask: Option<&Mask>,
        namer: &mut JobNamer,
    ) -> Result<Vec<JobGroup>> {
        let groups = match algorithm {
            SplitAlgorithm::EventBased(params) => EventSplitter::new(*params).split(files, namer)?,
            SplitAlgorithm::LumiBased(params) => {
                let restriction = self.lumi_restriction(params, mask).await;
                let mut splitter = LumiSplitter::new(params.clone());
                if let Some(restriction) = restriction {
                    splitter = splitter.with_good_lumis(restriction);
                }
                splitter.split(files, namer)?
            }
        };
        let jobs: usize = groups.iter().map(JobGroup::len).sum();
        info!(groups = groups.len(), jobs, "split input files");
        Ok(groups)
    }

    async fn lumi_restriction(
        &self,
        params: &LumiBasedParams,
        mask: Option<&Mask>,
    ) -> Option<Mask> {
        let element_mask = mask.filter(|m| m.has_lumis()).cloned();
        let good = match &params.good_lumi_source {
            None => None,
            Some(source) => match &self.good_lumis {
                None => {
                    warn!(url = %source.url, task = %source.task, "no good lumi service configured; splitting unfiltered");
                    None
                }
                Some(service) => match service.good_lumi_list(&source.task).await {
                    Ok(list) => Some(list),
                    Err(e) => {
                        warn!(url = %source.url, task = %source.task, error = %e, "good lumi list unavailable; splitting unfiltered");
                        None
                    }
                },
            },
        };
        match (element_mask, good) {
            (Some(a), Some(b)) => Some(a.intersection(&b)),
            (a, b) => a.or(b),
        }
    }
}

//! Lumi-count job splitting.
//!
//! Files are grouped by location. Within a group, lumis are streamed in file
//! order (runs ascending, lumis ascending) into the current job, which is
//! closed when:
//!
//! - it already holds `lumis_per_job` lumis,
//! - `split_on_run` is set and the next lumi belongs to another run, or
//! - `split_files_between_job` is set and a new file starts.
//!
//! With a good lumi list, lumis outside the list are skipped entirely and do
//! not influence run boundaries.

use tracing::debug;

use tierq_core::observability::split_span;

use crate::error::{Error, Result};
use crate::file::InputFile;
use crate::job::{group_by_location, location_label, Job, JobGroup, JobNamer};
use crate::mask::{Mask, Run};
use crate::params::LumiBasedParams;
use crate::JobSplitter;

/// Splits files into jobs of a fixed number of lumis.
#[derive(Debug, Clone)]
pub struct LumiSplitter {
    params: LumiBasedParams,
    good_lumis: Option<Mask>,
}

struct OpenJob {
    job: Job,
    lumis: u32,
    run: Run,
}

impl LumiSplitter {
    /// Creates a splitter without a good lumi filter.
    #[must_use]
    pub const fn new(params: LumiBasedParams) -> Self {
        Self {
            params,
            good_lumis: None,
        }
    }

    /// Restricts output to lumis contained in `good_lumis`.
    #[must_use]
    pub fn with_good_lumis(mut self, good_lumis: Mask) -> Self {
        self.good_lumis = Some(good_lumis);
        self
    }

    /// Returns the splitting parameters.
    #[must_use]
    pub const fn params(&self) -> &LumiBasedParams {
        &self.params
    }

    fn split_group(
        &self,
        group: &mut JobGroup,
        files: &[&InputFile],
        namer: &mut JobNamer,
    ) -> Result<()> {
        let limit = self.params.lumis_per_job.get();
        let mut assigned = Mask::new();
        let mut current: Option<OpenJob> = None;

        for file in files {
            if self.params.split_files_between_job {
                close(group, &mut current)?;
            }
            for (run, lumi) in file.lumis() {
                if let Some(good) = &self.good_lumis {
                    if !good.contains(run, lumi) {
                        continue;
                    }
                }
                if assigned.contains(run, lumi) {
                    return Err(Error::invariant(format!(
                        "run {run} lumi {lumi} assigned twice (file {})",
                        file.lfn
                    )));
                }
                assigned.add_lumi(run, lumi)?;

                let boundary = current.as_ref().is_some_and(|open| {
                    open.lumis >= limit || (self.params.split_on_run && open.run != run)
                });
                if boundary {
                    close(group, &mut current)?;
                }

                let open = current.get_or_insert_with(|| OpenJob {
                    job: Job::new(namer.next_name()),
                    lumis: 0,
                    run,
                });
                open.job.add_file(&file.lfn);
                open.job.mask.add_lumi(run, lumi)?;
                open.lumis += 1;
                open.run = run;
            }
        }
        close(group, &mut current)
    }
}

fn close(group: &mut JobGroup, current: &mut Option<OpenJob>) -> Result<()> {
    if let Some(open) = current.take() {
        group.add_job(open.job)?;
    }
    Ok(())
}

impl JobSplitter for LumiSplitter {
    fn algorithm(&self) -> &'static str {
        "LumiBased"
    }

    fn split(&self, files: &[InputFile], namer: &mut JobNamer) -> Result<Vec<JobGroup>> {
        let mut groups = Vec::new();
        for (locations, members) in group_by_location(files) {
            let span = split_span(self.algorithm(), &location_label(&locations));
            let _guard = span.enter();

            let mut group = JobGroup::new(locations);
            self.split_group(&mut group, &members, namer)?;
            debug!(files = members.len(), jobs = group.len(), "split location group");
            if !group.is_empty() {
                groups.push(group);
            }
        }
        Ok(groups)
    }
}

//! Event-count job splitting.

use tracing::debug;

use tierq_core::observability::split_span;

use crate::error::Result;
use crate::file::InputFile;
use crate::job::{group_by_location, location_label, Job, JobGroup, JobNamer};
use crate::mask::Mask;
use crate::params::EventBasedParams;
use crate::JobSplitter;

/// Splits every file into windows of `events_per_job` events.
#[derive(Debug, Clone, Copy)]
pub struct EventSplitter {
    params: EventBasedParams,
}

impl EventSplitter {
    /// Creates a splitter.
    #[must_use]
    pub const fn new(params: EventBasedParams) -> Self {
        Self { params }
    }
}

impl JobSplitter for EventSplitter {
    fn algorithm(&self) -> &'static str {
        "EventBased"
    }

    fn split(&self, files: &[InputFile], namer: &mut JobNamer) -> Result<Vec<JobGroup>> {
        let per_job = self.params.events_per_job.get();
        let mut groups = Vec::new();

        for (locations, members) in group_by_location(files) {
            let span = split_span(self.algorithm(), &location_label(&locations));
            let _guard = span.enter();

            let mut group = JobGroup::new(locations);
            for file in &members {
                let mut first_event = 0;
                while first_event < file.events {
                    let mut job = Job::new(namer.next_name());
                    job.add_file(&file.lfn);
                    job.mask = Mask::events(first_event, per_job);
                    group.add_job(job)?;
                    first_event = first_event.saturating_add(per_job);
                }
            }
            debug!(files = members.len(), jobs = group.len(), "split location group");
            if !group.is_empty() {
                groups.push(group);
            }
        }
        Ok(groups)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunks_each_file() {
        let files = vec![
            InputFile::new("a", 250).with_location("se"),
            InputFile::new("b", 100).with_location("se"),
        ];
        let groups = EventSplitter::new(EventBasedParams::new(100).unwrap())
            .split(&files, &mut JobNamer::new("ev"))
            .unwrap();
        let jobs = groups[0].jobs();
        assert_eq!(jobs.len(), 4);

        let windows: Vec<_> = jobs
            .iter()
            .map(|j| (j.input_files[0].as_str(), j.mask.first_event(), j.mask.max_events()))
            .collect();
        assert_eq!(
            windows,
            vec![
                ("a", Some(0), Some(100)),
                ("a", Some(100), Some(100)),
                ("a", Some(200), Some(100)),
                ("b", Some(0), Some(100)),
            ]
        );
    }

    #[test]
    fn empty_files_produce_no_jobs() {
        let files = vec![InputFile::new("a", 0).with_location("se")];
        let groups = EventSplitter::new(EventBasedParams::new(10).unwrap())
            .split(&files, &mut JobNamer::new("ev"))
            .unwrap();
        assert!(groups.is_empty());
    }
}

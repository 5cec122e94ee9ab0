//! Jobs and job groups produced by the splitters.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tierq_core::JobId;

use crate::error::{Error, Result};
use crate::file::InputFile;
use crate::mask::Mask;

/// A unit of execution: input files plus the mask restricting them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    /// Unique job id.
    pub id: JobId,
    /// Human-readable name, `<base>-<n>`.
    pub name: String,
    /// Logical names of the input files, in the order they were added.
    pub input_files: Vec<String>,
    /// Lumi or event restriction.
    pub mask: Mask,
}

impl Job {
    /// Creates an empty job.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: JobId::generate(),
            name: name.into(),
            input_files: Vec::new(),
            mask: Mask::new(),
        }
    }

    /// Adds an input file unless it is already listed.
    pub fn add_file(&mut self, lfn: &str) {
        if !self.input_files.iter().any(|f| f == lfn) {
            self.input_files.push(lfn.to_string());
        }
    }
}

/// Jobs sharing one set of input locations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobGroup {
    locations: BTreeSet<String>,
    jobs: Vec<Job>,
}

impl JobGroup {
    /// Creates an empty group for `locations`.
    #[must_use]
    pub fn new(locations: BTreeSet<String>) -> Self {
        Self {
            locations,
            jobs: Vec::new(),
        }
    }

    /// Appends a job.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvariantViolation`] if a job with the same id is
    /// already in the group.
    pub fn add_job(&mut self, job: Job) -> Result<()> {
        if self.jobs.iter().any(|existing| existing.id == job.id) {
            return Err(Error::invariant(format!(
                "duplicate job id in group: {}",
                job.id
            )));
        }
        self.jobs.push(job);
        Ok(())
    }

    /// Locations shared by every file of the group.
    #[must_use]
    pub const fn locations(&self) -> &BTreeSet<String> {
        &self.locations
    }

    /// Jobs in creation order.
    #[must_use]
    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    /// Number of jobs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// Returns true if the group holds no jobs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Consumes the group, returning its jobs.
    #[must_use]
    pub fn into_jobs(self) -> Vec<Job> {
        self.jobs
    }
}

/// Hands out sequential job names, `<base>-1`, `<base>-2`, ...
#[derive(Debug, Clone)]
pub struct JobNamer {
    base: String,
    issued: u64,
}

impl JobNamer {
    /// Creates a namer for `base`.
    #[must_use]
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            issued: 0,
        }
    }

    /// Returns the next name.
    pub fn next_name(&mut self) -> String {
        self.issued += 1;
        format!("{}-{}", self.base, self.issued)
    }

    /// Number of names issued so far.
    #[must_use]
    pub const fn issued(&self) -> u64 {
        self.issued
    }
}

/// Groups files by location set, groups ordered by first appearance.
#[must_use]
pub fn group_by_location(files: &[InputFile]) -> Vec<(BTreeSet<String>, Vec<&InputFile>)> {
    let mut groups: Vec<(BTreeSet<String>, Vec<&InputFile>)> = Vec::new();
    for file in files {
        match groups.iter_mut().find(|(locs, _)| *locs == file.locations) {
            Some((_, members)) => members.push(file),
            None => groups.push((file.locations.clone(), vec![file])),
        }
    }
    groups
}

/// Renders a location set for logging.
pub(crate) fn location_label(locations: &BTreeSet<String>) -> String {
    locations.iter().cloned().collect::<Vec<_>>().join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_job_rejects_duplicate_ids() {
        let mut group = JobGroup::new(BTreeSet::new());
        let job = Job::new("a-1");
        group.add_job(job.clone()).unwrap();
        let err = group.add_job(job).unwrap_err();
        assert!(matches!(err, Error::InvariantViolation { .. }));
        assert_eq!(group.len(), 1);
    }

    #[test]
    fn add_file_is_idempotent() {
        let mut job = Job::new("a-1");
        job.add_file("/store/a.root");
        job.add_file("/store/b.root");
        job.add_file("/store/a.root");
        assert_eq!(job.input_files, vec!["/store/a.root", "/store/b.root"]);
    }

    #[test]
    fn namer_counts_from_one() {
        let mut namer = JobNamer::new("base");
        assert_eq!(namer.next_name(), "base-1");
        assert_eq!(namer.next_name(), "base-2");
        assert_eq!(namer.issued(), 2);
    }

    #[test]
    fn groups_follow_first_appearance() {
        let files = vec![
            InputFile::new("a", 1).with_location("se2"),
            InputFile::new("b", 1).with_location("se1"),
            InputFile::new("c", 1).with_location("se2"),
        ];
        let groups = group_by_location(&files);
        assert_eq!(groups.len(), 2);
        assert!(groups[0].0.contains("se2"));
        assert_eq!(groups[0].1.len(), 2);
        assert_eq!(groups[1].1[0].lfn, "b");
    }
}

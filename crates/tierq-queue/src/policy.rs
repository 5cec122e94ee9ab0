//! Workload documents and start policies.
//!
//! A start policy decomposes a workload into queue elements: one per input
//! block (`Block`) or one per input dataset (`Dataset`). The job estimate of
//! an element is `max(1, ceil(metric / slice_size))`, where the metric is the
//! file, event or lumi count of the data it covers.

use std::collections::BTreeSet;
use std::num::NonZeroU64;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use tierq_split::mask::Mask;
use tierq_split::params::SplitAlgorithm;

use crate::config::DEFAULT_PRIORITY;
use crate::element::{ElementData, WorkQueueElement};
use crate::error::{Error, Result};

/// One block of an input dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockInfo {
    /// Block name, `<dataset>#<uuid>`.
    pub name: String,
    /// Number of files.
    #[serde(default)]
    pub files: u64,
    /// Number of events.
    #[serde(default)]
    pub events: u64,
    /// Number of lumi sections.
    #[serde(default)]
    pub lumis: u64,
    /// Sites hosting a replica.
    #[serde(default)]
    pub locations: BTreeSet<String>,
}

/// Input dataset of a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputDataset {
    /// Dataset path, `/<primary>/<processed>/<tier>`.
    pub name: String,
    /// Blocks of the dataset.
    #[serde(default)]
    pub blocks: Vec<BlockInfo>,
}

/// Splitting algorithm name and raw keyword parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplittingSpec {
    /// Algorithm name, e.g. `LumiBased`.
    pub algorithm: String,
    /// Keyword parameters.
    #[serde(default)]
    pub params: Map<String, Value>,
}

impl SplittingSpec {
    /// Parses into a validated [`SplitAlgorithm`].
    ///
    /// # Errors
    ///
    /// Returns the splitting layer's validation error.
    pub fn parse(&self) -> Result<SplitAlgorithm> {
        Ok(SplitAlgorithm::from_kwargs(&self.algorithm, &self.params)?)
    }
}

/// A top-level task of a workload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Task name.
    pub name: String,
    /// Data the task reads.
    pub input_dataset: InputDataset,
    /// How the task's input is split into jobs.
    pub splitting: SplittingSpec,
    /// Sites the task may run at.
    #[serde(default)]
    pub site_whitelist: Vec<String>,
    /// Sites the task must not run at.
    #[serde(default)]
    pub site_blacklist: Vec<String>,
    /// Restriction applied to every element of the task.
    #[serde(default)]
    pub lumi_mask: Option<Mask>,
}

/// What a slice size counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SliceType {
    /// Files.
    #[default]
    NumFiles,
    /// Events.
    NumEvents,
    /// Lumi sections.
    NumLumis,
}

impl SliceType {
    fn metric(self, block: &BlockInfo) -> u64 {
        match self {
            Self::NumFiles => block.files,
            Self::NumEvents => block.events,
            Self::NumLumis => block.lumis,
        }
    }
}

const DEFAULT_SLICE_SIZE: NonZeroU64 = match NonZeroU64::new(10) {
    Some(n) => n,
    None => unreachable!(),
};

/// How a workload is decomposed into elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy")]
pub enum StartPolicy {
    /// One element per block.
    Block {
        /// Unit of the slice size.
        slice_type: SliceType,
        /// Amount of work per job.
        slice_size: NonZeroU64,
    },
    /// One element per dataset.
    Dataset {
        /// Unit of the slice size.
        slice_type: SliceType,
        /// Amount of work per job.
        slice_size: NonZeroU64,
    },
}

impl Default for StartPolicy {
    fn default() -> Self {
        Self::Block {
            slice_type: SliceType::NumFiles,
            slice_size: DEFAULT_SLICE_SIZE,
        }
    }
}

/// A workload document as submitted to the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkloadSpec {
    /// Workload name.
    pub name: String,
    /// Initial priority of its elements; the queue default when unset.
    #[serde(default)]
    pub priority: Option<i64>,
    /// Top-level tasks.
    pub tasks: Vec<TaskSpec>,
    /// Decomposition policy.
    #[serde(default)]
    pub start_policy: StartPolicy,
}

fn estimate_jobs(metric: u64, slice_size: NonZeroU64) -> u32 {
    let jobs = metric.div_ceil(slice_size.get()).max(1);
    u32::try_from(jobs).unwrap_or(u32::MAX)
}

impl StartPolicy {
    /// Decomposes `workload` into `Available` elements for `request_name`.
    ///
    /// Splitting parameters of every task are validated before any element
    /// is built.
    ///
    /// # Errors
    ///
    /// Returns a validation error for malformed splitting parameters or a
    /// workload that yields no work.
    pub fn split(
        &self,
        workload: &WorkloadSpec,
        request_name: &str,
        team: &str,
    ) -> Result<Vec<WorkQueueElement>> {
        if request_name.trim().is_empty() {
            return Err(Error::validation("request name must not be empty"));
        }
        let parsed = workload
            .tasks
            .iter()
            .map(|task| Ok((task, task.splitting.parse()?)))
            .collect::<Result<Vec<_>>>()?;

        let priority = workload.priority.unwrap_or(DEFAULT_PRIORITY);
        let mut elements = Vec::new();
        for (task, splitting) in parsed {
            let build = |data: ElementData, jobs: u32, locations: BTreeSet<String>| {
                let mut element =
                    WorkQueueElement::new(request_name, &task.name, data, splitting.clone())
                        .with_priority(priority)
                        .with_jobs(jobs)
                        .with_team(team)
                        .with_sites(task.site_whitelist.clone(), task.site_blacklist.clone())
                        .with_data_locations(locations);
                if let Some(mask) = &task.lumi_mask {
                    element = element.with_mask(mask.clone());
                }
                element
            };

            match *self {
                Self::Block {
                    slice_type,
                    slice_size,
                } => {
                    for block in &task.input_dataset.blocks {
                        let jobs = estimate_jobs(slice_type.metric(block), slice_size);
                        elements.push(build(
                            ElementData::Block(block.name.clone()),
                            jobs,
                            block.locations.clone(),
                        ));
                    }
                }
                Self::Dataset {
                    slice_type,
                    slice_size,
                } => {
                    let blocks = &task.input_dataset.blocks;
                    let metric = blocks.iter().map(|b| slice_type.metric(b)).sum();
                    let locations = blocks
                        .iter()
                        .map(|b| b.locations.clone())
                        .reduce(|acc, locs| acc.intersection(&locs).cloned().collect())
                        .unwrap_or_default();
                    elements.push(build(
                        ElementData::Dataset(task.input_dataset.name.clone()),
                        estimate_jobs(metric, slice_size),
                        locations,
                    ));
                }
            }
            debug!(task = %task.name, elements = elements.len(), "decomposed task");
        }

        if elements.is_empty() {
            return Err(Error::validation(format!(
                "workload {} produced no work",
                workload.name
            )));
        }
        Ok(elements)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn block(name: &str, files: u64) -> BlockInfo {
        BlockInfo {
            name: name.into(),
            files,
            events: files * 1000,
            lumis: files * 10,
            locations: BTreeSet::from(["T1_US_FNAL".to_string()]),
        }
    }

    fn workload(policy: StartPolicy) -> WorkloadSpec {
        WorkloadSpec {
            name: "Tier1ReReco".into(),
            priority: Some(8000),
            tasks: vec![TaskSpec {
                name: "DataProcessing".into(),
                input_dataset: InputDataset {
                    name: "/Cosmics/CRAFT09-PromptReco-v1/RECO".into(),
                    blocks: vec![
                        block("/Cosmics/CRAFT09-PromptReco-v1/RECO#1", 2),
                        block("/Cosmics/CRAFT09-PromptReco-v1/RECO#2", 5),
                    ],
                },
                splitting: SplittingSpec {
                    algorithm: "LumiBased".into(),
                    params: json!({"lumis_per_job": 8}).as_object().cloned().unwrap(),
                },
                site_whitelist: vec![],
                site_blacklist: vec![],
                lumi_mask: None,
            }],
            start_policy: policy,
        }
    }

    #[test]
    fn block_policy_one_element_per_block() {
        let wl = workload(StartPolicy::default());
        let elements = wl.start_policy.split(&wl, "Tier1ReReco", "cmsdataops").unwrap();
        assert_eq!(elements.len(), 2);
        let mut seen = BTreeSet::new();
        for e in &elements {
            assert_eq!(e.jobs, 1);
            assert_eq!(e.priority, 8000);
            assert_eq!(e.team, "cmsdataops");
            let ElementData::Block(name) = e.data() else {
                panic!("expected block data");
            };
            assert!(name.starts_with("/Cosmics/CRAFT09-PromptReco-v1/RECO#"));
            assert!(seen.insert(name.clone()));
        }
    }

    #[test]
    fn job_estimate_rounds_up() {
        let policy = StartPolicy::Block {
            slice_type: SliceType::NumFiles,
            slice_size: NonZeroU64::new(2).unwrap(),
        };
        let wl = workload(policy);
        let jobs: Vec<_> = policy
            .split(&wl, "wf", "team")
            .unwrap()
            .iter()
            .map(|e| e.jobs)
            .collect();
        assert_eq!(jobs, vec![1, 3]);
    }

    #[test]
    fn dataset_policy_single_element() {
        let policy = StartPolicy::Dataset {
            slice_type: SliceType::NumLumis,
            slice_size: NonZeroU64::new(20).unwrap(),
        };
        let wl = workload(policy);
        let elements = policy.split(&wl, "wf", "team").unwrap();
        assert_eq!(elements.len(), 1);
        assert_eq!(elements[0].jobs, 4);
        assert!(elements[0].data_locations.contains("T1_US_FNAL"));
    }

    #[test]
    fn malformed_splitting_rejected() {
        let mut wl = workload(StartPolicy::default());
        wl.tasks[0].splitting.params = json!({"lumis_per_job": 0}).as_object().cloned().unwrap();
        let err = wl.start_policy.split(&wl, "wf", "team").unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn ids_are_stable_across_decompositions() {
        let wl = workload(StartPolicy::default());
        let a = wl.start_policy.split(&wl, "wf", "team").unwrap();
        let b = wl.start_policy.split(&wl, "wf", "team").unwrap();
        let ids_a: Vec<_> = a.iter().map(|e| e.id.clone()).collect();
        let ids_b: Vec<_> = b.iter().map(|e| e.id.clone()).collect();
        assert_eq!(ids_a, ids_b);
    }

    #[test]
    fn empty_workload_rejected() {
        let mut wl = workload(StartPolicy::default());
        wl.tasks[0].input_dataset.blocks.clear();
        assert!(wl.start_policy.split(&wl, "wf", "team").unwrap_err().is_validation());
    }

    #[test]
    fn policy_defaults_when_absent() {
        let wl: WorkloadSpec = serde_json::from_value(json!({
            "name": "wf",
            "tasks": [],
        }))
        .unwrap();
        assert_eq!(wl.start_policy, StartPolicy::default());
        assert_eq!(wl.priority, None);
    }
}

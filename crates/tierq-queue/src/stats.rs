//! Read-only summaries over element snapshots.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::element::{ElementStatus, WorkQueueElement};
use crate::status::{aggregate, WorkflowStatus};

/// Element count and summed job estimate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountAndJobs {
    /// Number of elements.
    pub count: u64,
    /// Sum of their job estimates.
    pub jobs: u64,
}

impl CountAndJobs {
    fn add(&mut self, element: &WorkQueueElement) {
        self.count += 1;
        self.jobs += u64::from(element.jobs);
    }
}

/// Summed job estimates per workflow.
#[must_use]
pub fn top_level_jobs_by_request(elements: &[WorkQueueElement]) -> BTreeMap<String, u64> {
    let mut out = BTreeMap::new();
    for e in elements {
        *out.entry(e.request_name.clone()).or_insert(0) += u64::from(e.jobs);
    }
    out
}

/// Element counts and jobs per workflow and status.
#[must_use]
pub fn elements_count_and_jobs_by_workflow(
    elements: &[WorkQueueElement],
) -> BTreeMap<String, BTreeMap<ElementStatus, CountAndJobs>> {
    let mut out: BTreeMap<String, BTreeMap<ElementStatus, CountAndJobs>> = BTreeMap::new();
    for e in elements {
        out.entry(e.request_name.clone())
            .or_default()
            .entry(e.status)
            .or_default()
            .add(e);
    }
    out
}

/// Jobs per status and priority.
#[must_use]
pub fn jobs_by_status_and_priority(
    elements: &[WorkQueueElement],
) -> BTreeMap<ElementStatus, BTreeMap<i64, u64>> {
    let mut out: BTreeMap<ElementStatus, BTreeMap<i64, u64>> = BTreeMap::new();
    for e in elements {
        *out.entry(e.status)
            .or_default()
            .entry(e.priority)
            .or_insert(0) += u64::from(e.jobs);
    }
    out
}

/// Jobs per claiming child queue and status. Unclaimed elements are skipped.
#[must_use]
pub fn child_queues_and_status(
    elements: &[WorkQueueElement],
) -> BTreeMap<String, BTreeMap<ElementStatus, u64>> {
    let mut out: BTreeMap<String, BTreeMap<ElementStatus, u64>> = BTreeMap::new();
    for e in elements {
        let Some(child) = &e.child_queue else {
            continue;
        };
        *out.entry(child.clone())
            .or_default()
            .entry(e.status)
            .or_insert(0) += u64::from(e.jobs);
    }
    out
}

/// Jobs per claiming child queue and priority. Unclaimed elements are skipped.
#[must_use]
pub fn child_queues_and_priority(
    elements: &[WorkQueueElement],
) -> BTreeMap<String, BTreeMap<i64, u64>> {
    let mut out: BTreeMap<String, BTreeMap<i64, u64>> = BTreeMap::new();
    for e in elements {
        let Some(child) = &e.child_queue else {
            continue;
        };
        *out.entry(child.clone())
            .or_default()
            .entry(e.priority)
            .or_insert(0) += u64::from(e.jobs);
    }
    out
}

/// Aggregated status of one workflow.
#[must_use]
pub fn workflow_status(elements: &[WorkQueueElement], request_name: &str) -> Option<WorkflowStatus> {
    aggregate(
        elements
            .iter()
            .filter(|e| e.request_name == request_name)
            .map(|e| e.status),
    )
}

/// Aggregated status of every workflow present.
#[must_use]
pub fn workflow_statuses(
    elements: &[WorkQueueElement],
) -> BTreeMap<String, Option<WorkflowStatus>> {
    let mut by_request: BTreeMap<String, Vec<ElementStatus>> = BTreeMap::new();
    for e in elements {
        by_request
            .entry(e.request_name.clone())
            .or_default()
            .push(e.status);
    }
    by_request
        .into_iter()
        .map(|(request, statuses)| (request, aggregate(statuses)))
        .collect()
}

/// Workflows whose aggregated status is `completed`.
#[must_use]
pub fn completed_workflows(elements: &[WorkQueueElement]) -> BTreeSet<String> {
    workflow_statuses(elements)
        .into_iter()
        .filter(|(_, status)| *status == Some(WorkflowStatus::Completed))
        .map(|(request, _)| request)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::ElementData;
    use tierq_split::params::{EventBasedParams, SplitAlgorithm};

    fn element(
        request: &str,
        block: &str,
        status: ElementStatus,
        priority: i64,
        jobs: u32,
        child: Option<&str>,
    ) -> WorkQueueElement {
        let mut e = WorkQueueElement::new(
            request,
            "task",
            ElementData::Block(block.into()),
            SplitAlgorithm::EventBased(EventBasedParams::new(10).unwrap()),
        )
        .with_priority(priority)
        .with_jobs(jobs);
        e.status = status;
        e.child_queue = child.map(ToString::to_string);
        e
    }

    fn snapshot() -> Vec<WorkQueueElement> {
        vec![
            element("wf1", "b1", ElementStatus::Acquired, 100, 3, Some("local-a")),
            element("wf1", "b2", ElementStatus::Available, 100, 2, None),
            element("wf2", "b1", ElementStatus::Done, 50, 4, Some("local-b")),
            element("wf2", "b2", ElementStatus::Canceled, 50, 1, Some("local-a")),
        ]
    }

    #[test]
    fn jobs_by_request() {
        let jobs = top_level_jobs_by_request(&snapshot());
        assert_eq!(jobs["wf1"], 5);
        assert_eq!(jobs["wf2"], 5);
    }

    #[test]
    fn counts_by_workflow_and_status() {
        let counts = elements_count_and_jobs_by_workflow(&snapshot());
        assert_eq!(
            counts["wf1"][&ElementStatus::Acquired],
            CountAndJobs { count: 1, jobs: 3 }
        );
        assert_eq!(counts["wf2"].len(), 2);
    }

    #[test]
    fn jobs_by_status_priority() {
        let table = jobs_by_status_and_priority(&snapshot());
        assert_eq!(table[&ElementStatus::Available][&100], 2);
        assert_eq!(table[&ElementStatus::Done][&50], 4);
    }

    #[test]
    fn child_queue_tables_skip_unclaimed() {
        let by_status = child_queues_and_status(&snapshot());
        assert_eq!(by_status.len(), 2);
        assert_eq!(by_status["local-a"][&ElementStatus::Acquired], 3);
        assert_eq!(by_status["local-a"][&ElementStatus::Canceled], 1);

        let by_priority = child_queues_and_priority(&snapshot());
        assert_eq!(by_priority["local-a"][&100], 3);
        assert_eq!(by_priority["local-a"][&50], 1);
        assert_eq!(by_priority["local-b"][&50], 4);
    }

    #[test]
    fn workflow_rollups() {
        let elements = snapshot();
        assert_eq!(
            workflow_status(&elements, "wf1"),
            Some(WorkflowStatus::RunningOpen)
        );
        assert_eq!(workflow_status(&elements, "missing"), None);
        let statuses = workflow_statuses(&elements);
        assert_eq!(statuses["wf2"], Some(WorkflowStatus::Completed));
        assert_eq!(
            completed_workflows(&elements),
            BTreeSet::from(["wf2".to_string()])
        );
    }
}

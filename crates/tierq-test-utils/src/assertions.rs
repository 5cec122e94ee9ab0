//! Custom assertion helpers for integration tests.

use std::collections::BTreeSet;

use tierq_queue::element::{ElementStatus, WorkQueueElement};
use tierq_queue::queue::WorkQueue;
use tierq_queue::status::WorkflowStatus;
use tierq_split::file::InputFile;
use tierq_split::job::JobGroup;
use tierq_split::mask::{Lumi, Run};

use crate::storage::{StoreOp, TracingElementStore};

/// Asserts that job groups cover every lumi of `files` exactly once.
///
/// # Panics
///
/// Panics if a lumi is assigned to two jobs or left out.
pub fn assert_lumi_partition(groups: &[JobGroup], files: &[InputFile]) {
    let mut seen: BTreeSet<(Run, Lumi)> = BTreeSet::new();
    for job in groups.iter().flat_map(JobGroup::jobs) {
        for lumi in job.mask.iter_lumis() {
            assert!(
                seen.insert(lumi),
                "lumi {lumi:?} assigned to more than one job (second: {})",
                job.name
            );
        }
    }
    let expected: BTreeSet<(Run, Lumi)> = files.iter().flat_map(InputFile::lumis).collect();
    assert_eq!(seen, expected, "jobs do not cover exactly the input lumis");
}

/// Asserts that every element has the given status.
///
/// # Panics
///
/// Panics on the first element with a different status.
pub fn assert_all_status(elements: &[WorkQueueElement], expected: ElementStatus) {
    for element in elements {
        assert_eq!(
            element.status, expected,
            "element {} is {} (expected {expected})",
            element.id, element.status
        );
    }
}

/// Asserts the aggregated status of a workflow.
///
/// # Panics
///
/// Panics if the status differs or cannot be read.
pub async fn assert_workflow_status(
    queue: &WorkQueue,
    request_name: &str,
    expected: Option<WorkflowStatus>,
) {
    let actual = queue
        .workflow_status(request_name)
        .await
        .expect("workflow status");
    assert_eq!(
        actual,
        expected,
        "workflow {request_name} on {} has status {actual:?}",
        queue.name()
    );
}

/// Asserts that no CAS was attempted on `store`.
///
/// # Panics
///
/// Panics listing the recorded CAS operations.
pub fn assert_no_cas(store: &TracingElementStore) {
    let cas: Vec<StoreOp> = store.cas_operations();
    assert!(cas.is_empty(), "unexpected CAS operations: {cas:?}");
}

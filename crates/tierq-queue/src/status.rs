//! Workflow status derived from element statuses.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::element::ElementStatus;

/// Externally visible status of a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkflowStatus {
    /// Work queued, none of it committed to a site yet.
    Acquired,
    /// Some work is still being committed to sites.
    RunningOpen,
    /// All work is committed; some is still running.
    RunningClosed,
    /// Everything finished or was cancelled.
    Completed,
    /// At least one element failed.
    Failed,
}

impl WorkflowStatus {
    /// Returns the external label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Acquired => "acquired",
            Self::RunningOpen => "running-open",
            Self::RunningClosed => "running-closed",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rolls the statuses of one workflow's elements into a workflow status.
///
/// Only the set of distinct statuses matters. Returns `None` for an empty
/// input, while cancellation is pending, and for combinations with no
/// defined outcome.
///
/// ```rust
/// use tierq_queue::element::ElementStatus::*;
/// use tierq_queue::status::{aggregate, WorkflowStatus};
///
/// assert_eq!(aggregate([Running, Done]), Some(WorkflowStatus::RunningClosed));
/// assert_eq!(aggregate([Done, CancelRequested]), None);
/// ```
#[must_use]
pub fn aggregate<I>(statuses: I) -> Option<WorkflowStatus>
where
    I: IntoIterator<Item = ElementStatus>,
{
    use ElementStatus as S;

    let set: BTreeSet<ElementStatus> = statuses.into_iter().collect();
    if set.is_empty() {
        return None;
    }
    let only = |allowed: &[ElementStatus]| set.iter().all(|s| allowed.contains(s));

    if set.contains(&S::Failed) {
        Some(WorkflowStatus::Failed)
    } else if set.contains(&S::Acquired) {
        Some(WorkflowStatus::RunningOpen)
    } else if set.contains(&S::Running) {
        Some(WorkflowStatus::RunningClosed)
    } else if set.contains(&S::CancelRequested) {
        None
    } else if only(&[S::Done, S::Canceled]) {
        Some(WorkflowStatus::Completed)
    } else if only(&[S::Available, S::Negotiating]) {
        Some(WorkflowStatus::Acquired)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ElementStatus::*;

    #[test]
    fn acquired_when_nothing_committed() {
        assert_eq!(aggregate([Available]), Some(WorkflowStatus::Acquired));
        assert_eq!(aggregate([Negotiating]), Some(WorkflowStatus::Acquired));
        assert_eq!(aggregate([Available, Negotiating]), Some(WorkflowStatus::Acquired));
    }

    #[test]
    fn running_open_whenever_acquired_present() {
        let cases: &[&[ElementStatus]] = &[
            &[Acquired],
            &[Available, Negotiating, Acquired],
            &[Available, Negotiating, Acquired, Running],
            &[Available, Negotiating, Acquired, Running, Done],
            &[Available, Negotiating, Acquired, Running, Done, CancelRequested],
            &[Available, Negotiating, Acquired, Running, Done, CancelRequested, Canceled],
            &[Negotiating, Acquired],
            &[Negotiating, Acquired, Running, Done, CancelRequested, Canceled],
            &[Acquired, Running],
            &[Acquired, Running, Done, CancelRequested, Canceled],
        ];
        for case in cases {
            assert_eq!(
                aggregate(case.iter().copied()),
                Some(WorkflowStatus::RunningOpen),
                "{case:?}"
            );
        }
    }

    #[test]
    fn running_closed_without_acquired() {
        let cases: &[&[ElementStatus]] = &[
            &[Running],
            &[Running, Done],
            &[Running, Done, CancelRequested],
            &[Running, Done, CancelRequested, Canceled],
            &[Running, Done, Canceled],
        ];
        for case in cases {
            assert_eq!(
                aggregate(case.iter().copied()),
                Some(WorkflowStatus::RunningClosed),
                "{case:?}"
            );
        }
    }

    #[test]
    fn completed_and_failed() {
        assert_eq!(aggregate([Done]), Some(WorkflowStatus::Completed));
        assert_eq!(aggregate([Canceled]), Some(WorkflowStatus::Completed));
        assert_eq!(aggregate([Done, Canceled]), Some(WorkflowStatus::Completed));
        assert_eq!(aggregate([Failed]), Some(WorkflowStatus::Failed));
        assert_eq!(aggregate([Failed, Acquired, Done]), Some(WorkflowStatus::Failed));
    }

    #[test]
    fn undecided_cases() {
        assert_eq!(aggregate([Done, CancelRequested]), None);
        assert_eq!(aggregate([CancelRequested]), None);
        assert_eq!(aggregate([CancelRequested, Available]), None);
        assert_eq!(aggregate([Available, Done]), None);
        assert_eq!(aggregate(std::iter::empty()), None);
    }

    #[test]
    fn multiplicity_and_order_do_not_matter() {
        assert_eq!(
            aggregate([Done, Running, Done, Running]),
            aggregate([Running, Done])
        );
    }

    #[test]
    fn labels_match_serialized_form() {
        for status in [
            WorkflowStatus::Acquired,
            WorkflowStatus::RunningOpen,
            WorkflowStatus::RunningClosed,
            WorkflowStatus::Completed,
            WorkflowStatus::Failed,
        ] {
            let json = serde_json::to_value(status).unwrap();
            assert_eq!(json, serde_json::Value::String(status.as_str().into()));
        }
    }
}

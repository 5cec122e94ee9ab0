//! Inbox documents: inbound changes waiting to be merged into a queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tierq_core::{ElementId, InboxEntryId};

use crate::element::{ElementStatus, Progress, WorkQueueElement};

/// A change posted to a queue's inbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboxPayload {
    /// A parent element replicated down to this queue.
    NewElement {
        /// The copy to insert.
        element: Box<WorkQueueElement>,
    },
    /// Status and progress reported up by a child queue.
    StatusUpdate {
        /// Element the update applies to.
        element_id: ElementId,
        /// Status reached by the child's copy.
        status: ElementStatus,
        /// Progress reported with the status.
        progress: Progress,
        /// Queue that posted the update.
        from_queue: String,
    },
    /// Priority propagated down from the parent.
    PriorityUpdate {
        /// Element the update applies to.
        element_id: ElementId,
        /// New parent priority.
        priority: i64,
    },
    /// Cancellation requested by the parent.
    CancelRequest {
        /// Element to cancel.
        element_id: ElementId,
    },
}

impl InboxPayload {
    /// Short label for logs and metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::NewElement { .. } => "new_element",
            Self::StatusUpdate { .. } => "status_update",
            Self::PriorityUpdate { .. } => "priority_update",
            Self::CancelRequest { .. } => "cancel_request",
        }
    }

    /// Element the payload refers to.
    #[must_use]
    pub fn element_id(&self) -> &ElementId {
        match self {
            Self::NewElement { element } => &element.id,
            Self::StatusUpdate { element_id, .. }
            | Self::PriorityUpdate { element_id, .. }
            | Self::CancelRequest { element_id } => element_id,
        }
    }
}

/// An inbox document.
///
/// Entries are never removed; merging only marks them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboxEntry {
    /// Entry id.
    pub id: InboxEntryId,
    /// Posting order within the inbox, assigned by the store.
    pub sequence: u64,
    /// The change.
    pub payload: InboxPayload,
    /// When the entry was posted.
    pub posted_at: DateTime<Utc>,
    /// When the entry was merged, if it has been.
    pub merged_at: Option<DateTime<Utc>>,
}

impl InboxEntry {
    /// Returns true once the entry has been merged.
    #[must_use]
    pub const fn is_merged(&self) -> bool {
        self.merged_at.is_some()
    }
}

/// Outcome of one `process_inbound_work` pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeSummary {
    /// Entries merged in this pass.
    pub merged: usize,
    /// New elements inserted.
    pub inserted: usize,
    /// Elements whose status advanced.
    pub status_changes: usize,
    /// Elements whose priority changed.
    pub priority_changes: usize,
    /// Elements moved to `CancelRequested`.
    pub cancel_requests: usize,
    /// `CancelRequested` elements finalised to `Canceled`.
    pub canceled: usize,
    /// Entries that referred to unknown elements or stale states.
    pub ignored: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_serializes_with_type_tag() {
        let id = ElementId::derive(&["wf", "t", "b"]);
        let payload = InboxPayload::PriorityUpdate {
            element_id: id.clone(),
            priority: 500,
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["type"], "priority_update");
        assert_eq!(json["priority"], 500);
        assert_eq!(payload.element_id(), &id);
        assert_eq!(payload.kind(), "priority_update");
    }
}

//! Pluggable storage for queue state.
//!
//! A queue owns two stores: an [`ElementStore`] holding its elements and
//! workload documents, and an [`InboxStore`] through which other queues post
//! changes to it. A child queue also holds its parent's stores and claims
//! parent elements through [`ElementStore::cas_status`].
//!
//! ## CAS Semantics
//!
//! `cas_status` is the only primitive used to claim an element. Two child
//! queues racing for the same parent element both attempt
//! `Available -> Negotiating`; exactly one sees [`CasResult::Success`].
//!
//! Every other read-modify-write goes through [`ElementStore::save_if`],
//! which only writes if the status read is still the stored one, so a
//! claim that commits in between is never overwritten.

pub mod memory;

use async_trait::async_trait;

use tierq_core::{ElementId, InboxEntryId};

use crate::element::{ElementStatus, TransitionReason, WorkQueueElement};
use crate::error::Result;
use crate::inbox::{InboxEntry, InboxPayload};
use crate::policy::WorkloadSpec;

/// Result of a compare-and-swap operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CasResult {
    /// Operation succeeded.
    Success,
    /// Element not found.
    NotFound,
    /// Status didn't match expected value.
    StateMismatch {
        /// The status that was found.
        actual: ElementStatus,
    },
}

impl CasResult {
    /// Returns true if the operation succeeded.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// Returns true if the element was not found.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }
}

/// Result of inserting an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertResult {
    /// The element was stored.
    Inserted,
    /// An element with the same id already exists; nothing was written.
    AlreadyExists,
}

/// A status change applied by [`ElementStore::cas_status`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    /// Status to move to.
    pub target: ElementStatus,
    /// Why the element moves.
    pub reason: TransitionReason,
    /// Child queue to record as the claimant, if any.
    pub child_queue: Option<String>,
}

impl StatusChange {
    /// Creates a status change without a claimant.
    #[must_use]
    pub const fn new(target: ElementStatus, reason: TransitionReason) -> Self {
        Self {
            target,
            reason,
            child_queue: None,
        }
    }

    /// Records `queue` as the claimant.
    #[must_use]
    pub fn claimed_by(mut self, queue: impl Into<String>) -> Self {
        self.child_queue = Some(queue.into());
        self
    }
}

/// Element query filter. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ElementFilter {
    /// Owning workflow.
    pub request_name: Option<String>,
    /// Accepted statuses.
    pub statuses: Vec<ElementStatus>,
    /// Accepted teams.
    pub teams: Vec<String>,
    /// Claiming child queue.
    pub child_queue: Option<String>,
}

impl ElementFilter {
    /// Matches every element.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Restricts to one workflow.
    #[must_use]
    pub fn for_request(mut self, request_name: impl Into<String>) -> Self {
        self.request_name = Some(request_name.into());
        self
    }

    /// Restricts to the given statuses.
    #[must_use]
    pub fn with_statuses(mut self, statuses: impl IntoIterator<Item = ElementStatus>) -> Self {
        self.statuses = statuses.into_iter().collect();
        self
    }

    /// Restricts to the given teams.
    #[must_use]
    pub fn for_teams(mut self, teams: impl IntoIterator<Item = String>) -> Self {
        self.teams = teams.into_iter().collect();
        self
    }

    /// Restricts to elements claimed by `queue`.
    #[must_use]
    pub fn claimed_by(mut self, queue: impl Into<String>) -> Self {
        self.child_queue = Some(queue.into());
        self
    }

    /// Returns true if `element` passes the filter.
    #[must_use]
    pub fn matches(&self, element: &WorkQueueElement) -> bool {
        self.request_name
            .as_ref()
            .is_none_or(|name| *name == element.request_name)
            && (self.statuses.is_empty() || self.statuses.contains(&element.status))
            && (self.teams.is_empty() || self.teams.contains(&element.team))
            && self
                .child_queue
                .as_ref()
                .is_none_or(|queue| element.child_queue.as_ref() == Some(queue))
    }
}

/// Storage for a queue's elements and workload documents.
///
/// All methods are `Send + Sync` so a store can be shared between a queue
/// and the child queues pulling from it.
#[async_trait]
pub trait ElementStore: Send + Sync {
    /// Gets an element by id.
    async fn get(&self, id: &ElementId) -> Result<Option<WorkQueueElement>>;

    /// Inserts an element unless one with the same id exists.
    async fn insert(&self, element: &WorkQueueElement) -> Result<InsertResult>;

    /// Replaces a stored element.
    ///
    /// Use [`Self::cas_status`] for status changes that may race.
    async fn save(&self, element: &WorkQueueElement) -> Result<()>;

    /// Replaces a stored element if its stored status is still `expected`.
    ///
    /// # Returns
    ///
    /// - `CasResult::Success` if the element was written
    /// - `CasResult::NotFound` if the element doesn't exist
    /// - `CasResult::StateMismatch` if the status changed since it was read
    async fn save_if(
        &self,
        element: &WorkQueueElement,
        expected: ElementStatus,
    ) -> Result<CasResult>;

    /// Atomically applies `change` if the element's status is `expected`.
    ///
    /// # Returns
    ///
    /// - `CasResult::Success` if the change was applied
    /// - `CasResult::NotFound` if the element doesn't exist
    /// - `CasResult::StateMismatch` if the status doesn't match `expected`
    async fn cas_status(
        &self,
        id: &ElementId,
        expected: ElementStatus,
        change: &StatusChange,
    ) -> Result<CasResult>;

    /// Returns matching elements ordered by creation time, then id.
    async fn query(&self, filter: &ElementFilter) -> Result<Vec<WorkQueueElement>>;

    /// Stores a workload document under its request name.
    async fn save_workload(&self, request_name: &str, workload: &WorkloadSpec) -> Result<()>;

    /// Gets a workload document.
    async fn get_workload(&self, request_name: &str) -> Result<Option<WorkloadSpec>>;
}

/// Storage for a queue's inbox.
#[async_trait]
pub trait InboxStore: Send + Sync {
    /// Appends an entry and assigns its sequence number.
    async fn post(&self, payload: InboxPayload) -> Result<InboxEntryId>;

    /// Returns up to `limit` unmerged entries in posting order.
    async fn pending(&self, limit: usize) -> Result<Vec<InboxEntry>>;

    /// Marks an entry merged.
    async fn mark_merged(&self, id: &InboxEntryId) -> Result<()>;

    /// Number of unmerged entries.
    async fn pending_count(&self) -> Result<usize>;

    /// Every entry, merged or not, in posting order.
    async fn entries(&self) -> Result<Vec<InboxEntry>>;
}

//! In-memory stores for testing and single-process deployments.
//!
//! State is not durable and not shared across process boundaries.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use chrono::Utc;

use tierq_core::{ElementId, InboxEntryId};

use super::{CasResult, ElementFilter, ElementStore, InboxStore, InsertResult, StatusChange};
use crate::element::{ElementStatus, WorkQueueElement};
use crate::error::{Error, Result};
use crate::inbox::{InboxEntry, InboxPayload};
use crate::policy::WorkloadSpec;

/// Converts a lock poison error to a storage error.
fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("lock poisoned")
}

/// In-memory element store.
///
/// ```rust
/// use tierq_queue::store::memory::InMemoryElementStore;
///
/// let store = InMemoryElementStore::new();
/// assert_eq!(store.element_count().unwrap(), 0);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryElementStore {
    elements: RwLock<HashMap<ElementId, WorkQueueElement>>,
    workloads: RwLock<HashMap<String, WorkloadSpec>>,
}

impl InMemoryElementStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of elements currently stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn element_count(&self) -> Result<usize> {
        let count = {
            let elements = self.elements.read().map_err(poison_err)?;
            elements.len()
        };
        Ok(count)
    }
}

#[async_trait]
impl ElementStore for InMemoryElementStore {
    async fn get(&self, id: &ElementId) -> Result<Option<WorkQueueElement>> {
        let result = {
            let elements = self.elements.read().map_err(poison_err)?;
            elements.get(id).cloned()
        };
        Ok(result)
    }

    async fn insert(&self, element: &WorkQueueElement) -> Result<InsertResult> {
        let mut elements = self.elements.write().map_err(poison_err)?;
        if elements.contains_key(&element.id) {
            return Ok(InsertResult::AlreadyExists);
        }
        elements.insert(element.id.clone(), element.clone());
        drop(elements);
        Ok(InsertResult::Inserted)
    }

    async fn save(&self, element: &WorkQueueElement) -> Result<()> {
        let mut elements = self.elements.write().map_err(poison_err)?;
        if !elements.contains_key(&element.id) {
            return Err(Error::ElementNotFound {
                id: element.id.clone(),
            });
        }
        elements.insert(element.id.clone(), element.clone());
        drop(elements);
        Ok(())
    }

    async fn save_if(
        &self,
        element: &WorkQueueElement,
        expected: ElementStatus,
    ) -> Result<CasResult> {
        let mut elements = self.elements.write().map_err(poison_err)?;
        let Some(stored) = elements.get_mut(&element.id) else {
            drop(elements);
            return Ok(CasResult::NotFound);
        };
        if stored.status != expected {
            let actual = stored.status;
            drop(elements);
            return Ok(CasResult::StateMismatch { actual });
        }
        *stored = element.clone();
        drop(elements);
        Ok(CasResult::Success)
    }

    async fn cas_status(
        &self,
        id: &ElementId,
        expected: ElementStatus,
        change: &StatusChange,
    ) -> Result<CasResult> {
        let mut elements = self.elements.write().map_err(poison_err)?;

        let Some(element) = elements.get_mut(id) else {
            drop(elements);
            return Ok(CasResult::NotFound);
        };

        if element.status != expected {
            let actual = element.status;
            drop(elements);
            return Ok(CasResult::StateMismatch { actual });
        }

        let transition = element.transition_to(change.target, change.reason);
        if transition.is_ok() {
            if let Some(queue) = &change.child_queue {
                element.child_queue = Some(queue.clone());
            }
        }
        drop(elements);
        transition.map(|()| CasResult::Success)
    }

    async fn query(&self, filter: &ElementFilter) -> Result<Vec<WorkQueueElement>> {
        let mut matched: Vec<WorkQueueElement> = {
            let elements = self.elements.read().map_err(poison_err)?;
            elements
                .values()
                .filter(|e| filter.matches(e))
                .cloned()
                .collect()
        };
        matched.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(matched)
    }

    async fn save_workload(&self, request_name: &str, workload: &WorkloadSpec) -> Result<()> {
        {
            let mut workloads = self.workloads.write().map_err(poison_err)?;
            workloads.insert(request_name.to_string(), workload.clone());
        }
        Ok(())
    }

    async fn get_workload(&self, request_name: &str) -> Result<Option<WorkloadSpec>> {
        let result = {
            let workloads = self.workloads.read().map_err(poison_err)?;
            workloads.get(request_name).cloned()
        };
        Ok(result)
    }
}

/// In-memory inbox.
///
/// Sequence numbers are the entry's position in the log.
#[derive(Debug, Default)]
pub struct InMemoryInbox {
    entries: RwLock<Vec<InboxEntry>>,
}

impl InMemoryInbox {
    /// Creates an empty inbox.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InboxStore for InMemoryInbox {
    async fn post(&self, payload: InboxPayload) -> Result<InboxEntryId> {
        let id = InboxEntryId::generate();
        let mut entries = self.entries.write().map_err(poison_err)?;
        let sequence = entries.len() as u64;
        entries.push(InboxEntry {
            id,
            sequence,
            payload,
            posted_at: Utc::now(),
            merged_at: None,
        });
        drop(entries);
        Ok(id)
    }

    async fn pending(&self, limit: usize) -> Result<Vec<InboxEntry>> {
        let result = {
            let entries = self.entries.read().map_err(poison_err)?;
            entries
                .iter()
                .filter(|e| !e.is_merged())
                .take(limit)
                .cloned()
                .collect()
        };
        Ok(result)
    }

    async fn mark_merged(&self, id: &InboxEntryId) -> Result<()> {
        let mut entries = self.entries.write().map_err(poison_err)?;
        let Some(entry) = entries.iter_mut().find(|e| e.id == *id) else {
            drop(entries);
            return Err(Error::storage(format!("inbox entry not found: {id}")));
        };
        entry.merged_at.get_or_insert_with(Utc::now);
        drop(entries);
        Ok(())
    }

    async fn pending_count(&self) -> Result<usize> {
        let count = {
            let entries = self.entries.read().map_err(poison_err)?;
            entries.iter().filter(|e| !e.is_merged()).count()
        };
        Ok(count)
    }

    async fn entries(&self) -> Result<Vec<InboxEntry>> {
        let result = {
            let entries = self.entries.read().map_err(poison_err)?;
            entries.clone()
        };
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::{ElementData, TransitionReason};
    use tierq_split::params::{EventBasedParams, SplitAlgorithm};

    fn element(block: &str) -> WorkQueueElement {
        WorkQueueElement::new(
            "wf",
            "task",
            ElementData::Block(block.into()),
            SplitAlgorithm::EventBased(EventBasedParams::new(100).unwrap()),
        )
    }

    #[tokio::test]
    async fn insert_is_idempotent_by_id() {
        let store = InMemoryElementStore::new();
        let e = element("/A/B/C#1");
        assert_eq!(store.insert(&e).await.unwrap(), InsertResult::Inserted);
        assert_eq!(store.insert(&e).await.unwrap(), InsertResult::AlreadyExists);
        assert_eq!(store.element_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn save_requires_existing_element() {
        let store = InMemoryElementStore::new();
        let e = element("/A/B/C#1");
        assert!(matches!(
            store.save(&e).await.unwrap_err(),
            Error::ElementNotFound { .. }
        ));
    }

    #[tokio::test]
    async fn cas_claims_once() {
        let store = InMemoryElementStore::new();
        let e = element("/A/B/C#1");
        store.insert(&e).await.unwrap();

        let claim = StatusChange::new(ElementStatus::Negotiating, TransitionReason::PulledForSite)
            .claimed_by("local-1");
        let first = store
            .cas_status(&e.id, ElementStatus::Available, &claim)
            .await
            .unwrap();
        assert!(first.is_success());

        let rival = StatusChange::new(ElementStatus::Negotiating, TransitionReason::PulledForSite)
            .claimed_by("local-2");
        let second = store
            .cas_status(&e.id, ElementStatus::Available, &rival)
            .await
            .unwrap();
        assert_eq!(
            second,
            CasResult::StateMismatch {
                actual: ElementStatus::Negotiating
            }
        );

        let stored = store.get(&e.id).await.unwrap().unwrap();
        assert_eq!(stored.child_queue.as_deref(), Some("local-1"));
    }

    #[tokio::test]
    async fn save_if_keeps_concurrent_claim() {
        let store = InMemoryElementStore::new();
        let e = element("/A/B/C#1");
        store.insert(&e).await.unwrap();

        let mut stale = store.get(&e.id).await.unwrap().unwrap();
        let claim = StatusChange::new(ElementStatus::Negotiating, TransitionReason::PulledForSite)
            .claimed_by("local-1");
        store
            .cas_status(&e.id, ElementStatus::Available, &claim)
            .await
            .unwrap();

        stale.priority = 1;
        assert_eq!(
            store.save_if(&stale, ElementStatus::Available).await.unwrap(),
            CasResult::StateMismatch {
                actual: ElementStatus::Negotiating
            }
        );
        let stored = store.get(&e.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ElementStatus::Negotiating);
        assert_eq!(stored.child_queue.as_deref(), Some("local-1"));
        assert_ne!(stored.priority, 1);

        let mut fresh = stored.clone();
        fresh.priority = 1;
        assert!(store
            .save_if(&fresh, ElementStatus::Negotiating)
            .await
            .unwrap()
            .is_success());
        assert!(store
            .save_if(&element("/A/B/C#9"), ElementStatus::Available)
            .await
            .unwrap()
            .is_not_found());
    }

    #[tokio::test]
    async fn cas_missing_element() {
        let store = InMemoryElementStore::new();
        let change = StatusChange::new(ElementStatus::Negotiating, TransitionReason::PulledForSite);
        let result = store
            .cas_status(&ElementId::derive(&["none"]), ElementStatus::Available, &change)
            .await
            .unwrap();
        assert!(result.is_not_found());
    }

    #[tokio::test]
    async fn cas_rejects_illegal_target() {
        let store = InMemoryElementStore::new();
        let e = element("/A/B/C#1");
        store.insert(&e).await.unwrap();
        let change = StatusChange::new(ElementStatus::Done, TransitionReason::AgentReported)
            .claimed_by("local-1");
        assert!(store
            .cas_status(&e.id, ElementStatus::Available, &change)
            .await
            .is_err());
        let stored = store.get(&e.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ElementStatus::Available);
        assert_eq!(stored.child_queue, None);
    }

    #[tokio::test]
    async fn query_orders_by_creation() {
        let store = InMemoryElementStore::new();
        let first = element("/A/B/C#1");
        let mut second = element("/A/B/C#2");
        second.created_at = first.created_at + chrono::Duration::seconds(1);
        store.insert(&second).await.unwrap();
        store.insert(&first).await.unwrap();

        let ids: Vec<_> = store
            .query(&ElementFilter::all())
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(ids, vec![first.id, second.id]);
    }

    #[tokio::test]
    async fn inbox_keeps_posting_order_and_history() {
        let inbox = InMemoryInbox::new();
        let id = ElementId::derive(&["wf", "t", "b"]);
        let mut posted = Vec::new();
        for priority in [1, 2, 3] {
            posted.push(
                inbox
                    .post(InboxPayload::PriorityUpdate {
                        element_id: id.clone(),
                        priority,
                    })
                    .await
                    .unwrap(),
            );
        }
        let pending = inbox.pending(10).await.unwrap();
        let sequences: Vec<_> = pending.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![0, 1, 2]);

        inbox.mark_merged(&posted[0]).await.unwrap();
        assert_eq!(inbox.pending_count().await.unwrap(), 2);
        assert_eq!(inbox.pending(1).await.unwrap()[0].id, posted[1]);
        assert_eq!(inbox.entries().await.unwrap().len(), 3);
    }
}

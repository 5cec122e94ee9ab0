//! Test element store with operation tracing.
//!
//! Wraps the in-memory store, records every call and can be told to fail
//! or to let a rival queue claim an element just before the next write.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use tierq_core::ElementId;
use tierq_queue::element::{ElementStatus, TransitionReason, WorkQueueElement};
use tierq_queue::error::{Error, Result};
use tierq_queue::policy::WorkloadSpec;
use tierq_queue::store::memory::InMemoryElementStore;
use tierq_queue::store::{CasResult, ElementFilter, ElementStore, InsertResult, StatusChange};

/// Record of an element store call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    /// Element read.
    Get {
        /// Element read.
        id: ElementId,
    },
    /// Element insert.
    Insert {
        /// Element inserted.
        id: ElementId,
    },
    /// Element replacement.
    Save {
        /// Element saved.
        id: ElementId,
    },
    /// Element replacement conditional on status.
    SaveIf {
        /// Element saved.
        id: ElementId,
        /// Status the write was conditioned on.
        expected: ElementStatus,
    },
    /// Compare-and-swap on status.
    Cas {
        /// Element targeted.
        id: ElementId,
        /// Expected status.
        expected: ElementStatus,
        /// Requested status.
        target: ElementStatus,
    },
    /// Filtered query.
    Query,
    /// Workload write.
    SaveWorkload {
        /// Request name.
        request_name: String,
    },
    /// Workload read.
    GetWorkload {
        /// Request name.
        request_name: String,
    },
}

/// In-memory element store with operation tracing and failure injection.
#[derive(Debug, Clone, Default)]
pub struct TracingElementStore {
    inner: Arc<InMemoryElementStore>,
    operations: Arc<Mutex<Vec<StoreOp>>>,
    failing: Arc<AtomicBool>,
    rival_claim: Arc<Mutex<Option<String>>>,
}

impl TracingElementStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all recorded operations.
    #[must_use]
    pub fn operations(&self) -> Vec<StoreOp> {
        self.operations.lock().expect("lock").clone()
    }

    /// Returns recorded CAS operations only.
    #[must_use]
    pub fn cas_operations(&self) -> Vec<StoreOp> {
        self.operations()
            .into_iter()
            .filter(|op| matches!(op, StoreOp::Cas { .. }))
            .collect()
    }

    /// Clears recorded operations.
    pub fn clear_operations(&self) {
        self.operations.lock().expect("lock").clear();
    }

    /// Makes every subsequent call fail with a storage error.
    pub fn inject_failure(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    /// Stops failing calls.
    pub fn clear_failures(&self) {
        self.failing.store(false, Ordering::SeqCst);
    }

    /// Lets `queue` claim the target of the next write (`Available` to
    /// `Acquired`) right before that write is applied.
    pub fn claim_before_next_write(&self, queue: &str) {
        *self.rival_claim.lock().expect("lock") = Some(queue.to_string());
    }

    async fn interleave_rival_claim(&self, id: &ElementId) -> Result<()> {
        let rival = self.rival_claim.lock().expect("lock").take();
        let Some(queue) = rival else {
            return Ok(());
        };
        let negotiate =
            StatusChange::new(ElementStatus::Negotiating, TransitionReason::PulledForSite)
                .claimed_by(queue.as_str());
        let confirm = StatusChange::new(ElementStatus::Acquired, TransitionReason::ClaimConfirmed)
            .claimed_by(queue.as_str());
        if self
            .inner
            .cas_status(id, ElementStatus::Available, &negotiate)
            .await?
            .is_success()
        {
            self.inner
                .cas_status(id, ElementStatus::Negotiating, &confirm)
                .await?;
        }
        Ok(())
    }

    fn record(&self, op: StoreOp) -> Result<()> {
        self.operations.lock().expect("lock").push(op);
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::storage("injected failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl ElementStore for TracingElementStore {
    async fn get(&self, id: &ElementId) -> Result<Option<WorkQueueElement>> {
        self.record(StoreOp::Get { id: id.clone() })?;
        self.inner.get(id).await
    }

    async fn insert(&self, element: &WorkQueueElement) -> Result<InsertResult> {
        self.record(StoreOp::Insert {
            id: element.id.clone(),
        })?;
        self.inner.insert(element).await
    }

    async fn save(&self, element: &WorkQueueElement) -> Result<()> {
        self.record(StoreOp::Save {
            id: element.id.clone(),
        })?;
        self.interleave_rival_claim(&element.id).await?;
        self.inner.save(element).await
    }

    async fn save_if(
        &self,
        element: &WorkQueueElement,
        expected: ElementStatus,
    ) -> Result<CasResult> {
        self.record(StoreOp::SaveIf {
            id: element.id.clone(),
            expected,
        })?;
        self.interleave_rival_claim(&element.id).await?;
        self.inner.save_if(element, expected).await
    }

    async fn cas_status(
        &self,
        id: &ElementId,
        expected: ElementStatus,
        change: &StatusChange,
    ) -> Result<CasResult> {
        self.record(StoreOp::Cas {
            id: id.clone(),
            expected,
            target: change.target,
        })?;
        self.inner.cas_status(id, expected, change).await
    }

    async fn query(&self, filter: &ElementFilter) -> Result<Vec<WorkQueueElement>> {
        self.record(StoreOp::Query)?;
        self.inner.query(filter).await
    }

    async fn save_workload(&self, request_name: &str, workload: &WorkloadSpec) -> Result<()> {
        self.record(StoreOp::SaveWorkload {
            request_name: request_name.to_string(),
        })?;
        self.inner.save_workload(request_name, workload).await
    }

    async fn get_workload(&self, request_name: &str) -> Result<Option<WorkloadSpec>> {
        self.record(StoreOp::GetWorkload {
            request_name: request_name.to_string(),
        })?;
        self.inner.get_workload(request_name).await
    }
}

//! The hierarchical work queue.
//!
//! A `Global` queue receives workloads and holds the authoritative elements.
//! A `Local` queue mirrors `Available` parent elements for the teams it
//! serves, claims them from the parent when its sites have free slots, and
//! reports progress back up. Queues only exchange data through stores:
//! a local queue reads and claims through its parent's element store and
//! posts status updates to its parent's inbox.
//!
//! ```text
//!  Global                                 Local
//!  ──────                                 ─────
//!  queue_work ──▶ elements                pull_from_parent
//!                    │  Available ───────────▶ inbox (NewElement, PriorityUpdate, CancelRequest)
//!                    │                          │
//!                    │                        process_inbound_work ──▶ elements
//!                    │                                                   │
//!                    │  ◀── CAS claim ────────────────────────────── pull_work
//!                    │                                                   │
//!  inbox ◀──────────────── StatusUpdate ─────── pull_from_parent ◀───────┘
//! ```

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn, Instrument};

use tierq_core::observability::queue_span;
use tierq_core::ElementId;

use crate::config::QueueConfig;
use crate::element::{ElementStatus, Progress, TransitionReason, WorkQueueElement};
use crate::error::{Error, Result};
use crate::inbox::{InboxPayload, MergeSummary};
use crate::metrics::QueueMetrics;
use crate::policy::WorkloadSpec;
use crate::sites::{hosts_data, CatalogCache, ResourceCatalog, SiteListFilter};
use crate::slots::{SlotBudget, SlotDecision};
use crate::stats::{self, CountAndJobs};
use crate::status::WorkflowStatus;
use crate::store::{CasResult, ElementFilter, ElementStore, InboxStore, InsertResult, StatusChange};

/// Attempts at a conditional element write before giving up.
const MAX_WRITE_ATTEMPTS: usize = 5;

/// Handles a local queue keeps on its parent.
#[derive(Clone)]
pub struct ParentLink {
    /// Parent queue name.
    pub name: String,
    /// Parent element store.
    pub elements: Arc<dyn ElementStore>,
    /// Parent inbox.
    pub inbox: Arc<dyn InboxStore>,
}

impl std::fmt::Debug for ParentLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParentLink")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Position of a queue in the hierarchy.
#[derive(Debug, Clone)]
pub enum QueueRole {
    /// Top of the hierarchy.
    Global,
    /// Child of another queue.
    Local(ParentLink),
}

/// Outcome of one `pull_from_parent` pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationSummary {
    /// Status updates posted to the parent.
    pub reported: usize,
    /// Parent elements posted for local insertion.
    pub replicated: usize,
    /// Priority changes posted.
    pub priority_updates: usize,
    /// Cancellations posted.
    pub cancel_requests: usize,
}

/// Outcome of claiming a parent element.
enum ParentClaim {
    Claimed,
    Lost,
}

/// A work queue instance.
pub struct WorkQueue {
    config: QueueConfig,
    role: QueueRole,
    elements: Arc<dyn ElementStore>,
    inbox: Arc<dyn InboxStore>,
    catalog: Arc<dyn ResourceCatalog>,
    metrics: QueueMetrics,
}

impl std::fmt::Debug for WorkQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkQueue")
            .field("config", &self.config)
            .field("role", &self.role)
            .finish_non_exhaustive()
    }
}

impl WorkQueue {
    /// Creates a global queue.
    ///
    /// # Errors
    ///
    /// Returns an error if `config` is invalid.
    pub fn global(
        config: QueueConfig,
        elements: Arc<dyn ElementStore>,
        inbox: Arc<dyn InboxStore>,
        catalog: Arc<dyn ResourceCatalog>,
    ) -> Result<Self> {
        Self::new(config, QueueRole::Global, elements, inbox, catalog)
    }

    /// Creates a local queue under `parent`.
    ///
    /// # Errors
    ///
    /// Returns an error if `config` is invalid or names the parent.
    pub fn local(
        config: QueueConfig,
        parent: ParentLink,
        elements: Arc<dyn ElementStore>,
        inbox: Arc<dyn InboxStore>,
        catalog: Arc<dyn ResourceCatalog>,
    ) -> Result<Self> {
        if parent.name == config.queue_name {
            return Err(Error::validation(format!(
                "queue {} cannot be its own parent",
                config.queue_name
            )));
        }
        Self::new(config, QueueRole::Local(parent), elements, inbox, catalog)
    }

    fn new(
        config: QueueConfig,
        role: QueueRole,
        elements: Arc<dyn ElementStore>,
        inbox: Arc<dyn InboxStore>,
        catalog: Arc<dyn ResourceCatalog>,
    ) -> Result<Self> {
        config.validate()?;
        let metrics = QueueMetrics::new(config.queue_name.clone());
        Ok(Self {
            config,
            role,
            elements,
            inbox,
            catalog,
            metrics,
        })
    }

    /// Queue name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.config.queue_name
    }

    /// Queue configuration.
    #[must_use]
    pub const fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Position in the hierarchy.
    #[must_use]
    pub const fn role(&self) -> &QueueRole {
        &self.role
    }

    /// Link a child queue uses to reach this queue.
    #[must_use]
    pub fn as_parent(&self) -> ParentLink {
        ParentLink {
            name: self.config.queue_name.clone(),
            elements: Arc::clone(&self.elements),
            inbox: Arc::clone(&self.inbox),
        }
    }

    /// Decomposes `workload` into elements and stores them.
    ///
    /// Returns the number of newly inserted elements; re-queueing the same
    /// workload inserts nothing.
    ///
    /// # Errors
    ///
    /// Returns a validation error for malformed input and an invariant
    /// violation if an element id is already used by different work. In
    /// both cases nothing is stored.
    #[tracing::instrument(skip(self, workload), fields(queue = %self.config.queue_name))]
    pub async fn queue_work(
        &self,
        workload: &WorkloadSpec,
        request_name: &str,
        team: &str,
    ) -> Result<usize> {
        let mut workload = workload.clone();
        workload.priority.get_or_insert(self.config.default_priority);
        let elements = workload.start_policy.split(&workload, request_name, team)?;

        for element in &elements {
            if let Some(existing) = self.elements.get(&element.id).await? {
                if existing.data() != element.data() || existing.splitting() != element.splitting() {
                    return Err(Error::invariant(format!(
                        "element {} already queued with different work",
                        element.id
                    )));
                }
            }
        }

        self.elements.save_workload(request_name, &workload).await?;
        let mut inserted = 0;
        for element in &elements {
            if self.elements.insert(element).await? == InsertResult::Inserted {
                inserted += 1;
            }
        }
        info!(elements = elements.len(), inserted, "queued workload");
        Ok(inserted)
    }

    /// Priority stored with a workload, if the workload is known.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub async fn workload_priority(&self, request_name: &str) -> Result<Option<i64>> {
        Ok(self
            .elements
            .get_workload(request_name)
            .await?
            .and_then(|w| w.priority))
    }

    /// Sets the priority of every unfinished element of a workflow.
    ///
    /// Unknown workflows are a no-op. On a local queue the new value
    /// overrides the parent's until the parent's priority changes again.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    #[tracing::instrument(skip(self), fields(queue = %self.config.queue_name))]
    pub async fn update_priority(&self, request_name: &str, priority: i64) -> Result<usize> {
        if let Some(mut workload) = self.elements.get_workload(request_name).await? {
            workload.priority = Some(priority);
            self.elements.save_workload(request_name, &workload).await?;
        }

        let mut updated = 0;
        for element in self.get_elements_for_workflow(request_name).await? {
            if element.status.is_terminal() || element.priority == priority {
                continue;
            }
            let written = self
                .modify(&element.id, |element| {
                    if element.status.is_terminal() || element.priority == priority {
                        return Ok(false);
                    }
                    element.priority = priority;
                    element.updated_at = chrono::Utc::now();
                    Ok(true)
                })
                .await?;
            if written.is_some() {
                updated += 1;
            }
        }
        debug!(updated, "updated priority");
        Ok(updated)
    }

    /// Requests cancellation of every unfinished element of a workflow.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    #[tracing::instrument(skip(self), fields(queue = %self.config.queue_name))]
    pub async fn cancel_workflow(&self, request_name: &str) -> Result<usize> {
        let mut requested = 0;
        for element in self.get_elements_for_workflow(request_name).await? {
            let mut from = element.status;
            let written = self
                .modify(&element.id, |element| {
                    from = element.status;
                    element.request_cancel(TransitionReason::WorkflowCancelled)
                })
                .await?;
            if let Some(element) = written {
                self.metrics
                    .record_transition(from.as_label(), element.status.as_label());
                requested += 1;
            }
        }
        info!(requested, "cancellation requested");
        Ok(requested)
    }

    /// Applies a status reported by the agent executing the work.
    ///
    /// Only committed elements (`Acquired` or later) accept reports. Reports
    /// that would move an element backwards are ignored.
    ///
    /// # Errors
    ///
    /// Returns `ElementNotFound` or `InvalidStateTransition` before any
    /// element is modified.
    #[tracing::instrument(skip(self, ids), fields(queue = %self.config.queue_name, count = ids.len()))]
    pub async fn update_element_status(
        &self,
        ids: &[ElementId],
        status: ElementStatus,
        progress: Option<Progress>,
    ) -> Result<usize> {
        let mut targets = Vec::with_capacity(ids.len());
        for id in ids {
            let element = self
                .elements
                .get(id)
                .await?
                .ok_or_else(|| Error::ElementNotFound { id: id.clone() })?;
            if matches!(
                element.status,
                ElementStatus::Available | ElementStatus::Negotiating
            ) {
                return Err(Error::InvalidStateTransition {
                    from: element.status.to_string(),
                    to: status.to_string(),
                    reason: "element is not committed to a queue".to_string(),
                });
            }
            targets.push(element);
        }

        let mut changed = 0;
        for target in targets {
            let mut from = target.status;
            let mut moved = false;
            let written = self
                .modify(&target.id, |element| {
                    from = element.status;
                    moved = element.advance_to(status, TransitionReason::AgentReported)?;
                    if let Some(progress) = progress {
                        element.set_progress(progress);
                    }
                    Ok(moved || progress.is_some())
                })
                .await?;
            if let (Some(element), true) = (written, moved) {
                self.metrics
                    .record_transition(from.as_label(), element.status.as_label());
                changed += 1;
            }
        }
        Ok(changed)
    }

    /// Re-reads an element, applies `change` and writes it back only if the
    /// stored status is still the one read, retrying on a concurrent change.
    ///
    /// `change` returns false to leave the element untouched. Returns the
    /// written element, or `None` if nothing was written or the element is
    /// gone.
    async fn modify<F>(&self, id: &ElementId, mut change: F) -> Result<Option<WorkQueueElement>>
    where
        F: FnMut(&mut WorkQueueElement) -> Result<bool> + Send,
    {
        for _ in 0..MAX_WRITE_ATTEMPTS {
            let Some(mut element) = self.elements.get(id).await? else {
                return Ok(None);
            };
            let read = element.status;
            if !change(&mut element)? {
                return Ok(None);
            }
            match self.elements.save_if(&element, read).await? {
                CasResult::Success => return Ok(Some(element)),
                CasResult::NotFound => return Ok(None),
                CasResult::StateMismatch { actual } => {
                    self.metrics.record_write_conflict();
                    debug!(element_id = %id, expected = %read, %actual, "element changed before write; retrying");
                }
            }
        }
        Err(Error::storage(format!(
            "element {id} kept changing; gave up after {MAX_WRITE_ATTEMPTS} attempts"
        )))
    }

    /// All elements of a workflow.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub async fn get_elements_for_workflow(
        &self,
        request_name: &str,
    ) -> Result<Vec<WorkQueueElement>> {
        self.elements
            .query(&ElementFilter::all().for_request(request_name))
            .await
    }

    /// `(workflow, priority)` pairs of `Available` elements.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub async fn get_available_workflows(&self) -> Result<BTreeSet<(String, i64)>> {
        let available = self
            .elements
            .query(&ElementFilter::all().with_statuses([ElementStatus::Available]))
            .await?;
        Ok(available
            .into_iter()
            .map(|e| (e.request_name, e.priority))
            .collect())
    }

    /// Acquires work for sites with free slots.
    ///
    /// `resources` maps site names to free job slots. Elements are taken
    /// in priority order and placed at the eligible site with the most free
    /// slots; a site is eligible if the element's site lists allow it and it
    /// hosts the element's input data. A local queue merges its inbox first
    /// so the pull sees the latest replicated priorities and cancellations.
    /// Returns the acquired elements.
    ///
    /// # Errors
    ///
    /// Returns a storage error. A failure while claiming from the parent
    /// leaves the local copy `Negotiating`; the next pull retries it.
    pub async fn pull_work(&self, resources: &BTreeMap<String, u64>) -> Result<Vec<WorkQueueElement>> {
        let span = queue_span("pull_work", &self.config.queue_name, "*");
        self.pull_work_inner(resources).instrument(span).await
    }

    async fn pull_work_inner(
        &self,
        resources: &BTreeMap<String, u64>,
    ) -> Result<Vec<WorkQueueElement>> {
        let _timer = self.metrics.time_pull();
        if matches!(self.role, QueueRole::Local(_)) {
            self.process_inbound_work_inner().await?;
        }
        let mut budget = SlotBudget::new(resources.iter().map(|(s, n)| (s.clone(), *n)));
        if budget.is_exhausted() {
            return Ok(Vec::new());
        }

        let mut statuses = vec![ElementStatus::Available];
        if matches!(self.role, QueueRole::Local(_)) {
            statuses.push(ElementStatus::Negotiating);
        }
        let mut candidates: Vec<WorkQueueElement> = self
            .elements
            .query(
                &ElementFilter::all()
                    .with_statuses(statuses)
                    .for_teams(self.config.teams.clone()),
            )
            .await?
            .into_iter()
            .filter(|e| e.status == ElementStatus::Available || e.is_local_copy())
            .collect();
        candidates.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.created_at.cmp(&b.created_at))
                .then_with(|| a.id.cmp(&b.id))
        });

        let mut cache = CatalogCache::new(self.catalog.as_ref(), self.config.site_kind);
        let mut site_names: HashMap<String, Vec<String>> = HashMap::new();
        for site in budget.sites().map(ToString::to_string).collect::<Vec<_>>() {
            let names = cache.names_for(&site).await;
            site_names.insert(site, names);
        }

        let mut acquired = Vec::new();
        for candidate in candidates {
            if budget.is_exhausted() {
                break;
            }
            let filter = SiteListFilter::expand(
                &mut cache,
                &candidate.site_whitelist,
                &candidate.site_blacklist,
            )
            .await;
            let decision = budget.best_site(|site| {
                site_names.get(site).is_some_and(|names| {
                    filter.allows(names) && hosts_data(&candidate.data_locations, names)
                })
            });
            let site = match decision {
                SlotDecision::Placed { site } => site,
                SlotDecision::Denied { reason } => {
                    debug!(element_id = %candidate.id, %reason, "element not placed");
                    continue;
                }
            };

            if let Some(element) = self.claim(&candidate).await? {
                budget.consume(&site, element.jobs);
                self.metrics.record_pulled(&site);
                info!(element_id = %element.id, %site, jobs = element.jobs, "acquired element");
                acquired.push(element);
            }
        }
        Ok(acquired)
    }

    /// Claims `candidate` locally and, for a local copy, from the parent.
    ///
    /// Returns the acquired element, or `None` if the claim was lost.
    async fn claim(&self, candidate: &WorkQueueElement) -> Result<Option<WorkQueueElement>> {
        let id = &candidate.id;
        if candidate.status == ElementStatus::Available {
            let negotiate =
                StatusChange::new(ElementStatus::Negotiating, TransitionReason::PulledForSite);
            let result = self
                .elements
                .cas_status(id, ElementStatus::Available, &negotiate)
                .await?;
            if !result.is_success() {
                debug!(element_id = %id, ?result, "element taken by a concurrent pull");
                return Ok(None);
            }
            self.metrics.record_transition(
                ElementStatus::Available.as_label(),
                ElementStatus::Negotiating.as_label(),
            );
        }

        if let (QueueRole::Local(parent), Some(parent_id)) =
            (&self.role, candidate.parent_queue_id.as_ref())
        {
            if let ParentClaim::Lost = self.claim_parent(parent, parent_id).await? {
                self.abandon(id).await?;
                return Ok(None);
            }
        }

        let confirm = StatusChange::new(ElementStatus::Acquired, TransitionReason::ClaimConfirmed);
        let result = self
            .elements
            .cas_status(id, ElementStatus::Negotiating, &confirm)
            .await?;
        if !result.is_success() {
            warn!(element_id = %id, ?result, "element changed while negotiating");
            return Ok(None);
        }
        self.metrics.record_transition(
            ElementStatus::Negotiating.as_label(),
            ElementStatus::Acquired.as_label(),
        );
        self.elements.get(id).await
    }

    /// Claims the parent's element for this queue.
    async fn claim_parent(&self, parent: &ParentLink, id: &ElementId) -> Result<ParentClaim> {
        let me = self.config.queue_name.as_str();
        let negotiate = StatusChange::new(ElementStatus::Negotiating, TransitionReason::PulledForSite)
            .claimed_by(me);
        match parent
            .elements
            .cas_status(id, ElementStatus::Available, &negotiate)
            .await?
        {
            CasResult::Success => {}
            CasResult::NotFound => return Ok(ParentClaim::Lost),
            CasResult::StateMismatch { actual } => {
                let ours = parent
                    .elements
                    .get(id)
                    .await?
                    .is_some_and(|p| p.child_queue.as_deref() == Some(me));
                match (actual, ours) {
                    (ElementStatus::Acquired, true) => return Ok(ParentClaim::Claimed),
                    (ElementStatus::Negotiating, true) => {}
                    _ => return Ok(ParentClaim::Lost),
                }
            }
        }

        let confirm = StatusChange::new(ElementStatus::Acquired, TransitionReason::ClaimConfirmed)
            .claimed_by(me);
        let result = parent
            .elements
            .cas_status(id, ElementStatus::Negotiating, &confirm)
            .await?;
        if result.is_success() {
            Ok(ParentClaim::Claimed)
        } else {
            Ok(ParentClaim::Lost)
        }
    }

    /// Cancels a local copy whose parent element went to another queue.
    async fn abandon(&self, id: &ElementId) -> Result<()> {
        self.metrics.record_claim_lost();
        info!(element_id = %id, "parent element claimed elsewhere; cancelling local copy");
        let cancel = StatusChange::new(
            ElementStatus::CancelRequested,
            TransitionReason::ClaimedElsewhere,
        );
        if self
            .elements
            .cas_status(id, ElementStatus::Negotiating, &cancel)
            .await?
            .is_success()
        {
            let confirm = StatusChange::new(ElementStatus::Canceled, TransitionReason::CancelConfirmed);
            self.elements
                .cas_status(id, ElementStatus::CancelRequested, &confirm)
                .await?;
        }
        Ok(())
    }

    /// Synchronises a local queue with its parent.
    ///
    /// Reports local status changes to the parent inbox, then posts to the
    /// local inbox: copies of new `Available` parent elements, changed parent
    /// priorities, and cancellations for elements the parent cancelled or
    /// gave to another queue. Nothing is applied locally until
    /// [`Self::process_inbound_work`] runs.
    ///
    /// # Errors
    ///
    /// Returns a validation error on a global queue, otherwise storage errors.
    pub async fn pull_from_parent(&self) -> Result<ReplicationSummary> {
        let QueueRole::Local(parent) = &self.role else {
            return Err(Error::validation(format!(
                "queue {} has no parent",
                self.config.queue_name
            )));
        };
        let span = queue_span("pull_from_parent", &self.config.queue_name, "*");
        self.pull_from_parent_inner(parent).instrument(span).await
    }

    async fn pull_from_parent_inner(&self, parent: &ParentLink) -> Result<ReplicationSummary> {
        let me = self.config.queue_name.as_str();
        let mut summary = ReplicationSummary::default();

        let parent_elements: HashMap<ElementId, WorkQueueElement> = parent
            .elements
            .query(&ElementFilter::all().for_teams(self.config.teams.clone()))
            .await?
            .into_iter()
            .map(|e| (e.id.clone(), e))
            .collect();
        let local_elements = self.elements.query(&ElementFilter::all()).await?;

        for local in &local_elements {
            let Some(parent_id) = &local.parent_queue_id else {
                continue;
            };
            if local.parent_synced_status == Some(local.status)
                || matches!(
                    local.status,
                    ElementStatus::Available | ElementStatus::Negotiating
                )
            {
                continue;
            }
            let claimed_by_us = parent_elements
                .get(parent_id)
                .is_some_and(|p| p.child_queue.as_deref() == Some(me));
            if !claimed_by_us {
                continue;
            }
            parent
                .inbox
                .post(InboxPayload::StatusUpdate {
                    element_id: parent_id.clone(),
                    status: local.status,
                    progress: local.progress,
                    from_queue: me.to_string(),
                })
                .await?;
            let reported = local.status;
            self.modify(&local.id, |element| {
                if element.status != reported {
                    return Ok(false);
                }
                element.parent_synced_status = Some(reported);
                Ok(true)
            })
            .await?;
            self.metrics.record_status_report();
            summary.reported += 1;
        }

        let pending_new: HashSet<ElementId> = self
            .inbox
            .pending(usize::MAX)
            .await?
            .into_iter()
            .filter_map(|entry| match entry.payload {
                InboxPayload::NewElement { element } => Some(element.id),
                _ => None,
            })
            .collect();
        let local_by_id: HashMap<&ElementId, &WorkQueueElement> =
            local_elements.iter().map(|e| (&e.id, e)).collect();

        let mut parents: Vec<&WorkQueueElement> = parent_elements.values().collect();
        parents.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        for p in parents {
            let Some(local) = local_by_id.get(&p.id) else {
                if p.status == ElementStatus::Available && !pending_new.contains(&p.id) {
                    self.inbox
                        .post(InboxPayload::NewElement {
                            element: Box::new(p.local_copy()),
                        })
                        .await?;
                    summary.replicated += 1;
                }
                continue;
            };

            if local.parent_priority != Some(p.priority) && !local.status.is_past_acquired() {
                self.inbox
                    .post(InboxPayload::PriorityUpdate {
                        element_id: p.id.clone(),
                        priority: p.priority,
                    })
                    .await?;
                summary.priority_updates += 1;
            }

            let cancelled_above = matches!(
                p.status,
                ElementStatus::CancelRequested | ElementStatus::Canceled
            );
            let claimed_elsewhere = p.child_queue.as_deref().is_some_and(|q| q != me);
            let cancellable =
                !local.status.is_terminal() && local.status != ElementStatus::CancelRequested;
            if cancellable && (cancelled_above || claimed_elsewhere) {
                self.inbox
                    .post(InboxPayload::CancelRequest {
                        element_id: p.id.clone(),
                    })
                    .await?;
                summary.cancel_requests += 1;
            }
        }

        self.metrics.record_replicated(summary.replicated);
        info!(
            reported = summary.reported,
            replicated = summary.replicated,
            priority_updates = summary.priority_updates,
            cancel_requests = summary.cancel_requests,
            "synchronised with parent {}",
            parent.name
        );
        Ok(summary)
    }

    /// Merges pending inbox entries in posting order.
    ///
    /// Merged entries are marked, never deleted. Afterwards, elements with a
    /// pending cancellation that never started and that no child queue has
    /// claimed are finalised to `Canceled`. A claimed element stays
    /// `CancelRequested` until its child reports a final status.
    ///
    /// # Errors
    ///
    /// Returns a storage error; entries merged before the failure stay
    /// merged.
    pub async fn process_inbound_work(&self) -> Result<MergeSummary> {
        let span = queue_span("process_inbound_work", &self.config.queue_name, "*");
        self.process_inbound_work_inner().instrument(span).await
    }

    async fn process_inbound_work_inner(&self) -> Result<MergeSummary> {
        let mut summary = MergeSummary::default();
        let entries = self.inbox.pending(self.config.inbox_batch_size).await?;

        for entry in entries {
            let kind = entry.payload.kind();
            let applied = self.merge(entry.payload, &mut summary).await?;
            if !applied {
                summary.ignored += 1;
            }
            self.inbox.mark_merged(&entry.id).await?;
            self.metrics.record_inbox_merge(kind);
            summary.merged += 1;
        }

        let cancelling = self
            .elements
            .query(&ElementFilter::all().with_statuses([ElementStatus::CancelRequested]))
            .await?;
        let confirm = StatusChange::new(ElementStatus::Canceled, TransitionReason::CancelConfirmed);
        for element in cancelling
            .iter()
            .filter(|e| e.started_at.is_none() && e.child_queue.is_none())
        {
            if self
                .elements
                .cas_status(&element.id, ElementStatus::CancelRequested, &confirm)
                .await?
                .is_success()
            {
                self.metrics.record_transition(
                    ElementStatus::CancelRequested.as_label(),
                    ElementStatus::Canceled.as_label(),
                );
                summary.canceled += 1;
            }
        }

        self.metrics.set_inbox_depth(self.inbox.pending_count().await?);
        debug!(?summary, "merged inbox");
        Ok(summary)
    }

    /// Applies one payload. Returns false if it had no effect.
    async fn merge(&self, payload: InboxPayload, summary: &mut MergeSummary) -> Result<bool> {
        match payload {
            InboxPayload::NewElement { element } => {
                let inserted = self.elements.insert(&element).await? == InsertResult::Inserted;
                if inserted {
                    summary.inserted += 1;
                }
                Ok(inserted)
            }
            InboxPayload::StatusUpdate {
                element_id,
                status,
                progress,
                from_queue,
            } => {
                let Some(element) = self.elements.get(&element_id).await? else {
                    return Ok(false);
                };
                if element.child_queue.as_deref() != Some(from_queue.as_str()) {
                    warn!(%element_id, %from_queue, "status update from a queue that does not own the element");
                    return Ok(false);
                }
                let mut from = element.status;
                let mut moved = false;
                let written = self
                    .modify(&element_id, |element| {
                        from = element.status;
                        moved = element.advance_to(status, TransitionReason::ReplicatedUpdate)?;
                        element.set_progress(progress);
                        Ok(true)
                    })
                    .await?;
                let Some(element) = written else {
                    return Ok(false);
                };
                if moved {
                    self.metrics
                        .record_transition(from.as_label(), element.status.as_label());
                    summary.status_changes += 1;
                }
                Ok(true)
            }
            InboxPayload::PriorityUpdate {
                element_id,
                priority,
            } => {
                let written = self
                    .modify(&element_id, |element| {
                        if element.status.is_past_acquired() {
                            return Ok(false);
                        }
                        element.priority = priority;
                        element.parent_priority = Some(priority);
                        element.updated_at = chrono::Utc::now();
                        Ok(true)
                    })
                    .await?;
                if written.is_some() {
                    summary.priority_changes += 1;
                }
                Ok(written.is_some())
            }
            InboxPayload::CancelRequest { element_id } => {
                let mut from = ElementStatus::Available;
                let written = self
                    .modify(&element_id, |element| {
                        from = element.status;
                        element.request_cancel(TransitionReason::WorkflowCancelled)
                    })
                    .await?;
                let Some(element) = written else {
                    return Ok(false);
                };
                self.metrics
                    .record_transition(from.as_label(), element.status.as_label());
                summary.cancel_requests += 1;
                Ok(true)
            }
        }
    }

    async fn snapshot(&self) -> Result<Vec<WorkQueueElement>> {
        self.elements.query(&ElementFilter::all()).await
    }

    /// Summed job estimates per workflow.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub async fn top_level_jobs_by_request(&self) -> Result<BTreeMap<String, u64>> {
        Ok(stats::top_level_jobs_by_request(&self.snapshot().await?))
    }

    /// Element counts and jobs per workflow and status.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub async fn elements_count_and_jobs_by_workflow(
        &self,
    ) -> Result<BTreeMap<String, BTreeMap<ElementStatus, CountAndJobs>>> {
        Ok(stats::elements_count_and_jobs_by_workflow(
            &self.snapshot().await?,
        ))
    }

    /// Jobs per status and priority.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub async fn jobs_by_status_and_priority(
        &self,
    ) -> Result<BTreeMap<ElementStatus, BTreeMap<i64, u64>>> {
        Ok(stats::jobs_by_status_and_priority(&self.snapshot().await?))
    }

    /// Jobs per claiming child queue and status.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub async fn child_queues_and_status(
        &self,
    ) -> Result<BTreeMap<String, BTreeMap<ElementStatus, u64>>> {
        Ok(stats::child_queues_and_status(&self.snapshot().await?))
    }

    /// Jobs per claiming child queue and priority.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub async fn child_queues_and_priority(&self) -> Result<BTreeMap<String, BTreeMap<i64, u64>>> {
        Ok(stats::child_queues_and_priority(&self.snapshot().await?))
    }

    /// Aggregated status of one workflow.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub async fn workflow_status(&self, request_name: &str) -> Result<Option<WorkflowStatus>> {
        let elements = self.get_elements_for_workflow(request_name).await?;
        Ok(stats::workflow_status(&elements, request_name))
    }

    /// Aggregated status of every workflow in the queue.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub async fn workflow_statuses(&self) -> Result<BTreeMap<String, Option<WorkflowStatus>>> {
        Ok(stats::workflow_statuses(&self.snapshot().await?))
    }

    /// Workflows whose elements have all finished or been cancelled.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub async fn completed_workflows(&self) -> Result<BTreeSet<String>> {
        Ok(stats::completed_workflows(&self.snapshot().await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{BlockInfo, InputDataset, SplittingSpec, TaskSpec};
    use crate::store::memory::{InMemoryElementStore, InMemoryInbox};
    use async_trait::async_trait;
    use serde_json::json;

    struct NoCatalog;

    #[async_trait]
    impl ResourceCatalog for NoCatalog {
        async fn site_name_to_storage_element(&self, _site: &str) -> Result<Vec<String>> {
            Ok(vec![])
        }

        async fn site_name_to_compute_element(&self, _site: &str) -> Result<Vec<String>> {
            Ok(vec![])
        }
    }

    fn workload(blocks: usize) -> WorkloadSpec {
        WorkloadSpec {
            name: "wf".into(),
            priority: None,
            tasks: vec![TaskSpec {
                name: "Processing".into(),
                input_dataset: InputDataset {
                    name: "/A/B/RAW".into(),
                    blocks: (0..blocks)
                        .map(|i| BlockInfo {
                            name: format!("/A/B/RAW#{i}"),
                            files: 5,
                            events: 500,
                            lumis: 50,
                            locations: BTreeSet::from(["T2_XX_Site".to_string()]),
                        })
                        .collect(),
                },
                splitting: SplittingSpec {
                    algorithm: "EventBased".into(),
                    params: json!({"events_per_job": 100}).as_object().cloned().unwrap(),
                },
                site_whitelist: vec![],
                site_blacklist: vec![],
                lumi_mask: None,
            }],
            start_policy: crate::policy::StartPolicy::default(),
        }
    }

    fn global() -> WorkQueue {
        WorkQueue::global(
            QueueConfig::new("global"),
            Arc::new(InMemoryElementStore::new()),
            Arc::new(InMemoryInbox::new()),
            Arc::new(NoCatalog),
        )
        .unwrap()
    }

    fn slots(site: &str, n: u64) -> BTreeMap<String, u64> {
        BTreeMap::from([(site.to_string(), n)])
    }

    #[tokio::test]
    async fn queue_work_is_idempotent() {
        let queue = global();
        assert_eq!(queue.queue_work(&workload(3), "wf", "ops").await.unwrap(), 3);
        assert_eq!(queue.queue_work(&workload(3), "wf", "ops").await.unwrap(), 0);
        assert_eq!(queue.workload_priority("wf").await.unwrap(), Some(8000));
    }

    #[tokio::test]
    async fn conflicting_requeue_rejected() {
        let queue = global();
        queue.queue_work(&workload(1), "wf", "ops").await.unwrap();
        let mut changed = workload(1);
        changed.tasks[0].splitting.params =
            json!({"events_per_job": 7}).as_object().cloned().unwrap();
        let err = queue.queue_work(&changed, "wf", "ops").await.unwrap_err();
        assert!(matches!(err, Error::InvariantViolation { .. }));
    }

    #[tokio::test]
    async fn global_pull_acquires_by_slots() {
        let queue = global();
        queue.queue_work(&workload(3), "wf", "ops").await.unwrap();
        let pulled = queue.pull_work(&slots("T2_XX_Site", 1)).await.unwrap();
        assert_eq!(pulled.len(), 1);
        assert_eq!(pulled[0].status, ElementStatus::Acquired);
        assert!(queue.pull_work(&slots("T2_XX_Site", 0)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn agent_reports_require_committed_elements() {
        let queue = global();
        queue.queue_work(&workload(1), "wf", "ops").await.unwrap();
        let id = queue.get_elements_for_workflow("wf").await.unwrap()[0].id.clone();
        let err = queue
            .update_element_status(&[id.clone()], ElementStatus::Running, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidStateTransition { .. }));

        queue.pull_work(&slots("T2_XX_Site", 10)).await.unwrap();
        let changed = queue
            .update_element_status(
                &[id.clone()],
                ElementStatus::Done,
                Some(Progress::new(100, 100).unwrap()),
            )
            .await
            .unwrap();
        assert_eq!(changed, 1);
        assert_eq!(
            queue.workflow_status("wf").await.unwrap(),
            Some(WorkflowStatus::Completed)
        );
    }

    #[tokio::test]
    async fn unknown_element_reported() {
        let queue = global();
        let err = queue
            .update_element_status(&[ElementId::derive(&["x"])], ElementStatus::Done, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ElementNotFound { .. }));
    }

    #[tokio::test]
    async fn global_has_no_parent() {
        assert!(global().pull_from_parent().await.unwrap_err().is_validation());
    }

    #[tokio::test]
    async fn cancel_finalises_unstarted_elements() {
        let queue = global();
        queue.queue_work(&workload(2), "wf", "ops").await.unwrap();
        assert_eq!(queue.cancel_workflow("wf").await.unwrap(), 2);
        assert_eq!(queue.cancel_workflow("wf").await.unwrap(), 0);
        let summary = queue.process_inbound_work().await.unwrap();
        assert_eq!(summary.canceled, 2);
        assert_eq!(
            queue.completed_workflows().await.unwrap(),
            BTreeSet::from(["wf".to_string()])
        );
    }

    #[tokio::test]
    async fn local_cannot_parent_itself() {
        let parent = global();
        let err = WorkQueue::local(
            QueueConfig::new("global"),
            parent.as_parent(),
            Arc::new(InMemoryElementStore::new()),
            Arc::new(InMemoryInbox::new()),
            Arc::new(NoCatalog),
        )
        .unwrap_err();
        assert!(err.is_validation());
    }
}

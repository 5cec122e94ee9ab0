//! Work queue elements and their state machine.
//!
//! ```text
//!  Available ──▶ Negotiating ──▶ Acquired ──▶ Running ──▶ Done
//!      │              │              │           │
//!      │              ├──────────────┴───────────┴──▶ Failed
//!      │              │              │           │
//!      └──────────────┴──────────────┴───────────┴──▶ CancelRequested ──▶ Canceled
//!                                                            │
//!                                                            └──▶ Done | Failed
//! ```
//!
//! `Done`, `Failed` and `Canceled` are terminal. Once an element is
//! `Acquired`, its data, splitting parameters and mask no longer change;
//! those fields are only settable while the element is being built.

use std::collections::{BTreeSet, HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use tierq_core::ElementId;
use tierq_split::mask::Mask;
use tierq_split::params::SplitAlgorithm;

use crate::error::{Error, Result};

/// Status of a work queue element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ElementStatus {
    /// Visible to pulling; not claimed by any child queue.
    Available,
    /// Claimed by a queue, not yet confirmed.
    Negotiating,
    /// Committed to a queue; jobs not yet created.
    Acquired,
    /// At least one job has started.
    Running,
    /// All work finished.
    Done,
    /// Work failed.
    Failed,
    /// Cancellation requested, not yet confirmed.
    CancelRequested,
    /// Cancellation confirmed.
    Canceled,
}

impl ElementStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [Self; 8] = [
        Self::Available,
        Self::Negotiating,
        Self::Acquired,
        Self::Running,
        Self::Done,
        Self::Failed,
        Self::CancelRequested,
        Self::Canceled,
    ];

    /// Returns true if this is a terminal status.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Canceled)
    }

    /// Returns true once the element has moved beyond `Acquired`.
    #[must_use]
    pub const fn is_past_acquired(&self) -> bool {
        !matches!(self, Self::Available | Self::Negotiating | Self::Acquired)
    }

    /// Returns true if the transition from self to target is valid.
    #[must_use]
    pub fn can_transition_to(&self, target: Self) -> bool {
        match self {
            Self::Available => matches!(target, Self::Negotiating | Self::CancelRequested),
            Self::Negotiating => {
                matches!(target, Self::Acquired | Self::Failed | Self::CancelRequested)
            }
            Self::Acquired => matches!(target, Self::Running | Self::Failed | Self::CancelRequested),
            Self::Running => matches!(target, Self::Done | Self::Failed | Self::CancelRequested),
            Self::CancelRequested => matches!(target, Self::Canceled | Self::Done | Self::Failed),
            Self::Done | Self::Failed | Self::Canceled => false,
        }
    }

    /// Returns all valid target statuses from the current status.
    #[must_use]
    pub fn valid_transitions(&self) -> Vec<Self> {
        match self {
            Self::Available => vec![Self::Negotiating, Self::CancelRequested],
            Self::Negotiating => vec![Self::Acquired, Self::Failed, Self::CancelRequested],
            Self::Acquired => vec![Self::Running, Self::Failed, Self::CancelRequested],
            Self::Running => vec![Self::Done, Self::Failed, Self::CancelRequested],
            Self::CancelRequested => vec![Self::Canceled, Self::Done, Self::Failed],
            Self::Done | Self::Failed | Self::Canceled => vec![],
        }
    }

    /// Shortest sequence of legal steps from self to `target`, excluding self.
    ///
    /// Paths through `CancelRequested` are only taken when no forward path
    /// exists, so a replicated `Done` never records a cancellation. Returns
    /// an empty path when `target == self` and `None` when `target` cannot
    /// be reached.
    #[must_use]
    pub fn path_to(&self, target: Self) -> Option<Vec<Self>> {
        if *self == target {
            return Some(Vec::new());
        }
        self.shortest_path(target, |step| {
            step != Self::CancelRequested || step == target
        })
        .or_else(|| self.shortest_path(target, |_| true))
    }

    /// Breadth-first search over legal transitions, visiting only the
    /// statuses `allowed` accepts.
    fn shortest_path(&self, target: Self, allowed: impl Fn(Self) -> bool) -> Option<Vec<Self>> {
        let mut came_from: HashMap<Self, Self> = HashMap::new();
        let mut frontier = VecDeque::from([*self]);
        while let Some(status) = frontier.pop_front() {
            for next in status.valid_transitions() {
                if next == *self || came_from.contains_key(&next) || !allowed(next) {
                    continue;
                }
                came_from.insert(next, status);
                if next == target {
                    let mut path = vec![target];
                    let mut step = target;
                    while let Some(&prev) = came_from.get(&step) {
                        if prev == *self {
                            break;
                        }
                        path.push(prev);
                        step = prev;
                    }
                    path.reverse();
                    return Some(path);
                }
                frontier.push_back(next);
            }
        }
        None
    }

    /// Returns a lowercase label suitable for metrics and logs.
    #[must_use]
    pub const fn as_label(&self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Negotiating => "negotiating",
            Self::Acquired => "acquired",
            Self::Running => "running",
            Self::Done => "done",
            Self::Failed => "failed",
            Self::CancelRequested => "cancel_requested",
            Self::Canceled => "canceled",
        }
    }
}

impl Default for ElementStatus {
    fn default() -> Self {
        Self::Available
    }
}

impl std::fmt::Display for ElementStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Available => write!(f, "Available"),
            Self::Negotiating => write!(f, "Negotiating"),
            Self::Acquired => write!(f, "Acquired"),
            Self::Running => write!(f, "Running"),
            Self::Done => write!(f, "Done"),
            Self::Failed => write!(f, "Failed"),
            Self::CancelRequested => write!(f, "CancelRequested"),
            Self::Canceled => write!(f, "Canceled"),
        }
    }
}

/// Reason for an element status transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionReason {
    /// Selected by a pull for a site with free slots.
    PulledForSite,
    /// Claim confirmed, element committed to a queue.
    ClaimConfirmed,
    /// Reported by the agent executing the work.
    AgentReported,
    /// Merged from a status update replicated by another queue.
    ReplicatedUpdate,
    /// The owning workflow was cancelled.
    WorkflowCancelled,
    /// Another child queue claimed the parent element first.
    ClaimedElsewhere,
    /// Cancellation confirmed with no work started.
    CancelConfirmed,
}

impl std::fmt::Display for TransitionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PulledForSite => write!(f, "pulled_for_site"),
            Self::ClaimConfirmed => write!(f, "claim_confirmed"),
            Self::AgentReported => write!(f, "agent_reported"),
            Self::ReplicatedUpdate => write!(f, "replicated_update"),
            Self::WorkflowCancelled => write!(f, "workflow_cancelled"),
            Self::ClaimedElsewhere => write!(f, "claimed_elsewhere"),
            Self::CancelConfirmed => write!(f, "cancel_confirmed"),
        }
    }
}

/// The input an element covers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementData {
    /// One block of the input dataset.
    Block(String),
    /// A whole dataset.
    Dataset(String),
    /// An explicit list of logical file names.
    Selection(Vec<String>),
}

impl ElementData {
    /// Stable text used to derive element ids.
    #[must_use]
    pub fn identity(&self) -> String {
        match self {
            Self::Block(name) => format!("block:{name}"),
            Self::Dataset(name) => format!("dataset:{name}"),
            Self::Selection(lfns) => format!("selection:{}", lfns.join(",")),
        }
    }
}

impl std::fmt::Display for ElementData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Block(name) | Self::Dataset(name) => f.write_str(name),
            Self::Selection(lfns) => write!(f, "{} files", lfns.len()),
        }
    }
}

/// Completion reported by the agent, in percent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    /// Share of the element's work that has finished.
    pub percent_complete: u8,
    /// Share of the element's work that has finished successfully.
    pub percent_success: u8,
}

impl Progress {
    /// Creates a progress report.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if either value exceeds 100.
    pub fn new(percent_complete: u8, percent_success: u8) -> Result<Self> {
        if percent_complete > 100 || percent_success > 100 {
            return Err(Error::validation(format!(
                "progress out of range: complete={percent_complete} success={percent_success}"
            )));
        }
        Ok(Self {
            percent_complete,
            percent_success,
        })
    }
}

/// A unit of distributable work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkQueueElement {
    /// Id derived from request, task and data.
    pub id: ElementId,
    /// Owning workflow.
    pub request_name: String,
    /// Task within the workflow.
    pub task_name: String,
    /// Current status.
    pub status: ElementStatus,
    /// Priority; higher is more urgent.
    pub priority: i64,
    /// Estimated number of jobs.
    pub jobs: u32,
    data: ElementData,
    /// Sites hosting the input data.
    #[serde(default)]
    pub data_locations: BTreeSet<String>,
    /// Sites the work may run at; empty means any.
    #[serde(default)]
    pub site_whitelist: Vec<String>,
    /// Sites the work must not run at.
    #[serde(default)]
    pub site_blacklist: Vec<String>,
    /// Team the element is routed to.
    pub team: String,
    splitting: SplitAlgorithm,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    mask: Option<Mask>,
    /// Child queue that claimed this element.
    #[serde(default)]
    pub child_queue: Option<String>,
    /// Id of the parent's element (local copies only).
    #[serde(default)]
    pub parent_queue_id: Option<ElementId>,
    /// Last parent priority propagated into this copy.
    #[serde(default)]
    pub parent_priority: Option<i64>,
    /// Last status reported to the parent.
    #[serde(default)]
    pub parent_synced_status: Option<ElementStatus>,
    /// Completion reported by the agent.
    #[serde(default)]
    pub progress: Progress,
    /// When the element was created.
    pub created_at: DateTime<Utc>,
    /// When the element was last modified.
    pub updated_at: DateTime<Utc>,
    /// Reason for the last status transition.
    #[serde(default)]
    pub last_transition_reason: Option<TransitionReason>,
    /// When the last status transition happened.
    #[serde(default)]
    pub last_transition_at: Option<DateTime<Utc>>,
    /// When the element started running.
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
}

impl WorkQueueElement {
    /// Creates an `Available` element.
    #[must_use]
    pub fn new(
        request_name: impl Into<String>,
        task_name: impl Into<String>,
        data: ElementData,
        splitting: SplitAlgorithm,
    ) -> Self {
        let request_name = request_name.into();
        let task_name = task_name.into();
        let id = ElementId::derive(&[&request_name, &task_name, &data.identity()]);
        let now = Utc::now();
        Self {
            id,
            request_name,
            task_name,
            status: ElementStatus::Available,
            priority: 0,
            jobs: 0,
            data,
            data_locations: BTreeSet::new(),
            site_whitelist: Vec::new(),
            site_blacklist: Vec::new(),
            team: String::new(),
            splitting,
            mask: None,
            child_queue: None,
            parent_queue_id: None,
            parent_priority: None,
            parent_synced_status: None,
            progress: Progress::default(),
            created_at: now,
            updated_at: now,
            last_transition_reason: None,
            last_transition_at: None,
            started_at: None,
        }
    }

    /// Sets the priority.
    #[must_use]
    pub const fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the job estimate.
    #[must_use]
    pub const fn with_jobs(mut self, jobs: u32) -> Self {
        self.jobs = jobs;
        self
    }

    /// Sets the team.
    #[must_use]
    pub fn with_team(mut self, team: impl Into<String>) -> Self {
        self.team = team.into();
        self
    }

    /// Sets the site white and black lists.
    #[must_use]
    pub fn with_sites(mut self, whitelist: Vec<String>, blacklist: Vec<String>) -> Self {
        self.site_whitelist = whitelist;
        self.site_blacklist = blacklist;
        self
    }

    /// Sets the data locations.
    #[must_use]
    pub fn with_data_locations(mut self, locations: impl IntoIterator<Item = String>) -> Self {
        self.data_locations = locations.into_iter().collect();
        self
    }

    /// Sets the mask.
    #[must_use]
    pub fn with_mask(mut self, mask: Mask) -> Self {
        self.mask = Some(mask);
        self
    }

    /// The input this element covers.
    #[must_use]
    pub const fn data(&self) -> &ElementData {
        &self.data
    }

    /// Splitting algorithm and parameters.
    #[must_use]
    pub const fn splitting(&self) -> &SplitAlgorithm {
        &self.splitting
    }

    /// Run/lumi or event restriction, if any.
    #[must_use]
    pub const fn mask(&self) -> Option<&Mask> {
        self.mask.as_ref()
    }

    /// Builds the copy a child queue keeps of this element.
    ///
    /// The copy shares the id and is linked back through `parent_queue_id`.
    #[must_use]
    pub fn local_copy(&self) -> Self {
        let now = Utc::now();
        Self {
            status: ElementStatus::Available,
            child_queue: None,
            parent_queue_id: Some(self.id.clone()),
            parent_priority: Some(self.priority),
            parent_synced_status: Some(ElementStatus::Available),
            progress: Progress::default(),
            updated_at: now,
            last_transition_reason: None,
            last_transition_at: None,
            started_at: None,
            ..self.clone()
        }
    }

    /// Transitions to a new status.
    ///
    /// # Errors
    ///
    /// Returns an error if the transition is invalid.
    #[tracing::instrument(
        skip(self),
        fields(element_id = %self.id, from = %self.status, to = %target, reason = %reason)
    )]
    pub fn transition_to(&mut self, target: ElementStatus, reason: TransitionReason) -> Result<()> {
        if !self.status.can_transition_to(target) {
            return Err(Error::InvalidStateTransition {
                from: self.status.to_string(),
                to: target.to_string(),
                reason: format!(
                    "valid transitions from {}: {:?}",
                    self.status,
                    self.status.valid_transitions()
                ),
            });
        }
        let now = Utc::now();
        if target == ElementStatus::Running {
            self.started_at = Some(now);
        }
        self.status = target;
        self.updated_at = now;
        self.last_transition_reason = Some(reason);
        self.last_transition_at = Some(now);
        Ok(())
    }

    /// Requests cancellation.
    ///
    /// Returns `Ok(false)` if the element is already cancelling or finished.
    ///
    /// # Errors
    ///
    /// Returns an error only if the state machine rejects the transition.
    pub fn request_cancel(&mut self, reason: TransitionReason) -> Result<bool> {
        if self.status == ElementStatus::CancelRequested || self.status.is_terminal() {
            return Ok(false);
        }
        self.transition_to(ElementStatus::CancelRequested, reason)?;
        Ok(true)
    }

    /// Moves to `target` along the shortest legal path.
    ///
    /// Returns `Ok(false)` when the element is already there or `target` is
    /// unreachable (a stale update).
    ///
    /// # Errors
    ///
    /// Returns an error only if the state machine rejects a step.
    pub fn advance_to(&mut self, target: ElementStatus, reason: TransitionReason) -> Result<bool> {
        match self.status.path_to(target) {
            Some(path) if path.is_empty() => Ok(false),
            Some(path) => {
                for step in path {
                    self.transition_to(step, reason)?;
                }
                Ok(true)
            }
            None => {
                warn!(element_id = %self.id, from = %self.status, to = %target, "ignoring stale status update");
                Ok(false)
            }
        }
    }

    /// Records agent-reported progress.
    pub fn set_progress(&mut self, progress: Progress) {
        self.progress = progress;
        self.updated_at = Utc::now();
    }

    /// Returns true if this element is a child queue's copy.
    #[must_use]
    pub const fn is_local_copy(&self) -> bool {
        self.parent_queue_id.is_some()
    }
}

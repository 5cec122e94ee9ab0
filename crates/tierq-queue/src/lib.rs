//! # tierq-queue
//!
//! Hierarchical work queue: a global queue holds the authoritative work,
//! local queues mirror and claim it for the sites they serve.
//!
//! This crate provides:
//!
//! - **Elements**: the unit of distributable work and its state machine
//! - **Start policies**: decomposition of a workload into elements
//! - **Replication**: inbox-based synchronisation between parent and child
//! - **Pulling**: site-constrained, priority-ordered claiming of work
//! - **Aggregation**: per-workflow status for upstream automation
//!
//! ## Guarantees
//!
//! - **Single owner**: a parent element is acquired by at most one child queue
//! - **Immutable work**: data and splitting never change once acquired
//! - **Monotonic status**: stale or backwards status reports are ignored
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::collections::BTreeMap;
//! use std::sync::Arc;
//!
//! use tierq_queue::prelude::*;
//!
//! # async fn example(catalog: Arc<dyn ResourceCatalog>, workload: WorkloadSpec) -> Result<()> {
//! let global = WorkQueue::global(
//!     QueueConfig::new("global"),
//!     Arc::new(InMemoryElementStore::new()),
//!     Arc::new(InMemoryInbox::new()),
//!     Arc::clone(&catalog),
//! )?;
//! global.queue_work(&workload, "ReReco_Run2024A", "production").await?;
//!
//! let local = WorkQueue::local(
//!     QueueConfig::new("local-fnal"),
//!     global.as_parent(),
//!     Arc::new(InMemoryElementStore::new()),
//!     Arc::new(InMemoryInbox::new()),
//!     catalog,
//! )?;
//! local.pull_from_parent().await?;
//! local.process_inbound_work().await?;
//!
//! let slots = BTreeMap::from([("T1_US_FNAL".to_string(), 100)]);
//! let acquired = local.pull_work(&slots).await?;
//! println!("acquired {} elements", acquired.len());
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod element;
pub mod error;
pub mod inbox;
pub mod metrics;
pub mod policy;
pub mod queue;
pub mod sites;
pub mod slots;
pub mod stats;
pub mod status;
pub mod store;

pub use error::{Error, Result};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::QueueConfig;
    pub use crate::element::{ElementStatus, Progress, TransitionReason, WorkQueueElement};
    pub use crate::error::{Error, Result};
    pub use crate::inbox::{InboxPayload, MergeSummary};
    pub use crate::policy::{StartPolicy, WorkloadSpec};
    pub use crate::queue::{ParentLink, QueueRole, ReplicationSummary, WorkQueue};
    pub use crate::sites::{ResourceCatalog, SiteKind};
    pub use crate::status::{aggregate, WorkflowStatus};
    pub use crate::store::memory::{InMemoryElementStore, InMemoryInbox};
    pub use crate::store::{CasResult, ElementStore, InboxStore};
}

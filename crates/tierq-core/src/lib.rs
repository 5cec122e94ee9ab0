//! # tierq-core
//!
//! Core primitives shared by every tierq crate.
//!
//! - **Identifiers**: Strongly-typed IDs for queue elements, jobs and inbox entries
//! - **Error Types**: Shared error definitions and result types
//! - **Observability**: Logging initialisation and span constructors
//!
//! ## Example
//!
//! ```rust
//! use tierq_core::prelude::*;
//!
//! // Element ids are derived from the workflow + data identity.
//! let id = ElementId::derive(&["ReReco_2024", "DataProcessing", "/A/B/RAW#1"]);
//! assert_eq!(id, ElementId::derive(&["ReReco_2024", "DataProcessing", "/A/B/RAW#1"]));
//!
//! let job = JobId::generate();
//! assert_ne!(job, JobId::generate());
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod id;
pub mod observability;

pub use error::{Error, Result};
pub use id::{ElementId, InboxEntryId, JobId};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::id::{ElementId, InboxEntryId, JobId};
    pub use crate::observability::{init_logging, LogFormat};
}

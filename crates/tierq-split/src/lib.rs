//! # tierq-split
//!
//! Run/lumi masks and job splitting for tierq.
//!
//! - **Masks**: inclusive lumi ranges per run, or an event window
//! - **Parameters**: closed, validated splitting configuration
//! - **Splitters**: lumi-based and event-based, grouped by file location
//! - **Good lumi lists**: restrict a re-split to lumis that still need work
//!
//! ## Example
//!
//! ```rust
//! use tierq_split::prelude::*;
//!
//! let files: Vec<InputFile> = (0..2)
//!     .map(|i| {
//!         InputFile::new(format!("/store/file_{i}.root"), 100)
//!             .with_run(i, [1, 2, 3])
//!             .with_location("T1_US_FNAL")
//!     })
//!     .collect();
//!
//! let params = LumiBasedParams::new(2)?;
//! let groups = LumiSplitter::new(params).split(&files, &mut JobNamer::new("wf"))?;
//! assert_eq!(groups.len(), 1);
//! assert_eq!(groups[0].len(), 4);
//! # Ok::<(), tierq_split::Error>(())
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod event_based;
pub mod factory;
pub mod file;
pub mod good_lumi;
pub mod job;
pub mod lumi_based;
pub mod mask;
pub mod params;

pub use error::{Error, Result};

use file::InputFile;
use job::{JobGroup, JobNamer};

/// A splitting algorithm turning input files into job groups.
pub trait JobSplitter {
    /// Algorithm name, as used in workload documents.
    fn algorithm(&self) -> &'static str;

    /// Splits `files` into one job group per location set.
    ///
    /// Groups without jobs are omitted.
    ///
    /// # Errors
    ///
    /// Returns an error if a mask or job invariant would be violated.
    fn split(&self, files: &[InputFile], namer: &mut JobNamer) -> Result<Vec<JobGroup>>;
}

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::event_based::EventSplitter;
    pub use crate::factory::JobFactory;
    pub use crate::file::InputFile;
    pub use crate::good_lumi::{FailedJob, FailedJobCollection, GoodLumiService, StaticGoodLumiList};
    pub use crate::job::{Job, JobGroup, JobNamer};
    pub use crate::lumi_based::LumiSplitter;
    pub use crate::mask::{LumiRange, Mask};
    pub use crate::params::{EventBasedParams, LumiBasedParams, SplitAlgorithm};
    pub use crate::JobSplitter;
}

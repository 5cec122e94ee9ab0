//! Error types for masks and job splitting.

/// The result type used throughout tierq-split.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while building masks or splitting jobs.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Splitting parameters were rejected before any work was produced.
    #[error("invalid splitting parameters: {message}")]
    Validation {
        /// Which parameter was rejected and why.
        message: String,
    },

    /// A lumi range with `first > last` was supplied.
    #[error("invalid lumi range [{first}, {last}]")]
    InvalidRange {
        /// First lumi of the range.
        first: u32,
        /// Last lumi of the range.
        last: u32,
    },

    /// A mask or job invariant would have been broken.
    #[error("invariant violation: {message}")]
    InvariantViolation {
        /// Description of the violated invariant.
        message: String,
    },

    /// The good lumi list for a task could not be retrieved.
    #[error("good lumi list unavailable for {task}: {message}")]
    GoodLumiUnavailable {
        /// Task path the list was requested for.
        task: String,
        /// Description of the failure.
        message: String,
    },

    /// A local store used by a good lumi service failed.
    #[error("storage error: {message}")]
    Storage {
        /// Description of the failure.
        message: String,
    },

    /// An error from tierq-core.
    #[error("core error: {0}")]
    Core(#[from] tierq_core::Error),
}

impl Error {
    /// Creates a validation error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Creates a storage error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Creates an invariant violation error.
    #[must_use]
    pub fn invariant(message: impl Into<String>) -> Self {
        Self::InvariantViolation {
            message: message.into(),
        }
    }
}

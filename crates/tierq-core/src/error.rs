//! Errors shared by every tierq crate.
//!
//! Only failures that can arise from core primitives live here: malformed
//! identifiers and rejected configuration. Queue and splitter crates wrap
//! this type in their own error enums.

/// The result type used throughout tierq-core.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by core primitives.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A string could not be parsed as an element, job or inbox entry id.
    #[error("invalid identifier: {message}")]
    InvalidId {
        /// What was wrong with the input.
        message: String,
    },

    /// A configuration value was missing, malformed or out of range.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl Error {
    /// Builds an [`Error::InvalidInput`].
    #[must_use]
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_problem() {
        let err = Error::InvalidId {
            message: "empty element id".into(),
        };
        assert_eq!(err.to_string(), "invalid identifier: empty element id");
        assert_eq!(
            Error::invalid_input("TIERQ_TEAMS is blank").to_string(),
            "invalid input: TIERQ_TEAMS is blank"
        );
    }
}

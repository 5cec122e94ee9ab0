//! Strongly-typed identifiers for tierq entities.
//!
//! - **Element ids** are content-derived: the same workflow + data identity
//!   always yields the same id, so a Local queue's copy of a Global element is
//!   keyed identically to its parent and re-queueing is idempotent.
//! - **Job and inbox ids** are ULIDs: lexicographically sortable by creation
//!   time and unique without coordination.
//!
//! # Example
//!
//! ```rust
//! use tierq_core::id::{ElementId, InboxEntryId};
//!
//! let element = ElementId::derive(&["wf", "task", "/Prim/Proc/TIER#abc"]);
//! assert_eq!(element.as_str().len(), 32);
//!
//! let entry = InboxEntryId::generate();
//! assert_eq!(entry, entry.to_string().parse::<InboxEntryId>().unwrap());
//! ```

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

use crate::error::{Error, Result};

/// Number of hex characters kept from the identity digest.
const ELEMENT_ID_LEN: usize = 32;

/// Identifier of a work queue element.
///
/// Derived from the workflow + data identity of the element, never random.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ElementId(String);

impl ElementId {
    /// Derives an element id from its identity parts.
    ///
    /// Parts are separated by a NUL byte before hashing so that
    /// `["ab", "c"]` and `["a", "bc"]` produce different ids.
    #[must_use]
    pub fn derive(parts: &[&str]) -> Self {
        let mut hasher = Sha256::new();
        for (i, part) in parts.iter().enumerate() {
            if i > 0 {
                hasher.update([0u8]);
            }
            hasher.update(part.as_bytes());
        }
        let digest = hex::encode(hasher.finalize());
        Self(digest[..ELEMENT_ID_LEN].to_string())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ElementId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.len() != ELEMENT_ID_LEN || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(Error::InvalidId {
                message: format!("invalid element ID '{s}': expected {ELEMENT_ID_LEN} hex chars"),
            });
        }
        Ok(Self(s.to_ascii_lowercase()))
    }
}

/// A unique identifier for a job produced by a splitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Ulid);

impl JobId {
    /// Generates a new unique job ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(Ulid::new())
    }

    /// Returns the underlying ULID.
    #[must_use]
    pub const fn as_ulid(&self) -> Ulid {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ulid::from_string(s)
            .map(Self)
            .map_err(|e| Error::InvalidId {
                message: format!("invalid job ID '{s}': {e}"),
            })
    }
}

/// Identifier of an inbox document.
///
/// Unique per entry. Merge order comes from the sequence number the inbox
/// store assigns, not from this id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InboxEntryId(Ulid);

impl InboxEntryId {
    /// Generates a new inbox entry ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(Ulid::new())
    }

    /// Returns the creation timestamp encoded in the ID.
    #[must_use]
    pub fn created_at(&self) -> chrono::DateTime<chrono::Utc> {
        let ms = self.0.timestamp_ms();
        i64::try_from(ms)
            .ok()
            .and_then(chrono::DateTime::from_timestamp_millis)
            .unwrap_or_else(chrono::Utc::now)
    }
}

impl fmt::Display for InboxEntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for InboxEntryId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ulid::from_string(s)
            .map(Self)
            .map_err(|e| Error::InvalidId {
                message: format!("invalid inbox entry ID '{s}': {e}"),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn element_id_is_deterministic() {
        let a = ElementId::derive(&["wf", "task", "block#1"]);
        let b = ElementId::derive(&["wf", "task", "block#1"]);
        assert_eq!(a, b);
        assert_ne!(a, ElementId::derive(&["wf", "task", "block#2"]));
    }

    #[test]
    fn element_id_separates_parts() {
        assert_ne!(
            ElementId::derive(&["ab", "c"]),
            ElementId::derive(&["a", "bc"])
        );
    }

    #[test]
    fn element_id_parse_roundtrip() {
        let id = ElementId::derive(&["wf"]);
        let parsed: ElementId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn element_id_rejects_garbage() {
        assert!("not-an-element".parse::<ElementId>().is_err());
    }

    #[test]
    fn job_id_roundtrip() {
        let id = JobId::generate();
        let parsed: JobId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn element_id_serializes_as_plain_string() {
        let id = ElementId::derive(&["wf"]);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
    }
}

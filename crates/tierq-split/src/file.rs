//! Input file model.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::mask::{Lumi, Mask, Run};

/// One physical input file with its run/lumi content and replica locations.
///
/// Files are built once and then only read; jobs and elements refer to them
/// by logical file name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputFile {
    /// Logical file name.
    pub lfn: String,
    /// File size in bytes.
    #[serde(default)]
    pub size: u64,
    /// Number of events in the file.
    #[serde(default)]
    pub events: u64,
    /// Lumis per run, ascending and de-duplicated.
    #[serde(default)]
    pub runs: BTreeMap<Run, Vec<Lumi>>,
    /// Sites hosting a replica.
    #[serde(default)]
    pub locations: BTreeSet<String>,
}

impl InputFile {
    /// Creates a file with no runs and no locations.
    #[must_use]
    pub fn new(lfn: impl Into<String>, events: u64) -> Self {
        Self {
            lfn: lfn.into(),
            size: 0,
            events,
            runs: BTreeMap::new(),
            locations: BTreeSet::new(),
        }
    }

    /// Adds lumis of `run` to the file.
    #[must_use]
    pub fn with_run(mut self, run: Run, lumis: impl IntoIterator<Item = Lumi>) -> Self {
        let entry = self.runs.entry(run).or_default();
        entry.extend(lumis);
        entry.sort_unstable();
        entry.dedup();
        self
    }

    /// Adds a replica location.
    #[must_use]
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.locations.insert(location.into());
        self
    }

    /// Sets the file size.
    #[must_use]
    pub const fn with_size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }

    /// Total number of lumis in the file.
    #[must_use]
    pub fn lumi_count(&self) -> usize {
        self.runs.values().map(Vec::len).sum()
    }

    /// Iterates `(run, lumi)` pairs, runs ascending then lumis ascending.
    pub fn lumis(&self) -> impl Iterator<Item = (Run, Lumi)> + '_ {
        self.runs
            .iter()
            .flat_map(|(run, lumis)| lumis.iter().map(move |lumi| (*run, *lumi)))
    }

    /// The file's content as a lumi mask.
    ///
    /// # Errors
    ///
    /// Never fails for a well-formed file; the signature follows [`Mask::add_lumi`].
    pub fn lumi_mask(&self) -> Result<Mask> {
        let mut mask = Mask::new();
        for (run, lumi) in self.lumis() {
            mask.add_lumi(run, lumi)?;
        }
        Ok(mask)
    }
}

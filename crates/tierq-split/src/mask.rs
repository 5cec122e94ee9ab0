//! Run/lumi masks.
//!
//! A [`Mask`] restricts a unit of work either to a set of lumi sections
//! (inclusive ranges per run) or to an event window (`first_event` +
//! `max_events`). The two forms are never active on the same mask.
//!
//! Ranges within a run are kept sorted, disjoint and non-touching: adding
//! `[3, 4]` to `[1, 2]` yields the single range `[1, 4]`.
//!
//! ```rust
//! use tierq_split::mask::{LumiRange, Mask};
//!
//! let mut mask = Mask::new();
//! mask.add_range(1, LumiRange::new(1, 2)?)?;
//! mask.add_range(1, LumiRange::new(3, 4)?)?;
//! mask.add_lumi(2, 10)?;
//!
//! assert_eq!(mask.ranges(1), &[LumiRange::new(1, 4)?]);
//! assert!(mask.contains(2, 10));
//! assert_eq!(mask.lumi_count(), 5);
//! # Ok::<(), tierq_split::Error>(())
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Run number.
pub type Run = u32;

/// Lumi section number within a run.
pub type Lumi = u32;

/// An inclusive range of lumi sections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "[u32; 2]", into = "[u32; 2]")]
pub struct LumiRange {
    first: Lumi,
    last: Lumi,
}

impl LumiRange {
    /// Creates a range, rejecting `first > last`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRange`] if `first > last`.
    pub fn new(first: Lumi, last: Lumi) -> Result<Self> {
        if first > last {
            return Err(Error::InvalidRange { first, last });
        }
        Ok(Self { first, last })
    }

    /// A range covering exactly one lumi.
    #[must_use]
    pub const fn single(lumi: Lumi) -> Self {
        Self {
            first: lumi,
            last: lumi,
        }
    }

    /// First lumi of the range.
    #[must_use]
    pub const fn first(&self) -> Lumi {
        self.first
    }

    /// Last lumi of the range (inclusive).
    #[must_use]
    pub const fn last(&self) -> Lumi {
        self.last
    }

    /// Number of lumis in the range.
    #[must_use]
    pub const fn len(&self) -> u64 {
        self.last as u64 - self.first as u64 + 1
    }

    /// Always false; ranges hold at least one lumi.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        false
    }

    /// Returns true if `lumi` lies within the range.
    #[must_use]
    pub const fn contains(&self, lumi: Lumi) -> bool {
        self.first <= lumi && lumi <= self.last
    }
}

impl TryFrom<[u32; 2]> for LumiRange {
    type Error = Error;

    fn try_from(value: [u32; 2]) -> Result<Self> {
        Self::new(value[0], value[1])
    }
}

impl From<LumiRange> for [u32; 2] {
    fn from(range: LumiRange) -> Self {
        [range.first, range.last]
    }
}

/// Sorts and merges overlapping or touching ranges.
fn normalize(mut ranges: Vec<LumiRange>) -> Vec<LumiRange> {
    ranges.sort_unstable();
    let mut merged: Vec<LumiRange> = Vec::with_capacity(ranges.len());
    for range in ranges {
        match merged.last_mut() {
            Some(prev) if u64::from(range.first) <= u64::from(prev.last) + 1 => {
                prev.last = prev.last.max(range.last);
            }
            _ => merged.push(range),
        }
    }
    merged
}

fn intersect_ranges(a: &[LumiRange], b: &[LumiRange]) -> Vec<LumiRange> {
    let (mut i, mut j) = (0, 0);
    let mut out = Vec::new();
    while i < a.len() && j < b.len() {
        let lo = a[i].first.max(b[j].first);
        let hi = a[i].last.min(b[j].last);
        if lo <= hi {
            out.push(LumiRange { first: lo, last: hi });
        }
        if a[i].last < b[j].last {
            i += 1;
        } else {
            j += 1;
        }
    }
    normalize(out)
}

fn subtract_ranges(a: &[LumiRange], b: &[LumiRange]) -> Vec<LumiRange> {
    let mut out = Vec::new();
    for range in a {
        let end = u64::from(range.last);
        let mut start = u64::from(range.first);
        for cut in b {
            let (cut_first, cut_last) = (u64::from(cut.first), u64::from(cut.last));
            if cut_last < start {
                continue;
            }
            if cut_first > end {
                break;
            }
            if cut_first > start {
                out.push(narrow(start, cut_first - 1));
            }
            start = cut_last + 1;
            if start > end {
                break;
            }
        }
        if start <= end {
            out.push(narrow(start, end));
        }
    }
    out
}

/// Builds a range from widened bounds that are known to fit in `u32`.
fn narrow(first: u64, last: u64) -> LumiRange {
    LumiRange {
        first: u32::try_from(first).unwrap_or(u32::MAX),
        last: u32::try_from(last).unwrap_or(u32::MAX),
    }
}

/// Run/lumi or event restriction applied to an element or a job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "MaskDocument", into = "MaskDocument")]
pub struct Mask {
    runs: BTreeMap<Run, Vec<LumiRange>>,
    first_event: Option<u64>,
    max_events: Option<u64>,
}

impl Mask {
    /// Creates an empty mask.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a lumi mask from a `run -> [[first, last], ...]` mapping.
    ///
    /// # Errors
    ///
    /// Returns an error if any range has `first > last`.
    pub fn from_run_and_lumis<I, R>(runs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (Run, R)>,
        R: IntoIterator<Item = [u32; 2]>,
    {
        let mut mask = Self::new();
        for (run, ranges) in runs {
            for pair in ranges {
                mask.add_range(run, LumiRange::try_from(pair)?)?;
            }
        }
        Ok(mask)
    }

    /// Creates an event-window mask.
    #[must_use]
    pub fn events(first_event: u64, max_events: u64) -> Self {
        Self {
            runs: BTreeMap::new(),
            first_event: Some(first_event),
            max_events: Some(max_events),
        }
    }

    /// Adds a single lumi to `run`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvariantViolation`] if this is an event mask.
    pub fn add_lumi(&mut self, run: Run, lumi: Lumi) -> Result<()> {
        self.add_range(run, LumiRange::single(lumi))
    }

    /// Adds an inclusive range to `run`, merging with neighbours.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvariantViolation`] if this is an event mask.
    pub fn add_range(&mut self, run: Run, range: LumiRange) -> Result<()> {
        if self.is_event_mask() {
            return Err(Error::invariant(
                "cannot add lumi ranges to a mask restricted by events",
            ));
        }
        let ranges = self.runs.entry(run).or_default();
        // [start, end) are the ranges overlapping or touching the new one.
        let start = ranges.partition_point(|r| u64::from(r.last) + 1 < u64::from(range.first));
        let end = ranges.partition_point(|r| u64::from(r.first) <= u64::from(range.last) + 1);
        if start == end {
            ranges.insert(start, range);
        } else {
            let merged = LumiRange {
                first: ranges[start].first.min(range.first),
                last: ranges[end - 1].last.max(range.last),
            };
            ranges.splice(start..end, [merged]);
        }
        Ok(())
    }

    /// Restricts the mask to an event window.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvariantViolation`] if lumi ranges are already present.
    pub fn set_max_and_skip_events(&mut self, max_events: u64, skip_events: u64) -> Result<()> {
        if self.has_lumis() {
            return Err(Error::invariant(
                "cannot restrict events on a mask that already holds lumi ranges",
            ));
        }
        self.max_events = Some(max_events);
        self.first_event = Some(skip_events);
        Ok(())
    }

    /// First event to process (events skipped before it).
    #[must_use]
    pub const fn first_event(&self) -> Option<u64> {
        self.first_event
    }

    /// Maximum number of events to process.
    #[must_use]
    pub const fn max_events(&self) -> Option<u64> {
        self.max_events
    }

    /// Returns true if the mask carries an event window.
    #[must_use]
    pub const fn is_event_mask(&self) -> bool {
        self.first_event.is_some() || self.max_events.is_some()
    }

    /// Returns true if the mask carries at least one lumi range.
    #[must_use]
    pub fn has_lumis(&self) -> bool {
        !self.runs.is_empty()
    }

    /// Returns true if the mask restricts nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.has_lumis() && !self.is_event_mask()
    }

    /// Returns true if `(run, lumi)` is covered by the mask.
    #[must_use]
    pub fn contains(&self, run: Run, lumi: Lumi) -> bool {
        let Some(ranges) = self.runs.get(&run) else {
            return false;
        };
        let idx = ranges.partition_point(|r| r.last < lumi);
        ranges.get(idx).is_some_and(|r| r.contains(lumi))
    }

    /// Runs present in the mask, ascending.
    pub fn runs(&self) -> impl Iterator<Item = Run> + '_ {
        self.runs.keys().copied()
    }

    /// Ranges for `run`, ascending and disjoint.
    #[must_use]
    pub fn ranges(&self, run: Run) -> &[LumiRange] {
        self.runs.get(&run).map_or(&[], Vec::as_slice)
    }

    /// Total number of lumis covered.
    #[must_use]
    pub fn lumi_count(&self) -> u64 {
        self.runs.values().flatten().map(LumiRange::len).sum()
    }

    /// Iterates every `(run, lumi)` pair in ascending order.
    pub fn iter_lumis(&self) -> impl Iterator<Item = (Run, Lumi)> + '_ {
        self.runs.iter().flat_map(|(run, ranges)| {
            ranges
                .iter()
                .flat_map(move |r| (r.first..=r.last).map(move |lumi| (*run, lumi)))
        })
    }

    /// The mask as `run -> [[first, last], ...]`.
    #[must_use]
    pub fn run_and_lumis(&self) -> BTreeMap<Run, Vec<[u32; 2]>> {
        self.runs
            .iter()
            .map(|(run, ranges)| (*run, ranges.iter().map(|r| [r.first, r.last]).collect()))
            .collect()
    }

    /// Lumis covered by either mask. Event windows are not carried over.
    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        let mut runs = self.runs.clone();
        for (run, ranges) in &other.runs {
            let entry = runs.entry(*run).or_default();
            entry.extend_from_slice(ranges);
            *entry = normalize(std::mem::take(entry));
        }
        Self {
            runs,
            ..Self::default()
        }
    }

    /// Lumis covered by both masks. Event windows are not carried over.
    #[must_use]
    pub fn intersection(&self, other: &Self) -> Self {
        let runs = self
            .runs
            .iter()
            .filter_map(|(run, ranges)| {
                let theirs = other.runs.get(run)?;
                let common = intersect_ranges(ranges, theirs);
                (!common.is_empty()).then_some((*run, common))
            })
            .collect();
        Self {
            runs,
            ..Self::default()
        }
    }

    /// Lumis covered by `self` but not by `other`. Event windows are not carried over.
    #[must_use]
    pub fn difference(&self, other: &Self) -> Self {
        let runs = self
            .runs
            .iter()
            .filter_map(|(run, ranges)| {
                let remaining = match other.runs.get(run) {
                    Some(theirs) => subtract_ranges(ranges, theirs),
                    None => ranges.clone(),
                };
                (!remaining.is_empty()).then_some((*run, remaining))
            })
            .collect();
        Self {
            runs,
            ..Self::default()
        }
    }
}

/// Persisted layout of a mask.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MaskDocument {
    #[serde(default)]
    run_and_lumis: BTreeMap<Run, Vec<[u32; 2]>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    first_event: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    max_events: Option<u64>,
}

impl TryFrom<MaskDocument> for Mask {
    type Error = Error;

    fn try_from(doc: MaskDocument) -> Result<Self> {
        let mut mask = Self::from_run_and_lumis(doc.run_and_lumis)?;
        if doc.first_event.is_some() || doc.max_events.is_some() {
            if mask.has_lumis() {
                return Err(Error::invariant(
                    "persisted mask holds both lumi ranges and an event window",
                ));
            }
            mask.first_event = doc.first_event;
            mask.max_events = doc.max_events;
        }
        Ok(mask)
    }
}

impl From<Mask> for MaskDocument {
    fn from(mask: Mask) -> Self {
        Self {
            run_and_lumis: mask.run_and_lumis(),
            first_event: mask.first_event,
            max_events: mask.max_events,
        }
    }
}

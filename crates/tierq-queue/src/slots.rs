//! Free job slots offered by sites during one pull.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Result of asking the budget for a site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotDecision {
    /// The element may be placed at `site`.
    Placed {
        /// Chosen site.
        site: String,
    },
    /// The element cannot be placed.
    Denied {
        /// Reason for denial.
        reason: SlotDenialReason,
    },
}

impl SlotDecision {
    /// Returns true if a site was chosen.
    #[must_use]
    pub const fn is_placed(&self) -> bool {
        matches!(self, Self::Placed { .. })
    }
}

/// Reason an element could not be placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotDenialReason {
    /// No offered site passes the element's site lists.
    NoEligibleSite,
    /// Eligible sites exist but none has free slots left.
    SlotsExhausted,
}

impl std::fmt::Display for SlotDenialReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoEligibleSite => write!(f, "no eligible site"),
            Self::SlotsExhausted => write!(f, "slots exhausted"),
        }
    }
}

/// Free slots per site, consumed as elements are placed.
///
/// An element is placed at the eligible site with the most free slots
/// (ties broken by site name) and consumes as many slots as it has jobs,
/// saturating at zero. A site with zero free slots takes no more elements.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotBudget {
    remaining: BTreeMap<String, u64>,
}

impl SlotBudget {
    /// Creates a budget from `(site, free slots)` pairs.
    #[must_use]
    pub fn new(resources: impl IntoIterator<Item = (String, u64)>) -> Self {
        Self {
            remaining: resources.into_iter().collect(),
        }
    }

    /// Site names in the budget.
    pub fn sites(&self) -> impl Iterator<Item = &str> {
        self.remaining.keys().map(String::as_str)
    }

    /// Free slots left at `site`.
    #[must_use]
    pub fn remaining(&self, site: &str) -> u64 {
        self.remaining.get(site).copied().unwrap_or(0)
    }

    /// Returns true if no site has free slots.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.remaining.values().all(|&slots| slots == 0)
    }

    /// Picks the best site among those for which `eligible` returns true.
    #[must_use]
    pub fn best_site(&self, mut eligible: impl FnMut(&str) -> bool) -> SlotDecision {
        let mut any_eligible = false;
        let mut best: Option<(&String, u64)> = None;
        for (site, &slots) in &self.remaining {
            if !eligible(site) {
                continue;
            }
            any_eligible = true;
            if slots == 0 {
                continue;
            }
            if best.is_none_or(|(_, most)| slots > most) {
                best = Some((site, slots));
            }
        }
        match best {
            Some((site, _)) => SlotDecision::Placed { site: site.clone() },
            None if any_eligible => SlotDecision::Denied {
                reason: SlotDenialReason::SlotsExhausted,
            },
            None => SlotDecision::Denied {
                reason: SlotDenialReason::NoEligibleSite,
            },
        }
    }

    /// Consumes `jobs` slots at `site`.
    pub fn consume(&mut self, site: &str, jobs: u32) {
        if let Some(slots) = self.remaining.get_mut(site) {
            *slots = slots.saturating_sub(u64::from(jobs));
        }
    }
}

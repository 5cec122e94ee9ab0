//! Site white/black list evaluation.
//!
//! List items are site names or patterns. Before matching, each item is
//! expanded through the [`ResourceCatalog`] into the storage or compute
//! element names of the site it names; items the catalog cannot resolve are
//! kept literally. A site is described by its own name plus its catalog
//! names, and an item matches one of those names when any of the following
//! holds:
//!
//! - the item is a shell-style glob matching the whole name
//! - the item is a substring of the name
//! - the item is a regular expression found in the name
//!
//! An item that is not a valid regular expression is only tried as glob and
//! substring. Items are compiled once per element by [`SiteListFilter`].
//!
//! Independently of the lists, work with recorded data locations only runs
//! at a site whose names include one of those locations ([`hosts_data`]).

use std::collections::HashMap;
use std::str::FromStr;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Error, Result};

/// Which catalog names describe a site.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SiteKind {
    /// Storage element host names.
    #[default]
    StorageElement,
    /// Compute element host names.
    ComputeElement,
}

impl FromStr for SiteKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "storage" | "se" | "storage_element" => Ok(Self::StorageElement),
            "compute" | "ce" | "compute_element" => Ok(Self::ComputeElement),
            other => Err(Error::validation(format!("unknown site kind: {other}"))),
        }
    }
}

/// Maps site names to the resources they run.
#[async_trait]
pub trait ResourceCatalog: Send + Sync {
    /// Storage element names of `site`.
    async fn site_name_to_storage_element(&self, site: &str) -> Result<Vec<String>>;

    /// Compute element names of `site`.
    async fn site_name_to_compute_element(&self, site: &str) -> Result<Vec<String>>;
}

/// Catalog lookups memoised for the duration of one pull.
pub struct CatalogCache<'a> {
    catalog: &'a dyn ResourceCatalog,
    kind: SiteKind,
    resolved: HashMap<String, Vec<String>>,
}

impl std::fmt::Debug for CatalogCache<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogCache")
            .field("kind", &self.kind)
            .field("resolved", &self.resolved.len())
            .finish_non_exhaustive()
    }
}

impl<'a> CatalogCache<'a> {
    /// Creates an empty cache over `catalog`.
    #[must_use]
    pub fn new(catalog: &'a dyn ResourceCatalog, kind: SiteKind) -> Self {
        Self {
            catalog,
            kind,
            resolved: HashMap::new(),
        }
    }

    /// Returns `name` followed by its catalog names.
    ///
    /// A failed or empty lookup yields just `name`.
    pub async fn names_for(&mut self, name: &str) -> Vec<String> {
        if let Some(names) = self.resolved.get(name) {
            return names.clone();
        }
        let lookup = match self.kind {
            SiteKind::StorageElement => self.catalog.site_name_to_storage_element(name).await,
            SiteKind::ComputeElement => self.catalog.site_name_to_compute_element(name).await,
        };
        let mut names = vec![name.to_string()];
        match lookup {
            Ok(found) if !found.is_empty() => names.extend(found),
            Ok(_) => {}
            Err(err) => {
                warn!(site = %name, error = %err, "catalog lookup failed; using name literally");
            }
        }
        self.resolved.insert(name.to_string(), names.clone());
        names
    }
}

/// Returns true if `pattern` matches `name` as a glob, substring or regex.
#[must_use]
pub fn pattern_matches(pattern: &str, name: &str) -> bool {
    SitePattern::new(pattern).matches(name)
}

/// A white or black list item with its regular expressions compiled.
#[derive(Debug, Clone)]
pub struct SitePattern {
    raw: String,
    glob: Option<Regex>,
    regex: Option<Regex>,
}

impl SitePattern {
    /// Compiles `pattern`; parts that are not valid expressions are skipped.
    #[must_use]
    pub fn new(pattern: &str) -> Self {
        Self {
            raw: pattern.to_string(),
            glob: Regex::new(&glob_to_regex(pattern)).ok(),
            regex: Regex::new(pattern).ok(),
        }
    }

    /// The item as written.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Returns true if the item matches `name`.
    #[must_use]
    pub fn matches(&self, name: &str) -> bool {
        name.contains(self.raw.as_str())
            || self.glob.as_ref().is_some_and(|re| re.is_match(name))
            || self.regex.as_ref().is_some_and(|re| re.is_match(name))
    }
}

impl PartialEq for SitePattern {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Eq for SitePattern {}

/// Returns true if a site known by `site_names` hosts any of `locations`.
///
/// Work without recorded locations may run anywhere.
#[must_use]
pub fn hosts_data<'a>(
    locations: impl IntoIterator<Item = &'a String>,
    site_names: &[String],
) -> bool {
    let mut locations = locations.into_iter().peekable();
    locations.peek().is_none() || locations.any(|location| site_names.contains(location))
}

/// Translates a shell glob into an anchored regular expression.
fn glob_to_regex(glob: &str) -> String {
    let mut out = String::from("^");
    let chars: Vec<char> = glob.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '[' => {
                let close = chars[i + 1..]
                    .iter()
                    .skip(1)
                    .position(|&c| c == ']')
                    .map(|p| i + 2 + p);
                if let Some(close) = close {
                    out.push('[');
                    let mut body = &chars[i + 1..close];
                    if body.first() == Some(&'!') {
                        out.push('^');
                        body = &body[1..];
                    }
                    for &c in body {
                        if c == '\\' || c == '[' {
                            out.push('\\');
                        }
                        out.push(c);
                    }
                    out.push(']');
                    i = close;
                } else {
                    out.push_str("\\[");
                }
            }
            c => out.push_str(&regex::escape(&c.to_string())),
        }
        i += 1;
    }
    out.push('$');
    out
}

/// Expanded and compiled white and black lists of one element.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SiteListFilter {
    whitelist: Vec<SitePattern>,
    blacklist: Vec<SitePattern>,
}

impl SiteListFilter {
    /// Expands both lists through `cache` and compiles every item.
    pub async fn expand(
        cache: &mut CatalogCache<'_>,
        whitelist: &[String],
        blacklist: &[String],
    ) -> Self {
        let mut expanded_white = Vec::new();
        for item in whitelist {
            expanded_white.extend(cache.names_for(item).await);
        }
        let mut expanded_black = Vec::new();
        for item in blacklist {
            expanded_black.extend(cache.names_for(item).await);
        }
        Self::from_lists(&expanded_white, &expanded_black)
    }

    /// Builds a filter from already-expanded lists.
    #[must_use]
    pub fn from_lists(whitelist: &[String], blacklist: &[String]) -> Self {
        let compile = |list: &[String]| list.iter().map(|item| SitePattern::new(item)).collect();
        Self {
            whitelist: compile(whitelist),
            blacklist: compile(blacklist),
        }
    }

    /// Returns true if a site known by `site_names` may run the work.
    ///
    /// The black list is applied first; an empty white list allows every
    /// site that is not blacklisted.
    #[must_use]
    pub fn allows(&self, site_names: &[String]) -> bool {
        let listed = |list: &[SitePattern]| {
            list.iter()
                .any(|item| site_names.iter().any(|name| item.matches(name)))
        };
        if listed(&self.blacklist) {
            return false;
        }
        self.whitelist.is_empty() || listed(&self.whitelist)
    }
}

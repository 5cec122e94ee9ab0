//! Queue configuration.

use serde::{Deserialize, Serialize};

use tierq_core::Error as CoreError;

use crate::error::Result;
use crate::sites::SiteKind;

/// Default priority given to workloads that do not carry one.
pub const DEFAULT_PRIORITY: i64 = 8000;

/// Default number of inbox entries merged per pass.
pub const DEFAULT_INBOX_BATCH_SIZE: usize = 1000;

/// Configuration of one queue instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Name of this queue; recorded as `child_queue` on claimed parent elements.
    pub queue_name: String,
    /// Teams this queue serves; empty serves every team.
    pub teams: Vec<String>,
    /// Which catalog names describe a site.
    pub site_kind: SiteKind,
    /// Inbox entries merged per `process_inbound_work` pass.
    pub inbox_batch_size: usize,
    /// Priority assumed for workloads submitted without one.
    pub default_priority: i64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            queue_name: "global".to_string(),
            teams: Vec::new(),
            site_kind: SiteKind::default(),
            inbox_batch_size: DEFAULT_INBOX_BATCH_SIZE,
            default_priority: DEFAULT_PRIORITY,
        }
    }
}

impl QueueConfig {
    /// Creates a configuration for `queue_name` with default settings.
    #[must_use]
    pub fn new(queue_name: impl Into<String>) -> Self {
        Self {
            queue_name: queue_name.into(),
            ..Self::default()
        }
    }

    /// Sets the served teams.
    #[must_use]
    pub fn with_teams(mut self, teams: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.teams = teams.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the site kind.
    #[must_use]
    pub const fn with_site_kind(mut self, kind: SiteKind) -> Self {
        self.site_kind = kind;
        self
    }

    /// Loads configuration from `TIERQ_*` environment variables.
    ///
    /// Unset variables keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable cannot be parsed or the result fails
    /// [`Self::validate`].
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Loads configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// See [`Self::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |name: &str| {
            lookup(name).and_then(|v| {
                let trimmed = v.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            })
        };
        let mut config = Self::default();

        if let Some(name) = var("TIERQ_QUEUE_NAME") {
            config.queue_name = name;
        }
        if let Some(teams) = var("TIERQ_TEAMS") {
            config.teams = teams
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(ToString::to_string)
                .collect();
        }
        if let Some(kind) = var("TIERQ_SITE_KIND") {
            config.site_kind = kind.parse().map_err(|_| {
                CoreError::invalid_input(format!(
                    "TIERQ_SITE_KIND must be one of: storage, compute (got {kind})"
                ))
            })?;
        }
        if let Some(size) = var("TIERQ_INBOX_BATCH_SIZE") {
            config.inbox_batch_size = size.parse().map_err(|e| {
                CoreError::invalid_input(format!("TIERQ_INBOX_BATCH_SIZE must be a usize: {e}"))
            })?;
        }
        if let Some(priority) = var("TIERQ_DEFAULT_PRIORITY") {
            config.default_priority = priority.parse().map_err(|e| {
                CoreError::invalid_input(format!("TIERQ_DEFAULT_PRIORITY must be an i64: {e}"))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error for an empty queue name or a zero batch size.
    pub fn validate(&self) -> Result<()> {
        if self.queue_name.trim().is_empty() {
            return Err(CoreError::invalid_input("queue name must not be empty").into());
        }
        if self.inbox_batch_size == 0 {
            return Err(CoreError::invalid_input("inbox batch size must be greater than 0").into());
        }
        Ok(())
    }

    /// Returns true if this queue serves `team`.
    #[must_use]
    pub fn serves_team(&self, team: &str) -> bool {
        self.teams.is_empty() || self.teams.iter().any(|t| t == team)
    }
}

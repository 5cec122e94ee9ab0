//! Validated splitting configuration.
//!
//! Splitting parameters arrive from workload documents as an algorithm name
//! plus a loose keyword map. They are parsed once, up front, into a closed
//! [`SplitAlgorithm`]; anything malformed is a [`Error::Validation`] before
//! a single element or job exists.
//!
//! ```rust
//! use serde_json::json;
//! use tierq_split::params::SplitAlgorithm;
//!
//! let kwargs = json!({"lumis_per_job": 3, "splitOnRun": false});
//! let algo = SplitAlgorithm::from_kwargs("LumiBased", kwargs.as_object().unwrap())?;
//! assert_eq!(algo.name(), "LumiBased");
//!
//! let bad = json!({"lumis_per_job": 0});
//! assert!(SplitAlgorithm::from_kwargs("LumiBased", bad.as_object().unwrap()).is_err());
//! # Ok::<(), tierq_split::Error>(())
//! ```

use std::num::{NonZeroU32, NonZeroU64};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Parameters for event-count splitting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventBasedParams {
    /// Events processed by each job.
    pub events_per_job: NonZeroU64,
}

impl EventBasedParams {
    /// Creates parameters, rejecting a zero event count.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if `events_per_job` is zero.
    pub fn new(events_per_job: u64) -> Result<Self> {
        let events_per_job = NonZeroU64::new(events_per_job).ok_or_else(|| {
            Error::validation("events_per_job must be positive (got 0)")
        })?;
        Ok(Self { events_per_job })
    }
}

/// Where a good lumi list is fetched from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoodLumiSource {
    /// Service location or collection id.
    pub url: String,
    /// Task path whose list is requested.
    pub task: String,
}

/// Parameters for lumi-count splitting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LumiBasedParams {
    /// Lumis assigned to each job.
    pub lumis_per_job: NonZeroU32,
    /// Close the current job at every file boundary.
    #[serde(default)]
    pub split_files_between_job: bool,
    /// Close the current job whenever the run changes.
    #[serde(default = "default_split_on_run")]
    pub split_on_run: bool,
    /// Restrict jobs to the lumis listed by this source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub good_lumi_source: Option<GoodLumiSource>,
}

const fn default_split_on_run() -> bool {
    true
}

impl LumiBasedParams {
    /// Creates parameters with the default file and run policies.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if `lumis_per_job` is zero.
    pub fn new(lumis_per_job: u32) -> Result<Self> {
        let lumis_per_job = NonZeroU32::new(lumis_per_job)
            .ok_or_else(|| Error::validation("lumis_per_job must be positive (got 0)"))?;
        Ok(Self {
            lumis_per_job,
            split_files_between_job: false,
            split_on_run: default_split_on_run(),
            good_lumi_source: None,
        })
    }

    /// Sets the file boundary policy.
    #[must_use]
    pub const fn split_files_between_job(mut self, enabled: bool) -> Self {
        self.split_files_between_job = enabled;
        self
    }

    /// Sets the run boundary policy.
    #[must_use]
    pub const fn split_on_run(mut self, enabled: bool) -> Self {
        self.split_on_run = enabled;
        self
    }

    /// Restricts splitting to a good lumi list.
    #[must_use]
    pub fn with_good_lumi_source(mut self, url: impl Into<String>, task: impl Into<String>) -> Self {
        self.good_lumi_source = Some(GoodLumiSource {
            url: url.into(),
            task: task.into(),
        });
        self
    }
}

/// A splitting algorithm together with its validated parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "algorithm", content = "params")]
pub enum SplitAlgorithm {
    /// Fixed number of events per job.
    EventBased(EventBasedParams),
    /// Fixed number of lumis per job.
    LumiBased(LumiBasedParams),
}

impl SplitAlgorithm {
    /// Algorithm name as used in workload documents.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::EventBased(_) => "EventBased",
            Self::LumiBased(_) => "LumiBased",
        }
    }

    /// Parses an algorithm name and keyword map.
    ///
    /// Recognised keys: `events_per_job` (`EventBased`); `lumis_per_job`,
    /// `split_files_between_job`, `splitOnRun`, `goodLumiListURL` and `task`
    /// (`LumiBased`). Other keys are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for an unknown algorithm, a missing
    /// required key, a value of the wrong type, or a non-positive count.
    pub fn from_kwargs(algorithm: &str, kwargs: &Map<String, Value>) -> Result<Self> {
        match algorithm {
            "EventBased" => {
                let events = required_positive(kwargs, "events_per_job")?;
                Ok(Self::EventBased(EventBasedParams::new(events)?))
            }
            "LumiBased" => {
                let lumis = required_positive(kwargs, "lumis_per_job")?;
                let lumis = u32::try_from(lumis).map_err(|_| {
                    Error::validation(format!("lumis_per_job out of range (got {lumis})"))
                })?;
                let mut params = LumiBasedParams::new(lumis)?;
                if let Some(split) = optional_bool(kwargs, "split_files_between_job")? {
                    params = params.split_files_between_job(split);
                }
                let split_on_run = match optional_bool(kwargs, "splitOnRun")? {
                    Some(value) => Some(value),
                    None => optional_bool(kwargs, "split_on_run")?,
                };
                if let Some(split) = split_on_run {
                    params = params.split_on_run(split);
                }
                if let Some(url) = optional_str(kwargs, "goodLumiListURL")? {
                    let task = optional_str(kwargs, "task")?.ok_or_else(|| {
                        Error::validation("goodLumiListURL requires a task path")
                    })?;
                    params = params.with_good_lumi_source(url, task);
                }
                Ok(Self::LumiBased(params))
            }
            other => Err(Error::validation(format!(
                "unknown splitting algorithm '{other}'"
            ))),
        }
    }
}

fn required_positive(kwargs: &Map<String, Value>, key: &str) -> Result<u64> {
    let value = kwargs
        .get(key)
        .ok_or_else(|| Error::validation(format!("missing required parameter {key}")))?;
    match value.as_i64() {
        Some(n) if n > 0 => Ok(n.unsigned_abs()),
        Some(n) => Err(Error::validation(format!("{key} must be positive (got {n})"))),
        None => value
            .as_u64()
            .filter(|n| *n > 0)
            .ok_or_else(|| Error::validation(format!("{key} must be a positive integer (got {value})"))),
    }
}

fn optional_bool(kwargs: &Map<String, Value>, key: &str) -> Result<Option<bool>> {
    match kwargs.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(other) => Err(Error::validation(format!(
            "{key} must be a boolean (got {other})"
        ))),
    }
}

fn optional_str<'a>(kwargs: &'a Map<String, Value>, key: &str) -> Result<Option<&'a str>> {
    match kwargs.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(other) => Err(Error::validation(format!(
            "{key} must be a string (got {other})"
        ))),
    }
}

//! Queue metrics.
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `tierq_element_transitions_total` | Counter | `queue`, `from_state`, `to_state` | Element status transitions |
//! | `tierq_elements_pulled_total` | Counter | `queue`, `site` | Elements acquired by a pull |
//! | `tierq_elements_replicated_total` | Counter | `queue` | Parent elements copied into a local queue |
//! | `tierq_claims_lost_total` | Counter | `queue` | Parent elements claimed by a sibling first |
//! | `tierq_inbox_merged_total` | Counter | `queue`, `kind` | Inbox entries merged |
//! | `tierq_inbox_depth` | Gauge | `queue` | Unmerged inbox entries |
//! | `tierq_status_reports_total` | Counter | `queue` | Status updates posted to a parent |
//! | `tierq_write_conflicts_total` | Counter | `queue` | Conditional writes retried after a concurrent status change |
//! | `tierq_pull_duration_seconds` | Histogram | `queue` | Time spent in one pull |
//!
//! Recording goes through the `metrics` facade; nothing is exported unless
//! the host process installs a recorder.

use std::time::{Duration, Instant};

use metrics::{counter, gauge, histogram};

/// Metric names.
pub mod names {
    /// Counter: element status transitions.
    pub const ELEMENT_TRANSITIONS_TOTAL: &str = "tierq_element_transitions_total";
    /// Counter: elements acquired by a pull.
    pub const ELEMENTS_PULLED_TOTAL: &str = "tierq_elements_pulled_total";
    /// Counter: parent elements copied into a local queue.
    pub const ELEMENTS_REPLICATED_TOTAL: &str = "tierq_elements_replicated_total";
    /// Counter: parent claims lost to a sibling.
    pub const CLAIMS_LOST_TOTAL: &str = "tierq_claims_lost_total";
    /// Counter: inbox entries merged.
    pub const INBOX_MERGED_TOTAL: &str = "tierq_inbox_merged_total";
    /// Gauge: unmerged inbox entries.
    pub const INBOX_DEPTH: &str = "tierq_inbox_depth";
    /// Counter: status updates posted to a parent.
    pub const STATUS_REPORTS_TOTAL: &str = "tierq_status_reports_total";
    /// Counter: conditional writes that found a changed status.
    pub const WRITE_CONFLICTS_TOTAL: &str = "tierq_write_conflicts_total";
    /// Histogram: pull duration in seconds.
    pub const PULL_DURATION_SECONDS: &str = "tierq_pull_duration_seconds";
}

/// Label keys.
pub mod labels {
    /// Queue name.
    pub const QUEUE: &str = "queue";
    /// Previous element status.
    pub const FROM_STATE: &str = "from_state";
    /// New element status.
    pub const TO_STATE: &str = "to_state";
    /// Site an element was placed at.
    pub const SITE: &str = "site";
    /// Inbox payload kind.
    pub const KIND: &str = "kind";
}

/// Records metrics for one queue.
#[derive(Debug, Clone)]
pub struct QueueMetrics {
    queue: String,
}

impl QueueMetrics {
    /// Creates a recorder labelled with `queue`.
    #[must_use]
    pub fn new(queue: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
        }
    }

    /// Records an element status transition.
    pub fn record_transition(&self, from_state: &str, to_state: &str) {
        counter!(
            names::ELEMENT_TRANSITIONS_TOTAL,
            labels::QUEUE => self.queue.clone(),
            labels::FROM_STATE => from_state.to_string(),
            labels::TO_STATE => to_state.to_string(),
        )
        .increment(1);
    }

    /// Records an element acquired for `site`.
    pub fn record_pulled(&self, site: &str) {
        counter!(
            names::ELEMENTS_PULLED_TOTAL,
            labels::QUEUE => self.queue.clone(),
            labels::SITE => site.to_string(),
        )
        .increment(1);
    }

    /// Records parent elements copied down.
    pub fn record_replicated(&self, count: usize) {
        counter!(names::ELEMENTS_REPLICATED_TOTAL, labels::QUEUE => self.queue.clone())
            .increment(count as u64);
    }

    /// Records a parent claim lost to a sibling queue.
    pub fn record_claim_lost(&self) {
        counter!(names::CLAIMS_LOST_TOTAL, labels::QUEUE => self.queue.clone()).increment(1);
    }

    /// Records a merged inbox entry.
    pub fn record_inbox_merge(&self, kind: &str) {
        counter!(
            names::INBOX_MERGED_TOTAL,
            labels::QUEUE => self.queue.clone(),
            labels::KIND => kind.to_string(),
        )
        .increment(1);
    }

    /// Sets the inbox depth.
    #[allow(clippy::cast_precision_loss)] // Inbox depths are small
    pub fn set_inbox_depth(&self, depth: usize) {
        gauge!(names::INBOX_DEPTH, labels::QUEUE => self.queue.clone()).set(depth as f64);
    }

    /// Records a status update posted to the parent.
    pub fn record_status_report(&self) {
        counter!(names::STATUS_REPORTS_TOTAL, labels::QUEUE => self.queue.clone()).increment(1);
    }

    /// Records a conditional write that lost to a concurrent status change.
    pub fn record_write_conflict(&self) {
        counter!(names::WRITE_CONFLICTS_TOTAL, labels::QUEUE => self.queue.clone()).increment(1);
    }

    /// Records pull duration.
    pub fn observe_pull_duration(&self, duration: Duration) {
        histogram!(names::PULL_DURATION_SECONDS, labels::QUEUE => self.queue.clone())
            .record(duration.as_secs_f64());
    }

    /// Starts timing a pull; the duration is recorded when the guard drops.
    #[must_use]
    pub fn time_pull(&self) -> TimingGuard<impl FnOnce(Duration) + '_> {
        TimingGuard::new(move |duration| self.observe_pull_duration(duration))
    }
}

/// Calls a closure with the elapsed time when dropped.
pub struct TimingGuard<F>
where
    F: FnOnce(Duration),
{
    start: Instant,
    on_drop: Option<F>,
}

impl<F> TimingGuard<F>
where
    F: FnOnce(Duration),
{
    /// Creates a guard that will call `on_drop` with the elapsed duration.
    pub fn new(on_drop: F) -> Self {
        Self {
            start: Instant::now(),
            on_drop: Some(on_drop),
        }
    }

    /// Returns the elapsed time since the guard was created.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl<F> Drop for TimingGuard<F>
where
    F: FnOnce(Duration),
{
    fn drop(&mut self) {
        if let Some(f) = self.on_drop.take() {
            f(self.start.elapsed());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_without_recorder_is_a_noop() {
        let metrics = QueueMetrics::new("global");
        metrics.record_transition("available", "negotiating");
        metrics.record_pulled("T2_CH_CERN");
        metrics.record_replicated(2);
        metrics.record_claim_lost();
        metrics.record_inbox_merge("status_update");
        metrics.set_inbox_depth(3);
        metrics.record_status_report();
        metrics.record_write_conflict();
        metrics.observe_pull_duration(Duration::from_millis(5));
    }

    #[test]
    fn timing_guard_reports_on_drop() {
        let mut recorded = None;
        {
            let guard = TimingGuard::new(|d| recorded = Some(d));
            std::thread::sleep(Duration::from_millis(5));
            assert!(guard.elapsed() >= Duration::from_millis(5));
        }
        assert!(recorded.unwrap() >= Duration::from_millis(5));
    }

    #[test]
    fn pull_timer_records() {
        let metrics = QueueMetrics::new("local");
        let guard = metrics.time_pull();
        drop(guard);
    }
}

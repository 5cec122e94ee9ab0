//! Observability infrastructure for tierq.
//!
//! Structured logging with consistent spans. Queue and splitter code logs
//! through `tracing`; binaries and tests pick the output format here.

use std::sync::Once;
use tracing::Span;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static INIT: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, Default)]
pub enum LogFormat {
    /// One JSON object per event, for log shippers.
    Json,
    /// Multi-line human-readable output.
    #[default]
    Pretty,
}

/// Installs the global `tracing` subscriber.
///
/// Only the first call has an effect. Levels come from `RUST_LOG`
/// (for example `tierq_queue=debug`), defaulting to `info`.
///
/// # Example
///
/// ```rust
/// use tierq_core::observability::{init_logging, LogFormat};
///
/// init_logging(LogFormat::Pretty);
/// ```
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        match format {
            LogFormat::Json => {
                let _ = tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().json())
                    .try_init();
            }
            LogFormat::Pretty => {
                let _ = tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().pretty())
                    .try_init();
            }
        }
    });
}

/// Creates a span for queue operations.
///
/// # Example
///
/// ```rust
/// use tierq_core::observability::queue_span;
///
/// let span = queue_span("pull_work", "local-fnal", "ReReco_2024");
/// let _guard = span.enter();
/// ```
#[must_use]
pub fn queue_span(operation: &str, queue: &str, workflow: &str) -> Span {
    tracing::info_span!("queue", op = operation, queue = queue, workflow = workflow)
}

/// Creates a span for a job splitting pass over one location group.
#[must_use]
pub fn split_span(algorithm: &str, location: &str) -> Span {
    tracing::debug_span!("split", algorithm = algorithm, location = location)
}

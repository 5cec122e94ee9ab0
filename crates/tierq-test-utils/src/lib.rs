//! Shared test utilities for tierq integration tests.
//!
//! This crate provides:
//! - [`TracingElementStore`]: in-memory element store with operation recording
//!   and failure injection
//! - [`QueueFixture`]: a global queue with local children wired together
//! - Factories for workloads, input files and resource catalogs
//! - Assertion helpers for splits and queue state
//!
//! # Example
//!
//! ```rust,ignore
//! use tierq_test_utils::{QueueFixture, WorkloadFactory};
//!
//! #[tokio::test]
//! async fn local_mirrors_global() {
//!     let fx = QueueFixture::new(&["local-a"]);
//!     fx.global.queue_work(&WorkloadFactory::rereco(2), "wf", "ops").await.unwrap();
//!     fx.sync_local(0).await;
//!     assert_eq!(fx.locals[0].get_elements_for_workflow("wf").await.unwrap().len(), 2);
//! }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
#![allow(clippy::must_use_candidate)]
// Fixtures panic on setup failures so tests stay short.
#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::missing_panics_doc)]

pub mod assertions;
pub mod fixtures;
pub mod storage;

pub use assertions::*;
pub use fixtures::*;
pub use storage::*;

/// Routes `tracing` output through the test harness; repeated calls are ignored.
pub fn init_test_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("tierq_queue=debug".parse().expect("valid directive")),
        )
        .with_test_writer()
        .try_init();
}

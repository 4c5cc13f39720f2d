//! Cluster access for halyard.
//!
//! - [`cluster`]: the [`Cluster`] trait and its event and status types
//! - [`kubectl`]: the `kubectl` subprocess backend
//! - [`fake`]: in-memory backend for tests (feature `testing`)

pub mod cluster;
pub mod error;
#[cfg(any(test, feature = "testing"))]
pub mod fake;
pub mod kubectl;

pub use cluster::{Cluster, ExecStatus, OutputSink, WatchEvent, WatchSubscription};
pub use error::ClusterError;
#[cfg(any(test, feature = "testing"))]
pub use fake::FakeCluster;
pub use kubectl::Kubectl;

//! The cluster boundary.
//!
//! Everything the sync engine needs from the container platform goes through
//! [`Cluster`]: reading and writing component resources, listing capabilities,
//! watching a single component, running commands in a pod and copying files
//! into it. The production backend shells out to `kubectl`
//! ([`crate::kubectl::Kubectl`]); tests use the in-memory fake.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use halyard_core::{Capability, Component};
use tokio::sync::{mpsc, oneshot};

use crate::error::ClusterError;

/// Output lines of a remote command are forwarded here as they arrive.
pub type OutputSink = mpsc::Sender<String>;

/// One change notification for a watched component.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent {
    Added(Component),
    Modified(Component),
    Deleted(Component),
    /// The platform reported an error on the watch stream.
    Error(String),
}

impl WatchEvent {
    pub fn component(&self) -> Option<&Component> {
        match self {
            WatchEvent::Added(c) | WatchEvent::Modified(c) | WatchEvent::Deleted(c) => Some(c),
            WatchEvent::Error(_) => None,
        }
    }
}

/// A live watch on one component.
///
/// Events arrive on `events` until the platform closes the stream. Dropping
/// the subscription (or calling [`WatchSubscription::stop`]) tells the
/// producer to shut the underlying watch down.
#[derive(Debug)]
pub struct WatchSubscription {
    pub events: mpsc::Receiver<WatchEvent>,
    stop: Option<oneshot::Sender<()>>,
}

impl WatchSubscription {
    pub fn new(events: mpsc::Receiver<WatchEvent>, stop: oneshot::Sender<()>) -> Self {
        Self {
            events,
            stop: Some(stop),
        }
    }

    /// Idempotent.
    pub fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        self.events.close();
    }
}

impl Drop for WatchSubscription {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Completion status of a remote command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecStatus {
    /// `None` when the command was killed by a signal.
    pub code: Option<i32>,
}

impl ExecStatus {
    pub fn success(self) -> bool {
        self.code == Some(0)
    }
}

#[async_trait]
pub trait Cluster: Send + Sync {
    /// Namespace every call operates in.
    fn namespace(&self) -> &str;

    /// `ClusterError::NotFound` when no such component exists.
    async fn get_component(&self, name: &str) -> Result<Component, ClusterError>;

    async fn create_component(&self, component: &Component) -> Result<Component, ClusterError>;

    async fn update_component(&self, component: &Component) -> Result<Component, ClusterError>;

    /// Apply a JSON merge patch to the named component.
    async fn patch_component(
        &self,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<Component, ClusterError>;

    async fn list_capabilities(&self) -> Result<Vec<Capability>, ClusterError>;

    /// Subscribe to changes of the component called `name`.
    ///
    /// `timeout` bounds the platform-side watch; callers still enforce their
    /// own deadline.
    async fn watch_component(
        &self,
        name: &str,
        timeout: Duration,
    ) -> Result<WatchSubscription, ClusterError>;

    /// Run `argv` in `pod`, streaming combined output lines into `output`.
    ///
    /// A non-zero exit is reported through [`ExecStatus`], not as an error;
    /// `Err` means the command could not be run at all.
    async fn exec(
        &self,
        pod: &str,
        argv: &[String],
        output: OutputSink,
    ) -> Result<ExecStatus, ClusterError>;

    /// Copy the local file `local` to `destination` inside `pod`.
    async fn upload(&self, local: &Path, pod: &str, destination: &str)
        -> Result<(), ClusterError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dropping_subscription_signals_stop() {
        let (_tx, rx) = mpsc::channel(1);
        let (stop_tx, stop_rx) = oneshot::channel();
        let subscription = WatchSubscription::new(rx, stop_tx);
        drop(subscription);
        assert!(stop_rx.await.is_ok());
    }

    #[tokio::test]
    async fn explicit_stop_is_idempotent() {
        let (_tx, rx) = mpsc::channel(1);
        let (stop_tx, stop_rx) = oneshot::channel();
        let mut subscription = WatchSubscription::new(rx, stop_tx);
        subscription.stop();
        subscription.stop();
        assert!(stop_rx.await.is_ok());
        assert!(subscription.events.recv().await.is_none());
    }

    #[test]
    fn exec_status_success_requires_zero() {
        assert!(ExecStatus { code: Some(0) }.success());
        assert!(!ExecStatus { code: Some(2) }.success());
        assert!(!ExecStatus { code: None }.success());
    }
}

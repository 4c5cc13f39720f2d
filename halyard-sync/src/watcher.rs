//! Waiting for a component to reach a phase.
//!
//! A consumer task pulls watch events one at a time and reports the outcome
//! on one of two channels; the caller races those against a deadline.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use halyard_core::{Component, Phase};
use halyard_kube::{Cluster, WatchEvent, WatchSubscription};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::error::SyncError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    Watching,
    Ready,
    Failed,
    TimedOut,
}

impl fmt::Display for WatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            WatchState::Watching => "watching",
            WatchState::Ready => "ready",
            WatchState::Failed => "failed",
            WatchState::TimedOut => "timed-out",
        };
        f.write_str(label)
    }
}

enum Verdict {
    Reached(Component),
    Failed(SyncError),
    KeepWatching,
}

fn classify(name: &str, event: WatchEvent, desired: Phase) -> Verdict {
    let component = match event {
        WatchEvent::Error(message) => {
            return Verdict::Failed(SyncError::WatchTransport {
                component: name.to_owned(),
                message,
            })
        }
        WatchEvent::Deleted(_) => return Verdict::KeepWatching,
        WatchEvent::Added(c) | WatchEvent::Modified(c) => c,
    };
    match component.phase() {
        Some(phase) if phase == desired => Verdict::Reached(component),
        Some(phase) if phase.is_terminal_failure() => Verdict::Failed(SyncError::TerminalPhase {
            component: name.to_owned(),
            phase,
            message: component.status.message.clone(),
        }),
        _ => Verdict::KeepWatching,
    }
}

async fn consume(
    mut subscription: WatchSubscription,
    name: String,
    desired: Phase,
    deadline: (Instant, Duration),
    reached: mpsc::Sender<Component>,
    failed: mpsc::Sender<SyncError>,
) {
    while let Some(event) = subscription.events.recv().await {
        match classify(&name, event, desired) {
            Verdict::Reached(component) => {
                let _ = reached.send(component).await;
                return;
            }
            Verdict::Failed(err) => {
                let _ = failed.send(err).await;
                return;
            }
            Verdict::KeepWatching => {
                tracing::trace!(component = %name, state = %WatchState::Watching, "still waiting");
            }
        }
    }
    // A stream closed at or past the deadline ended on a server-side timeout.
    let (at, timeout) = deadline;
    let err = if Instant::now() >= at {
        SyncError::Timeout {
            component: name,
            phase: desired,
            timeout,
        }
    } else {
        SyncError::WatchTransport {
            component: name,
            message: "watch closed".to_owned(),
        }
    };
    let _ = failed.send(err).await;
}

/// Aborts the consumer task, and with it the watch, when the wait ends.
struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Waits for components to reach a phase, bounded by a deadline.
#[derive(Clone)]
pub struct ReadinessWatcher {
    cluster: Arc<dyn Cluster>,
    timeout: Duration,
}

impl ReadinessWatcher {
    pub fn new(cluster: Arc<dyn Cluster>, timeout: Duration) -> Self {
        Self { cluster, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Block until `name` is observed in `desired`, a failure is reported,
    /// or the deadline passes.
    ///
    /// Phases other than `desired`, objects without a phase and deletions
    /// are ignored. `Failed` and `Unknown` end the wait with
    /// `SyncError::TerminalPhase`; an error event or a closed stream with
    /// `SyncError::WatchTransport`; the deadline with `SyncError::Timeout`.
    pub async fn wait_for(&self, name: &str, desired: Phase) -> Result<Component, SyncError> {
        let deadline = Instant::now() + self.timeout;
        let subscription = self.cluster.watch_component(name, self.timeout).await?;
        tracing::debug!(component = name, phase = %desired, timeout_secs = self.timeout.as_secs(), "watching");

        let (reached_tx, mut reached_rx) = mpsc::channel(1);
        let (failed_tx, mut failed_rx) = mpsc::channel(1);
        let _consumer = AbortOnDrop(tokio::spawn(consume(
            subscription,
            name.to_owned(),
            desired,
            (deadline, self.timeout),
            reached_tx,
            failed_tx,
        )));

        let (state, result) = tokio::select! {
            Some(component) = reached_rx.recv() => (WatchState::Ready, Ok(component)),
            Some(err) = failed_rx.recv() => (WatchState::Failed, Err(err)),
            _ = tokio::time::sleep_until(deadline) => (
                WatchState::TimedOut,
                Err(SyncError::Timeout {
                    component: name.to_owned(),
                    phase: desired,
                    timeout: self.timeout,
                }),
            ),
        };
        tracing::debug!(component = name, state = %state, "wait finished");
        result
    }

    /// Like [`wait_for`](Self::wait_for) with `Ready`, but returns at once
    /// when `component` is already `Ready` or `Running`.
    pub async fn wait_until_ready(&self, component: &Component) -> Result<Component, SyncError> {
        if component.phase().is_some_and(Phase::is_ready) {
            return Ok(component.clone());
        }
        tracing::info!(component = component.name(), "waiting for component to be ready");
        self.wait_for(component.name(), Phase::Ready).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use halyard_core::ComponentSpec;
    use halyard_kube::FakeCluster;
    use std::time::Instant;

    fn in_phase(phase: Option<Phase>) -> Component {
        let mut c = Component::new("web", ComponentSpec::default());
        c.status.phase = phase;
        c.status.pod_name = "web-0".to_owned();
        c
    }

    fn watcher(cluster: FakeCluster, timeout: Duration) -> (Arc<FakeCluster>, ReadinessWatcher) {
        let cluster = Arc::new(cluster);
        let watcher = ReadinessWatcher::new(cluster.clone(), timeout);
        (cluster, watcher)
    }

    #[tokio::test]
    async fn returns_component_once_ready() {
        let (_, w) = watcher(
            FakeCluster::default().script_watch(vec![
                WatchEvent::Added(in_phase(None)),
                WatchEvent::Modified(in_phase(Some(Phase::Pending))),
                WatchEvent::Modified(in_phase(Some(Phase::Ready))),
            ]),
            Duration::from_secs(5),
        );
        let component = w.wait_for("web", Phase::Ready).await.expect("ready");
        assert_eq!(component.phase(), Some(Phase::Ready));
    }

    #[tokio::test]
    async fn other_desired_phases_skip_ready() {
        let (_, w) = watcher(
            FakeCluster::default().script_watch(vec![
                WatchEvent::Modified(in_phase(Some(Phase::Ready))),
                WatchEvent::Deleted(in_phase(Some(Phase::Ready))),
                WatchEvent::Modified(in_phase(Some(Phase::Running))),
            ]),
            Duration::from_secs(5),
        );
        let component = w.wait_for("web", Phase::Running).await.expect("running");
        assert_eq!(component.phase(), Some(Phase::Running));
    }

    #[tokio::test]
    async fn failed_phase_is_terminal() {
        let mut failed = in_phase(Some(Phase::Failed));
        failed.status.message = "image pull backoff".to_owned();
        let (_, w) = watcher(
            FakeCluster::default().script_watch(vec![WatchEvent::Modified(failed)]),
            Duration::from_secs(5),
        );
        let err = w.wait_for("web", Phase::Ready).await.unwrap_err();
        assert!(matches!(err, SyncError::TerminalPhase { phase: Phase::Failed, .. }), "got: {err}");
        assert!(err.to_string().contains("image pull backoff"));
    }

    #[tokio::test]
    async fn unknown_phase_is_terminal() {
        let (_, w) = watcher(
            FakeCluster::default()
                .script_watch(vec![WatchEvent::Modified(in_phase(Some(Phase::Unknown)))]),
            Duration::from_secs(5),
        );
        let err = w.wait_for("web", Phase::Ready).await.unwrap_err();
        assert!(matches!(err, SyncError::TerminalPhase { phase: Phase::Unknown, .. }));
    }

    #[tokio::test]
    async fn error_event_fails_with_message() {
        let (_, w) = watcher(
            FakeCluster::default().script_watch(vec![WatchEvent::Error("gone".to_owned())]),
            Duration::from_secs(5),
        );
        let err = w.wait_for("web", Phase::Ready).await.unwrap_err();
        assert!(matches!(err, SyncError::WatchTransport { .. }));
        assert!(err.to_string().contains("gone"));
    }

    #[tokio::test]
    async fn closed_stream_is_a_transport_failure() {
        let (_, w) = watcher(
            FakeCluster::default()
                .script_watch(vec![WatchEvent::Added(in_phase(Some(Phase::Pending)))])
                .close_watch_after_script(),
            Duration::from_secs(5),
        );
        let err = w.wait_for("web", Phase::Ready).await.unwrap_err();
        assert!(err.to_string().contains("watch closed"), "got: {err}");
    }

    #[tokio::test]
    async fn silent_watch_times_out_and_is_stopped() {
        let (cluster, w) = watcher(FakeCluster::default(), Duration::from_millis(100));
        let started = Instant::now();
        let err = w.wait_for("web", Phase::Ready).await.unwrap_err();
        let elapsed = started.elapsed();

        assert!(matches!(err, SyncError::Timeout { .. }), "got: {err}");
        assert!(elapsed >= Duration::from_millis(100), "returned early: {elapsed:?}");
        assert!(elapsed < Duration::from_secs(2), "returned late: {elapsed:?}");

        for _ in 0..50 {
            if cluster.stopped_watches() == 1 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("watch was not stopped after timing out");
    }

    #[tokio::test]
    async fn stream_closing_at_the_deadline_is_a_timeout() {
        // The platform ends the watch on its own timeout, just as ours expires.
        let timeout = Duration::from_millis(150);
        let (_, w) = watcher(
            FakeCluster::default()
                .script_watch(vec![WatchEvent::Modified(in_phase(Some(Phase::Pending)))])
                .with_watch_delay(timeout)
                .close_watch_after_script(),
            timeout,
        );
        let err = w.wait_for("web", Phase::Ready).await.unwrap_err();
        assert!(
            matches!(err, SyncError::Timeout { phase: Phase::Ready, .. }),
            "got: {err}"
        );
    }

    #[tokio::test]
    async fn watch_setup_failure_is_reported() {
        let (_, w) = watcher(
            FakeCluster::default().fail_watch("forbidden"),
            Duration::from_secs(1),
        );
        let err = w.wait_for("web", Phase::Ready).await.unwrap_err();
        assert!(matches!(err, SyncError::Cluster(_)), "got: {err}");
    }

    #[tokio::test]
    async fn ready_or_running_short_circuits() {
        let (cluster, w) = watcher(FakeCluster::default(), Duration::from_millis(50));
        for phase in [Phase::Ready, Phase::Running] {
            let c = w.wait_until_ready(&in_phase(Some(phase))).await.expect("ready");
            assert_eq!(c.phase(), Some(phase));
        }
        assert_eq!(cluster.stopped_watches(), 0);
    }
}

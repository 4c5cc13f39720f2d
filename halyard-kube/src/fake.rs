//! In-memory [`Cluster`] for tests.
//!
//! Records every call so tests can assert on what would have been sent to the
//! platform. Watches replay a scripted list of events, applying each one to
//! the stored components; with nothing scripted a watch stays silent until
//! it is stopped.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use halyard_core::{Capability, Component};
use tokio::sync::{mpsc, oneshot};

use crate::cluster::{Cluster, ExecStatus, OutputSink, WatchEvent, WatchSubscription};
use crate::error::{io_err, ClusterError};

/// A file copied into a pod.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upload {
    pub local: PathBuf,
    pub pod: String,
    pub destination: String,
    pub contents: Vec<u8>,
}

#[derive(Debug, Clone)]
struct ExecRule {
    pattern: String,
    code: i32,
    output: Vec<String>,
}

#[derive(Debug, Default)]
struct State {
    components: BTreeMap<String, Component>,
    snapshots: VecDeque<Component>,
    capabilities: Vec<Capability>,
    created: Vec<Component>,
    patches: Vec<(String, serde_json::Value)>,
    exec_log: Vec<Vec<String>>,
    uploads: Vec<Upload>,
    files: BTreeSet<String>,
    exec_rules: Vec<ExecRule>,
    broken_exec: Vec<String>,
    watch_script: Vec<WatchEvent>,
    watch_delay: Duration,
    close_watch: bool,
    watch_failure: Option<String>,
}

#[derive(Debug)]
pub struct FakeCluster {
    namespace: String,
    state: Arc<Mutex<State>>,
    stopped_watches: Arc<AtomicUsize>,
}

impl Default for FakeCluster {
    fn default() -> Self {
        Self::new("test")
    }
}

impl FakeCluster {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            state: Arc::new(Mutex::new(State::default())),
            stopped_watches: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        lock(&self.state)
    }

    // -- setup ---------------------------------------------------------------

    pub fn with_component(self, component: Component) -> Self {
        self.state()
            .components
            .insert(component.name().to_owned(), component);
        self
    }

    /// Answer the next get of this component's name with `snapshot` instead
    /// of the stored state, as if it changed right after being read.
    pub fn serve_once(self, snapshot: Component) -> Self {
        self.state().snapshots.push_back(snapshot);
        self
    }

    pub fn with_capability(self, capability: Capability) -> Self {
        self.state().capabilities.push(capability);
        self
    }

    /// Make `path` exist inside every pod.
    pub fn with_file(self, path: impl Into<String>) -> Self {
        self.state().files.insert(path.into());
        self
    }

    /// Commands whose rendered argv contains `pattern` exit with `code`
    /// after printing `output`.
    pub fn fail_exec(self, pattern: impl Into<String>, code: i32, output: &[&str]) -> Self {
        self.state().exec_rules.push(ExecRule {
            pattern: pattern.into(),
            code,
            output: output.iter().map(|s| (*s).to_owned()).collect(),
        });
        self
    }

    /// Commands whose rendered argv contains `pattern` cannot be run at all.
    pub fn break_exec(self, pattern: impl Into<String>) -> Self {
        self.state().broken_exec.push(pattern.into());
        self
    }

    /// Events replayed, in order, by the next watch.
    pub fn script_watch(self, events: Vec<WatchEvent>) -> Self {
        self.state().watch_script = events;
        self
    }

    /// Pause before each scripted event.
    pub fn with_watch_delay(self, delay: Duration) -> Self {
        self.state().watch_delay = delay;
        self
    }

    /// Close the event stream once the script is exhausted instead of
    /// staying silent.
    pub fn close_watch_after_script(self) -> Self {
        self.state().close_watch = true;
        self
    }

    /// Make `watch_component` itself fail.
    pub fn fail_watch(self, message: impl Into<String>) -> Self {
        self.state().watch_failure = Some(message.into());
        self
    }

    // -- inspection ----------------------------------------------------------

    pub fn component(&self, name: &str) -> Option<Component> {
        self.state().components.get(name).cloned()
    }

    pub fn created(&self) -> Vec<Component> {
        self.state().created.clone()
    }

    pub fn patches(&self) -> Vec<(String, serde_json::Value)> {
        self.state().patches.clone()
    }

    pub fn exec_log(&self) -> Vec<Vec<String>> {
        self.state().exec_log.clone()
    }

    pub fn uploads(&self) -> Vec<Upload> {
        self.state().uploads.clone()
    }

    /// Number of watches whose consumer asked them to stop.
    pub fn stopped_watches(&self) -> usize {
        self.stopped_watches.load(Ordering::SeqCst)
    }

    fn not_found(&self, kind: &'static str, name: &str) -> ClusterError {
        ClusterError::NotFound {
            kind,
            name: name.to_owned(),
            namespace: self.namespace.clone(),
        }
    }
}

#[async_trait]
impl Cluster for FakeCluster {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn get_component(&self, name: &str) -> Result<Component, ClusterError> {
        let snapshot = {
            let mut state = self.state();
            let queued = state.snapshots.iter().position(|c| c.name() == name);
            queued.and_then(|i| state.snapshots.remove(i))
        };
        match snapshot {
            Some(component) => Ok(component),
            None => self
                .component(name)
                .ok_or_else(|| self.not_found("component", name)),
        }
    }

    async fn create_component(&self, component: &Component) -> Result<Component, ClusterError> {
        let mut state = self.state();
        if state.components.contains_key(component.name()) {
            return Err(ClusterError::Command {
                command: format!("create component {}", component.name()),
                stderr: "AlreadyExists".to_owned(),
            });
        }
        state
            .components
            .insert(component.name().to_owned(), component.clone());
        state.created.push(component.clone());
        Ok(component.clone())
    }

    async fn update_component(&self, component: &Component) -> Result<Component, ClusterError> {
        let mut state = self.state();
        let Some(slot) = state.components.get_mut(component.name()) else {
            return Err(self.not_found("component", component.name()));
        };
        *slot = component.clone();
        Ok(component.clone())
    }

    async fn patch_component(
        &self,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<Component, ClusterError> {
        let mut state = self.state();
        let Some(current) = state.components.get(name) else {
            return Err(self.not_found("component", name));
        };
        let decode = |source| ClusterError::Decode {
            context: format!("patched component '{name}'"),
            source,
        };
        let mut document = serde_json::to_value(current).map_err(decode)?;
        merge_patch(&mut document, patch);
        let patched: Component = serde_json::from_value(document).map_err(decode)?;
        state.components.insert(name.to_owned(), patched.clone());
        state.patches.push((name.to_owned(), patch.clone()));
        Ok(patched)
    }

    async fn list_capabilities(&self) -> Result<Vec<Capability>, ClusterError> {
        Ok(self.state().capabilities.clone())
    }

    async fn watch_component(
        &self,
        _name: &str,
        _timeout: Duration,
    ) -> Result<WatchSubscription, ClusterError> {
        let (script, delay, close) = {
            let mut state = self.state();
            if let Some(message) = &state.watch_failure {
                return Err(ClusterError::Watch(message.clone()));
            }
            (
                std::mem::take(&mut state.watch_script),
                state.watch_delay,
                state.close_watch,
            )
        };

        let (event_tx, event_rx) = mpsc::channel(script.len().max(1));
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let stopped = Arc::clone(&self.stopped_watches);
        let shared = Arc::clone(&self.state);

        tokio::spawn(async move {
            for event in script {
                tokio::select! {
                    _ = &mut stop_rx => {
                        stopped.fetch_add(1, Ordering::SeqCst);
                        return;
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
                apply_event(&mut lock(&shared), &event);
                if event_tx.send(event).await.is_err() {
                    break;
                }
            }
            if close {
                return;
            }
            // Silent until told to stop; keeps the sender alive meanwhile.
            if stop_rx.await.is_ok() {
                stopped.fetch_add(1, Ordering::SeqCst);
            }
            drop(event_tx);
        });

        Ok(WatchSubscription::new(event_rx, stop_tx))
    }

    async fn exec(
        &self,
        _pod: &str,
        argv: &[String],
        output: OutputSink,
    ) -> Result<ExecStatus, ClusterError> {
        let rendered = argv.join(" ");
        let (code, lines) = {
            let mut state = self.state();
            state.exec_log.push(argv.to_vec());

            if state.broken_exec.iter().any(|p| rendered.contains(p.as_str())) {
                return Err(ClusterError::Command {
                    command: rendered,
                    stderr: "connection refused".to_owned(),
                });
            }

            match argv {
                [test, flag, path] if test == "test" && (flag == "-e" || flag == "-f") => {
                    (i32::from(!state.files.contains(path)), Vec::new())
                }
                _ => state
                    .exec_rules
                    .iter()
                    .find(|rule| rendered.contains(rule.pattern.as_str()))
                    .map(|rule| (rule.code, rule.output.clone()))
                    .unwrap_or((0, Vec::new())),
            }
        };

        for line in lines {
            if output.send(line).await.is_err() {
                break;
            }
        }
        Ok(ExecStatus { code: Some(code) })
    }

    async fn upload(
        &self,
        local: &Path,
        pod: &str,
        destination: &str,
    ) -> Result<(), ClusterError> {
        let contents = tokio::fs::read(local)
            .await
            .map_err(|e| io_err(local, e))?;
        let mut state = self.state();
        state.files.insert(destination.to_owned());
        state.uploads.push(Upload {
            local: local.to_path_buf(),
            pod: pod.to_owned(),
            destination: destination.to_owned(),
            contents,
        });
        Ok(())
    }
}

fn lock(state: &Mutex<State>) -> MutexGuard<'_, State> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Keep the stored components in step with what a watch reports.
fn apply_event(state: &mut State, event: &WatchEvent) {
    match event {
        WatchEvent::Added(c) | WatchEvent::Modified(c) => {
            state.components.insert(c.name().to_owned(), c.clone());
        }
        WatchEvent::Deleted(c) => {
            state.components.remove(c.name());
        }
        WatchEvent::Error(_) => {}
    }
}

/// RFC 7386 JSON merge patch.
fn merge_patch(target: &mut serde_json::Value, patch: &serde_json::Value) {
    let serde_json::Value::Object(patch) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = serde_json::Value::Object(serde_json::Map::new());
    }
    if let serde_json::Value::Object(map) = target {
        for (key, value) in patch {
            if value.is_null() {
                map.remove(key);
            } else {
                merge_patch(
                    map.entry(key.clone()).or_insert(serde_json::Value::Null),
                    value,
                );
            }
        }
    }
}

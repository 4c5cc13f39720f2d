//! Push pipeline shared by the CLI commands.
//!
//! A push resolves the component (creating it from the local descriptor when
//! the cluster does not know it yet), prepares the payload, decides whether
//! anything changed, pushes through the remote executor and finally records
//! the new revision. Each stage aborts the rest on failure; nothing already
//! done is rolled back, so a failed revision patch leaves new content in the
//! pod under the old revision. The marker probe lets the next push notice a
//! pod that lost its payload.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use halyard_core::types::validate_name;
use halyard_core::{descriptor, Component, DeploymentMode, Phase, Settings};
use halyard_kube::Cluster;
use serde_json::json;
use tempfile::TempDir;

use crate::archive::{archive, ArchiveOptions};
use crate::capability::auto_bind;
use crate::error::{io_err, SyncError};
use crate::executor::{PushPlan, RemoteExecutor, Step};
use crate::revision::{compute_revision, needs_push, probe_marker};
use crate::watcher::ReadinessWatcher;

/// What to push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushTarget {
    /// Component directory on the local machine.
    pub dir: PathBuf,
    /// Component name; the directory's base name when unset.
    pub name: Option<String>,
    /// Push the packaged artifact instead of the sources.
    pub binary: bool,
}

impl PushTarget {
    pub fn source(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            name: None,
            binary: false,
        }
    }

    pub fn binary(dir: impl Into<PathBuf>) -> Self {
        Self {
            binary: true,
            ..Self::source(dir)
        }
    }

    /// The component name this target refers to.
    pub fn component_name(&self) -> Result<String, SyncError> {
        let name = match &self.name {
            Some(name) => name.clone(),
            None => self
                .dir
                .canonicalize()
                .map_err(|e| io_err(&self.dir, e))?
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        };
        validate_name(&name)?;
        Ok(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    /// The pod already runs this revision.
    NothingToPush { name: String, revision: String },
    Pushed {
        name: String,
        revision: String,
        pod: String,
    },
}

/// Per-invocation state of one push. Dropping it removes the scratch archive.
struct SyncState {
    component: Component,
    payload: PathBuf,
    revision: String,
    _scratch: Option<TempDir>,
}

pub struct Pusher {
    cluster: Arc<dyn Cluster>,
    settings: Settings,
    watcher: ReadinessWatcher,
    executor: RemoteExecutor,
    plan: PushPlan,
}

impl Pusher {
    pub fn new(cluster: Arc<dyn Cluster>, settings: &Settings) -> Self {
        Self {
            watcher: ReadinessWatcher::new(cluster.clone(), settings.watch_timeout()),
            executor: RemoteExecutor::new(cluster.clone()),
            plan: PushPlan::new(&settings.container),
            settings: settings.clone(),
            cluster,
        }
    }

    pub fn watcher(&self) -> &ReadinessWatcher {
        &self.watcher
    }

    pub async fn push(&self, target: &PushTarget) -> Result<PushOutcome, SyncError> {
        let name = target.component_name()?;
        let component = self.resolve_component(&name, &target.dir).await?;
        let state = self.prepare(target, component)?;
        let name = state.component.name().to_owned();

        let marker =
            probe_marker(&*self.cluster, &state.component, &self.settings.container.marker_path)
                .await;
        if !needs_push(&state.revision, &state.component, marker) {
            tracing::info!(component = %name, revision = %state.revision, "nothing to push");
            return Ok(PushOutcome::NothingToPush {
                name,
                revision: state.revision,
            });
        }

        // Re-read: the component may have regressed, or its pod been
        // replaced, since it was resolved.
        let current = self.cluster.get_component(&name).await?;
        let component = self.watcher.wait_until_ready(&current).await?;
        let pod = component
            .pod_name()
            .ok_or_else(|| SyncError::NoPod(name.clone()))?
            .to_owned();

        let steps: Vec<Step> = if target.binary {
            self.plan.binary(&state.payload)
        } else {
            self.plan.source(&name, &state.payload)
        };
        tracing::info!(component = %name, pod = %pod, steps = steps.len(), "pushing");
        self.executor.run_sequence(&pod, &steps).await?;

        let patch = json!({ "spec": { "revision": state.revision } });
        self.cluster.patch_component(&name, &patch).await?;
        tracing::info!(component = %name, revision = %state.revision, "revision recorded");

        Ok(PushOutcome::Pushed {
            name,
            revision: state.revision,
            pod,
        })
    }

    /// Merge-patch the component's deployment mode.
    pub async fn switch_mode(
        &self,
        name: &str,
        mode: DeploymentMode,
    ) -> Result<Component, SyncError> {
        let patch = json!({ "spec": { "deploymentMode": mode.to_string() } });
        let component = self.cluster.patch_component(name, &patch).await?;
        tracing::info!(component = name, mode = %mode, "deployment mode switched");
        Ok(component)
    }

    /// Fetch the component, creating it from the local descriptor if absent.
    async fn resolve_component(&self, name: &str, dir: &Path) -> Result<Component, SyncError> {
        match self.cluster.get_component(name).await {
            Ok(component) => Ok(component),
            Err(err) if err.is_not_found() => {
                let path = descriptor::descriptor_path(dir, &self.settings.descriptor);
                tracing::info!(component = name, descriptor = %path.display(), "component not found, creating it");
                let mut component = descriptor::load(&path)?.component(name)?;
                let candidates = self.cluster.list_capabilities().await?;
                auto_bind(&mut component, &candidates);
                let created = self.cluster.create_component(&component).await?;
                self.watcher.wait_for(created.name(), Phase::Ready).await
            }
            Err(err) => Err(err.into()),
        }
    }

    fn prepare(&self, target: &PushTarget, component: Component) -> Result<SyncState, SyncError> {
        let (payload, scratch) = if target.binary {
            let dir = target.dir.join(&self.settings.artifact.dir);
            (find_artifact(&dir, &self.settings.artifact.suffix)?, None)
        } else {
            let scratch = tempfile::Builder::new()
                .prefix("halyard-")
                .tempdir()
                .map_err(|e| io_err(std::env::temp_dir(), e))?;
            let destination = scratch.path().join(format!("{}.tar", component.name()));
            let options = ArchiveOptions::from(&self.settings.archive);
            (archive(&target.dir, &options, &destination)?, Some(scratch))
        };
        let revision = compute_revision(&payload)?;
        tracing::debug!(component = component.name(), payload = %payload.display(), revision = %revision, "payload ready");
        Ok(SyncState {
            component,
            payload,
            revision,
            _scratch: scratch,
        })
    }
}

/// The most recently modified file in `dir` whose name ends with `suffix`.
pub fn find_artifact(dir: &Path, suffix: &str) -> Result<PathBuf, SyncError> {
    let not_found = || SyncError::ArtifactNotFound {
        dir: dir.to_path_buf(),
        suffix: suffix.to_owned(),
    };
    let listing = match std::fs::read_dir(dir) {
        Ok(listing) => listing,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(not_found()),
        Err(e) => return Err(io_err(dir, e)),
    };

    let mut newest: Option<(SystemTime, PathBuf)> = None;
    for entry in listing {
        let entry = entry.map_err(|e| io_err(dir, e))?;
        let path = entry.path();
        if !entry.file_name().to_string_lossy().ends_with(suffix) {
            continue;
        }
        let metadata = entry.metadata().map_err(|e| io_err(&path, e))?;
        if !metadata.is_file() {
            continue;
        }
        let modified = metadata.modified().map_err(|e| io_err(&path, e))?;
        if newest.as_ref().map_or(true, |(seen, _)| modified > *seen) {
            newest = Some((modified, path));
        }
    }
    newest.map(|(_, path)| path).ok_or_else(not_found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::FileTime;
    use halyard_core::CoreError;
    use tempfile::TempDir;

    #[test]
    fn newest_matching_artifact_wins() {
        let dir = TempDir::new().unwrap();
        let old = dir.path().join("app-1.0.jar");
        let new = dir.path().join("app-1.1.jar");
        let other = dir.path().join("notes.txt");
        for path in [&old, &new, &other] {
            std::fs::write(path, b"x").unwrap();
        }
        filetime::set_file_mtime(&old, FileTime::from_unix_time(1_000, 0)).unwrap();
        filetime::set_file_mtime(&new, FileTime::from_unix_time(2_000, 0)).unwrap();
        filetime::set_file_mtime(&other, FileTime::from_unix_time(3_000, 0)).unwrap();

        assert_eq!(find_artifact(dir.path(), ".jar").unwrap(), new);
    }

    #[test]
    fn missing_artifact_dir_is_not_found() {
        let dir = TempDir::new().unwrap();
        let err = find_artifact(&dir.path().join("target"), ".jar").unwrap_err();
        assert!(matches!(err, SyncError::ArtifactNotFound { .. }), "got: {err}");
        assert!(err.to_string().contains(".jar"));
    }

    #[test]
    fn component_name_defaults_to_dir_name() {
        let root = TempDir::new().unwrap();
        let dir = root.path().join("client-sb");
        std::fs::create_dir(&dir).unwrap();
        assert_eq!(PushTarget::source(&dir).component_name().unwrap(), "client-sb");

        let named = PushTarget {
            name: Some("Bad_Name".to_owned()),
            ..PushTarget::source(&dir)
        };
        assert!(matches!(
            named.component_name(),
            Err(SyncError::Core(CoreError::InvalidName { .. }))
        ));
    }
}

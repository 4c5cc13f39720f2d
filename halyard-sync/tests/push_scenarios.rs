//! End-to-end push flows against the in-memory cluster.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use halyard_core::{Component, ComponentSpec, DeploymentMode, Phase, Settings};
use halyard_kube::{FakeCluster, WatchEvent};
use halyard_sync::revision::compute_revision;
use halyard_sync::{archive, ArchiveOptions, PushOutcome, PushTarget, Pusher, SyncError};
use tempfile::TempDir;

const SUPERVISOR: &str = "/var/lib/supervisord/bin/supervisord";

fn settings() -> Settings {
    Settings {
        watch_timeout_secs: 5,
        ..Settings::default()
    }
}

/// `<tmp>/web` with a tiny source tree and a descriptor.
fn workspace() -> (TempDir, PathBuf) {
    let root = TempDir::new().expect("tempdir");
    let dir = root.path().join("web");
    std::fs::create_dir_all(dir.join("src")).unwrap();
    std::fs::write(dir.join("src/Main.java"), b"class Main {}").unwrap();
    std::fs::write(
        dir.join("component.yml"),
        "kind: Component\nmetadata:\n  name: web\nspec:\n  runtime: spring-boot\n  port: 8080\n",
    )
    .unwrap();
    (root, dir)
}

fn ready(revision: &str) -> Component {
    let mut c = Component::new(
        "web",
        ComponentSpec {
            revision: revision.to_owned(),
            ..ComponentSpec::default()
        },
    );
    c.status.phase = Some(Phase::Ready);
    c.status.pod_name = "web-0".to_owned();
    c
}

fn source_revision(dir: &Path) -> String {
    let out = TempDir::new().unwrap();
    let tar = archive(dir, &ArchiveOptions::default(), &out.path().join("web.tar")).unwrap();
    compute_revision(&tar).unwrap()
}

fn commands(cluster: &FakeCluster) -> Vec<String> {
    cluster.exec_log().iter().map(|argv| argv.join(" ")).collect()
}

#[tokio::test]
async fn unchanged_sources_are_not_pushed() {
    let (_root, dir) = workspace();
    let revision = source_revision(&dir);
    let cluster = Arc::new(
        FakeCluster::default()
            .with_component(ready(&revision))
            .with_file("/deployments/app.jar"),
    );

    let outcome = Pusher::new(cluster.clone(), &settings())
        .push(&PushTarget::source(&dir))
        .await
        .expect("push");

    assert_eq!(
        outcome,
        PushOutcome::NothingToPush {
            name: "web".to_owned(),
            revision,
        }
    );
    assert_eq!(commands(&cluster), vec!["test -e /deployments/app.jar"]);
    assert!(cluster.uploads().is_empty());
    assert!(cluster.patches().is_empty());
}

#[tokio::test]
async fn missing_component_is_created_from_descriptor_then_pushed() {
    let (_root, dir) = workspace();
    let cluster = Arc::new(
        FakeCluster::default()
            .script_watch(vec![
                WatchEvent::Added(Component::new("web", ComponentSpec::default())),
                WatchEvent::Modified(ready("")),
            ])
            .with_watch_delay(Duration::from_millis(5)),
    );

    let outcome = Pusher::new(cluster.clone(), &settings())
        .push(&PushTarget::source(&dir))
        .await
        .expect("push");

    let created = cluster.created();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].spec.runtime, "spring-boot");
    assert_eq!(created[0].spec.port, Some(8080));

    let PushOutcome::Pushed { name, revision, pod } = outcome else {
        panic!("expected a push, got {outcome:?}");
    };
    assert_eq!(name, "web");
    assert_eq!(pod, "web-0");
    assert_eq!(revision, source_revision(&dir));

    let uploads = cluster.uploads();
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].destination, "/tmp/web.tar");
    assert!(!uploads[0].local.exists(), "scratch archive must be removed");

    let ran = commands(&cluster);
    assert_eq!(ran.first().map(String::as_str), Some("test -e /deployments/app.jar"));
    assert!(ran.contains(&"tar xmf /tmp/web.tar -C /usr/src".to_owned()));
    assert_eq!(ran.last(), Some(&format!("{SUPERVISOR} ctl start run")));

    let patches = cluster.patches();
    assert_eq!(patches.len(), 1);
    assert_eq!(patches[0].1["spec"]["revision"], revision.as_str());
    assert_eq!(cluster.component("web").unwrap().spec.revision, revision);
}

#[tokio::test]
async fn lost_payload_is_pushed_again() {
    let (_root, dir) = workspace();
    std::fs::create_dir_all(dir.join("target")).unwrap();
    std::fs::write(dir.join("target/web-1.0.jar"), b"fat jar").unwrap();
    let revision = compute_revision(&dir.join("target/web-1.0.jar")).unwrap();

    // Same revision, but the pod restarted and no longer has the jar.
    let cluster = Arc::new(FakeCluster::default().with_component(ready(&revision)));

    let outcome = Pusher::new(cluster.clone(), &settings())
        .push(&PushTarget::binary(&dir))
        .await
        .expect("push");

    assert!(matches!(outcome, PushOutcome::Pushed { .. }), "got {outcome:?}");
    let uploads = cluster.uploads();
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].destination, "/deployments/app.jar");
    assert_eq!(uploads[0].contents, b"fat jar");
}

#[tokio::test]
async fn failed_build_aborts_before_recording_revision() {
    let (_root, dir) = workspace();
    let cluster = Arc::new(
        FakeCluster::default()
            .with_component(ready("stale"))
            .fail_exec("ctl start build", 1, &["build: ERROR (spawn error)"]),
    );

    let err = Pusher::new(cluster.clone(), &settings())
        .push(&PushTarget::source(&dir))
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::RemoteCommand { .. }), "got: {err}");
    assert!(err.to_string().contains("spawn error"));
    assert!(cluster.patches().is_empty());
    assert!(!commands(&cluster).iter().any(|c| c.ends_with("ctl start run")));
}

#[tokio::test]
async fn push_targets_the_pod_the_component_has_now() {
    let (_root, dir) = workspace();
    let mut replaced = ready("stale");
    replaced.status.phase = Some(Phase::Pending);
    replaced.status.pod_name = "web-1".to_owned();
    let mut ready_again = replaced.clone();
    ready_again.status.phase = Some(Phase::Ready);

    // First read still sees the old pod; the cluster has moved on since.
    let cluster = Arc::new(
        FakeCluster::default()
            .with_component(replaced)
            .serve_once(ready("stale"))
            .script_watch(vec![WatchEvent::Modified(ready_again)]),
    );

    let outcome = Pusher::new(cluster.clone(), &settings())
        .push(&PushTarget::source(&dir))
        .await
        .expect("push");

    let PushOutcome::Pushed { pod, .. } = outcome else {
        panic!("expected a push, got {outcome:?}");
    };
    assert_eq!(pod, "web-1");
    let uploads = cluster.uploads();
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].pod, "web-1");
}

#[tokio::test]
async fn component_that_never_becomes_ready_times_out() {
    let (_root, dir) = workspace();
    let mut pending = ready("stale");
    pending.status.phase = Some(Phase::Pending);
    let cluster = Arc::new(FakeCluster::default().with_component(pending));
    let settings = Settings {
        watch_timeout_secs: 1,
        ..Settings::default()
    };

    let err = Pusher::new(cluster.clone(), &settings)
        .push(&PushTarget::source(&dir))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Timeout { .. }), "got: {err}");
    assert!(cluster.uploads().is_empty());
}

#[tokio::test]
async fn missing_descriptor_is_reported() {
    let (_root, dir) = workspace();
    std::fs::remove_file(dir.join("component.yml")).unwrap();
    let cluster = Arc::new(FakeCluster::default());

    let err = Pusher::new(cluster.clone(), &settings())
        .push(&PushTarget::source(&dir))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("component.yml"), "got: {err}");
    assert!(cluster.created().is_empty());
}

#[tokio::test]
async fn switch_mode_patches_deployment_mode() {
    let cluster = Arc::new(FakeCluster::default().with_component(ready("r")));
    let component = Pusher::new(cluster.clone(), &settings())
        .switch_mode("web", DeploymentMode::Build)
        .await
        .expect("mode");

    assert_eq!(component.spec.deployment_mode, DeploymentMode::Build);
    assert_eq!(
        cluster.patches()[0].1,
        serde_json::json!({"spec": {"deploymentMode": "build"}})
    );
}

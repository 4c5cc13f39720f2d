//! Ordered remote steps inside a component's pod.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use halyard_core::settings::ContainerLayout;
use halyard_kube::Cluster;
use tokio::sync::mpsc;

use crate::error::SyncError;

const OUTPUT_BUFFER: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepAction {
    /// Run a command in the pod.
    Exec(Vec<String>),
    /// Copy a local file into the pod.
    Upload { local: PathBuf, destination: String },
}

/// One unit of remote work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub action: StepAction,
    /// Progress label; empty means the step runs silently.
    pub description: String,
    /// Message reported when the step fails.
    pub failure_status: String,
}

impl Step {
    pub fn exec<I, S>(argv: I, description: &str, failure_status: &str) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            action: StepAction::Exec(argv.into_iter().map(Into::into).collect()),
            description: description.to_owned(),
            failure_status: failure_status.to_owned(),
        }
    }

    pub fn upload(
        local: &Path,
        destination: impl Into<String>,
        description: &str,
        failure_status: &str,
    ) -> Self {
        Self {
            action: StepAction::Upload {
                local: local.to_path_buf(),
                destination: destination.into(),
            },
            description: description.to_owned(),
            failure_status: failure_status.to_owned(),
        }
    }

    /// Human-readable form of what the step runs.
    pub fn command_line(&self) -> String {
        match &self.action {
            StepAction::Exec(argv) => argv.join(" "),
            StepAction::Upload { local, destination } => {
                format!("upload {} -> {destination}", local.display())
            }
        }
    }
}

/// Runs step sequences against a pod, one at a time, stopping at the first
/// failure. Nothing is retried.
#[derive(Clone)]
pub struct RemoteExecutor {
    cluster: Arc<dyn Cluster>,
}

impl RemoteExecutor {
    pub fn new(cluster: Arc<dyn Cluster>) -> Self {
        Self { cluster }
    }

    pub async fn run_sequence(&self, pod: &str, steps: &[Step]) -> Result<(), SyncError> {
        for step in steps {
            if !step.description.is_empty() {
                tracing::info!(pod, step = %step.description, "running");
            }
            self.run_step(pod, step).await?;
        }
        Ok(())
    }

    async fn run_step(&self, pod: &str, step: &Step) -> Result<(), SyncError> {
        match &step.action {
            StepAction::Upload { local, destination } => {
                self.cluster.upload(local, pod, destination).await?;
                Ok(())
            }
            StepAction::Exec(argv) => {
                let (sink, mut lines) = mpsc::channel::<String>(OUTPUT_BUFFER);
                let collector = tokio::spawn(async move {
                    let mut output = String::new();
                    while let Some(line) = lines.recv().await {
                        tracing::debug!(target: "halyard::remote", "{line}");
                        output.push_str(&line);
                        output.push('\n');
                    }
                    output
                });

                let status = self.cluster.exec(pod, argv, sink).await;
                // The sink is gone once exec returns, so the collector drains and ends.
                let output = collector.await.unwrap_or_default();
                let status = status?;

                if status.success() {
                    return Ok(());
                }
                let failure_status = if step.failure_status.is_empty() {
                    "remote command failed".to_owned()
                } else {
                    step.failure_status.clone()
                };
                Err(SyncError::RemoteCommand {
                    status: failure_status,
                    command: step.command_line(),
                    code: status.code,
                    output,
                })
            }
        }
    }
}

/// Builds the canonical push sequences for a container layout.
#[derive(Debug, Clone)]
pub struct PushPlan {
    layout: ContainerLayout,
}

impl PushPlan {
    pub fn new(layout: &ContainerLayout) -> Self {
        Self {
            layout: layout.clone(),
        }
    }

    /// Where the source archive of `component` lands in the pod.
    pub fn remote_archive(&self, component: &str) -> String {
        format!(
            "{}/{component}.tar",
            self.layout.archive_dir.trim_end_matches('/')
        )
    }

    /// Upload, unpack and rebuild a source archive, then restart.
    pub fn source(&self, component: &str, archive: &Path) -> Vec<Step> {
        let remote = self.remote_archive(component);
        let src = self.layout.source_dir.as_str();
        let wait_for_build = format!(
            "while {} ctl status build | grep -q RUNNING; do sleep 1; done",
            shell_quote(&self.layout.supervisor)
        );
        let quoted_src = shell_quote(src);
        let clean = format!("mkdir -p {quoted_src} && find {quoted_src} -mindepth 1 -delete");

        vec![
            Step::upload(
                archive,
                remote.clone(),
                "Uploading sources",
                "failed to upload sources",
            ),
            Step::exec(
                ["sh", "-c", clean.as_str()],
                "Cleaning source directory",
                "failed to clean source directory",
            ),
            Step::exec(
                ["tar", "xmf", remote.as_str(), "-C", src],
                "Extracting sources",
                "failed to extract sources",
            ),
            self.supervisor("stop", "run", "", "failed to stop application"),
            self.supervisor("start", "build", "Building", "failed to start build"),
            Step::exec(
                ["sh", "-c", wait_for_build.as_str()],
                "Waiting for build to finish",
                "build did not finish",
            ),
            self.supervisor("stop", "run", "", "failed to stop application"),
            self.supervisor("start", "run", "Starting application", "failed to start application"),
        ]
    }

    /// Replace the deployed artifact and restart.
    pub fn binary(&self, artifact: &Path) -> Vec<Step> {
        vec![
            Step::upload(
                artifact,
                self.layout.binary_path.clone(),
                "Uploading binary",
                "failed to upload binary",
            ),
            self.supervisor("stop", "run", "", "failed to stop application"),
            self.supervisor("start", "run", "Starting application", "failed to start application"),
        ]
    }

    fn supervisor(&self, verb: &str, program: &str, description: &str, failure: &str) -> Step {
        Step::exec(
            [self.layout.supervisor.as_str(), "ctl", verb, program],
            description,
            failure,
        )
    }
}

/// Single-quote `word` for `sh -c` unless it is made of safe characters only.
fn shell_quote(word: &str) -> String {
    let safe = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "/._-+=:,@%".contains(c));
    if safe {
        word.to_owned()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use halyard_kube::FakeCluster;

    fn argv(step: &Step) -> Vec<String> {
        match &step.action {
            StepAction::Exec(argv) => argv.clone(),
            StepAction::Upload { .. } => panic!("not an exec step: {step:?}"),
        }
    }

    #[tokio::test]
    async fn failing_step_stops_the_sequence() {
        let cluster = Arc::new(FakeCluster::default().fail_exec(
            "step-b",
            3,
            &["compiling", "error: boom"],
        ));
        let executor = RemoteExecutor::new(cluster.clone());
        let steps = vec![
            Step::exec(["echo", "step-a"], "A", "a failed"),
            Step::exec(["echo", "step-b"], "B", "b failed"),
            Step::exec(["echo", "step-c"], "C", "c failed"),
        ];

        let err = executor.run_sequence("pod-1", &steps).await.unwrap_err();
        match &err {
            SyncError::RemoteCommand {
                status,
                command,
                code,
                output,
            } => {
                assert_eq!(status, "b failed");
                assert_eq!(command, "echo step-b");
                assert_eq!(*code, Some(3));
                assert_eq!(output, "compiling\nerror: boom\n");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.to_string().contains("error: boom"));

        let ran: Vec<String> = cluster.exec_log().iter().map(|a| a.join(" ")).collect();
        assert_eq!(ran, vec!["echo step-a", "echo step-b"]);
    }

    #[tokio::test]
    async fn uploads_go_through_the_cluster() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("app.jar");
        std::fs::write(&local, b"jar").unwrap();

        let cluster = Arc::new(FakeCluster::default());
        let executor = RemoteExecutor::new(cluster.clone());
        let plan = PushPlan::new(&ContainerLayout::default());
        executor
            .run_sequence("pod-1", &plan.binary(&local))
            .await
            .expect("binary push");

        let uploads = cluster.uploads();
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].destination, "/deployments/app.jar");
        assert_eq!(uploads[0].contents, b"jar");
        assert_eq!(cluster.exec_log().len(), 2);
    }

    #[test]
    fn source_plan_order() {
        let plan = PushPlan::new(&ContainerLayout::default());
        let steps = plan.source("web", Path::new("/tmp/local.tar"));
        let sup = "/var/lib/supervisord/bin/supervisord";

        assert!(matches!(
            &steps[0].action,
            StepAction::Upload { destination, .. } if destination == "/tmp/web.tar"
        ));
        assert_eq!(argv(&steps[2]), ["tar", "xmf", "/tmp/web.tar", "-C", "/usr/src"]);
        assert_eq!(argv(&steps[3]), [sup, "ctl", "stop", "run"]);
        assert!(steps[3].description.is_empty());
        assert_eq!(argv(&steps[4]), [sup, "ctl", "start", "build"]);
        assert!(argv(&steps[5])[2].contains("ctl status build | grep -q RUNNING"));
        assert_eq!(argv(&steps[6]), [sup, "ctl", "stop", "run"]);
        assert_eq!(argv(&steps[7]), [sup, "ctl", "start", "run"]);
        assert_eq!(steps.len(), 8);
    }

    #[test]
    fn binary_plan_restarts_run() {
        let plan = PushPlan::new(&ContainerLayout::default());
        let steps = plan.binary(Path::new("target/app-1.0.jar"));
        assert_eq!(steps.len(), 3);
        assert_eq!(steps[2].command_line(), "/var/lib/supervisord/bin/supervisord ctl start run");
    }

    #[test]
    fn layout_paths_are_quoted_for_the_shell() {
        let layout = ContainerLayout {
            source_dir: "/srv/my src".to_owned(),
            supervisor: "/opt/it's/supervisord".to_owned(),
            ..ContainerLayout::default()
        };
        let steps = PushPlan::new(&layout).source("web", Path::new("/tmp/local.tar"));

        assert_eq!(
            argv(&steps[1])[2],
            "mkdir -p '/srv/my src' && find '/srv/my src' -mindepth 1 -delete"
        );
        assert_eq!(argv(&steps[2])[4], "/srv/my src");
        assert!(argv(&steps[5])[2].starts_with(r"while '/opt/it'\''s/supervisord' ctl status build"));
    }

    #[test]
    fn default_layout_needs_no_quoting() {
        let steps = PushPlan::new(&ContainerLayout::default()).source("web", Path::new("a.tar"));
        assert_eq!(
            argv(&steps[1])[2],
            "mkdir -p /usr/src && find /usr/src -mindepth 1 -delete"
        );
    }
}

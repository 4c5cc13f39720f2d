//! `kubectl` subprocess backend.
//!
//! Every operation is one `kubectl` invocation with JSON output. Watches keep
//! a long-running `kubectl get --watch` child whose stdout is decoded
//! incrementally on a background task.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use halyard_core::settings::ResourceNames;
use halyard_core::{Capability, Component, Settings, TransferMode};
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tempfile::NamedTempFile;
use tokio::sync::{mpsc, oneshot};

use crate::cluster::{Cluster, ExecStatus, OutputSink, WatchEvent, WatchSubscription};
use crate::error::{io_err, ClusterError};

const DEFAULT_NAMESPACE: &str = "default";
const WATCH_BUFFER: usize = 16;
/// Added to the server-side watch timeout so the caller's own deadline
/// fires first.
const WATCH_GRACE: Duration = Duration::from_secs(5);

/// What [`Kubectl::run`] feeds into kubectl's stdin.
enum Input {
    Bytes(Vec<u8>),
    File(PathBuf),
}

/// Cluster access through the `kubectl` binary.
#[derive(Debug, Clone)]
pub struct Kubectl {
    program: PathBuf,
    namespace: String,
    resources: ResourceNames,
    transfer: TransferMode,
}

impl Kubectl {
    /// Backend for an explicit namespace.
    pub fn new(settings: &Settings, namespace: impl Into<String>) -> Self {
        Self {
            program: settings.kubectl.clone(),
            namespace: namespace.into(),
            resources: settings.resources.clone(),
            transfer: settings.transfer,
        }
    }

    /// Backend using the settings' namespace, falling back to the current
    /// kube context's namespace and finally to `default`.
    pub async fn connect(settings: &Settings) -> Result<Self, ClusterError> {
        let namespace = match &settings.namespace {
            Some(ns) if !ns.is_empty() => ns.clone(),
            _ => context_namespace(&settings.kubectl).await?,
        };
        tracing::debug!(namespace = %namespace, "using namespace");
        Ok(Self::new(settings, namespace))
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("--namespace").arg(&self.namespace);
        cmd.kill_on_drop(true);
        cmd
    }

    /// Run kubectl to completion and return its stdout.
    async fn run(
        &self,
        args: &[&str],
        stdin: Option<Input>,
        target: Option<(&'static str, &str)>,
    ) -> Result<Vec<u8>, ClusterError> {
        let mut cmd = self.command();
        cmd.args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let rendered = render(&self.program, args);
        tracing::debug!(command = %rendered, "kubectl");
        let mut child = cmd.spawn().map_err(|e| self.spawn_err(e))?;

        // Stdin is fed while the output is drained; a child that fills its
        // stdout pipe before reading stdin would otherwise never finish.
        let feeder = match (stdin, child.stdin.take()) {
            (Some(input), Some(pipe)) => Some(tokio::spawn(feed(input, pipe))),
            _ => None,
        };

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| io_err(&self.program, e))?;
        let fed = match feeder {
            Some(task) => task.await.unwrap_or_else(|e| Err(std::io::Error::other(e))),
            None => Ok(()),
        };
        if output.status.success() {
            fed.map_err(|e| io_err(&self.program, e))?;
            return Ok(output.stdout);
        }
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_owned();
        Err(classify_failure(rendered, stderr, target, &self.namespace))
    }

    async fn run_json<T: for<'de> Deserialize<'de>>(
        &self,
        args: &[&str],
        stdin: Option<Input>,
        target: Option<(&'static str, &str)>,
    ) -> Result<T, ClusterError> {
        let stdout = self.run(args, stdin, target).await?;
        serde_json::from_slice(&stdout).map_err(|e| ClusterError::Decode {
            context: format!("output of `{}`", render(&self.program, args)),
            source: e,
        })
    }

    fn spawn_err(&self, source: std::io::Error) -> ClusterError {
        ClusterError::Spawn {
            program: self.program.display().to_string(),
            source,
        }
    }

    fn to_json(component: &Component) -> Result<Vec<u8>, ClusterError> {
        serde_json::to_vec(component).map_err(|e| ClusterError::Decode {
            context: format!("component '{}'", component.name()),
            source: e,
        })
    }

    async fn upload_with_cp(
        &self,
        local: &Path,
        pod: &str,
        destination: &str,
    ) -> Result<(), ClusterError> {
        let source = local.display().to_string();
        let target = format!("{}/{pod}:{destination}", self.namespace);
        self.run(&["cp", source.as_str(), target.as_str()], None, Some(("pod", pod)))
            .await
            .map(|_| ())
    }

    async fn upload_with_exec(
        &self,
        local: &Path,
        pod: &str,
        destination: &str,
    ) -> Result<(), ClusterError> {
        let (dir, file_name) = split_destination(destination);
        let payload = single_file_tar(local, file_name)?;
        self.run(
            &["exec", "-i", pod, "--", "tar", "xf", "-", "-C", dir],
            Some(Input::File(payload.path().to_path_buf())),
            Some(("pod", pod)),
        )
        .await
        .map(|_| ())
    }
}

#[async_trait]
impl Cluster for Kubectl {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn get_component(&self, name: &str) -> Result<Component, ClusterError> {
        let resource = self.resources.component.as_str();
        self.run_json(
            &["get", resource, name, "-o", "json"],
            None,
            Some(("component", name)),
        )
        .await
    }

    async fn create_component(&self, component: &Component) -> Result<Component, ClusterError> {
        let body = Self::to_json(component)?;
        self.run_json(&["create", "-f", "-", "-o", "json"], Some(Input::Bytes(body)), None)
            .await
    }

    async fn update_component(&self, component: &Component) -> Result<Component, ClusterError> {
        let body = Self::to_json(component)?;
        self.run_json(
            &["replace", "-f", "-", "-o", "json"],
            Some(Input::Bytes(body)),
            Some(("component", component.name())),
        )
        .await
    }

    async fn patch_component(
        &self,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<Component, ClusterError> {
        let resource = self.resources.component.as_str();
        let body = patch.to_string();
        self.run_json(
            &[
                "patch", resource, name, "--type", "merge", "-p", body.as_str(), "-o", "json",
            ],
            None,
            Some(("component", name)),
        )
        .await
    }

    async fn list_capabilities(&self) -> Result<Vec<Capability>, ClusterError> {
        #[derive(Deserialize)]
        struct List {
            #[serde(default)]
            items: Vec<Capability>,
        }
        let resource = self.resources.capability.as_str();
        let list: List = self
            .run_json(&["get", resource, "-o", "json"], None, None)
            .await?;
        Ok(list.items)
    }

    async fn watch_component(
        &self,
        name: &str,
        timeout: Duration,
    ) -> Result<WatchSubscription, ClusterError> {
        let field_selector = format!("metadata.name={name}");
        let request_timeout = request_timeout(timeout);
        let args = [
            "get",
            self.resources.component.as_str(),
            "--field-selector",
            field_selector.as_str(),
            "--watch",
            "--output-watch-events",
            "-o",
            "json",
            "--request-timeout",
            request_timeout.as_str(),
        ];
        tracing::debug!(command = %render(&self.program, &args), "starting watch");

        let mut cmd = self.command();
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let child = cmd.spawn().map_err(|e| self.spawn_err(e))?;

        let (event_tx, event_rx) = mpsc::channel(WATCH_BUFFER);
        let (stop_tx, stop_rx) = oneshot::channel();
        tokio::spawn(pump_watch(child, event_tx, stop_rx));
        Ok(WatchSubscription::new(event_rx, stop_tx))
    }

    async fn exec(
        &self,
        pod: &str,
        argv: &[String],
        output: OutputSink,
    ) -> Result<ExecStatus, ClusterError> {
        let mut cmd = self.command();
        cmd.arg("exec")
            .arg(pod)
            .arg("--")
            .args(argv)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        tracing::debug!(pod, argv = ?argv, "kubectl exec");

        let mut child = cmd.spawn().map_err(|e| self.spawn_err(e))?;
        let stdout = child.stdout.take().map(|s| forward_lines(s, output.clone()));
        let stderr = child.stderr.take().map(|s| forward_lines(s, output));

        let status = child
            .wait()
            .await
            .map_err(|e| io_err(&self.program, e))?;
        for forwarder in [stdout, stderr].into_iter().flatten() {
            let _ = forwarder.await;
        }
        Ok(ExecStatus {
            code: status.code(),
        })
    }

    async fn upload(
        &self,
        local: &Path,
        pod: &str,
        destination: &str,
    ) -> Result<(), ClusterError> {
        tracing::debug!(local = %local.display(), pod, destination, transfer = %self.transfer, "upload");
        match self.transfer {
            TransferMode::Cp => self.upload_with_cp(local, pod, destination).await,
            TransferMode::Exec => self.upload_with_exec(local, pod, destination).await,
        }
    }
}

// ---------------------------------------------------------------------------
// Watch decoding
// ---------------------------------------------------------------------------

/// One object of `kubectl get --watch --output-watch-events -o json`.
#[derive(Debug, Deserialize)]
struct RawWatchEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    object: serde_json::Value,
}

impl RawWatchEvent {
    fn into_event(self) -> Result<Option<WatchEvent>, ClusterError> {
        let component = |object: serde_json::Value| {
            serde_json::from_value::<Component>(object).map_err(|e| ClusterError::Decode {
                context: "watched component".to_owned(),
                source: e,
            })
        };
        let event = match self.kind.as_str() {
            "ADDED" => WatchEvent::Added(component(self.object)?),
            "MODIFIED" => WatchEvent::Modified(component(self.object)?),
            "DELETED" => WatchEvent::Deleted(component(self.object)?),
            "ERROR" => WatchEvent::Error(
                self.object
                    .get("message")
                    .and_then(serde_json::Value::as_str)
                    .map(str::to_owned)
                    .unwrap_or_else(|| self.object.to_string()),
            ),
            "BOOKMARK" => return Ok(None),
            other => WatchEvent::Error(format!("unexpected watch event type '{other}'")),
        };
        Ok(Some(event))
    }
}

/// Decode every complete JSON document at the front of `buffer`, leaving any
/// trailing partial document in place.
pub(crate) fn drain_events(buffer: &mut Vec<u8>) -> Result<Vec<WatchEvent>, ClusterError> {
    let mut raws = Vec::new();
    let consumed = {
        let mut stream = serde_json::Deserializer::from_slice(buffer.as_slice()).into_iter::<RawWatchEvent>();
        loop {
            let offset = stream.byte_offset();
            match stream.next() {
                Some(Ok(raw)) => raws.push(raw),
                Some(Err(e)) if e.is_eof() => break offset,
                Some(Err(e)) => {
                    return Err(ClusterError::Decode {
                        context: "watch stream".to_owned(),
                        source: e,
                    })
                }
                None => break stream.byte_offset(),
            }
        }
    };
    buffer.drain(..consumed);

    let mut events = Vec::with_capacity(raws.len());
    for raw in raws {
        if let Some(event) = raw.into_event()? {
            events.push(event);
        }
    }
    Ok(events)
}

async fn pump_watch(
    mut child: Child,
    events: mpsc::Sender<WatchEvent>,
    mut stop: oneshot::Receiver<()>,
) {
    let Some(mut stdout) = child.stdout.take() else {
        return;
    };
    let stderr = child.stderr.take().map(|mut pipe| {
        tokio::spawn(async move {
            let mut bytes = Vec::new();
            let _ = pipe.read_to_end(&mut bytes).await;
            String::from_utf8_lossy(&bytes).into_owned()
        })
    });
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 8192];
    let mut closed = false;

    loop {
        tokio::select! {
            _ = &mut stop => break,
            read = stdout.read(&mut chunk) => {
                let n = match read {
                    Ok(0) => {
                        closed = true;
                        break;
                    }
                    Ok(n) => n,
                    Err(err) => {
                        let _ = events.send(WatchEvent::Error(err.to_string())).await;
                        break;
                    }
                };
                buffer.extend_from_slice(&chunk[..n]);
                match drain_events(&mut buffer) {
                    Ok(decoded) => {
                        for event in decoded {
                            if events.send(event).await.is_err() {
                                let _ = child.kill().await;
                                return;
                            }
                        }
                    }
                    Err(err) => {
                        let _ = events.send(WatchEvent::Error(err.to_string())).await;
                        break;
                    }
                }
            }
        }
    }

    if !closed {
        if let Err(err) = child.kill().await {
            tracing::debug!(error = %err, "watch process already gone");
        }
        return;
    }

    // kubectl ended the stream itself; say why if it failed.
    let stderr = match stderr {
        Some(task) => task.await.unwrap_or_default(),
        None => String::new(),
    };
    let event = match child.wait().await {
        Ok(status) => exit_event(status.code(), &stderr),
        Err(err) => Some(WatchEvent::Error(err.to_string())),
    };
    if let Some(event) = event {
        let _ = events.send(event).await;
    }
}

/// The event a watch process leaves behind when it exits on its own.
pub(crate) fn exit_event(code: Option<i32>, stderr: &str) -> Option<WatchEvent> {
    if code == Some(0) {
        return None;
    }
    let stderr = stderr.trim();
    let message = match code {
        _ if !stderr.is_empty() => stderr.to_owned(),
        Some(code) => format!("kubectl watch exited with status {code}"),
        None => "kubectl watch was killed by a signal".to_owned(),
    };
    Some(WatchEvent::Error(message))
}

fn request_timeout(timeout: Duration) -> String {
    format!("{}s", (timeout + WATCH_GRACE).as_secs())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn context_namespace(program: &Path) -> Result<String, ClusterError> {
    let output = Command::new(program)
        .args(["config", "view", "--minify", "-o", "jsonpath={..namespace}"])
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| ClusterError::Spawn {
            program: program.display().to_string(),
            source: e,
        })?;
    let namespace = String::from_utf8_lossy(&output.stdout).trim().to_owned();
    if !output.status.success() || namespace.is_empty() {
        return Ok(DEFAULT_NAMESPACE.to_owned());
    }
    Ok(namespace)
}

async fn feed(input: Input, mut pipe: ChildStdin) -> std::io::Result<()> {
    match input {
        Input::Bytes(bytes) => pipe.write_all(&bytes).await?,
        Input::File(path) => {
            let mut file = tokio::fs::File::open(&path).await?;
            tokio::io::copy(&mut file, &mut pipe).await?;
        }
    }
    pipe.shutdown().await
}

fn forward_lines<R>(reader: R, sink: OutputSink) -> tokio::task::JoinHandle<()>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if sink.send(line).await.is_err() {
                break;
            }
        }
    })
}

/// Map a failed kubectl invocation onto a `ClusterError`.
pub(crate) fn classify_failure(
    command: String,
    stderr: String,
    target: Option<(&'static str, &str)>,
    namespace: &str,
) -> ClusterError {
    if let Some((kind, name)) = target {
        if stderr.contains("(NotFound)") || stderr.contains("not found") {
            return ClusterError::NotFound {
                kind,
                name: name.to_owned(),
                namespace: namespace.to_owned(),
            };
        }
    }
    ClusterError::Command { command, stderr }
}

/// `/deployments/app.jar` → (`/deployments`, `app.jar`).
fn split_destination(destination: &str) -> (&str, &str) {
    match destination.rsplit_once('/') {
        Some(("", file)) => ("/", file),
        Some((dir, file)) => (dir, file),
        None => (".", destination),
    }
}

/// Wrap `local` in a one-entry tar on disk, named `name`.
fn single_file_tar(local: &Path, name: &str) -> Result<NamedTempFile, ClusterError> {
    let mut file = std::fs::File::open(local).map_err(|e| io_err(local, e))?;
    let scratch = tempfile::Builder::new()
        .prefix("halyard-upload-")
        .suffix(".tar")
        .tempfile()
        .map_err(|e| io_err(std::env::temp_dir(), e))?;
    let mut builder = tar::Builder::new(scratch.as_file());
    builder
        .append_file(name, &mut file)
        .map_err(|e| io_err(local, e))?;
    builder.finish().map_err(|e| io_err(scratch.path(), e))?;
    drop(builder);
    Ok(scratch)
}

fn render(program: &Path, args: &[&str]) -> String {
    let mut rendered = program.display().to_string();
    for arg in args {
        rendered.push(' ');
        rendered.push_str(arg);
    }
    rendered
}

//! Error types for halyard-sync.

use std::path::PathBuf;

use thiserror::Error;

use halyard_core::CoreError;
use halyard_kube::ClusterError;

/// All errors that can arise while pushing, waiting and binding.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Cluster(#[from] ClusterError),

    #[error(transparent)]
    Core(#[from] CoreError),

    /// The workspace could not be archived; `path` is the offending entry.
    #[error("cannot archive {path}: {source}")]
    Archive {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid exclusion glob '{pattern}': {reason}")]
    ExcludeGlob { pattern: String, reason: String },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("watch on component '{component}' failed: {message}")]
    WatchTransport { component: String, message: String },

    #[error("component '{component}' reached phase {phase}: {message}")]
    TerminalPhase {
        component: String,
        phase: halyard_core::Phase,
        message: String,
    },

    #[error("timed out after {}s waiting for component '{component}' to become {phase}", .timeout.as_secs_f64())]
    Timeout {
        component: String,
        phase: halyard_core::Phase,
        timeout: std::time::Duration,
    },

    /// A remote step exited unsuccessfully; `status` is the step's failure
    /// message and `output` everything it printed.
    #[error("{status}: `{command}` exited with {}{}", exit_label(.code), output_suffix(.output))]
    RemoteCommand {
        status: String,
        command: String,
        code: Option<i32>,
        output: String,
    },

    #[error("no capability matches requirement '{requirement}' ({spec})")]
    NoMatchingCapability { requirement: String, spec: String },

    #[error("no file ending in '{suffix}' found in {dir}")]
    ArtifactNotFound { dir: PathBuf, suffix: String },

    #[error("component '{0}' has no pod assigned")]
    NoPod(String),

    #[error("capability selection failed: {0}")]
    Selection(String),
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {code}"),
        None => "a signal".to_owned(),
    }
}

fn output_suffix(output: &str) -> String {
    if output.trim().is_empty() {
        String::new()
    } else {
        format!("\n{}", output.trim_end())
    }
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}

pub(crate) fn archive_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Archive {
        path: path.into(),
        source,
    }
}

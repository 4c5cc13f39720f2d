//! Payload revisions and the push decision.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use halyard_core::Component;
use halyard_kube::Cluster;
use sha2::{Digest, Sha256};
use tokio::sync::mpsc;

use crate::error::{io_err, SyncError};

const CHUNK: usize = 8 * 1024;

/// Lowercase hex SHA-256 of the file at `path`.
pub fn compute_revision(path: &Path) -> Result<String, SyncError> {
    let mut file = File::open(path).map_err(|e| io_err(path, e))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; CHUNK];
    loop {
        let n = file.read(&mut buf).map_err(|e| io_err(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Whether a payload with `new_revision` has to be pushed.
///
/// A changed revision always pushes. An unchanged one pushes only when the
/// component has a pod and that pod is known to have lost the payload
/// (`marker_present == Some(false)`), e.g. after a restart.
pub fn needs_push(new_revision: &str, component: &Component, marker_present: Option<bool>) -> bool {
    if component.spec.revision != new_revision {
        return true;
    }
    component.pod_name().is_some() && marker_present == Some(false)
}

/// Check whether `marker` exists in the component's pod.
///
/// `None` when no pod is assigned. A probe that cannot be run counts as
/// absent, so the caller errs on the side of pushing.
pub async fn probe_marker(
    cluster: &dyn Cluster,
    component: &Component,
    marker: &str,
) -> Option<bool> {
    let pod = component.pod_name()?;
    let argv = vec!["test".to_owned(), "-e".to_owned(), marker.to_owned()];
    let (output, _) = mpsc::channel(1);
    match cluster.exec(pod, &argv, output).await {
        Ok(status) => Some(status.success()),
        Err(err) => {
            tracing::warn!(pod, marker, error = %err, "marker probe failed, assuming absent");
            Some(false)
        }
    }
}

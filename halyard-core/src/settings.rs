//! User settings file.
//!
//! # Storage layout
//!
//! ```text
//! ~/.halyard/
//!   config.yaml   (mode 0600, optional: defaults apply when absent)
//! ```
//!
//! # API pattern
//!
//! Every function touching the filesystem has two forms:
//! - `fn_at(home: &Path, …)`: explicit home; used in tests with `TempDir`
//! - `fn(…)`: derives home from `dirs::home_dir()`, delegates to `_at`
//!
//! Tests must NEVER call the no-arg wrappers; always use `_at`.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{io_err, CoreError};

/// Historical watch deadline, in seconds.
pub const DEFAULT_WATCH_TIMEOUT_SECS: u64 = 120;

// ---------------------------------------------------------------------------
// 1. Settings model
// ---------------------------------------------------------------------------

/// How payloads are transported into the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransferMode {
    /// `kubectl cp`.
    #[default]
    Cp,
    /// A tar stream piped through `kubectl exec -i`.
    Exec,
}

impl fmt::Display for TransferMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferMode::Cp => write!(f, "cp"),
            TransferMode::Exec => write!(f, "exec"),
        }
    }
}

impl FromStr for TransferMode {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cp" => Ok(TransferMode::Cp),
            "exec" => Ok(TransferMode::Exec),
            other => Err(CoreError::UnknownValue {
                kind: "transfer mode",
                value: other.to_owned(),
                expected: "cp, exec",
            }),
        }
    }
}

/// Resource names used when talking to the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceNames {
    pub component: String,
    pub capability: String,
}

impl Default for ResourceNames {
    fn default() -> Self {
        Self {
            component: "components.halyard.dev".to_owned(),
            capability: "capabilities.halyard.dev".to_owned(),
        }
    }
}

/// Paths and programs inside the component's container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerLayout {
    /// Supervisor binary driving the `run` and `build` programs.
    pub supervisor: String,
    /// Directory source archives are uploaded into.
    pub archive_dir: String,
    /// Directory the source archive is extracted into.
    pub source_dir: String,
    /// Destination of a pushed binary artifact.
    pub binary_path: String,
    /// File whose absence means the pod lost the last pushed payload.
    pub marker_path: String,
}

impl Default for ContainerLayout {
    fn default() -> Self {
        Self {
            supervisor: "/var/lib/supervisord/bin/supervisord".to_owned(),
            archive_dir: "/tmp".to_owned(),
            source_dir: "/usr/src".to_owned(),
            binary_path: "/deployments/app.jar".to_owned(),
            marker_path: "/deployments/app.jar".to_owned(),
        }
    }
}

/// Source archive filtering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveSettings {
    /// Base names skipped among the component directory's immediate children.
    pub excluded: BTreeSet<String>,
    /// Globs matched against every root-relative path.
    pub exclude_globs: Vec<String>,
    /// Skip dot-prefixed immediate children.
    pub skip_hidden: bool,
}

impl Default for ArchiveSettings {
    fn default() -> Self {
        Self {
            excluded: ["target".to_owned()].into_iter().collect(),
            exclude_globs: Vec::new(),
            skip_hidden: true,
        }
    }
}

/// Where packaged artifacts are looked up for binary pushes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactSettings {
    /// Directory relative to the component directory.
    pub dir: PathBuf,
    pub suffix: String,
}

impl Default for ArtifactSettings {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("target"),
            suffix: ".jar".to_owned(),
        }
    }
}

/// Effective halyard settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Namespace override; the kube context's namespace is used when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// `kubectl` executable.
    pub kubectl: PathBuf,
    pub watch_timeout_secs: u64,
    pub transfer: TransferMode,
    pub resources: ResourceNames,
    pub container: ContainerLayout,
    pub archive: ArchiveSettings,
    pub artifact: ArtifactSettings,
    /// Component descriptor, relative to the component directory.
    pub descriptor: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            namespace: None,
            kubectl: PathBuf::from("kubectl"),
            watch_timeout_secs: DEFAULT_WATCH_TIMEOUT_SECS,
            transfer: TransferMode::default(),
            resources: ResourceNames::default(),
            container: ContainerLayout::default(),
            archive: ArchiveSettings::default(),
            artifact: ArtifactSettings::default(),
            descriptor: PathBuf::from("component.yml"),
        }
    }
}

impl Settings {
    pub fn watch_timeout(&self) -> Duration {
        Duration::from_secs(self.watch_timeout_secs)
    }
}

// ---------------------------------------------------------------------------
// 2. Paths
// ---------------------------------------------------------------------------

/// `<home>/.halyard/config.yaml`: pure, no I/O.
pub fn settings_path_at(home: &Path) -> PathBuf {
    home.join(".halyard").join("config.yaml")
}

// ---------------------------------------------------------------------------
// 3. Load
// ---------------------------------------------------------------------------

/// Load settings from `<home>/.halyard/config.yaml`.
///
/// Returns defaults if the file does not exist,
/// `CoreError::Parse` (with path + line context) if malformed YAML.
pub fn load_at(home: &Path) -> Result<Settings, CoreError> {
    let path = settings_path_at(home);
    if !path.exists() {
        return Ok(Settings::default());
    }
    let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    if contents.trim().is_empty() {
        return Ok(Settings::default());
    }
    serde_yaml::from_str(&contents).map_err(|e| CoreError::Parse { path, source: e })
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<Settings, CoreError> {
    load_at(&home()?)
}

// ---------------------------------------------------------------------------
// 4. Save (atomic)
// ---------------------------------------------------------------------------

/// Atomically save settings to `<home>/.halyard/config.yaml`.
///
/// Write flow: serialize → `.yaml.tmp` sibling → `chmod 0600` → `rename`.
pub fn save_at(home: &Path, settings: &Settings) -> Result<PathBuf, CoreError> {
    let path = settings_path_at(home);
    let Some(dir) = path.parent() else {
        return Err(io_err(path, std::io::Error::other("invalid settings path")));
    };
    std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;

    let yaml = serde_yaml::to_string(settings)?;
    let tmp = path.with_extension("yaml.tmp");
    std::fs::write(&tmp, yaml).map_err(|e| io_err(&tmp, e))?;
    set_file_permissions(&tmp)?;
    std::fs::rename(&tmp, &path).map_err(|e| io_err(&path, e))?;
    Ok(path)
}

/// `save_at` convenience wrapper.
pub fn save(settings: &Settings) -> Result<PathBuf, CoreError> {
    save_at(&home()?, settings)
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

fn home() -> Result<PathBuf, CoreError> {
    dirs::home_dir().ok_or(CoreError::HomeNotFound)
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), CoreError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), CoreError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

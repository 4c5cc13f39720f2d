//! Domain types for components and capabilities.
//!
//! The structs mirror the JSON shape of the platform's custom resources
//! (`camelCase` field names) so they can be read from and written to the
//! cluster without an intermediate representation. Closed enums reject
//! unknown values at deserialization time.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Names
// ---------------------------------------------------------------------------

/// Maximum length of a DNS label.
pub const MAX_NAME_LEN: usize = 63;

/// Validate that `name` is a DNS label: lowercase alphanumerics and `-`,
/// starting and ending with an alphanumeric character, at most 63 chars.
pub fn validate_name(name: &str) -> Result<(), CoreError> {
    let invalid = |reason: &str| CoreError::InvalidName {
        name: name.to_owned(),
        reason: reason.to_owned(),
    };

    if name.is_empty() {
        return Err(invalid("must not be empty"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(invalid("must be at most 63 characters"));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(invalid(
            "must consist of lowercase alphanumeric characters or '-'",
        ));
    }
    if name.starts_with('-') || name.ends_with('-') {
        return Err(invalid("must start and end with an alphanumeric character"));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Lifecycle phase reported by the remote reconciler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    Unknown,
    Pending,
    Ready,
    Running,
    Failed,
}

impl Phase {
    /// Phases after which the reconciler will not make progress on its own.
    pub fn is_terminal_failure(self) -> bool {
        matches!(self, Phase::Failed | Phase::Unknown)
    }

    /// Phases in which the component's pod can receive a payload.
    pub fn is_ready(self) -> bool {
        matches!(self, Phase::Ready | Phase::Running)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Unknown => "Unknown",
            Phase::Pending => "Pending",
            Phase::Ready => "Ready",
            Phase::Running => "Running",
            Phase::Failed => "Failed",
        };
        f.write_str(s)
    }
}

impl FromStr for Phase {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "unknown" => Ok(Phase::Unknown),
            "pending" => Ok(Phase::Pending),
            "ready" => Ok(Phase::Ready),
            "running" => Ok(Phase::Running),
            "failed" => Ok(Phase::Failed),
            other => Err(CoreError::UnknownValue {
                kind: "phase",
                value: other.to_owned(),
                expected: "unknown, pending, ready, running, failed",
            }),
        }
    }
}

/// How the component's container runs the pushed payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentMode {
    /// Source is pushed and built inside the container.
    #[default]
    Dev,
    /// A packaged artifact is pushed and run as-is.
    Build,
}

impl fmt::Display for DeploymentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeploymentMode::Dev => write!(f, "dev"),
            DeploymentMode::Build => write!(f, "build"),
        }
    }
}

impl FromStr for DeploymentMode {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "dev" => Ok(DeploymentMode::Dev),
            "build" => Ok(DeploymentMode::Build),
            other => Err(CoreError::UnknownValue {
                kind: "deployment mode",
                value: other.to_owned(),
                expected: "dev, build",
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Shared structs
// ---------------------------------------------------------------------------

/// A `name=value` pair, used for capability parameters and env vars.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NameValuePair {
    pub name: String,
    pub value: String,
}

impl NameValuePair {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

impl FromStr for NameValuePair {
    type Err = CoreError;

    /// Parse `name=value`. Exactly one `=` is accepted.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('=');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(name), Some(value), None) if !name.is_empty() => {
                Ok(NameValuePair::new(name, value))
            }
            _ => Err(CoreError::InvalidParameter(s.to_owned())),
        }
    }
}

impl fmt::Display for NameValuePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, self.value)
    }
}

/// Object metadata subset the client reads and writes.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,
}

impl ObjectMeta {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------

/// Structural description of a provided or required capability.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CapabilitySpec {
    pub category: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<NameValuePair>,
}

impl CapabilitySpec {
    /// `true` if `self`, as a provided spec, satisfies `required`.
    ///
    /// Category, type and version must be equal and every required parameter
    /// must be present with an equal value. Extra provided parameters are
    /// ignored.
    pub fn satisfies(&self, required: &CapabilitySpec) -> bool {
        self.category == required.category
            && self.kind == required.kind
            && self.version == required.version
            && required
                .parameters
                .iter()
                .all(|param| self.parameters.contains(param))
    }
}

impl fmt::Display for CapabilitySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.category, self.kind, self.version)
    }
}

/// A capability resource registered on the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capability {
    #[serde(default = "capability_api_version")]
    pub api_version: String,
    #[serde(default = "capability_kind")]
    pub kind: String,
    pub metadata: ObjectMeta,
    pub spec: CapabilitySpec,
}

impl Capability {
    pub fn new(name: impl Into<String>, spec: CapabilitySpec) -> Self {
        Self {
            api_version: capability_api_version(),
            kind: capability_kind(),
            metadata: ObjectMeta::named(name),
            spec,
        }
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.metadata.name, self.spec)
    }
}

/// A capability a component depends on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequiredCapabilityConfig {
    pub name: String,
    pub spec: CapabilitySpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bound_to: Option<String>,
    #[serde(default)]
    pub auto_bindable: bool,
}

impl RequiredCapabilityConfig {
    pub fn is_bound(&self) -> bool {
        self.bound_to.as_deref().is_some_and(|b| !b.is_empty())
    }
}

/// Capabilities section of a component spec.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CapabilitiesConfig {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requires: Vec<RequiredCapabilityConfig>,
}

// ---------------------------------------------------------------------------
// Components
// ---------------------------------------------------------------------------

/// Desired state of a component.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentSpec {
    #[serde(default)]
    pub runtime: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub expose_service: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Content hash of the last successfully pushed payload.
    #[serde(default)]
    pub revision: String,
    #[serde(default)]
    pub deployment_mode: DeploymentMode,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub envs: Vec<NameValuePair>,
    #[serde(default)]
    pub capabilities: CapabilitiesConfig,
}

/// Observed state of a component. Written by the reconciler only.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentStatus {
    /// `None` until the reconciler has reported a phase.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<Phase>,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub pod_name: String,
}

/// A deployable unit tracked on the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Component {
    #[serde(default = "component_api_version")]
    pub api_version: String,
    #[serde(default = "component_kind")]
    pub kind: String,
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: ComponentSpec,
    #[serde(default, skip_serializing_if = "is_default_status")]
    pub status: ComponentStatus,
}

impl Component {
    pub fn new(name: impl Into<String>, spec: ComponentSpec) -> Self {
        Self {
            api_version: component_api_version(),
            kind: component_kind(),
            metadata: ObjectMeta::named(name),
            spec,
            status: ComponentStatus::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// The pod currently backing this component, if the reconciler assigned one.
    pub fn pod_name(&self) -> Option<&str> {
        let pod = self.status.pod_name.as_str();
        (!pod.is_empty()).then_some(pod)
    }

    pub fn phase(&self) -> Option<Phase> {
        self.status.phase
    }
}

pub const API_VERSION: &str = "halyard.dev/v1beta1";

fn component_api_version() -> String {
    API_VERSION.to_owned()
}

fn component_kind() -> String {
    "Component".to_owned()
}

fn capability_api_version() -> String {
    API_VERSION.to_owned()
}

fn capability_kind() -> String {
    "Capability".to_owned()
}

fn is_default_status(status: &ComponentStatus) -> bool {
    *status == ComponentStatus::default()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

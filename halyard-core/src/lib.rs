//! Halyard core library: domain types, settings, local descriptors, errors.
//!
//! - [`types`]: components, capabilities and their closed enums
//! - [`settings`]: `~/.halyard/config.yaml` load / save
//! - [`descriptor`]: local component descriptor loading
//! - [`error`]: [`CoreError`]

pub mod descriptor;
pub mod error;
pub mod settings;
pub mod types;

pub use error::CoreError;
pub use settings::{Settings, TransferMode};
pub use types::{
    Capability, CapabilitySpec, Component, ComponentSpec, ComponentStatus, DeploymentMode,
    NameValuePair, ObjectMeta, Phase, RequiredCapabilityConfig,
};

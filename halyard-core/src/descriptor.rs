//! Local component descriptors.
//!
//! A descriptor is a YAML file (possibly multi-document) living in a
//! component's directory. Documents whose `kind` is `Component` or
//! `Capability` are collected; any other kind is ignored.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{io_err, CoreError};
use crate::types::{validate_name, Capability, Component};

/// Entities declared by a local descriptor file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Descriptor {
    pub path: PathBuf,
    pub components: Vec<Component>,
    pub capabilities: Vec<Capability>,
}

impl Descriptor {
    /// The component named `name`, or the only component if the descriptor
    /// declares exactly one.
    pub fn component(&self, name: &str) -> Result<Component, CoreError> {
        if let Some(found) = self.components.iter().find(|c| c.name() == name) {
            return Ok(found.clone());
        }
        match self.components.as_slice() {
            [only] => Ok(only.clone()),
            [] => Err(CoreError::InvalidDescriptor {
                path: self.path.clone(),
                reason: "no Component document found".to_owned(),
            }),
            _ => Err(CoreError::InvalidDescriptor {
                path: self.path.clone(),
                reason: format!("no Component named '{name}' among {}", self.names()),
            }),
        }
    }

    fn names(&self) -> String {
        self.components
            .iter()
            .map(|c| c.name().to_owned())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// `<component_dir>/<relative>`.
pub fn descriptor_path(component_dir: &Path, relative: &Path) -> PathBuf {
    component_dir.join(relative)
}

/// Load and validate the descriptor at `path`.
///
/// Returns `CoreError::DescriptorNotFound` if absent, `CoreError::Parse` if a
/// document is malformed, `CoreError::InvalidName` if a declared name is not a
/// DNS label.
pub fn load(path: &Path) -> Result<Descriptor, CoreError> {
    if !path.exists() {
        return Err(CoreError::DescriptorNotFound {
            path: path.to_path_buf(),
        });
    }
    let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    parse(path, &contents)
}

/// Parse descriptor `contents`; `path` is only used for error context.
pub fn parse(path: &Path, contents: &str) -> Result<Descriptor, CoreError> {
    let parse_err = |source| CoreError::Parse {
        path: path.to_path_buf(),
        source,
    };

    let mut descriptor = Descriptor {
        path: path.to_path_buf(),
        ..Descriptor::default()
    };

    for document in serde_yaml::Deserializer::from_str(contents) {
        let value = serde_yaml::Value::deserialize(document).map_err(parse_err)?;
        if value.is_null() {
            continue;
        }
        let kind = value
            .get("kind")
            .and_then(serde_yaml::Value::as_str)
            .unwrap_or_default();
        match kind {
            "Component" => {
                let component: Component = serde_yaml::from_value(value).map_err(parse_err)?;
                validate_name(component.name())?;
                descriptor.components.push(component);
            }
            "Capability" => {
                let capability: Capability = serde_yaml::from_value(value).map_err(parse_err)?;
                validate_name(capability.name())?;
                descriptor.capabilities.push(capability);
            }
            _ => {}
        }
    }

    Ok(descriptor)
}

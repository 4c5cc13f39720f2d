//! Error types for halyard-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from settings, descriptors and domain values.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Underlying I/O failure, with the path that triggered it.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML serialization error (write path).
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// YAML parse error on load; includes file path and line context from serde_yaml.
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// `dirs::home_dir()` returned `None`; `~/.halyard/` cannot be located.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,

    /// The component descriptor was not found at the expected path.
    #[error("component descriptor not found at {path}")]
    DescriptorNotFound { path: PathBuf },

    /// The descriptor parsed but does not describe a usable component.
    #[error("invalid component descriptor at {path}: {reason}")]
    InvalidDescriptor { path: PathBuf, reason: String },

    #[error("invalid name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    #[error("unknown {kind} '{value}'; expected: {expected}")]
    UnknownValue {
        kind: &'static str,
        value: String,
        expected: &'static str,
    },

    #[error("invalid parameter: {0}, format must be 'name=value'")]
    InvalidParameter(String),
}

/// Convenience constructor for [`CoreError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> CoreError {
    CoreError::Io {
        path: path.into(),
        source,
    }
}

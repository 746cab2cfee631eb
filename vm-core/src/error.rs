use thiserror::Error;

/// Failures in the foundation layer: input validation and configuration
/// loading. Everything above this crate wraps these in its own error type.
#[derive(Error, Debug)]
pub enum VmError {
    /// User-supplied value rejected (VM name, username, resource request).
    #[error("Validation error: {0}")]
    Validation(String),

    /// Service configuration is unusable.
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_yaml_ng::Error> for VmError {
    fn from(err: serde_yaml_ng::Error) -> Self {
        VmError::Serialization(format!("invalid YAML: {}", err))
    }
}

pub type Result<T> = std::result::Result<T, VmError>;

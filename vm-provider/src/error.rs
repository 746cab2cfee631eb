use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProviderError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// The host could not be reached or authenticated against, or the call
    /// timed out. No remote state was changed by this call.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The hypervisor ran the command and reported a failure in its output.
    #[error("Hypervisor command failed: `{command}`: {message}")]
    Command { command: String, message: String },
}

impl ProviderError {
    pub fn is_transport(&self) -> bool {
        matches!(self, ProviderError::Transport(_))
    }
}

use thiserror::Error;

use crate::remote_shell::RemoteShellError;

pub type Result<T> = std::result::Result<T, OpsErr>;

#[derive(Debug, Error)]
pub enum OpsErr {
    /// Session or network failure; the remote state is unknown.
    #[error("{0}")]
    Shell(#[from] RemoteShellError),

    /// The remote replied, but not in a shape we understand.
    #[error("unexpected remote output: {0}")]
    Protocol(String),

    /// The remote explicitly refused the request (duplicate, not found, ...).
    #[error("{reason}")]
    Rejected { message: String, reason: String },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("credentials unavailable: {0}")]
    Credentials(String),

    #[error("operation `{operation}` is not supported for system `{system}`")]
    Unsupported { system: String, operation: String },

    #[error("configuration error: {0}")]
    Config(String),
}

impl OpsErr {
    pub fn rejected(message: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Rejected {
            message: message.into(),
            reason: reason.into(),
        }
    }

    /// Short headline for the job record; the full text goes to `error`.
    pub fn headline(&self) -> &str {
        match self {
            OpsErr::Rejected { message, .. } if !message.trim().is_empty() => message,
            OpsErr::InvalidRequest(_) => "invalid request",
            _ => "execution failed",
        }
    }
}

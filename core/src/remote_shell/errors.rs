use thiserror::Error;

#[derive(Debug, Error)]
pub enum RemoteShellError {
    #[error("failed to connect to {addr}: {message}")]
    Connect { addr: String, message: String },
    #[error("timed out connecting to {addr}")]
    ConnectTimeout { addr: String },
    #[error("authentication rejected for account {account}")]
    AuthRejected { account: String },
    #[error("failed to open remote shell: {message}")]
    OpenShell { message: String },
    #[error("failed to write to remote stdin")]
    WriteToStdin {
        #[source]
        error: std::io::Error,
    },
    #[error("failed to read remote output: {error}")]
    ReadOutput {
        #[source]
        error: std::io::Error,
    },
}

impl RemoteShellError {
    pub(crate) fn open_shell(message: impl ToString) -> Self {
        Self::OpenShell {
            message: message.to_string(),
        }
    }

    pub(crate) fn write_to_stdin(error: std::io::Error) -> Self {
        Self::WriteToStdin { error }
    }

    pub(crate) fn read_output(error: std::io::Error) -> Self {
        Self::ReadOutput { error }
    }
}

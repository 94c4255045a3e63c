use std::io;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum SshError {
    /// Dial, handshake, timeout or rejected credentials.
    #[error("connection to {address} failed: {message}")]
    Connection { address: String, message: String },

    #[error("session is not connected")]
    NotConnected,

    /// Per-command channel could not be opened or started.
    #[error("channel error: {0}")]
    Channel(String),

    /// The command ran and exited non-zero. `output` holds whatever was
    /// captured before it exited (empty for streaming and shells).
    #[error("remote command exited with status {code}")]
    RemoteExit { code: u32, output: String },

    #[error("remote command was terminated by signal {0}")]
    RemoteSignal(String),

    #[error("local I/O error on {}: {source}", path.display())]
    LocalIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("remote I/O error on {path}: {message}")]
    RemoteIo { path: String, message: String },

    /// No terminal surface could be opened.
    #[error("unable to open terminal: {0}")]
    Spawn(String),
}

impl SshError {
    pub fn connection(address: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Connection {
            address: address.into(),
            message: message.to_string(),
        }
    }

    pub fn local_io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::LocalIo {
            path: path.into(),
            source,
        }
    }

    pub fn remote_io(path: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::RemoteIo {
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// Exit code when the command ran and failed, `None` for transport errors.
    pub fn exit_code(&self) -> Option<u32> {
        match self {
            Self::RemoteExit { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Output captured alongside a non-zero exit.
    pub fn captured_output(&self) -> Option<&str> {
        match self {
            Self::RemoteExit { output, .. } => Some(output),
            _ => None,
        }
    }
}

pub type Result<T, E = SshError> = std::result::Result<T, E>;

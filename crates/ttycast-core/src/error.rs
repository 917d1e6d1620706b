use thiserror::Error;

/// Errors produced while recording, persisting, or broadcasting a session.
#[derive(Debug, Error)]
pub enum CastError {
    /// The target program could not be found or executed.
    #[error("spawn error: {0}")]
    Spawn(String),

    /// The OS refused to allocate a pseudo-terminal.
    #[error("pty allocation error: {0}")]
    PtyAllocation(String),

    /// I/O failure on the operator terminal or the pty master mid-session.
    #[error("capture error: {0}")]
    Capture(String),

    /// The event log could not be written or persisted.
    #[error("log write error: {0}")]
    LogWrite(String),

    /// A single viewer failed; never fatal to the session.
    #[error("viewer connection error: {0}")]
    ViewerConnection(String),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("timeout")]
    Timeout,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl CastError {
    /// Whether this error ends the recording session.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, CastError::ViewerConnection(_) | CastError::Timeout)
    }
}

impl From<serde_json::Error> for CastError {
    fn from(e: serde_json::Error) -> Self {
        CastError::Codec(e.to_string())
    }
}

pub type CastResult<T> = Result<T, CastError>;

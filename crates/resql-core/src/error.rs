use thiserror::Error;

pub type Result<T> = std::result::Result<T, ResqlError>;

#[derive(Debug, Error)]
pub enum ResqlError {
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),
    #[error("truncated message: needed {needed} bytes, {available} available")]
    TruncatedMessage { needed: usize, available: usize },
    #[error("buffer too large")]
    BufferTooLarge,
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("unsupported parameter type tag: {0}")]
    UnsupportedParameterType(u8),
    #[error("cluster name mismatch")]
    ClusterNameMismatch,
    #[error("session does not exist on the server anymore (server: {server}, local: {local})")]
    SessionLost { server: u64, local: u64 },
    #[error("connect request rejected by the server: {0}")]
    Rejected(String),
    #[error("operation timeout")]
    OperationTimeout,
    #[error("misuse: {0}")]
    Misuse(String),
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },
    #[error("column does not exist: {0}")]
    ColumnNotFound(String),
    #[error("index {index} is out of range (len {len})")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("sql error: {0}")]
    ServerReported(String),
    #[error("config error: {0}")]
    Config(String),
}

impl ResqlError {
    pub fn protocol(message: impl Into<String>) -> Self {
        ResqlError::Protocol(message.into())
    }

    /// Errors after which another attempt, possibly against another node,
    /// may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ResqlError::Transport(_) | ResqlError::Rejected(_) | ResqlError::OperationTimeout
        )
    }

    /// Errors that leave the connection in an unknown state.
    pub fn invalidates_connection(&self) -> bool {
        matches!(
            self,
            ResqlError::Transport(_)
                | ResqlError::TruncatedMessage { .. }
                | ResqlError::BufferTooLarge
                | ResqlError::Protocol(_)
                | ResqlError::UnsupportedParameterType(_)
                | ResqlError::ClusterNameMismatch
                | ResqlError::SessionLost { .. }
                | ResqlError::Rejected(_)
                | ResqlError::OperationTimeout
        )
    }
}

//! Crate-level error types.

/// Crate-level error type.
///
/// Lifecycle operations never propagate these to the caller; they are
/// produced at the transport boundary and consumed (logged) by the
/// connection state machine. They surface publicly only from
/// [`DeviceRegistry`](crate::DeviceRegistry) enumeration.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The transport library failed to start or perform an operation.
    #[error("transport: {0}")]
    Transport(String),

    /// A connect call on a device handle failed.
    #[error("connect failed: {0}")]
    ConnectFailed(String),

    /// An operation required a connected device handle.
    #[error("not connected")]
    NotConnected,
}

impl Error {
    /// Create a transport error with a message.
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a connect-failed error with a message.
    pub fn connect_failed(msg: impl Into<String>) -> Self {
        Self::ConnectFailed(msg.into())
    }

    /// Returns true if this is a transport error.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Returns true if this is a connect failure.
    pub fn is_connect_failed(&self) -> bool {
        matches!(self, Self::ConnectFailed(_))
    }
}

/// Crate-level result type.
pub type Result<T> = std::result::Result<T, Error>;

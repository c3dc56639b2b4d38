//! Link Error Types

use thiserror::Error;

/// Errors that can occur talking to the adapter
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    /// Serial port could not be opened or read
    #[error("Serial port error: {0}")]
    Serial(String),

    /// Write to the transport failed
    #[error("Write failed: {0}")]
    Write(String),

    /// No prompt within the timeout window
    #[error("Timeout waiting for response to {command} after {timeout_ms}ms")]
    Timeout { command: String, timeout_ms: u64 },

    /// Request dropped by `CommandQueue::clear`
    #[error("Command queue cleared")]
    Cleared,

    /// The link went down while the request was pending
    #[error("Adapter disconnected")]
    Disconnected,

    /// The queue task is gone
    #[error("Command queue closed")]
    Closed,

    /// No such device to connect to
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// Transport refused the connection
    #[error("Connection failed: {0}")]
    ConnectFailed(String),
}

impl From<std::io::Error> for LinkError {
    fn from(err: std::io::Error) -> Self {
        LinkError::Serial(err.to_string())
    }
}

impl From<tokio_serial::Error> for LinkError {
    fn from(err: tokio_serial::Error) -> Self {
        LinkError::Serial(err.to_string())
    }
}

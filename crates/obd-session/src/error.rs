//! Session Error Types

use obd_link::LinkError;
use thiserror::Error;

/// Errors surfaced by session operations
#[derive(Debug, Error)]
pub enum SessionError {
    /// No adapter link
    #[error("Adapter not connected")]
    NotConnected,

    /// Adapter is up but the vehicle did not answer
    #[error("ECU not connected")]
    EcuNotConnected,

    /// Another guarded routine owns the adapter
    #[error("Adapter busy with another routine")]
    Busy,

    #[error("Link error: {0}")]
    Link(#[from] LinkError),

    /// Mode 02 returned nothing
    #[error("No freeze frame stored")]
    NoFreezeFrame,

    /// `ATRV` did not yield a reading
    #[error("Battery voltage unavailable: {0}")]
    NoVoltage(String),

    /// Nothing to reconnect to
    #[error("No known device")]
    NoKnownDevice,

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Last-device store failed
    #[error("Device store error: {0}")]
    Store(String),
}

impl From<std::io::Error> for SessionError {
    fn from(err: std::io::Error) -> Self {
        SessionError::Store(err.to_string())
    }
}

impl From<serde_json::Error> for SessionError {
    fn from(err: serde_json::Error) -> Self {
        SessionError::Store(err.to_string())
    }
}

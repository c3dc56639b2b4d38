//! Decoder Error Types

use thiserror::Error;

/// Malformed adapter output.
///
/// A response that simply does not carry the expected echo is not an error;
/// the decoder reports that as `Ok(None)`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Payload after a valid echo is not hexadecimal
    #[error("Invalid hex payload {payload:?} for command {command}")]
    InvalidHex { command: String, payload: String },

    /// Voltage reading could not be parsed as a decimal number
    #[error("Invalid voltage reading: {0:?}")]
    InvalidVoltage(String),
}

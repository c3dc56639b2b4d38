//! ELM327 link layer
//!
//! The [`CommandQueue`] is the only writer to the adapter. It serializes
//! callers into one FIFO, frames the adapter's byte stream on the `>` prompt,
//! and runs the decoder before handing each response back.

mod error;
mod log;
pub mod mock;
mod queue;
pub mod serial;
mod transport;

pub use error::LinkError;
pub use log::{LogEntry, LogKind, TransactionLog};
pub use queue::{clean_response, CommandQueue, QueueConfig};
pub use transport::{Connector, DeviceInfo, Link, Transport};

/// ELM327 prompt, sent when the adapter is ready for the next command
pub const PROMPT: char = '>';

/// Command text as written to the wire, carriage return terminated
pub fn with_cr(command: &str) -> String {
    if command.ends_with('\r') {
        command.to_string()
    } else {
        format!("{command}\r")
    }
}

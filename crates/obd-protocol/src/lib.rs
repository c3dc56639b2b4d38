//! OBD-II / UDS protocol layer for ELM327 adapters
//!
//! This crate holds everything about the adapter dialogue that does not need
//! I/O: the command table, the Mode 01 PID table, the response decoder, the
//! decoded sensor snapshot and the DTC dictionary. The command queue and the
//! transports live in `obd-link`.

pub mod battery;
pub mod command;
pub mod decoder;
pub mod dtc;
mod error;
mod pid;
mod protocol;
mod snapshot;

pub use command::Brand;
pub use decoder::{decode, decode_freeze_frame, expected_echo, normalize};
pub use error::DecodeError;
pub use pid::Pid;
pub use protocol::{Bus, ObdProtocol};
pub use snapshot::{FreezeFrame, Odometer, SensorSnapshot, SensorUpdate};

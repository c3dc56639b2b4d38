//! Live-data polling for ELM327 sessions
//!
//! One background round at a time: fast PIDs every cycle, the slow tier every
//! Nth cycle. The poller yields to diagnostics and adaptation routines through
//! the cooperative busy flags in [`SessionMode`].

mod mode;
mod poller;

pub use mode::SessionMode;
pub use poller::{PollConfig, PollPlan, Poller};

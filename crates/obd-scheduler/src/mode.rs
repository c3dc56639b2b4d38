//! Busy flags shared between the poller and guarded routines

use serde::Serialize;

/// What the session is doing with the adapter
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionMode {
    /// A diagnostic scan or clear is writing to the adapter
    pub diagnostic_mode_active: bool,
    /// An adaptation routine is writing to the adapter
    pub adaptation_running: bool,
    /// Background polling was requested and resumes after guarded routines
    pub polling_active: bool,
}

impl SessionMode {
    /// Whether the poller must stay off the wire
    pub fn is_busy(&self) -> bool {
        self.diagnostic_mode_active || self.adaptation_running
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_polling_alone_is_not_busy() {
        let mode = SessionMode {
            polling_active: true,
            ..Default::default()
        };
        assert!(!mode.is_busy());
        assert!(SessionMode {
            adaptation_running: true,
            ..mode
        }
        .is_busy());
    }
}

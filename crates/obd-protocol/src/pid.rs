//! OBD-II Mode 01 PID Definitions
//!
//! Defines the Parameter IDs the client decodes and their payload widths.

use serde::{Deserialize, Serialize};

/// Mode 01 PIDs understood by the decoder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Pid {
    /// Calculated engine load (0x04)
    EngineLoad = 0x04,
    /// Engine coolant temperature (0x05)
    CoolantTemp = 0x05,
    /// Intake manifold absolute pressure (0x0B)
    IntakeManifoldPressure = 0x0B,
    /// Engine RPM (0x0C)
    Rpm = 0x0C,
    /// Vehicle speed (0x0D)
    Speed = 0x0D,
    /// Intake air temperature (0x0F)
    IntakeAirTemp = 0x0F,
    /// Throttle position (0x11)
    ThrottlePosition = 0x11,
    /// Distance travelled with MIL on (0x21)
    DistanceMilOn = 0x21,
    /// Distance travelled since codes cleared (0x31)
    DistanceSinceCleared = 0x31,
    /// Odometer (0xA6)
    Odometer = 0xA6,
}

impl Pid {
    const ALL: [Pid; 10] = [
        Pid::EngineLoad,
        Pid::CoolantTemp,
        Pid::IntakeManifoldPressure,
        Pid::Rpm,
        Pid::Speed,
        Pid::IntakeAirTemp,
        Pid::ThrottlePosition,
        Pid::DistanceMilOn,
        Pid::DistanceSinceCleared,
        Pid::Odometer,
    ];

    /// Get the PID hex value
    pub fn as_hex(&self) -> u8 {
        *self as u8
    }

    /// Get the number of response bytes for this PID
    pub fn response_bytes(&self) -> usize {
        match self {
            Pid::Rpm | Pid::DistanceMilOn | Pid::DistanceSinceCleared => 2,
            Pid::Odometer => 4,
            _ => 1,
        }
    }

    /// Look up a PID by its hex value
    pub fn from_hex(value: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.as_hex() == value)
    }

    /// Parse a compact Mode 01 request such as `"010C"`
    pub fn from_command(command: &str) -> Option<Self> {
        let code = command.strip_prefix("01")?;
        if code.len() != 2 {
            return None;
        }
        u8::from_str_radix(code, 16).ok().and_then(Self::from_hex)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_command() {
        assert_eq!(Pid::from_command("010C"), Some(Pid::Rpm));
        assert_eq!(Pid::from_command("01A6"), Some(Pid::Odometer));
        assert_eq!(Pid::from_command("01a6"), Some(Pid::Odometer));
        assert_eq!(Pid::from_command("0100"), None);
        assert_eq!(Pid::from_command("020C"), None);
        assert_eq!(Pid::from_command("010C00"), None);
    }

    #[test]
    fn test_every_pid_parses_back() {
        for pid in Pid::ALL {
            let command = format!("01{:02X}", pid.as_hex());
            assert_eq!(Pid::from_command(&command), Some(pid));
        }
    }

    #[test]
    fn test_response_widths() {
        assert_eq!(Pid::Rpm.response_bytes(), 2);
        assert_eq!(Pid::Speed.response_bytes(), 1);
        assert_eq!(Pid::Odometer.response_bytes(), 4);
    }
}

//! ELM327 AT commands, OBD-II requests and OEM UDS reads
//!
//! Commands are plain ASCII text. The queue appends the carriage return.

use serde::{Deserialize, Serialize};

/// Adapter reset
pub const RESET: &str = "ATZ";
/// Echo off (replies no longer start with the request)
pub const ECHO_OFF: &str = "ATE0";
/// Spaces off (compact hex replies)
pub const SPACES_OFF: &str = "ATS0";
/// Adapter identification, e.g. "ELM327 v2.1"
pub const DEVICE_INFO: &str = "ATI";
/// Battery voltage as seen on the OBD connector
pub const VOLTAGE: &str = "ATRV";

/// Engine RPM
pub const RPM: &str = "010C";
/// Vehicle speed
pub const SPEED: &str = "010D";
/// Coolant temperature
pub const COOLANT_TEMP: &str = "0105";
/// Calculated engine load
pub const LOAD: &str = "0104";
/// Intake air temperature
pub const INTAKE_AIR_TEMP: &str = "010F";
/// Intake manifold absolute pressure
pub const MANIFOLD_PRESSURE: &str = "010B";
/// Throttle position
pub const THROTTLE: &str = "0111";

/// Read stored trouble codes
pub const READ_DTC: &str = "03";
/// Clear trouble codes, MIL and fuel trims
pub const CLEAR_DTC: &str = "04";
/// Vehicle identification number
pub const READ_VIN: &str = "0902";
/// UDS hard reset
pub const ECU_RESET: &str = "11 01";

/// Total odometer
pub const ODOMETER: &str = "01A6";
/// Distance since codes cleared
pub const DISTANCE_SINCE_CLEARED: &str = "0131";
/// Distance travelled with the MIL on
pub const DISTANCE_MIL_ON: &str = "0121";

/// UDS extended diagnostic session
pub const EXTENDED_SESSION: &str = "10 03";
/// UDS default session
pub const DEFAULT_SESSION: &str = "10 01";

/// Engine control unit (default header)
pub const HEADER_ECU: &str = "ATSH 7E0";
/// Instrument cluster, variant 1
pub const HEADER_IPC_1: &str = "ATSH 720";
/// Instrument cluster, variant 2
pub const HEADER_IPC_2: &str = "ATSH 760";

/// Headers tried by the brand odometer scan, ECU first
pub const ODOMETER_HEADERS: [&str; 3] = [HEADER_ECU, HEADER_IPC_1, HEADER_IPC_2];

/// Generic UDS odometer identifiers tried after the J1979 PID
pub const GENERIC_UDS_ODOMETERS: [&str; 2] = ["22 F1 A6", "22 D0 00"];

/// Honda / Keihin odometer identifiers
pub const HONDA_ODOMETERS: [&str; 2] = ["22 11 02", "22 02 00"];

/// Yamaha odometer identifier
pub const YAMAHA_ODOMETERS: [&str; 1] = ["22 12 01"];

/// Freeze frame 0 requests: RPM, speed, coolant
pub const FREEZE_FRAME_REQUESTS: [&str; 3] = ["020C00", "020D00", "020500"];

/// Fast tier of the live-data poll
pub const POLL_FAST: [&str; 2] = [RPM, SPEED];

/// Slow tier of the live-data poll
pub const POLL_SLOW: [&str; 6] = [
    COOLANT_TEMP,
    THROTTLE,
    VOLTAGE,
    LOAD,
    INTAKE_AIR_TEMP,
    MANIFOLD_PRESSURE,
];

/// Declared vehicle brand, used to pick OEM odometer reads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Brand {
    #[default]
    Generic,
    Honda,
    Yamaha,
    Suzuki,
    Ktm,
}

impl Brand {
    /// OEM odometer reads worth trying across CAN headers.
    ///
    /// Empty for [`Brand::Generic`]: the header sweep only runs when a brand
    /// was declared.
    pub fn odometer_commands(&self) -> &'static [&'static str] {
        match self {
            Brand::Generic => &[],
            Brand::Honda => &HONDA_ODOMETERS,
            Brand::Yamaha => &YAMAHA_ODOMETERS,
            Brand::Suzuki | Brand::Ktm => &GENERIC_UDS_ODOMETERS,
        }
    }
}

impl std::str::FromStr for Brand {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "generic" => Ok(Brand::Generic),
            "honda" => Ok(Brand::Honda),
            "yamaha" => Ok(Brand::Yamaha),
            "suzuki" => Ok(Brand::Suzuki),
            "ktm" => Ok(Brand::Ktm),
            other => Err(format!("unknown brand: {other}")),
        }
    }
}

/// True when `command` is one of the UDS odometer reads
pub fn is_uds_odometer(command: &str) -> bool {
    let wanted = compact(command);
    GENERIC_UDS_ODOMETERS
        .iter()
        .chain(HONDA_ODOMETERS.iter())
        .chain(YAMAHA_ODOMETERS.iter())
        .any(|c| compact(c) == wanted)
}

/// Uppercase with whitespace removed, the form responses are compared in
pub fn compact(command: &str) -> String {
    command
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compact() {
        assert_eq!(compact("22 f1 a6\r"), "22F1A6");
        assert_eq!(compact("ATSH 7E0"), "ATSH7E0");
    }

    #[test]
    fn test_uds_odometer_membership() {
        assert!(is_uds_odometer("22 11 02"));
        assert!(is_uds_odometer("221201"));
        assert!(!is_uds_odometer(ODOMETER));
        assert!(!is_uds_odometer("22 F1 90"));
    }

    #[test]
    fn test_brand_odometer_sets() {
        assert!(Brand::Generic.odometer_commands().is_empty());
        assert_eq!(Brand::Honda.odometer_commands(), &HONDA_ODOMETERS);
        assert_eq!("KTM".parse::<Brand>().unwrap(), Brand::Ktm);
        assert!("vespa".parse::<Brand>().is_err());
    }
}

//! Response decoding
//!
//! Maps a completed adapter response, together with the command that
//! produced it, to at most one [`SensorUpdate`]. The rule is picked from the
//! command alone; the response text is only searched for the positive
//! response echo, never used to guess what was asked.
//!
//! The decoder is deliberately forgiving. Responses are normalized by
//! dropping `SEARCHING...` and every whitespace character, the payload is
//! taken right after the first occurrence of the expected echo, and anything
//! that does not line up yields `Ok(None)`. This is string heuristics, not an
//! ISO 15765-4 multi-frame reassembler.

use crate::command::{self, compact};
use crate::dtc;
use crate::error::DecodeError;
use crate::pid::Pid;
use crate::snapshot::{Odometer, SensorUpdate};
use tracing::debug;

/// Added to the request mode or service byte in a positive response
const POSITIVE_RESPONSE_OFFSET: u8 = 0x40;

/// Markers of a negative or unusable reply, checked on normalized text
const NEGATIVE_MARKERS: [&str; 3] = ["NODATA", "ERROR", "?"];

/// How a command's response is decoded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rule {
    Pid(Pid),
    Voltage,
    ReadDtc,
    ClearDtc,
    Vin,
    UdsOdometer,
}

impl Rule {
    fn for_command(command: &str) -> Option<Self> {
        let compact = compact(command);
        if let Some(pid) = Pid::from_command(&compact) {
            return Some(Rule::Pid(pid));
        }
        match compact.as_str() {
            c if c == command::VOLTAGE => Some(Rule::Voltage),
            c if c == command::READ_DTC => Some(Rule::ReadDtc),
            c if c == command::CLEAR_DTC => Some(Rule::ClearDtc),
            c if c == command::READ_VIN => Some(Rule::Vin),
            c if command::is_uds_odometer(c) => Some(Rule::UdsOdometer),
            _ => None,
        }
    }

    fn is_odometer(&self) -> bool {
        matches!(self, Rule::Pid(Pid::Odometer) | Rule::UdsOdometer)
    }
}

/// Strip `SEARCHING...` and all whitespace
pub fn normalize(raw: &str) -> String {
    raw.replace("SEARCHING...", "")
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect()
}

/// True when normalized text carries a negative response marker
pub fn is_negative(normalized: &str) -> bool {
    NEGATIVE_MARKERS.iter().any(|m| normalized.contains(m))
}

/// Positive response echo for a mode/service request.
///
/// `"010C"` gives `"410C"`, `"22 11 02"` gives `"621102"`. AT commands and
/// anything not starting with a hex byte have no echo.
pub fn expected_echo(command: &str) -> Option<String> {
    let compact = compact(command);
    if compact.starts_with("AT") {
        return None;
    }
    let mode = u8::from_str_radix(compact.get(..2)?, 16).ok()?;
    let response_mode = mode.checked_add(POSITIVE_RESPONSE_OFFSET)?;
    Some(format!("{:02X}{}", response_mode, &compact[2..]))
}

/// Payload of `bytes` bytes following the first `echo` in `normalized`.
///
/// `None` if the echo is absent or the payload is short.
fn payload_after<'a>(normalized: &'a str, echo: &str, bytes: usize) -> Option<&'a str> {
    let start = normalized.find(echo)? + echo.len();
    normalized.get(start..start + bytes * 2)
}

fn hex_bytes(command: &str, payload: &str) -> Result<Vec<u8>, DecodeError> {
    let invalid = || DecodeError::InvalidHex {
        command: command.to_string(),
        payload: payload.to_string(),
    };
    if payload.len() % 2 != 0 || !payload.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(invalid());
    }
    (0..payload.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&payload[i..i + 2], 16).map_err(|_| invalid()))
        .collect()
}

/// Decode one response.
///
/// `Ok(None)` means the response did not carry what this command expects (no
/// echo, short payload, or a command the decoder has no rule for) and is the
/// normal outcome for speculative requests. `Err` means the echo was found
/// but what followed was malformed.
pub fn decode(command: &str, raw: &str) -> Result<Option<SensorUpdate>, DecodeError> {
    let Some(rule) = Rule::for_command(command) else {
        return Ok(None);
    };
    let clean = normalize(raw);

    if is_negative(&clean) {
        debug!("{} answered negatively: {}", command, clean);
        return Ok(rule
            .is_odometer()
            .then_some(SensorUpdate::Odometer(Odometer::Unsupported)));
    }

    match rule {
        Rule::Voltage => decode_voltage(&clean),
        Rule::Pid(pid) => decode_pid(command, pid, &clean),
        Rule::ReadDtc => Ok(decode_dtcs(&clean)),
        Rule::ClearDtc => Ok((clean.contains("44") || clean.contains("OK"))
            .then_some(SensorUpdate::DtcsCleared)),
        Rule::Vin => Ok(decode_vin(&clean)),
        Rule::UdsOdometer => decode_uds_odometer(command, &clean),
    }
}

fn decode_pid(command: &str, pid: Pid, clean: &str) -> Result<Option<SensorUpdate>, DecodeError> {
    let Some(echo) = expected_echo(command) else {
        return Ok(None);
    };
    let Some(payload) = payload_after(clean, &echo, pid.response_bytes()) else {
        return Ok(None);
    };
    let b = hex_bytes(command, payload)?;
    Ok(Some(pid_value(pid, &b)))
}

/// Standard J1979 formulas; `b` holds exactly `pid.response_bytes()` bytes
fn pid_value(pid: Pid, b: &[u8]) -> SensorUpdate {
    let percent = |a: u8| ((a as u32 * 200 + 255) / 510) as u8;
    match pid {
        Pid::Rpm => SensorUpdate::Rpm(((b[0] as u32 * 256 + b[1] as u32) + 2) / 4),
        Pid::Speed => SensorUpdate::Speed(b[0]),
        Pid::CoolantTemp => SensorUpdate::CoolantTemp(b[0] as i16 - 40),
        Pid::IntakeAirTemp => SensorUpdate::IntakeAirTemp(b[0] as i16 - 40),
        Pid::ThrottlePosition => SensorUpdate::Throttle(percent(b[0])),
        Pid::EngineLoad => SensorUpdate::EngineLoad(percent(b[0])),
        Pid::IntakeManifoldPressure => SensorUpdate::ManifoldPressure(b[0]),
        Pid::DistanceSinceCleared => {
            SensorUpdate::DistanceSinceCleared(u16::from_be_bytes([b[0], b[1]]))
        }
        Pid::DistanceMilOn => SensorUpdate::DistanceMilOn(u16::from_be_bytes([b[0], b[1]])),
        Pid::Odometer => {
            let raw = u32::from_be_bytes([b[0], b[1], b[2], b[3]]) as u64;
            SensorUpdate::Odometer(Odometer::Km(((raw + 5) / 10) as u32))
        }
    }
}

fn decode_voltage(clean: &str) -> Result<Option<SensorUpdate>, DecodeError> {
    let Some(start) = clean.find(|c: char| c.is_ascii_digit()) else {
        return Ok(None);
    };
    let rest = &clean[start..];
    let mut seen_dot = false;
    let end = rest
        .find(|c: char| {
            if c == '.' && !seen_dot {
                seen_dot = true;
                false
            } else {
                !c.is_ascii_digit()
            }
        })
        .unwrap_or(rest.len());
    rest[..end]
        .parse::<f32>()
        .map(|v| Some(SensorUpdate::BatteryVoltage(v)))
        .map_err(|_| DecodeError::InvalidVoltage(clean.to_string()))
}

fn decode_dtcs(clean: &str) -> Option<SensorUpdate> {
    let echo = expected_echo(command::READ_DTC)?;
    let start = clean.find(&echo)? + echo.len();
    Some(SensorUpdate::Dtcs(dtc::decode_payload(&clean[start..])))
}

fn decode_vin(clean: &str) -> Option<SensorUpdate> {
    let echo = expected_echo(command::READ_VIN)?;
    let start = clean.find(&echo)? + echo.len();
    let ascii: String = clean[start..]
        .as_bytes()
        .chunks(2)
        .filter_map(|pair| std::str::from_utf8(pair).ok())
        .filter(|pair| pair.len() == 2)
        .filter_map(|pair| u8::from_str_radix(pair, 16).ok())
        .filter(|b| (32..=126).contains(b))
        .map(char::from)
        .collect();

    if let Some(vin) = find_vin(&ascii) {
        return Some(SensorUpdate::Vin(vin.to_string()));
    }
    (ascii.len() >= 17).then(|| SensorUpdate::Vin(ascii))
}

/// VIN alphabet: digits and capitals except I, O and Q
fn is_vin_char(c: char) -> bool {
    c.is_ascii_digit() || (c.is_ascii_uppercase() && !matches!(c, 'I' | 'O' | 'Q'))
}

/// First run of 17 VIN characters
fn find_vin(ascii: &str) -> Option<&str> {
    let mut run_start = 0;
    for (i, c) in ascii.char_indices() {
        if !is_vin_char(c) {
            run_start = i + c.len_utf8();
            continue;
        }
        if i + 1 - run_start == 17 {
            return Some(&ascii[run_start..=i]);
        }
    }
    None
}

fn decode_uds_odometer(command: &str, clean: &str) -> Result<Option<SensorUpdate>, DecodeError> {
    let Some(echo) = expected_echo(command) else {
        return Ok(None);
    };
    let Some(payload) = payload_after(clean, &echo, 3) else {
        return Ok(None);
    };
    let b = hex_bytes(command, payload)?;
    let raw = (b[0] as u64) << 16 | (b[1] as u64) << 8 | b[2] as u64;
    Ok(Some(SensorUpdate::Odometer(Odometer::Km(((raw + 5) / 10) as u32))))
}

/// Decode a Mode 02 freeze frame reply (`020C00`, `020D00`, `020500`).
///
/// The echo includes the frame number, so `020C00` expects `420C00`. The
/// result is returned, not applied to the live snapshot.
pub fn decode_freeze_frame(command: &str, raw: &str) -> Result<Option<SensorUpdate>, DecodeError> {
    let compact = compact(command);
    let Some(pid) = compact
        .strip_prefix("02")
        .and_then(|rest| rest.get(..2))
        .and_then(|code| u8::from_str_radix(code, 16).ok())
        .and_then(Pid::from_hex)
    else {
        return Ok(None);
    };
    if !matches!(pid, Pid::Rpm | Pid::Speed | Pid::CoolantTemp) {
        return Ok(None);
    }
    let clean = normalize(raw);
    if is_negative(&clean) {
        return Ok(None);
    }
    let Some(echo) = expected_echo(&compact) else {
        return Ok(None);
    };
    let Some(payload) = payload_after(&clean, &echo, pid.response_bytes()) else {
        return Ok(None);
    };
    let b = hex_bytes(command, payload)?;
    Ok(Some(pid_value(pid, &b)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_expected_echo() {
        assert_eq!(expected_echo("010C").as_deref(), Some("410C"));
        assert_eq!(expected_echo("0902").as_deref(), Some("4902"));
        assert_eq!(expected_echo("03").as_deref(), Some("43"));
        assert_eq!(expected_echo("22 11 02").as_deref(), Some("621102"));
        assert_eq!(expected_echo("ATRV"), None);
    }

    #[test]
    fn test_rpm_decode() {
        // ((0x0C * 256) + 0x1A) / 4 = 3098 / 4 = 774.5, rounded up
        let update = decode("010C", "41 0C 0C 1A").unwrap();
        assert_eq!(update, Some(SensorUpdate::Rpm(775)));
    }

    #[test]
    fn test_searching_prefix_ignored() {
        let update = decode("010D", "SEARCHING...\r41 0D 55").unwrap();
        assert_eq!(update, Some(SensorUpdate::Speed(85)));
    }

    #[test]
    fn test_temperature_and_percent_decode() {
        assert_eq!(decode("0105", "41 05 73").unwrap(), Some(SensorUpdate::CoolantTemp(75)));
        assert_eq!(decode("010F", "410F1E").unwrap(), Some(SensorUpdate::IntakeAirTemp(-10)));
        // 0x80 * 100 / 255 = 50.2
        assert_eq!(decode("0111", "411180").unwrap(), Some(SensorUpdate::Throttle(50)));
        assert_eq!(decode("0104", "4104FF").unwrap(), Some(SensorUpdate::EngineLoad(100)));
        assert_eq!(decode("010B", "410B65").unwrap(), Some(SensorUpdate::ManifoldPressure(101)));
    }

    #[test]
    fn test_distance_decode() {
        assert_eq!(
            decode("0131", "41 31 01 F4").unwrap(),
            Some(SensorUpdate::DistanceSinceCleared(500))
        );
        assert_eq!(decode("0121", "41210010").unwrap(), Some(SensorUpdate::DistanceMilOn(16)));
    }

    #[test]
    fn test_odometer_decode() {
        // 0x0001E240 = 123456 -> 12345.6 km -> 12346
        assert_eq!(
            decode("01A6", "41 A6 00 01 E2 40").unwrap(),
            Some(SensorUpdate::Odometer(Odometer::Km(12346)))
        );
    }

    #[test]
    fn test_unsupported_odometer() {
        assert_eq!(
            decode("01A6", "NO DATA").unwrap(),
            Some(SensorUpdate::Odometer(Odometer::Unsupported))
        );
        assert_eq!(
            decode("22 11 02", "?").unwrap(),
            Some(SensorUpdate::Odometer(Odometer::Unsupported))
        );
        // Non-odometer PIDs stay untouched on a negative reply
        assert_eq!(decode("010C", "NO DATA").unwrap(), None);
    }

    #[test]
    fn test_uds_odometer_decode() {
        // 0x01E240 = 123456 -> 12346 km
        assert_eq!(
            decode("22 11 02", "62 11 02 01 E2 40").unwrap(),
            Some(SensorUpdate::Odometer(Odometer::Km(12346)))
        );
        // UDS negative response carries no echo
        assert_eq!(decode("22 12 01", "7F 22 31").unwrap(), None);
    }

    #[test]
    fn test_missing_echo_or_short_payload() {
        assert_eq!(decode("010C", "41 0D 55").unwrap(), None);
        assert_eq!(decode("010C", "41 0C 0C").unwrap(), None);
        assert_eq!(decode("01A6", "41A60001").unwrap(), None);
    }

    #[test]
    fn test_malformed_payload() {
        let err = decode("010C", "410CZZ1A").unwrap_err();
        assert!(matches!(err, DecodeError::InvalidHex { .. }));
        assert!(decode("010D", "410D+1").is_err());
    }

    #[test]
    fn test_voltage_decode() {
        assert_eq!(decode("ATRV", "12.4V").unwrap(), Some(SensorUpdate::BatteryVoltage(12.4)));
        assert_eq!(decode("ATRV", " 14V ").unwrap(), Some(SensorUpdate::BatteryVoltage(14.0)));
        assert_eq!(decode("ATRV", "").unwrap(), None);
    }

    #[test]
    fn test_dtc_decode() {
        assert_eq!(
            decode("03", "43 01 13 00 00 00 00").unwrap(),
            Some(SensorUpdate::Dtcs(vec!["P0113".to_string()]))
        );
        assert_eq!(
            decode("03", "43 01 13 C1 00 00 00").unwrap(),
            Some(SensorUpdate::Dtcs(vec!["P0113".to_string(), "U0100".to_string()]))
        );
        assert_eq!(decode("03", "43").unwrap(), Some(SensorUpdate::Dtcs(vec![])));
        assert_eq!(decode("03", "OK").unwrap(), None);
    }

    #[test]
    fn test_dtc_clear() {
        assert_eq!(decode("04", "44").unwrap(), Some(SensorUpdate::DtcsCleared));
        assert_eq!(decode("04", "OK").unwrap(), Some(SensorUpdate::DtcsCleared));
        assert_eq!(decode("04", "7F0422").unwrap(), None);
    }

    #[test]
    fn test_vin_decode() {
        let raw = "49 02 01 31 48 47 43 4D 38 32 36 33 33 41 30 30 34 33 35 32";
        assert_eq!(
            decode("0902", raw).unwrap(),
            Some(SensorUpdate::Vin("1HGCM82633A004352".to_string()))
        );
    }

    #[test]
    fn test_vin_fallback_to_raw_ascii() {
        // 17 printable characters, but lowercase so no VIN run matches
        let hex: String = "abcdefghjklmnprst".bytes().map(|b| format!("{b:02X}")).collect();
        assert_eq!(
            decode("0902", &format!("4902{hex}")).unwrap(),
            Some(SensorUpdate::Vin("abcdefghjklmnprst".to_string()))
        );
        assert_eq!(decode("0902", "490201313233").unwrap(), None);
    }

    #[test]
    fn test_unknown_command() {
        assert_eq!(decode("ATZ", "ELM327 v1.5").unwrap(), None);
        assert_eq!(decode("0100", "4100BE3FA813").unwrap(), None);
    }

    #[test]
    fn test_freeze_frame_decode() {
        assert_eq!(
            decode_freeze_frame("020C00", "42 0C 00 0C 1A").unwrap(),
            Some(SensorUpdate::Rpm(775))
        );
        assert_eq!(
            decode_freeze_frame("020500", "42 05 00 73").unwrap(),
            Some(SensorUpdate::CoolantTemp(75))
        );
        assert_eq!(decode_freeze_frame("020D00", "NO DATA").unwrap(), None);
        assert_eq!(decode_freeze_frame("010C", "410C0C1A").unwrap(), None);
    }

    proptest! {
        #[test]
        fn prop_decode_never_panics(command in "(010C|01A6|03|0902|ATRV|22 11 02)", raw in "\\PC*") {
            let _ = decode(&command, &raw);
        }

        #[test]
        fn prop_negative_reply_only_marks_odometer(marker in "(NO DATA|ERROR|\\?)", pid in "(0C|0D|05|11|04|0F|0B)") {
            let update = decode(&format!("01{pid}"), &marker).unwrap();
            prop_assert_eq!(update, None);
        }
    }
}

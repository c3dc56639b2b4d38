//! Diagnostic Trouble Codes
//!
//! Two-byte DTC decoding (SAE J2012) and an offline description table for the
//! common powertrain codes.

/// Decode one 4-hex-digit group such as `"0113"` into `"P0113"`.
///
/// Returns `None` for the all-zero padding group and for groups that are not
/// four hex digits.
pub fn decode_group(group: &str) -> Option<String> {
    if group.len() != 4 || !group.chars().all(|c| c.is_ascii_hexdigit()) || group == "0000" {
        return None;
    }
    let first = group.chars().next()?.to_digit(16)?;
    let letter = match first >> 2 {
        0 => 'P',
        1 => 'C',
        2 => 'B',
        _ => 'U',
    };
    Some(format!("{}{}{}", letter, first & 0x03, group[1..].to_ascii_uppercase()))
}

/// Split a DTC payload into codes, skipping padding and partial groups
pub fn decode_payload(payload: &str) -> Vec<String> {
    payload
        .as_bytes()
        .chunks(4)
        .filter_map(|chunk| std::str::from_utf8(chunk).ok())
        .filter_map(decode_group)
        .collect()
}

const DESCRIPTIONS: &[(&str, &str)] = &[
    // Fuel & air
    ("P0100", "Mass air flow sensor circuit malfunction"),
    ("P0101", "Mass air flow sensor range/performance"),
    ("P0102", "Mass air flow sensor low input"),
    ("P0103", "Mass air flow sensor high input"),
    ("P0110", "Intake air temperature sensor circuit malfunction"),
    ("P0112", "Intake air temperature sensor low input"),
    ("P0113", "Intake air temperature sensor high input"),
    ("P0115", "Engine coolant temperature sensor circuit malfunction"),
    ("P0117", "Engine coolant temperature sensor low input"),
    ("P0118", "Engine coolant temperature sensor high input"),
    ("P0120", "Throttle position sensor circuit malfunction"),
    ("P0121", "Throttle position sensor range/performance"),
    ("P0122", "Throttle position sensor low input"),
    ("P0123", "Throttle position sensor high input"),
    ("P0130", "O2 sensor circuit malfunction (bank 1 sensor 1)"),
    ("P0131", "O2 sensor low voltage (bank 1 sensor 1)"),
    ("P0132", "O2 sensor high voltage (bank 1 sensor 1)"),
    ("P0133", "O2 sensor slow response (bank 1 sensor 1)"),
    ("P0134", "O2 sensor no activity (bank 1 sensor 1)"),
    ("P0135", "O2 sensor heater circuit malfunction (bank 1 sensor 1)"),
    ("P0136", "O2 sensor circuit malfunction (bank 1 sensor 2)"),
    ("P0171", "System too lean (bank 1)"),
    ("P0172", "System too rich (bank 1)"),
    // Injectors
    ("P0200", "Injector circuit malfunction"),
    ("P0201", "Injector circuit malfunction, cylinder 1"),
    ("P0202", "Injector circuit malfunction, cylinder 2"),
    ("P0203", "Injector circuit malfunction, cylinder 3"),
    ("P0204", "Injector circuit malfunction, cylinder 4"),
    // Ignition & misfire
    ("P0300", "Random/multiple cylinder misfire detected"),
    ("P0301", "Cylinder 1 misfire detected"),
    ("P0302", "Cylinder 2 misfire detected"),
    ("P0303", "Cylinder 3 misfire detected"),
    ("P0304", "Cylinder 4 misfire detected"),
    ("P0335", "Crankshaft position sensor A circuit malfunction"),
    ("P0336", "Crankshaft position sensor A range/performance"),
    ("P0340", "Camshaft position sensor A circuit malfunction"),
    // EGR
    ("P0401", "Exhaust gas recirculation flow insufficient"),
    ("P0402", "Exhaust gas recirculation flow excessive"),
    // Emissions
    ("P0420", "Catalyst system efficiency below threshold (bank 1)"),
    ("P0421", "Warm up catalyst efficiency below threshold (bank 1)"),
    ("P0430", "Catalyst system efficiency below threshold (bank 2)"),
    ("P0440", "Evaporative emission control system malfunction"),
    ("P0441", "Evaporative emission system incorrect purge flow"),
    ("P0442", "Evaporative emission system small leak detected"),
    ("P0443", "Evaporative emission system purge control valve malfunction"),
    ("P0446", "Evaporative emission system vent control malfunction"),
    // Speed & idle
    ("P0500", "Vehicle speed sensor malfunction"),
    ("P0505", "Idle control system malfunction"),
    ("P0506", "Idle control system RPM lower than expected"),
    ("P0507", "Idle control system RPM higher than expected"),
    // Charging
    ("P0560", "System voltage malfunction"),
    ("P0562", "System voltage low"),
    ("P0563", "System voltage high"),
    // Transmission
    ("P0700", "Transmission control system malfunction"),
    ("P0715", "Input/turbine speed sensor circuit malfunction"),
    ("P0720", "Output speed sensor circuit malfunction"),
    ("P0730", "Incorrect gear ratio"),
];

/// Look up a human readable description for a code
pub fn describe(code: &str) -> Option<&'static str> {
    let code = code.trim().to_ascii_uppercase();
    DESCRIPTIONS
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, description)| *description)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_group_letters() {
        assert_eq!(decode_group("0113").as_deref(), Some("P0113"));
        assert_eq!(decode_group("4123").as_deref(), Some("C0123"));
        assert_eq!(decode_group("9234").as_deref(), Some("B1234"));
        assert_eq!(decode_group("C100").as_deref(), Some("U0100"));
        assert_eq!(decode_group("e1a0").as_deref(), Some("U21A0"));
    }

    #[test]
    fn test_decode_group_rejects_padding() {
        assert_eq!(decode_group("0000"), None);
        assert_eq!(decode_group("011"), None);
        assert_eq!(decode_group("0:43"), None);
    }

    #[test]
    fn test_decode_payload() {
        assert_eq!(decode_payload("011303000000"), vec!["P0113", "P0300"]);
        assert_eq!(decode_payload("01130"), vec!["P0113"]);
        assert!(decode_payload("").is_empty());
    }

    #[test]
    fn test_describe() {
        assert_eq!(describe("p0113 "), Some("Intake air temperature sensor high input"));
        assert_eq!(describe("U0100"), None);
    }
}

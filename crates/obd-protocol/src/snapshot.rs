//! Decoded sensor state

use serde::{Deserialize, Serialize};

/// Odometer reading state.
///
/// `Unsupported` records that the vehicle answered with a negative response,
/// which is different from never having asked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Odometer {
    #[default]
    Unknown,
    Unsupported,
    Km(u32),
}

impl Odometer {
    /// The reading in km, if one was decoded
    pub fn km(&self) -> Option<u32> {
        match self {
            Odometer::Km(km) => Some(*km),
            _ => None,
        }
    }
}

/// A single decoded value, applied to the snapshot as one write
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SensorUpdate {
    Rpm(u32),
    Speed(u8),
    CoolantTemp(i16),
    Throttle(u8),
    EngineLoad(u8),
    IntakeAirTemp(i16),
    ManifoldPressure(u8),
    BatteryVoltage(f32),
    Vin(String),
    Odometer(Odometer),
    DistanceSinceCleared(u16),
    DistanceMilOn(u16),
    Dtcs(Vec<String>),
    DtcsCleared,
}

/// Last known decoded values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorSnapshot {
    /// Time of the last applied update (Unix ms)
    pub timestamp_ms: u64,
    /// Engine RPM
    pub rpm: Option<u32>,
    /// Vehicle speed (km/h)
    pub speed: Option<u8>,
    /// Coolant temperature (°C)
    pub coolant_temp: Option<i16>,
    /// Throttle position (%)
    pub throttle: Option<u8>,
    /// Engine load (%)
    pub engine_load: Option<u8>,
    /// Intake air temperature (°C)
    pub intake_air_temp: Option<i16>,
    /// Manifold absolute pressure (kPa)
    pub manifold_pressure: Option<u8>,
    /// Battery voltage (V)
    pub battery_voltage: Option<f32>,
    pub vin: Option<String>,
    pub odometer: Odometer,
    /// km
    pub distance_since_cleared: Option<u16>,
    /// km
    pub distance_mil_on: Option<u16>,
    /// Stored trouble codes, e.g. "P0113"
    pub dtcs: Vec<String>,
}

impl SensorSnapshot {
    /// Apply one decoded update
    pub fn apply(&mut self, update: SensorUpdate, timestamp_ms: u64) {
        match update {
            SensorUpdate::Rpm(v) => self.rpm = Some(v),
            SensorUpdate::Speed(v) => self.speed = Some(v),
            SensorUpdate::CoolantTemp(v) => self.coolant_temp = Some(v),
            SensorUpdate::Throttle(v) => self.throttle = Some(v),
            SensorUpdate::EngineLoad(v) => self.engine_load = Some(v),
            SensorUpdate::IntakeAirTemp(v) => self.intake_air_temp = Some(v),
            SensorUpdate::ManifoldPressure(v) => self.manifold_pressure = Some(v),
            SensorUpdate::BatteryVoltage(v) => self.battery_voltage = Some(v),
            SensorUpdate::Vin(v) => self.vin = Some(v),
            SensorUpdate::Odometer(v) => self.odometer = v,
            SensorUpdate::DistanceSinceCleared(v) => self.distance_since_cleared = Some(v),
            SensorUpdate::DistanceMilOn(v) => self.distance_mil_on = Some(v),
            SensorUpdate::Dtcs(v) => self.dtcs = v,
            SensorUpdate::DtcsCleared => self.dtcs.clear(),
        }
        self.timestamp_ms = timestamp_ms;
    }
}

/// Freeze frame 0 as captured when the first DTC was stored
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreezeFrame {
    pub rpm: Option<u32>,
    pub speed: Option<u8>,
    pub coolant_temp: Option<i16>,
}

impl FreezeFrame {
    /// Record a decoded Mode 02 value; other updates are ignored
    pub fn record(&mut self, update: SensorUpdate) {
        match update {
            SensorUpdate::Rpm(v) => self.rpm = Some(v),
            SensorUpdate::Speed(v) => self.speed = Some(v),
            SensorUpdate::CoolantTemp(v) => self.coolant_temp = Some(v),
            _ => {}
        }
    }

    /// True when no value was captured
    pub fn is_empty(&self) -> bool {
        self.rpm.is_none() && self.speed.is_none() && self.coolant_temp.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_leaves_other_fields() {
        let mut snapshot = SensorSnapshot::default();
        snapshot.apply(SensorUpdate::Rpm(775), 1);
        snapshot.apply(SensorUpdate::Speed(42), 2);

        assert_eq!(snapshot.rpm, Some(775));
        assert_eq!(snapshot.speed, Some(42));
        assert_eq!(snapshot.coolant_temp, None);
        assert_eq!(snapshot.timestamp_ms, 2);
    }

    #[test]
    fn test_dtcs_cleared() {
        let mut snapshot = SensorSnapshot::default();
        snapshot.apply(SensorUpdate::Dtcs(vec!["P0113".into()]), 0);
        snapshot.apply(SensorUpdate::DtcsCleared, 0);
        assert!(snapshot.dtcs.is_empty());
    }

    #[test]
    fn test_odometer_states() {
        assert_eq!(Odometer::default(), Odometer::Unknown);
        assert_eq!(Odometer::Km(12345).km(), Some(12345));
        assert_eq!(Odometer::Unsupported.km(), None);
    }

    #[test]
    fn test_freeze_frame_record() {
        let mut frame = FreezeFrame::default();
        assert!(frame.is_empty());
        frame.record(SensorUpdate::CoolantTemp(88));
        frame.record(SensorUpdate::Throttle(10));
        assert_eq!(frame.coolant_temp, Some(88));
        assert!(!frame.is_empty());
    }
}

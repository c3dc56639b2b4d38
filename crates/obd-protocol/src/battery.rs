//! Battery and charging system verdicts from `ATRV` readings

use serde::{Deserialize, Serialize};

/// Resting voltage, engine off
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RestingVerdict {
    Full,
    Good,
    Weak,
    Flat,
}

/// Lowest voltage seen while cranking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CrankingVerdict {
    Normal,
    Low,
    Critical,
}

/// Voltage at idle with the alternator running
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChargingVerdict {
    Normal,
    Undercharging,
    Overcharging,
    RegulatorFault,
}

/// Result of a three-phase battery test
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BatteryReport {
    pub resting_v: f32,
    pub cranking_v: f32,
    pub charging_v: f32,
    pub resting: RestingVerdict,
    pub cranking: CrankingVerdict,
    pub charging: ChargingVerdict,
}

impl BatteryReport {
    /// Grade the three readings.
    ///
    /// `cranking_v` falls back to the resting reading when no sample was
    /// taken during cranking.
    pub fn assess(resting_v: f32, cranking_v: Option<f32>, charging_v: f32) -> Self {
        let cranking_v = cranking_v.unwrap_or(resting_v);
        Self {
            resting_v,
            cranking_v,
            charging_v,
            resting: match resting_v {
                v if v >= 12.6 => RestingVerdict::Full,
                v if v >= 12.4 => RestingVerdict::Good,
                v if v >= 12.0 => RestingVerdict::Weak,
                _ => RestingVerdict::Flat,
            },
            cranking: match cranking_v {
                v if v >= 10.0 => CrankingVerdict::Normal,
                v if v >= 9.0 => CrankingVerdict::Low,
                _ => CrankingVerdict::Critical,
            },
            charging: match charging_v {
                v if (13.5..=14.5).contains(&v) => ChargingVerdict::Normal,
                v if (13.0..13.5).contains(&v) => ChargingVerdict::Undercharging,
                v if v > 14.5 => ChargingVerdict::Overcharging,
                _ => ChargingVerdict::RegulatorFault,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_healthy_system() {
        let report = BatteryReport::assess(12.7, Some(10.4), 14.1);
        assert_eq!(report.resting, RestingVerdict::Full);
        assert_eq!(report.cranking, CrankingVerdict::Normal);
        assert_eq!(report.charging, ChargingVerdict::Normal);
    }

    #[test]
    fn test_tired_battery() {
        let report = BatteryReport::assess(12.1, Some(8.7), 13.2);
        assert_eq!(report.resting, RestingVerdict::Weak);
        assert_eq!(report.cranking, CrankingVerdict::Critical);
        assert_eq!(report.charging, ChargingVerdict::Undercharging);
    }

    #[test]
    fn test_regulator_limits() {
        assert_eq!(BatteryReport::assess(12.5, None, 15.2).charging, ChargingVerdict::Overcharging);
        assert_eq!(BatteryReport::assess(12.5, None, 12.4).charging, ChargingVerdict::RegulatorFault);
    }

    #[test]
    fn test_missing_cranking_sample_uses_resting() {
        let report = BatteryReport::assess(11.8, None, 14.0);
        assert_eq!(report.cranking_v, 11.8);
        assert_eq!(report.resting, RestingVerdict::Flat);
        assert_eq!(report.cranking, CrankingVerdict::Normal);
    }
}

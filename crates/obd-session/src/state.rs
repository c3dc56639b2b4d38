//! Observable session state

use obd_link::DeviceInfo;
use serde::Serialize;

/// Status of one connection axis
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkStatus {
    #[default]
    Disconnected,
    Scanning,
    Connecting,
    Connected,
    Error,
}

/// Transport, adapter and ECU status.
///
/// The ECU axis only means something while the adapter is connected.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionState {
    pub transport: LinkStatus,
    pub adapter: LinkStatus,
    pub ecu: LinkStatus,
    /// Device of the current or last attempt
    pub device: Option<DeviceInfo>,
    /// Set once a link was torn down, so the idle state reads as disconnected
    pub was_connected: bool,
}

/// Lifecycle phase derived from the status axes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Phase {
    Idle,
    ConnectingAdapter,
    AdapterConnected,
    EcuConnecting,
    EcuConnected,
    Error,
    Disconnected,
}

impl ConnectionState {
    pub fn phase(&self) -> Phase {
        match (self.adapter, self.ecu) {
            (LinkStatus::Error, _) => Phase::Error,
            (LinkStatus::Scanning | LinkStatus::Connecting, _) => Phase::ConnectingAdapter,
            (LinkStatus::Connected, LinkStatus::Connected) => Phase::EcuConnected,
            (LinkStatus::Connected, LinkStatus::Connecting) => Phase::EcuConnecting,
            (LinkStatus::Connected, LinkStatus::Error) => Phase::Error,
            (LinkStatus::Connected, _) => Phase::AdapterConnected,
            (LinkStatus::Disconnected, _) if self.was_connected => Phase::Disconnected,
            (LinkStatus::Disconnected, _) => Phase::Idle,
        }
    }

    pub fn is_ecu_connected(&self) -> bool {
        self.adapter == LinkStatus::Connected && self.ecu == LinkStatus::Connected
    }

    /// State after a link is gone
    pub(crate) fn torn_down() -> Self {
        Self {
            was_connected: true,
            ..Default::default()
        }
    }
}

/// Adapter firmware as told by the `ATI` banner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FirmwareKind {
    Genuine,
    /// Advertises a version the genuine chip never shipped (v1.5, v2.1)
    Clone,
    Unknown,
}

/// What the adapter said about itself
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdapterInfo {
    pub banner: String,
    pub firmware: FirmwareKind,
}

impl AdapterInfo {
    pub fn from_banner(banner: &str) -> Self {
        let banner = banner.trim().to_string();
        let upper = banner.to_ascii_uppercase();
        let firmware = if upper.contains("V1.5") || upper.contains("V2.1") {
            FirmwareKind::Clone
        } else if upper.contains("ELM327") {
            FirmwareKind::Genuine
        } else {
            FirmwareKind::Unknown
        };
        Self { banner, firmware }
    }
}

/// One-shot notifications
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SessionEvent {
    /// The link dropped on its own
    ConnectionLost,
    /// The caller disconnected
    Disconnected,
}

/// Adaptation routine to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AdaptationKind {
    /// Reset fuel trims by clearing codes (`04`)
    Fuel,
    /// UDS hard reset (`11 01`)
    Ecu,
}

impl AdaptationKind {
    pub fn command(&self) -> &'static str {
        match self {
            AdaptationKind::Fuel => obd_protocol::command::CLEAR_DTC,
            AdaptationKind::Ecu => obd_protocol::command::ECU_RESET,
        }
    }
}

impl std::str::FromStr for AdaptationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fuel" => Ok(AdaptationKind::Fuel),
            "ecu" => Ok(AdaptationKind::Ecu),
            other => Err(format!("unknown adaptation routine: {other}")),
        }
    }
}

/// Battery test progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BatteryStage {
    /// Engine off reading
    Resting,
    /// Sampling while the engine is cranked
    Cranking,
    /// Waiting for idle to settle
    Settling,
    /// Alternator reading
    Charging,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_transitions() {
        let mut state = ConnectionState::default();
        assert_eq!(state.phase(), Phase::Idle);

        state.adapter = LinkStatus::Connecting;
        assert_eq!(state.phase(), Phase::ConnectingAdapter);

        state.adapter = LinkStatus::Connected;
        assert_eq!(state.phase(), Phase::AdapterConnected);
        state.ecu = LinkStatus::Connecting;
        assert_eq!(state.phase(), Phase::EcuConnecting);
        state.ecu = LinkStatus::Error;
        assert_eq!(state.phase(), Phase::Error);
        state.ecu = LinkStatus::Connected;
        assert!(state.is_ecu_connected());

        assert_eq!(ConnectionState::torn_down().phase(), Phase::Disconnected);
    }

    #[test]
    fn test_firmware_from_banner() {
        assert_eq!(AdapterInfo::from_banner("ELM327 v1.5").firmware, FirmwareKind::Clone);
        assert_eq!(AdapterInfo::from_banner("ELM327 v2.1\r").firmware, FirmwareKind::Clone);
        assert_eq!(AdapterInfo::from_banner("ELM327 v1.4b").firmware, FirmwareKind::Genuine);
        assert_eq!(AdapterInfo::from_banner("OBDLink MX").firmware, FirmwareKind::Unknown);
    }
}

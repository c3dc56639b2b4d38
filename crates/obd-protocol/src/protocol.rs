//! OBD-II bus protocol selection (`ATSPn`)

use serde::{Deserialize, Serialize};

/// Bus protocols an ELM327 can be told to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ObdProtocol {
    /// Automatic protocol detection
    #[default]
    Auto,
    /// SAE J1850 PWM (41.6 kbaud)
    J1850Pwm,
    /// SAE J1850 VPW (10.4 kbaud)
    J1850Vpw,
    /// ISO 9141-2 (10.4 kbaud, 5 baud init)
    Iso9141,
    /// ISO 14230-4 KWP (slow init, 10.4 kbaud)
    Kwp,
    /// ISO 14230-4 KWP (fast init, 10.4 kbaud)
    KwpFast,
    /// ISO 15765-4 CAN (11 bit ID, 500 kbaud)
    Can11Bit500,
    /// ISO 15765-4 CAN (29 bit ID, 500 kbaud)
    Can29Bit500,
    /// ISO 15765-4 CAN (11 bit ID, 250 kbaud)
    Can11Bit250,
    /// ISO 15765-4 CAN (29 bit ID, 250 kbaud)
    Can29Bit250,
}

impl ObdProtocol {
    /// The `ATSPn` command selecting this protocol
    pub fn to_elm_command(&self) -> &'static str {
        match self {
            ObdProtocol::Auto => "ATSP0",
            ObdProtocol::J1850Pwm => "ATSP1",
            ObdProtocol::J1850Vpw => "ATSP2",
            ObdProtocol::Iso9141 => "ATSP3",
            ObdProtocol::Kwp => "ATSP4",
            ObdProtocol::KwpFast => "ATSP5",
            ObdProtocol::Can11Bit500 => "ATSP6",
            ObdProtocol::Can29Bit500 => "ATSP7",
            ObdProtocol::Can11Bit250 => "ATSP8",
            ObdProtocol::Can29Bit250 => "ATSP9",
        }
    }

    /// Bus family of this protocol, `None` while the adapter auto-detects
    pub fn bus(&self) -> Option<Bus> {
        match self {
            ObdProtocol::Auto => None,
            ObdProtocol::J1850Pwm | ObdProtocol::J1850Vpw => Some(Bus::J1850),
            ObdProtocol::Iso9141 | ObdProtocol::Kwp | ObdProtocol::KwpFast => Some(Bus::KLine),
            ObdProtocol::Can11Bit500
            | ObdProtocol::Can29Bit500
            | ObdProtocol::Can11Bit250
            | ObdProtocol::Can29Bit250 => Some(Bus::Can),
        }
    }

    /// Whether `ATSH 7xx` headers can address other modules. Unknown under
    /// auto detection, where the sweep is attempted anyway.
    pub fn is_can(&self) -> bool {
        !matches!(self.bus(), Some(Bus::J1850 | Bus::KLine))
    }
}

/// Physical layer behind an OBD-II protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bus {
    J1850,
    /// ISO 9141 and KWP2000 single wire
    KLine,
    Can,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elm_commands() {
        assert_eq!(ObdProtocol::default().to_elm_command(), "ATSP0");
        assert_eq!(ObdProtocol::Can11Bit500.to_elm_command(), "ATSP6");
    }

    #[test]
    fn test_bus_families() {
        assert_eq!(ObdProtocol::Auto.bus(), None);
        assert_eq!(ObdProtocol::KwpFast.bus(), Some(Bus::KLine));
        assert!(ObdProtocol::Can29Bit250.is_can());
        assert!(ObdProtocol::Auto.is_can());
        assert!(!ObdProtocol::Kwp.is_can());
        assert!(!ObdProtocol::J1850Vpw.is_can());
    }
}

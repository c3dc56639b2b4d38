//! Session configuration
//!
//! Loaded from an optional TOML file, then `OBD_`-prefixed environment
//! variables with `__` between section and key:
//! `OBD_QUEUE__COMMAND_TIMEOUT_MS=5000`.

use crate::error::SessionError;
use config::{Config, Environment, File};
use obd_link::QueueConfig;
use obd_protocol::{Brand, ObdProtocol};
use obd_scheduler::PollConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Complete session configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub queue: QueueSection,
    pub polling: PollingSection,
    pub session: SessionSection,
    pub serial: SerialSection,
}

/// Command queue timing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSection {
    /// Per-command timeout (milliseconds)
    pub command_timeout_ms: u64,
    /// Pause between a reply and the next write (milliseconds)
    pub inter_command_delay_ms: u64,
}

impl Default for QueueSection {
    fn default() -> Self {
        Self {
            command_timeout_ms: 10_000,
            inter_command_delay_ms: 20,
        }
    }
}

/// Live-data polling
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingSection {
    /// Pause after each round (milliseconds)
    pub interval_ms: u64,
    /// Slow tier runs every Nth round
    pub slow_every: u32,
}

impl Default for PollingSection {
    fn default() -> Self {
        Self {
            interval_ms: 250,
            slow_every: 4,
        }
    }
}

/// Connection lifecycle and routine timing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    /// Wait after the link opens before initializing (milliseconds)
    pub settle_delay_ms: u64,
    /// Liveness check period (milliseconds)
    pub monitor_interval_ms: u64,
    /// Pause before a diagnostic scan starts (milliseconds)
    pub diagnostic_settle_ms: u64,
    /// Wait between clearing codes and re-reading them (milliseconds)
    pub clear_delay_ms: u64,
    /// Wait before and after an adaptation command (milliseconds)
    pub adaptation_delay_ms: u64,
    /// Battery test sample period while cranking (milliseconds)
    pub battery_sample_ms: u64,
    /// Battery test cranking window (milliseconds)
    pub cranking_window_ms: u64,
    /// Battery test idle wait before the charging reading (milliseconds)
    pub charging_settle_ms: u64,
    /// Protocol selected during initialization
    pub protocol: ObdProtocol,
    /// Declared vehicle brand
    pub brand: Brand,
    /// Where the last connected device is remembered
    pub device_store: Option<PathBuf>,
    /// Transaction log lines kept
    pub log_capacity: usize,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            settle_delay_ms: 1500,
            monitor_interval_ms: 3000,
            diagnostic_settle_ms: 100,
            clear_delay_ms: 500,
            adaptation_delay_ms: 800,
            battery_sample_ms: 500,
            cranking_window_ms: 5000,
            charging_settle_ms: 2000,
            protocol: ObdProtocol::Auto,
            brand: Brand::Generic,
            device_store: None,
            log_capacity: 200,
        }
    }
}

/// Serial transport
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialSection {
    pub baud_rate: u32,
}

impl Default for SerialSection {
    fn default() -> Self {
        Self {
            baud_rate: obd_link::serial::DEFAULT_BAUD_RATE,
        }
    }
}

impl SessionConfig {
    /// Load defaults, then `path` if given, then the environment
    pub fn load(path: Option<&Path>) -> Result<Self, SessionError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }
        let config = builder
            .add_source(
                Environment::with_prefix("OBD")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        Ok(config.try_deserialize()?)
    }

    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            command_timeout: Duration::from_millis(self.queue.command_timeout_ms),
            inter_command_delay: Duration::from_millis(self.queue.inter_command_delay_ms),
        }
    }

    pub fn poll_config(&self) -> PollConfig {
        PollConfig {
            interval: Duration::from_millis(self.polling.interval_ms),
            slow_every: self.polling.slow_every,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.queue_config().command_timeout, Duration::from_secs(10));
        assert_eq!(config.poll_config().slow_every, 4);
        assert_eq!(config.session.settle_delay_ms, 1500);
    }

    #[test]
    fn test_load_partial_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[queue]\ncommand_timeout_ms = 4000\n\n[session]\nbrand = \"honda\"\nprotocol = \"can11-bit500\""
        )
        .unwrap();

        let config = SessionConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.queue.command_timeout_ms, 4000);
        assert_eq!(config.queue.inter_command_delay_ms, 20);
        assert_eq!(config.session.brand, Brand::Honda);
        assert_eq!(config.session.protocol, ObdProtocol::Can11Bit500);
        assert_eq!(config.polling.interval_ms, 250);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(SessionConfig::load(Some(Path::new("/nonexistent/obd.toml"))).is_err());
    }
}

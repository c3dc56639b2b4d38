//! ELM327 Diagnostic Session
//!
//! Connection lifecycle (adapter, then ECU), drop detection, background
//! polling and the guarded diagnostic, adaptation and battery routines.
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use obd_session::{Session, SessionConfig, MemoryDeviceStore};
//! # use obd_link::serial::SerialConnector;
//! # async fn run() -> Result<(), obd_session::SessionError> {
//! let session = Session::new(
//!     Arc::new(SerialConnector::default()),
//!     Arc::new(MemoryDeviceStore::default()),
//!     SessionConfig::default(),
//! );
//! session.connect("/dev/rfcomm0", "OBDII").await?;
//! let snapshot = session.run_diagnostics().await?;
//! println!("VIN {:?}, codes {:?}", snapshot.vin, snapshot.dtcs);
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
mod performance;
mod routines;
mod session;
mod state;
mod store;

pub use config::{PollingSection, QueueSection, SerialSection, SessionConfig, SessionSection};
pub use error::SessionError;
pub use performance::{AccelTimer, PerformanceResult, SPRINT_100_KMH, SPRINT_60_KMH};
pub use obd_scheduler::SessionMode;
pub use session::{Session, ECU_NOT_RESPONDING};
pub use state::{
    AdapterInfo, AdaptationKind, BatteryStage, ConnectionState, FirmwareKind, LinkStatus, Phase,
    SessionEvent,
};
pub use store::{DeviceStore, JsonDeviceStore, MemoryDeviceStore};

//! Guarded routines
//!
//! Diagnostics, clearing, adaptation, freeze frame and the battery test all
//! take the adapter away from the poller by raising the busy flags for their
//! duration. The flags are dropped by [`ModeGuard`] on every exit path.

use crate::error::SessionError;
use crate::session::Session;
use crate::state::{AdaptationKind, BatteryStage};
use obd_link::{CommandQueue, LinkError};
use obd_protocol::battery::BatteryReport;
use obd_protocol::command::{self, GENERIC_UDS_ODOMETERS, ODOMETER_HEADERS};
use obd_protocol::{decode, decode_freeze_frame, FreezeFrame, Odometer, SensorSnapshot, SensorUpdate};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info};

/// Raised busy flags, cleared on drop
pub(crate) struct ModeGuard<'a> {
    session: &'a Session,
    /// Link the flags were raised on
    pub(crate) generation: u64,
}

impl Drop for ModeGuard<'_> {
    fn drop(&mut self) {
        // A teardown already reset the flags of a link that is gone
        if !self.session.is_current(self.generation) {
            return;
        }
        self.session.inner.mode.send_modify(|m| {
            m.diagnostic_mode_active = false;
            m.adaptation_running = false;
        });
    }
}

impl Session {
    /// Raise the diagnostic flag, and the adaptation flag if asked
    pub(crate) fn enter(&self, adaptation: bool) -> Result<ModeGuard<'_>, SessionError> {
        let generation = self.link_generation().ok_or(SessionError::NotConnected)?;
        let mut acquired = false;
        self.inner.mode.send_if_modified(|m| {
            if m.is_busy() {
                return false;
            }
            m.diagnostic_mode_active = true;
            m.adaptation_running = adaptation;
            acquired = true;
            true
        });
        if !acquired {
            return Err(SessionError::Busy);
        }
        Ok(ModeGuard {
            session: self,
            generation,
        })
    }

    /// Log and publish the outcome. A routine cut short by a disconnect or
    /// a drop is not reported as a failure.
    fn report<T>(&self, guard: &ModeGuard<'_>, routine: &str, result: &Result<T, SessionError>) {
        match result {
            Ok(_) => info!("{} finished", routine),
            Err(SessionError::Link(LinkError::Cleared | LinkError::Closed | LinkError::Disconnected))
                if !self.is_current(guard.generation) =>
            {
                info!("{} interrupted by link teardown", routine);
            }
            Err(e) => {
                error!("{} failed: {}", routine, e);
                self.diag_log(format!("{routine} failed: {e}"));
                self.set_error(Some(format!("{routine} failed: {e}")));
            }
        }
    }

    fn delay(ms: u64) -> Duration {
        Duration::from_millis(ms)
    }

    /// Send a command whose timeout is not fatal
    async fn speculative(&self, queue: &CommandQueue, cmd: &str) -> Result<Option<String>, SessionError> {
        match queue.enqueue(cmd).await {
            Ok(response) => Ok(Some(response)),
            Err(LinkError::Timeout { .. }) => {
                debug!("{} timed out, skipping", cmd);
                self.diag_log(format!("{cmd} timed out, skipping"));
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Full scan: VIN, codes, odometer, distances.
    ///
    /// Returns the snapshot as it stands when the scan completes.
    pub async fn run_diagnostics(&self) -> Result<SensorSnapshot, SessionError> {
        let queue = self.ecu_queue()?;
        let guard = self.enter(false)?;
        self.set_error(None);

        let result = self.diagnostic_scan(&queue).await;
        self.report(&guard, "Diagnostics", &result);
        result.map(|_| self.sensors())
    }

    async fn diagnostic_scan(&self, queue: &CommandQueue) -> Result<(), SessionError> {
        sleep(Self::delay(self.inner.config.session.diagnostic_settle_ms)).await;
        self.diag_log("Starting scan");

        queue.enqueue(command::READ_VIN).await?;
        queue.enqueue(command::READ_DTC).await?;
        let odometer = self.odometer_waterfall(queue).await?;
        debug!("Odometer after waterfall: {:?}", odometer);
        queue.enqueue(command::DISTANCE_SINCE_CLEARED).await?;
        queue.enqueue(command::DISTANCE_MIL_ON).await?;

        self.diag_log("Scan complete");
        Ok(())
    }

    /// Standard PID, generic UDS reads, then brand reads across CAN headers
    /// in an extended session. Stops at the first attempt that produces a new
    /// km reading.
    async fn odometer_waterfall(&self, queue: &CommandQueue) -> Result<Odometer, SessionError> {
        self.inner.sensors.send_modify(|s| s.odometer = Odometer::Unknown);

        if self.try_odometer(queue, command::ODOMETER).await? {
            return Ok(self.odometer());
        }
        for cmd in GENERIC_UDS_ODOMETERS {
            if self.try_odometer(queue, cmd).await? {
                return Ok(self.odometer());
            }
        }

        let brand = self.brand();
        let reads = brand.odometer_commands();
        if reads.is_empty() {
            return Ok(self.odometer());
        }
        let protocol = self.inner.config.session.protocol;
        if !protocol.is_can() {
            self.diag_log(format!("No CAN header sweep on {protocol:?}"));
            return Ok(self.odometer());
        }

        self.diag_log(format!("Trying {brand:?} odometer reads"));
        let swept = self.header_sweep(queue, reads).await;
        let restored = self.restore_default_session(queue).await;
        swept?;
        restored?;
        Ok(self.odometer())
    }

    /// Brand reads on each CAN header inside an extended session
    async fn header_sweep(&self, queue: &CommandQueue, reads: &[&str]) -> Result<(), SessionError> {
        self.speculative(queue, command::EXTENDED_SESSION).await?;
        for header in ODOMETER_HEADERS {
            self.speculative(queue, header).await?;
            for cmd in reads {
                if self.try_odometer(queue, cmd).await? {
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    /// Back to the default session and the engine ECU header, whatever the
    /// sweep left behind
    async fn restore_default_session(&self, queue: &CommandQueue) -> Result<(), SessionError> {
        let session = self.speculative(queue, command::DEFAULT_SESSION).await;
        let header = self.speculative(queue, command::HEADER_ECU).await;
        session?;
        header?;
        Ok(())
    }

    /// One odometer attempt. True when it changed the reading to a km value.
    async fn try_odometer(&self, queue: &CommandQueue, cmd: &str) -> Result<bool, SessionError> {
        let before = self.odometer();
        self.speculative(queue, cmd).await?;
        let after = self.odometer();

        let found = after.km().is_some() && after != before;
        if let (true, Some(km)) = (found, after.km()) {
            info!("Odometer {} km via {}", km, cmd);
            self.diag_log(format!("Odometer {km} km via {cmd}"));
        }
        Ok(found)
    }

    fn odometer(&self) -> Odometer {
        self.inner.sensors.borrow().odometer
    }

    /// Clear stored codes, then read them back
    pub async fn clear_diagnostics(&self) -> Result<(), SessionError> {
        let queue = self.ecu_queue()?;
        let guard = self.enter(false)?;

        let result = self.clear_and_reread(&queue).await;
        self.report(&guard, "Clearing codes", &result);
        result
    }

    async fn clear_and_reread(&self, queue: &CommandQueue) -> Result<(), SessionError> {
        self.diag_log("Clearing trouble codes");
        queue.enqueue(command::CLEAR_DTC).await?;
        sleep(Self::delay(self.inner.config.session.clear_delay_ms)).await;
        queue.enqueue(command::READ_DTC).await?;
        Ok(())
    }

    /// Run an adaptation routine with both busy flags raised
    pub async fn run_adaptation_routine(&self, kind: AdaptationKind) -> Result<(), SessionError> {
        let queue = self.ecu_queue()?;
        let guard = self.enter(true)?;

        let result = self.adaptation(&queue, kind).await;
        self.report(&guard, "Adaptation", &result);
        result
    }

    async fn adaptation(&self, queue: &CommandQueue, kind: AdaptationKind) -> Result<(), SessionError> {
        let pause = Self::delay(self.inner.config.session.adaptation_delay_ms);
        self.diag_log(format!("Adaptation {kind:?} started"));
        sleep(pause).await;
        queue.enqueue(kind.command()).await?;
        sleep(pause).await;
        self.diag_log(format!("Adaptation {kind:?} done"));
        Ok(())
    }

    /// Read freeze frame 0 (RPM, speed, coolant)
    pub async fn read_freeze_frame(&self) -> Result<FreezeFrame, SessionError> {
        let queue = self.ecu_queue()?;
        let guard = self.enter(false)?;

        let result = self.freeze_frame(&queue).await;
        self.report(&guard, "Freeze frame", &result);
        result
    }

    async fn freeze_frame(&self, queue: &CommandQueue) -> Result<FreezeFrame, SessionError> {
        let mut frame = FreezeFrame::default();
        for cmd in command::FREEZE_FRAME_REQUESTS {
            let Some(response) = self.speculative(queue, cmd).await? else {
                continue;
            };
            match decode_freeze_frame(cmd, &response) {
                Ok(Some(update)) => frame.record(update),
                Ok(None) => debug!("No freeze frame value for {}", cmd),
                Err(e) => debug!("Ignoring undecodable freeze frame: {}", e),
            }
        }
        if frame.is_empty() {
            return Err(SessionError::NoFreezeFrame);
        }
        Ok(frame)
    }

    /// Resting, cranking and charging voltage test.
    ///
    /// `progress` is told when each stage starts so the caller can ask the
    /// driver to crank or start the engine.
    pub async fn battery_test(
        &self,
        progress: impl FnMut(BatteryStage) + Send,
    ) -> Result<BatteryReport, SessionError> {
        let queue = self.ecu_queue()?;
        let guard = self.enter(false)?;

        let result = self.battery_stages(&queue, progress).await;
        self.report(&guard, "Battery test", &result);
        result
    }

    async fn battery_stages(
        &self,
        queue: &CommandQueue,
        mut progress: impl FnMut(BatteryStage) + Send,
    ) -> Result<BatteryReport, SessionError> {
        let timing = &self.inner.config.session;
        let sample = Self::delay(timing.battery_sample_ms.max(1));
        let samples = (timing.cranking_window_ms / timing.battery_sample_ms.max(1)).max(1);

        progress(BatteryStage::Resting);
        let resting = self.read_voltage(queue).await?;

        progress(BatteryStage::Cranking);
        let mut cranking: Option<f32> = None;
        for _ in 0..samples {
            sleep(sample).await;
            match self.read_voltage(queue).await {
                Ok(v) => cranking = Some(cranking.map_or(v, |min| min.min(v))),
                Err(SessionError::NoVoltage(_) | SessionError::Link(LinkError::Timeout { .. })) => {
                    debug!("Missed a cranking sample");
                }
                Err(e) => return Err(e),
            }
        }

        progress(BatteryStage::Settling);
        sleep(Self::delay(timing.charging_settle_ms)).await;

        progress(BatteryStage::Charging);
        let charging = self.read_voltage(queue).await?;

        let report = BatteryReport::assess(resting, cranking, charging);
        self.diag_log(format!(
            "Battery {:.1}V / {:.1}V / {:.1}V",
            report.resting_v, report.cranking_v, report.charging_v
        ));
        Ok(report)
    }

    async fn read_voltage(&self, queue: &CommandQueue) -> Result<f32, SessionError> {
        let response = queue.enqueue(command::VOLTAGE).await?;
        match decode(command::VOLTAGE, &response) {
            Ok(Some(SensorUpdate::BatteryVoltage(v))) => Ok(v),
            _ => Err(SessionError::NoVoltage(response)),
        }
    }
}

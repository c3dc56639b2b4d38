//! Acceleration timer
//!
//! Armed while the vehicle stands still, starts on the first polled speed
//! above zero and records the 0-60 and 0-100 km/h times. It reads the live
//! snapshot only, so the poller keeps running for the whole run.

use crate::error::SessionError;
use crate::session::Session;
use serde::Serialize;
use std::time::Duration;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info};

/// First sprint mark, km/h
pub const SPRINT_60_KMH: u8 = 60;
/// Second sprint mark, km/h; the run ends here
pub const SPRINT_100_KMH: u8 = 100;

/// Sprint times in seconds, `None` when the mark was not reached
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PerformanceResult {
    pub t60: Option<f64>,
    pub t100: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum TimerState {
    Armed,
    Running { start: Instant },
    Done,
}

/// Speed driven sprint timer
#[derive(Debug, Clone)]
pub struct AccelTimer {
    state: TimerState,
    result: PerformanceResult,
}

impl Default for AccelTimer {
    fn default() -> Self {
        Self::armed()
    }
}

impl AccelTimer {
    pub fn armed() -> Self {
        Self {
            state: TimerState::Armed,
            result: PerformanceResult::default(),
        }
    }

    /// Feed one speed reading taken at `now`. Returns true once 100 km/h
    /// has been reached.
    pub fn observe(&mut self, speed: Option<u8>, now: Instant) -> bool {
        let Some(speed) = speed else {
            return self.is_done();
        };
        if self.state == TimerState::Armed && speed > 0 {
            debug!("Speed {} km/h, timer started", speed);
            self.state = TimerState::Running { start: now };
        }
        if let TimerState::Running { start } = self.state {
            let secs = now.duration_since(start).as_secs_f64();
            if speed >= SPRINT_60_KMH && self.result.t60.is_none() {
                self.result.t60 = Some(secs);
            }
            if speed >= SPRINT_100_KMH {
                self.result.t100 = Some(secs);
                self.state = TimerState::Done;
            }
        }
        self.is_done()
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, TimerState::Running { .. })
    }

    pub fn is_done(&self) -> bool {
        self.state == TimerState::Done
    }

    pub fn result(&self) -> PerformanceResult {
        self.result
    }
}

impl Session {
    /// Time a standing start from the polled speed.
    ///
    /// Starts polling if it is not running. Ends at 100 km/h or when `window`
    /// runs out, with whatever marks were reached by then.
    pub async fn performance_run(&self, window: Duration) -> Result<PerformanceResult, SessionError> {
        self.ecu_queue()?;
        let generation = self.link_generation().ok_or(SessionError::NotConnected)?;
        self.start_polling()?;

        let mut sensors = self.watch_sensors();
        let mut timer = AccelTimer::armed();
        let deadline = Instant::now() + window;
        self.diag_log("Performance timer armed");

        timer.observe(sensors.borrow_and_update().speed, Instant::now());
        while !timer.is_done() {
            match timeout_at(deadline, sensors.changed()).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => return Err(SessionError::NotConnected),
                Err(_) => {
                    if timer.is_running() {
                        info!("Performance window elapsed before 100 km/h");
                    }
                    break;
                }
            }
            if !self.is_current(generation) {
                return Err(SessionError::NotConnected);
            }
            let speed = sensors.borrow_and_update().speed;
            timer.observe(speed, Instant::now());
        }

        let result = timer.result();
        info!("Performance run: 0-60 {:?} s, 0-100 {:?} s", result.t60, result.t100);
        self.diag_log(format!(
            "Performance 0-60 {} / 0-100 {}",
            secs(result.t60),
            secs(result.t100)
        ));
        Ok(result)
    }
}

fn secs(value: Option<f64>) -> String {
    value.map_or_else(|| "--".to_string(), |s| format!("{s:.2}s"))
}

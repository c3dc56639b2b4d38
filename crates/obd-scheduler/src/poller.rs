//! Background poll loop

use crate::mode::SessionMode;
use obd_link::{CommandQueue, LinkError};
use obd_protocol::command::{POLL_FAST, POLL_SLOW};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Poll timing
#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Pause after each completed round (default: 250ms)
    pub interval: Duration,
    /// Slow tier runs every Nth round (default: 4)
    pub slow_every: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(250),
            slow_every: 4,
        }
    }
}

/// Which commands each round issues
#[derive(Debug, Clone)]
pub struct PollPlan {
    slow_every: u64,
    cycle: u64,
}

impl PollPlan {
    pub fn new(slow_every: u32) -> Self {
        Self {
            slow_every: u64::from(slow_every.max(1)),
            cycle: 0,
        }
    }

    /// Commands for the next round: fast tier always, slow tier every Nth
    pub fn next_round(&mut self) -> Vec<&'static str> {
        self.cycle += 1;
        let mut round = POLL_FAST.to_vec();
        if self.cycle % self.slow_every == 0 {
            round.extend_from_slice(&POLL_SLOW);
        }
        round
    }
}

/// Live-data poller.
///
/// Checks the busy flags before every command and parks on the mode watch
/// while a guarded routine runs. Stopping is done by aborting the task.
pub struct Poller {
    queue: CommandQueue,
    mode: watch::Receiver<SessionMode>,
    config: PollConfig,
}

impl Poller {
    pub fn new(queue: CommandQueue, mode: watch::Receiver<SessionMode>, config: PollConfig) -> Self {
        Self { queue, mode, config }
    }

    /// Run on its own task
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(mut self) {
        info!(
            "Starting poller: {:?} interval, slow tier every {} rounds",
            self.config.interval, self.config.slow_every
        );
        let mut plan = PollPlan::new(self.config.slow_every);

        loop {
            if self.mode.wait_for(|m| !m.is_busy()).await.is_err() {
                debug!("Session gone, poller stopping");
                break;
            }

            for command in plan.next_round() {
                let busy = self.mode.borrow().is_busy();
                if busy {
                    debug!("Guarded routine started, yielding mid-round");
                    break;
                }
                match self.queue.enqueue(command).await {
                    Ok(_) => {}
                    Err(LinkError::Closed | LinkError::Disconnected) => {
                        info!("Link gone, poller stopping");
                        return;
                    }
                    Err(e) => debug!("Poll {} failed: {}", command, e),
                }
            }

            tokio::time::sleep(self.config.interval).await;
        }
        info!("Poller stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use obd_link::mock::MockTransport;
    use obd_link::{QueueConfig, TransactionLog};
    use obd_protocol::SensorSnapshot;
    use std::sync::Arc;

    struct Rig {
        adapter: Arc<MockTransport>,
        mode: watch::Sender<SessionMode>,
        sensors: watch::Receiver<SensorSnapshot>,
        poller: JoinHandle<()>,
    }

    fn start() -> Rig {
        let adapter = MockTransport::new();
        let link = adapter.attach();
        let (sensors_tx, sensors) = watch::channel(SensorSnapshot::default());
        let (queue, _task) = CommandQueue::spawn(
            link.transport,
            link.chunks,
            sensors_tx,
            TransactionLog::default(),
            QueueConfig::default(),
        );
        let (mode, mode_rx) = watch::channel(SessionMode::default());
        let poller = Poller::new(queue, mode_rx, PollConfig::default()).spawn();
        Rig {
            adapter,
            mode,
            sensors,
            poller,
        }
    }

    #[test]
    fn test_slow_tier_every_fourth_round() {
        let mut plan = PollPlan::new(4);
        for _ in 0..3 {
            assert_eq!(plan.next_round(), vec!["010C", "010D"]);
        }
        let fourth = plan.next_round();
        assert_eq!(fourth.len(), 8);
        assert!(fourth.contains(&"ATRV"));
        assert_eq!(plan.next_round().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rounds_update_snapshot() {
        let rig = start();
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert!(rig.adapter.count("010C") >= 4);
        assert!(rig.adapter.count("0105") >= 1);
        let snapshot = rig.sensors.borrow().clone();
        assert_eq!(snapshot.rpm, Some(775));
        assert_eq!(snapshot.speed, Some(42));
        assert_eq!(snapshot.coolant_temp, Some(83));
        rig.poller.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_while_busy_then_resumes() {
        let rig = start();
        tokio::time::sleep(Duration::from_millis(300)).await;

        rig.mode.send_modify(|m| m.diagnostic_mode_active = true);
        // Let a command that was already on the wire finish
        tokio::time::sleep(Duration::from_millis(100)).await;
        rig.adapter.clear_writes();
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(rig.adapter.writes().is_empty());

        rig.mode.send_modify(|m| m.diagnostic_mode_active = false);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(rig.adapter.count("010C") >= 1);
        rig.poller.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_when_link_drops() {
        let rig = start();
        tokio::time::sleep(Duration::from_millis(300)).await;
        rig.adapter.drop_link();

        let finished = tokio::time::timeout(Duration::from_secs(5), rig.poller).await;
        assert!(finished.is_ok());
    }
}

//! Session lifecycle
//!
//! A [`Session`] owns at most one adapter link at a time. Connecting opens the
//! link, starts the command queue and the drop monitor, lets the adapter
//! settle, runs the ELM327 initialization and probes the ECU. Everything the
//! caller can observe is published on watch channels.

use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::state::{AdapterInfo, ConnectionState, LinkStatus, SessionEvent};
use crate::store::DeviceStore;
use obd_link::{CommandQueue, Connector, DeviceInfo, LogKind, TransactionLog, Transport};
use obd_protocol::{command, normalize, Brand, SensorSnapshot};
use obd_scheduler::{Poller, SessionMode};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Shown when the probe PID gets no answer
pub const ECU_NOT_RESPONDING: &str = "ECU not responding. Ignition on?";

/// Probe replies that mean the vehicle did not answer
const PROBE_FAILURES: [&str; 3] = ["NODATA", "ERROR", "UNABLETOCONNECT"];

const EVENT_CAPACITY: usize = 16;

/// Handle to a diagnostic session
#[derive(Clone)]
pub struct Session {
    pub(crate) inner: Arc<Inner>,
}

pub(crate) struct Inner {
    connector: Arc<dyn Connector>,
    store: Arc<dyn DeviceStore>,
    pub(crate) config: SessionConfig,
    brand: Mutex<Brand>,
    pub(crate) log: TransactionLog,
    pub(crate) sensors: watch::Sender<SensorSnapshot>,
    connection: watch::Sender<ConnectionState>,
    pub(crate) mode: watch::Sender<SessionMode>,
    error: watch::Sender<Option<String>>,
    adapter_info: watch::Sender<Option<AdapterInfo>>,
    events: broadcast::Sender<SessionEvent>,
    active: Mutex<Option<Active>>,
    generation: AtomicU64,
}

/// Tasks and handles of the open link
struct Active {
    generation: u64,
    queue: CommandQueue,
    transport: Arc<dyn Transport>,
    queue_task: JoinHandle<()>,
    monitor: JoinHandle<()>,
    poller: Option<JoinHandle<()>>,
}

impl Active {
    fn stop_tasks(&mut self) {
        if let Some(poller) = self.poller.take() {
            poller.abort();
        }
        self.queue.clear();
        self.queue_task.abort();
    }
}

impl Session {
    pub fn new(
        connector: Arc<dyn Connector>,
        store: Arc<dyn DeviceStore>,
        config: SessionConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let inner = Inner {
            connector,
            store,
            brand: Mutex::new(config.session.brand),
            log: TransactionLog::new(config.session.log_capacity),
            sensors: watch::Sender::new(SensorSnapshot::default()),
            connection: watch::Sender::new(ConnectionState::default()),
            mode: watch::Sender::new(SessionMode::default()),
            error: watch::Sender::new(None),
            adapter_info: watch::Sender::new(None),
            events,
            active: Mutex::new(None),
            generation: AtomicU64::new(0),
            config,
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    // Observation

    pub fn sensors(&self) -> SensorSnapshot {
        self.inner.sensors.borrow().clone()
    }

    pub fn watch_sensors(&self) -> watch::Receiver<SensorSnapshot> {
        self.inner.sensors.subscribe()
    }

    pub fn connection(&self) -> ConnectionState {
        self.inner.connection.borrow().clone()
    }

    pub fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.inner.connection.subscribe()
    }

    pub fn mode(&self) -> SessionMode {
        *self.inner.mode.borrow()
    }

    /// Last visible error message
    pub fn error(&self) -> Option<String> {
        self.inner.error.borrow().clone()
    }

    pub fn adapter_info(&self) -> Option<AdapterInfo> {
        self.inner.adapter_info.borrow().clone()
    }

    /// Transaction log lines, newest first
    pub fn logs(&self) -> Vec<String> {
        self.inner.log.lines()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    pub fn brand(&self) -> Brand {
        *self.inner.brand.lock()
    }

    pub fn set_brand(&self, brand: Brand) {
        info!("Vehicle brand set to {:?}", brand);
        *self.inner.brand.lock() = brand;
    }

    pub fn last_device(&self) -> Result<Option<DeviceInfo>, SessionError> {
        self.inner.store.load()
    }

    // Connection

    /// Switch the adapter radio on
    pub async fn enable_adapter(&self) -> Result<bool, SessionError> {
        Ok(self.inner.connector.enable().await?)
    }

    /// List connectable devices
    pub async fn scan(&self) -> Result<Vec<DeviceInfo>, SessionError> {
        let idle = self.inner.active.lock().is_none();
        if idle {
            self.update_connection(|c| c.transport = LinkStatus::Scanning);
        }
        let result = self.inner.connector.scan().await;
        if idle {
            self.update_connection(|c| {
                c.transport = match result {
                    Ok(_) => LinkStatus::Disconnected,
                    Err(_) => LinkStatus::Error,
                }
            });
        }
        let devices = result?;
        info!("Found {} device(s)", devices.len());
        Ok(devices)
    }

    /// Open a link to `device_id` and bring the ECU up.
    ///
    /// Returns `Ok` once the adapter is connected, even if the ECU did not
    /// answer or its initialization timed out; check [`Session::connection`]
    /// and [`Session::error`] for the ECU status. Fails when the adapter
    /// cannot be opened or the link is gone before the ECU step ends.
    pub async fn connect(&self, device_id: &str, name: &str) -> Result<(), SessionError> {
        self.teardown().await;

        let device = DeviceInfo {
            id: device_id.to_string(),
            name: name.to_string(),
        };
        info!("Connecting to {} ({})", device.name, device.id);
        self.inner.connection.send_replace(ConnectionState {
            transport: LinkStatus::Connecting,
            adapter: LinkStatus::Connecting,
            ecu: LinkStatus::Disconnected,
            device: Some(device.clone()),
            was_connected: false,
        });
        self.set_error(None);

        let link = match self.inner.connector.connect(device_id).await {
            Ok(link) => link,
            Err(e) => {
                error!("Adapter connection failed: {}", e);
                self.update_connection(|c| {
                    c.transport = LinkStatus::Error;
                    c.adapter = LinkStatus::Error;
                });
                self.set_error(Some(e.to_string()));
                return Err(e.into());
            }
        };

        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (queue, queue_task) = CommandQueue::spawn(
            link.transport.clone(),
            link.chunks,
            self.inner.sensors.clone(),
            self.inner.log.clone(),
            self.inner.config.queue_config(),
        );
        let monitor = tokio::spawn(monitor(
            Arc::downgrade(&self.inner),
            link.transport.clone(),
            link.dropped,
            Duration::from_millis(self.inner.config.session.monitor_interval_ms),
            generation,
        ));
        *self.inner.active.lock() = Some(Active {
            generation,
            queue: queue.clone(),
            transport: link.transport,
            queue_task,
            monitor,
            poller: None,
        });

        if let Err(e) = self.inner.store.save(&device) {
            warn!("Could not remember device: {}", e);
        }
        self.update_connection(|c| {
            c.transport = LinkStatus::Connected;
            c.adapter = LinkStatus::Connected;
        });

        tokio::time::sleep(Duration::from_millis(self.inner.config.session.settle_delay_ms)).await;
        if !self.is_current(generation) {
            return Err(SessionError::NotConnected);
        }
        match self.initialize(&queue, generation).await {
            Err(e) if !self.is_current(generation) => Err(e),
            _ => Ok(()),
        }
    }

    /// Connect to the remembered device
    pub async fn reconnect_last(&self) -> Result<(), SessionError> {
        let device = self.inner.store.load()?.ok_or(SessionError::NoKnownDevice)?;
        self.connect(&device.id, &device.name).await
    }

    /// Rerun initialization and the ECU probe on the open link, with the
    /// poller held off
    pub async fn retry_ecu(&self) -> Result<(), SessionError> {
        if self.connection().adapter != LinkStatus::Connected {
            return Err(SessionError::NotConnected);
        }
        let queue = self.queue()?;
        let guard = self.enter(false)?;
        self.initialize(&queue, guard.generation).await
    }

    /// Close the link and reset all state
    pub async fn disconnect(&self) {
        if self.teardown().await {
            info!("Disconnected");
            let _ = self.inner.events.send(SessionEvent::Disconnected);
        }
    }

    /// Stop everything tied to the current link. Returns whether there was one.
    async fn teardown(&self) -> bool {
        let Some(mut active) = self.inner.active.lock().take() else {
            return false;
        };
        active.monitor.abort();
        active.stop_tasks();
        self.reset_state();
        active.transport.disconnect().await;
        true
    }

    /// Called by the monitor when the link of `generation` is gone
    async fn connection_lost(&self, generation: u64) {
        let active = {
            let mut slot = self.inner.active.lock();
            let current = slot.as_ref().is_some_and(|a| a.generation == generation);
            if current {
                slot.take()
            } else {
                None
            }
        };
        let Some(mut active) = active else {
            return;
        };

        warn!("Connection to adapter lost");
        active.stop_tasks();
        self.reset_state();
        self.set_error(Some("Connection lost".to_string()));
        let _ = self.inner.events.send(SessionEvent::ConnectionLost);
        active.transport.disconnect().await;
    }

    fn reset_state(&self) {
        let device = self.inner.connection.borrow().device.clone();
        self.inner.connection.send_replace(ConnectionState {
            device,
            ..ConnectionState::torn_down()
        });
        self.inner.sensors.send_replace(SensorSnapshot::default());
        self.inner.mode.send_replace(SessionMode::default());
        self.inner.adapter_info.send_replace(None);
    }

    async fn initialize(&self, queue: &CommandQueue, generation: u64) -> Result<(), SessionError> {
        self.update_connection(|c| c.ecu = LinkStatus::Connecting);
        self.set_error(None);

        match self.init_sequence(queue).await {
            Ok(true) => {
                info!("ECU connected");
                self.update_connection(|c| c.ecu = LinkStatus::Connected);
                Ok(())
            }
            Ok(false) => {
                warn!("ECU did not answer the probe");
                self.update_connection(|c| c.ecu = LinkStatus::Error);
                self.set_error(Some(ECU_NOT_RESPONDING.to_string()));
                Ok(())
            }
            // A torn-down link already reports itself
            Err(e) if !self.is_current(generation) => Err(e),
            Err(e) => {
                error!("ECU initialization failed: {}", e);
                self.update_connection(|c| c.ecu = LinkStatus::Error);
                self.set_error(Some(format!("ECU connection failed: {e}")));
                Err(e)
            }
        }
    }

    /// ELM327 setup, then probe with RPM. Returns whether the ECU answered.
    async fn init_sequence(&self, queue: &CommandQueue) -> Result<bool, SessionError> {
        let protocol = self.inner.config.session.protocol;
        let setup = [
            command::RESET,
            command::ECHO_OFF,
            command::DEVICE_INFO,
            command::SPACES_OFF,
            protocol.to_elm_command(),
        ];
        for cmd in setup {
            let response = queue.enqueue(cmd).await?;
            if cmd == command::DEVICE_INFO {
                let info = AdapterInfo::from_banner(&response);
                info!("Adapter: {} ({:?})", info.banner, info.firmware);
                self.inner.adapter_info.send_replace(Some(info));
            }
        }

        let probe = queue.enqueue(command::RPM).await?;
        Ok(ecu_answered(&probe))
    }

    // Commands and polling

    /// Send a raw command; only while the ECU is connected
    pub async fn send_command(&self, cmd: &str) -> Result<String, SessionError> {
        let queue = self.ecu_queue()?;
        match queue.enqueue(cmd).await {
            Ok(response) => Ok(response),
            Err(e) => {
                self.set_error(Some(e.to_string()));
                Err(e.into())
            }
        }
    }

    /// Start background polling. No-op if it is already running.
    pub fn start_polling(&self) -> Result<(), SessionError> {
        let queue = self.ecu_queue()?;
        let mut slot = self.inner.active.lock();
        let active = slot.as_mut().ok_or(SessionError::NotConnected)?;
        if active.poller.is_some() {
            return Ok(());
        }
        self.inner.mode.send_modify(|m| m.polling_active = true);
        let poller = Poller::new(queue, self.inner.mode.subscribe(), self.inner.config.poll_config());
        active.poller = Some(poller.spawn());
        Ok(())
    }

    pub fn stop_polling(&self) {
        if let Some(active) = self.inner.active.lock().as_mut() {
            if let Some(poller) = active.poller.take() {
                poller.abort();
                info!("Polling stopped");
            }
        }
        self.inner.mode.send_modify(|m| m.polling_active = false);
    }

    // Helpers

    pub(crate) fn queue(&self) -> Result<CommandQueue, SessionError> {
        self.inner
            .active
            .lock()
            .as_ref()
            .map(|a| a.queue.clone())
            .ok_or(SessionError::NotConnected)
    }

    /// Queue of a link whose ECU answered
    pub(crate) fn ecu_queue(&self) -> Result<CommandQueue, SessionError> {
        let queue = self.queue()?;
        if !self.inner.connection.borrow().is_ecu_connected() {
            return Err(SessionError::EcuNotConnected);
        }
        Ok(queue)
    }

    pub(crate) fn is_current(&self, generation: u64) -> bool {
        self.link_generation() == Some(generation)
    }

    /// Generation of the open link
    pub(crate) fn link_generation(&self) -> Option<u64> {
        self.inner.active.lock().as_ref().map(|a| a.generation)
    }

    fn update_connection(&self, f: impl FnOnce(&mut ConnectionState)) {
        self.inner.connection.send_modify(f);
    }

    pub(crate) fn set_error(&self, message: Option<String>) {
        self.inner.error.send_replace(message);
    }

    pub(crate) fn diag_log(&self, text: impl Into<String>) {
        self.inner.log.push(LogKind::Diag, text);
    }
}

fn ecu_answered(probe: &str) -> bool {
    let clean = normalize(probe);
    !clean.is_empty() && !PROBE_FAILURES.iter().any(|f| clean.contains(f))
}

/// Liveness monitor: the transport's drop notification or a failed periodic
/// `is_connected` check ends the session
async fn monitor(
    inner: Weak<Inner>,
    transport: Arc<dyn Transport>,
    mut dropped: oneshot::Receiver<()>,
    period: Duration,
    generation: u64,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = &mut dropped => {
                debug!("Transport reported a drop");
                break;
            }
            _ = ticker.tick() => {
                if !transport.is_connected().await {
                    debug!("Liveness check failed");
                    break;
                }
            }
        }
    }
    if let Some(inner) = inner.upgrade() {
        Session { inner }.connection_lost(generation).await;
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::store::MemoryDeviceStore;
    use obd_link::mock::{MockConnector, MockTransport};

    pub(crate) struct Rig {
        pub session: Session,
        pub adapter: Arc<MockTransport>,
        pub device_id: String,
    }

    pub(crate) fn rig() -> Rig {
        rig_with(SessionConfig::default())
    }

    pub(crate) fn rig_with(config: SessionConfig) -> Rig {
        let adapter = MockTransport::new();
        let connector = MockConnector::new(adapter.clone());
        let device_id = connector.device_id().to_string();
        let session = Session::new(
            Arc::new(connector),
            Arc::new(MemoryDeviceStore::default()),
            config,
        );
        Rig {
            session,
            adapter,
            device_id,
        }
    }

    /// Rig with the ECU already connected and the write log cleared
    pub(crate) async fn connected() -> Rig {
        let rig = rig();
        rig.session.connect(&rig.device_id, "OBDII").await.unwrap();
        assert!(rig.session.connection().is_ecu_connected());
        rig.adapter.clear_writes();
        rig
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_initializes_and_probes() {
        let rig = rig();
        rig.session.connect(&rig.device_id, "OBDII").await.unwrap();

        assert_eq!(
            rig.adapter.writes(),
            vec!["ATZ", "ATE0", "ATI", "ATS0", "ATSP0", "010C"]
        );
        let connection = rig.session.connection();
        assert_eq!(connection.phase(), crate::state::Phase::EcuConnected);
        assert_eq!(connection.device.map(|d| d.name), Some("OBDII".to_string()));
        assert_eq!(
            rig.session.adapter_info().map(|i| i.firmware),
            Some(crate::state::FirmwareKind::Clone)
        );
        assert_eq!(rig.session.sensors().rpm, Some(775));
        assert_eq!(rig.session.last_device().unwrap().map(|d| d.id), Some(rig.device_id));
        assert!(rig.session.logs().iter().any(|l| l.ends_with("TX: ATZ")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_settle_delay_before_init() {
        let rig = rig();
        let session = rig.session.clone();
        let device_id = rig.device_id.clone();
        let connecting = tokio::spawn(async move { session.connect(&device_id, "OBDII").await });

        tokio::time::sleep(Duration::from_millis(1400)).await;
        assert!(rig.adapter.writes().is_empty());
        assert_eq!(rig.session.connection().adapter, LinkStatus::Connected);

        connecting.await.unwrap().unwrap();
        assert_eq!(rig.adapter.writes()[0], "ATZ");
    }

    #[tokio::test(start_paused = true)]
    async fn test_ignition_off_then_retry() {
        let rig = rig();
        rig.adapter.respond("010C", "NO DATA");
        rig.session.connect(&rig.device_id, "OBDII").await.unwrap();

        let connection = rig.session.connection();
        assert_eq!(connection.adapter, LinkStatus::Connected);
        assert_eq!(connection.ecu, LinkStatus::Error);
        assert_eq!(rig.session.error().as_deref(), Some(ECU_NOT_RESPONDING));
        assert!(matches!(
            rig.session.send_command("0105").await,
            Err(SessionError::EcuNotConnected)
        ));

        rig.adapter.respond("010C", "410C0C1A");
        rig.session.retry_ecu().await.unwrap();
        assert!(rig.session.connection().is_ecu_connected());
        assert_eq!(rig.session.error(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_init_timeout_keeps_adapter_link() {
        let rig = rig();
        rig.adapter.silence("ATI");
        rig.session.connect(&rig.device_id, "OBDII").await.unwrap();

        let connection = rig.session.connection();
        assert_eq!(connection.adapter, LinkStatus::Connected);
        assert_eq!(connection.ecu, LinkStatus::Error);
        assert!(rig
            .session
            .error()
            .is_some_and(|e| e.starts_with("ECU connection failed")));

        rig.adapter.respond("ATI", "ELM327 v2.2");
        rig.session.retry_ecu().await.unwrap();
        assert!(rig.session.connection().is_ecu_connected());
        assert_eq!(
            rig.session.adapter_info().map(|i| i.firmware),
            Some(crate::state::FirmwareKind::Genuine)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_holds_off_poller() {
        let rig = connected().await;
        rig.session.start_polling().unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        rig.session.retry_ecu().await.unwrap();
        let writes = rig.adapter.writes();
        let reset = writes.iter().rposition(|w| w == "ATZ").unwrap();
        assert_eq!(
            writes[reset..].to_vec(),
            vec!["ATZ", "ATE0", "ATI", "ATS0", "ATSP0", "010C"]
        );
        let mode = rig.session.mode();
        assert!(mode.polling_active && !mode.is_busy());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_failure_sets_adapter_error() {
        let rig = rig();
        let err = rig.session.connect("AA:BB:CC", "Nope").await.unwrap_err();
        assert!(matches!(err, SessionError::Link(_)));
        assert_eq!(rig.session.connection().adapter, LinkStatus::Error);
        assert!(rig.session.error().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_command_requires_connection() {
        let rig = rig();
        assert!(matches!(
            rig.session.send_command("ATRV").await,
            Err(SessionError::NotConnected)
        ));

        let rig = connected().await;
        assert_eq!(rig.session.send_command("ATRV").await.unwrap(), "12.6V");
        assert_eq!(rig.session.sensors().battery_voltage, Some(12.6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_notification_resets_state() {
        let rig = connected().await;
        let mut events = rig.session.subscribe();
        rig.session.start_polling().unwrap();

        rig.adapter.drop_link();
        let event = tokio::time::timeout(Duration::from_secs(1), events.recv()).await;
        assert_eq!(event.unwrap().unwrap(), SessionEvent::ConnectionLost);

        let connection = rig.session.connection();
        assert_eq!(connection.phase(), crate::state::Phase::Disconnected);
        assert_eq!(rig.session.sensors(), SensorSnapshot::default());
        assert_eq!(rig.session.mode(), SessionMode::default());
        assert!(matches!(
            rig.session.send_command("010C").await,
            Err(SessionError::NotConnected)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_liveness_poll_detects_silent_drop() {
        let rig = connected().await;
        let mut events = rig.session.subscribe();

        rig.adapter.go_quiet();
        let event = tokio::time::timeout(Duration::from_secs(4), events.recv()).await;
        assert_eq!(event.unwrap().unwrap(), SessionEvent::ConnectionLost);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_is_not_a_drop() {
        let rig = connected().await;
        let mut events = rig.session.subscribe();

        rig.session.disconnect().await;
        assert_eq!(events.recv().await.unwrap(), SessionEvent::Disconnected);

        // The monitor is gone and does not report a drop afterwards
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(events.try_recv().is_err());
        assert_eq!(rig.session.error(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_last() {
        let rig = rig();
        assert!(matches!(
            rig.session.reconnect_last().await,
            Err(SessionError::NoKnownDevice)
        ));

        rig.session.connect(&rig.device_id, "OBDII").await.unwrap();
        rig.session.disconnect().await;
        rig.session.reconnect_last().await.unwrap();
        assert!(rig.session.connection().is_ecu_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_start_stop() {
        let rig = connected().await;
        rig.session.start_polling().unwrap();
        rig.session.start_polling().unwrap();
        assert!(rig.session.mode().polling_active);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(rig.session.sensors().coolant_temp, Some(83));

        rig.session.stop_polling();
        tokio::time::sleep(Duration::from_millis(100)).await;
        rig.adapter.clear_writes();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(rig.adapter.writes().is_empty());
        assert!(!rig.session.mode().polling_active);
    }

    #[test]
    fn test_probe_failures() {
        assert!(ecu_answered("410C0C1A"));
        assert!(!ecu_answered(""));
        assert!(!ecu_answered("SEARCHING...\rUNABLE TO CONNECT"));
        assert!(!ecu_answered("NO DATA"));
    }
}

//! Mock ELM327 for tests and hardware-free runs
//!
//! Replies like a clone adapter on a running engine: echo on until `ATE0`,
//! every reply ends with `\r\r>`. Replies can be scripted per command,
//! silenced to provoke timeouts, or injected by hand.

use crate::error::LinkError;
use crate::transport::{Connector, DeviceInfo, Link, Transport};
use async_trait::async_trait;
use obd_protocol::command::compact;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

/// Mock VIN, "1HGCM82633A004352"
const MOCK_VIN: &str = "49 02 01 31 48 47 43 4D 38 32 36 33 33 41 30 30 34 33 35 32";

#[derive(Debug, Clone)]
enum Reply {
    /// Reply text; the mock adds the echo and the prompt
    Text(String),
    /// Raw chunks sent exactly as given
    Chunks(Vec<String>),
    /// Never answer
    Silent,
    /// Reject the write
    FailWrite,
}

#[derive(Default)]
struct Wire {
    chunks: Option<mpsc::UnboundedSender<String>>,
    dropped: Option<oneshot::Sender<()>>,
}

/// Scripted in-process adapter
pub struct MockTransport {
    replies: Mutex<HashMap<String, Reply>>,
    writes: Mutex<Vec<String>>,
    wire: Mutex<Wire>,
    connected: AtomicBool,
    echo: AtomicBool,
    /// Answer unscripted commands with the built-in table
    defaults: bool,
}

impl MockTransport {
    /// Adapter that answers with the built-in table
    pub fn new() -> Arc<Self> {
        Arc::new(Self::build(true))
    }

    /// Adapter that only answers scripted commands
    pub fn silent() -> Arc<Self> {
        Arc::new(Self::build(false))
    }

    fn build(defaults: bool) -> Self {
        Self {
            replies: Mutex::new(HashMap::new()),
            writes: Mutex::new(Vec::new()),
            wire: Mutex::new(Wire::default()),
            connected: AtomicBool::new(false),
            echo: AtomicBool::new(true),
            defaults,
        }
    }

    /// Open a fresh link to this adapter
    pub fn attach(self: &Arc<Self>) -> Link {
        let (chunks_tx, chunks) = mpsc::unbounded_channel();
        let (dropped_tx, dropped) = oneshot::channel();
        *self.wire.lock() = Wire {
            chunks: Some(chunks_tx),
            dropped: Some(dropped_tx),
        };
        self.connected.store(true, Ordering::SeqCst);
        self.echo.store(true, Ordering::SeqCst);
        Link {
            transport: self.clone(),
            chunks,
            dropped,
        }
    }

    /// Script the reply text for a command
    pub fn respond(&self, command: &str, reply: &str) {
        self.replies
            .lock()
            .insert(compact(command), Reply::Text(reply.to_string()));
    }

    /// Script exact raw chunks for a command, prompt included
    pub fn respond_chunks(&self, command: &str, chunks: &[&str]) {
        let chunks = chunks.iter().map(|c| c.to_string()).collect();
        self.replies.lock().insert(compact(command), Reply::Chunks(chunks));
    }

    /// Never answer this command
    pub fn silence(&self, command: &str) {
        self.replies.lock().insert(compact(command), Reply::Silent);
    }

    /// Make writes of this command fail
    pub fn fail_write(&self, command: &str) {
        self.replies.lock().insert(compact(command), Reply::FailWrite);
    }

    /// Push bytes as if the adapter sent them on its own
    pub fn inject(&self, chunk: &str) {
        if let Some(tx) = &self.wire.lock().chunks {
            let _ = tx.send(chunk.to_string());
        }
    }

    /// Commands written so far, without the carriage return
    pub fn writes(&self) -> Vec<String> {
        self.writes.lock().clone()
    }

    /// How many times `command` was written
    pub fn count(&self, command: &str) -> usize {
        let command = compact(command);
        self.writes.lock().iter().filter(|w| compact(w) == command).count()
    }

    pub fn clear_writes(&self) {
        self.writes.lock().clear();
    }

    /// Simulate the link dying: stream ends, drop notification fires,
    /// `is_connected` turns false
    pub fn drop_link(&self) {
        self.connected.store(false, Ordering::SeqCst);
        let mut wire = self.wire.lock();
        wire.chunks = None;
        if let Some(dropped) = wire.dropped.take() {
            let _ = dropped.send(());
        }
    }

    /// Make `is_connected` false without any other signal
    pub fn go_quiet(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    fn reply_for(&self, command: &str) -> Option<Reply> {
        let key = compact(command);
        if let Some(reply) = self.replies.lock().get(&key) {
            return Some(reply.clone());
        }
        self.defaults.then(|| Reply::Text(default_reply(&key).to_string()))
    }
}

/// Built-in replies, spaces off
fn default_reply(command: &str) -> &'static str {
    match command {
        "ATZ" | "ATI" => "ELM327 v1.5",
        "ATRV" => "12.6V",
        "010C" => "410C0C1A",
        "010D" => "410D2A",
        "0105" => "41057B",
        "0111" => "411120",
        "0104" => "410440",
        "010F" => "410F41",
        "010B" => "410B21",
        "0131" => "413101F4",
        "0121" => "41210000",
        "0902" => MOCK_VIN,
        "03" => "430113000000",
        "04" => "44",
        "1003" => "5003",
        "1001" => "5001",
        "1101" => "5101",
        "020C00" => "420C000C1A",
        "020D00" => "420D0000",
        "020500" => "42050073",
        c if c.starts_with("AT") => "OK",
        _ => "NO DATA",
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn write(&self, text: &str) -> Result<(), LinkError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(LinkError::Disconnected);
        }
        let command = text.trim_end_matches('\r').to_string();
        self.writes.lock().push(command.clone());

        match compact(&command).as_str() {
            "ATZ" => self.echo.store(true, Ordering::SeqCst),
            "ATE0" => self.echo.store(false, Ordering::SeqCst),
            _ => {}
        }

        let chunks = match self.reply_for(&command) {
            Some(Reply::Text(reply)) if self.echo.load(Ordering::SeqCst) => {
                vec![format!("{command}\r{reply}\r\r>")]
            }
            Some(Reply::Text(reply)) => vec![format!("{reply}\r\r>")],
            Some(Reply::Chunks(chunks)) => chunks,
            Some(Reply::FailWrite) => {
                return Err(LinkError::Write(format!("mock refused {command}")));
            }
            Some(Reply::Silent) | None => {
                debug!("Mock adapter ignoring {}", command);
                Vec::new()
            }
        };

        if let Some(tx) = &self.wire.lock().chunks {
            for chunk in chunks {
                let _ = tx.send(chunk);
            }
        }
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        let mut wire = self.wire.lock();
        wire.chunks = None;
        wire.dropped = None;
    }
}

/// Connector over a single mock adapter
pub struct MockConnector {
    adapter: Arc<MockTransport>,
    devices: Vec<DeviceInfo>,
    refuse: AtomicBool,
}

impl MockConnector {
    /// Expose `adapter` as one paired device named "OBDII"
    pub fn new(adapter: Arc<MockTransport>) -> Self {
        Self {
            adapter,
            devices: vec![DeviceInfo {
                id: "00:1D:A5:68:98:8B".to_string(),
                name: "OBDII".to_string(),
            }],
            refuse: AtomicBool::new(false),
        }
    }

    /// Id of the mock device
    pub fn device_id(&self) -> &str {
        &self.devices[0].id
    }

    /// Make the next connects fail as if the adapter were out of range
    pub fn refuse_connections(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn enable(&self) -> Result<bool, LinkError> {
        Ok(true)
    }

    async fn scan(&self) -> Result<Vec<DeviceInfo>, LinkError> {
        Ok(self.devices.clone())
    }

    async fn connect(&self, device_id: &str) -> Result<Link, LinkError> {
        if !self.devices.iter().any(|d| d.id == device_id) {
            return Err(LinkError::DeviceNotFound(device_id.to_string()));
        }
        if self.refuse.load(Ordering::SeqCst) {
            return Err(LinkError::ConnectFailed("adapter out of range".to_string()));
        }
        Ok(self.adapter.attach())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_echo_until_ate0() {
        let adapter = MockTransport::new();
        let mut link = adapter.attach();

        link.transport.write("010D\r").await.unwrap();
        assert_eq!(link.chunks.recv().await.unwrap(), "010D\r410D2A\r\r>");

        link.transport.write("ATE0\r").await.unwrap();
        assert_eq!(link.chunks.recv().await.unwrap(), "OK\r\r>");

        link.transport.write("010D\r").await.unwrap();
        assert_eq!(link.chunks.recv().await.unwrap(), "410D2A\r\r>");
        assert_eq!(adapter.count("010D"), 2);
    }

    #[tokio::test]
    async fn test_drop_link_notifies() {
        let adapter = MockTransport::new();
        let link = adapter.attach();
        adapter.drop_link();

        assert!(link.dropped.await.is_ok());
        assert!(!link.transport.is_connected().await);
        assert_eq!(adapter.attach().transport.write("ATZ").await, Ok(()));
    }

    #[tokio::test]
    async fn test_connector_unknown_device() {
        let connector = MockConnector::new(MockTransport::new());
        assert!(matches!(
            connector.connect("AA:BB").await,
            Err(LinkError::DeviceNotFound(_))
        ));
        connector.refuse_connections(true);
        let id = connector.device_id().to_string();
        assert!(matches!(connector.connect(&id).await, Err(LinkError::ConnectFailed(_))));
    }
}

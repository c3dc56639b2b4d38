//! Serial transport
//!
//! Covers USB adapters and Bluetooth adapters bound to an RFCOMM tty
//! (`/dev/rfcomm0`). Pairing happens outside this crate.

use crate::error::LinkError;
use crate::transport::{Connector, DeviceInfo, Link, Transport};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_serial::{SerialPortBuilderExt, SerialPortType, SerialStream};
use tracing::{debug, info, warn};

/// Common ELM327 baud rate
pub const DEFAULT_BAUD_RATE: u32 = 38_400;

const READ_BUFFER_SIZE: usize = 256;

/// Opens serial ports by path
#[derive(Debug, Clone)]
pub struct SerialConnector {
    baud_rate: u32,
}

impl SerialConnector {
    pub fn new(baud_rate: u32) -> Self {
        Self { baud_rate }
    }
}

impl Default for SerialConnector {
    fn default() -> Self {
        Self::new(DEFAULT_BAUD_RATE)
    }
}

#[async_trait]
impl Connector for SerialConnector {
    async fn enable(&self) -> Result<bool, LinkError> {
        Ok(true)
    }

    async fn scan(&self) -> Result<Vec<DeviceInfo>, LinkError> {
        let ports = tokio_serial::available_ports()?;
        Ok(ports
            .into_iter()
            .map(|port| {
                let name = match &port.port_type {
                    SerialPortType::UsbPort(usb) => usb
                        .product
                        .clone()
                        .unwrap_or_else(|| format!("USB {:04x}:{:04x}", usb.vid, usb.pid)),
                    SerialPortType::BluetoothPort => "Bluetooth".to_string(),
                    _ => port.port_name.clone(),
                };
                DeviceInfo {
                    id: port.port_name,
                    name,
                }
            })
            .collect())
    }

    async fn connect(&self, device_id: &str) -> Result<Link, LinkError> {
        info!("Opening {} at {} baud", device_id, self.baud_rate);
        let stream = tokio_serial::new(device_id, self.baud_rate)
            .open_native_async()
            .map_err(|e| match e.kind {
                tokio_serial::ErrorKind::NoDevice => LinkError::DeviceNotFound(device_id.to_string()),
                _ => LinkError::ConnectFailed(e.to_string()),
            })?;

        let (reader, writer) = tokio::io::split(stream);
        let (chunks_tx, chunks) = mpsc::unbounded_channel();
        let (dropped_tx, dropped) = oneshot::channel();
        let connected = Arc::new(AtomicBool::new(true));

        let reader = tokio::spawn(read_loop(reader, chunks_tx, dropped_tx, connected.clone()));
        let transport = SerialTransport {
            writer: Mutex::new(writer),
            connected,
            reader,
        };

        Ok(Link {
            transport: Arc::new(transport),
            chunks,
            dropped,
        })
    }
}

async fn read_loop(
    mut reader: ReadHalf<SerialStream>,
    chunks: mpsc::UnboundedSender<String>,
    dropped: oneshot::Sender<()>,
    connected: Arc<AtomicBool>,
) {
    let mut buf = [0u8; READ_BUFFER_SIZE];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => {
                info!("Serial port closed");
                break;
            }
            Ok(n) => {
                let text = String::from_utf8_lossy(&buf[..n]).into_owned();
                if chunks.send(text).is_err() {
                    debug!("No reader for serial data, stopping");
                    return;
                }
            }
            Err(e) => {
                warn!("Serial read failed: {}", e);
                break;
            }
        }
    }
    connected.store(false, Ordering::SeqCst);
    let _ = dropped.send(());
}

/// Write side of an open serial port
pub struct SerialTransport {
    writer: Mutex<WriteHalf<SerialStream>>,
    connected: Arc<AtomicBool>,
    reader: JoinHandle<()>,
}

#[async_trait]
impl Transport for SerialTransport {
    async fn write(&self, text: &str) -> Result<(), LinkError> {
        let mut writer = self.writer.lock().await;
        writer
            .write_all(text.as_bytes())
            .await
            .map_err(|e| LinkError::Write(e.to_string()))?;
        writer.flush().await.map_err(|e| LinkError::Write(e.to_string()))
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && !self.reader.is_finished()
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.reader.abort();
        let _ = self.writer.lock().await.shutdown().await;
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

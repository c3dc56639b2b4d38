//! Transport contract
//!
//! The physical link (RFCOMM socket, tty, mock) is an external collaborator.
//! The queue needs an async write, the incoming chunk stream and a
//! notification when the link drops; the session additionally polls
//! [`Transport::is_connected`] to detect silent drops.

use crate::error::LinkError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// Byte-stream link to an adapter
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send text verbatim; the queue has already appended `\r`
    async fn write(&self, text: &str) -> Result<(), LinkError>;

    /// Check whether the physical link is still up
    async fn is_connected(&self) -> bool;

    /// Tear the link down; pending reads end
    async fn disconnect(&self);
}

/// An established connection
pub struct Link {
    /// Write side and liveness checks
    pub transport: Arc<dyn Transport>,
    /// Raw incoming chunks, arbitrarily split; ends when the link closes
    pub chunks: mpsc::UnboundedReceiver<String>,
    /// Fires once if the link drops on its own
    pub dropped: oneshot::Receiver<()>,
}

/// A device that can be connected to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Address or device path
    pub id: String,
    /// Display name
    pub name: String,
}

/// Discovers and opens links
#[async_trait]
pub trait Connector: Send + Sync {
    /// Switch the adapter radio on, if there is one. Returns whether it is on.
    async fn enable(&self) -> Result<bool, LinkError>;

    /// List devices that can be connected to
    async fn scan(&self) -> Result<Vec<DeviceInfo>, LinkError>;

    /// Open a link to `device_id`
    async fn connect(&self, device_id: &str) -> Result<Link, LinkError>;
}

//! Last connected device

use crate::error::SessionError;
use obd_link::DeviceInfo;
use parking_lot::Mutex;
use std::path::PathBuf;
use tracing::debug;

/// Remembers the last adapter that connected
pub trait DeviceStore: Send + Sync {
    fn load(&self) -> Result<Option<DeviceInfo>, SessionError>;
    fn save(&self, device: &DeviceInfo) -> Result<(), SessionError>;
}

/// JSON file store
#[derive(Debug, Clone)]
pub struct JsonDeviceStore {
    path: PathBuf,
}

impl JsonDeviceStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl DeviceStore for JsonDeviceStore {
    fn load(&self) -> Result<Option<DeviceInfo>, SessionError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(&self.path)?;
        Ok(Some(serde_json::from_str(&text)?))
    }

    fn save(&self, device: &DeviceInfo) -> Result<(), SessionError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(device)?)?;
        debug!("Saved last device to {}", self.path.display());
        Ok(())
    }
}

/// In-memory store, forgets on exit
#[derive(Debug, Default)]
pub struct MemoryDeviceStore {
    device: Mutex<Option<DeviceInfo>>,
}

impl DeviceStore for MemoryDeviceStore {
    fn load(&self) -> Result<Option<DeviceInfo>, SessionError> {
        Ok(self.device.lock().clone())
    }

    fn save(&self, device: &DeviceInfo) -> Result<(), SessionError> {
        *self.device.lock() = Some(device.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonDeviceStore::new(dir.path().join("state/last_device.json"));
        assert_eq!(store.load().unwrap(), None);

        let device = DeviceInfo {
            id: "/dev/rfcomm0".to_string(),
            name: "OBDII".to_string(),
        };
        store.save(&device).unwrap();
        assert_eq!(store.load().unwrap(), Some(device));
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("last_device.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(JsonDeviceStore::new(path).load(), Err(SessionError::Store(_))));
    }
}

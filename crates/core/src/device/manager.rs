//! Shared device manager
//!
//! Guards lazy initialization of the process-wide capture device. The slot
//! mutex is held across the open, so concurrent session creation rendezvous
//! here: the first caller performs the real initialization, everyone racing
//! it suspends on the lock and then reuses the published handle. A failed
//! open leaves the slot empty, so a later session can retry.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::DeviceConfig;
use crate::device::shared::SharedDevice;
use crate::error::Result;

#[derive(Default)]
pub struct DeviceManager {
    slot: Mutex<Option<Arc<SharedDevice>>>,
}

impl DeviceManager {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    /// Get the shared device, initializing it on first call.
    ///
    /// The first caller's configuration wins for the process lifetime;
    /// differing options from later sessions are ignored.
    pub async fn acquire(&self, config: &DeviceConfig) -> Result<Arc<SharedDevice>> {
        let mut slot = self.slot.lock().await;
        if let Some(device) = slot.as_ref() {
            if device.config() != config {
                debug!("Shared device already initialized, ignoring differing options");
            }
            return Ok(Arc::clone(device));
        }

        info!("Initializing shared capture device");
        let device = SharedDevice::open(config).await?;
        *slot = Some(Arc::clone(&device));
        Ok(device)
    }

    /// Whether the device has been initialized.
    pub async fn is_initialized(&self) -> bool {
        self.slot.lock().await.is_some()
    }

    /// Stop and drop the shared device. Process-shutdown-only; idempotent.
    pub async fn release(&self) {
        let taken = self.slot.lock().await.take();
        match taken {
            Some(device) => {
                info!("Releasing shared capture device");
                device.shutdown().await;
            }
            None => warn!("Release requested but no device was initialized"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn concurrent_acquires_share_one_instance() {
        let manager = Arc::new(DeviceManager::new());
        let config = DeviceConfig::default();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let manager = Arc::clone(&manager);
            let config = config.clone();
            handles.push(tokio::spawn(
                async move { manager.acquire(&config).await },
            ));
        }

        let mut devices = Vec::new();
        for handle in handles {
            devices.push(handle.await.unwrap().unwrap());
        }
        let first = &devices[0];
        for device in &devices[1..] {
            assert!(Arc::ptr_eq(first, device));
        }
    }

    #[tokio::test]
    async fn failed_initialization_allows_retry() {
        let manager = DeviceManager::new();
        let bad = DeviceConfig {
            width: 0,
            ..Default::default()
        };

        assert!(manager.acquire(&bad).await.is_err());
        assert!(!manager.is_initialized().await);

        // A later session with a valid configuration succeeds.
        let device = manager.acquire(&DeviceConfig::default()).await.unwrap();
        assert!(manager.is_initialized().await);
        assert_eq!(device.config().width, 300);
    }

    #[tokio::test]
    async fn second_acquire_keeps_first_config() {
        let manager = DeviceManager::new();
        let first = manager.acquire(&DeviceConfig::default()).await.unwrap();

        let other = DeviceConfig {
            width: 640,
            height: 480,
            ..Default::default()
        };
        let second = manager.acquire(&other).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.config().width, 300);
    }

    #[tokio::test]
    async fn release_is_idempotent() {
        let manager = DeviceManager::new();
        manager.acquire(&DeviceConfig::default()).await.unwrap();
        assert!(manager.is_initialized().await);

        manager.release().await;
        assert!(!manager.is_initialized().await);

        // Releasing again is a no-op.
        manager.release().await;
        assert!(!manager.is_initialized().await);
    }
}

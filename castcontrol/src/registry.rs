use std::sync::{Arc, RwLock};

use tracing::{debug, info, warn};

use crate::backend::{DeviceDiscovery, DeviceHandle};
use crate::errors::{ControlError, Result};
use crate::model::{DeviceInfo, DeviceListing};

/// Latest discovery snapshot plus the device the user picked.
///
/// The snapshot is swapped as a whole on refresh, so readers either see the
/// previous list or the new one. The selection is pinned: a refresh never
/// changes it, only [`DeviceRegistry::select`] does.
pub struct DeviceRegistry {
    discovery: Box<dyn DeviceDiscovery>,
    snapshot: RwLock<Arc<Vec<DeviceHandle>>>,
    selected: RwLock<Option<DeviceHandle>>,
}

impl DeviceRegistry {
    pub fn new(discovery: Box<dyn DeviceDiscovery>) -> Self {
        Self {
            discovery,
            snapshot: RwLock::new(Arc::new(Vec::new())),
            selected: RwLock::new(None),
        }
    }

    /// Runs discovery and replaces the snapshot. Returns the device count.
    pub fn refresh(&self) -> Result<usize> {
        let devices = self
            .discovery
            .discover()
            .map_err(|e| ControlError::DiscoveryFailed(format!("{:#}", e)))?;

        for device in &devices {
            debug!(
                id = %device.info().id,
                name = %device.info().friendly_name,
                location = %device.info().location(),
                "Discovered device"
            );
        }

        let count = devices.len();
        let fresh = Arc::new(devices);
        match self.snapshot.write() {
            Ok(mut guard) => *guard = fresh,
            Err(poisoned) => *poisoned.into_inner() = fresh,
        }

        if count == 0 {
            warn!("Discovery finished without any device");
        } else {
            info!("Discovery found {} device(s)", count);
        }
        Ok(count)
    }

    /// Current snapshot; cheap to clone and never half-updated.
    pub fn snapshot(&self) -> Arc<Vec<DeviceHandle>> {
        match self.snapshot.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    pub fn count(&self) -> usize {
        self.snapshot().len()
    }

    pub fn list(&self) -> Vec<DeviceListing> {
        let selected = self.selected().map(|d| d.info().id.clone());
        self.snapshot()
            .iter()
            .enumerate()
            .map(|(index, device)| DeviceListing {
                index,
                friendly_name: device.info().friendly_name.clone(),
                selected: selected.as_ref() == Some(&device.info().id),
            })
            .collect()
    }

    /// Selects the device at `index` in the current snapshot.
    pub fn select(&self, index: usize) -> Result<DeviceHandle> {
        let snapshot = self.snapshot();
        let device = snapshot
            .get(index)
            .cloned()
            .ok_or(ControlError::InvalidIndex {
                index,
                count: snapshot.len(),
            })?;
        self.pin(index, device)
    }

    /// Selects the first device whose friendly name matches (case-insensitive).
    ///
    /// Lookup and selection use the same snapshot, a concurrent refresh
    /// cannot make it pick another device.
    pub fn select_by_name(&self, name: &str) -> Result<DeviceHandle> {
        let snapshot = self.snapshot();
        let (index, device) = snapshot
            .iter()
            .enumerate()
            .find(|(_, d)| d.info().friendly_name.eq_ignore_ascii_case(name.trim()))
            .map(|(index, d)| (index, Arc::clone(d)))
            .ok_or_else(|| ControlError::UnknownDevice(name.trim().to_string()))?;
        self.pin(index, device)
    }

    fn pin(&self, index: usize, device: DeviceHandle) -> Result<DeviceHandle> {
        info!(
            index,
            name = %device.info().friendly_name,
            "Selecting device"
        );

        let pinned = Arc::clone(&device);
        match self.selected.write() {
            Ok(mut guard) => *guard = Some(pinned),
            Err(poisoned) => *poisoned.into_inner() = Some(pinned),
        }
        Ok(device)
    }

    pub fn selected(&self) -> Option<DeviceHandle> {
        match self.selected.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn selected_info(&self) -> Option<DeviceInfo> {
        self.selected().map(|d| d.info().clone())
    }
}

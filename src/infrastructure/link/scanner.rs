//! Device Discovery Module
//!
//! Enumerates candidate drive units and resolves the operator's choice
//! down to exactly one device.

use crate::domain::errors::SelectionError;
use crate::domain::models::DeviceDescriptor;
use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, info};

/// External collaborator that lists nearby candidate devices
#[async_trait]
pub trait DeviceDiscovery: Send {
    async fn discover(&mut self) -> Result<Vec<DeviceDescriptor>>;
}

/// External collaborator that lets the operator pick from the candidates
pub trait DeviceChooser: Send {
    fn choose(&mut self, candidates: &[DeviceDescriptor]) -> Vec<DeviceDescriptor>;
}

/// Discovery over the devices remembered in settings
pub struct KnownDeviceDiscovery {
    devices: Vec<DeviceDescriptor>,
}

impl KnownDeviceDiscovery {
    pub fn new(devices: Vec<DeviceDescriptor>) -> Self {
        Self { devices }
    }
}

#[async_trait]
impl DeviceDiscovery for KnownDeviceDiscovery {
    async fn discover(&mut self) -> Result<Vec<DeviceDescriptor>> {
        info!("Discovery found {} known device(s)", self.devices.len());
        Ok(self.devices.clone())
    }
}

/// Chooses the configured device id, or the only candidate when none is configured
pub struct PreferredDeviceChooser {
    preferred_id: Option<String>,
}

impl PreferredDeviceChooser {
    pub fn new(preferred_id: Option<String>) -> Self {
        Self { preferred_id }
    }
}

impl DeviceChooser for PreferredDeviceChooser {
    fn choose(&mut self, candidates: &[DeviceDescriptor]) -> Vec<DeviceDescriptor> {
        match &self.preferred_id {
            Some(id) => candidates.iter().filter(|d| &d.id == id).cloned().collect(),
            // without a preference the operator has not narrowed anything down
            None => candidates.to_vec(),
        }
    }
}

/// Resolve a choice to a single device.
///
/// An empty candidate list wins over an empty choice, so "nothing nearby"
/// is reported as such rather than as "nothing picked".
pub fn select_device(
    candidates: &[DeviceDescriptor],
    chosen: &[DeviceDescriptor],
) -> Result<DeviceDescriptor, SelectionError> {
    if candidates.is_empty() {
        return Err(SelectionError::NoDevicesFound);
    }

    match chosen {
        [] => Err(SelectionError::NoDeviceChosen),
        [device] => {
            debug!("Selected device {} ({})", device.name, device.address);
            Ok(device.clone())
        }
        _ => Err(SelectionError::MultipleDevicesChosen),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn devices() -> Vec<DeviceDescriptor> {
        vec![
            DeviceDescriptor::new("rc-1", "Rover One", "10.0.0.1"),
            DeviceDescriptor::new("rc-2", "Rover Two", "10.0.0.2"),
        ]
    }

    #[test]
    fn test_select_exactly_one() {
        let candidates = devices();
        let chosen = vec![candidates[1].clone()];
        assert_eq!(select_device(&candidates, &chosen), Ok(candidates[1].clone()));
    }

    #[test]
    fn test_select_errors() {
        let candidates = devices();
        assert_eq!(select_device(&[], &[]), Err(SelectionError::NoDevicesFound));
        assert_eq!(
            select_device(&candidates, &[]),
            Err(SelectionError::NoDeviceChosen)
        );
        assert_eq!(
            select_device(&candidates, &candidates),
            Err(SelectionError::MultipleDevicesChosen)
        );
    }

    #[test]
    fn test_preferred_chooser() {
        let candidates = devices();

        let mut chooser = PreferredDeviceChooser::new(Some("rc-2".to_string()));
        assert_eq!(chooser.choose(&candidates), vec![candidates[1].clone()]);

        let mut chooser = PreferredDeviceChooser::new(Some("rc-9".to_string()));
        assert!(chooser.choose(&candidates).is_empty());

        let mut chooser = PreferredDeviceChooser::new(None);
        assert_eq!(chooser.choose(&candidates).len(), 2);
    }

    #[tokio::test]
    async fn test_known_device_discovery() {
        let mut discovery = KnownDeviceDiscovery::new(devices());
        assert_eq!(discovery.discover().await.unwrap().len(), 2);
    }
}

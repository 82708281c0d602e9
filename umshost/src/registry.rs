// SPDX-License-Identifier: MIT

use std::collections::HashMap;

use umsio::channel::TransferChannel;

use crate::config::HostConfig;
use crate::discovery::UsbDeviceDescriptor;
use crate::media::MediaDevice;

/// Known devices, keyed by the identity derived from their descriptor.
pub struct DeviceRegistry<C: TransferChannel> {
    devices: HashMap<String, MediaDevice<C>>,
}

impl<C: TransferChannel> Default for DeviceRegistry<C> {
    fn default() -> Self {
        Self {
            devices: HashMap::new(),
        }
    }
}

impl<C: TransferChannel> DeviceRegistry<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry key of `desc`. Unlike [`MediaDevice::id`] it does not depend
    /// on the mounted volume, so attach and detach agree on it.
    #[inline]
    pub fn key(desc: &UsbDeviceDescriptor) -> String {
        desc.device_id(None)
    }

    pub fn get_or_insert(&mut self, desc: &UsbDeviceDescriptor, config: &HostConfig) -> &mut MediaDevice<C> {
        self.devices
            .entry(Self::key(desc))
            .or_insert_with(|| MediaDevice::new(desc.clone(), config.clone()))
    }

    pub fn get(&self, desc: &UsbDeviceDescriptor) -> Option<&MediaDevice<C>> {
        self.devices.get(&Self::key(desc))
    }

    /// Looks a device up by registry key or by its mounted id.
    pub fn find_mut(&mut self, id: &str) -> Option<&mut MediaDevice<C>> {
        if self.devices.contains_key(id) {
            return self.devices.get_mut(id);
        }
        self.devices.values_mut().find(|d| d.id() == id)
    }

    pub fn remove(&mut self, desc: &UsbDeviceDescriptor) -> Option<MediaDevice<C>> {
        self.devices.remove(&Self::key(desc))
    }

    /// Removes every device whose descriptor fails `keep`.
    pub fn retain(&mut self, mut keep: impl FnMut(&UsbDeviceDescriptor) -> bool) -> Vec<MediaDevice<C>> {
        let gone: Vec<String> = self
            .devices
            .iter()
            .filter(|(_, d)| !keep(d.descriptor()))
            .map(|(k, _)| k.clone())
            .collect();
        gone.iter().filter_map(|k| self.devices.remove(k)).collect()
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.devices.values().map(|d| d.id().to_owned()).collect();
        ids.sort();
        ids
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Closes and forgets every device.
    pub fn clear(&mut self) {
        for (_, mut device) in self.devices.drain() {
            device.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::tests::stick;
    use umsio::fake::FakeChannel;

    #[test]
    fn same_descriptor_same_entry() {
        let cfg = HostConfig::default();
        let mut reg = DeviceRegistry::<FakeChannel>::new();
        let desc = stick(Some("ABC"));
        reg.get_or_insert(&desc, &cfg);
        reg.get_or_insert(&desc, &cfg);
        assert_eq!(reg.len(), 1);
        assert!(reg.find_mut("ABC-1921-21863").is_some());
        assert!(reg.remove(&desc).is_some());
        assert!(reg.is_empty());
    }

    #[test]
    fn retain_drops_vanished_devices() {
        let cfg = HostConfig::default();
        let mut reg = DeviceRegistry::<FakeChannel>::new();
        reg.get_or_insert(&stick(Some("A")), &cfg);
        reg.get_or_insert(&stick(Some("B")), &cfg);
        let gone = reg.retain(|d| d.serial.as_deref() == Some("A"));
        assert_eq!(gone.len(), 1);
        assert_eq!(reg.ids(), vec!["A-1921-21863".to_owned()]);
    }
}

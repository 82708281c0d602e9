// SPDX-License-Identifier: MIT
#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc::UnboundedReceiver;

use umsfs::fat32::*;
use umshost::discovery::{
    INTERFACE_PROTOCOL_BULK_ONLY, INTERFACE_SUBCLASS_SCSI, USB_CLASS_MASS_STORAGE,
};
use umshost::{DeviceEvent, HostConfig, HostResult, UsbBackend, UsbDeviceDescriptor, UsbInterfaceDescriptor};
use umsio::fake::{FakeChannel, FakeLun, FakeMonitor};

pub const VOLUME: u64 = 8 << 20;

pub fn stick(serial: Option<&str>) -> UsbDeviceDescriptor {
    stick_at("/dev/bus/usb/001/004", serial)
}

/// Same model as [`stick`], plugged into another port.
pub fn stick_at(device_name: &str, serial: Option<&str>) -> UsbDeviceDescriptor {
    UsbDeviceDescriptor {
        vendor_id: 0x0781,
        product_id: 0x5567,
        class: 0,
        device_name: device_name.into(),
        serial: serial.map(Into::into),
        manufacturer: Some("SanDisk".into()),
        product: Some("Cruzer Blade".into()),
        interfaces: vec![UsbInterfaceDescriptor {
            id: 0,
            class: USB_CLASS_MASS_STORAGE,
            subclass: INTERFACE_SUBCLASS_SCSI,
            protocol: INTERFACE_PROTOCOL_BULK_ONLY,
            endpoints: vec![Endpoint::bulk_in(1, 512), Endpoint::bulk_out(2, 512)],
        }],
    }
}

/// FAT32 volume holding `files`, parent directories created on the way.
pub fn fat32_image(label: &str, files: &[(&str, &[u8])]) -> Vec<u8> {
    let meta = Fat32Meta::new_custom(VOLUME, Some(label), 0x0BAD_CAFE, 512, 512).unwrap();
    let mut io = MemBlockIO::new(vec![0u8; VOLUME as usize]);
    Fat32Formatter::new(&mut io, &meta).format(false).unwrap();

    let mut fs = Fat32FileSystem::mount(io).unwrap();
    for (path, data) in files {
        let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
        let (name, dirs) = parts.split_last().unwrap();
        let mut dir = fs.root();
        for part in dirs {
            let next = fs.list_files(&dir).unwrap().into_iter().find(|n| n.name == *part);
            dir = match next {
                Some(d) => d,
                None => fs.create_directory(&dir, part).unwrap(),
            };
        }
        let node = fs.create_file(&dir, name).unwrap();
        let mut file = fs.open(&node).unwrap();
        fs.write(&mut file, 0, data).unwrap();
        fs.close_file(file).unwrap();
    }
    fs.into_inner().unwrap().into_inner()
}

pub fn fast_config() -> HostConfig {
    HostConfig {
        settle_delay_ms: 50,
        ..HostConfig::default()
    }
}

#[derive(Default)]
pub struct BackendState {
    pub attached: Vec<UsbDeviceDescriptor>,
    pub luns: Vec<FakeLun>,
    pub permitted: bool,
    pub permission_requests: usize,
    pub opens: usize,
}

/// One fake drive behind a permission gate.
#[derive(Clone)]
pub struct FakeBackend {
    pub state: Arc<Mutex<BackendState>>,
    pub monitor: Arc<FakeMonitor>,
}

impl FakeBackend {
    pub fn new(luns: Vec<FakeLun>) -> Self {
        let state = BackendState {
            luns,
            permitted: true,
            ..BackendState::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
            monitor: Arc::new(FakeMonitor::default()),
        }
    }

    pub fn opens(&self) -> usize {
        self.state.lock().unwrap().opens
    }
}

impl UsbBackend for FakeBackend {
    type Channel = FakeChannel;

    fn attached_devices(&self) -> Vec<UsbDeviceDescriptor> {
        self.state.lock().unwrap().attached.clone()
    }

    fn has_permission(&self, _device: &UsbDeviceDescriptor) -> bool {
        self.state.lock().unwrap().permitted
    }

    fn request_permission(&mut self, _device: &UsbDeviceDescriptor) {
        self.state.lock().unwrap().permission_requests += 1;
    }

    fn open_channel(
        &mut self,
        _device: &UsbDeviceDescriptor,
        _interface: &UsbInterfaceDescriptor,
    ) -> HostResult<FakeChannel> {
        let mut state = self.state.lock().unwrap();
        state.opens += 1;
        Ok(FakeChannel::with_monitor(state.luns.clone(), self.monitor.clone()))
    }
}

pub async fn next_event(rx: &mut UnboundedReceiver<DeviceEvent>) -> DeviceEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for a device event")
        .expect("event channel closed")
}

// SPDX-License-Identifier: MIT

//! USB descriptors, mass-storage detection and the platform backend seam.

use core::fmt::{self, Write as _};

use umsio::channel::{Direction, Endpoint, TransferChannel};

use crate::config::HostConfig;
use crate::errors::HostResult;

pub const USB_CLASS_MASS_STORAGE: u8 = 0x08;
/// SCSI transparent command set.
pub const INTERFACE_SUBCLASS_SCSI: u8 = 0x06;
/// Bulk-Only Transport.
pub const INTERFACE_PROTOCOL_BULK_ONLY: u8 = 0x50;

const MAX_SERIAL_LEN: usize = 14;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsbInterfaceDescriptor {
    pub id: u8,
    pub class: u8,
    pub subclass: u8,
    pub protocol: u8,
    pub endpoints: Vec<Endpoint>,
}

impl UsbInterfaceDescriptor {
    /// The bulk IN and bulk OUT endpoints, when both are present.
    pub fn bulk_endpoints(&self) -> Option<(Endpoint, Endpoint)> {
        let pick = |dir: Direction| {
            self.endpoints
                .iter()
                .copied()
                .filter(|e| e.is_bulk() && e.direction() == dir)
                .last()
        };
        Some((pick(Direction::In)?, pick(Direction::Out)?))
    }

    /// SCSI transparent over bulk-only, with both bulk endpoints.
    pub fn is_bulk_only_scsi(&self) -> bool {
        if self.subclass != INTERFACE_SUBCLASS_SCSI || self.protocol != INTERFACE_PROTOCOL_BULK_ONLY {
            return false;
        }
        if self.endpoints.len() != 2 {
            log::warn!("interface {} has {} endpoints", self.id, self.endpoints.len());
        }
        if self.bulk_endpoints().is_none() {
            log::error!("interface {}: bulk endpoints missing", self.id);
            return false;
        }
        true
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsbDeviceDescriptor {
    pub vendor_id: u16,
    pub product_id: u16,
    pub class: u8,
    /// Bus path of the device node, e.g. `/dev/bus/usb/002/002`.
    pub device_name: String,
    pub serial: Option<String>,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub interfaces: Vec<UsbInterfaceDescriptor>,
}

impl UsbDeviceDescriptor {
    pub fn is_mass_storage(&self) -> bool {
        self.class == USB_CLASS_MASS_STORAGE
            || self.interfaces.iter().any(|i| i.class == USB_CLASS_MASS_STORAGE)
    }

    /// First interface this stack can drive.
    pub fn storage_interface(&self) -> Option<&UsbInterfaceDescriptor> {
        self.interfaces
            .iter()
            .find(|i| i.class == USB_CLASS_MASS_STORAGE && i.is_bulk_only_scsi())
    }

    #[inline]
    pub fn is_compatible(&self) -> bool {
        self.storage_interface().is_some()
    }

    /// Serial number trimmed to a usable length, if the device reports one.
    pub fn short_serial(&self) -> Option<String> {
        let serial = self.serial.as_deref()?.trim();
        if serial.is_empty() {
            return None;
        }
        Some(serial.chars().take(MAX_SERIAL_LEN).collect())
    }

    /// Identity stable across reconnects: serial number, else the volume
    /// label, followed by vendor and product id.
    pub fn device_id(&self, volume_label: Option<&str>) -> String {
        let mut id = match (self.short_serial(), volume_label.map(str::trim)) {
            (Some(serial), _) => serial,
            (None, Some(label)) if !label.is_empty() => sanitize_volume_label(label),
            _ => String::new(),
        };
        for part in [self.vendor_id, self.product_id] {
            if !id.is_empty() {
                id.push('-');
            }
            let _ = write!(id, "{part}");
        }
        id
    }
}

impl fmt::Display for UsbDeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = [self.manufacturer.as_deref(), self.product.as_deref()];
        let mut names = names.iter().flatten().filter(|s| !s.trim().is_empty()).peekable();
        if names.peek().is_some() {
            for (i, n) in names.enumerate() {
                if i > 0 {
                    f.write_char(' ')?;
                }
                f.write_str(n.trim())?;
            }
            f.write_char(' ')?;
        }
        write!(f, "({};{};{})", self.vendor_id, self.product_id, self.device_name)
    }
}

/// `aw-` followed by the form-encoded label, spaces as underscores.
pub fn sanitize_volume_label(label: &str) -> String {
    let mut out = String::from("aw-");
    for b in label.trim().bytes() {
        match b {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'.' | b'-' | b'*' | b'_' => out.push(b as char),
            b' ' => out.push('_'),
            _ => {
                let _ = write!(out, "%{b:02X}");
            }
        }
    }
    out
}

/// Why a device is not handed to the lifecycle manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    Ignored,
    NotMassStorage,
    NotCompatible,
}

/// Filters out built-in and unsupported devices.
pub fn check_device(desc: &UsbDeviceDescriptor, config: &HostConfig) -> Result<(), Rejection> {
    if config.is_ignored(desc.vendor_id, desc.product_id) {
        return Err(Rejection::Ignored);
    }
    if !desc.is_mass_storage() {
        return Err(Rejection::NotMassStorage);
    }
    if !desc.is_compatible() {
        return Err(Rejection::NotCompatible);
    }
    Ok(())
}

/// Platform USB access: enumeration, permissions and opening channels.
///
/// The lifecycle manager calls it only from its own worker thread.
pub trait UsbBackend {
    type Channel: TransferChannel;

    fn attached_devices(&self) -> Vec<UsbDeviceDescriptor>;

    fn has_permission(&self, device: &UsbDeviceDescriptor) -> bool;

    /// Asks the user for access. The answer arrives later as a permission
    /// change.
    fn request_permission(&mut self, device: &UsbDeviceDescriptor);

    /// Opens an unclaimed channel on `interface`.
    fn open_channel(
        &mut self,
        device: &UsbDeviceDescriptor,
        interface: &UsbInterfaceDescriptor,
    ) -> HostResult<Self::Channel>;
}

// SPDX-License-Identifier: MIT

//! Raw USB transfer seam.
//!
//! A [`TransferChannel`] owns one claimed interface and its two bulk
//! endpoints. The platform implementation is supplied by the host
//! application; [`crate::fake::FakeChannel`] simulates a device for tests.

use crate::errors::TransportResult;

/// Fixed timeout applied to every bulk and control transfer.
pub const TRANSFER_TIMEOUT_MS: u32 = 5000;

/// Endpoint address bit selecting device-to-host.
pub const ENDPOINT_DIR_IN: u8 = 0x80;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Device to host.
    In,
    /// Host to device.
    Out,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferType {
    Control,
    Isochronous,
    Bulk,
    Interrupt,
}

impl TransferType {
    /// Decodes `bmAttributes` of an endpoint descriptor.
    #[inline]
    pub const fn from_attributes(attributes: u8) -> Self {
        match attributes & 0x03 {
            0 => TransferType::Control,
            1 => TransferType::Isochronous,
            2 => TransferType::Bulk,
            _ => TransferType::Interrupt,
        }
    }
}

/// Endpoint descriptor, immutable once the interface is claimed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoint {
    pub address: u8,
    pub transfer_type: TransferType,
    pub max_packet_size: u16,
}

impl Endpoint {
    #[inline]
    pub const fn new(address: u8, transfer_type: TransferType, max_packet_size: u16) -> Self {
        Self {
            address,
            transfer_type,
            max_packet_size,
        }
    }

    #[inline]
    pub const fn bulk_in(number: u8, max_packet_size: u16) -> Self {
        Self::new(number | ENDPOINT_DIR_IN, TransferType::Bulk, max_packet_size)
    }

    #[inline]
    pub const fn bulk_out(number: u8, max_packet_size: u16) -> Self {
        Self::new(number & 0x0F, TransferType::Bulk, max_packet_size)
    }

    #[inline]
    pub const fn direction(&self) -> Direction {
        if self.address & ENDPOINT_DIR_IN != 0 {
            Direction::In
        } else {
            Direction::Out
        }
    }

    #[inline]
    pub const fn is_bulk(&self) -> bool {
        matches!(self.transfer_type, TransferType::Bulk)
    }
}

/// Setup packet of a control transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlRequest {
    pub request_type: u8,
    pub request: u8,
    pub value: u16,
    pub index: u16,
}

impl ControlRequest {
    /// Class-specific GET MAX LUN (interface recipient, device to host).
    #[inline]
    pub const fn get_max_lun(interface: u8) -> Self {
        Self {
            request_type: 0xA1,
            request: 0xFE,
            value: 0,
            index: interface as u16,
        }
    }

    /// Class-specific Bulk-Only Mass Storage Reset.
    #[inline]
    pub const fn bulk_only_reset(interface: u8) -> Self {
        Self {
            request_type: 0x21,
            request: 0xFF,
            value: 0,
            index: interface as u16,
        }
    }
}

/// Raw transfers on one claimed mass-storage interface.
///
/// Not thread-safe: every call for a given device must come from the same
/// confinement context. After [`close`](TransferChannel::close) every
/// transfer fails with `TransportError::Closed`.
pub trait TransferChannel {
    /// Opens the device handle, selects the configuration and force-claims
    /// the interface.
    fn init_connection(&mut self) -> TransportResult;

    /// Sends `data` on the bulk OUT endpoint, returning the bytes written.
    fn bulk_out(&mut self, data: &[u8]) -> TransportResult<usize>;

    /// Receives into `buf` from the bulk IN endpoint. Zero bytes is a valid
    /// outcome for some responses.
    fn bulk_in(&mut self, buf: &mut [u8]) -> TransportResult<usize>;

    fn control_transfer(&mut self, request: ControlRequest, buf: &mut [u8])
    -> TransportResult<usize>;

    /// Clears a STALL on one of the claimed bulk endpoints.
    fn clear_halt(&mut self, direction: Direction) -> TransportResult;

    /// Low-level USB port reset.
    fn reset(&mut self) -> TransportResult;

    /// Releases the interface and the OS handle. Idempotent.
    fn close(&mut self);

    fn is_closed(&self) -> bool;

    /// `bInterfaceNumber` of the claimed interface.
    fn interface_number(&self) -> u8;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_direction_from_address() {
        assert_eq!(Endpoint::bulk_in(1, 512).address, 0x81);
        assert_eq!(Endpoint::bulk_in(1, 512).direction(), Direction::In);
        assert_eq!(Endpoint::bulk_out(2, 512).direction(), Direction::Out);
        assert!(Endpoint::new(0x83, TransferType::from_attributes(0x03), 8).direction() == Direction::In);
        assert!(!Endpoint::new(0x83, TransferType::from_attributes(0x03), 8).is_bulk());
    }

    #[test]
    fn get_max_lun_setup_packet() {
        let req = ControlRequest::get_max_lun(3);
        assert_eq!((req.request_type, req.request, req.value, req.index), (0xA1, 0xFE, 0, 3));
    }
}

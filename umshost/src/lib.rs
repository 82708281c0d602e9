// SPDX-License-Identifier: MIT

//! Host side of the USB mass storage stack.
//!
//! [`discovery`] decides which attached devices are usable drives,
//! [`device`] opens one and mounts its FAT32 partitions, [`media`] is the
//! browsing and streaming view on a mounted drive, and [`lifecycle`] runs
//! the attach/detach state machine on a single confined worker.

mod cache;
pub mod config;
pub mod device;
pub mod discovery;
pub mod errors;
pub mod lifecycle;
pub mod media;
pub mod registry;

pub use cache::FilepathCache;
pub use config::HostConfig;
pub use device::{MassStorageDevice, Partition, PartitionIO};
pub use discovery::{UsbBackend, UsbDeviceDescriptor, UsbInterfaceDescriptor};
pub use errors::{ErrorCategory, HostError, HostResult, IoError};
pub use lifecycle::{DeviceEvent, LifecycleManager};
pub use media::{MediaDevice, MediaStream};
pub use registry::DeviceRegistry;

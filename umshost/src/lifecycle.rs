// SPDX-License-Identifier: MIT

//! Serialises attach, detach and permission events on one worker.
//!
//! Everything that touches a device (channel, transport, filesystem) runs
//! on a single thread driving a current-thread runtime. Each kind of work
//! is a singleton task per device: launching a new one aborts the previous
//! task of the same kind for the same device, and a detach aborts that
//! device's pending attach work and any rescan first. Rescans are one task
//! for the whole bus. An attach aborted while waiting out the settle delay
//! never touches the device.

use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;
use std::rc::Rc;
use std::thread;

use log::{debug, error, info, warn};
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinHandle, LocalSet};
use umsio::channel::TransferChannel;

use crate::config::HostConfig;
use crate::discovery::{Rejection, UsbBackend, UsbDeviceDescriptor, check_device};
use crate::errors::{ErrorCategory, HostError, HostResult};
use crate::media::MediaDevice;
use crate::registry::DeviceRegistry;

/// Notifications for the application layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    Connected { id: String },
    Disconnected { id: String },
    Error(ErrorCategory),
    /// Access was requested from the user; a permission change follows.
    PermissionRequested { id: String },
    /// The set of mounted devices may have changed.
    Refreshed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum TaskKind {
    Attach,
    AttachDelayed,
    Detach,
    Permission,
    Update,
}

type DeviceFn<C> = Box<dyn FnOnce(Option<&mut MediaDevice<C>>) + Send>;

enum Command<C: TransferChannel> {
    Attached(UsbDeviceDescriptor),
    Ready(UsbDeviceDescriptor),
    Detached(UsbDeviceDescriptor),
    PermissionChanged(UsbDeviceDescriptor, bool),
    Update,
    WithDevice(String, DeviceFn<C>),
    Shutdown,
}

/// Handle to the lifecycle worker thread.
pub struct LifecycleManager<B: UsbBackend> {
    commands: mpsc::UnboundedSender<Command<B::Channel>>,
    worker: Option<thread::JoinHandle<()>>,
}

impl<B> LifecycleManager<B>
where
    B: UsbBackend + Send + 'static,
    B::Channel: 'static,
{
    /// Spawns the worker, which takes ownership of `backend`.
    pub fn start(
        backend: B,
        config: HostConfig,
    ) -> std::io::Result<(Self, mpsc::UnboundedReceiver<DeviceEvent>)> {
        let (commands, rx) = mpsc::unbounded_channel();
        let (events, events_rx) = mpsc::unbounded_channel();

        let runtime = tokio::runtime::Builder::new_current_thread().enable_time().build()?;
        let worker = thread::Builder::new()
            .name("ums-lifecycle".into())
            .spawn(move || {
                let local = LocalSet::new();
                let state = Rc::new(RefCell::new(Worker::new(backend, config, events)));
                local.block_on(&runtime, run(state, rx));
            })?;

        Ok((
            Self {
                commands,
                worker: Some(worker),
            },
            events_rx,
        ))
    }

    /// Raw attach. Handled after the settle delay unless a ready signal or a
    /// detach comes first.
    pub fn on_attached(&self, device: UsbDeviceDescriptor) {
        self.send(Command::Attached(device));
    }

    /// Device ready signal; replaces any delayed attach and runs now.
    pub fn on_ready(&self, device: UsbDeviceDescriptor) {
        self.send(Command::Ready(device));
    }

    pub fn on_detached(&self, device: UsbDeviceDescriptor) {
        self.send(Command::Detached(device));
    }

    pub fn on_permission_changed(&self, device: UsbDeviceDescriptor, granted: bool) {
        self.send(Command::PermissionChanged(device, granted));
    }

    /// Rescans the backend: mounts new devices and forgets vanished ones.
    pub fn update_attached_devices(&self) {
        self.send(Command::Update);
    }

    /// Runs `f` on the worker against the device with `id`, registry key or
    /// mounted id.
    pub async fn with_device<R, F>(&self, id: &str, f: F) -> HostResult<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut MediaDevice<B::Channel>) -> R + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let call: DeviceFn<B::Channel> = Box::new(move |device| {
            let _ = tx.send(device.map(f));
        });
        self.commands
            .send(Command::WithDevice(id.to_owned(), call))
            .map_err(|_| HostError::Closed)?;
        rx.await.map_err(|_| HostError::Closed)?.ok_or(HostError::NotFound)
    }

    /// Stops the worker after closing every device.
    pub fn shutdown(mut self) {
        self.stop();
    }
}

impl<B: UsbBackend> LifecycleManager<B> {
    fn send(&self, cmd: Command<B::Channel>) {
        if self.commands.send(cmd).is_err() {
            warn!("lifecycle worker is gone");
        }
    }

    fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        let _ = self.commands.send(Command::Shutdown);
        if worker.join().is_err() {
            error!("lifecycle worker panicked");
        }
    }
}

impl<B: UsbBackend> Drop for LifecycleManager<B> {
    fn drop(&mut self) {
        self.stop();
    }
}

type Shared<B> = Rc<RefCell<Worker<B>>>;

async fn run<B>(
    state: Shared<B>,
    mut rx: mpsc::UnboundedReceiver<Command<B::Channel>>,
) where
    B: UsbBackend + 'static,
    B::Channel: 'static,
{
    let mut tasks = TaskSlots::default();
    let settle = state.borrow().config.settle_delay();

    while let Some(cmd) = rx.recv().await {
        match cmd {
            Command::Attached(desc) => {
                let device = desc.device_name.clone();
                let state = state.clone();
                tasks.launch(TaskKind::AttachDelayed, Some(device.as_str()), async move {
                    tokio::time::sleep(settle).await;
                    state.borrow_mut().attach(&desc);
                });
            }
            Command::Ready(desc) => {
                let device = desc.device_name.clone();
                tasks.cancel(TaskKind::AttachDelayed, Some(device.as_str()));
                let state = state.clone();
                tasks.launch(TaskKind::Attach, Some(device.as_str()), async move {
                    state.borrow_mut().attach(&desc);
                });
            }
            Command::Detached(desc) => {
                let device = desc.device_name.clone();
                tasks.cancel(TaskKind::Attach, Some(device.as_str()));
                tasks.cancel(TaskKind::AttachDelayed, Some(device.as_str()));
                tasks.cancel(TaskKind::Update, None);
                let state = state.clone();
                tasks.launch(TaskKind::Detach, Some(device.as_str()), async move {
                    state.borrow_mut().detach(&desc);
                });
            }
            Command::PermissionChanged(desc, granted) => {
                let device = desc.device_name.clone();
                let state = state.clone();
                tasks.launch(TaskKind::Permission, Some(device.as_str()), async move {
                    let mut worker = state.borrow_mut();
                    if granted {
                        worker.attach(&desc);
                    } else {
                        info!("permission revoked for {desc}");
                        worker.detach(&desc);
                    }
                });
            }
            Command::Update => {
                let state = state.clone();
                tasks.launch(TaskKind::Update, None, async move {
                    state.borrow_mut().update();
                });
            }
            Command::WithDevice(id, f) => match state.try_borrow_mut() {
                Ok(mut worker) => f(worker.registry.find_mut(&id)),
                Err(_) => f(None),
            },
            Command::Shutdown => break,
        }
    }

    tasks.cancel_all();
    state.borrow_mut().registry.clear();
    debug!("lifecycle worker stopped");
}

/// Task slot: a kind of work, for one device or for the whole bus.
type TaskKey = (TaskKind, Option<String>);

#[derive(Default)]
struct TaskSlots {
    slots: HashMap<TaskKey, JoinHandle<()>>,
}

impl TaskSlots {
    fn key(kind: TaskKind, device: Option<&str>) -> TaskKey {
        (kind, device.map(str::to_owned))
    }

    fn launch(
        &mut self,
        kind: TaskKind,
        device: Option<&str>,
        fut: impl Future<Output = ()> + 'static,
    ) {
        self.cancel(kind, device);
        self.slots.retain(|_, task| !task.is_finished());
        self.slots.insert(Self::key(kind, device), tokio::task::spawn_local(fut));
    }

    fn cancel(&mut self, kind: TaskKind, device: Option<&str>) {
        let key = Self::key(kind, device);
        if let Some(task) = self.slots.remove(&key)
            && !task.is_finished()
        {
            debug!("cancelling {kind:?} for {}", key.1.as_deref().unwrap_or("all devices"));
            task.abort();
        }
    }

    fn cancel_all(&mut self) {
        for (_, task) in self.slots.drain() {
            task.abort();
        }
    }
}

/// State confined to the worker thread.
struct Worker<B: UsbBackend> {
    backend: B,
    config: HostConfig,
    registry: DeviceRegistry<B::Channel>,
    events: mpsc::UnboundedSender<DeviceEvent>,
}

impl<B: UsbBackend> Worker<B> {
    fn new(backend: B, config: HostConfig, events: mpsc::UnboundedSender<DeviceEvent>) -> Self {
        Self {
            backend,
            config,
            registry: DeviceRegistry::new(),
            events,
        }
    }

    fn emit(events: &mpsc::UnboundedSender<DeviceEvent>, event: DeviceEvent) {
        debug!("event {event:?}");
        let _ = events.send(event);
    }

    fn attach(&mut self, desc: &UsbDeviceDescriptor) {
        match check_device(desc, &self.config) {
            Ok(()) => {}
            Err(Rejection::Ignored | Rejection::NotMassStorage) => {
                debug!("ignoring {desc}");
                return;
            }
            Err(Rejection::NotCompatible) => {
                warn!("{desc} is not a bulk-only SCSI device");
                Self::emit(&self.events, DeviceEvent::Error(ErrorCategory::NotCompatible));
                return;
            }
        }

        let key = DeviceRegistry::<B::Channel>::key(desc);
        if !self.backend.has_permission(desc) {
            info!("requesting permission for {desc}");
            Self::emit(&self.events, DeviceEvent::PermissionRequested { id: key });
            self.backend.request_permission(desc);
            return;
        }
        if self.registry.get(desc).is_some_and(MediaDevice::has_filesystem) {
            debug!("{key} already mounted");
            return;
        }
        let Some(interface) = desc.storage_interface() else {
            return;
        };

        let channel = match self.backend.open_channel(desc, interface) {
            Ok(channel) => channel,
            Err(e) => {
                error!("cannot open {desc}: {e}");
                Self::emit(&self.events, DeviceEvent::Error(e.category()));
                return;
            }
        };

        let device = self.registry.get_or_insert(desc, &self.config);
        if let Err(e) = device.init_filesystem(channel) {
            error!("mounting {desc} failed: {e}");
            Self::emit(&self.events, DeviceEvent::Error(e.category()));
            self.registry.remove(desc);
            return;
        }

        if self.config.log_to_device {
            match device.enable_logging() {
                Ok(()) => {}
                Err(e @ HostError::DriveAlmostFull { .. }) => warn!("not logging to {}: {e}", device.id()),
                Err(e) => warn!("device logging failed: {e}"),
            }
        }
        info!("{} connected", device.id());
        Self::emit(&self.events, DeviceEvent::Connected { id: device.id().to_owned() });
    }

    /// Best-effort teardown; every step only logs on failure.
    fn detach(&mut self, desc: &UsbDeviceDescriptor) {
        if let Some(mut device) = self.registry.remove(desc) {
            let id = device.id().to_owned();
            device.prevent_logging();
            device.close();
            info!("{id} disconnected");
            Self::emit(&self.events, DeviceEvent::Disconnected { id });
        } else {
            debug!("detach of unknown device {desc}");
        }
        Self::emit(&self.events, DeviceEvent::Refreshed);
    }

    fn update(&mut self) {
        let attached = self.backend.attached_devices();

        let gone = self.registry.retain(|d| attached.iter().any(|a| a.device_name == d.device_name));
        for mut device in gone {
            let id = device.id().to_owned();
            device.close();
            Self::emit(&self.events, DeviceEvent::Disconnected { id });
        }

        for desc in &attached {
            if check_device(desc, &self.config).is_err() {
                continue;
            }
            if self.registry.get(desc).is_none_or(|d| !d.has_filesystem()) {
                self.attach(desc);
            }
        }
        Self::emit(&self.events, DeviceEvent::Refreshed);
    }
}

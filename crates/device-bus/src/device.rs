//! Devices attached to the memory and I/O buses.
//!
//! Buses never hold a device directly. Devices live in a [`Devices`] arena
//! and are named by [`DeviceId`] handles, so detaching one cannot leave a
//! dangling reference in a page table or port chain.

use std::any::Any;

/// Handle to a device in a [`Devices`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(usize);

impl DeviceId {
    /// Arena index of the device.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

/// Function tables a device publishes once.
///
/// The position of a name in `inputs` or `outputs` is the function id used
/// when wiring the device to ports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub name: &'static str,
    pub inputs: &'static [&'static str],
    pub outputs: &'static [&'static str],
}

/// Capability interface every bus-attached device implements.
///
/// The defaults describe a device that drives nothing: reads float high and
/// writes are ignored.
pub trait Device {
    fn descriptor(&self) -> &'static DeviceDescriptor;

    /// Run IN function `func` for `port`.
    fn io_in(&mut self, _func: usize, _port: u16) -> u8 {
        0xFF
    }

    /// Run OUT function `func` for `port`.
    fn io_out(&mut self, _func: usize, _port: u16, _value: u8) {}

    /// Read from a page mapped to this device as a callback.
    fn mem_read(&mut self, _addr: u16) -> u8 {
        0xFF
    }

    /// Write to a page mapped to this device as a callback.
    fn mem_write(&mut self, _addr: u16, _value: u8) {}

    /// Return to power-on state.
    fn reset(&mut self) {}

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Owning arena of devices.
#[derive(Default)]
pub struct Devices {
    slots: Vec<Option<Box<dyn Device>>>,
}

impl Devices {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a device, returning its handle. Handles are never reused.
    pub fn add(&mut self, device: Box<dyn Device>) -> DeviceId {
        let id = DeviceId(self.slots.len());
        tracing::debug!(device = device.descriptor().name, id = id.0, "device added");
        self.slots.push(Some(device));
        id
    }

    /// Take a device out of the arena. Bus entries still naming it behave
    /// as if unmapped until they are disconnected.
    pub fn remove(&mut self, id: DeviceId) -> Option<Box<dyn Device>> {
        self.slots.get_mut(id.0)?.take()
    }

    #[must_use]
    pub fn get(&self, id: DeviceId) -> Option<&dyn Device> {
        self.slots.get(id.0)?.as_deref()
    }

    pub fn get_mut(&mut self, id: DeviceId) -> Option<&mut (dyn Device + 'static)> {
        self.slots.get_mut(id.0)?.as_deref_mut()
    }

    /// Borrow a device as its concrete type.
    #[must_use]
    pub fn downcast<T: Device + 'static>(&self, id: DeviceId) -> Option<&T> {
        self.get(id)?.as_any().downcast_ref()
    }

    /// Mutably borrow a device as its concrete type.
    pub fn downcast_mut<T: Device + 'static>(&mut self, id: DeviceId) -> Option<&mut T> {
        self.get_mut(id)?.as_any_mut().downcast_mut()
    }

    /// Descriptor of a live device.
    #[must_use]
    pub fn descriptor(&self, id: DeviceId) -> Option<&'static DeviceDescriptor> {
        self.get(id).map(Device::descriptor)
    }

    /// Reset every live device.
    pub fn reset_all(&mut self) {
        for device in self.slots.iter_mut().flatten() {
            device.reset();
        }
    }

    /// Number of live devices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Direction of a port connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
}

/// One row of a device's static wiring table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Connector {
    /// Port number (low byte of the CPU port address) or
    /// [`IoBus::INTACK`](crate::IoBus::INTACK).
    pub port: u16,
    pub direction: Direction,
    /// Index into the descriptor's `inputs` or `outputs`.
    pub func: usize,
    /// Accesses must rendezvous with the other CPU first.
    pub sync: bool,
}

impl Connector {
    #[must_use]
    pub const fn input(port: u16, func: usize) -> Self {
        Self { port, direction: Direction::In, func, sync: false }
    }

    #[must_use]
    pub const fn output(port: u16, func: usize) -> Self {
        Self { port, direction: Direction::Out, func, sync: false }
    }

    /// Same connector, flagged as a sync port.
    #[must_use]
    pub const fn synced(mut self) -> Self {
        self.sync = true;
        self
    }
}

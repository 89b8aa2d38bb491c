//! Port multiplexer: per-port chains of device handlers.
//!
//! IN combines every handler on the port with a wired-AND, so a port nobody
//! drives reads 0xFF. OUT is broadcast to every handler in the order the
//! connections were made.

use crate::device::{Connector, DeviceId, Devices, Direction};

/// Chain of `(device, function id)` pairs on one port.
type Chain = Vec<(DeviceId, usize)>;

/// Number of ordinary ports plus the interrupt-acknowledge port.
const PORT_SLOTS: usize = 0x101;

/// I/O port bus for one CPU.
pub struct IoBus {
    inputs: Vec<Chain>,
    outputs: Vec<Chain>,
    sync: Vec<bool>,
}

impl Default for IoBus {
    fn default() -> Self {
        Self::new()
    }
}

impl IoBus {
    /// Pseudo-port read during an interrupt acknowledge cycle.
    pub const INTACK: u16 = 0x100;

    #[must_use]
    pub fn new() -> Self {
        Self {
            inputs: vec![Vec::new(); PORT_SLOTS],
            outputs: vec![Vec::new(); PORT_SLOTS],
            sync: vec![false; PORT_SLOTS],
        }
    }

    /// Chain index for a port: the low byte, or the INTACK slot.
    fn slot(port: u16) -> usize {
        if port == Self::INTACK {
            PORT_SLOTS - 1
        } else {
            usize::from(port & 0xFF)
        }
    }

    /// Wire a device through its connector table.
    ///
    /// Every function id is checked against the device's descriptor first;
    /// if any is out of range nothing is wired and `false` is returned.
    pub fn connect(
        &mut self,
        devices: &Devices,
        device: DeviceId,
        connectors: &[Connector],
    ) -> bool {
        let Some(descriptor) = devices.descriptor(device) else {
            tracing::warn!(device = device.index(), "connect: no such device");
            return false;
        };
        let invalid = connectors.iter().find(|c| {
            let count = match c.direction {
                Direction::In => descriptor.inputs.len(),
                Direction::Out => descriptor.outputs.len(),
            };
            c.func >= count || (c.port > 0xFF && c.port != Self::INTACK)
        });
        if let Some(bad) = invalid {
            tracing::warn!(device = descriptor.name, ?bad, "connect: connector out of range");
            return false;
        }

        for c in connectors {
            match c.direction {
                Direction::In => self.connect_in(c.port, device, c.func),
                Direction::Out => self.connect_out(c.port, device, c.func),
            }
            if c.sync {
                self.set_sync(c.port, true);
            }
        }
        tracing::debug!(device = descriptor.name, count = connectors.len(), "io connected");
        true
    }

    /// Append an IN handler to `port`'s chain.
    pub fn connect_in(&mut self, port: u16, device: DeviceId, func: usize) {
        self.inputs[Self::slot(port)].push((device, func));
    }

    /// Append an OUT handler to `port`'s chain.
    pub fn connect_out(&mut self, port: u16, device: DeviceId, func: usize) {
        self.outputs[Self::slot(port)].push((device, func));
    }

    /// Remove every entry of `device` from every port. Ports left with no
    /// entries also lose their sync flag.
    pub fn disconnect(&mut self, device: DeviceId) {
        for slot in 0..PORT_SLOTS {
            self.inputs[slot].retain(|&(d, _)| d != device);
            self.outputs[slot].retain(|&(d, _)| d != device);
            if self.inputs[slot].is_empty() && self.outputs[slot].is_empty() {
                self.sync[slot] = false;
            }
        }
        tracing::debug!(device = device.index(), "io disconnected");
    }

    /// IN: AND of every handler's result, 0xFF when the chain is empty.
    pub fn input(&self, devices: &mut Devices, port: u16) -> u8 {
        let chain = &self.inputs[Self::slot(port)];
        if chain.is_empty() {
            tracing::trace!(port, "in from unconnected port");
            return 0xFF;
        }
        chain.iter().fold(0xFF, |acc, &(device, func)| {
            acc & devices.get_mut(device).map_or(0xFF, |d| d.io_in(func, port))
        })
    }

    /// OUT: broadcast to every handler in registration order.
    pub fn output(&self, devices: &mut Devices, port: u16, value: u8) {
        let chain = &self.outputs[Self::slot(port)];
        if chain.is_empty() {
            tracing::trace!(port, value, "out to unconnected port");
        }
        for &(device, func) in chain {
            if let Some(d) = devices.get_mut(device) {
                d.io_out(func, port, value);
            }
        }
    }

    /// Byte a device supplies on the data bus during interrupt acknowledge.
    pub fn interrupt_ack(&self, devices: &mut Devices) -> u8 {
        self.input(devices, Self::INTACK)
    }

    pub fn set_sync(&mut self, port: u16, sync: bool) {
        self.sync[Self::slot(port)] = sync;
    }

    #[must_use]
    pub fn is_sync(&self, port: u16) -> bool {
        self.sync[Self::slot(port)]
    }

    /// Number of handlers on a port, per direction.
    #[must_use]
    pub fn chain_len(&self, port: u16, direction: Direction) -> usize {
        match direction {
            Direction::In => self.inputs[Self::slot(port)].len(),
            Direction::Out => self.outputs[Self::slot(port)].len(),
        }
    }
}

//! Glue between one CPU and its memory and I/O buses.

use emu_core::{Bus, FetchWindow};

use crate::device::Devices;
use crate::io::IoBus;
use crate::memory::MemoryBus;

/// Cross-CPU rendezvous offered to a stepping CPU.
///
/// A scheduler hands one of these to the bus of whichever CPU it is running;
/// the bus forwards sync and stop requests to it.
pub trait Rendezvous {
    /// True when the calling CPU, `elapsed` T-states into its instruction,
    /// may touch a shared port now.
    fn sync(&mut self, elapsed: u32) -> bool;

    /// End the calling CPU's run `clocks` T-states from now.
    fn stop(&mut self, clocks: u32);
}

/// Rendezvous for a CPU running alone: every sync succeeds.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoRendezvous;

impl Rendezvous for NoRendezvous {
    fn sync(&mut self, _elapsed: u32) -> bool {
        true
    }

    fn stop(&mut self, _clocks: u32) {}
}

/// Borrowed view of one CPU's buses, implementing [`emu_core::Bus`].
pub struct SystemBus<'a, R: Rendezvous> {
    pub memory: &'a mut MemoryBus,
    pub io: &'a mut IoBus,
    pub devices: &'a mut Devices,
    pub link: R,
}

impl<'a, R: Rendezvous> SystemBus<'a, R> {
    pub fn new(
        memory: &'a mut MemoryBus,
        io: &'a mut IoBus,
        devices: &'a mut Devices,
        link: R,
    ) -> Self {
        Self {
            memory,
            io,
            devices,
            link,
        }
    }
}

impl<R: Rendezvous> Bus for SystemBus<'_, R> {
    fn read(&mut self, address: u16) -> u8 {
        self.memory.read(self.devices, address)
    }

    fn write(&mut self, address: u16, value: u8) {
        self.memory.write(self.devices, address, value);
    }

    fn io_read(&mut self, port: u16) -> u8 {
        self.io.input(self.devices, port & 0xFF)
    }

    fn io_write(&mut self, port: u16, value: u8) {
        self.io.output(self.devices, port & 0xFF, value);
    }

    fn interrupt_ack(&mut self) -> u8 {
        self.io.interrupt_ack(self.devices)
    }

    fn fetch_window(&mut self, address: u16) -> Option<FetchWindow> {
        self.memory.fetch_window(address)
    }

    fn read_window(&mut self, window: &FetchWindow, address: u16) -> Option<u8> {
        self.memory.read_window(window, address)
    }

    fn is_sync_port(&self, port: u16) -> bool {
        self.io.is_sync(port & 0xFF)
    }

    fn sync(&mut self, elapsed: u32) -> bool {
        self.link.sync(elapsed)
    }

    fn stop(&mut self, clocks: u32) {
        self.link.stop(clocks);
    }
}

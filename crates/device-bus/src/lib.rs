//! Device-facing buses for a Z80 machine.
//!
//! Devices live in a [`Devices`] arena. Each CPU sees memory through a
//! [`MemoryBus`] (1 KiB pages with priority overlays) and ports through an
//! [`IoBus`] (per-port handler chains). [`SystemBus`] borrows one CPU's pair
//! plus the arena and implements [`emu_core::Bus`] over them.

mod device;
mod io;
mod memory;
mod system;

pub use device::{Connector, Device, DeviceDescriptor, DeviceId, Devices, Direction};
pub use io::IoBus;
pub use memory::{
    Access, BufferId, MemoryBus, Owner, PAGE_BITS, PAGE_COUNT, PAGE_SIZE, PageEntry, SLOT_COUNT,
    Target,
};
pub use system::{NoRendezvous, Rendezvous, SystemBus};

//! Parallel link between the main and sub CPUs.
//!
//! Each side has a simplified 8255 on ports 0xFC..=0xFF. Port B is the
//! side's output latch and shows up on the other side's port A. The upper
//! nibble of port C carries handshake lines that appear in the partner's
//! lower nibble.
//!
//! | Port | IN                                  | OUT                    |
//! |------|-------------------------------------|------------------------|
//! | 0xFC | partner's port B                    | -                      |
//! | 0xFD | own port B                          | own port B             |
//! | 0xFE | own C (high) / partner's C (low)    | own C high nibble      |
//! | 0xFF | -                                   | C bit set/reset, mode  |
//!
//! Every port is a sync port: a CPU never sees its partner's latches from
//! the future.

use std::any::Any;

use device_bus::{Connector, Device, DeviceDescriptor};
use serde::{Deserialize, Serialize};

use crate::scheduler::CpuSel;

static PORT_LINK: DeviceDescriptor = DeviceDescriptor {
    name: "port-link",
    inputs: &["main.a", "main.b", "main.c", "sub.a", "sub.b", "sub.c"],
    outputs: &["main.b", "main.c", "main.ctrl", "sub.b", "sub.c", "sub.ctrl"],
};

/// Functions per side in each descriptor table.
const FUNCS: usize = 3;

const fn connectors(base: usize) -> [Connector; 6] {
    [
        Connector::input(0xFC, base).synced(),
        Connector::input(0xFD, base + 1).synced(),
        Connector::input(0xFE, base + 2).synced(),
        Connector::output(0xFD, base).synced(),
        Connector::output(0xFE, base + 1).synced(),
        Connector::output(0xFF, base + 2).synced(),
    ]
}

const MAIN_CONNECTORS: [Connector; 6] = connectors(0);
const SUB_CONNECTORS: [Connector; 6] = connectors(FUNCS);

/// Latches of one side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Side {
    /// Port B output.
    pub data: u8,
    /// Port C output; only the high nibble is driven.
    pub ctrl: u8,
}

/// The two-sided link device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortLink {
    sides: [Side; 2],
}

impl PortLink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Connector table for one CPU's I/O bus.
    #[must_use]
    pub const fn connectors(cpu: CpuSel) -> &'static [Connector] {
        match cpu {
            CpuSel::Main => &MAIN_CONNECTORS,
            CpuSel::Sub => &SUB_CONNECTORS,
        }
    }

    #[must_use]
    pub fn side(&self, cpu: CpuSel) -> Side {
        self.sides[cpu.index()]
    }

    fn split(func: usize) -> (usize, usize) {
        (func / FUNCS, func % FUNCS)
    }
}

impl Device for PortLink {
    fn descriptor(&self) -> &'static DeviceDescriptor {
        &PORT_LINK
    }

    fn io_in(&mut self, func: usize, _port: u16) -> u8 {
        let (me, reg) = Self::split(func);
        let own = self.sides[me];
        let other = self.sides[1 - me];
        match reg {
            0 => other.data,
            1 => own.data,
            _ => (own.ctrl & 0xF0) | (other.ctrl >> 4),
        }
    }

    fn io_out(&mut self, func: usize, _port: u16, value: u8) {
        let (me, reg) = Self::split(func);
        let side = &mut self.sides[me];
        match reg {
            0 => side.data = value,
            1 => side.ctrl = value & 0xF0,
            _ if value & 0x80 != 0 => {
                // Mode set clears the outputs.
                *side = Side::default();
            }
            _ => {
                let bit = 1u8 << ((value >> 1) & 7);
                if value & 1 != 0 {
                    side.ctrl |= bit;
                } else {
                    side.ctrl &= !bit;
                }
                side.ctrl &= 0xF0;
            }
        }
    }

    fn reset(&mut self) {
        self.sides = [Side::default(); 2];
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAIN: usize = 0;
    const SUB: usize = FUNCS;

    #[test]
    fn data_crosses_to_partner() {
        let mut link = PortLink::new();
        link.io_out(SUB, 0xFD, 0x5A);
        assert_eq!(link.io_in(MAIN, 0xFC), 0x5A);
        assert_eq!(link.io_in(SUB + 1, 0xFD), 0x5A);
        assert_eq!(link.io_in(MAIN + 1, 0xFD), 0x00);
    }

    #[test]
    fn handshake_nibble_swaps() {
        let mut link = PortLink::new();
        link.io_out(MAIN + 1, 0xFE, 0x9F);
        link.io_out(SUB + 2, 0xFF, 0x0B); // set bit 5
        assert_eq!(link.io_in(MAIN + 2, 0xFE), 0x92);
        assert_eq!(link.io_in(SUB + 2, 0xFE), 0x29);

        link.io_out(MAIN + 2, 0xFF, 0x0E); // clear bit 7
        assert_eq!(link.side(CpuSel::Main).ctrl, 0x10);
    }

    #[test]
    fn mode_set_clears_side() {
        let mut link = PortLink::new();
        link.io_out(MAIN, 0xFD, 0x12);
        link.io_out(MAIN + 1, 0xFE, 0x30);
        link.io_out(MAIN + 2, 0xFF, 0x91);
        assert_eq!(link.side(CpuSel::Main), Side::default());
    }

    #[test]
    fn connector_tables_are_all_sync() {
        for cpu in [CpuSel::Main, CpuSel::Sub] {
            let table = PortLink::connectors(cpu);
            assert!(table.iter().all(|c| c.sync));
            assert!(table.iter().all(|c| (0xFC..=0xFF).contains(&c.port)));
        }
    }
}

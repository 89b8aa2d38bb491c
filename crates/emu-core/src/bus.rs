//! Memory and I/O bus interface.

/// A window of directly addressable bytes the CPU may fetch opcodes from
/// without a full page-table lookup.
///
/// The fields beyond `base`/`len` are opaque to the CPU; they let the bus
/// locate the backing storage and detect that the window went stale after
/// a remap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchWindow {
    /// First address covered by the window.
    pub base: u16,
    /// Number of addresses covered.
    pub len: u16,
    /// Bus-defined storage identifier.
    pub buffer: u32,
    /// Offset of `base` within that storage.
    pub offset: u32,
    /// Bus mapping generation the window was issued in.
    pub generation: u32,
}

impl FetchWindow {
    /// True if `address` lies inside the window.
    #[must_use]
    pub const fn contains(&self, address: u16) -> bool {
        address.wrapping_sub(self.base) < self.len
    }
}

/// Memory and I/O bus interface.
///
/// CPUs access memory, I/O ports and the interrupt acknowledge cycle
/// through this trait. The bus handles address decoding and routing to the
/// appropriate device. The optional hooks at the bottom let a bus offer an
/// opcode fast path and take part in cross-CPU scheduling; the defaults
/// describe a plain, single-CPU bus.
pub trait Bus {
    /// Read a byte from the given address.
    fn read(&mut self, address: u16) -> u8;

    /// Write a byte to the given address.
    fn write(&mut self, address: u16, value: u8);

    /// Read a byte from an I/O port.
    fn io_read(&mut self, port: u16) -> u8;

    /// Write a byte to an I/O port.
    fn io_write(&mut self, port: u16, value: u8);

    /// Byte placed on the data bus during an interrupt acknowledge cycle.
    fn interrupt_ack(&mut self) -> u8 {
        0xFF
    }

    /// Direct fetch window covering `address`, if that memory is plain bytes.
    fn fetch_window(&mut self, _address: u16) -> Option<FetchWindow> {
        None
    }

    /// Read through a window previously returned by `fetch_window`.
    ///
    /// Returns `None` when the window is stale; the CPU then falls back to
    /// `read` and requests a fresh window.
    fn read_window(&mut self, _window: &FetchWindow, _address: u16) -> Option<u8> {
        None
    }

    /// True if accesses to `port` must rendezvous with the other CPU first.
    fn is_sync_port(&self, _port: u16) -> bool {
        false
    }

    /// Rendezvous before a sync port access.
    ///
    /// `elapsed` is the number of T-states the current instruction has
    /// consumed so far. Returning `false` asks the CPU to abandon the
    /// instruction and retry it later.
    fn sync(&mut self, _elapsed: u32) -> bool {
        true
    }

    /// Ask the scheduler to end the current run `clocks` T-states from now.
    fn stop(&mut self, _clocks: u32) {}
}

/// Flat 64K RAM bus with a latch per I/O port. Handy for tests and tools.
pub struct SimpleBus {
    memory: Vec<u8>,
    ports: [u8; 256],
    /// Every I/O write, in order.
    pub io_writes: Vec<(u16, u8)>,
    /// Byte returned by `interrupt_ack`.
    pub int_ack: u8,
}

impl SimpleBus {
    #[must_use]
    pub fn new() -> Self {
        Self {
            memory: vec![0; 0x10000],
            ports: [0xFF; 256],
            io_writes: Vec::new(),
            int_ack: 0xFF,
        }
    }

    /// Copy `data` into memory starting at `address`, wrapping at 64K.
    pub fn load(&mut self, address: u16, data: &[u8]) {
        for (i, &byte) in data.iter().enumerate() {
            let addr = address.wrapping_add(i as u16);
            self.memory[usize::from(addr)] = byte;
        }
    }

    #[must_use]
    pub fn peek(&self, address: u16) -> u8 {
        self.memory[usize::from(address)]
    }

    /// Set the value subsequent `io_read`s of the port's low byte return.
    pub fn set_port(&mut self, port: u8, value: u8) {
        self.ports[usize::from(port)] = value;
    }
}

impl Default for SimpleBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Bus for SimpleBus {
    fn read(&mut self, address: u16) -> u8 {
        self.memory[usize::from(address)]
    }

    fn write(&mut self, address: u16, value: u8) {
        self.memory[usize::from(address)] = value;
    }

    fn io_read(&mut self, port: u16) -> u8 {
        self.ports[usize::from(port & 0xFF)]
    }

    fn io_write(&mut self, port: u16, value: u8) {
        self.io_writes.push((port, value));
    }

    fn interrupt_ack(&mut self) -> u8 {
        self.int_ack
    }

    fn fetch_window(&mut self, address: u16) -> Option<FetchWindow> {
        // One window per 256-byte page keeps the boundary crossing path
        // exercised.
        let base = address & 0xFF00;
        Some(FetchWindow {
            base,
            len: 0x100,
            buffer: 0,
            offset: u32::from(base),
            generation: 0,
        })
    }

    fn read_window(&mut self, window: &FetchWindow, address: u16) -> Option<u8> {
        let index = window.offset as usize + usize::from(address.wrapping_sub(window.base));
        self.memory.get(index).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_contains_handles_wrap() {
        let window = FetchWindow {
            base: 0xFF00,
            len: 0x100,
            buffer: 0,
            offset: 0,
            generation: 0,
        };
        assert!(window.contains(0xFFFF));
        assert!(!window.contains(0x0000));
        assert!(!window.contains(0xFEFF));
    }

    #[test]
    fn simple_bus_window_reads_memory() {
        let mut bus = SimpleBus::new();
        bus.load(0x1234, &[0xAB]);
        let window = bus.fetch_window(0x1234).expect("simple bus always has a window");
        assert_eq!(bus.read_window(&window, 0x1234), Some(0xAB));
    }

    #[test]
    fn unset_ports_float_high() {
        let mut bus = SimpleBus::new();
        assert_eq!(bus.io_read(0x1234), 0xFF);
        bus.set_port(0x34, 0x5A);
        assert_eq!(bus.io_read(0x1234), 0x5A);
    }
}

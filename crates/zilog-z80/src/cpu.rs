//! Z80 CPU core with per-instruction execution.

#![allow(clippy::cast_possible_truncation)] // Intentional truncation for low byte extraction.
#![allow(clippy::cast_possible_wrap)] // Intentional i8 casts for displacements.
#![allow(clippy::struct_excessive_bools)] // CPU state requires multiple boolean flags.

use emu_core::{Bus, Cpu, FetchWindow, Observable, Ticks, Value};

use crate::flags::{CF, HF, LazyFlags, NF, PF, SF, XF, YF, ZF};
use crate::registers::Registers;

/// Which register an HL-form instruction operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum IndexMode {
    Hl,
    Ix,
    Iy,
}

/// Z80 CPU.
///
/// The CPU does not own the bus. The bus is passed to `step()` so the same
/// devices can be shared with another CPU by a scheduler.
#[derive(Clone)]
pub struct Z80 {
    /// Register file. `regs.f` is stale; flags live in `flags`.
    pub(crate) regs: Registers,
    /// Lazily evaluated F register.
    pub(crate) flags: LazyFlags,

    // === Instruction state ===
    /// Register selected by a DD/FD prefix for the current instruction.
    pub(crate) index: IndexMode,
    /// T-states consumed by the current instruction so far.
    cycles: u32,
    /// PC at the start of the current instruction, for sync rollback.
    instr_pc: u16,
    /// R at the start of the current instruction, for sync rollback.
    instr_r: u8,
    /// EI latency state at the start of the current instruction.
    instr_after_ei: bool,
    /// Set when a sync port refused the access; the instruction is undone.
    aborted: bool,
    /// Cached direct-byte window for opcode fetches.
    pub(crate) window: Option<FetchWindow>,

    // === Interrupt state ===
    /// Maskable interrupt line level.
    pub(crate) int_line: bool,
    /// Latched NMI request.
    pub(crate) nmi_pending: bool,
    /// The previous instruction was EI; hold off maskable interrupts.
    pub(crate) after_ei: bool,

    // === Timing ===
    /// Total T-states elapsed.
    pub(crate) total_ticks: Ticks,
}

impl Z80 {
    /// Create a new Z80 in its reset state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            regs: Registers::power_on(),
            flags: LazyFlags::new(Registers::power_on().f),
            index: IndexMode::Hl,
            cycles: 0,
            instr_pc: 0,
            instr_r: 0,
            instr_after_ei: false,
            aborted: false,
            window: None,
            int_line: false,
            nmi_pending: false,
            after_ei: false,
            total_ticks: Ticks::ZERO,
        }
    }

    /// True if an interrupt or NMI would be taken at the next step.
    #[must_use]
    pub fn interrupt_pending(&self) -> bool {
        self.nmi_pending || (self.int_line && self.regs.iff1)
    }

    /// Level of the maskable interrupt line.
    #[must_use]
    pub const fn int_line(&self) -> bool {
        self.int_line
    }

    /// Credit a halted CPU with `ticks` T-states it was not stepped for:
    /// the tick counter and R move as if it had run its HALT loop.
    pub fn advance_idle(&mut self, ticks: Ticks) {
        debug_assert!(self.regs.halted, "only a halted CPU can be skipped");
        for _ in 0..(ticks.get() / 4) % 128 {
            self.inc_r();
        }
        self.total_ticks += ticks;
    }

    /// Set the program counter (loaders, tests).
    pub fn set_pc(&mut self, value: u16) {
        self.regs.pc = value;
        self.regs.halted = false;
    }

    /// Set the stack pointer (loaders, tests).
    pub fn set_sp(&mut self, value: u16) {
        self.regs.sp = value;
    }

    /// Get the A register.
    #[must_use]
    pub fn a(&self) -> u8 {
        self.regs.a
    }

    /// Get the F register (flags), resolving nothing.
    #[must_use]
    pub fn f(&self) -> u8 {
        self.flags.peek()
    }

    /// Get the BC register pair.
    #[must_use]
    pub fn bc(&self) -> u16 {
        self.regs.bc()
    }

    /// Get the DE register pair.
    #[must_use]
    pub fn de(&self) -> u16 {
        self.regs.de()
    }

    /// Get the HL register pair.
    #[must_use]
    pub fn hl(&self) -> u16 {
        self.regs.hl()
    }

    /// Get the stack pointer.
    #[must_use]
    pub fn sp(&self) -> u16 {
        self.regs.sp
    }

    /// Get the IX register.
    #[must_use]
    pub fn ix(&self) -> u16 {
        self.regs.ix
    }

    /// Get the IY register.
    #[must_use]
    pub fn iy(&self) -> u16 {
        self.regs.iy
    }

    /// Interrupt enable flip-flops (IFF1, IFF2).
    #[must_use]
    pub const fn iff(&self) -> (bool, bool) {
        (self.regs.iff1, self.regs.iff2)
    }

    /// Current interrupt mode.
    #[must_use]
    pub const fn im(&self) -> u8 {
        self.regs.im
    }

    // =========================================================================
    // Bus access
    // =========================================================================

    /// Add T-states to the current instruction.
    pub(crate) fn clk(&mut self, t_states: u32) {
        self.cycles += t_states;
    }

    /// Read the byte at `pc`, through the cached window when possible.
    fn fetch_at<B: Bus>(&mut self, bus: &mut B, pc: u16) -> u8 {
        if let Some(window) = self.window
            && window.contains(pc)
        {
            if let Some(value) = bus.read_window(&window, pc) {
                return value;
            }
        }
        self.window = bus.fetch_window(pc);
        bus.read(pc)
    }

    /// Fetch an operand byte at PC and advance PC.
    pub(crate) fn fetch8<B: Bus>(&mut self, bus: &mut B) -> u8 {
        let pc = self.regs.pc;
        let value = self.fetch_at(bus, pc);
        self.regs.pc = pc.wrapping_add(1);
        value
    }

    /// Fetch an opcode byte (M1 cycle): also refreshes R.
    pub(crate) fn fetch_opcode<B: Bus>(&mut self, bus: &mut B) -> u8 {
        self.inc_r();
        self.fetch8(bus)
    }

    /// Look at the byte at PC without consuming it.
    pub(crate) fn peek_opcode<B: Bus>(&mut self, bus: &mut B) -> u8 {
        let pc = self.regs.pc;
        self.fetch_at(bus, pc)
    }

    /// Fetch a little-endian word at PC.
    pub(crate) fn fetch16<B: Bus>(&mut self, bus: &mut B) -> u16 {
        let lo = self.fetch8(bus);
        let hi = self.fetch8(bus);
        u16::from_le_bytes([lo, hi])
    }

    pub(crate) fn read8<B: Bus>(&mut self, bus: &mut B, addr: u16) -> u8 {
        bus.read(addr)
    }

    pub(crate) fn write8<B: Bus>(&mut self, bus: &mut B, addr: u16, value: u8) {
        bus.write(addr, value);
    }

    pub(crate) fn read16<B: Bus>(&mut self, bus: &mut B, addr: u16) -> u16 {
        let lo = bus.read(addr);
        let hi = bus.read(addr.wrapping_add(1));
        u16::from_le_bytes([lo, hi])
    }

    pub(crate) fn write16<B: Bus>(&mut self, bus: &mut B, addr: u16, value: u16) {
        let [lo, hi] = value.to_le_bytes();
        bus.write(addr, lo);
        bus.write(addr.wrapping_add(1), hi);
    }

    pub(crate) fn push16<B: Bus>(&mut self, bus: &mut B, value: u16) {
        let [lo, hi] = value.to_le_bytes();
        self.regs.sp = self.regs.sp.wrapping_sub(1);
        bus.write(self.regs.sp, hi);
        self.regs.sp = self.regs.sp.wrapping_sub(1);
        bus.write(self.regs.sp, lo);
    }

    pub(crate) fn pop16<B: Bus>(&mut self, bus: &mut B) -> u16 {
        let value = self.read16(bus, self.regs.sp);
        self.regs.sp = self.regs.sp.wrapping_add(2);
        value
    }

    /// Rendezvous before touching a sync port.
    ///
    /// `at` is the T-state offset of the I/O cycle within the instruction.
    /// Returns false after undoing the instruction; the caller must return
    /// without touching any more state.
    pub(crate) fn port_ready<B: Bus>(&mut self, bus: &mut B, port: u16, at: u32) -> bool {
        if !bus.is_sync_port(port) || bus.sync(self.cycles + at) {
            return true;
        }
        self.regs.pc = self.instr_pc;
        self.regs.r = self.instr_r;
        self.after_ei = self.instr_after_ei;
        self.index = IndexMode::Hl;
        self.cycles = 0;
        self.aborted = true;
        false
    }

    /// Increment R register (lower 7 bits only).
    pub(crate) fn inc_r(&mut self) {
        self.regs.r = (self.regs.r & 0x80) | (self.regs.r.wrapping_add(1) & 0x7F);
    }

    // =========================================================================
    // Register selection
    // =========================================================================

    /// HL, IX or IY according to the active prefix.
    pub(crate) fn index_reg(&self) -> u16 {
        match self.index {
            IndexMode::Hl => self.regs.hl(),
            IndexMode::Ix => self.regs.ix,
            IndexMode::Iy => self.regs.iy,
        }
    }

    pub(crate) fn set_index_reg(&mut self, value: u16) {
        match self.index {
            IndexMode::Hl => self.regs.set_hl(value),
            IndexMode::Ix => self.regs.ix = value,
            IndexMode::Iy => self.regs.iy = value,
        }
    }

    /// Register by 3-bit encoding; H/L become IXH/IXL or IYH/IYL under a
    /// prefix. Code 6 is the memory operand and is handled by the caller.
    pub(crate) fn get_reg8(&self, r: u8) -> u8 {
        match r & 7 {
            4 => (self.index_reg() >> 8) as u8,
            5 => self.index_reg() as u8,
            r => self.get_reg8_plain(r),
        }
    }

    pub(crate) fn set_reg8(&mut self, r: u8, value: u8) {
        match r & 7 {
            4 => {
                let idx = self.index_reg();
                self.set_index_reg((idx & 0x00FF) | (u16::from(value) << 8));
            }
            5 => {
                let idx = self.index_reg();
                self.set_index_reg((idx & 0xFF00) | u16::from(value));
            }
            r => self.set_reg8_plain(r, value),
        }
    }

    /// Register by 3-bit encoding, ignoring any prefix.
    pub(crate) fn get_reg8_plain(&self, r: u8) -> u8 {
        match r & 7 {
            0 => self.regs.b,
            1 => self.regs.c,
            2 => self.regs.d,
            3 => self.regs.e,
            4 => self.regs.h,
            5 => self.regs.l,
            6 => 0,
            _ => self.regs.a,
        }
    }

    pub(crate) fn set_reg8_plain(&mut self, r: u8, value: u8) {
        match r & 7 {
            0 => self.regs.b = value,
            1 => self.regs.c = value,
            2 => self.regs.d = value,
            3 => self.regs.e = value,
            4 => self.regs.h = value,
            5 => self.regs.l = value,
            6 => {}
            _ => self.regs.a = value,
        }
    }

    /// Register pair by 2-bit encoding (BC, DE, HL/IX/IY, SP).
    pub(crate) fn get_reg16(&self, rp: u8) -> u16 {
        match rp & 3 {
            0 => self.regs.bc(),
            1 => self.regs.de(),
            2 => self.index_reg(),
            _ => self.regs.sp,
        }
    }

    pub(crate) fn set_reg16(&mut self, rp: u8, value: u16) {
        match rp & 3 {
            0 => self.regs.set_bc(value),
            1 => self.regs.set_de(value),
            2 => self.set_index_reg(value),
            _ => self.regs.sp = value,
        }
    }

    /// Register pair for PUSH/POP (AF instead of SP).
    pub(crate) fn get_reg16_af(&mut self, rp: u8) -> u16 {
        match rp & 3 {
            3 => u16::from_be_bytes([self.regs.a, self.flags.value()]),
            rp => self.get_reg16(rp),
        }
    }

    pub(crate) fn set_reg16_af(&mut self, rp: u8, value: u16) {
        match rp & 3 {
            3 => {
                let [a, f] = value.to_be_bytes();
                self.regs.a = a;
                self.flags.set(f);
            }
            rp => self.set_reg16(rp, value),
        }
    }

    /// Evaluate condition code, resolving only the flag it tests.
    pub(crate) fn condition(&mut self, cc: u8) -> bool {
        match cc & 7 {
            0 => !self.flags.test(ZF), // NZ
            1 => self.flags.test(ZF),  // Z
            2 => !self.flags.test(CF), // NC
            3 => self.flags.test(CF),  // C
            4 => !self.flags.test(PF), // PO
            5 => self.flags.test(PF),  // PE
            6 => !self.flags.test(SF), // P
            _ => self.flags.test(SF),  // M
        }
    }

    /// Address of the `(HL)` operand: HL itself, or IX/IY plus a fetched
    /// displacement. `internal` is the extra T-states the indexed form
    /// spends computing the address.
    pub(crate) fn memory_operand<B: Bus>(&mut self, bus: &mut B, internal: u32) -> u16 {
        if self.index == IndexMode::Hl {
            return self.regs.hl();
        }
        let d = self.fetch8(bus) as i8;
        let addr = self.index_reg().wrapping_add_signed(i16::from(d));
        self.regs.wz = addr;
        self.clk(3 + internal);
        addr
    }
}

impl Default for Z80 {
    fn default() -> Self {
        Self::new()
    }
}

// Instruction execution split into separate files for readability
mod cb;
mod ed;
mod execute;

impl Z80 {
    /// Accept an NMI (11 T-states).
    fn accept_nmi<B: Bus>(&mut self, bus: &mut B) {
        self.regs.halted = false;
        self.regs.iff2 = self.regs.iff1;
        self.regs.iff1 = false;
        self.inc_r();
        self.push16(bus, self.regs.pc);
        self.regs.pc = 0x0066;
        self.regs.wz = 0x0066;
        self.clk(11);
    }

    /// Accept a maskable interrupt.
    fn accept_int<B: Bus>(&mut self, bus: &mut B) {
        self.regs.halted = false;
        self.regs.iff1 = false;
        self.regs.iff2 = false;
        self.inc_r();

        match self.regs.im {
            0 => {
                // The device supplies an opcode; RST p is the usual one
                // (2 + 11 = 13 T-states).
                let opcode = bus.interrupt_ack();
                self.clk(2);
                self.execute_main(bus, opcode);
            }
            1 => {
                self.push16(bus, self.regs.pc);
                self.regs.pc = 0x0038;
                self.regs.wz = 0x0038;
                self.clk(13);
            }
            _ => {
                let vector = u16::from_be_bytes([self.regs.i, bus.interrupt_ack()]);
                self.push16(bus, self.regs.pc);
                self.regs.pc = self.read16(bus, vector);
                self.regs.wz = self.regs.pc;
                self.clk(19);
            }
        }
    }

    /// Capture everything as a fully resolved register snapshot.
    pub(crate) fn registers_resolved(&self) -> Registers {
        let mut regs = self.regs;
        regs.f = self.flags.peek();
        regs
    }
}

impl Cpu for Z80 {
    type Registers = Registers;

    fn step<B: Bus>(&mut self, bus: &mut B) -> u32 {
        self.cycles = 0;
        self.aborted = false;
        self.index = IndexMode::Hl;
        self.instr_pc = self.regs.pc;
        self.instr_r = self.regs.r;
        self.instr_after_ei = self.after_ei;
        let ei_blocked = std::mem::take(&mut self.after_ei);

        if self.nmi_pending {
            self.nmi_pending = false;
            self.accept_nmi(bus);
        } else if self.int_line && self.regs.iff1 && !ei_blocked {
            self.accept_int(bus);
        } else if self.regs.halted {
            // HALT keeps executing internal NOPs until an interrupt.
            self.inc_r();
            self.clk(4);
        } else {
            let opcode = self.fetch_opcode(bus);
            self.execute_main(bus, opcode);
        }

        if self.aborted {
            return 0;
        }
        self.total_ticks += Ticks::from(self.cycles);
        self.cycles
    }

    fn pc(&self) -> u16 {
        self.regs.pc
    }

    fn registers(&self) -> Self::Registers {
        self.registers_resolved()
    }

    fn is_halted(&self) -> bool {
        self.regs.halted
    }

    fn set_int_line(&mut self, asserted: bool) {
        self.int_line = asserted;
    }

    fn nmi(&mut self) {
        self.nmi_pending = true;
    }

    fn reset(&mut self) {
        self.regs = Registers::power_on();
        self.flags = LazyFlags::new(self.regs.f);
        self.index = IndexMode::Hl;
        self.cycles = 0;
        self.aborted = false;
        self.window = None;
        self.int_line = false;
        self.nmi_pending = false;
        self.after_ei = false;
    }

    fn total_ticks(&self) -> Ticks {
        self.total_ticks
    }
}

/// All query paths supported by the Z80.
const Z80_QUERY_PATHS: &[&str] = &[
    // Main registers
    "a", "f", "b", "c", "d", "e", "h", "l",
    // Register pairs
    "af", "bc", "de", "hl",
    // Alternate pairs
    "af'", "bc'", "de'", "hl'",
    // Index registers
    "ix", "iy", "ixh", "ixl", "iyh", "iyl",
    // Other registers
    "sp", "pc", "i", "r", "wz",
    // Flags (individual)
    "flags.s", "flags.z", "flags.y", "flags.h",
    "flags.x", "flags.p", "flags.n", "flags.c",
    // Interrupt state
    "iff1", "iff2", "im", "int_line",
    // CPU state
    "halted", "ticks",
];

impl Observable for Z80 {
    fn query(&self, path: &str) -> Option<Value> {
        let f = self.flags.peek();
        let regs = &self.regs;
        let value = match path {
            "a" => regs.a.into(),
            "f" => f.into(),
            "b" => regs.b.into(),
            "c" => regs.c.into(),
            "d" => regs.d.into(),
            "e" => regs.e.into(),
            "h" => regs.h.into(),
            "l" => regs.l.into(),

            "af" => u16::from_be_bytes([regs.a, f]).into(),
            "bc" => regs.bc().into(),
            "de" => regs.de().into(),
            "hl" => regs.hl().into(),

            "af'" => regs.af_alt().into(),
            "bc'" => regs.bc_alt().into(),
            "de'" => regs.de_alt().into(),
            "hl'" => regs.hl_alt().into(),

            "ix" => regs.ix.into(),
            "iy" => regs.iy.into(),
            "ixh" => ((regs.ix >> 8) as u8).into(),
            "ixl" => (regs.ix as u8).into(),
            "iyh" => ((regs.iy >> 8) as u8).into(),
            "iyl" => (regs.iy as u8).into(),

            "sp" => regs.sp.into(),
            "pc" => regs.pc.into(),
            "i" => regs.i.into(),
            "r" => regs.r.into(),
            "wz" => regs.wz.into(),

            "flags.s" => (f & SF != 0).into(),
            "flags.z" => (f & ZF != 0).into(),
            "flags.y" => (f & YF != 0).into(),
            "flags.h" => (f & HF != 0).into(),
            "flags.x" => (f & XF != 0).into(),
            "flags.p" => (f & PF != 0).into(),
            "flags.n" => (f & NF != 0).into(),
            "flags.c" => (f & CF != 0).into(),

            "iff1" => regs.iff1.into(),
            "iff2" => regs.iff2.into(),
            "im" => regs.im.into(),
            "int_line" => self.int_line.into(),

            "halted" => regs.halted.into(),
            "ticks" => self.total_ticks.get().into(),

            _ => return None,
        };
        Some(value)
    }

    fn query_paths(&self) -> &'static [&'static str] {
        Z80_QUERY_PATHS
    }
}

//! ED-prefixed instructions.
//!
//! Opcodes without a defined meaning execute as 8 T-state NOPs.

#![allow(clippy::too_many_lines)]
#![allow(clippy::cast_possible_truncation)]

use emu_core::Bus;

use crate::flags::{CF, HF, NF, PF, SF, XF, YF, ZF, parity, sz53, sz53p};

use super::Z80;

/// Direction of a block instruction.
#[derive(Clone, Copy)]
enum Step {
    Up,
    Down,
}

impl Step {
    fn from_opcode(op: u8) -> Self {
        if op & 0x08 == 0 { Step::Up } else { Step::Down }
    }

    fn apply(self, value: u16) -> u16 {
        match self {
            Step::Up => value.wrapping_add(1),
            Step::Down => value.wrapping_sub(1),
        }
    }
}

impl Z80 {
    pub(super) fn execute_ed<B: Bus>(&mut self, bus: &mut B) {
        let op = self.fetch_opcode(bus);

        match op {
            // IN r, (C); ED 70 only sets flags
            op if op & 0xC7 == 0x40 => {
                let port = self.regs.bc();
                if !self.port_ready(bus, port, 8) {
                    return;
                }
                let value = bus.io_read(port);
                self.set_reg8_plain(op >> 3, value);
                self.flags.assign(!CF, sz53p(value));
                self.regs.wz = port.wrapping_add(1);
                self.clk(12);
            }

            // OUT (C), r; ED 71 writes 0
            op if op & 0xC7 == 0x41 => {
                let port = self.regs.bc();
                if !self.port_ready(bus, port, 8) {
                    return;
                }
                bus.io_write(port, self.get_reg8_plain(op >> 3));
                self.regs.wz = port.wrapping_add(1);
                self.clk(12);
            }

            // SBC HL, rr
            0x42 | 0x52 | 0x62 | 0x72 => {
                let hl = self.regs.hl();
                let carry = self.flags.test(CF);
                let result = self.flags.sbc16(hl, self.get_reg16(op >> 4), carry);
                self.regs.wz = hl.wrapping_add(1);
                self.regs.set_hl(result);
                self.clk(15);
            }

            // ADC HL, rr
            0x4A | 0x5A | 0x6A | 0x7A => {
                let hl = self.regs.hl();
                let carry = self.flags.test(CF);
                let result = self.flags.adc16(hl, self.get_reg16(op >> 4), carry);
                self.regs.wz = hl.wrapping_add(1);
                self.regs.set_hl(result);
                self.clk(15);
            }

            // LD (nn), rr
            0x43 | 0x53 | 0x63 | 0x73 => {
                let addr = self.fetch16(bus);
                self.write16(bus, addr, self.get_reg16(op >> 4));
                self.regs.wz = addr.wrapping_add(1);
                self.clk(20);
            }

            // LD rr, (nn)
            0x4B | 0x5B | 0x6B | 0x7B => {
                let addr = self.fetch16(bus);
                let value = self.read16(bus, addr);
                self.set_reg16(op >> 4, value);
                self.regs.wz = addr.wrapping_add(1);
                self.clk(20);
            }

            // NEG
            op if op & 0xC7 == 0x44 => {
                self.regs.a = self.flags.sub8(0, self.regs.a, false);
                self.clk(8);
            }

            // RETN / RETI
            op if op & 0xC7 == 0x45 => {
                self.regs.iff1 = self.regs.iff2;
                self.regs.pc = self.pop16(bus);
                self.regs.wz = self.regs.pc;
                self.clk(14);
            }

            // IM 0 / IM 1 / IM 2
            op if op & 0xC7 == 0x46 => {
                self.regs.im = match (op >> 3) & 3 {
                    0 | 1 => 0,
                    2 => 1,
                    _ => 2,
                };
                self.clk(8);
            }

            // LD I, A
            0x47 => {
                self.regs.i = self.regs.a;
                self.clk(9);
            }

            // LD R, A
            0x4F => {
                self.regs.r = self.regs.a;
                self.clk(9);
            }

            // LD A, I / LD A, R: P/V reflects IFF2
            0x57 | 0x5F => {
                self.regs.a = if op == 0x57 { self.regs.i } else { self.regs.r };
                let pv = if self.regs.iff2 { PF } else { 0 };
                self.flags.assign(!CF, sz53(self.regs.a) | pv);
                self.clk(9);
            }

            // RRD
            0x67 => {
                let hl = self.regs.hl();
                let value = self.read8(bus, hl);
                let a = self.regs.a;
                self.write8(bus, hl, (a << 4) | (value >> 4));
                self.regs.a = (a & 0xF0) | (value & 0x0F);
                self.flags.assign(!CF, sz53p(self.regs.a));
                self.regs.wz = hl.wrapping_add(1);
                self.clk(18);
            }

            // RLD
            0x6F => {
                let hl = self.regs.hl();
                let value = self.read8(bus, hl);
                let a = self.regs.a;
                self.write8(bus, hl, (value << 4) | (a & 0x0F));
                self.regs.a = (a & 0xF0) | (value >> 4);
                self.flags.assign(!CF, sz53p(self.regs.a));
                self.regs.wz = hl.wrapping_add(1);
                self.clk(18);
            }

            // LDI / LDD / LDIR / LDDR
            0xA0 | 0xA8 | 0xB0 | 0xB8 => self.block_load(bus, op),

            // CPI / CPD / CPIR / CPDR
            0xA1 | 0xA9 | 0xB1 | 0xB9 => self.block_compare(bus, op),

            // INI / IND / INIR / INDR
            0xA2 | 0xAA | 0xB2 | 0xBA => self.block_in(bus, op),

            // OUTI / OUTD / OTIR / OTDR
            0xA3 | 0xAB | 0xB3 | 0xBB => self.block_out(bus, op),

            // Undefined: NOP
            _ => self.clk(8),
        }
    }

    /// Finish one iteration of a block instruction. Repeating forms rewind
    /// PC to the ED prefix while `again` holds.
    fn block_repeat(&mut self, op: u8, again: bool) {
        if op & 0x10 != 0 && again {
            self.regs.pc = self.regs.pc.wrapping_sub(2);
            self.regs.wz = self.regs.pc.wrapping_add(1);
            self.clk(21);
        } else {
            self.clk(16);
        }
    }

    fn block_load<B: Bus>(&mut self, bus: &mut B, op: u8) {
        let step = Step::from_opcode(op);
        let hl = self.regs.hl();
        let de = self.regs.de();
        let value = self.read8(bus, hl);
        self.write8(bus, de, value);
        self.regs.set_hl(step.apply(hl));
        self.regs.set_de(step.apply(de));
        let bc = self.regs.bc().wrapping_sub(1);
        self.regs.set_bc(bc);

        let n = value.wrapping_add(self.regs.a);
        let f = ((n << 4) & YF) | (n & XF) | if bc != 0 { PF } else { 0 };
        self.flags.assign(HF | NF | PF | XF | YF, f);
        self.block_repeat(op, bc != 0);
    }

    fn block_compare<B: Bus>(&mut self, bus: &mut B, op: u8) {
        let step = Step::from_opcode(op);
        let hl = self.regs.hl();
        let value = self.read8(bus, hl);
        let a = self.regs.a;
        let result = a.wrapping_sub(value);
        let half = (a ^ value ^ result) & HF;
        let n = result.wrapping_sub(half >> 4);
        self.regs.set_hl(step.apply(hl));
        let bc = self.regs.bc().wrapping_sub(1);
        self.regs.set_bc(bc);
        self.regs.wz = step.apply(self.regs.wz);

        let f = NF
            | (result & SF)
            | if result == 0 { ZF } else { 0 }
            | half
            | ((n << 4) & YF)
            | (n & XF)
            | if bc != 0 { PF } else { 0 };
        self.flags.assign(!CF, f);
        self.block_repeat(op, bc != 0 && result != 0);
    }

    fn block_in<B: Bus>(&mut self, bus: &mut B, op: u8) {
        let port = self.regs.bc();
        if !self.port_ready(bus, port, 9) {
            return;
        }
        let step = Step::from_opcode(op);
        let value = bus.io_read(port);
        let hl = self.regs.hl();
        self.write8(bus, hl, value);
        self.regs.set_hl(step.apply(hl));
        self.regs.wz = step.apply(port);
        self.regs.b = self.regs.b.wrapping_sub(1);

        let k = u16::from(value) + u16::from(step.apply(u16::from(self.regs.c)) as u8);
        self.set_io_block_flags(value, k);
        self.block_repeat(op, self.regs.b != 0);
    }

    fn block_out<B: Bus>(&mut self, bus: &mut B, op: u8) {
        let port = u16::from_be_bytes([self.regs.b.wrapping_sub(1), self.regs.c]);
        if !self.port_ready(bus, port, 12) {
            return;
        }
        let step = Step::from_opcode(op);
        let hl = self.regs.hl();
        let value = self.read8(bus, hl);
        self.regs.b = self.regs.b.wrapping_sub(1);
        bus.io_write(port, value);
        self.regs.set_hl(step.apply(hl));
        self.regs.wz = step.apply(port);

        let k = u16::from(value) + u16::from(self.regs.l);
        self.set_io_block_flags(value, k);
        self.block_repeat(op, self.regs.b != 0);
    }

    /// Flags shared by INI/IND/OUTI/OUTD. `k` is the transferred byte plus
    /// the adjusted C (input) or L (output).
    fn set_io_block_flags(&mut self, value: u8, k: u16) {
        let b = self.regs.b;
        let mut f = sz53(b);
        if value & 0x80 != 0 {
            f |= NF;
        }
        if k > 0xFF {
            f |= HF | CF;
        }
        if parity((k as u8 & 7) ^ b) {
            f |= PF;
        }
        self.flags.set(f);
    }
}

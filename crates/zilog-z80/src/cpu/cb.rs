//! CB-prefixed instructions (rotates, shifts, BIT, RES, SET).

#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_possible_truncation)]

use emu_core::Bus;

use crate::alu;
use crate::flags::CF;

use super::Z80;

impl Z80 {
    /// CB xx: register forms take 8 T-states, `(HL)` forms 15 (BIT 12).
    pub(super) fn execute_cb<B: Bus>(&mut self, bus: &mut B) {
        let op = self.fetch_opcode(bus);
        let r = op & 7;
        let mask = 1u8 << ((op >> 3) & 7);

        if r == 6 {
            let addr = self.regs.hl();
            let value = self.read8(bus, addr);
            match op >> 6 {
                // BIT b, (HL): X/Y leak from WZ
                1 => {
                    let f = alu::bit(op >> 3, value, (self.regs.wz >> 8) as u8);
                    self.flags.assign(!CF, f);
                    self.clk(12);
                    return;
                }
                0 => {
                    let result = alu::rotate_shift(op >> 3, value, self.flags.test(CF));
                    self.flags.set(result.flags);
                    self.write8(bus, addr, result.value);
                }
                2 => self.write8(bus, addr, value & !mask),
                _ => self.write8(bus, addr, value | mask),
            }
            self.clk(15);
            return;
        }

        let value = self.get_reg8_plain(r);
        match op >> 6 {
            0 => {
                let result = alu::rotate_shift(op >> 3, value, self.flags.test(CF));
                self.flags.set(result.flags);
                self.set_reg8_plain(r, result.value);
            }
            1 => {
                let f = alu::bit(op >> 3, value, value);
                self.flags.assign(!CF, f);
            }
            2 => self.set_reg8_plain(r, value & !mask),
            _ => self.set_reg8_plain(r, value | mask),
        }
        self.clk(8);
    }

    /// DD CB d xx / FD CB d xx. The displacement comes before the opcode,
    /// and neither byte is an M1 fetch. Non-BIT forms also copy the result
    /// into the register named by the low three bits (unless that is 6).
    pub(super) fn execute_index_cb<B: Bus>(&mut self, bus: &mut B) {
        let d = self.fetch8(bus) as i8;
        let op = self.fetch8(bus);
        let addr = self.index_reg().wrapping_add_signed(i16::from(d));
        self.regs.wz = addr;
        let mask = 1u8 << ((op >> 3) & 7);
        let value = self.read8(bus, addr);

        let result = match op >> 6 {
            1 => {
                let f = alu::bit(op >> 3, value, (addr >> 8) as u8);
                self.flags.assign(!CF, f);
                self.clk(16);
                return;
            }
            0 => {
                let result = alu::rotate_shift(op >> 3, value, self.flags.test(CF));
                self.flags.set(result.flags);
                result.value
            }
            2 => value & !mask,
            _ => value | mask,
        };
        self.write8(bus, addr, result);
        if op & 7 != 6 {
            self.set_reg8_plain(op, result);
        }
        self.clk(19);
    }
}

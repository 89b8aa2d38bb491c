//! Unprefixed and DD/FD-prefixed instructions.

#![allow(clippy::too_many_lines)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_possible_truncation)]

use emu_core::Bus;

use crate::alu;
use crate::flags::{CF, HF, NF, XF, YF};

use super::{IndexMode, Z80};

impl Z80 {
    /// Execute one opcode. The M1 fetch (and R refresh) has already happened.
    ///
    /// Under a DD/FD prefix `self.index` selects IX or IY, which then stands
    /// in for HL, H and L, and `(HL)` becomes `(IX+d)`.
    pub(crate) fn execute_main<B: Bus>(&mut self, bus: &mut B, op: u8) {
        match op {
            // NOP
            0x00 => self.clk(4),

            // LD rr, nn
            0x01 | 0x11 | 0x21 | 0x31 => {
                let value = self.fetch16(bus);
                self.set_reg16(op >> 4, value);
                self.clk(10);
            }

            // LD (BC), A / LD (DE), A
            0x02 | 0x12 => {
                let addr = if op == 0x02 { self.regs.bc() } else { self.regs.de() };
                self.write8(bus, addr, self.regs.a);
                self.regs.wz = (u16::from(self.regs.a) << 8) | (addr.wrapping_add(1) & 0xFF);
                self.clk(7);
            }

            // LD A, (BC) / LD A, (DE)
            0x0A | 0x1A => {
                let addr = if op == 0x0A { self.regs.bc() } else { self.regs.de() };
                self.regs.a = self.read8(bus, addr);
                self.regs.wz = addr.wrapping_add(1);
                self.clk(7);
            }

            // INC rr
            0x03 | 0x13 | 0x23 | 0x33 => {
                let rp = op >> 4;
                self.set_reg16(rp, self.get_reg16(rp).wrapping_add(1));
                self.clk(6);
            }

            // DEC rr
            0x0B | 0x1B | 0x2B | 0x3B => {
                let rp = op >> 4;
                self.set_reg16(rp, self.get_reg16(rp).wrapping_sub(1));
                self.clk(6);
            }

            // INC (HL) / INC (IX+d)
            0x34 => {
                let addr = self.memory_operand(bus, 5);
                let value = self.read8(bus, addr);
                let result = self.flags.inc8(value);
                self.write8(bus, addr, result);
                self.clk(11);
            }

            // DEC (HL) / DEC (IX+d)
            0x35 => {
                let addr = self.memory_operand(bus, 5);
                let value = self.read8(bus, addr);
                let result = self.flags.dec8(value);
                self.write8(bus, addr, result);
                self.clk(11);
            }

            // LD (HL), n / LD (IX+d), n
            0x36 => {
                let addr = self.memory_operand(bus, 2);
                let value = self.fetch8(bus);
                self.write8(bus, addr, value);
                self.clk(10);
            }

            // INC r
            op if op & 0xC7 == 0x04 => {
                let r = op >> 3;
                let result = self.flags.inc8(self.get_reg8(r));
                self.set_reg8(r, result);
                self.clk(4);
            }

            // DEC r
            op if op & 0xC7 == 0x05 => {
                let r = op >> 3;
                let result = self.flags.dec8(self.get_reg8(r));
                self.set_reg8(r, result);
                self.clk(4);
            }

            // LD r, n
            op if op & 0xC7 == 0x06 => {
                let value = self.fetch8(bus);
                self.set_reg8(op >> 3, value);
                self.clk(7);
            }

            // RLCA / RRCA / RLA / RRA
            0x07 | 0x0F | 0x17 | 0x1F => {
                let a = self.regs.a;
                let (value, carry) = match op {
                    0x07 => (a.rotate_left(1), a & 0x80 != 0),
                    0x0F => (a.rotate_right(1), a & 0x01 != 0),
                    0x17 => ((a << 1) | u8::from(self.flags.test(CF)), a & 0x80 != 0),
                    _ => ((a >> 1) | (u8::from(self.flags.test(CF)) << 7), a & 0x01 != 0),
                };
                self.regs.a = value;
                self.flags.assign(HF | NF | CF | YF | XF, (value & (YF | XF)) | u8::from(carry));
                self.clk(4);
            }

            // EX AF, AF'
            0x08 => {
                let f = self.flags.value();
                std::mem::swap(&mut self.regs.a, &mut self.regs.a_alt);
                let alt = std::mem::replace(&mut self.regs.f_alt, f);
                self.flags.set(alt);
                self.clk(4);
            }

            // ADD HL, rr / ADD IX, rr
            0x09 | 0x19 | 0x29 | 0x39 => {
                let hl = self.index_reg();
                let rr = self.get_reg16(op >> 4);
                self.regs.wz = hl.wrapping_add(1);
                let result = self.flags.add16(hl, rr);
                self.set_index_reg(result);
                self.clk(11);
            }

            // DJNZ d
            0x10 => {
                let d = self.fetch8(bus) as i8;
                self.regs.b = self.regs.b.wrapping_sub(1);
                if self.regs.b == 0 {
                    self.clk(8);
                } else {
                    self.relative_jump(d);
                    self.clk(13);
                }
            }

            // JR d
            0x18 => {
                let d = self.fetch8(bus) as i8;
                self.relative_jump(d);
                self.clk(12);
            }

            // JR NZ/Z/NC/C, d
            0x20 | 0x28 | 0x30 | 0x38 => {
                let d = self.fetch8(bus) as i8;
                if self.condition((op >> 3) & 3) {
                    self.relative_jump(d);
                    self.clk(12);
                } else {
                    self.clk(7);
                }
            }

            // LD (nn), HL
            0x22 => {
                let addr = self.fetch16(bus);
                self.write16(bus, addr, self.index_reg());
                self.regs.wz = addr.wrapping_add(1);
                self.clk(16);
            }

            // LD HL, (nn)
            0x2A => {
                let addr = self.fetch16(bus);
                let value = self.read16(bus, addr);
                self.set_index_reg(value);
                self.regs.wz = addr.wrapping_add(1);
                self.clk(16);
            }

            // DAA
            0x27 => {
                let result = alu::daa(self.regs.a, self.flags.value());
                self.regs.a = result.value;
                self.flags.set(result.flags);
                self.clk(4);
            }

            // CPL
            0x2F => {
                self.regs.a = !self.regs.a;
                self.flags.assign(HF | NF | YF | XF, HF | NF | (self.regs.a & (YF | XF)));
                self.clk(4);
            }

            // LD (nn), A
            0x32 => {
                let addr = self.fetch16(bus);
                self.write8(bus, addr, self.regs.a);
                self.regs.wz = (u16::from(self.regs.a) << 8) | (addr.wrapping_add(1) & 0xFF);
                self.clk(13);
            }

            // LD A, (nn)
            0x3A => {
                let addr = self.fetch16(bus);
                self.regs.a = self.read8(bus, addr);
                self.regs.wz = addr.wrapping_add(1);
                self.clk(13);
            }

            // SCF
            0x37 => {
                self.flags.assign(HF | NF | CF | YF | XF, CF | (self.regs.a & (YF | XF)));
                self.clk(4);
            }

            // CCF
            0x3F => {
                let half_or_carry = if self.flags.test(CF) { HF } else { CF };
                let undocumented = self.regs.a & (YF | XF);
                self.flags.assign(HF | NF | CF | YF | XF, half_or_carry | undocumented);
                self.clk(4);
            }

            // HALT
            0x76 => {
                self.regs.halted = true;
                if !self.regs.iff1 {
                    // Only an NMI or reset can end this; give up the time slice.
                    bus.stop(0);
                }
                self.clk(4);
            }

            // LD r, (HL) / LD r, (IX+d)
            op if op & 0xC7 == 0x46 => {
                let addr = self.memory_operand(bus, 5);
                let value = self.read8(bus, addr);
                self.set_reg8_plain(op >> 3, value);
                self.clk(7);
            }

            // LD (HL), r / LD (IX+d), r
            0x70..=0x77 => {
                let addr = self.memory_operand(bus, 5);
                let value = self.get_reg8_plain(op);
                self.write8(bus, addr, value);
                self.clk(7);
            }

            // LD r, r'
            0x40..=0x7F => {
                let value = self.get_reg8(op);
                self.set_reg8(op >> 3, value);
                self.clk(4);
            }

            // ALU A, (HL) / ALU A, (IX+d)
            op if op & 0xC7 == 0x86 => {
                let addr = self.memory_operand(bus, 5);
                let value = self.read8(bus, addr);
                self.alu_a(op >> 3, value);
                self.clk(7);
            }

            // ALU A, r
            0x80..=0xBF => {
                let value = self.get_reg8(op);
                self.alu_a(op >> 3, value);
                self.clk(4);
            }

            // RET cc
            op if op & 0xC7 == 0xC0 => {
                if self.condition(op >> 3) {
                    self.regs.pc = self.pop16(bus);
                    self.regs.wz = self.regs.pc;
                    self.clk(11);
                } else {
                    self.clk(5);
                }
            }

            // POP rr
            0xC1 | 0xD1 | 0xE1 | 0xF1 => {
                let value = self.pop16(bus);
                self.set_reg16_af(op >> 4, value);
                self.clk(10);
            }

            // PUSH rr
            0xC5 | 0xD5 | 0xE5 | 0xF5 => {
                let value = self.get_reg16_af(op >> 4);
                self.push16(bus, value);
                self.clk(11);
            }

            // JP cc, nn
            op if op & 0xC7 == 0xC2 => {
                let addr = self.fetch16(bus);
                self.regs.wz = addr;
                if self.condition(op >> 3) {
                    self.regs.pc = addr;
                }
                self.clk(10);
            }

            // JP nn
            0xC3 => {
                let addr = self.fetch16(bus);
                self.regs.wz = addr;
                self.regs.pc = addr;
                self.clk(10);
            }

            // CALL cc, nn
            op if op & 0xC7 == 0xC4 => {
                let addr = self.fetch16(bus);
                self.regs.wz = addr;
                if self.condition(op >> 3) {
                    self.push16(bus, self.regs.pc);
                    self.regs.pc = addr;
                    self.clk(17);
                } else {
                    self.clk(10);
                }
            }

            // CALL nn
            0xCD => {
                let addr = self.fetch16(bus);
                self.regs.wz = addr;
                self.push16(bus, self.regs.pc);
                self.regs.pc = addr;
                self.clk(17);
            }

            // ALU A, n
            op if op & 0xC7 == 0xC6 => {
                let value = self.fetch8(bus);
                self.alu_a(op >> 3, value);
                self.clk(7);
            }

            // RST p
            op if op & 0xC7 == 0xC7 => {
                self.push16(bus, self.regs.pc);
                self.regs.pc = u16::from(op & 0x38);
                self.regs.wz = self.regs.pc;
                self.clk(11);
            }

            // RET
            0xC9 => {
                self.regs.pc = self.pop16(bus);
                self.regs.wz = self.regs.pc;
                self.clk(10);
            }

            // CB prefix
            0xCB => {
                if self.index == IndexMode::Hl {
                    self.execute_cb(bus);
                } else {
                    self.execute_index_cb(bus);
                }
            }

            // OUT (n), A
            0xD3 => {
                let n = self.fetch8(bus);
                let port = u16::from_be_bytes([self.regs.a, n]);
                if !self.port_ready(bus, port, 7) {
                    return;
                }
                bus.io_write(port, self.regs.a);
                self.regs.wz = (u16::from(self.regs.a) << 8) | u16::from(n.wrapping_add(1));
                self.clk(11);
            }

            // IN A, (n)
            0xDB => {
                let n = self.fetch8(bus);
                let port = u16::from_be_bytes([self.regs.a, n]);
                if !self.port_ready(bus, port, 7) {
                    return;
                }
                self.regs.a = bus.io_read(port);
                self.regs.wz = port.wrapping_add(1);
                self.clk(11);
            }

            // EXX
            0xD9 => {
                self.regs.exx();
                self.clk(4);
            }

            // EX (SP), HL
            0xE3 => {
                let sp = self.regs.sp;
                let value = self.read16(bus, sp);
                self.write16(bus, sp, self.index_reg());
                self.set_index_reg(value);
                self.regs.wz = value;
                self.clk(19);
            }

            // JP (HL)
            0xE9 => {
                self.regs.pc = self.index_reg();
                self.clk(4);
            }

            // EX DE, HL (never indexed)
            0xEB => {
                let de = self.regs.de();
                self.regs.set_de(self.regs.hl());
                self.regs.set_hl(de);
                self.clk(4);
            }

            // DI
            0xF3 => {
                self.regs.iff1 = false;
                self.regs.iff2 = false;
                self.clk(4);
            }

            // EI
            0xFB => {
                self.regs.iff1 = true;
                self.regs.iff2 = true;
                self.after_ei = true;
                self.clk(4);
            }

            // LD SP, HL
            0xF9 => {
                self.regs.sp = self.index_reg();
                self.clk(6);
            }

            // DD / FD prefix
            0xDD | 0xFD => {
                self.clk(4);
                let next = self.peek_opcode(bus);
                if next == 0xDD || next == 0xFD {
                    // Doubled prefix: the second one starts the next step.
                    return;
                }
                self.index = if op == 0xDD { IndexMode::Ix } else { IndexMode::Iy };
                let op = self.fetch_opcode(bus);
                self.execute_main(bus, op);
            }

            // ED prefix
            0xED => {
                self.index = IndexMode::Hl;
                self.execute_ed(bus);
            }

            _ => unreachable!("opcode {op:#04X} missing from dispatch"),
        }
    }

    /// PC-relative jump; WZ takes the target.
    fn relative_jump(&mut self, d: i8) {
        self.regs.pc = self.regs.pc.wrapping_add_signed(i16::from(d));
        self.regs.wz = self.regs.pc;
    }

    /// 8-bit ALU group selected by bits 5-3 of the opcode.
    fn alu_a(&mut self, op: u8, value: u8) {
        let a = self.regs.a;
        self.regs.a = match op & 7 {
            0 => self.flags.add8(a, value, false),
            1 => {
                let carry = self.flags.test(CF);
                self.flags.add8(a, value, carry)
            }
            2 => self.flags.sub8(a, value, false),
            3 => {
                let carry = self.flags.test(CF);
                self.flags.sub8(a, value, carry)
            }
            4 => self.flags.and8(a, value),
            5 => self.flags.xor8(a, value),
            6 => self.flags.or8(a, value),
            _ => {
                self.flags.cp8(a, value);
                a
            }
        };
    }
}

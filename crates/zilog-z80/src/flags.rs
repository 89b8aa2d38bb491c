//! Z80 flag register bits and the lazy flag evaluator.
//!
//! Most flag results are overwritten before anything reads them, so
//! arithmetic only records its operands and marks the affected bits dirty.
//! A bit is computed when somebody asks for it, and only that bit.

/// Sign flag (bit 7) - set if result is negative.
pub const SF: u8 = 0b1000_0000;

/// Zero flag (bit 6) - set if result is zero.
pub const ZF: u8 = 0b0100_0000;

/// Undocumented flag (bit 5) - copy of bit 5 of result.
pub const YF: u8 = 0b0010_0000;

/// Half-carry flag (bit 4) - carry from bit 3 to bit 4.
pub const HF: u8 = 0b0001_0000;

/// Undocumented flag (bit 3) - copy of bit 3 of result.
pub const XF: u8 = 0b0000_1000;

/// Parity/Overflow flag (bit 2) - parity or overflow depending on instruction.
pub const PF: u8 = 0b0000_0100;

/// Add/Subtract flag (bit 1) - set if last operation was subtraction.
pub const NF: u8 = 0b0000_0010;

/// Carry flag (bit 0) - carry out of bit 7.
pub const CF: u8 = 0b0000_0001;

/// Compute parity of a byte (true if even number of 1 bits).
#[must_use]
pub const fn parity(value: u8) -> bool {
    value.count_ones().is_multiple_of(2)
}

/// Build flags byte for common arithmetic results.
#[must_use]
pub const fn sz53(value: u8) -> u8 {
    let mut f = 0;
    if value == 0 {
        f |= ZF;
    }
    if value & 0x80 != 0 {
        f |= SF;
    }
    // Copy bits 5 and 3 from value (undocumented flags)
    f |= value & (YF | XF);
    f
}

/// Build flags byte with parity.
#[must_use]
pub const fn sz53p(value: u8) -> u8 {
    let mut f = sz53(value);
    if parity(value) {
        f |= PF;
    }
    f
}

/// Shape of the last recorded flag-affecting operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagOp {
    /// `x + y + carry`.
    Add,
    /// `x - y - carry`.
    Sub,
    /// `x - y`, with X/Y copied from the operand `y` instead of the result.
    Compare,
    /// Result already computed and stored in `x`; P/V is parity.
    Logic,
}

/// Lazily evaluated flag register.
///
/// Holds the visible F byte plus enough of the last operation to rebuild
/// any bit of it. Operands are kept widened to 32 bits so the carry out of
/// an 8-bit operation lands at bit 8 and of a 16-bit one at bit 16.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LazyFlags {
    f: u8,
    x: u32,
    y: u32,
    carry: u32,
    op: FlagOp,
    wide: bool,
    dirty: u8,
}

impl Default for LazyFlags {
    fn default() -> Self {
        Self::new(0)
    }
}

impl LazyFlags {
    /// Flags register holding `f` with nothing pending.
    #[must_use]
    pub const fn new(f: u8) -> Self {
        Self {
            f,
            x: 0,
            y: 0,
            carry: 0,
            op: FlagOp::Logic,
            wide: false,
            dirty: 0,
        }
    }

    /// Bits currently awaiting recomputation.
    #[must_use]
    pub const fn dirty(&self) -> u8 {
        self.dirty
    }

    /// Overwrite the whole register (POP AF, EX AF,AF', eager updates).
    pub fn set(&mut self, f: u8) {
        self.f = f;
        self.dirty = 0;
    }

    /// Resolve every pending bit and return the full register.
    pub fn value(&mut self) -> u8 {
        self.resolve(self.dirty);
        self.f
    }

    /// Full register value without resolving anything.
    #[must_use]
    pub fn peek(&self) -> u8 {
        let mut f = self.f;
        for bit in BITS {
            if self.dirty & bit != 0 {
                f = (f & !bit) | self.compute(bit);
            }
        }
        f
    }

    /// Resolve the bits in `mask` and return them.
    pub fn get(&mut self, mask: u8) -> u8 {
        self.resolve(mask & self.dirty);
        self.f & mask
    }

    /// True if any bit in `mask` is set, resolving only those bits.
    pub fn test(&mut self, mask: u8) -> bool {
        self.get(mask) != 0
    }

    /// Eagerly set the bits in `mask` to the matching bits of `value`,
    /// leaving the rest of the register (and its pending bits) alone.
    pub fn assign(&mut self, mask: u8, value: u8) {
        self.f = (self.f & !mask) | (value & mask);
        self.dirty &= !mask;
    }

    fn resolve(&mut self, mask: u8) {
        if mask == 0 {
            return;
        }
        for bit in BITS {
            if mask & bit != 0 {
                self.f = (self.f & !bit) | self.compute(bit);
            }
        }
        self.dirty &= !mask;
    }

    /// Record a new operation.
    ///
    /// `lazy` bits are computed on demand from the operands; `fixed` bits
    /// take their value from `fixed_value` right away; every other bit keeps
    /// its current value. Pending bits the new operation does not touch are
    /// resolved first, since the operands they depend on are about to go.
    fn record(
        &mut self,
        op: FlagOp,
        operands: (u32, u32, u32),
        wide: bool,
        lazy: u8,
        fixed: u8,
        fixed_value: u8,
    ) {
        self.resolve(self.dirty & !(lazy | fixed));
        self.f = (self.f & !fixed) | (fixed_value & fixed);
        (self.x, self.y, self.carry) = operands;
        self.op = op;
        self.wide = wide;
        self.dirty = lazy;
    }

    fn result(&self) -> u32 {
        match self.op {
            FlagOp::Add => self.x.wrapping_add(self.y).wrapping_add(self.carry),
            FlagOp::Sub | FlagOp::Compare => self.x.wrapping_sub(self.y).wrapping_sub(self.carry),
            FlagOp::Logic => self.x,
        }
    }

    /// Compute one flag bit from the recorded operation.
    fn compute(&self, bit: u8) -> u8 {
        let (sign, mask, half) = if self.wide {
            (0x8000, 0xFFFF, 0x1000)
        } else {
            (0x80, 0xFF, 0x10)
        };
        let r = self.result();
        let set = match bit {
            SF => r & sign != 0,
            ZF => r & mask == 0,
            YF | XF => {
                let source = match (self.op, self.wide) {
                    (FlagOp::Compare, _) => self.y,
                    (_, true) => r >> 8,
                    (_, false) => r,
                };
                source as u8 & bit != 0
            }
            HF => (self.x ^ self.y ^ r) & half != 0,
            PF => match self.op {
                FlagOp::Add => !(self.x ^ self.y) & (self.x ^ r) & sign != 0,
                FlagOp::Sub | FlagOp::Compare => (self.x ^ self.y) & (self.x ^ r) & sign != 0,
                FlagOp::Logic => parity(r as u8),
            },
            CF => r & (mask + 1) != 0,
            // N is always written eagerly.
            _ => self.f & bit != 0,
        };
        if set { bit } else { 0 }
    }

    // =========================================================================
    // Recording operations
    // =========================================================================

    /// 8-bit ADD/ADC.
    pub fn add8(&mut self, a: u8, b: u8, carry: bool) -> u8 {
        let c = u32::from(carry);
        self.record(FlagOp::Add, (a.into(), b.into(), c), false, !NF, NF, 0);
        a.wrapping_add(b).wrapping_add(c as u8)
    }

    /// 8-bit SUB/SBC/NEG.
    pub fn sub8(&mut self, a: u8, b: u8, carry: bool) -> u8 {
        let c = u32::from(carry);
        self.record(FlagOp::Sub, (a.into(), b.into(), c), false, !NF, NF, NF);
        a.wrapping_sub(b).wrapping_sub(c as u8)
    }

    /// 8-bit CP.
    pub fn cp8(&mut self, a: u8, b: u8) {
        self.record(FlagOp::Compare, (a.into(), b.into(), 0), false, !NF, NF, NF);
    }

    /// 8-bit INC (carry unaffected).
    pub fn inc8(&mut self, a: u8) -> u8 {
        self.record(FlagOp::Add, (a.into(), 1, 0), false, !(NF | CF), NF, 0);
        a.wrapping_add(1)
    }

    /// 8-bit DEC (carry unaffected).
    pub fn dec8(&mut self, a: u8) -> u8 {
        self.record(FlagOp::Sub, (a.into(), 1, 0), false, !(NF | CF), NF, NF);
        a.wrapping_sub(1)
    }

    /// AND: H set, N and C clear.
    pub fn and8(&mut self, a: u8, b: u8) -> u8 {
        self.logic(a & b, HF)
    }

    /// OR: H, N and C clear.
    pub fn or8(&mut self, a: u8, b: u8) -> u8 {
        self.logic(a | b, 0)
    }

    /// XOR: H, N and C clear.
    pub fn xor8(&mut self, a: u8, b: u8) -> u8 {
        self.logic(a ^ b, 0)
    }

    fn logic(&mut self, result: u8, h: u8) -> u8 {
        let lazy = SF | ZF | YF | XF | PF;
        self.record(FlagOp::Logic, (result.into(), 0, 0), false, lazy, HF | NF | CF, h);
        result
    }

    /// 16-bit ADD (ADD HL/IX/IY, rr): S, Z and P/V unaffected.
    pub fn add16(&mut self, a: u16, b: u16) -> u16 {
        let lazy = YF | HF | XF | CF;
        self.record(FlagOp::Add, (a.into(), b.into(), 0), true, lazy, NF, 0);
        a.wrapping_add(b)
    }

    /// 16-bit ADC HL, rr.
    pub fn adc16(&mut self, a: u16, b: u16, carry: bool) -> u16 {
        let c = u32::from(carry);
        self.record(FlagOp::Add, (a.into(), b.into(), c), true, !NF, NF, 0);
        a.wrapping_add(b).wrapping_add(c as u16)
    }

    /// 16-bit SBC HL, rr.
    pub fn sbc16(&mut self, a: u16, b: u16, carry: bool) -> u16 {
        let c = u32::from(carry);
        self.record(FlagOp::Sub, (a.into(), b.into(), c), true, !NF, NF, NF);
        a.wrapping_sub(b).wrapping_sub(c as u16)
    }
}

const BITS: [u8; 8] = [SF, ZF, YF, HF, XF, PF, NF, CF];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_marks_only_affected_bits_dirty() {
        let mut flags = LazyFlags::new(0);
        flags.inc8(0x0F);
        assert_eq!(flags.dirty(), !(NF | CF));
        flags.add16(0x0FFF, 0x0001);
        assert_eq!(flags.dirty() & (SF | ZF | PF), 0, "add16 leaves S/Z/P alone");
    }

    #[test]
    fn reading_one_bit_clears_only_that_bit() {
        let mut flags = LazyFlags::new(0);
        flags.add8(0xFF, 0x01, false);
        assert!(flags.test(ZF));
        assert_eq!(flags.dirty() & ZF, 0);
        assert_ne!(flags.dirty() & CF, 0);
        assert!(flags.test(CF));
    }

    #[test]
    fn untouched_pending_bits_survive_a_new_record() {
        let mut flags = LazyFlags::new(0);
        flags.add8(0xFF, 0x02, false); // carry out
        flags.inc8(0x10); // INC leaves C alone
        assert!(flags.test(CF));
        assert!(!flags.test(ZF));
    }

    #[test]
    fn peek_matches_value_without_mutating() {
        let mut flags = LazyFlags::new(0);
        flags.sbc16(0x1000, 0x2000, true);
        let before = flags;
        let peeked = flags.peek();
        assert_eq!(before, flags);
        assert_eq!(peeked, flags.value());
        assert_eq!(flags.dirty(), 0);
    }

    #[test]
    fn compare_takes_undocumented_bits_from_operand() {
        let mut flags = LazyFlags::new(0);
        flags.cp8(0x00, 0x28);
        assert_eq!(flags.value() & (YF | XF), 0x28);
    }

    #[test]
    fn assign_overrides_pending_bits() {
        let mut flags = LazyFlags::new(0);
        flags.add8(0xFF, 0x01, false);
        flags.assign(CF, 0);
        assert!(!flags.test(CF));
        assert!(flags.test(ZF));
    }
}

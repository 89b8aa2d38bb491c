//! Eagerly computed ALU operations.
//!
//! The CPU uses these for the operations whose flags are always needed
//! (rotates, shifts, BIT, DAA). The arithmetic functions are the reference
//! the lazy evaluator in [`crate::LazyFlags`] must agree with bit for bit.

#![allow(clippy::cast_possible_truncation)] // Intentional truncation for low byte extraction.

use crate::flags::{CF, HF, NF, PF, SF, XF, YF, ZF, sz53, sz53p};

/// Result of an ALU operation with flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AluResult {
    pub value: u8,
    pub flags: u8,
}

const fn flag(condition: bool, bit: u8) -> u8 {
    if condition { bit } else { 0 }
}

/// Add two bytes with optional carry, returning result and flags.
#[must_use]
pub fn add8(a: u8, b: u8, carry: bool) -> AluResult {
    let c = u8::from(carry);
    let wide = u16::from(a) + u16::from(b) + u16::from(c);
    let value = wide as u8;
    let flags = sz53(value)
        | flag((a & 0x0F) + (b & 0x0F) + c > 0x0F, HF)
        | flag((a ^ b) & 0x80 == 0 && (a ^ value) & 0x80 != 0, PF)
        | flag(wide > 0xFF, CF);
    AluResult { value, flags }
}

/// Subtract two bytes with optional borrow, returning result and flags.
#[must_use]
pub fn sub8(a: u8, b: u8, carry: bool) -> AluResult {
    let c = u8::from(carry);
    let value = a.wrapping_sub(b).wrapping_sub(c);
    let flags = NF
        | sz53(value)
        | flag((a & 0x0F) < (b & 0x0F) + c, HF)
        | flag((a ^ b) & 0x80 != 0 && (b ^ value) & 0x80 == 0, PF)
        | flag(u16::from(a) < u16::from(b) + u16::from(c), CF);
    AluResult { value, flags }
}

/// Compare: a subtraction whose X/Y flags come from the operand.
#[must_use]
pub fn cp8(a: u8, b: u8) -> AluResult {
    let mut result = sub8(a, b, false);
    result.flags = (result.flags & !(YF | XF)) | (b & (YF | XF));
    result
}

/// AND: H always set.
#[must_use]
pub fn and8(a: u8, b: u8) -> AluResult {
    let value = a & b;
    AluResult { value, flags: sz53p(value) | HF }
}

/// OR.
#[must_use]
pub fn or8(a: u8, b: u8) -> AluResult {
    let value = a | b;
    AluResult { value, flags: sz53p(value) }
}

/// XOR.
#[must_use]
pub fn xor8(a: u8, b: u8) -> AluResult {
    let value = a ^ b;
    AluResult { value, flags: sz53p(value) }
}

/// Increment byte. Carry is not affected and is returned clear.
#[must_use]
pub fn inc8(a: u8) -> AluResult {
    let value = a.wrapping_add(1);
    let flags = sz53(value) | flag(a & 0x0F == 0x0F, HF) | flag(a == 0x7F, PF);
    AluResult { value, flags }
}

/// Decrement byte. Carry is not affected and is returned clear.
#[must_use]
pub fn dec8(a: u8) -> AluResult {
    let value = a.wrapping_sub(1);
    let flags = NF | sz53(value) | flag(a & 0x0F == 0, HF) | flag(a == 0x80, PF);
    AluResult { value, flags }
}

/// Shared tail of the CB rotate/shift group: S, Z, X, Y, P from the result,
/// carry from the bit shifted out, H and N clear.
const fn shifted(value: u8, carry_out: u8) -> AluResult {
    AluResult {
        value,
        flags: sz53p(value) | flag(carry_out != 0, CF),
    }
}

/// Rotate left circular (bit 7 -> carry and bit 0).
#[must_use]
pub const fn rlc8(a: u8) -> AluResult {
    shifted(a.rotate_left(1), a & 0x80)
}

/// Rotate right circular (bit 0 -> carry and bit 7).
#[must_use]
pub const fn rrc8(a: u8) -> AluResult {
    shifted(a.rotate_right(1), a & 0x01)
}

/// Rotate left through carry.
#[must_use]
pub const fn rl8(a: u8, carry: bool) -> AluResult {
    shifted((a << 1) | carry as u8, a & 0x80)
}

/// Rotate right through carry.
#[must_use]
pub const fn rr8(a: u8, carry: bool) -> AluResult {
    shifted((a >> 1) | ((carry as u8) << 7), a & 0x01)
}

/// Shift left arithmetic (bit 0 = 0).
#[must_use]
pub const fn sla8(a: u8) -> AluResult {
    shifted(a << 1, a & 0x80)
}

/// Shift right arithmetic (bit 7 preserved).
#[must_use]
pub const fn sra8(a: u8) -> AluResult {
    shifted((a >> 1) | (a & 0x80), a & 0x01)
}

/// Shift left logical (undocumented SLL - bit 0 = 1).
#[must_use]
pub const fn sll8(a: u8) -> AluResult {
    shifted((a << 1) | 1, a & 0x80)
}

/// Shift right logical (bit 7 = 0).
#[must_use]
pub const fn srl8(a: u8) -> AluResult {
    shifted(a >> 1, a & 0x01)
}

/// CB-group operation selected by bits 5-3 of the opcode.
#[must_use]
pub const fn rotate_shift(op: u8, a: u8, carry: bool) -> AluResult {
    match op & 7 {
        0 => rlc8(a),
        1 => rrc8(a),
        2 => rl8(a, carry),
        3 => rr8(a, carry),
        4 => sla8(a),
        5 => sra8(a),
        6 => sll8(a),
        _ => srl8(a),
    }
}

/// BIT b, value. `xy_source` supplies the undocumented X/Y bits (the value
/// itself for registers, the high byte of the address for indexed forms).
/// Carry is preserved by the caller.
#[must_use]
pub const fn bit(b: u8, value: u8, xy_source: u8) -> u8 {
    let tested = value & (1 << (b & 7));
    HF | flag(tested == 0, ZF | PF) | flag(tested & 0x80 != 0, SF) | (xy_source & (YF | XF))
}

/// Decimal adjust after addition or subtraction. `flags` is the current F.
#[must_use]
pub const fn daa(a: u8, flags: u8) -> AluResult {
    let subtract = flags & NF != 0;
    let mut correction = 0;
    let mut carry = flags & CF != 0;
    if flags & HF != 0 || (a & 0x0F) > 9 {
        correction |= 0x06;
    }
    if carry || a > 0x99 {
        correction |= 0x60;
        carry = true;
    }
    let value = if subtract {
        a.wrapping_sub(correction)
    } else {
        a.wrapping_add(correction)
    };
    let half = if subtract {
        flags & HF != 0 && (a & 0x0F) < 6
    } else {
        (a & 0x0F) > 9
    };
    AluResult {
        value,
        flags: sz53p(value) | (flags & NF) | flag(carry, CF) | flag(half, HF),
    }
}

/// 16-bit add for HL/IX/IY. Only H, C, X and Y are meaningful.
#[must_use]
pub fn add16(a: u16, b: u16) -> (u16, u8) {
    let wide = u32::from(a) + u32::from(b);
    let value = wide as u16;
    let flags = ((value >> 8) as u8 & (YF | XF))
        | flag((a & 0x0FFF) + (b & 0x0FFF) > 0x0FFF, HF)
        | flag(wide > 0xFFFF, CF);
    (value, flags)
}

/// 16-bit add with carry for HL.
#[must_use]
pub fn adc16(a: u16, b: u16, carry: bool) -> (u16, u8) {
    let c = u16::from(carry);
    let wide = u32::from(a) + u32::from(b) + u32::from(c);
    let value = wide as u16;
    let flags = flag(value & 0x8000 != 0, SF)
        | flag(value == 0, ZF)
        | ((value >> 8) as u8 & (YF | XF))
        | flag((a & 0x0FFF) + (b & 0x0FFF) + c > 0x0FFF, HF)
        | flag((a ^ b) & 0x8000 == 0 && (a ^ value) & 0x8000 != 0, PF)
        | flag(wide > 0xFFFF, CF);
    (value, flags)
}

/// 16-bit subtract with borrow for HL.
#[must_use]
pub fn sbc16(a: u16, b: u16, carry: bool) -> (u16, u8) {
    let c = u16::from(carry);
    let value = a.wrapping_sub(b).wrapping_sub(c);
    let flags = NF
        | flag(value & 0x8000 != 0, SF)
        | flag(value == 0, ZF)
        | ((value >> 8) as u8 & (YF | XF))
        | flag((a & 0x0FFF) < (b & 0x0FFF) + c, HF)
        | flag((a ^ b) & 0x8000 != 0 && (b ^ value) & 0x8000 == 0, PF)
        | flag(u32::from(a) < u32::from(b) + u32::from(c), CF);
    (value, flags)
}

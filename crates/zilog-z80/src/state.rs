//! Save-state snapshot of the Z80.

use emu_core::Ticks;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cpu::{IndexMode, Z80};
use crate::flags::LazyFlags;
use crate::registers::Registers;

/// Layout revision of [`Z80State`]. Bump when fields change.
pub const Z80_STATE_REVISION: u8 = 1;

/// Failure restoring a snapshot. The target is left untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    /// Snapshot was written by an incompatible layout.
    #[error("{component} state revision {found} is not supported (expected {expected})")]
    Revision {
        component: &'static str,
        expected: u8,
        found: u8,
    },
    /// A field holds a value the component cannot take.
    #[error("{component} state field `{field}` is out of range")]
    Invalid {
        component: &'static str,
        field: &'static str,
    },
}

/// Architectural and interrupt state of one CPU.
///
/// Flags are stored resolved; the lazy evaluator starts clean on load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Z80State {
    pub rev: u8,
    pub af: u16,
    pub bc: u16,
    pub de: u16,
    pub hl: u16,
    pub af_alt: u16,
    pub bc_alt: u16,
    pub de_alt: u16,
    pub hl_alt: u16,
    pub ix: u16,
    pub iy: u16,
    pub sp: u16,
    pub pc: u16,
    pub wz: u16,
    pub i: u8,
    pub r: u8,
    pub im: u8,
    pub iff1: bool,
    pub iff2: bool,
    pub halted: bool,
    pub int_line: bool,
    pub nmi_pending: bool,
    pub after_ei: bool,
    pub ticks: u64,
}

impl Z80 {
    /// Capture the CPU between instructions.
    #[must_use]
    pub fn save_state(&self) -> Z80State {
        let regs = self.registers_resolved();
        Z80State {
            rev: Z80_STATE_REVISION,
            af: regs.af(),
            bc: regs.bc(),
            de: regs.de(),
            hl: regs.hl(),
            af_alt: regs.af_alt(),
            bc_alt: regs.bc_alt(),
            de_alt: regs.de_alt(),
            hl_alt: regs.hl_alt(),
            ix: regs.ix,
            iy: regs.iy,
            sp: regs.sp,
            pc: regs.pc,
            wz: regs.wz,
            i: regs.i,
            r: regs.r,
            im: regs.im,
            iff1: regs.iff1,
            iff2: regs.iff2,
            halted: regs.halted,
            int_line: self.int_line,
            nmi_pending: self.nmi_pending,
            after_ei: self.after_ei,
            ticks: self.total_ticks.get(),
        }
    }

    /// Restore a snapshot taken by [`Z80::save_state`].
    ///
    /// # Errors
    ///
    /// Returns [`StateError`] if the revision or a field is unsupported; the
    /// CPU is not modified in that case.
    pub fn load_state(&mut self, state: &Z80State) -> Result<(), StateError> {
        if state.rev != Z80_STATE_REVISION {
            return Err(StateError::Revision {
                component: "z80",
                expected: Z80_STATE_REVISION,
                found: state.rev,
            });
        }
        if state.im > 2 {
            return Err(StateError::Invalid { component: "z80", field: "im" });
        }

        let mut regs = Registers::power_on();
        regs.set_af(state.af);
        regs.set_bc(state.bc);
        regs.set_de(state.de);
        regs.set_hl(state.hl);
        let [a_alt, f_alt] = state.af_alt.to_be_bytes();
        let [b_alt, c_alt] = state.bc_alt.to_be_bytes();
        let [d_alt, e_alt] = state.de_alt.to_be_bytes();
        let [h_alt, l_alt] = state.hl_alt.to_be_bytes();
        regs.a_alt = a_alt;
        regs.f_alt = f_alt;
        regs.b_alt = b_alt;
        regs.c_alt = c_alt;
        regs.d_alt = d_alt;
        regs.e_alt = e_alt;
        regs.h_alt = h_alt;
        regs.l_alt = l_alt;
        regs.ix = state.ix;
        regs.iy = state.iy;
        regs.sp = state.sp;
        regs.pc = state.pc;
        regs.wz = state.wz;
        regs.i = state.i;
        regs.r = state.r;
        regs.im = state.im;
        regs.iff1 = state.iff1;
        regs.iff2 = state.iff2;
        regs.halted = state.halted;

        self.flags = LazyFlags::new(regs.f);
        self.regs = regs;
        self.index = IndexMode::Hl;
        self.window = None;
        self.after_ei = state.after_ei;
        self.int_line = state.int_line;
        self.nmi_pending = state.nmi_pending;
        self.total_ticks = Ticks::new(state.ticks);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use emu_core::{Cpu, SimpleBus};

    #[test]
    fn snapshot_round_trips_through_json() {
        let mut cpu = Z80::new();
        let mut bus = SimpleBus::new();
        // LD HL,0xBEEF; EXX; SCF; EX AF,AF'; IM 1
        bus.load(0, &[0x21, 0xEF, 0xBE, 0xD9, 0x37, 0x08, 0xED, 0x56]);
        for _ in 0..5 {
            cpu.step(&mut bus);
        }
        let saved = cpu.save_state();
        let json = serde_json::to_string(&saved).expect("serialize");
        let parsed: Z80State = serde_json::from_str(&json).expect("deserialize");

        let mut restored = Z80::new();
        restored.load_state(&parsed).expect("load");
        assert_eq!(restored.save_state(), saved);
        assert_eq!(restored.registers(), cpu.registers());
    }

    #[test]
    fn wrong_revision_leaves_cpu_untouched() {
        let mut cpu = Z80::new();
        cpu.set_pc(0x1234);
        let mut state = Z80::new().save_state();
        state.rev = Z80_STATE_REVISION + 1;

        let err = cpu.load_state(&state).unwrap_err();
        assert!(matches!(
            err,
            StateError::Revision { found, .. } if found == Z80_STATE_REVISION + 1
        ));
        assert_eq!(cpu.pc(), 0x1234);
    }

    #[test]
    fn invalid_interrupt_mode_is_rejected() {
        let mut cpu = Z80::new();
        let mut state = cpu.save_state();
        state.im = 3;
        assert_eq!(
            cpu.load_state(&state),
            Err(StateError::Invalid { component: "z80", field: "im" })
        );
    }
}

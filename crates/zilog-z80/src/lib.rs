//! Zilog Z80 CPU emulator.
//!
//! Each call to `step()` executes one whole instruction (or accepts one
//! interrupt) and returns the T-states it took. Flags are evaluated
//! lazily; see [`LazyFlags`].

pub mod alu;
mod cpu;
mod flags;
mod registers;
mod state;

pub use cpu::Z80;
pub use flags::{CF, FlagOp, HF, LazyFlags, NF, PF, SF, XF, YF, ZF, parity, sz53, sz53p};
pub use registers::Registers;
pub use state::{StateError, Z80_STATE_REVISION, Z80State};

//! CPU core trait.

use crate::{Bus, Ticks};

/// A CPU core.
///
/// CPUs execute whole instructions and access memory through a bus. The bus
/// is passed in, not owned, so one set of devices can be shared between
/// several CPUs by a scheduler.
///
/// CPUs expose their internal state for observation and debugging.
pub trait Cpu {
    /// The type used for register inspection.
    type Registers;

    /// Execute one instruction (or one interrupt acceptance, or one halted
    /// slot) and return the T-states it consumed.
    ///
    /// A return of 0 means the instruction was abandoned at a sync point and
    /// will be retried by the next call.
    fn step<B: Bus>(&mut self, bus: &mut B) -> u32;

    /// Returns the current program counter.
    fn pc(&self) -> u16;

    /// Returns a snapshot of all registers for inspection.
    fn registers(&self) -> Self::Registers;

    /// Returns true if the CPU is halted.
    fn is_halted(&self) -> bool;

    /// Drive the maskable interrupt line (level triggered).
    fn set_int_line(&mut self, asserted: bool);

    /// Request a non-maskable interrupt.
    fn nmi(&mut self);

    /// Reset the CPU to its initial state.
    fn reset(&mut self);

    /// T-states executed since creation.
    fn total_ticks(&self) -> Ticks;
}

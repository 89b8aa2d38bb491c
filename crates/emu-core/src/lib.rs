//! Core traits and types for cycle-accurate emulation.
//!
//! Everything is counted in CPU T-states. A CPU executes whole instructions
//! and reports how many T-states each one consumed; schedulers interleave
//! CPUs by comparing those counts.

mod bus;
mod clock;
mod cpu;
mod observable;
mod ticks;

pub use bus::{Bus, FetchWindow, SimpleBus};
pub use clock::MasterClock;
pub use cpu::Cpu;
pub use observable::{Observable, Value};
pub use ticks::Ticks;

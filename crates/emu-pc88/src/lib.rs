//! Dual-Z80 microcomputer core.
//!
//! A main and a sub Z80, each with its own memory and I/O bus, run under a
//! cooperative scheduler that keeps their T-state counters in step and
//! makes cross-CPU port accesses happen in time order. The pacing layer
//! drives it by calling [`Machine::execute`] with a T-state budget.

mod config;
mod link;
mod machine;
mod scheduler;

pub use config::{ClockRatio, ConfigError, MachineConfig};
pub use link::{PortLink, Side};
pub use machine::{MACHINE_STATE_REVISION, Machine, MachineState, RomHandle};
pub use scheduler::{CpuSel, Link, Processors, SCHEDULER_STATE_REVISION, Scheduler, SchedulerState};

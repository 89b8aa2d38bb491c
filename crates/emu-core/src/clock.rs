//! Master clock configuration.

use crate::Ticks;

/// Clock of the reference (main) CPU.
///
/// The pacing layer converts wall-clock budgets into T-states with this; the
/// emulation core itself only ever sees T-state counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MasterClock {
    /// Crystal frequency in Hz (e.g., `4_000_000` for a 4 MHz Z80).
    pub frequency_hz: u64,
}

impl MasterClock {
    #[must_use]
    pub const fn new(frequency_hz: u64) -> Self {
        Self { frequency_hz }
    }

    /// Ticks per frame at the given frame rate (integer division).
    #[must_use]
    pub const fn ticks_per_frame(&self, frames_per_second: u64) -> Ticks {
        Ticks::new(self.frequency_hz / frames_per_second)
    }
}

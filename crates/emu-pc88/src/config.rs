//! Machine configuration: clock ratio, idle skipping and main clock rate.

use emu_core::{MasterClock, Ticks};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Speed of the main CPU relative to the sub CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ClockRatio {
    /// Both CPUs at the same rate.
    #[default]
    #[serde(rename = "1:1")]
    OneToOne,
    /// Main CPU at twice the sub CPU's rate (8 MHz main, 4 MHz sub).
    #[serde(rename = "2:1")]
    TwoToOne,
}

impl ClockRatio {
    /// Scheduling weight of each CPU, `[main, sub]`. One sub T-state counts
    /// as this many units of main time.
    #[must_use]
    pub const fn weights(self) -> [u64; 2] {
        match self {
            ClockRatio::OneToOne => [1, 1],
            ClockRatio::TwoToOne => [1, 2],
        }
    }
}

/// Configuration for constructing a [`Machine`](crate::Machine).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MachineConfig {
    pub clock_ratio: ClockRatio,
    /// Run only the main CPU while the sub CPU sits halted.
    pub idle_skip: bool,
    /// Main CPU clock in Hz.
    pub main_clock_hz: u64,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            clock_ratio: ClockRatio::OneToOne,
            idle_skip: true,
            main_clock_hz: 4_000_000,
        }
    }
}

/// Failure reading a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("malformed configuration: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("main clock must be non-zero")]
    ZeroClock,
}

impl MachineConfig {
    /// Parse a JSON configuration. Missing fields take their defaults.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.main_clock_hz == 0 {
            return Err(ConfigError::ZeroClock);
        }
        Ok(())
    }

    #[must_use]
    pub const fn master_clock(&self) -> MasterClock {
        MasterClock::new(self.main_clock_hz)
    }

    /// Main CPU T-states per video frame, for the pacing layer.
    #[must_use]
    pub const fn ticks_per_frame(&self, frames_per_second: u64) -> Ticks {
        self.master_clock().ticks_per_frame(frames_per_second)
    }
}

//! Dual-CPU scheduler.
//!
//! Both CPUs run whole instructions in turn: whichever is further behind
//! goes next. Time is compared in weighted units so a slower CPU's T-state
//! counts for more. A CPU about to touch a sync port asks the scheduler
//! (through [`Link`]) whether its partner has caught up; if not, the
//! instruction is abandoned, the partner runs until it reaches that point,
//! and the instruction is retried.
//!
//! # Targets
//!
//! Each call advances both lanes' targets by the requested amount and runs
//! until both have reached them. Overshoot carries into the next call, so
//! over many calls each counter tracks the requested total to within one
//! instruction.

use device_bus::Rendezvous;
use serde::{Deserialize, Serialize};
use zilog_z80::StateError;

/// Layout revision of [`SchedulerState`].
pub const SCHEDULER_STATE_REVISION: u8 = 1;

/// Which CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CpuSel {
    Main,
    Sub,
}

impl CpuSel {
    const ALL: [CpuSel; 2] = [CpuSel::Main, CpuSel::Sub];

    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            CpuSel::Main => 0,
            CpuSel::Sub => 1,
        }
    }

    #[must_use]
    pub const fn partner(self) -> Self {
        match self {
            CpuSel::Main => CpuSel::Sub,
            CpuSel::Sub => CpuSel::Main,
        }
    }
}

/// What the scheduler drives: two CPUs that can be stepped one instruction
/// at a time.
pub trait Processors {
    /// Run one instruction on `cpu`, handing its bus the rendezvous `link`.
    /// Returns the T-states consumed; 0 if the instruction was abandoned.
    fn step(&mut self, cpu: CpuSel, link: Link<'_>) -> u32;

    /// True when `cpu` cannot do anything until an interrupt arrives.
    fn is_idle(&self, cpu: CpuSel) -> bool;

    /// `cpu` was not stepped but is credited with `clocks` own T-states, as
    /// if it had sat in HALT for them.
    fn skip_idle(&mut self, cpu: CpuSel, clocks: u64);
}

#[derive(Debug, Clone, Copy, Default)]
struct Lane {
    /// Own T-states executed.
    clock: u64,
    /// Weighted time this lane should reach. A run cut short by `stop`
    /// leaves it in place, so the lane makes the time up on the next call.
    target: u64,
    /// Weighted time the current run ends; at most `target`.
    end: u64,
    /// Weighted time at which a sync access is waiting for the partner.
    demand: Option<u64>,
    /// Not scheduled this run; never holds the partner back.
    parked: bool,
}

#[derive(Debug, Clone, Copy)]
struct Lanes {
    lane: [Lane; 2],
    weight: [u64; 2],
}

impl Lanes {
    fn time(&self, i: usize) -> u64 {
        self.lane[i].clock * self.weight[i]
    }

    /// Time the partner of `i` is known to reach without further help.
    fn partner_time(&self, i: usize) -> u64 {
        let other = &self.lane[1 - i];
        if other.parked {
            return u64::MAX;
        }
        other.demand.unwrap_or_else(|| self.time(1 - i))
    }

    /// Lane to run next, if any can.
    fn pick(&self) -> Option<usize> {
        let mut best: Option<(u64, bool, usize)> = None;
        for i in 0..2 {
            let me = &self.lane[i];
            if me.parked {
                continue;
            }
            let t = self.time(i);
            let owed = self.lane[1 - i].demand.is_some_and(|d| t < d) && !self.lane[1 - i].parked;
            let key = match me.demand {
                // Waiting: retry only once the partner has caught up.
                Some(d) => {
                    if self.partner_time(i) < d {
                        continue;
                    }
                    d
                }
                None => {
                    if t >= me.end && !owed {
                        continue;
                    }
                    t
                }
            };
            let candidate = (key, me.demand.is_none(), i);
            if best.is_none_or(|b| candidate < b) {
                best = Some(candidate);
            }
        }
        best.map(|(_, _, i)| i)
    }
}

/// Rendezvous handed to the bus of the CPU being stepped.
pub struct Link<'a> {
    lanes: &'a mut Lanes,
    me: usize,
}

impl Rendezvous for Link<'_> {
    fn sync(&mut self, elapsed: u32) -> bool {
        let t = self.lanes.time(self.me) + u64::from(elapsed) * self.lanes.weight[self.me];
        if t <= self.lanes.partner_time(self.me) {
            self.lanes.lane[self.me].demand = None;
            true
        } else {
            tracing::trace!(cpu = self.me, at = t, "sync: waiting for partner");
            self.lanes.lane[self.me].demand = Some(t);
            false
        }
    }

    fn stop(&mut self, clocks: u32) {
        let at = self.lanes.time(self.me) + u64::from(clocks) * self.lanes.weight[self.me];
        let lane = &mut self.lanes.lane[self.me];
        lane.end = lane.end.min(at);
    }
}

/// Saved scheduler counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerState {
    pub rev: u8,
    /// Own T-states, `[main, sub]`.
    pub clocks: [u64; 2],
    /// Weighted targets, `[main, sub]`.
    pub targets: [u64; 2],
    pub weights: [u64; 2],
}

/// Interleaves the main and sub CPUs.
#[derive(Debug, Clone)]
pub struct Scheduler {
    lanes: Lanes,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    #[must_use]
    pub fn new() -> Self {
        Self {
            lanes: Lanes {
                lane: [Lane::default(); 2],
                weight: [1, 1],
            },
        }
    }

    /// T-states `cpu` has executed under this scheduler.
    #[must_use]
    pub fn clock(&self, cpu: CpuSel) -> u64 {
        self.lanes.lane[cpu.index()].clock
    }

    /// Weighted time `cpu` is heading for.
    #[must_use]
    pub fn target(&self, cpu: CpuSel) -> u64 {
        self.lanes.lane[cpu.index()].target
    }

    #[must_use]
    pub fn weights(&self) -> [u64; 2] {
        self.lanes.weight
    }

    /// Run both CPUs at the same rate for `clocks` T-states.
    pub fn exec_dual<P: Processors>(&mut self, sys: &mut P, clocks: u32) -> u64 {
        self.run(sys, clocks, [1, 1], false)
    }

    /// Run with the sub CPU at half the main CPU's rate: the main CPU gets
    /// `clocks` T-states, the sub CPU `clocks / 2`.
    pub fn exec_dual2<P: Processors>(&mut self, sys: &mut P, clocks: u32) -> u64 {
        self.run(sys, clocks, [1, 2], false)
    }

    /// Run only the main CPU. The sub CPU's counter is moved to its target
    /// as if it had run, so switching back to dual mode adds no drift.
    pub fn exec_single<P: Processors>(&mut self, sys: &mut P, clocks: u32) -> u64 {
        let weight = self.lanes.weight;
        self.run(sys, clocks, weight, true)
    }

    fn run<P: Processors>(
        &mut self,
        sys: &mut P,
        clocks: u32,
        weight: [u64; 2],
        single: bool,
    ) -> u64 {
        if weight != self.lanes.weight {
            // Ratio switch: targets restart from where each CPU stands.
            self.lanes.weight = weight;
            for i in 0..2 {
                self.lanes.lane[i].target = self.lanes.time(i);
            }
            tracing::debug!(?weight, "scheduler ratio changed");
        }

        for lane in &mut self.lanes.lane {
            lane.target += u64::from(clocks);
            lane.end = lane.target;
            lane.demand = None;
            lane.parked = false;
        }
        if single {
            let sub = &mut self.lanes.lane[1];
            let caught_up = sub.clock.max(sub.target.div_ceil(weight[1]));
            let skipped = caught_up - sub.clock;
            sub.clock = caught_up;
            sub.parked = true;
            if skipped > 0 {
                sys.skip_idle(CpuSel::Sub, skipped);
            }
        }

        let start = self.lanes.lane[0].clock;
        while let Some(i) = self.lanes.pick() {
            let cpu = CpuSel::ALL[i];
            let cycles = sys.step(cpu, Link { lanes: &mut self.lanes, me: i });
            let lane = &mut self.lanes.lane[i];
            if cycles > 0 {
                lane.clock += u64::from(cycles);
                lane.demand = None;
            } else if lane.demand.is_none() {
                tracing::warn!(?cpu, "step made no progress; ending run");
                lane.end = lane.clock * weight[i];
            }
        }

        for lane in &mut self.lanes.lane {
            lane.demand = None;
            lane.parked = false;
        }
        self.lanes.lane[0].clock - start
    }

    /// Zero the counters.
    pub fn reset(&mut self) {
        let weight = self.lanes.weight;
        *self = Self::new();
        self.lanes.weight = weight;
    }

    #[must_use]
    pub fn save_state(&self) -> SchedulerState {
        SchedulerState {
            rev: SCHEDULER_STATE_REVISION,
            clocks: [self.lanes.lane[0].clock, self.lanes.lane[1].clock],
            targets: [self.lanes.lane[0].target, self.lanes.lane[1].target],
            weights: self.lanes.weight,
        }
    }

    /// Restore counters; the scheduler is untouched on error.
    pub fn load_state(&mut self, state: &SchedulerState) -> Result<(), StateError> {
        if state.rev != SCHEDULER_STATE_REVISION {
            return Err(StateError::Revision {
                component: "scheduler",
                expected: SCHEDULER_STATE_REVISION,
                found: state.rev,
            });
        }
        if state.weights.iter().any(|w| !(1..=2).contains(w)) {
            return Err(StateError::Invalid {
                component: "scheduler",
                field: "weights",
            });
        }
        *self = Self::new();
        self.lanes.weight = state.weights;
        for i in 0..2 {
            self.lanes.lane[i].clock = state.clocks[i];
            self.lanes.lane[i].target = state.targets[i];
        }
        Ok(())
    }
}

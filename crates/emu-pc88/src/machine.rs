//! Top-level machine: two Z80s, their buses and the scheduler.
//!
//! Each CPU has its own memory and I/O bus. Devices live in one shared
//! arena, so a device wired to both buses (the port link) sees both CPUs.
//! At power-on each CPU's address space is backed by 64K of RAM owned by
//! the backstop slot; ROMs are high-priority read overlays on top.

use std::any::Any;

use device_bus::{
    Access, BufferId, Device, DeviceDescriptor, DeviceId, Devices, IoBus, MemoryBus, Owner,
    PAGE_SIZE, SystemBus, Target,
};
use emu_core::{Cpu, Observable, Ticks, Value};
use serde::{Deserialize, Serialize};
use zilog_z80::{StateError, Z80, Z80State};

use crate::config::{ClockRatio, ConfigError, MachineConfig};
use crate::link::PortLink;
use crate::scheduler::{CpuSel, Link, Processors, Scheduler, SchedulerState};

/// Layout revision of [`MachineState`].
pub const MACHINE_STATE_REVISION: u8 = 1;

const RAM_SIZE: usize = 0x10000;

/// Plain memory owner: RAM and ROM images are direct pages, so the device
/// itself never sees an access.
struct Memory {
    descriptor: &'static DeviceDescriptor,
}

static RAM: DeviceDescriptor = DeviceDescriptor {
    name: "ram",
    inputs: &[],
    outputs: &[],
};
static ROM: DeviceDescriptor = DeviceDescriptor {
    name: "rom",
    inputs: &[],
    outputs: &[],
};

impl Device for Memory {
    fn descriptor(&self) -> &'static DeviceDescriptor {
        self.descriptor
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// A ROM overlay mapped by [`Machine::load_rom`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RomHandle {
    cpu: CpuSel,
    owner: Owner,
    device: DeviceId,
}

/// Everything the CPUs touch. Kept apart from the scheduler so both can be
/// borrowed at once.
struct System {
    devices: Devices,
    memory: [MemoryBus; 2],
    io: [IoBus; 2],
    cpus: [Z80; 2],
}

impl Processors for System {
    fn step(&mut self, cpu: CpuSel, link: Link<'_>) -> u32 {
        let i = cpu.index();
        let mut bus =
            SystemBus::new(&mut self.memory[i], &mut self.io[i], &mut self.devices, link);
        self.cpus[i].step(&mut bus)
    }

    fn is_idle(&self, cpu: CpuSel) -> bool {
        let cpu = &self.cpus[cpu.index()];
        cpu.is_halted() && !cpu.int_line() && !cpu.interrupt_pending()
    }

    fn skip_idle(&mut self, cpu: CpuSel, clocks: u64) {
        self.cpus[cpu.index()].advance_idle(Ticks::new(clocks));
    }
}

/// Saved machine: both CPUs, the scheduler, RAM and the port link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineState {
    pub rev: u8,
    pub main: Z80State,
    pub sub: Z80State,
    pub scheduler: SchedulerState,
    pub main_ram: Vec<u8>,
    pub sub_ram: Vec<u8>,
    pub port_link: Option<PortLink>,
}

/// Dual-Z80 machine.
pub struct Machine {
    config: MachineConfig,
    system: System,
    scheduler: Scheduler,
    ram: [BufferId; 2],
    port_link: Option<DeviceId>,
}

impl Machine {
    /// Build a machine with RAM behind both CPUs and nothing else attached.
    pub fn new(config: MachineConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let mut devices = Devices::new();
        let mut memory = [MemoryBus::new(), MemoryBus::new()];
        let mut ram = Vec::with_capacity(2);
        for bus in &mut memory {
            let device = devices.add(Box::new(Memory { descriptor: &RAM }));
            let buffer = bus.add_buffer(vec![0; RAM_SIZE]);
            let Some(owner) = bus.connect(device, false) else {
                unreachable!("a fresh bus has free slots");
            };
            let target = Target::Buffer {
                buffer,
                offset: 0,
                stride: PAGE_SIZE,
            };
            let mapped = bus.alloc(owner, 0, RAM_SIZE, target, Access::ReadWrite);
            debug_assert!(mapped, "backstop RAM covers the whole space");
            ram.push(buffer);
        }

        tracing::info!(
            ratio = ?config.clock_ratio,
            idle_skip = config.idle_skip,
            "machine created"
        );
        Ok(Self {
            config,
            system: System {
                devices,
                memory,
                io: [IoBus::new(), IoBus::new()],
                cpus: [Z80::new(), Z80::new()],
            },
            scheduler: Scheduler::new(),
            ram: [ram[0], ram[1]],
            port_link: None,
        })
    }

    #[must_use]
    pub fn config(&self) -> &MachineConfig {
        &self.config
    }

    // =========================================================================
    // Execution
    // =========================================================================

    /// Run for `clocks` main-CPU T-states and return how far the main CPU
    /// actually got.
    ///
    /// With idle skipping on, a sub CPU parked in HALT with nothing pending
    /// is not stepped.
    pub fn execute(&mut self, clocks: u32) -> u64 {
        if self.config.idle_skip && self.system.is_idle(CpuSel::Sub) {
            return self.scheduler.exec_single(&mut self.system, clocks);
        }
        match self.config.clock_ratio {
            ClockRatio::OneToOne => self.scheduler.exec_dual(&mut self.system, clocks),
            ClockRatio::TwoToOne => self.scheduler.exec_dual2(&mut self.system, clocks),
        }
    }

    /// Power-on reset of both CPUs, every device and the scheduler. Memory
    /// contents survive.
    pub fn reset(&mut self) {
        for cpu in &mut self.system.cpus {
            cpu.reset();
        }
        self.system.devices.reset_all();
        self.scheduler.reset();
        tracing::info!("machine reset");
    }

    pub fn set_int_line(&mut self, cpu: CpuSel, level: bool) {
        self.system.cpus[cpu.index()].set_int_line(level);
    }

    pub fn nmi(&mut self, cpu: CpuSel) {
        self.system.cpus[cpu.index()].nmi();
    }

    #[must_use]
    pub fn cpu(&self, cpu: CpuSel) -> &Z80 {
        &self.system.cpus[cpu.index()]
    }

    pub fn cpu_mut(&mut self, cpu: CpuSel) -> &mut Z80 {
        &mut self.system.cpus[cpu.index()]
    }

    #[must_use]
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    // =========================================================================
    // Memory and devices
    // =========================================================================

    /// Map `bytes` read-only at `addr` for `cpu`, over RAM. Writes still
    /// reach the RAM underneath. Returns `None` for an empty image or when
    /// no priority slot is left.
    pub fn load_rom(&mut self, cpu: CpuSel, addr: u16, bytes: &[u8]) -> Option<RomHandle> {
        if bytes.is_empty() {
            return None;
        }
        let base = usize::from(addr) & !(PAGE_SIZE - 1);
        let lead = usize::from(addr) - base;
        let len = (lead + bytes.len()).min(RAM_SIZE - base);
        let pages = len.div_ceil(PAGE_SIZE);

        let mut image = vec![0xFF; pages * PAGE_SIZE];
        image[lead..len].copy_from_slice(&bytes[..len - lead]);

        let device = self.system.devices.add(Box::new(Memory { descriptor: &ROM }));
        let bus = &mut self.system.memory[cpu.index()];
        let Some(owner) = bus.connect(device, true) else {
            self.system.devices.remove(device);
            return None;
        };
        let buffer = bus.add_buffer(image);
        let target = Target::Buffer {
            buffer,
            offset: 0,
            stride: PAGE_SIZE,
        };
        if !bus.alloc(owner, base as u16, pages * PAGE_SIZE, target, Access::Read) {
            bus.disconnect(owner);
            self.system.devices.remove(device);
            return None;
        }
        tracing::debug!(?cpu, addr, len = bytes.len(), "rom mapped");
        Some(RomHandle { cpu, owner, device })
    }

    /// Take a ROM overlay away, revealing the RAM below.
    pub fn unload_rom(&mut self, rom: RomHandle) {
        self.system.memory[rom.cpu.index()].disconnect(rom.owner);
        self.system.devices.remove(rom.device);
    }

    /// Wire the main/sub port link into both I/O buses. Idempotent.
    pub fn attach_port_link(&mut self) -> DeviceId {
        if let Some(id) = self.port_link {
            return id;
        }
        let id = self.system.devices.add(Box::new(PortLink::new()));
        for cpu in [CpuSel::Main, CpuSel::Sub] {
            let connectors = PortLink::connectors(cpu);
            let wired = self.system.io[cpu.index()].connect(&self.system.devices, id, connectors);
            debug_assert!(wired, "port link connector table matches its descriptor");
        }
        self.port_link = Some(id);
        id
    }

    #[must_use]
    pub fn port_link(&self) -> Option<&PortLink> {
        self.system.devices.downcast(self.port_link?)
    }

    /// Attach an external device; wire it with [`Machine::io_mut`] and
    /// [`Machine::memory_mut`].
    pub fn add_device(&mut self, device: Box<dyn Device>) -> DeviceId {
        self.system.devices.add(device)
    }

    #[must_use]
    pub fn devices(&self) -> &Devices {
        &self.system.devices
    }

    pub fn devices_mut(&mut self) -> &mut Devices {
        &mut self.system.devices
    }

    pub fn memory_mut(&mut self, cpu: CpuSel) -> &mut MemoryBus {
        &mut self.system.memory[cpu.index()]
    }

    /// I/O bus of `cpu` together with the device arena, for wiring.
    pub fn io_mut(&mut self, cpu: CpuSel) -> (&mut IoBus, &Devices) {
        (&mut self.system.io[cpu.index()], &self.system.devices)
    }

    /// Read through `cpu`'s memory map.
    pub fn read(&mut self, cpu: CpuSel, addr: u16) -> u8 {
        self.system.memory[cpu.index()].read(&mut self.system.devices, addr)
    }

    /// Write through `cpu`'s memory map.
    pub fn write(&mut self, cpu: CpuSel, addr: u16, value: u8) {
        self.system.memory[cpu.index()].write(&mut self.system.devices, addr, value);
    }

    /// Copy `data` into `cpu`'s RAM, bypassing overlays.
    pub fn load_ram(&mut self, cpu: CpuSel, addr: u16, data: &[u8]) {
        let ram = self.system.memory[cpu.index()].buffer_mut(self.ram[cpu.index()]);
        for (i, &byte) in data.iter().enumerate() {
            ram[usize::from(addr.wrapping_add(i as u16))] = byte;
        }
    }

    #[must_use]
    pub fn ram(&self, cpu: CpuSel) -> &[u8] {
        self.system.memory[cpu.index()].buffer(self.ram[cpu.index()])
    }

    // =========================================================================
    // Save state
    // =========================================================================

    #[must_use]
    pub fn save_state(&self) -> MachineState {
        MachineState {
            rev: MACHINE_STATE_REVISION,
            main: self.system.cpus[0].save_state(),
            sub: self.system.cpus[1].save_state(),
            scheduler: self.scheduler.save_state(),
            main_ram: self.ram(CpuSel::Main).to_vec(),
            sub_ram: self.ram(CpuSel::Sub).to_vec(),
            port_link: self.port_link().cloned(),
        }
    }

    /// Restore a snapshot. Everything is checked before anything changes,
    /// so on error the machine is exactly as it was.
    pub fn load_state(&mut self, state: &MachineState) -> Result<(), StateError> {
        if state.rev != MACHINE_STATE_REVISION {
            return Err(StateError::Revision {
                component: "machine",
                expected: MACHINE_STATE_REVISION,
                found: state.rev,
            });
        }
        if state.main_ram.len() != RAM_SIZE {
            return Err(StateError::Invalid {
                component: "machine",
                field: "main_ram",
            });
        }
        if state.sub_ram.len() != RAM_SIZE {
            return Err(StateError::Invalid {
                component: "machine",
                field: "sub_ram",
            });
        }
        if state.port_link.is_some() != self.port_link.is_some() {
            return Err(StateError::Invalid {
                component: "machine",
                field: "port_link",
            });
        }

        let mut main = self.system.cpus[0].clone();
        let mut sub = self.system.cpus[1].clone();
        let mut scheduler = self.scheduler.clone();
        main.load_state(&state.main)?;
        sub.load_state(&state.sub)?;
        scheduler.load_state(&state.scheduler)?;

        self.system.cpus = [main, sub];
        self.scheduler = scheduler;
        for (cpu, bytes) in [(CpuSel::Main, &state.main_ram), (CpuSel::Sub, &state.sub_ram)] {
            self.system.memory[cpu.index()]
                .buffer_mut(self.ram[cpu.index()])
                .copy_from_slice(bytes);
        }
        if let (Some(id), Some(saved)) = (self.port_link, &state.port_link) {
            if let Some(link) = self.system.devices.downcast_mut::<PortLink>(id) {
                *link = saved.clone();
            }
        }
        tracing::info!("machine state restored");
        Ok(())
    }
}

impl Observable for Machine {
    fn query(&self, path: &str) -> Option<Value> {
        if let Some(rest) = path.strip_prefix("main.") {
            self.system.cpus[0].query(rest)
        } else if let Some(rest) = path.strip_prefix("sub.") {
            self.system.cpus[1].query(rest)
        } else if let Some(rest) = path.strip_prefix("scheduler.") {
            match rest {
                "main_clock" => Some(self.scheduler.clock(CpuSel::Main).into()),
                "sub_clock" => Some(self.scheduler.clock(CpuSel::Sub).into()),
                "main_target" => Some(self.scheduler.target(CpuSel::Main).into()),
                "sub_target" => Some(self.scheduler.target(CpuSel::Sub).into()),
                "sub_weight" => Some(self.scheduler.weights()[1].into()),
                _ => None,
            }
        } else if let Some(rest) = path.strip_prefix("link.") {
            let link = self.port_link()?;
            match rest {
                "main.data" => Some(link.side(CpuSel::Main).data.into()),
                "main.ctrl" => Some(link.side(CpuSel::Main).ctrl.into()),
                "sub.data" => Some(link.side(CpuSel::Sub).data.into()),
                "sub.ctrl" => Some(link.side(CpuSel::Sub).ctrl.into()),
                _ => None,
            }
        } else {
            None
        }
    }

    fn query_paths(&self) -> &'static [&'static str] {
        &[
            "main.<z80_paths>",
            "sub.<z80_paths>",
            "scheduler.main_clock",
            "scheduler.sub_clock",
            "scheduler.main_target",
            "scheduler.sub_target",
            "scheduler.sub_weight",
            "link.main.data",
            "link.main.ctrl",
            "link.sub.data",
            "link.sub.ctrl",
        ]
    }
}

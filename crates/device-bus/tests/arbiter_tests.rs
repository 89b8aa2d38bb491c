//! Memory arbiter priority behaviour and port chaining through the public API.

use std::any::Any;

use device_bus::{
    Access, BufferId, Connector, Device, DeviceDescriptor, DeviceId, Devices, Direction, IoBus,
    MemoryBus, Owner, PAGE_COUNT, PAGE_SIZE, PageEntry, Target,
};
use proptest::prelude::*;

struct Latch {
    value: u8,
    writes: Vec<(u16, u8)>,
}

static LATCH: DeviceDescriptor = DeviceDescriptor {
    name: "latch",
    inputs: &["status"],
    outputs: &["command"],
};

impl Device for Latch {
    fn descriptor(&self) -> &'static DeviceDescriptor {
        &LATCH
    }

    fn io_in(&mut self, _func: usize, _port: u16) -> u8 {
        self.value
    }

    fn io_out(&mut self, _func: usize, port: u16, value: u8) {
        self.writes.push((port, value));
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

fn latch(value: u8) -> Box<Latch> {
    Box::new(Latch { value, writes: Vec::new() })
}

// -------------------------------------------------------------------------
// Priority invariant
// -------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Op {
    Alloc { owner: usize, first: usize, pages: usize },
    Release { owner: usize, first: usize, pages: usize },
}

fn op() -> impl Strategy<Value = Op> {
    let range = (0usize..4, 0..PAGE_COUNT, 1usize..8);
    prop_oneof![
        range.clone().prop_map(|(owner, first, pages)| Op::Alloc { owner, first, pages }),
        range.prop_map(|(owner, first, pages)| Op::Release { owner, first, pages }),
    ]
}

struct Fixture {
    bus: MemoryBus,
    owners: Vec<Owner>,
    buffers: Vec<BufferId>,
}

/// Four overlay owners in slots 0..4, each with a page buffer of its own.
fn fixture() -> Fixture {
    let mut devices = Devices::new();
    let mut bus = MemoryBus::new();
    let mut owners = Vec::new();
    let mut buffers = Vec::new();
    for i in 0..4u8 {
        let id = devices.add(latch(i));
        owners.push(bus.connect(id, true).expect("free slot"));
        buffers.push(bus.add_buffer(vec![i; PAGE_SIZE]));
    }
    Fixture { bus, owners, buffers }
}

proptest! {
    #[test]
    fn global_owner_is_highest_priority_holder(ops in prop::collection::vec(op(), 1..64)) {
        let Fixture { mut bus, owners, buffers } = fixture();
        // Who holds each page, by owner index.
        let mut model = vec![[false; 4]; PAGE_COUNT];

        for op in ops {
            match op {
                Op::Alloc { owner, first, pages } => {
                    let pages = pages.min(PAGE_COUNT - first);
                    let target = Target::Buffer {
                        buffer: buffers[owner],
                        offset: 0,
                        stride: 0,
                    };
                    let (addr, len) = ((first * PAGE_SIZE) as u16, pages * PAGE_SIZE);
                    prop_assert!(bus.alloc(owners[owner], addr, len, target, Access::Read));
                    for held in &mut model[first..first + pages] {
                        held[owner] = true;
                    }
                }
                Op::Release { owner, first, pages } => {
                    let pages = pages.min(PAGE_COUNT - first);
                    let addr = (first * PAGE_SIZE) as u16;
                    bus.release(owners[owner], addr, pages * PAGE_SIZE, Access::Read);
                    for held in &mut model[first..first + pages] {
                        held[owner] = false;
                    }
                }
            }

            for (page, held) in model.iter().enumerate() {
                let addr = (page * PAGE_SIZE) as u16;
                let expected = held.iter().position(|&h| h);
                prop_assert_eq!(bus.global_owner(addr, Access::Read), expected.map(|i| owners[i]));
                let entry = bus.page(addr, Access::Read);
                match expected {
                    Some(i) => prop_assert_eq!(
                        entry,
                        PageEntry::Direct {
                            buffer: buffers[i],
                            offset: 0,
                        }
                    ),
                    None => prop_assert_eq!(entry, PageEntry::Undefined),
                }
            }
        }
    }
}

#[test]
fn write_grants_are_independent_of_read_grants() {
    let mut devices = Devices::new();
    let id = devices.add(latch(0));
    let mut bus = MemoryBus::new();
    let buf = bus.add_buffer(vec![0x10; PAGE_SIZE]);
    let owner = bus.connect(id, true).expect("free slot");

    let target = Target::Buffer {
        buffer: buf,
        offset: 0,
        stride: 0,
    };
    bus.alloc(owner, 0x2000, PAGE_SIZE, target, Access::Write);
    assert_eq!(bus.page(0x2000, Access::Read), PageEntry::Undefined);
    bus.write(&mut devices, 0x2001, 0x42);
    assert_eq!(bus.read(&mut devices, 0x2001), 0xFF);
    assert_eq!(bus.buffer(buf)[1], 0x42);
}

#[test]
fn disconnect_reveals_lower_priority_mapping() {
    let mut devices = Devices::new();
    let base = devices.add(latch(0));
    let overlay = devices.add(latch(0));
    let mut bus = MemoryBus::new();
    let ram = bus.add_buffer(vec![0xAA; 0x10000]);
    let rom = bus.add_buffer(vec![0xBB; PAGE_SIZE]);
    let low = bus.connect(base, false).expect("free slot");
    let high = bus.connect(overlay, true).expect("free slot");

    let target = Target::Buffer {
        buffer: ram,
        offset: 0,
        stride: PAGE_SIZE,
    };
    bus.alloc(low, 0, 0x10000, target, Access::ReadWrite);
    let target = Target::Buffer {
        buffer: rom,
        offset: 0,
        stride: 0,
    };
    bus.alloc(high, 0x0000, 0x4000, target, Access::ReadWrite);
    assert_eq!(bus.read(&mut devices, 0x3FFF), 0xBB);

    assert!(bus.disconnect(high));
    assert_eq!(bus.read(&mut devices, 0x3FFF), 0xAA);
    assert_eq!(bus.local_page(high, 0x0000, Access::Read), None);

    // The freed slot is handed out again.
    assert_eq!(bus.connect(overlay, true), Some(high));
}

#[test]
fn callback_pages_reach_the_device() {
    struct Mirror([u8; 16]);

    static MIRROR: DeviceDescriptor = DeviceDescriptor {
        name: "mirror",
        inputs: &[],
        outputs: &[],
    };

    impl Device for Mirror {
        fn descriptor(&self) -> &'static DeviceDescriptor {
            &MIRROR
        }

        fn mem_read(&mut self, addr: u16) -> u8 {
            self.0[usize::from(addr & 0x0F)]
        }

        fn mem_write(&mut self, addr: u16, value: u8) {
            self.0[usize::from(addr & 0x0F)] = value;
        }

        fn as_any(&self) -> &dyn Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    let mut devices = Devices::new();
    let id = devices.add(Box::new(Mirror([0; 16])));
    let mut bus = MemoryBus::new();
    let owner = bus.connect(id, true).expect("free slot");
    bus.alloc(owner, 0xF000, 0x1000, Target::Callback, Access::ReadWrite);

    bus.write(&mut devices, 0xF003, 0x77);
    assert_eq!(bus.read(&mut devices, 0xFF13), 0x77);

    // A removed device reads as open bus.
    devices.remove(id);
    assert_eq!(bus.read(&mut devices, 0xF003), 0xFF);
}

// -------------------------------------------------------------------------
// Port chains
// -------------------------------------------------------------------------

fn wire(devices: &mut Devices, io: &mut IoBus, value: u8) -> DeviceId {
    let id = devices.add(latch(value));
    let wiring = [Connector::input(0x31, 0), Connector::output(0x31, 0).synced()];
    assert!(io.connect(devices, id, &wiring));
    id
}

#[test]
fn every_listener_sees_outputs_in_order() {
    let mut devices = Devices::new();
    let mut io = IoBus::new();
    let a = wire(&mut devices, &mut io, 0x0F);
    let b = wire(&mut devices, &mut io, 0xFC);

    io.output(&mut devices, 0x31, 0x12);
    io.output(&mut devices, 0x31, 0x34);
    assert_eq!(io.input(&mut devices, 0x31), 0x0C);

    for id in [a, b] {
        let latch = devices.downcast::<Latch>(id).expect("latch");
        assert_eq!(latch.writes, vec![(0x31, 0x12), (0x31, 0x34)]);
    }
}

#[test]
fn disconnect_leaves_other_listeners() {
    let mut devices = Devices::new();
    let mut io = IoBus::new();
    let a = wire(&mut devices, &mut io, 0x0F);
    let b = wire(&mut devices, &mut io, 0xFC);

    io.disconnect(a);
    assert_eq!(io.chain_len(0x31, Direction::In), 1);
    assert_eq!(io.input(&mut devices, 0x31), 0xFC);
    io.output(&mut devices, 0x31, 0x56);
    assert!(devices.downcast::<Latch>(a).expect("latch").writes.is_empty());
    assert!(io.is_sync(0x31));

    io.disconnect(b);
    assert_eq!(io.input(&mut devices, 0x31), 0xFF);
    assert!(!io.is_sync(0x31));
}

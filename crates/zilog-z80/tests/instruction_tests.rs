//! Unit tests for individual Z80 instructions.
//!
//! Each test loads a short program into a flat bus and checks registers,
//! memory and the T-states `step()` reports.

use emu_core::{Bus, Cpu, SimpleBus};
use zilog_z80::{CF, HF, NF, PF, SF, XF, YF, Z80, ZF};

/// Run CPU until it HALTs, return instruction count.
fn run_until_halt(cpu: &mut Z80, bus: &mut SimpleBus) -> u64 {
    let mut count = 0;
    while !cpu.is_halted() && count < 10000 {
        cpu.step(bus);
        count += 1;
    }
    count
}

/// Load `program` at 0, run until HALT and return the CPU.
fn run(program: &[u8]) -> (Z80, SimpleBus) {
    let mut bus = SimpleBus::new();
    bus.load(0x0000, program);
    let mut cpu = Z80::new();
    run_until_halt(&mut cpu, &mut bus);
    (cpu, bus)
}

/// T-states of the first instruction in `program`.
fn timing(program: &[u8]) -> u32 {
    let mut bus = SimpleBus::new();
    bus.load(0x0000, program);
    let mut cpu = Z80::new();
    cpu.step(&mut bus)
}

#[test]
fn test_nop() {
    let (cpu, _) = run(&[0x00, 0x76]); // NOP, HALT
    assert_eq!(cpu.pc(), 0x0002); // After HALT
}

#[test]
fn test_ld_a_n() {
    let (cpu, _) = run(&[0x3E, 0x42, 0x76]); // LD A, 0x42; HALT
    assert_eq!(cpu.a(), 0x42);
}

#[test]
fn test_ld_bc_nn() {
    let (cpu, _) = run(&[0x01, 0x34, 0x12, 0x76]); // LD BC, 0x1234; HALT
    assert_eq!(cpu.bc(), 0x1234);
}

#[test]
fn test_push_pop_bc() {
    #[rustfmt::skip]
    let (cpu, _) = run(&[
        0x01, 0x34, 0x12,       // LD BC, 0x1234
        0x31, 0x00, 0x80,       // LD SP, 0x8000
        0xC5,                   // PUSH BC
        0x01, 0x00, 0x00,       // LD BC, 0x0000
        0xC1,                   // POP BC
        0x76,                   // HALT
    ]);
    assert_eq!(cpu.bc(), 0x1234);
    assert_eq!(cpu.sp(), 0x8000);
}

#[test]
fn test_push_pop_af_round_trips_flags() {
    #[rustfmt::skip]
    let (cpu, _) = run(&[
        0x31, 0x00, 0x80,       // LD SP, 0x8000
        0x01, 0xD7, 0x12,       // LD BC, 0x12D7
        0xC5,                   // PUSH BC
        0xF1,                   // POP AF
        0x76,                   // HALT
    ]);
    assert_eq!(cpu.a(), 0x12);
    assert_eq!(cpu.f(), 0xD7);
}

#[test]
fn test_add_a_sets_overflow_and_half_carry() {
    // LD A, 0x7F; ADD A, 0x01; HALT
    let (cpu, _) = run(&[0x3E, 0x7F, 0xC6, 0x01, 0x76]);
    assert_eq!(cpu.a(), 0x80);
    assert_eq!(cpu.f(), SF | HF | PF);
}

#[test]
fn test_sub_sets_carry_on_borrow() {
    // LD A, 0x10; SUB 0x20; HALT
    let (cpu, _) = run(&[0x3E, 0x10, 0xD6, 0x20, 0x76]);
    assert_eq!(cpu.a(), 0xF0);
    assert_eq!(cpu.f() & (SF | NF | CF | ZF), SF | NF | CF);
}

#[test]
fn test_inc_preserves_carry() {
    // SCF; LD B, 0xFF; INC B; HALT
    let (cpu, _) = run(&[0x37, 0x06, 0xFF, 0x04, 0x76]);
    assert_eq!(cpu.bc() >> 8, 0x00);
    assert_eq!(cpu.f() & (ZF | HF | CF), ZF | HF | CF);
}

#[test]
fn test_cp_takes_xy_from_operand() {
    // LD A, 0x00; CP 0x28; HALT
    let (cpu, _) = run(&[0x3E, 0x00, 0xFE, 0x28, 0x76]);
    assert_eq!(cpu.a(), 0x00);
    assert_eq!(cpu.f() & (YF | XF), YF | XF);
}

#[test]
fn test_daa_after_add() {
    // LD A, 0x19; ADD A, 0x28; DAA; HALT
    let (cpu, _) = run(&[0x3E, 0x19, 0xC6, 0x28, 0x27, 0x76]);
    assert_eq!(cpu.a(), 0x47);
}

#[test]
fn test_djnz_loop() {
    #[rustfmt::skip]
    let (cpu, _) = run(&[
        0x06, 0x05,             // LD B, 5
        0x3E, 0x00,             // LD A, 0
        0x3C,                   // loop: INC A
        0x10, 0xFD,             // DJNZ loop
        0x76,                   // HALT
    ]);
    assert_eq!(cpu.a(), 5);
    assert_eq!(cpu.bc() >> 8, 0);
}

#[test]
fn test_call_ret() {
    #[rustfmt::skip]
    let (cpu, _) = run(&[
        0x31, 0x00, 0x80,       // LD SP, 0x8000
        0xCD, 0x08, 0x00,       // CALL 0x0008
        0x76,                   // HALT
        0x00,
        0x3E, 0x99,             // 0x0008: LD A, 0x99
        0xC9,                   // RET
    ]);
    assert_eq!(cpu.a(), 0x99);
    assert_eq!(cpu.pc(), 0x0007);
    assert_eq!(cpu.sp(), 0x8000);
}

#[test]
fn test_ix_indexed_load_and_store() {
    #[rustfmt::skip]
    let (cpu, bus) = run(&[
        0xDD, 0x21, 0x00, 0x40, // LD IX, 0x4000
        0xDD, 0x36, 0x05, 0x77, // LD (IX+5), 0x77
        0xDD, 0x7E, 0x05,       // LD A, (IX+5)
        0xDD, 0x34, 0xFF,       // INC (IX-1)
        0x76,                   // HALT
    ]);
    assert_eq!(cpu.ix(), 0x4000);
    assert_eq!(cpu.a(), 0x77);
    assert_eq!(bus.peek(0x4005), 0x77);
    assert_eq!(bus.peek(0x3FFF), 0x01);
}

#[test]
fn test_iy_half_registers() {
    #[rustfmt::skip]
    let (cpu, _) = run(&[
        0xFD, 0x21, 0x34, 0x12, // LD IY, 0x1234
        0xFD, 0x7C,             // LD A, IYH
        0xFD, 0x2C,             // INC IYL
        0x76,                   // HALT
    ]);
    assert_eq!(cpu.a(), 0x12);
    assert_eq!(cpu.iy(), 0x1235);
    assert_eq!(cpu.hl(), 0x0000);
}

#[test]
fn test_indexed_load_uses_real_h() {
    #[rustfmt::skip]
    let (cpu, _) = run(&[
        0xDD, 0x21, 0x00, 0x40, // LD IX, 0x4000
        0xDD, 0x66, 0x00,       // LD H, (IX+0)
        0x76,                   // HALT
    ]);
    // Memory at 0x4000 is zero; H is written, IXH is not.
    assert_eq!(cpu.ix(), 0x4000);
    assert_eq!(cpu.hl(), 0x0000);
}

#[test]
fn test_ddcb_set_copies_into_register() {
    #[rustfmt::skip]
    let (cpu, bus) = run(&[
        0xDD, 0x21, 0x00, 0x50, // LD IX, 0x5000
        0xDD, 0xCB, 0x02, 0xC0, // SET 0, (IX+2), B
        0x76,                   // HALT
    ]);
    assert_eq!(bus.peek(0x5002), 0x01);
    assert_eq!(cpu.bc() >> 8, 0x01);
}

#[test]
fn test_cb_rotate_and_bit() {
    #[rustfmt::skip]
    let (cpu, _) = run(&[
        0x06, 0x81,             // LD B, 0x81
        0xCB, 0x00,             // RLC B
        0xCB, 0x40,             // BIT 0, B
        0x76,                   // HALT
    ]);
    assert_eq!(cpu.bc() >> 8, 0x03);
    // BIT leaves carry from RLC and clears Z for a set bit.
    assert_eq!(cpu.f() & (ZF | CF | HF), CF | HF);
}

#[test]
fn test_ldir_copies_block() {
    let mut bus = SimpleBus::new();
    #[rustfmt::skip]
    bus.load(0x0000, &[
        0x21, 0x00, 0x10,       // LD HL, 0x1000
        0x11, 0x00, 0x20,       // LD DE, 0x2000
        0x01, 0x04, 0x00,       // LD BC, 4
        0xED, 0xB0,             // LDIR
        0x76,                   // HALT
    ]);
    bus.load(0x1000, &[1, 2, 3, 4]);
    let mut cpu = Z80::new();
    run_until_halt(&mut cpu, &mut bus);

    for i in 0..4 {
        assert_eq!(bus.peek(0x2000 + i), (i + 1) as u8);
    }
    assert_eq!(cpu.bc(), 0);
    assert_eq!(cpu.hl(), 0x1004);
    assert_eq!(cpu.de(), 0x2004);
    assert_eq!(cpu.f() & PF, 0);
}

#[test]
fn test_ldir_iterations_rewind_pc() {
    let mut bus = SimpleBus::new();
    // LD BC, 2; LDIR
    bus.load(0x0000, &[0x01, 0x02, 0x00, 0xED, 0xB0]);
    let mut cpu = Z80::new();
    cpu.step(&mut bus);

    assert_eq!(cpu.step(&mut bus), 21);
    assert_eq!(cpu.pc(), 0x0003);
    assert_eq!(cpu.step(&mut bus), 16);
    assert_eq!(cpu.pc(), 0x0005);
}

#[test]
fn test_cpir_stops_on_match() {
    let mut bus = SimpleBus::new();
    #[rustfmt::skip]
    bus.load(0x0000, &[
        0x21, 0x00, 0x10,       // LD HL, 0x1000
        0x01, 0x10, 0x00,       // LD BC, 16
        0x3E, 0x33,             // LD A, 0x33
        0xED, 0xB1,             // CPIR
        0x76,                   // HALT
    ]);
    bus.load(0x1000, &[0x11, 0x22, 0x33, 0x44]);
    let mut cpu = Z80::new();
    run_until_halt(&mut cpu, &mut bus);

    assert_eq!(cpu.hl(), 0x1003);
    assert_eq!(cpu.bc(), 13);
    assert_eq!(cpu.f() & (ZF | PF | NF), ZF | PF | NF);
}

#[test]
fn test_otir_outputs_block() {
    let mut bus = SimpleBus::new();
    #[rustfmt::skip]
    bus.load(0x0000, &[
        0x21, 0x00, 0x10,       // LD HL, 0x1000
        0x01, 0x42, 0x03,       // LD BC, 0x0342
        0xED, 0xB3,             // OTIR
        0x76,                   // HALT
    ]);
    bus.load(0x1000, &[0xA, 0xB, 0xC]);
    let mut cpu = Z80::new();
    run_until_halt(&mut cpu, &mut bus);

    assert_eq!(bus.io_writes, vec![(0x0242, 0xA), (0x0142, 0xB), (0x0042, 0xC)]);
    assert_eq!(cpu.f() & ZF, ZF);
}

#[test]
fn test_in_r_c_sets_flags() {
    let mut bus = SimpleBus::new();
    // LD BC, 0x0010; IN D, (C); HALT
    bus.load(0x0000, &[0x01, 0x10, 0x00, 0xED, 0x50, 0x76]);
    bus.set_port(0x10, 0x00);
    let mut cpu = Z80::new();
    run_until_halt(&mut cpu, &mut bus);

    assert_eq!(cpu.de() >> 8, 0x00);
    assert_eq!(cpu.f() & (ZF | PF | SF), ZF | PF);
}

#[test]
fn test_out_n_a_uses_a_as_high_byte() {
    // LD A, 0x5A; OUT (0xFE), A; HALT
    let (_, bus) = run(&[0x3E, 0x5A, 0xD3, 0xFE, 0x76]);
    assert_eq!(bus.io_writes, vec![(0x5AFE, 0x5A)]);
}

#[test]
fn test_ex_af_and_exx() {
    #[rustfmt::skip]
    let (cpu, _) = run(&[
        0x21, 0x11, 0x11,       // LD HL, 0x1111
        0xD9,                   // EXX
        0x21, 0x22, 0x22,       // LD HL, 0x2222
        0xD9,                   // EXX
        0x3E, 0x01,             // LD A, 1
        0x08,                   // EX AF, AF'
        0x3E, 0x02,             // LD A, 2
        0x08,                   // EX AF, AF'
        0x76,                   // HALT
    ]);
    assert_eq!(cpu.hl(), 0x1111);
    assert_eq!(cpu.a(), 0x01);
    assert_eq!(cpu.registers().a_alt, 0x02);
}

#[test]
fn test_rld_rotates_digits() {
    let mut bus = SimpleBus::new();
    // LD HL, 0x1000; LD A, 0x7A; RLD; HALT
    bus.load(0x0000, &[0x21, 0x00, 0x10, 0x3E, 0x7A, 0xED, 0x6F, 0x76]);
    bus.load(0x1000, &[0x31]);
    let mut cpu = Z80::new();
    run_until_halt(&mut cpu, &mut bus);

    assert_eq!(cpu.a(), 0x73);
    assert_eq!(bus.peek(0x1000), 0x1A);
}

#[test]
fn test_sbc_hl_sets_zero() {
    #[rustfmt::skip]
    let (cpu, _) = run(&[
        0x21, 0x00, 0x10,       // LD HL, 0x1000
        0x11, 0x00, 0x10,       // LD DE, 0x1000
        0xB7,                   // OR A (clear carry)
        0xED, 0x52,             // SBC HL, DE
        0x76,                   // HALT
    ]);
    assert_eq!(cpu.hl(), 0);
    assert_eq!(cpu.f() & (ZF | NF | CF), ZF | NF);
}

#[test]
fn test_instruction_timings() {
    assert_eq!(timing(&[0x00]), 4); // NOP
    assert_eq!(timing(&[0x01, 0, 0]), 10); // LD BC, nn
    assert_eq!(timing(&[0x7E]), 7); // LD A, (HL)
    assert_eq!(timing(&[0x34]), 11); // INC (HL)
    assert_eq!(timing(&[0xDD, 0x7E, 0x00]), 19); // LD A, (IX+d)
    assert_eq!(timing(&[0xDD, 0x36, 0x00, 0x00]), 19); // LD (IX+d), n
    assert_eq!(timing(&[0xDD, 0x34, 0x00]), 23); // INC (IX+d)
    assert_eq!(timing(&[0xDD, 0x21, 0, 0]), 14); // LD IX, nn
    assert_eq!(timing(&[0xDD, 0xE5]), 15); // PUSH IX
    assert_eq!(timing(&[0xCB, 0x00]), 8); // RLC B
    assert_eq!(timing(&[0xCB, 0x46]), 12); // BIT 0, (HL)
    assert_eq!(timing(&[0xCB, 0xC6]), 15); // SET 0, (HL)
    assert_eq!(timing(&[0xDD, 0xCB, 0x00, 0x46]), 20); // BIT 0, (IX+d)
    assert_eq!(timing(&[0xDD, 0xCB, 0x00, 0x06]), 23); // RLC (IX+d)
    assert_eq!(timing(&[0xCD, 0, 0]), 17); // CALL nn
    assert_eq!(timing(&[0xC7]), 11); // RST 0
    assert_eq!(timing(&[0xED, 0x44]), 8); // NEG
    assert_eq!(timing(&[0xED, 0x4B, 0, 0]), 20); // LD BC, (nn)
    assert_eq!(timing(&[0xED, 0x67]), 18); // RRD
    assert_eq!(timing(&[0xED, 0x00]), 8); // undefined ED
    assert_eq!(timing(&[0xE3]), 19); // EX (SP), HL
    assert_eq!(timing(&[0xDB, 0x00]), 11); // IN A, (n)
}

#[test]
fn test_conditional_timings() {
    // Z is set after reset (F = 0xFF).
    assert_eq!(timing(&[0x20, 0x00]), 7); // JR NZ not taken
    assert_eq!(timing(&[0x28, 0x00]), 12); // JR Z taken
    assert_eq!(timing(&[0xC0]), 5); // RET NZ not taken
    assert_eq!(timing(&[0xC8]), 11); // RET Z taken
    assert_eq!(timing(&[0xC4, 0, 0]), 10); // CALL NZ not taken
    assert_eq!(timing(&[0xCC, 0, 0]), 17); // CALL Z taken
}

#[test]
fn test_doubled_prefix_ends_step() {
    let mut bus = SimpleBus::new();
    // DD FD 21 34 12: only LD IY, 0x1234 takes effect
    bus.load(0x0000, &[0xDD, 0xFD, 0x21, 0x34, 0x12]);
    let mut cpu = Z80::new();

    assert_eq!(cpu.step(&mut bus), 4);
    assert_eq!(cpu.pc(), 0x0001);
    assert_eq!(cpu.step(&mut bus), 14);
    assert_eq!(cpu.iy(), 0x1234);
    assert_eq!(cpu.ix(), 0x0000);
}

#[test]
fn test_prefix_before_ed_is_ignored() {
    let mut bus = SimpleBus::new();
    // LD HL, 0x0005; DD ED 6A (ADC HL, HL acts on HL)
    bus.load(0x0000, &[0x21, 0x05, 0x00, 0xB7, 0xDD, 0xED, 0x6A]);
    let mut cpu = Z80::new();
    cpu.step(&mut bus);
    cpu.step(&mut bus);
    assert_eq!(cpu.step(&mut bus), 19);
    assert_eq!(cpu.hl(), 0x000A);
    assert_eq!(cpu.ix(), 0x0000);
}

#[test]
fn test_r_register_counts_m1_cycles() {
    let mut bus = SimpleBus::new();
    // NOP; LD IX, 0; RLC B; 3 fetches so far plus 2 + 2
    bus.load(0x0000, &[0x00, 0xDD, 0x21, 0x00, 0x00, 0xCB, 0x00]);
    let mut cpu = Z80::new();
    for _ in 0..3 {
        cpu.step(&mut bus);
    }
    assert_eq!(cpu.registers().r, 5);
}

/// Bus whose port 0x10 is a sync port that refuses the first `refusals`
/// rendezvous attempts.
struct RefusingBus {
    inner: SimpleBus,
    refusals: u32,
    elapsed: Vec<u32>,
}

impl Bus for RefusingBus {
    fn read(&mut self, address: u16) -> u8 {
        self.inner.read(address)
    }

    fn write(&mut self, address: u16, value: u8) {
        self.inner.write(address, value);
    }

    fn io_read(&mut self, port: u16) -> u8 {
        self.inner.io_read(port)
    }

    fn io_write(&mut self, port: u16, value: u8) {
        self.inner.io_write(port, value);
    }

    fn is_sync_port(&self, port: u16) -> bool {
        port & 0xFF == 0x10
    }

    fn sync(&mut self, elapsed: u32) -> bool {
        self.elapsed.push(elapsed);
        if self.refusals == 0 {
            return true;
        }
        self.refusals -= 1;
        false
    }
}

#[test]
fn test_refused_sync_rolls_back_instruction() {
    let mut inner = SimpleBus::new();
    // LD A, 0x99; OUT (0x10), A; HALT
    inner.load(0x0000, &[0x3E, 0x99, 0xD3, 0x10, 0x76]);
    let mut bus = RefusingBus { inner, refusals: 2, elapsed: Vec::new() };
    let mut cpu = Z80::new();
    cpu.step(&mut bus);
    let r_before = cpu.registers().r;
    let ticks_before = cpu.total_ticks();

    assert_eq!(cpu.step(&mut bus), 0);
    assert_eq!(cpu.pc(), 0x0002);
    assert_eq!(cpu.registers().r, r_before);
    assert_eq!(cpu.total_ticks(), ticks_before);
    assert_eq!(cpu.step(&mut bus), 0);

    assert_eq!(cpu.step(&mut bus), 11);
    assert_eq!(cpu.pc(), 0x0004);
    assert_eq!(bus.inner.io_writes, vec![(0x9910, 0x99)]);
    assert_eq!(bus.elapsed, vec![7, 7, 7]);
}

#[test]
fn test_refused_sync_inside_block_output_keeps_state() {
    let mut inner = SimpleBus::new();
    // LD HL, 0x1000; LD BC, 0x0210; OUTI
    inner.load(0x0000, &[0x21, 0x00, 0x10, 0x01, 0x10, 0x02, 0xED, 0xA3]);
    inner.load(0x1000, &[0x5C]);
    let mut bus = RefusingBus { inner, refusals: 1, elapsed: Vec::new() };
    let mut cpu = Z80::new();
    cpu.step(&mut bus);
    cpu.step(&mut bus);

    assert_eq!(cpu.step(&mut bus), 0);
    assert_eq!(cpu.bc(), 0x0210);
    assert_eq!(cpu.hl(), 0x1000);

    assert_eq!(cpu.step(&mut bus), 16);
    assert_eq!(cpu.bc(), 0x0110);
    assert_eq!(cpu.hl(), 0x1001);
    assert_eq!(bus.inner.io_writes, vec![(0x0110, 0x5C)]);
}

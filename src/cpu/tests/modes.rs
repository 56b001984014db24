//! Mode, banking, PSR and exception tests
//!
//! Bank-switch round trips, FIQ shadow registers, SPSR semantics,
//! exception entry/return sequences, priorities, and the pending-flag
//! aggregate invariant.

use proptest::prelude::*;

use super::*;
use crate::cpu::psr;

const ALL_MODES: [Mode; 7] = [
    Mode::User,
    Mode::Fiq,
    Mode::Irq,
    Mode::Supervisor,
    Mode::Abort,
    Mode::Undefined,
    Mode::System,
];

#[test]
fn test_mode_field_codec() {
    for mode in ALL_MODES {
        assert_eq!(Mode::from_bits(mode.bits()), Some(mode));
    }
    assert_eq!(Mode::from_bits(0x00), None);
    assert_eq!(Mode::from_bits(0x16), None);
}

#[test]
fn test_user_and_system_share_all_registers() {
    let mut rf = RegisterFile::new();
    rf.switch_mode(Mode::User);
    for r in 0..15 {
        rf.write(r, 0x100 + r as u32);
    }
    rf.switch_mode(Mode::System);
    for r in 0..15 {
        assert_eq!(rf.read(r), 0x100 + r as u32);
    }
}

#[test]
fn test_fiq_banks_r8_to_r14() {
    let mut rf = RegisterFile::new();
    rf.switch_mode(Mode::User);
    for r in 8..15 {
        rf.write(r, 0xA00 + r as u32);
    }
    rf.switch_mode(Mode::Fiq);
    for r in 8..15 {
        rf.write(r, 0xB00 + r as u32);
    }
    // R0..R7 shared, R8..R14 banked.
    rf.switch_mode(Mode::User);
    for r in 8..15 {
        assert_eq!(rf.read(r), 0xA00 + r as u32);
    }
    rf.switch_mode(Mode::Fiq);
    for r in 8..15 {
        assert_eq!(rf.read(r), 0xB00 + r as u32);
    }
}

#[test]
fn test_exception_modes_bank_r13_r14_only() {
    let mut rf = RegisterFile::new();
    rf.switch_mode(Mode::User);
    rf.write(12, 0x12);
    rf.write(13, 0x13);
    rf.write(14, 0x14);
    for mode in [Mode::Irq, Mode::Supervisor, Mode::Abort, Mode::Undefined] {
        rf.switch_mode(mode);
        assert_eq!(rf.read(12), 0x12, "R12 shared with {mode:?}");
        rf.write(13, 0x1300 + mode.bank() as u32);
        rf.write(14, 0x1400 + mode.bank() as u32);
    }
    rf.switch_mode(Mode::User);
    assert_eq!(rf.read(13), 0x13);
    assert_eq!(rf.read(14), 0x14);
    for mode in [Mode::Irq, Mode::Supervisor, Mode::Abort, Mode::Undefined] {
        rf.switch_mode(mode);
        assert_eq!(rf.read(13), 0x1300 + mode.bank() as u32);
        assert_eq!(rf.read(14), 0x1400 + mode.bank() as u32);
    }
}

proptest! {
    /// switch(m1); write(r, v); switch(m2); switch(m1); read(r) == v.
    #[test]
    fn prop_bank_round_trip(m1 in 0usize..7, m2 in 0usize..7, r in 0usize..15, v: u32) {
        let mut rf = RegisterFile::new();
        rf.switch_mode(ALL_MODES[m1]);
        rf.write(r, v);
        rf.switch_mode(ALL_MODES[m2]);
        rf.switch_mode(ALL_MODES[m1]);
        prop_assert_eq!(rf.read(r), v);
    }

    /// pending_any always equals the disjunction of the flags.
    #[test]
    fn prop_pending_any_aggregate(ops in prop::collection::vec((0u8..6, any::<bool>()), 0..32)) {
        let mut pending = Pending::default();
        for (which, state) in ops {
            let exc = match which {
                0 => Exception::Irq,
                1 => Exception::Fiq,
                2 => Exception::DataAbort,
                3 => Exception::PrefetchAbort,
                4 => Exception::Undefined,
                _ => Exception::Swi,
            };
            pending.set(exc, state);
            let expect = pending.irq
                || pending.fiq
                || pending.data_abort
                || pending.prefetch_abort
                || pending.undefined
                || pending.swi;
            prop_assert_eq!(pending.any, expect);
        }
    }
}

#[test]
fn test_spsr_read_in_user_falls_back_to_cpsr() {
    let (mut cpu, _mem) = arm7();
    cpu.write_cpsr((cpu.cpsr().raw() & !psr::MODE_MASK) | Mode::User.bits());
    assert_eq!(cpu.regs().spsr(), cpu.cpsr());
}

#[test]
fn test_irq_entry_sequence() {
    let (mut cpu, mut mem) = arm7();
    // Unmask IRQ, park at 0x100.
    cpu.write_cpsr(cpu.cpsr().raw() & !psr::I);
    cpu.regs_mut().set_pc(0x100);
    load_program(&mut mem, 0x100, &[0xE1A0_0000]); // NOP (MOV R0, R0)
    let old_cpsr = cpu.cpsr();

    cpu.set_input_line(InputLine::Irq, true);
    cpu.step(&mut mem);

    assert_eq!(cpu.mode(), Mode::Irq);
    assert_eq!(cpu.pc(), 0x18, "IRQ vector");
    assert_eq!(cpu.read_reg(REG_LR), 0x104, "LR = interrupted insn + 4");
    assert_eq!(cpu.regs().spsr(), old_cpsr);
    assert!(cpu.cpsr().irq_disabled());
    assert!(!cpu.cpsr().fiq_disabled(), "IRQ entry leaves F alone");
    assert!(!cpu.pending().irq, "latch cleared after service");
}

#[test]
fn test_fiq_entry_masks_both() {
    let (mut cpu, mut mem) = arm7();
    cpu.write_cpsr(cpu.cpsr().raw() & !(psr::I | psr::F));
    cpu.regs_mut().set_pc(0x100);
    cpu.set_input_line(InputLine::Fiq, true);
    cpu.step(&mut mem);
    assert_eq!(cpu.mode(), Mode::Fiq);
    assert_eq!(cpu.pc(), 0x1C);
    assert!(cpu.cpsr().irq_disabled());
    assert!(cpu.cpsr().fiq_disabled());
}

#[test]
fn test_masked_irq_stays_pending() {
    let (mut cpu, mut mem) = arm7();
    // Reset leaves I set.
    load_program(&mut mem, 0, &[0xE1A0_0000]);
    cpu.set_input_line(InputLine::Irq, true);
    cpu.step(&mut mem);
    assert_eq!(cpu.mode(), Mode::Supervisor, "masked IRQ not taken");
    assert!(cpu.pending().irq);
    assert_eq!(cpu.pc(), 4, "the NOP executed instead");
}

#[test]
fn test_exception_priority_data_abort_over_fiq() {
    let (mut cpu, mut mem) = arm7();
    cpu.write_cpsr(cpu.cpsr().raw() & !(psr::I | psr::F));
    cpu.set_input_line(InputLine::Fiq, true);
    cpu.set_input_line(InputLine::AbortData, true);
    cpu.step(&mut mem);
    assert_eq!(cpu.mode(), Mode::Abort, "data abort outranks FIQ");
    // FIQ is masked by the abort entry (I only), so it fires next.
    cpu.write_cpsr(cpu.cpsr().raw() & !psr::F);
    cpu.step(&mut mem);
    assert_eq!(cpu.mode(), Mode::Fiq);
}

#[test]
fn test_fiq_bank_scenario() {
    // User R8 = 0xAAAA; FIQ writes R8 = 0xBBBB; return via
    // SUBS PC, LR, #4 restores User and its R8.
    let (mut cpu, mut mem) = arm7();

    // Start in User at 0x100 with IRQ/FIQ enabled.
    cpu.write_cpsr((cpu.cpsr().raw() & !(psr::MODE_MASK | psr::I | psr::F)) | Mode::User.bits());
    cpu.regs_mut().set_pc(0x100);
    cpu.regs_mut().write(8, 0xAAAA);
    load_program(&mut mem, 0x100, &[0xE1A0_0000, 0xE1A0_0000]);
    // FIQ handler at 0x1C: set R8, return with SUBS PC, LR, #4.
    load_program(
        &mut mem,
        0x1C,
        &[
            0xE3A0_8CBB, // MOV R8, #0xBB00
            0xE25E_F004, // SUBS PC, LR, #4
        ],
    );

    cpu.set_input_line(InputLine::Fiq, true);
    cpu.step(&mut mem); // take FIQ
    assert_eq!(cpu.mode(), Mode::Fiq);
    cpu.step(&mut mem); // MOV R8_fiq
    assert_eq!(cpu.read_reg(8), 0xBB00);
    cpu.step(&mut mem); // SUBS PC, LR, #4

    assert_eq!(cpu.mode(), Mode::User, "SPSR restore returns to User");
    assert_eq!(cpu.pc(), 0x100, "returns to the interrupted insn");
    assert_eq!(cpu.read_reg(8), 0xAAAA, "user R8 untouched");
    assert_eq!(cpu.regs().read_of(Mode::Fiq, 8), 0xBB00, "FIQ R8 retained");
}

#[test]
fn test_subs_pc_lr_restores_cpsr() {
    let (mut cpu, mut mem) = arm7();
    cpu.regs_mut().set_pc(0x100);
    load_program(&mut mem, 0x100, &[0xEF00_0000]); // SWI
    cpu.step(&mut mem);
    cpu.step(&mut mem); // enter Supervisor via SWI
    assert_eq!(cpu.mode(), Mode::Supervisor);
    let spsr = cpu.regs().spsr();

    // MOVS PC, LR returns to the caller and restores CPSR.
    load_program(&mut mem, 0x08, &[0xE1B0_F00E]);
    cpu.step(&mut mem);
    assert_eq!(cpu.pc(), 0x104);
    assert_eq!(cpu.cpsr(), spsr);
}

#[test]
fn test_ldm_user_bank_with_writeback() {
    // LDM SP!, {R0}^ in IRQ mode: base, transfer and writeback all use
    // the user bank.
    let (mut cpu, mut mem) = arm7();
    cpu.regs_mut().switch_mode(Mode::User);
    cpu.regs_mut().write(REG_SP, 0x1000);
    cpu.regs_mut().switch_mode(Mode::Irq);
    cpu.regs_mut().write(REG_SP, 0x2000);
    cpu.write_cpsr((cpu.cpsr().raw() & !psr::MODE_MASK) | Mode::Irq.bits());

    mem.poke_word(0x1000, 0x7777);
    load_program(&mut mem, 0x100, &[0xE8FD_0001]); // LDM SP!, {R0}^
    cpu.regs_mut().set_pc(0x100);
    cpu.step(&mut mem);

    assert_eq!(cpu.read_reg(0), 0x7777, "loaded through user R13");
    assert_eq!(
        cpu.regs().read_of(Mode::User, REG_SP),
        0x1004,
        "writeback goes to the user bank"
    );
    assert_eq!(cpu.read_reg(REG_SP), 0x2000, "IRQ R13 untouched");
}

#[test]
fn test_stm_user_bank() {
    // STM with S from FIQ mode stores user R8..R12.
    let (mut cpu, mut mem) = arm7();
    cpu.regs_mut().switch_mode(Mode::User);
    cpu.regs_mut().write(8, 0x1111);
    cpu.regs_mut().switch_mode(Mode::Fiq);
    cpu.regs_mut().write(8, 0x2222);
    cpu.regs_mut().write(0, 0x3000);
    cpu.write_cpsr((cpu.cpsr().raw() & !psr::MODE_MASK) | Mode::Fiq.bits());

    load_program(&mut mem, 0x100, &[0xE8C0_0100]); // STMIA R0, {R8}^
    cpu.regs_mut().set_pc(0x100);
    cpu.step(&mut mem);
    assert_eq!(mem.read_word(0x3000), 0x1111, "user R8, not the FIQ copy");
}

#[test]
fn test_host_injected_data_abort() {
    let (mut cpu, mut mem) = arm7();
    cpu.regs_mut().set_pc(0x100);
    cpu.set_input_line(InputLine::AbortData, true);
    cpu.step(&mut mem);
    assert_eq!(cpu.mode(), Mode::Abort);
    // No instruction faulted, so the capture is relative to the
    // next-fetch PC.
    assert_eq!(cpu.read_reg(REG_LR), 0x104);
    assert_eq!(cpu.pc(), 0x10);
}

#[test]
fn test_high_vectors() {
    let (mut cpu, mut mem) = arm7();
    cpu.cp15_write(1, 0, 0, Control::VECTORS.bits());
    cpu.regs_mut().set_pc(0x100);
    load_program(&mut mem, 0x100, &[0xEF00_0000]);
    cpu.step(&mut mem);
    cpu.step(&mut mem);
    assert_eq!(cpu.pc(), 0xFFFF_0008, "SWI vector at the high base");
}

#[test]
fn test_mode_switch_keeps_cpsr_view_invariant() {
    let (mut cpu, _mem) = arm7();
    for mode in ALL_MODES {
        cpu.write_cpsr((cpu.cpsr().raw() & !psr::MODE_MASK) | mode.bits());
        assert_eq!(cpu.cpsr().mode(), Some(mode));
        assert_eq!(cpu.mode(), mode, "view follows the CPSR mode field");
    }
}

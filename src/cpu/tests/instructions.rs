//! ARM instruction tests
//!
//! Data processing and the shifter, multiplies, single and block
//! transfers with their architectural quirks (misaligned-load
//! rotation, base-writeback ordering, user-bank transfers), branches,
//! PSR transfers, swap, and the v5/v5TE extensions.

use super::*;

#[test]
fn test_mov_immediate_rotated() {
    // MOV R1, #0x80000000 (imm 0x02 ror 2), S clear: flags untouched.
    let (mut cpu, mut mem) = arm7();
    load_program(&mut mem, 0, &[0xE3A0_1102]);
    cpu.step(&mut mem);
    assert_eq!(cpu.read_reg(1), 0x8000_0000);
    assert!(!cpu.cpsr().n(), "S clear must leave N alone");
    assert_eq!(cpu.pc(), 4);
}

#[test]
fn test_movs_sets_nz() {
    let (mut cpu, mut mem) = arm7();
    load_program(
        &mut mem,
        0,
        &[
            0xE3B0_0000, // MOVS R0, #0
            0xE3B0_1102, // MOVS R1, #0x80000000
        ],
    );
    cpu.step(&mut mem);
    assert!(cpu.cpsr().z());
    cpu.step(&mut mem);
    assert!(cpu.cpsr().n());
    assert!(!cpu.cpsr().z());
}

#[test]
fn test_add_carry_and_overflow() {
    let (mut cpu, mut mem) = arm7();
    // ADDS R2, R0, R1 twice with different operands.
    load_program(&mut mem, 0, &[0xE090_2001, 0xE090_2001]);
    cpu.regs_mut().write(0, 0xFFFF_FFFF);
    cpu.regs_mut().write(1, 1);
    cpu.step(&mut mem);
    assert_eq!(cpu.read_reg(2), 0);
    assert!(cpu.cpsr().c(), "unsigned carry out");
    assert!(cpu.cpsr().z());
    assert!(!cpu.cpsr().v());

    cpu.regs_mut().write(0, 0x7FFF_FFFF);
    cpu.regs_mut().write(1, 1);
    cpu.step(&mut mem);
    assert_eq!(cpu.read_reg(2), 0x8000_0000);
    assert!(cpu.cpsr().v(), "signed overflow");
    assert!(cpu.cpsr().n());
    assert!(!cpu.cpsr().c());
}

#[test]
fn test_subs_borrow_semantics() {
    let (mut cpu, mut mem) = arm7();
    load_program(&mut mem, 0, &[0xE050_2001, 0xE050_2001]); // SUBS R2, R0, R1
    cpu.regs_mut().write(0, 5);
    cpu.regs_mut().write(1, 3);
    cpu.step(&mut mem);
    assert_eq!(cpu.read_reg(2), 2);
    assert!(cpu.cpsr().c(), "no borrow sets C");

    cpu.regs_mut().write(0, 3);
    cpu.regs_mut().write(1, 5);
    cpu.step(&mut mem);
    assert_eq!(cpu.read_reg(2), 0xFFFF_FFFE);
    assert!(!cpu.cpsr().c(), "borrow clears C");
    assert!(cpu.cpsr().n());
}

#[test]
fn test_adc_uses_carry() {
    let (mut cpu, mut mem) = arm7();
    // CMP R0, R0 seeds C=1 (no borrow), then ADC R2, R0, R1.
    load_program(&mut mem, 0, &[0xE150_0000, 0xE0A0_2001]);
    cpu.regs_mut().write(0, 10);
    cpu.regs_mut().write(1, 5);
    run(&mut cpu, &mut mem, 2);
    assert_eq!(cpu.read_reg(2), 16, "10 + 5 + carry");
}

#[test]
fn test_shifter_carry_out_lsl() {
    let (mut cpu, mut mem) = arm7();
    // MOVS R1, R0, LSL #1 with bit 31 set: carry out = old bit 31.
    load_program(&mut mem, 0, &[0xE1B0_1080]);
    cpu.regs_mut().write(0, 0x8000_0001);
    cpu.step(&mut mem);
    assert_eq!(cpu.read_reg(1), 2);
    assert!(cpu.cpsr().c());
}

#[test]
fn test_shifter_lsr_32_immediate_encoding() {
    let (mut cpu, mut mem) = arm7();
    // MOVS R1, R0, LSR #32 (encoded as LSR #0): result 0, C = bit 31.
    load_program(&mut mem, 0, &[0xE1B0_1020]);
    cpu.regs_mut().write(0, 0x8000_0000);
    cpu.step(&mut mem);
    assert_eq!(cpu.read_reg(1), 0);
    assert!(cpu.cpsr().c());
    assert!(cpu.cpsr().z());
}

#[test]
fn test_shifter_rrx() {
    let (mut cpu, mut mem) = arm7();
    // CMP R0,R0 to set C, then MOVS R1, R0, RRX.
    load_program(&mut mem, 0, &[0xE150_0000, 0xE1B0_1060]);
    cpu.regs_mut().write(0, 2);
    run(&mut cpu, &mut mem, 2);
    assert_eq!(cpu.read_reg(1), 0x8000_0001, "carry rotates into bit 31");
}

#[test]
fn test_shift_by_register_amount() {
    let (mut cpu, mut mem) = arm7();
    // MOV R1, R0, LSL R2
    load_program(&mut mem, 0, &[0xE1A0_1210]);
    cpu.regs_mut().write(0, 1);
    cpu.regs_mut().write(2, 8);
    cpu.step(&mut mem);
    assert_eq!(cpu.read_reg(1), 0x100);
}

#[test]
fn test_condition_false_costs_one_cycle() {
    let (mut cpu, mut mem) = arm7();
    // Z is clear after reset, so MOVEQ is squashed.
    load_program(&mut mem, 0, &[0x03A0_0001]);
    let before = cpu.cpsr();
    let cost = cpu.step(&mut mem);
    assert_eq!(cost, 1);
    assert_eq!(cpu.pc(), 4, "squashed instruction still advances PC");
    assert_eq!(cpu.read_reg(0), 0);
    assert_eq!(cpu.cpsr(), before);
}

#[test]
fn test_branch_with_link() {
    let (mut cpu, mut mem) = arm7();
    // BL +0x38 words forward (offset field 0x0E).
    load_program(&mut mem, 0x8000, &[0xEB00_000E]);
    cpu.regs_mut().set_pc(0x8000);
    cpu.step(&mut mem);
    assert_eq!(cpu.read_reg(super::REG_LR), 0x8004);
    assert_eq!(cpu.pc(), 0x8040, "target = insn + 8 + 4*offset");
}

#[test]
fn test_branch_backward() {
    let (mut cpu, mut mem) = arm7();
    // B -8: offset field 0xFFFFFC.
    load_program(&mut mem, 0x100, &[0xEAFF_FFFC]);
    cpu.regs_mut().set_pc(0x100);
    cpu.step(&mut mem);
    assert_eq!(cpu.pc(), 0x100 + 8 - 16);
}

#[test]
fn test_ldr_misaligned_rotates() {
    let (mut cpu, mut mem) = arm7();
    mem.poke_word(0x1000, 0x1122_3344);
    // LDR R1, [R0]
    load_program(&mut mem, 0, &[0xE590_1000]);
    cpu.regs_mut().write(0, 0x1002);
    cpu.step(&mut mem);
    assert_eq!(
        cpu.read_reg(1),
        0x3344_1122,
        "load from a+2 rotates the aligned word by 16"
    );
}

#[test]
fn test_ldrb_zero_extends() {
    let (mut cpu, mut mem) = arm7();
    mem.poke_word(0x1000, 0x0000_00F7);
    load_program(&mut mem, 0, &[0xE5D0_1000]); // LDRB R1, [R0]
    cpu.regs_mut().write(0, 0x1000);
    cpu.step(&mut mem);
    assert_eq!(cpu.read_reg(1), 0xF7);
}

#[test]
fn test_str_post_index_writeback() {
    let (mut cpu, mut mem) = arm7();
    // STR R1, [R0], #4
    load_program(&mut mem, 0, &[0xE480_1004]);
    cpu.regs_mut().write(0, 0x2000);
    cpu.regs_mut().write(1, 0xDEAD_BEEF);
    cpu.step(&mut mem);
    assert_eq!(mem.read_word(0x2000), 0xDEAD_BEEF);
    assert_eq!(cpu.read_reg(0), 0x2004);
}

#[test]
fn test_ldr_pre_index_writeback() {
    let (mut cpu, mut mem) = arm7();
    mem.poke_word(0x2004, 77);
    // LDR R1, [R0, #4]!
    load_program(&mut mem, 0, &[0xE5B0_1004]);
    cpu.regs_mut().write(0, 0x2000);
    cpu.step(&mut mem);
    assert_eq!(cpu.read_reg(1), 77);
    assert_eq!(cpu.read_reg(0), 0x2004);
}

#[test]
fn test_ldr_base_equals_dest_loaded_value_wins() {
    let (mut cpu, mut mem) = arm7();
    mem.poke_word(0x2000, 0x5555_AAAA);
    // LDR R0, [R0], #4: loaded value overwrites the writeback.
    load_program(&mut mem, 0, &[0xE490_0004]);
    cpu.regs_mut().write(0, 0x2000);
    cpu.step(&mut mem);
    assert_eq!(cpu.read_reg(0), 0x5555_AAAA);
}

#[test]
fn test_halfword_load_store() {
    let (mut cpu, mut mem) = arm7();
    load_program(
        &mut mem,
        0,
        &[
            0xE1C0_10B0, // STRH R1, [R0]
            0xE1D0_20B0, // LDRH R2, [R0]
            0xE1D0_30D0, // LDRSB R3, [R0]
            0xE1D0_40F0, // LDRSH R4, [R0]
        ],
    );
    cpu.regs_mut().write(0, 0x3000);
    cpu.regs_mut().write(1, 0xFFFF_8080);
    run(&mut cpu, &mut mem, 4);
    assert_eq!(cpu.read_reg(2), 0x8080);
    assert_eq!(cpu.read_reg(3), 0xFFFF_FF80, "LDRSB sign-extends");
    assert_eq!(cpu.read_reg(4), 0xFFFF_8080, "LDRSH sign-extends");
}

#[test]
fn test_block_transfer_round_trip() {
    let (mut cpu, mut mem) = arm7();
    load_program(
        &mut mem,
        0,
        &[
            0xE88D_000F, // STMIA SP, {R0-R3}
            0xE89D_00F0, // LDMIA SP, {R4-R7}
        ],
    );
    cpu.regs_mut().write(super::REG_SP, 0x4000);
    for r in 0..4 {
        cpu.regs_mut().write(r, 0x10 + r as u32);
    }
    run(&mut cpu, &mut mem, 2);
    for r in 0..4 {
        assert_eq!(cpu.read_reg(r + 4), 0x10 + r as u32);
    }
}

#[test]
fn test_stm_writeback_base_first_in_list_stores_original() {
    let (mut cpu, mut mem) = arm7();
    // STMIA R0!, {R0, R1}: R0 is first in the list, so the original
    // base is stored; writeback applies after the first store.
    load_program(&mut mem, 0, &[0xE8A0_0003]);
    cpu.regs_mut().write(0, 0x5000);
    cpu.regs_mut().write(1, 7);
    cpu.step(&mut mem);
    assert_eq!(mem.read_word(0x5000), 0x5000, "original base stored");
    assert_eq!(mem.read_word(0x5004), 7);
    assert_eq!(cpu.read_reg(0), 0x5008, "writeback applied");
}

#[test]
fn test_stmdb_descending() {
    let (mut cpu, mut mem) = arm7();
    // STMDB SP!, {R0, R1} — the common prologue push.
    load_program(&mut mem, 0, &[0xE92D_0003]);
    cpu.regs_mut().write(super::REG_SP, 0x6000);
    cpu.regs_mut().write(0, 0xA);
    cpu.regs_mut().write(1, 0xB);
    cpu.step(&mut mem);
    assert_eq!(cpu.read_reg(super::REG_SP), 0x5FF8);
    assert_eq!(mem.read_word(0x5FF8), 0xA);
    assert_eq!(mem.read_word(0x5FFC), 0xB);
}

#[test]
fn test_mul_and_mla() {
    let (mut cpu, mut mem) = arm7();
    load_program(
        &mut mem,
        0,
        &[
            0xE001_0392, // MUL R1, R2, R3
            0xE021_4392, // MLA R1, R2, R3, R4
        ],
    );
    cpu.regs_mut().write(2, 6);
    cpu.regs_mut().write(3, 7);
    cpu.regs_mut().write(4, 100);
    cpu.step(&mut mem);
    assert_eq!(cpu.read_reg(1), 42);
    cpu.step(&mut mem);
    assert_eq!(cpu.read_reg(1), 142);
}

#[test]
fn test_umull_smull() {
    let (mut cpu, mut mem) = arm7();
    load_program(
        &mut mem,
        0,
        &[
            0xE081_0392, // UMULL R0, R1, R2, R3
            0xE0C5_4392, // SMULL R4, R5, R2, R3
        ],
    );
    cpu.regs_mut().write(2, 0xFFFF_FFFF);
    cpu.regs_mut().write(3, 2);
    run(&mut cpu, &mut mem, 2);
    // Unsigned: 0xFFFFFFFF * 2 = 0x1_FFFF_FFFE.
    assert_eq!(cpu.read_reg(0), 0xFFFF_FFFE);
    assert_eq!(cpu.read_reg(1), 1);
    // Signed: -1 * 2 = -2.
    assert_eq!(cpu.read_reg(4), 0xFFFF_FFFE);
    assert_eq!(cpu.read_reg(5), 0xFFFF_FFFF);
}

#[test]
fn test_swp_round_trip() {
    let (mut cpu, mut mem) = arm7();
    mem.poke_word(0x7000, 0x1111_2222);
    // SWP R1, R2, [R0]
    load_program(&mut mem, 0, &[0xE100_1092]);
    cpu.regs_mut().write(0, 0x7000);
    cpu.regs_mut().write(2, 0x3333_4444);
    cpu.step(&mut mem);
    assert_eq!(cpu.read_reg(1), 0x1111_2222);
    assert_eq!(mem.read_word(0x7000), 0x3333_4444);
}

#[test]
fn test_mrs_msr_flags() {
    let (mut cpu, mut mem) = arm7();
    load_program(
        &mut mem,
        0,
        &[
            0xE3A0_0302, // MOV R0, #0x08000000  (unused, spacing)
            0xE328_F202, // MSR CPSR_f, #0x20000000  (set C)
            0xE10F_1000, // MRS R1, CPSR
        ],
    );
    run(&mut cpu, &mut mem, 3);
    assert!(cpu.cpsr().c());
    assert_eq!(cpu.read_reg(1) & 0xF000_0000, 0x2000_0000);
}

#[test]
fn test_msr_user_mode_cannot_touch_control() {
    let (mut cpu, mut mem) = arm7();
    // Drop to User, then try MSR CPSR_c, #0xD3 (Supervisor + IF).
    cpu.write_cpsr(cpu.cpsr().raw() & !0x1F | 0x10);
    assert_eq!(cpu.mode(), Mode::User);
    load_program(&mut mem, 0, &[0xE321_F0D3]);
    cpu.step(&mut mem);
    assert_eq!(cpu.mode(), Mode::User, "control field write ignored in User");
}

#[test]
fn test_swi_enters_supervisor() {
    let (mut cpu, mut mem) = arm7();
    load_program(&mut mem, 0x100, &[0xEF00_0042]); // SWI #0x42
    cpu.regs_mut().set_pc(0x100);
    cpu.step(&mut mem); // executes SWI, latches the trap
    cpu.step(&mut mem); // takes the exception
    assert_eq!(cpu.mode(), Mode::Supervisor);
    assert_eq!(cpu.pc(), 0x08, "SWI vector");
    assert_eq!(cpu.read_reg(super::REG_LR), 0x104, "LR is the next insn");
    assert!(cpu.cpsr().irq_disabled());
}

#[test]
fn test_undefined_instruction_traps() {
    let (mut cpu, mut mem) = arm7();
    // A CDP to an absent coprocessor.
    load_program(&mut mem, 0x100, &[0xEE00_0100]);
    cpu.regs_mut().set_pc(0x100);
    cpu.step(&mut mem);
    cpu.step(&mut mem);
    assert_eq!(cpu.mode(), Mode::Undefined);
    assert_eq!(cpu.pc(), 0x04, "undefined vector");
}

// ========== v5 / v5TE extensions ==========

#[test]
fn test_clz() {
    let (mut cpu, mut mem) = arm9();
    load_program(&mut mem, 0, &[0xE16F_1F10]); // CLZ R1, R0
    cpu.regs_mut().write(0, 0x0000_0100);
    cpu.step(&mut mem);
    assert_eq!(cpu.read_reg(1), 23);
}

#[test]
fn test_clz_zero_input() {
    let (mut cpu, mut mem) = arm9();
    load_program(&mut mem, 0, &[0xE16F_1F10]);
    cpu.step(&mut mem);
    assert_eq!(cpu.read_reg(1), 32);
}

#[test]
fn test_blx_register() {
    let (mut cpu, mut mem) = arm9();
    load_program(&mut mem, 0x200, &[0xE12F_F330]); // BLX R0
    cpu.regs_mut().set_pc(0x200);
    cpu.regs_mut().write(0, 0x3001);
    cpu.step(&mut mem);
    assert_eq!(cpu.read_reg(super::REG_LR), 0x204);
    assert_eq!(cpu.pc(), 0x3000);
    assert!(cpu.cpsr().thumb(), "bit 0 selects Thumb");
}

#[test]
fn test_blx_immediate_switches_to_thumb() {
    let (mut cpu, mut mem) = arm9();
    // BLX +0x10 (cond=NV space).
    load_program(&mut mem, 0x400, &[0xFA00_0002]);
    cpu.regs_mut().set_pc(0x400);
    cpu.step(&mut mem);
    assert!(cpu.cpsr().thumb());
    assert_eq!(cpu.pc(), 0x400 + 8 + 8);
    assert_eq!(cpu.read_reg(super::REG_LR), 0x404);
}

#[test]
fn test_nv_squashed_on_v4() {
    let (mut cpu, mut mem) = arm7();
    load_program(&mut mem, 0, &[0xFA00_0002]);
    let cost = cpu.step(&mut mem);
    assert_eq!(cost, 1);
    assert_eq!(cpu.pc(), 4);
    assert!(!cpu.cpsr().thumb(), "NV is a no-op before v5");
}

#[test]
fn test_qadd_saturates_and_sets_q() {
    let (mut cpu, mut mem) = arm9();
    load_program(&mut mem, 0, &[0xE101_0050]); // QADD R0, R0, R1
    cpu.regs_mut().write(0, 0x7FFF_FFFF);
    cpu.regs_mut().write(1, 1);
    cpu.step(&mut mem);
    assert_eq!(cpu.read_reg(0), 0x7FFF_FFFF, "saturated at max");
    assert!(cpu.cpsr().q(), "Q latched");
}

#[test]
fn test_qsub_no_saturation_leaves_q() {
    let (mut cpu, mut mem) = arm9();
    load_program(&mut mem, 0, &[0xE121_0050]); // QSUB R0, R0, R1
    cpu.regs_mut().write(0, 10);
    cpu.regs_mut().write(1, 4);
    cpu.step(&mut mem);
    assert_eq!(cpu.read_reg(0), 6);
    assert!(!cpu.cpsr().q());
}

#[test]
fn test_smulbb() {
    let (mut cpu, mut mem) = arm9();
    load_program(&mut mem, 0, &[0xE160_0281]); // SMULBB R0, R1, R2
    cpu.regs_mut().write(1, 0xFFFF_FFFE); // bottom half -2
    cpu.regs_mut().write(2, 0x0000_0003);
    cpu.step(&mut mem);
    assert_eq!(cpu.read_reg(0) as i32, -6);
}

#[test]
fn test_pld_is_a_nop() {
    let (mut cpu, mut mem) = arm9();
    load_program(&mut mem, 0, &[0xF5D1_F000]); // PLD [R1]
    cpu.step(&mut mem);
    assert_eq!(cpu.pc(), 4);
    assert!(!cpu.pending().any);
}

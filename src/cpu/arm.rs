//! ARM instruction decode and execution
//!
//! Primary dispatch on `(opcode >> 20) & 0xFF`, collapsed into the
//! architectural families:
//!
//! - 0x00–0x1F: data processing (register operand) and, sub-decoded on
//!   bits 7..4, multiply, multiply-long, swap, halfword/signed
//!   transfer, and the miscellaneous space (MRS/MSR, BX, CLZ,
//!   saturating and DSP ops).
//! - 0x20–0x3F: data processing (immediate), MSR immediate.
//! - 0x40–0x7F: single data transfer.
//! - 0x80–0x9F: block data transfer.
//! - 0xA0–0xBF: branch / branch-with-link.
//! - 0xC0–0xEF: coprocessor transfers (CP15, CP14 here).
//! - 0xF0–0xFF: software interrupt.
//!
//! The cond=NV space (v5 unconditional extensions) is dispatched
//! separately by the step loop.

use log::debug;

use super::psr;
use super::{Cpu, Exception, REG_LR, REG_PC};
use crate::bus::Bus;

#[inline]
fn bit(insn: u32, n: u32) -> bool {
    insn & (1 << n) != 0
}

#[inline]
fn sign_extend_24(val: u32) -> i32 {
    ((val << 8) as i32) >> 8
}

impl Cpu {
    /// Execute one conditional ARM instruction. Returns cycles.
    pub(super) fn execute_arm<B: Bus>(&mut self, bus: &mut B, insn: u32) -> u32 {
        match (insn >> 20) & 0xFF {
            0x00..=0x1F => self.arm_dp_or_misc(bus, insn),
            0x20..=0x3F => self.arm_dp_immediate(insn),
            0x40..=0x7F => self.arm_single_transfer(bus, insn),
            0x80..=0x9F => self.arm_block_transfer(bus, insn),
            0xA0..=0xBF => self.arm_branch(insn),
            0xC0..=0xEF => self.arm_coprocessor(bus, insn),
            _ => {
                // SWI: the exception engine takes it before the next
                // instruction.
                self.pending.set(Exception::Swi, true);
                1
            }
        }
    }

    /// The cond=NV space on v5: BLX immediate, PLD, everything else
    /// undefined.
    pub(super) fn execute_arm_unconditional<B: Bus>(&mut self, _bus: &mut B, insn: u32) -> u32 {
        if (insn >> 25) & 7 == 5 {
            // BLX <imm>: offset in words, H bit supplies the halfword
            // step, target is always Thumb.
            let offset = (sign_extend_24(insn & 0x00FF_FFFF) << 2) as u32;
            let h = (insn >> 23) & 2;
            let target = self.reg(REG_PC).wrapping_add(offset).wrapping_add(h);
            self.regs.write(REG_LR, self.regs.pc());
            self.branch_exchange(target | 1);
            return 3;
        }
        if insn & 0x0D70_F000 == 0x0550_F000 {
            // PLD: a hint; this core does not model caches.
            return 1;
        }
        debug!("undefined v5 unconditional opcode {insn:08X}");
        self.pending.set(Exception::Undefined, true);
        1
    }

    // ========== 0x00-0x1F: register DP and the misc space ==========

    fn arm_dp_or_misc<B: Bus>(&mut self, bus: &mut B, insn: u32) -> u32 {
        let op8 = (insn >> 20) & 0xFF;
        let bits74 = (insn >> 4) & 0xF;

        if bits74 == 0b1001 {
            return match op8 {
                0x00..=0x07 => self.arm_multiply(insn),
                0x08..=0x0F => self.arm_multiply_long(insn),
                0x10 | 0x14 => self.arm_swap(bus, insn),
                _ => self.arm_undefined(insn),
            };
        }
        if bits74 & 0b1001 == 0b1001 {
            return self.arm_halfword_transfer(bus, insn);
        }

        // TST/TEQ/CMP/CMN without S select the miscellaneous space.
        if matches!(op8, 0x10 | 0x12 | 0x14 | 0x16) {
            return self.arm_miscellaneous(insn);
        }

        let (op2, carry) = self.shifter_operand(insn);
        let reg_shift = bit(insn, 4);
        let cost = if reg_shift { 2 } else { 1 };
        self.arm_data_processing(insn, op2, carry) + cost - 1
    }

    fn arm_miscellaneous(&mut self, insn: u32) -> u32 {
        let op8 = (insn >> 20) & 0xFF;
        let bits74 = (insn >> 4) & 0xF;
        let rm = (insn & 0xF) as usize;
        let rd = ((insn >> 12) & 0xF) as usize;
        let rn = ((insn >> 16) & 0xF) as usize;

        match (op8, bits74) {
            // MRS: read CPSR or SPSR.
            (0x10 | 0x14, 0b0000) => {
                let value = if bit(insn, 22) {
                    self.regs.spsr().raw()
                } else {
                    self.regs.cpsr().raw()
                };
                self.regs.write(rd, value);
                1
            }
            // MSR (register operand).
            (0x12 | 0x16, 0b0000) => self.arm_msr(insn, self.reg(rm)),
            // BX.
            (0x12, 0b0001) => {
                if !self.config.has_thumb() {
                    return self.arm_undefined(insn);
                }
                self.branch_exchange(self.reg(rm));
                3
            }
            // BLX (register), v5.
            (0x12, 0b0011) if self.config.has_v5() => {
                let target = self.reg(rm);
                self.regs.write(REG_LR, self.regs.pc());
                self.branch_exchange(target);
                3
            }
            // CLZ, v5.
            (0x16, 0b0001) if self.config.has_v5() => {
                self.regs.write(rd, self.reg(rm).leading_zeros());
                1
            }
            // BKPT, v5: taken as a prefetch abort.
            (0x12, 0b0111) if self.config.has_v5() => {
                self.pending.set(Exception::PrefetchAbort, true);
                1
            }
            // QADD/QSUB/QDADD/QDSUB, v5TE.
            (0x10 | 0x12 | 0x14 | 0x16, 0b0101) if self.config.has_dsp() => {
                let a = self.reg(rm);
                let b = self.reg(rn);
                let result = match op8 {
                    0x10 => self.sat_add(a, b),
                    0x12 => self.sat_sub(a, b),
                    0x14 => {
                        let doubled = self.sat_double(b);
                        self.sat_add(a, doubled)
                    }
                    _ => {
                        let doubled = self.sat_double(b);
                        self.sat_sub(a, doubled)
                    }
                };
                self.regs.write(rd, result);
                1
            }
            // Signed halfword multiplies, v5TE.
            (0x10 | 0x12 | 0x14 | 0x16, _) if bits74 & 0b1001 == 0b1000 && self.config.has_dsp() => {
                self.arm_dsp_multiply(insn)
            }
            _ => self.arm_undefined(insn),
        }
    }

    fn arm_dsp_multiply(&mut self, insn: u32) -> u32 {
        let op8 = (insn >> 20) & 0xFF;
        let rd = ((insn >> 16) & 0xF) as usize;
        let ra = ((insn >> 12) & 0xF) as usize;
        let rs = ((insn >> 8) & 0xF) as usize;
        let rm = (insn & 0xF) as usize;

        let half = |v: u32, top: bool| -> i32 {
            if top {
                (v as i32) >> 16
            } else {
                v as u16 as i16 as i32
            }
        };
        let x = bit(insn, 5);
        let y = bit(insn, 6);

        match op8 {
            // SMLA<x><y>: 16x16 + 32, Q on accumulate overflow.
            0x10 => {
                let product = half(self.reg(rm), x).wrapping_mul(half(self.reg(rs), y));
                let acc = self.reg(ra) as i32;
                let result = match product.checked_add(acc) {
                    Some(r) => r,
                    None => {
                        let mut cpsr = self.regs.cpsr();
                        cpsr.set_flag(psr::Q, true);
                        self.regs.set_cpsr(cpsr);
                        product.wrapping_add(acc)
                    }
                };
                self.regs.write(rd, result as u32);
                1
            }
            // SMLAW<y> (x=0) / SMULW<y> (x=1): 32x16 >> 16.
            0x12 => {
                let product =
                    ((self.reg(rm) as i32 as i64 * half(self.reg(rs), y) as i64) >> 16) as i32;
                let result = if x {
                    product
                } else {
                    let acc = self.reg(ra) as i32;
                    match product.checked_add(acc) {
                        Some(r) => r,
                        None => {
                            let mut cpsr = self.regs.cpsr();
                            cpsr.set_flag(psr::Q, true);
                            self.regs.set_cpsr(cpsr);
                            product.wrapping_add(acc)
                        }
                    }
                };
                self.regs.write(rd, result as u32);
                1
            }
            // SMLAL<x><y>: 16x16 + 64.
            0x14 => {
                let product = half(self.reg(rm), x) as i64 * half(self.reg(rs), y) as i64;
                let acc = ((self.reg(rd) as u64) << 32 | self.reg(ra) as u64) as i64;
                let result = acc.wrapping_add(product) as u64;
                self.regs.write(ra, result as u32);
                self.regs.write(rd, (result >> 32) as u32);
                2
            }
            // SMUL<x><y>.
            _ => {
                let product = half(self.reg(rm), x).wrapping_mul(half(self.reg(rs), y));
                self.regs.write(rd, product as u32);
                1
            }
        }
    }

    fn arm_undefined(&mut self, insn: u32) -> u32 {
        debug!(
            "undefined opcode {insn:08X} at {:08X}",
            self.regs.pc().wrapping_sub(4)
        );
        self.pending.set(Exception::Undefined, true);
        1
    }

    // ========== Data processing ==========

    fn arm_dp_immediate(&mut self, insn: u32) -> u32 {
        let opcode = (insn >> 21) & 0xF;
        let s = bit(insn, 20);
        if (0x8..=0xB).contains(&opcode) && !s {
            // MSR immediate (TST..CMN without S).
            if bit(insn, 21) {
                let imm = (insn & 0xFF).rotate_right((insn >> 7) & 0x1E);
                return self.arm_msr(insn, imm);
            }
            return self.arm_undefined(insn);
        }
        let (op2, carry) = self.shifter_operand(insn);
        self.arm_data_processing(insn, op2, carry)
    }

    /// Shared body of all sixteen data-processing operations.
    fn arm_data_processing(&mut self, insn: u32, op2: u32, shifter_carry: bool) -> u32 {
        let opcode = (insn >> 21) & 0xF;
        let s = bit(insn, 20);
        let rn = self.reg(((insn >> 16) & 0xF) as usize);
        let rd = ((insn >> 12) & 0xF) as usize;
        let c_in = self.regs.cpsr().c() as u32;
        // S with Rd=R15 restores CPSR from SPSR instead of computing
        // flags (the canonical exception return).
        let set_flags = s && rd != REG_PC;

        let (result, writes, logical) = match opcode {
            0x0 => (rn & op2, true, true),            // AND
            0x1 => (rn ^ op2, true, true),            // EOR
            0x2 => (self.alu_sub(rn, op2, 1, set_flags), true, false), // SUB
            0x3 => (self.alu_sub(op2, rn, 1, set_flags), true, false), // RSB
            0x4 => (self.alu_add(rn, op2, 0, set_flags), true, false), // ADD
            0x5 => (self.alu_add(rn, op2, c_in, set_flags), true, false), // ADC
            0x6 => (self.alu_sub(rn, op2, c_in, set_flags), true, false), // SBC
            0x7 => (self.alu_sub(op2, rn, c_in, set_flags), true, false), // RSC
            0x8 => (rn & op2, false, true),           // TST
            0x9 => (rn ^ op2, false, true),           // TEQ
            0xA => (self.alu_sub(rn, op2, 1, set_flags), false, false), // CMP
            0xB => (self.alu_add(rn, op2, 0, set_flags), false, false), // CMN
            0xC => (rn | op2, true, true),            // ORR
            0xD => (op2, true, true),                 // MOV
            0xE => (rn & !op2, true, true),           // BIC
            _ => (!op2, true, true),                  // MVN
        };

        if logical && set_flags {
            self.set_logical_flags(result, shifter_carry);
        }

        if writes {
            if rd == REG_PC {
                if s {
                    let spsr = self.regs.spsr().raw();
                    self.write_cpsr(spsr);
                }
                self.branch_to(result);
                return 3;
            }
            self.regs.write(rd, result);
        }
        1
    }

    /// MSR: write CPSR or SPSR under the field mask. User mode cannot
    /// touch the control field of the CPSR.
    fn arm_msr(&mut self, insn: u32, value: u32) -> u32 {
        let mut mask = 0u32;
        if bit(insn, 16) {
            mask |= 0x0000_00FF;
        }
        if bit(insn, 17) {
            mask |= 0x0000_FF00;
        }
        if bit(insn, 18) {
            mask |= 0x00FF_0000;
        }
        if bit(insn, 19) {
            mask |= 0xFF00_0000;
        }

        if bit(insn, 22) {
            let cur = self.regs.spsr().raw();
            self.regs.set_spsr(psr::Psr((cur & !mask) | (value & mask)));
        } else {
            if !self.mode().is_privileged() {
                mask &= 0xFF00_0000;
            }
            let cur = self.regs.cpsr().raw();
            self.write_cpsr((cur & !mask) | (value & mask));
        }
        1
    }

    // ========== Multiply ==========

    fn arm_multiply(&mut self, insn: u32) -> u32 {
        let rd = ((insn >> 16) & 0xF) as usize;
        let ra = ((insn >> 12) & 0xF) as usize;
        let rs_val = self.reg(((insn >> 8) & 0xF) as usize);
        let rm_val = self.reg((insn & 0xF) as usize);

        let mut result = rm_val.wrapping_mul(rs_val);
        let mut cost = Self::mul_cycles(rs_val) + 1;
        if bit(insn, 21) {
            result = result.wrapping_add(self.reg(ra));
            cost += 1;
        }
        self.regs.write(rd, result);
        if bit(insn, 20) {
            let mut cpsr = self.regs.cpsr();
            cpsr.set_nz(result);
            self.regs.set_cpsr(cpsr);
        }
        cost
    }

    fn arm_multiply_long(&mut self, insn: u32) -> u32 {
        let rd_hi = ((insn >> 16) & 0xF) as usize;
        let rd_lo = ((insn >> 12) & 0xF) as usize;
        let rs_val = self.reg(((insn >> 8) & 0xF) as usize);
        let rm_val = self.reg((insn & 0xF) as usize);
        let signed = bit(insn, 22);
        let accumulate = bit(insn, 21);

        let mut result = if signed {
            (rm_val as i32 as i64).wrapping_mul(rs_val as i32 as i64) as u64
        } else {
            (rm_val as u64).wrapping_mul(rs_val as u64)
        };
        let mut cost = Self::mul_cycles(rs_val) + 2;
        if accumulate {
            let acc = ((self.reg(rd_hi) as u64) << 32) | self.reg(rd_lo) as u64;
            result = result.wrapping_add(acc);
            cost += 1;
        }
        self.regs.write(rd_lo, result as u32);
        self.regs.write(rd_hi, (result >> 32) as u32);
        if bit(insn, 20) {
            let mut cpsr = self.regs.cpsr();
            cpsr.set_flag(psr::N, result & (1 << 63) != 0);
            cpsr.set_flag(psr::Z, result == 0);
            self.regs.set_cpsr(cpsr);
        }
        cost
    }

    // ========== Swap ==========

    fn arm_swap<B: Bus>(&mut self, bus: &mut B, insn: u32) -> u32 {
        let rn = self.reg(((insn >> 16) & 0xF) as usize);
        let rd = ((insn >> 12) & 0xF) as usize;
        let rm = self.reg((insn & 0xF) as usize);

        if bit(insn, 22) {
            // SWPB
            let loaded = match self.read_data_byte(bus, rn, false) {
                Ok(b) => b,
                Err(()) => return 2,
            };
            if self.write_data_byte(bus, rn, rm as u8, false).is_err() {
                return 2;
            }
            self.regs.write(rd, loaded as u32);
        } else {
            // SWP honors the misaligned-load rotation.
            let loaded = match self.read_data_word(bus, rn, false) {
                Ok(w) => w.rotate_right(8 * (rn & 3)),
                Err(()) => return 2,
            };
            if self.write_data_word(bus, rn, rm, false).is_err() {
                return 2;
            }
            self.regs.write(rd, loaded);
        }
        4
    }

    // ========== Single data transfer ==========

    fn arm_single_transfer<B: Bus>(&mut self, bus: &mut B, insn: u32) -> u32 {
        let pre = bit(insn, 24);
        let up = bit(insn, 23);
        let byte = bit(insn, 22);
        let writeback = bit(insn, 21);
        let load = bit(insn, 20);
        let rn = ((insn >> 16) & 0xF) as usize;
        let rd = ((insn >> 12) & 0xF) as usize;

        let offset = if bit(insn, 25) {
            // Register offset with immediate shift.
            let rm = self.reg((insn & 0xF) as usize);
            let shift_type = (insn >> 5) & 3;
            let amount = (insn >> 7) & 0x1F;
            self.barrel_shift(shift_type, rm, amount, false).0
        } else {
            insn & 0xFFF
        };

        let base = self.reg(rn);
        let offset_base = if up {
            base.wrapping_add(offset)
        } else {
            base.wrapping_sub(offset)
        };
        let addr = if pre { offset_base } else { base };
        // Post-indexed with W forces user-mode permissions (LDRT/STRT).
        let force_user = !pre && writeback;

        // Base writeback is applied before the access and preserved if
        // the access aborts. A loaded Rd equal to Rn overwrites it
        // below.
        if (!pre || writeback) && rn != REG_PC {
            self.regs.write(rn, offset_base);
        }

        if load {
            let value = if byte {
                match self.read_data_byte(bus, addr, force_user) {
                    Ok(b) => b as u32,
                    Err(()) => return 3,
                }
            } else {
                // Misaligned word loads rotate the aligned word.
                match self.read_data_word(bus, addr, force_user) {
                    Ok(w) => w.rotate_right(8 * (addr & 3)),
                    Err(()) => return 3,
                }
            };
            if rd == REG_PC {
                if self.config.has_v5() {
                    self.branch_exchange(value);
                } else {
                    self.branch_to(value);
                }
                return 5;
            }
            self.regs.write(rd, value);
            3
        } else {
            // STR of R15 stores PC+12.
            let value = if rd == REG_PC {
                self.reg(REG_PC).wrapping_add(4)
            } else {
                self.reg(rd)
            };
            if byte {
                let _ = self.write_data_byte(bus, addr, value as u8, force_user);
            } else {
                let _ = self.write_data_word(bus, addr, value, force_user);
            }
            2
        }
    }

    // ========== Halfword and signed transfer (and LDRD/STRD) ==========

    fn arm_halfword_transfer<B: Bus>(&mut self, bus: &mut B, insn: u32) -> u32 {
        let pre = bit(insn, 24);
        let up = bit(insn, 23);
        let imm = bit(insn, 22);
        let writeback = bit(insn, 21);
        let load = bit(insn, 20);
        let rn = ((insn >> 16) & 0xF) as usize;
        let rd = ((insn >> 12) & 0xF) as usize;
        let sh = (insn >> 5) & 3;

        let offset = if imm {
            ((insn >> 4) & 0xF0) | (insn & 0xF)
        } else {
            self.reg((insn & 0xF) as usize)
        };
        let base = self.reg(rn);
        let offset_base = if up {
            base.wrapping_add(offset)
        } else {
            base.wrapping_sub(offset)
        };
        let addr = if pre { offset_base } else { base };

        if (!pre || writeback) && rn != REG_PC {
            self.regs.write(rn, offset_base);
        }

        if load {
            let value = match sh {
                1 => match self.read_data_half(bus, addr, false) {
                    Ok(h) => h as u32,
                    Err(()) => return 3,
                },
                2 => match self.read_data_byte(bus, addr, false) {
                    Ok(b) => b as i8 as i32 as u32,
                    Err(()) => return 3,
                },
                _ => match self.read_data_half(bus, addr, false) {
                    Ok(h) => h as i16 as i32 as u32,
                    Err(()) => return 3,
                },
            };
            self.set_reg(rd, value);
            3
        } else {
            match sh {
                1 => {
                    let value = self.reg(rd) as u16;
                    let _ = self.write_data_half(bus, addr, value, false);
                    2
                }
                // LDRD/STRD occupy the store encodings with SH=2/3 on
                // v5TE cores. Rd must be even and below R14.
                2 if self.config.has_dsp() && rd & 1 == 0 && rd < 14 => {
                    let lo = match self.read_data_word(bus, addr, false) {
                        Ok(w) => w,
                        Err(()) => return 3,
                    };
                    let hi = match self.read_data_word(bus, addr.wrapping_add(4), false) {
                        Ok(w) => w,
                        Err(()) => return 3,
                    };
                    self.regs.write(rd, lo);
                    self.regs.write(rd + 1, hi);
                    4
                }
                3 if self.config.has_dsp() && rd & 1 == 0 && rd < 14 => {
                    let lo = self.reg(rd);
                    let hi = self.reg(rd + 1);
                    if self.write_data_word(bus, addr, lo, false).is_ok() {
                        let _ = self.write_data_word(bus, addr.wrapping_add(4), hi, false);
                    }
                    3
                }
                _ => self.arm_undefined(insn),
            }
        }
    }

    // ========== Block data transfer ==========

    fn arm_block_transfer<B: Bus>(&mut self, bus: &mut B, insn: u32) -> u32 {
        let pre = bit(insn, 24);
        let up = bit(insn, 23);
        let s = bit(insn, 22);
        let writeback = bit(insn, 21);
        let load = bit(insn, 20);
        let rn = ((insn >> 16) & 0xF) as usize;
        let mut rlist = insn & 0xFFFF;

        // v4 quirk: an empty list transfers R15 and steps the base by
        // 0x40.
        let empty = rlist == 0;
        if empty {
            rlist = 1 << REG_PC;
        }
        let count = if empty { 16 } else { rlist.count_ones() };
        let pc_in_list = rlist & (1 << REG_PC) != 0;
        // S with no R15 in an LDM, or S in any STM, selects the user
        // bank for the transfer (and, per the documented LDM-user-mode
        // behavior, for the base and its writeback as well).
        let user_bank = s && !(load && pc_in_list);

        let base = if user_bank {
            self.regs.read_user(rn)
        } else {
            self.reg(rn)
        };
        let total = 4 * count;
        let (start, wb_value) = match (pre, up) {
            (false, true) => (base, base.wrapping_add(total)),
            (true, true) => (base.wrapping_add(4), base.wrapping_add(total)),
            (false, false) => (
                base.wrapping_sub(total).wrapping_add(4),
                base.wrapping_sub(total),
            ),
            (true, false) => (base.wrapping_sub(total), base.wrapping_sub(total)),
        };

        let mut addr = start;
        let mut cost = count + 2;

        if load {
            // Writeback first; a loaded base and any abort both leave
            // the written-back value unless overwritten below.
            if writeback {
                if user_bank {
                    self.regs.write_user(rn, wb_value);
                } else {
                    self.regs.write(rn, wb_value);
                }
            }
            for r in 0..16 {
                if rlist & (1 << r) == 0 {
                    continue;
                }
                let value = match self.read_data_word(bus, addr, false) {
                    Ok(w) => w,
                    Err(()) => return cost,
                };
                if r == REG_PC {
                    if s {
                        // LDM with R15 and S: exception return. The
                        // restored CPSR supplies the new state, so the
                        // target is only masked, never interworked.
                        let spsr = self.regs.spsr().raw();
                        self.write_cpsr(spsr);
                        self.branch_to(value);
                    } else if self.config.has_v5() {
                        self.branch_exchange(value);
                    } else {
                        self.branch_to(value);
                    }
                    cost += 2;
                } else if user_bank {
                    self.regs.write_user(r, value);
                } else {
                    self.regs.write(r, value);
                }
                addr = addr.wrapping_add(4);
            }
        } else {
            let mut first = true;
            for r in 0..16 {
                if rlist & (1 << r) == 0 {
                    continue;
                }
                // The first register in the list always stores the
                // original base; writeback lands after it.
                let value = if r == REG_PC {
                    self.reg(REG_PC).wrapping_add(4)
                } else if user_bank {
                    self.regs.read_user(r)
                } else {
                    self.regs.read(r)
                };
                if self.write_data_word(bus, addr, value, false).is_err() {
                    return cost;
                }
                if first {
                    first = false;
                    if writeback {
                        if user_bank {
                            self.regs.write_user(rn, wb_value);
                        } else {
                            self.regs.write(rn, wb_value);
                        }
                    }
                }
                addr = addr.wrapping_add(4);
            }
        }
        cost
    }

    // ========== Branch ==========

    fn arm_branch(&mut self, insn: u32) -> u32 {
        let offset = (sign_extend_24(insn & 0x00FF_FFFF) << 2) as u32;
        let target = self.reg(REG_PC).wrapping_add(offset);
        if bit(insn, 24) {
            self.regs.write(REG_LR, self.regs.pc());
        }
        self.branch_to(target);
        3
    }

    // ========== Coprocessor ==========

    fn arm_coprocessor<B: Bus>(&mut self, _bus: &mut B, insn: u32) -> u32 {
        let cp = (insn >> 8) & 0xF;

        if (insn >> 24) & 0xF == 0xE && bit(insn, 4) {
            // MRC / MCR
            let load = bit(insn, 20);
            let crn = (insn >> 16) & 0xF;
            let crm = insn & 0xF;
            let op2 = (insn >> 5) & 7;
            let rd = ((insn >> 12) & 0xF) as usize;

            // CP15 is privileged.
            if cp == 15 && !self.mode().is_privileged() {
                return self.arm_undefined(insn);
            }

            match cp {
                15 => {
                    if load {
                        let value = self.cp15_read(crn, crm, op2);
                        if rd == REG_PC {
                            // MRC to R15 moves the top bits into the
                            // flags.
                            let cur = self.regs.cpsr().raw();
                            self.write_cpsr((cur & 0x0FFF_FFFF) | (value & 0xF000_0000));
                        } else {
                            self.regs.write(rd, value);
                        }
                    } else {
                        let value = self.reg(rd);
                        self.cp15_write(crn, crm, op2, value);
                    }
                    2
                }
                14 => {
                    if load {
                        let value = self.cp14_read(crn, crm, op2);
                        self.regs.write(rd, value);
                    } else {
                        let value = self.reg(rd);
                        self.cp14_write(crn, crm, op2, value);
                    }
                    2
                }
                _ => self.arm_undefined(insn),
            }
        } else {
            // CDP/LDC/STC: no coprocessor here accepts them.
            debug!("unsupported coprocessor op {insn:08X} (cp{cp})");
            self.arm_undefined(insn)
        }
    }
}

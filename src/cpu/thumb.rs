//! Thumb instruction decode and execution
//!
//! Family decode on the top bits of the 16-bit opcode, covering the
//! full Thumb-1 set plus the v5 BLX forms: shifts, three-operand
//! add/subtract, 8-bit immediate ops, the ALU group, hi-register
//! ops and BX/BLX, PC-relative load, register- and immediate-offset
//! loads/stores, halfword and SP-relative transfers, address
//! generation, SP adjustment, push/pop, multiple load/store,
//! conditional branch and SWI, unconditional branch, and the two-part
//! BL/BLX pair.

use log::debug;

use super::alu::{SHIFT_ASR, SHIFT_LSL, SHIFT_LSR, SHIFT_ROR};
use super::{Cpu, Exception, REG_LR, REG_PC, REG_SP};
use crate::bus::Bus;

impl Cpu {
    /// Execute one Thumb instruction. Returns cycles.
    pub(super) fn execute_thumb<B: Bus>(&mut self, bus: &mut B, insn: u16) -> u32 {
        let op = insn as u32;
        match op >> 12 {
            0x0 | 0x1 => self.thumb_shift_or_add_sub(op),
            0x2 | 0x3 => self.thumb_immediate(op),
            0x4 => match (op >> 10) & 3 {
                0 => self.thumb_alu(op),
                1 => self.thumb_hi_reg_or_bx(op),
                _ => self.thumb_load_pc_relative(bus, op),
            },
            0x5 => self.thumb_transfer_reg_offset(bus, op),
            0x6 | 0x7 => self.thumb_transfer_imm_offset(bus, op),
            0x8 => self.thumb_transfer_half(bus, op),
            0x9 => self.thumb_transfer_sp_relative(bus, op),
            0xA => self.thumb_load_address(op),
            0xB => self.thumb_misc(bus, op),
            0xC => self.thumb_multiple_transfer(bus, op),
            0xD => self.thumb_cond_branch_or_swi(op),
            0xE => {
                if op & 0x0800 == 0 {
                    self.thumb_branch(op)
                } else {
                    // BLX suffix (v5): like BL but lands in ARM state.
                    self.thumb_bl_suffix(op, false)
                }
            }
            _ => {
                if op & 0x0800 == 0 {
                    self.thumb_bl_prefix(op)
                } else {
                    self.thumb_bl_suffix(op, true)
                }
            }
        }
    }

    fn thumb_undefined(&mut self, op: u32) -> u32 {
        debug!(
            "undefined Thumb opcode {op:04X} at {:08X}",
            self.regs.pc().wrapping_sub(2)
        );
        self.pending.set(Exception::Undefined, true);
        1
    }

    // ========== Format 1-2: shifts and three-operand add/sub ==========

    fn thumb_shift_or_add_sub(&mut self, op: u32) -> u32 {
        if (op >> 11) & 3 == 3 {
            // ADD/SUB Rd, Rs, Rn|#imm3
            let rd = (op & 7) as usize;
            let rs = self.reg(((op >> 3) & 7) as usize);
            let operand = if op & (1 << 10) != 0 {
                (op >> 6) & 7
            } else {
                self.reg(((op >> 6) & 7) as usize)
            };
            let result = if op & (1 << 9) != 0 {
                self.alu_sub(rs, operand, 1, true)
            } else {
                self.alu_add(rs, operand, 0, true)
            };
            self.regs.write(rd, result);
            return 1;
        }
        // LSL/LSR/ASR Rd, Rs, #imm5 (immediate-encoding semantics:
        // amount 0 means LSR#32/ASR#32).
        let shift_type = (op >> 11) & 3;
        let amount = (op >> 6) & 0x1F;
        let value = self.reg(((op >> 3) & 7) as usize);
        let rd = (op & 7) as usize;
        let (result, carry) = self.barrel_shift(shift_type, value, amount, false);
        self.regs.write(rd, result);
        self.set_logical_flags(result, carry);
        1
    }

    // ========== Format 3: MOV/CMP/ADD/SUB #imm8 ==========

    fn thumb_immediate(&mut self, op: u32) -> u32 {
        let rd = ((op >> 8) & 7) as usize;
        let imm = op & 0xFF;
        match (op >> 11) & 3 {
            0 => {
                // MOV: N/Z only, carry preserved.
                self.regs.write(rd, imm);
                let mut cpsr = self.regs.cpsr();
                cpsr.set_nz(imm);
                self.regs.set_cpsr(cpsr);
            }
            1 => {
                self.alu_sub(self.reg(rd), imm, 1, true);
            }
            2 => {
                let result = self.alu_add(self.reg(rd), imm, 0, true);
                self.regs.write(rd, result);
            }
            _ => {
                let result = self.alu_sub(self.reg(rd), imm, 1, true);
                self.regs.write(rd, result);
            }
        }
        1
    }

    // ========== Format 4: ALU operations ==========

    fn thumb_alu(&mut self, op: u32) -> u32 {
        let rd = (op & 7) as usize;
        let rs = ((op >> 3) & 7) as usize;
        let a = self.reg(rd);
        let b = self.reg(rs);
        let c_in = self.regs.cpsr().c() as u32;

        match (op >> 6) & 0xF {
            0x0 => {
                let r = a & b;
                self.regs.write(rd, r);
                self.thumb_logical_flags(r);
            }
            0x1 => {
                let r = a ^ b;
                self.regs.write(rd, r);
                self.thumb_logical_flags(r);
            }
            0x2 => {
                let (r, carry) = self.barrel_shift(SHIFT_LSL, a, b & 0xFF, true);
                self.regs.write(rd, r);
                self.set_logical_flags(r, carry);
                return 2;
            }
            0x3 => {
                let (r, carry) = self.barrel_shift(SHIFT_LSR, a, b & 0xFF, true);
                self.regs.write(rd, r);
                self.set_logical_flags(r, carry);
                return 2;
            }
            0x4 => {
                let (r, carry) = self.barrel_shift(SHIFT_ASR, a, b & 0xFF, true);
                self.regs.write(rd, r);
                self.set_logical_flags(r, carry);
                return 2;
            }
            0x5 => {
                let r = self.alu_add(a, b, c_in, true);
                self.regs.write(rd, r);
            }
            0x6 => {
                let r = self.alu_sub(a, b, c_in, true);
                self.regs.write(rd, r);
            }
            0x7 => {
                let (r, carry) = self.barrel_shift(SHIFT_ROR, a, b & 0xFF, true);
                self.regs.write(rd, r);
                self.set_logical_flags(r, carry);
                return 2;
            }
            0x8 => self.thumb_logical_flags(a & b),
            0x9 => {
                let r = self.alu_sub(0, b, 1, true);
                self.regs.write(rd, r);
            }
            0xA => {
                self.alu_sub(a, b, 1, true);
            }
            0xB => {
                self.alu_add(a, b, 0, true);
            }
            0xC => {
                let r = a | b;
                self.regs.write(rd, r);
                self.thumb_logical_flags(r);
            }
            0xD => {
                let r = a.wrapping_mul(b);
                self.regs.write(rd, r);
                self.thumb_logical_flags(r);
                return Self::mul_cycles(b) + 1;
            }
            0xE => {
                let r = a & !b;
                self.regs.write(rd, r);
                self.thumb_logical_flags(r);
            }
            _ => {
                let r = !b;
                self.regs.write(rd, r);
                self.thumb_logical_flags(r);
            }
        }
        1
    }

    /// N/Z update with C/V preserved (Thumb logical ops).
    fn thumb_logical_flags(&mut self, result: u32) {
        let mut cpsr = self.regs.cpsr();
        cpsr.set_nz(result);
        self.regs.set_cpsr(cpsr);
    }

    // ========== Format 5: hi-register ops and BX ==========

    fn thumb_hi_reg_or_bx(&mut self, op: u32) -> u32 {
        let rd = ((op & 7) | ((op >> 4) & 8)) as usize;
        let rm = ((op >> 3) & 0xF) as usize;
        match (op >> 8) & 3 {
            0 => {
                // ADD (no flags).
                let result = self.reg(rd).wrapping_add(self.reg(rm));
                self.set_reg(rd, result);
                if rd == REG_PC {
                    3
                } else {
                    1
                }
            }
            1 => {
                self.alu_sub(self.reg(rd), self.reg(rm), 1, true);
                1
            }
            2 => {
                self.set_reg(rd, self.reg(rm));
                if rd == REG_PC {
                    3
                } else {
                    1
                }
            }
            _ => {
                // BX; with H1 set this is BLX (v5).
                let target = self.reg(rm);
                if op & (1 << 7) != 0 {
                    if !self.config.has_v5() {
                        return self.thumb_undefined(op);
                    }
                    self.regs.write(REG_LR, self.regs.pc() | 1);
                }
                self.branch_exchange(target);
                3
            }
        }
    }

    // ========== Format 6: PC-relative load ==========

    fn thumb_load_pc_relative<B: Bus>(&mut self, bus: &mut B, op: u32) -> u32 {
        let rd = ((op >> 8) & 7) as usize;
        let addr = (self.reg(REG_PC) & !3).wrapping_add((op & 0xFF) << 2);
        match self.read_data_word(bus, addr, false) {
            Ok(w) => self.regs.write(rd, w),
            Err(()) => {}
        }
        3
    }

    // ========== Format 7-8: register-offset transfers ==========

    fn thumb_transfer_reg_offset<B: Bus>(&mut self, bus: &mut B, op: u32) -> u32 {
        let rd = (op & 7) as usize;
        let addr = self
            .reg(((op >> 3) & 7) as usize)
            .wrapping_add(self.reg(((op >> 6) & 7) as usize));
        match (op >> 9) & 7 {
            0 => {
                let _ = self.write_data_word(bus, addr, self.reg(rd), false);
                2
            }
            1 => {
                let _ = self.write_data_half(bus, addr, self.reg(rd) as u16, false);
                2
            }
            2 => {
                let _ = self.write_data_byte(bus, addr, self.reg(rd) as u8, false);
                2
            }
            3 => {
                if let Ok(b) = self.read_data_byte(bus, addr, false) {
                    self.regs.write(rd, b as i8 as i32 as u32);
                }
                3
            }
            4 => {
                if let Ok(w) = self.read_data_word(bus, addr, false) {
                    self.regs.write(rd, w.rotate_right(8 * (addr & 3)));
                }
                3
            }
            5 => {
                if let Ok(h) = self.read_data_half(bus, addr, false) {
                    self.regs.write(rd, h as u32);
                }
                3
            }
            6 => {
                if let Ok(b) = self.read_data_byte(bus, addr, false) {
                    self.regs.write(rd, b as u32);
                }
                3
            }
            _ => {
                if let Ok(h) = self.read_data_half(bus, addr, false) {
                    self.regs.write(rd, h as i16 as i32 as u32);
                }
                3
            }
        }
    }

    // ========== Format 9: immediate-offset word/byte transfers ==========

    fn thumb_transfer_imm_offset<B: Bus>(&mut self, bus: &mut B, op: u32) -> u32 {
        let rd = (op & 7) as usize;
        let base = self.reg(((op >> 3) & 7) as usize);
        let byte = op & (1 << 12) != 0;
        let load = op & (1 << 11) != 0;
        let imm = (op >> 6) & 0x1F;
        let addr = base.wrapping_add(if byte { imm } else { imm << 2 });

        match (load, byte) {
            (false, false) => {
                let _ = self.write_data_word(bus, addr, self.reg(rd), false);
                2
            }
            (false, true) => {
                let _ = self.write_data_byte(bus, addr, self.reg(rd) as u8, false);
                2
            }
            (true, false) => {
                if let Ok(w) = self.read_data_word(bus, addr, false) {
                    self.regs.write(rd, w.rotate_right(8 * (addr & 3)));
                }
                3
            }
            (true, true) => {
                if let Ok(b) = self.read_data_byte(bus, addr, false) {
                    self.regs.write(rd, b as u32);
                }
                3
            }
        }
    }

    // ========== Format 10: halfword transfers ==========

    fn thumb_transfer_half<B: Bus>(&mut self, bus: &mut B, op: u32) -> u32 {
        let rd = (op & 7) as usize;
        let addr = self
            .reg(((op >> 3) & 7) as usize)
            .wrapping_add(((op >> 6) & 0x1F) << 1);
        if op & (1 << 11) != 0 {
            if let Ok(h) = self.read_data_half(bus, addr, false) {
                self.regs.write(rd, h as u32);
            }
            3
        } else {
            let _ = self.write_data_half(bus, addr, self.reg(rd) as u16, false);
            2
        }
    }

    // ========== Format 11: SP-relative transfers ==========

    fn thumb_transfer_sp_relative<B: Bus>(&mut self, bus: &mut B, op: u32) -> u32 {
        let rd = ((op >> 8) & 7) as usize;
        let addr = self.reg(REG_SP).wrapping_add((op & 0xFF) << 2);
        if op & (1 << 11) != 0 {
            if let Ok(w) = self.read_data_word(bus, addr, false) {
                self.regs.write(rd, w.rotate_right(8 * (addr & 3)));
            }
            3
        } else {
            let _ = self.write_data_word(bus, addr, self.reg(rd), false);
            2
        }
    }

    // ========== Format 12: load address ==========

    fn thumb_load_address(&mut self, op: u32) -> u32 {
        let rd = ((op >> 8) & 7) as usize;
        let offset = (op & 0xFF) << 2;
        let base = if op & (1 << 11) != 0 {
            self.reg(REG_SP)
        } else {
            self.reg(REG_PC) & !3
        };
        self.regs.write(rd, base.wrapping_add(offset));
        1
    }

    // ========== Format 13-14: SP adjust, push/pop ==========

    fn thumb_misc<B: Bus>(&mut self, bus: &mut B, op: u32) -> u32 {
        match (op >> 8) & 0xF {
            0x0 => {
                // ADD/SUB SP, #imm7*4
                let imm = (op & 0x7F) << 2;
                let sp = self.reg(REG_SP);
                let sp = if op & (1 << 7) != 0 {
                    sp.wrapping_sub(imm)
                } else {
                    sp.wrapping_add(imm)
                };
                self.regs.write(REG_SP, sp);
                1
            }
            0x4 | 0x5 => self.thumb_push(bus, op),
            0xC | 0xD => self.thumb_pop(bus, op),
            0xE if self.config.has_v5() => {
                // BKPT
                self.pending.set(Exception::PrefetchAbort, true);
                1
            }
            _ => self.thumb_undefined(op),
        }
    }

    fn thumb_push<B: Bus>(&mut self, bus: &mut B, op: u32) -> u32 {
        let lr = op & (1 << 8) != 0;
        let count = (op & 0xFF).count_ones() + lr as u32;
        if count == 0 {
            return 1;
        }
        let sp = self.reg(REG_SP).wrapping_sub(4 * count);
        self.regs.write(REG_SP, sp);
        let mut addr = sp;
        for r in 0..8 {
            if op & (1 << r) == 0 {
                continue;
            }
            if self
                .write_data_word(bus, addr, self.reg(r as usize), false)
                .is_err()
            {
                return count + 1;
            }
            addr = addr.wrapping_add(4);
        }
        if lr {
            let _ = self.write_data_word(bus, addr, self.reg(REG_LR), false);
        }
        count + 1
    }

    fn thumb_pop<B: Bus>(&mut self, bus: &mut B, op: u32) -> u32 {
        let pc = op & (1 << 8) != 0;
        let count = (op & 0xFF).count_ones() + pc as u32;
        if count == 0 {
            return 1;
        }
        let mut addr = self.reg(REG_SP);
        self.regs.write(REG_SP, addr.wrapping_add(4 * count));
        for r in 0..8 {
            if op & (1 << r) == 0 {
                continue;
            }
            match self.read_data_word(bus, addr, false) {
                Ok(w) => self.regs.write(r as usize, w),
                Err(()) => return count + 1,
            }
            addr = addr.wrapping_add(4);
        }
        if pc {
            match self.read_data_word(bus, addr, false) {
                Ok(w) => {
                    // v5 interworks on a popped PC; v4 stays in Thumb.
                    if self.config.has_v5() {
                        self.branch_exchange(w);
                    } else {
                        self.branch_to(w);
                    }
                }
                Err(()) => return count + 1,
            }
            return count + 3;
        }
        count + 2
    }

    // ========== Format 15: multiple load/store ==========

    fn thumb_multiple_transfer<B: Bus>(&mut self, bus: &mut B, op: u32) -> u32 {
        let rb = ((op >> 8) & 7) as usize;
        let load = op & (1 << 11) != 0;
        let rlist = op & 0xFF;

        // Empty list: transfer R15, step the base by 0x40 (v4 quirk,
        // same as the ARM encoding).
        if rlist == 0 {
            let base = self.reg(rb);
            self.regs.write(rb, base.wrapping_add(0x40));
            if load {
                if let Ok(w) = self.read_data_word(bus, base, false) {
                    self.branch_to(w);
                }
            } else {
                let _ = self.write_data_word(bus, base, self.reg(REG_PC), false);
            }
            return 18;
        }

        let count = rlist.count_ones();
        let base = self.reg(rb);
        let mut addr = base;
        let wb_value = base.wrapping_add(4 * count);

        if load {
            // Base writeback is suppressed when the base is in the
            // list; the loaded value wins.
            if rlist & (1 << rb) == 0 {
                self.regs.write(rb, wb_value);
            }
            for r in 0..8 {
                if rlist & (1 << r) == 0 {
                    continue;
                }
                match self.read_data_word(bus, addr, false) {
                    Ok(w) => self.regs.write(r as usize, w),
                    Err(()) => return count + 2,
                }
                addr = addr.wrapping_add(4);
            }
        } else {
            let mut first = true;
            for r in 0..8 {
                if rlist & (1 << r) == 0 {
                    continue;
                }
                if self
                    .write_data_word(bus, addr, self.reg(r as usize), false)
                    .is_err()
                {
                    return count + 2;
                }
                if first {
                    first = false;
                    self.regs.write(rb, wb_value);
                }
                addr = addr.wrapping_add(4);
            }
        }
        count + 2
    }

    // ========== Format 16-19: branches, SWI, BL/BLX ==========

    fn thumb_cond_branch_or_swi(&mut self, op: u32) -> u32 {
        let cond = (op >> 8) & 0xF;
        match cond {
            0xF => {
                self.pending.set(Exception::Swi, true);
                1
            }
            0xE => self.thumb_undefined(op),
            _ => {
                if self.condition_passed(cond) {
                    let offset = ((op & 0xFF) as i8 as i32) << 1;
                    let target = self.reg(REG_PC).wrapping_add(offset as u32);
                    self.branch_to(target);
                    3
                } else {
                    1
                }
            }
        }
    }

    fn thumb_branch(&mut self, op: u32) -> u32 {
        let offset = (((op & 0x7FF) << 21) as i32 >> 20) as u32;
        let target = self.reg(REG_PC).wrapping_add(offset);
        self.branch_to(target);
        3
    }

    /// BL/BLX prefix: stage the high part of the offset in LR.
    fn thumb_bl_prefix(&mut self, op: u32) -> u32 {
        let offset = ((((op & 0x7FF) << 21) as i32) >> 9) as u32;
        let lr = self.reg(REG_PC).wrapping_add(offset);
        self.regs.write(REG_LR, lr);
        1
    }

    /// BL/BLX suffix: complete the branch staged by the prefix. The
    /// return address replaces LR with bit 0 set.
    fn thumb_bl_suffix(&mut self, op: u32, to_thumb: bool) -> u32 {
        if !to_thumb && !self.config.has_v5() {
            return self.thumb_undefined(op);
        }
        let target = self.reg(REG_LR).wrapping_add((op & 0x7FF) << 1);
        let return_addr = self.regs.pc() | 1;
        self.regs.write(REG_LR, return_addr);
        if to_thumb {
            self.branch_to(target);
        } else {
            self.branch_exchange(target & !3);
        }
        3
    }
}

//! ARM CPU core
//!
//! Architectural state and the top-level execute loop for the 32-bit
//! ARM v3/v4/v4T/v5/v5TE family.
//!
//! # Module Organization
//!
//! - `psr`: CPSR/SPSR layout, processor modes
//! - `registers`: banked register file (37-slot backing store)
//! - `alu`: barrel shifter, flag tables, saturating arithmetic
//! - `arm`: ARM instruction decode and semantics
//! - `thumb`: Thumb instruction decode and semantics
//! - `exceptions`: exception kinds, priorities, pending latch
//! - `mmu`: translation-table walker and fault decision table
//! - `cp15`: system-control coprocessor and TCM overlay
//!
//! # Execute loop
//!
//! `run` selects a specialized inner loop on (Thumb state, prefetch
//! enable); the MMU-enable axis lives in the translation helpers,
//! which short-circuit to identity when it is off. Any instruction or
//! CP15 write that invalidates the loop's assumptions (mode switch,
//! Thumb toggle, MMU or vector-base change) sets the `mode_changed`
//! latch; the inner loop breaks and the outer loop re-selects. All
//! instruction fetches go through a small prefetch queue that caches
//! translated addresses; translation failures poison the queue slot
//! and surface as a prefetch abort only if that slot reaches execute.

use log::warn;
use thiserror::Error;

pub mod psr;

mod alu;
mod arm;
mod cp15;
mod exceptions;
mod mmu;
mod registers;
mod thumb;

#[cfg(test)]
mod tests;

pub use cp15::{Control, Cp15, Tcm};
pub use exceptions::{Exception, Pending};
pub use mmu::{build_fault_table, reference_check, Fault};
pub use psr::{Mode, Psr};
pub use registers::{RegisterFile, REG_LR, REG_PC, REG_SP};

use crate::bus::{AccessKind, Bus};
use crate::emu::Config;

/// Cycles charged for taking an exception (vector fetch + refill).
const EXCEPTION_CYCLES: u32 = 3;

/// Maximum depth of the prefetch queue.
const PREFETCH_DEPTH: usize = 3;

/// Host-visible interrupt and abort lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputLine {
    Irq,
    Fiq,
    AbortData,
    AbortPrefetch,
    Undefined,
}

/// Errors from the state-loading half of the state interface.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("truncated state stream")]
    Truncated,
    #[error("state entry `{key}` has length {len}, expected {expected}")]
    BadLength {
        key: String,
        len: usize,
        expected: usize,
    },
}

/// One prefetched instruction slot: untranslated address, raw opcode,
/// and the latched translation fault if the probe failed.
#[derive(Debug, Clone, Copy, Default)]
struct PrefetchSlot {
    vaddr: u32,
    word: u32,
    fault: Option<u32>,
}

/// Ring buffer of prefetched instruction words.
#[derive(Debug, Default)]
struct PrefetchQueue {
    slots: [PrefetchSlot; PREFETCH_DEPTH],
    head: usize,
    len: usize,
}

impl PrefetchQueue {
    #[inline]
    fn flush(&mut self) {
        self.head = 0;
        self.len = 0;
    }

    #[inline]
    fn head_matches(&self, pc: u32) -> bool {
        self.len > 0 && self.slots[self.head].vaddr == pc
    }

    #[inline]
    fn tail_vaddr(&self) -> Option<u32> {
        if self.len == 0 {
            None
        } else {
            Some(self.slots[(self.head + self.len - 1) % PREFETCH_DEPTH].vaddr)
        }
    }

    #[inline]
    fn push(&mut self, slot: PrefetchSlot) {
        debug_assert!(self.len < PREFETCH_DEPTH);
        self.slots[(self.head + self.len) % PREFETCH_DEPTH] = slot;
        self.len += 1;
    }

    #[inline]
    fn pop(&mut self) -> PrefetchSlot {
        debug_assert!(self.len > 0);
        let slot = self.slots[self.head];
        self.head = (self.head + 1) % PREFETCH_DEPTH;
        self.len -= 1;
        slot
    }
}

/// ARM CPU state.
pub struct Cpu {
    /// Banked register file (31 general + CPSR + 5 SPSR slots).
    pub(crate) regs: RegisterFile,
    /// Latched pending exceptions.
    pub(crate) pending: Pending,
    /// System-control coprocessor.
    pub(crate) cp15: Cp15,
    /// Construction-time configuration (variant, endianness, features).
    pub(crate) config: Config,
    /// Prefetch queue with translated-address cache.
    prefetch: PrefetchQueue,
    /// Remaining cycle budget of the current `run` call.
    cycles: i64,
    /// Set by anything that invalidates the inner-loop specialization.
    mode_changed: bool,
    /// Lifetime cycle counter (CP14 clock-counter stub reads this).
    total_cycles: u64,
    /// Raw opcode of the last executed instruction (trace/history).
    last_opcode: u32,
}

impl Cpu {
    /// Create a CPU in reset state for the given device configuration.
    pub fn new(config: Config) -> Self {
        let cp15 = Cp15::new(config.id, config.cache_type, config.tcm_type);
        let mut cpu = Self {
            regs: RegisterFile::new(),
            pending: Pending::default(),
            cp15,
            config,
            prefetch: PrefetchQueue::default(),
            cycles: 0,
            mode_changed: false,
            total_cycles: 0,
            last_opcode: 0,
        };
        cpu.reset();
        cpu
    }

    /// Reset: Supervisor mode, IRQ and FIQ masked, ARM state,
    /// PC at the reset vector.
    pub fn reset(&mut self) {
        self.regs = RegisterFile::new();
        let cpsr = Psr(psr::I | psr::F).with_mode(Mode::Supervisor);
        self.regs.set_cpsr(cpsr);
        self.regs.switch_mode(Mode::Supervisor);
        self.cp15.reset();
        self.pending.clear_all();
        self.prefetch.flush();
        self.regs.set_pc(self.vector_base());
        self.mode_changed = false;
        self.total_cycles = 0;
        self.last_opcode = 0;
    }

    // ========== Host-facing state ==========

    /// Raise or lower an interrupt/abort line.
    pub fn set_input_line(&mut self, line: InputLine, state: bool) {
        let exc = match line {
            InputLine::Irq => Exception::Irq,
            InputLine::Fiq => Exception::Fiq,
            InputLine::AbortData => Exception::DataAbort,
            InputLine::AbortPrefetch => Exception::PrefetchAbort,
            InputLine::Undefined => Exception::Undefined,
        };
        self.pending.set(exc, state);
    }

    /// Program counter (address of the next instruction to execute).
    #[inline]
    pub fn pc(&self) -> u32 {
        self.regs.pc()
    }

    /// Current CPSR.
    #[inline]
    pub fn cpsr(&self) -> Psr {
        self.regs.cpsr()
    }

    /// Current mode, derived from the CPSR.
    pub fn mode(&self) -> Mode {
        self.regs.view_mode()
    }

    /// Read an architectural register through the current mode view.
    pub fn read_reg(&self, r: usize) -> u32 {
        self.regs.read(r)
    }

    /// Write an architectural register through the current mode view.
    pub fn write_reg(&mut self, r: usize, val: u32) {
        if r == REG_PC {
            self.branch_to(val);
        } else {
            self.regs.write(r, val);
        }
    }

    /// Register file access for hosts and tests.
    pub fn regs(&self) -> &RegisterFile {
        &self.regs
    }

    pub fn regs_mut(&mut self) -> &mut RegisterFile {
        &mut self.regs
    }

    /// CP15 access for hosts and tests.
    pub fn cp15(&self) -> &Cp15 {
        &self.cp15
    }

    pub fn cp15_mut(&mut self) -> &mut Cp15 {
        &mut self.cp15
    }

    /// Pending-exception latch (inspection).
    pub fn pending(&self) -> &Pending {
        &self.pending
    }

    /// Lifetime executed-cycle count.
    pub fn total_cycles(&self) -> u64 {
        self.total_cycles
    }

    /// Raw opcode of the most recently executed instruction.
    pub fn last_opcode(&self) -> u32 {
        self.last_opcode
    }

    /// Exception vector base: 0 or 0xFFFF0000, from the construction
    /// flag or the CP15 high-vectors control bit.
    #[inline]
    pub fn vector_base(&self) -> u32 {
        if self.config.high_vectors || self.cp15.control.contains(Control::VECTORS) {
            0xFFFF_0000
        } else {
            0
        }
    }

    // ========== Register access during execution ==========

    /// Operand read: R15 reads two fetch slots ahead of the executing
    /// instruction (PC+8 in ARM state, PC+4 in Thumb).
    #[inline]
    pub(crate) fn reg(&self, r: usize) -> u32 {
        if r == REG_PC {
            let ahead = if self.regs.cpsr().thumb() { 2 } else { 4 };
            self.regs.pc().wrapping_add(ahead)
        } else {
            self.regs.read(r)
        }
    }

    /// Operand write: writes to R15 branch and flush the prefetch
    /// queue.
    #[inline]
    pub(crate) fn set_reg(&mut self, r: usize, val: u32) {
        if r == REG_PC {
            self.branch_to(val);
        } else {
            self.regs.write(r, val);
        }
    }

    /// Branch within the current instruction set.
    pub(crate) fn branch_to(&mut self, target: u32) {
        let mask = if self.regs.cpsr().thumb() { !1 } else { !3 };
        self.regs.set_pc(target & mask);
        self.flush_prefetch();
    }

    /// BX/BLX-style branch: bit 0 of the target selects Thumb state.
    pub(crate) fn branch_exchange(&mut self, target: u32) {
        let mut cpsr = self.regs.cpsr();
        let to_thumb = target & 1 != 0;
        if cpsr.thumb() != to_thumb {
            cpsr.set_flag(psr::T, to_thumb);
            self.regs.set_cpsr(cpsr);
            self.note_dispatch_change();
        }
        let mask = if to_thumb { !1 } else { !3 };
        self.regs.set_pc(target & mask);
        self.flush_prefetch();
    }

    /// Full CPSR replacement (MSR, SPSR restore). Keeps the register
    /// view in sync with the mode field and latches a dispatch change
    /// when the mode or Thumb bit moved.
    pub(crate) fn write_cpsr(&mut self, val: u32) {
        let old = self.regs.cpsr();
        let new = Psr(val);
        match new.mode() {
            Some(mode) => {
                if old.mode() != Some(mode) {
                    self.regs.switch_mode(mode);
                }
            }
            None => warn!("CPSR write with reserved mode field {:02X}", val & 0x1F),
        }
        self.regs.set_cpsr(new);
        if old.mode() != new.mode() || old.thumb() != new.thumb() {
            self.note_dispatch_change();
        }
    }

    /// Invalidate the inner-loop specialization and the prefetch queue.
    pub(crate) fn note_dispatch_change(&mut self) {
        self.mode_changed = true;
        self.flush_prefetch();
    }

    #[inline]
    pub(crate) fn flush_prefetch(&mut self) {
        self.prefetch.flush();
    }

    // ========== Exceptions ==========

    /// Take an exception: capture LR and SPSR, switch mode, mask, and
    /// jump to the vector.
    pub(crate) fn enter_exception(&mut self, exc: Exception) {
        let old_cpsr = self.regs.cpsr();
        let thumb = old_cpsr.thumb();
        let pc = self.regs.pc();
        // Return-address capture per exception type, relative to the
        // next-fetch PC (the faulting instruction has already advanced
        // it for aborts on completed instructions).
        let lr = match exc {
            Exception::DataAbort => pc.wrapping_add(if thumb { 6 } else { 4 }),
            Exception::Fiq | Exception::Irq | Exception::PrefetchAbort => pc.wrapping_add(4),
            Exception::Swi | Exception::Undefined => pc,
            Exception::Reset => 0,
        };

        let mode = exc.target_mode();
        self.regs.set_spsr_of(mode, old_cpsr);
        self.regs.switch_mode(mode);
        self.regs.write(REG_LR, lr);

        let mut new_cpsr = old_cpsr.with_mode(mode);
        new_cpsr.set_flag(psr::T, false);
        new_cpsr.set_flag(psr::I, true);
        if exc.disables_fiq() {
            new_cpsr.set_flag(psr::F, true);
        }
        self.regs.set_cpsr(new_cpsr);

        self.regs.set_pc(self.vector_base() + exc.vector_offset());
        self.pending.set(exc, false);
        self.note_dispatch_change();
    }

    /// Service the highest-priority serviceable pending exception.
    /// Returns the cycles consumed, or `None` when everything pending
    /// is masked.
    fn service_pending(&mut self) -> Option<u32> {
        let cpsr = self.regs.cpsr();
        let exc = self
            .pending
            .next(cpsr.irq_disabled(), cpsr.fiq_disabled())?;
        self.enter_exception(exc);
        self.total_cycles += EXCEPTION_CYCLES as u64;
        Some(EXCEPTION_CYCLES)
    }

    // ========== Instruction fetch ==========

    fn fetch_slot<B: Bus, const THUMB: bool>(&mut self, bus: &mut B, vaddr: u32) -> PrefetchSlot {
        // The ITCM window intercepts fetches before the MMU and bus.
        if self.config.has_tcm() && self.cp15.itcm.hits(vaddr) {
            let word = if THUMB {
                self.cp15.itcm.read_half(vaddr) as u32
            } else {
                self.cp15.itcm.read_word(vaddr)
            };
            return PrefetchSlot {
                vaddr,
                word,
                fault: None,
            };
        }
        match self.translate_fetch(bus, vaddr) {
            Ok(paddr) => {
                let word = if THUMB {
                    bus.read_half(paddr) as u32
                } else {
                    bus.read_word(paddr)
                };
                PrefetchSlot {
                    vaddr,
                    word,
                    fault: None,
                }
            }
            Err(fault) => PrefetchSlot {
                vaddr,
                word: 0,
                fault: Some(fault.fsr),
            },
        }
    }

    fn prefetch_fill<B: Bus, const THUMB: bool>(&mut self, bus: &mut B, pc: u32) {
        let step = if THUMB { 2 } else { 4 };
        let depth = self.config.prefetch_depth.clamp(1, PREFETCH_DEPTH);
        while self.prefetch.len < depth {
            let vaddr = match self.prefetch.tail_vaddr() {
                Some(v) => v.wrapping_add(step),
                None => pc,
            };
            let slot = self.fetch_slot::<B, THUMB>(bus, vaddr);
            self.prefetch.push(slot);
        }
    }

    /// Fetch the instruction at PC, through the queue when prefetch is
    /// enabled. On a poisoned slot the latched fault becomes a pending
    /// prefetch abort and PC does not advance.
    fn fetch<B: Bus, const THUMB: bool, const PF: bool>(&mut self, bus: &mut B) -> Result<u32, ()> {
        let pc = self.regs.pc();
        if PF {
            if !self.prefetch.head_matches(pc) {
                self.prefetch.flush();
            }
            self.prefetch_fill::<B, THUMB>(bus, pc);
            let slot = self.prefetch.pop();
            match slot.fault {
                None => Ok(slot.word),
                Some(fsr) => {
                    self.raise_prefetch_abort(fsr, slot.vaddr);
                    Err(())
                }
            }
        } else {
            let slot = self.fetch_slot::<B, THUMB>(bus, pc);
            match slot.fault {
                None => Ok(slot.word),
                Some(fsr) => {
                    self.raise_prefetch_abort(fsr, pc);
                    Err(())
                }
            }
        }
    }

    // ========== Condition evaluation ==========

    /// Evaluate a 4-bit condition field against the CPSR flags.
    /// Condition 15 (NV) is handled by the caller.
    pub(crate) fn condition_passed(&self, cond: u32) -> bool {
        let cpsr = self.regs.cpsr();
        match cond {
            0x0 => cpsr.z(),                           // EQ
            0x1 => !cpsr.z(),                          // NE
            0x2 => cpsr.c(),                           // CS/HS
            0x3 => !cpsr.c(),                          // CC/LO
            0x4 => cpsr.n(),                           // MI
            0x5 => !cpsr.n(),                          // PL
            0x6 => cpsr.v(),                           // VS
            0x7 => !cpsr.v(),                          // VC
            0x8 => cpsr.c() && !cpsr.z(),              // HI
            0x9 => !cpsr.c() || cpsr.z(),              // LS
            0xA => cpsr.n() == cpsr.v(),               // GE
            0xB => cpsr.n() != cpsr.v(),               // LT
            0xC => !cpsr.z() && cpsr.n() == cpsr.v(),  // GT
            0xD => cpsr.z() || cpsr.n() != cpsr.v(),   // LE
            _ => true,                                 // AL
        }
    }

    // ========== Step and run ==========

    fn step_arm<B: Bus, const PF: bool>(&mut self, bus: &mut B) -> u32 {
        bus.instruction_hook(self.regs.pc());
        let insn = match self.fetch::<B, false, PF>(bus) {
            Ok(word) => word,
            Err(()) => {
                self.total_cycles += 1;
                return 1;
            }
        };
        self.last_opcode = insn;
        self.regs.advance_pc(4);

        let cond = insn >> 28;
        let cost = if cond == 0xE {
            self.execute_arm(bus, insn)
        } else if cond == 0xF {
            // NV: v5 unconditional space; squashed on v4.
            if self.config.has_v5() {
                self.execute_arm_unconditional(bus, insn)
            } else {
                1
            }
        } else if self.condition_passed(cond) {
            self.execute_arm(bus, insn)
        } else {
            1
        };
        self.total_cycles += cost as u64;
        cost
    }

    fn step_thumb<B: Bus, const PF: bool>(&mut self, bus: &mut B) -> u32 {
        bus.instruction_hook(self.regs.pc());
        let insn = match self.fetch::<B, true, PF>(bus) {
            Ok(word) => word as u16,
            Err(()) => {
                self.total_cycles += 1;
                return 1;
            }
        };
        self.last_opcode = insn as u32;
        self.regs.advance_pc(2);

        let cost = self.execute_thumb(bus, insn);
        self.total_cycles += cost as u64;
        cost
    }

    /// Execute a single instruction (or take a pending exception).
    /// Returns the cycles consumed.
    pub fn step<B: Bus>(&mut self, bus: &mut B) -> u32 {
        if self.pending.any {
            if let Some(cost) = self.service_pending() {
                return cost;
            }
        }
        let pf = self.config.prefetch_depth > 1;
        match (self.regs.cpsr().thumb(), pf) {
            (false, false) => self.step_arm::<B, false>(bus),
            (false, true) => self.step_arm::<B, true>(bus),
            (true, false) => self.step_thumb::<B, false>(bus),
            (true, true) => self.step_thumb::<B, true>(bus),
        }
    }

    fn run_inner<B: Bus, const THUMB: bool, const PF: bool>(&mut self, bus: &mut B) {
        while self.cycles > 0 && !self.mode_changed {
            if self.pending.any {
                if let Some(cost) = self.service_pending() {
                    self.cycles -= cost as i64;
                    // Entry switched mode; the latch forces re-selection.
                    break;
                }
            }
            let cost = if THUMB {
                self.step_thumb::<B, PF>(bus)
            } else {
                self.step_arm::<B, PF>(bus)
            };
            self.cycles -= cost as i64;
        }
    }

    /// Run for (approximately) `cycles` cycles, re-selecting the
    /// specialized inner loop whenever the mode-change latch fires.
    /// Returns the cycles actually consumed.
    pub fn run<B: Bus>(&mut self, bus: &mut B, cycles: u32) -> u32 {
        self.cycles = cycles as i64;
        while self.cycles > 0 {
            self.mode_changed = false;
            let thumb = self.regs.cpsr().thumb();
            let pf = self.config.prefetch_depth > 1;
            // The MMU-enable axis lives inside the fetch/data helpers;
            // thumb × prefetch select the monomorphized loop.
            match (thumb, pf) {
                (false, false) => self.run_inner::<B, false, false>(bus),
                (false, true) => self.run_inner::<B, false, true>(bus),
                (true, false) => self.run_inner::<B, true, false>(bus),
                (true, true) => self.run_inner::<B, true, true>(bus),
            }
        }
        (cycles as i64 - self.cycles).max(0) as u32
    }

    // ========== Data memory access ==========
    //
    // Every data access consults the TCM windows first (bypassing the
    // MMU), then translates, then goes to the bus. Alignment checking
    // applies when the CP15 A bit is set.

    pub(crate) fn read_data_word<B: Bus>(
        &mut self,
        bus: &mut B,
        vaddr: u32,
        user: bool,
    ) -> Result<u32, ()> {
        if self.cp15.control.contains(Control::ALIGN) && vaddr & 3 != 0 {
            self.raise_data_abort(mmu::fsr::ALIGNMENT, vaddr);
            return Err(());
        }
        let vaddr = vaddr & !3;
        if self.config.has_tcm() {
            if self.cp15.dtcm.hits(vaddr) {
                return Ok(self.cp15.dtcm.read_word(vaddr));
            }
            if self.cp15.itcm.hits(vaddr) {
                return Ok(self.cp15.itcm.read_word(vaddr));
            }
        }
        let paddr = self.translate_data(bus, vaddr, AccessKind::Read, user)?;
        Ok(bus.read_word(paddr))
    }

    pub(crate) fn read_data_half<B: Bus>(
        &mut self,
        bus: &mut B,
        vaddr: u32,
        user: bool,
    ) -> Result<u16, ()> {
        if self.cp15.control.contains(Control::ALIGN) && vaddr & 1 != 0 {
            self.raise_data_abort(mmu::fsr::ALIGNMENT, vaddr);
            return Err(());
        }
        let vaddr = vaddr & !1;
        if self.config.has_tcm() {
            if self.cp15.dtcm.hits(vaddr) {
                return Ok(self.cp15.dtcm.read_half(vaddr));
            }
            if self.cp15.itcm.hits(vaddr) {
                return Ok(self.cp15.itcm.read_half(vaddr));
            }
        }
        let paddr = self.translate_data(bus, vaddr, AccessKind::Read, user)?;
        Ok(bus.read_half(paddr))
    }

    pub(crate) fn read_data_byte<B: Bus>(
        &mut self,
        bus: &mut B,
        vaddr: u32,
        user: bool,
    ) -> Result<u8, ()> {
        if self.config.has_tcm() {
            if self.cp15.dtcm.hits(vaddr) {
                return Ok(self.cp15.dtcm.read_byte(vaddr));
            }
            if self.cp15.itcm.hits(vaddr) {
                return Ok(self.cp15.itcm.read_byte(vaddr));
            }
        }
        let paddr = self.translate_data(bus, vaddr, AccessKind::Read, user)?;
        Ok(bus.read_byte(paddr))
    }

    pub(crate) fn write_data_word<B: Bus>(
        &mut self,
        bus: &mut B,
        vaddr: u32,
        val: u32,
        user: bool,
    ) -> Result<(), ()> {
        if self.cp15.control.contains(Control::ALIGN) && vaddr & 3 != 0 {
            self.raise_data_abort(mmu::fsr::ALIGNMENT, vaddr);
            return Err(());
        }
        let vaddr = vaddr & !3;
        if self.config.has_tcm() {
            if self.cp15.dtcm.hits(vaddr) {
                self.cp15.dtcm.write_word(vaddr, val);
                return Ok(());
            }
            if self.cp15.itcm.hits(vaddr) {
                self.cp15.itcm.write_word(vaddr, val);
                return Ok(());
            }
        }
        let paddr = self.translate_data(bus, vaddr, AccessKind::Write, user)?;
        bus.write_word(paddr, val);
        Ok(())
    }

    pub(crate) fn write_data_half<B: Bus>(
        &mut self,
        bus: &mut B,
        vaddr: u32,
        val: u16,
        user: bool,
    ) -> Result<(), ()> {
        if self.cp15.control.contains(Control::ALIGN) && vaddr & 1 != 0 {
            self.raise_data_abort(mmu::fsr::ALIGNMENT, vaddr);
            return Err(());
        }
        let vaddr = vaddr & !1;
        if self.config.has_tcm() {
            if self.cp15.dtcm.hits(vaddr) {
                self.cp15.dtcm.write_half(vaddr, val);
                return Ok(());
            }
            if self.cp15.itcm.hits(vaddr) {
                self.cp15.itcm.write_half(vaddr, val);
                return Ok(());
            }
        }
        let paddr = self.translate_data(bus, vaddr, AccessKind::Write, user)?;
        bus.write_half(paddr, val);
        Ok(())
    }

    pub(crate) fn write_data_byte<B: Bus>(
        &mut self,
        bus: &mut B,
        vaddr: u32,
        val: u8,
        user: bool,
    ) -> Result<(), ()> {
        if self.config.has_tcm() {
            if self.cp15.dtcm.hits(vaddr) {
                self.cp15.dtcm.write_byte(vaddr, val);
                return Ok(());
            }
            if self.cp15.itcm.hits(vaddr) {
                self.cp15.itcm.write_byte(vaddr, val);
                return Ok(());
            }
        }
        let paddr = self.translate_data(bus, vaddr, AccessKind::Write, user)?;
        bus.write_byte(paddr, val);
        Ok(())
    }
}

// ========== State interface ==========

/// Symbolic names of the 37 register-file slots, in slot order.
#[rustfmt::skip]
const SLOT_NAMES: [&str; RegisterFile::SLOT_COUNT] = [
    "r0", "r1", "r2", "r3", "r4", "r5", "r6", "r7",
    "r8", "r9", "r10", "r11", "r12", "r13", "r14", "r15",
    "r8_fiq", "r9_fiq", "r10_fiq", "r11_fiq", "r12_fiq", "r13_fiq", "r14_fiq",
    "r13_irq", "r14_irq",
    "r13_svc", "r14_svc",
    "r13_abt", "r14_abt",
    "r13_und", "r14_und",
    "cpsr",
    "spsr_fiq", "spsr_irq", "spsr_svc", "spsr_abt", "spsr_und",
];

/// CP15 scalar registers exposed by name.
const CP15_NAMES: [&str; 8] = [
    "cp15_control",
    "cp15_ttb",
    "cp15_dacr",
    "cp15_fsr_data",
    "cp15_fsr_prefetch",
    "cp15_far",
    "cp15_fcse_pid",
    "cp15_itcm_reg",
];

fn push_entry(out: &mut Vec<u8>, key: &str, value: &[u8]) {
    debug_assert!(key.len() <= u8::MAX as usize);
    out.push(key.len() as u8);
    out.extend_from_slice(key.as_bytes());
    out.extend_from_slice(&(value.len() as u32).to_le_bytes());
    out.extend_from_slice(value);
}

impl Cpu {
    /// Read an architectural register or CP15 register by symbolic
    /// name (`"r0"`, `"r13_irq"`, `"cpsr"`, `"cp15_ttb"`, ...).
    pub fn reg_by_name(&self, name: &str) -> Option<u32> {
        if name == "pc" {
            return Some(self.regs.pc());
        }
        if let Some(i) = SLOT_NAMES.iter().position(|&n| n == name) {
            return Some(self.regs.slot(i));
        }
        match name {
            "cp15_control" => Some(self.cp15.control.bits()),
            "cp15_ttb" => Some(self.cp15.ttb),
            "cp15_dacr" => Some(self.cp15.dacr),
            "cp15_fsr_data" => Some(self.cp15.fsr_data),
            "cp15_fsr_prefetch" => Some(self.cp15.fsr_prefetch),
            "cp15_far" => Some(self.cp15.far),
            "cp15_fcse_pid" => Some(self.cp15.fcse_pid),
            "cp15_itcm_reg" => Some(self.cp15.itcm.reg),
            "cp15_dtcm_reg" => Some(self.cp15.dtcm.reg),
            _ => None,
        }
    }

    /// Serialize all architectural state as named (key, value) pairs.
    pub fn save_state(&self, out: &mut Vec<u8>) {
        for (i, name) in SLOT_NAMES.iter().enumerate() {
            push_entry(out, name, &self.regs.slot(i).to_le_bytes());
        }
        for name in CP15_NAMES {
            // reg_by_name covers every CP15 scalar.
            let val = self.reg_by_name(name).unwrap_or(0);
            push_entry(out, name, &val.to_le_bytes());
        }
        push_entry(out, "cp15_dtcm_reg", &self.cp15.dtcm.reg.to_le_bytes());
        push_entry(out, "itcm_data", self.cp15.itcm.data());
        push_entry(out, "dtcm_data", self.cp15.dtcm.data());

        let mut pending = 0u8;
        if self.pending.irq {
            pending |= 1 << 0;
        }
        if self.pending.fiq {
            pending |= 1 << 1;
        }
        if self.pending.data_abort {
            pending |= 1 << 2;
        }
        if self.pending.prefetch_abort {
            pending |= 1 << 3;
        }
        if self.pending.undefined {
            pending |= 1 << 4;
        }
        if self.pending.swi {
            pending |= 1 << 5;
        }
        push_entry(out, "pending", &[pending]);
        push_entry(out, "total_cycles", &self.total_cycles.to_le_bytes());
    }

    /// Restore state saved by `save_state`. Unknown keys are skipped
    /// (logged) so streams remain loadable across minor revisions.
    /// The prefetch queue is not serialized; it refills on the next
    /// fetch.
    pub fn load_state(&mut self, data: &[u8]) -> Result<(), StateError> {
        let mut pos = 0usize;
        while pos < data.len() {
            let key_len = data[pos] as usize;
            pos += 1;
            if pos + key_len + 4 > data.len() {
                return Err(StateError::Truncated);
            }
            let key = std::str::from_utf8(&data[pos..pos + key_len]).unwrap_or("");
            pos += key_len;
            let val_len =
                u32::from_le_bytes([data[pos], data[pos + 1], data[pos + 2], data[pos + 3]])
                    as usize;
            pos += 4;
            if pos + val_len > data.len() {
                return Err(StateError::Truncated);
            }
            let value = &data[pos..pos + val_len];
            pos += val_len;
            self.load_entry(key, value)?;
        }

        // Rederive everything that hangs off the serialized scalars.
        if let Some(mode) = self.regs.cpsr().mode() {
            self.regs.switch_mode(mode);
        }
        self.cp15_write(3, 0, 0, self.cp15.dacr);
        self.cp15_write(1, 0, 0, self.cp15.control.bits());
        let itcm_reg = self.cp15.itcm.reg;
        let dtcm_reg = self.cp15.dtcm.reg;
        if self.config.has_tcm() {
            self.cp15_write(9, 1, 1, itcm_reg);
            self.cp15_write(9, 1, 0, dtcm_reg);
        }
        self.cp15.fcse_offset = ((self.cp15.fcse_pid >> 25) & 0x7F) * 0x0200_0000;
        self.flush_prefetch();
        self.mode_changed = false;
        Ok(())
    }

    fn load_entry(&mut self, key: &str, value: &[u8]) -> Result<(), StateError> {
        let word = |value: &[u8]| -> Result<u32, StateError> {
            let bytes: [u8; 4] = value.try_into().map_err(|_| StateError::BadLength {
                key: key.to_string(),
                len: value.len(),
                expected: 4,
            })?;
            Ok(u32::from_le_bytes(bytes))
        };

        if let Some(i) = SLOT_NAMES.iter().position(|&n| n == key) {
            self.regs.set_slot(i, word(value)?);
            return Ok(());
        }
        match key {
            "cp15_control" => self.cp15.control = Control::from_bits_truncate(word(value)?),
            "cp15_ttb" => self.cp15.ttb = word(value)?,
            "cp15_dacr" => self.cp15.dacr = word(value)?,
            "cp15_fsr_data" => self.cp15.fsr_data = word(value)?,
            "cp15_fsr_prefetch" => self.cp15.fsr_prefetch = word(value)?,
            "cp15_far" => self.cp15.far = word(value)?,
            "cp15_fcse_pid" => self.cp15.fcse_pid = word(value)?,
            "cp15_itcm_reg" => self.cp15.itcm.reg = word(value)?,
            "cp15_dtcm_reg" => self.cp15.dtcm.reg = word(value)?,
            "itcm_data" => {
                let data = self.cp15.itcm.data_mut();
                let expected = data.len();
                if value.len() != expected {
                    return Err(StateError::BadLength {
                        key: key.to_string(),
                        len: value.len(),
                        expected,
                    });
                }
                data.copy_from_slice(value);
            }
            "dtcm_data" => {
                let data = self.cp15.dtcm.data_mut();
                let expected = data.len();
                if value.len() != expected {
                    return Err(StateError::BadLength {
                        key: key.to_string(),
                        len: value.len(),
                        expected,
                    });
                }
                data.copy_from_slice(value);
            }
            "pending" => {
                let bits = *value.first().ok_or(StateError::Truncated)?;
                self.pending.set(Exception::Irq, bits & (1 << 0) != 0);
                self.pending.set(Exception::Fiq, bits & (1 << 1) != 0);
                self.pending.set(Exception::DataAbort, bits & (1 << 2) != 0);
                self.pending.set(Exception::PrefetchAbort, bits & (1 << 3) != 0);
                self.pending.set(Exception::Undefined, bits & (1 << 4) != 0);
                self.pending.set(Exception::Swi, bits & (1 << 5) != 0);
            }
            "total_cycles" => {
                let bytes: [u8; 8] = value.try_into().map_err(|_| StateError::BadLength {
                    key: key.to_string(),
                    len: value.len(),
                    expected: 8,
                })?;
                self.total_cycles = u64::from_le_bytes(bytes);
            }
            _ => warn!("unknown state key `{key}` skipped"),
        }
        Ok(())
    }
}

//! Banked register file
//!
//! The 16 architectural registers of each mode are views into a flat
//! backing store of 37 slots: 31 general registers, the CPSR, and the
//! five SPSRs. A 7×16 table maps `(mode bank, register index)` to a
//! slot, so `switch_mode` only swaps the active view index and never
//! copies register values.
//!
//! Banking rules:
//! - User and System share all 16 registers.
//! - FIQ banks R8..R14.
//! - IRQ, Supervisor, Abort and Undefined each bank R13 and R14.
//! - R15 (the PC) is shared by every mode.

use log::debug;

use super::psr::{Mode, Psr};

/// Program counter register index.
pub const REG_PC: usize = 15;
/// Link register index.
pub const REG_LR: usize = 14;
/// Stack pointer register index.
pub const REG_SP: usize = 13;

// Slot layout of the backing store.
//
//  0..=15  user R0..R15 (15 is the shared PC)
// 16..=22  FIQ R8..R14
// 23..=24  IRQ R13..R14
// 25..=26  SVC R13..R14
// 27..=28  ABT R13..R14
// 29..=30  UND R13..R14
// 31       CPSR
// 32..=36  SPSR: FIQ, IRQ, SVC, ABT, UND
const SLOT_CPSR: usize = 31;
const SLOT_SPSR: [usize; 7] = [
    SLOT_CPSR, // User: reads fall back to CPSR
    32,        // FIQ
    33,        // IRQ
    34,        // SVC
    35,        // ABT
    36,        // UND
    SLOT_CPSR, // System: reads fall back to CPSR
];

/// Per-mode index-permutation views, indexed by `Mode::bank()`.
#[rustfmt::skip]
const VIEW: [[usize; 16]; 7] = [
    // User
    [0, 1, 2, 3, 4, 5, 6, 7,  8,  9, 10, 11, 12, 13, 14, 15],
    // FIQ
    [0, 1, 2, 3, 4, 5, 6, 7, 16, 17, 18, 19, 20, 21, 22, 15],
    // IRQ
    [0, 1, 2, 3, 4, 5, 6, 7,  8,  9, 10, 11, 12, 23, 24, 15],
    // Supervisor
    [0, 1, 2, 3, 4, 5, 6, 7,  8,  9, 10, 11, 12, 25, 26, 15],
    // Abort
    [0, 1, 2, 3, 4, 5, 6, 7,  8,  9, 10, 11, 12, 27, 28, 15],
    // Undefined
    [0, 1, 2, 3, 4, 5, 6, 7,  8,  9, 10, 11, 12, 29, 30, 15],
    // System
    [0, 1, 2, 3, 4, 5, 6, 7,  8,  9, 10, 11, 12, 13, 14, 15],
];

/// Flat 37-slot register store with a mode-indexed view.
pub struct RegisterFile {
    slots: [u32; 37],
    bank: usize,
}

impl RegisterFile {
    /// Create a register file in Supervisor mode with everything zeroed.
    pub fn new() -> Self {
        let mut rf = Self {
            slots: [0; 37],
            bank: Mode::Supervisor.bank(),
        };
        rf.slots[SLOT_CPSR] = Psr(0).with_mode(Mode::Supervisor).raw();
        rf
    }

    /// Read a register through the active mode view.
    #[inline]
    pub fn read(&self, r: usize) -> u32 {
        self.slots[VIEW[self.bank][r]]
    }

    /// Write a register through the active mode view.
    #[inline]
    pub fn write(&mut self, r: usize, val: u32) {
        self.slots[VIEW[self.bank][r]] = val;
    }

    /// Read a register through the User view regardless of the current
    /// mode (LDM/STM with the S bit).
    #[inline]
    pub fn read_user(&self, r: usize) -> u32 {
        self.slots[VIEW[0][r]]
    }

    /// Write a register through the User view.
    #[inline]
    pub fn write_user(&mut self, r: usize, val: u32) {
        self.slots[VIEW[0][r]] = val;
    }

    /// The shared program counter.
    #[inline]
    pub fn pc(&self) -> u32 {
        self.slots[REG_PC]
    }

    #[inline]
    pub fn set_pc(&mut self, val: u32) {
        self.slots[REG_PC] = val;
    }

    #[inline]
    pub fn advance_pc(&mut self, by: u32) {
        self.slots[REG_PC] = self.slots[REG_PC].wrapping_add(by);
    }

    /// Current CPSR value.
    #[inline]
    pub fn cpsr(&self) -> Psr {
        Psr(self.slots[SLOT_CPSR])
    }

    /// Store a CPSR value. The caller is responsible for keeping the
    /// view in sync via `switch_mode` when the mode field changes.
    #[inline]
    pub fn set_cpsr(&mut self, psr: Psr) {
        self.slots[SLOT_CPSR] = psr.raw();
    }

    /// SPSR of the current mode. User and System have no SPSR; reading
    /// it returns the CPSR, matching reference-implementation behavior.
    #[inline]
    pub fn spsr(&self) -> Psr {
        let slot = SLOT_SPSR[self.bank];
        if slot == SLOT_CPSR {
            debug!("SPSR read in a mode without one; returning CPSR");
        }
        Psr(self.slots[slot])
    }

    /// Write the SPSR of the current mode. Dropped in User/System,
    /// which have none.
    #[inline]
    pub fn set_spsr(&mut self, psr: Psr) {
        let slot = SLOT_SPSR[self.bank];
        if slot == SLOT_CPSR {
            debug!("SPSR write in a mode without one; ignored");
            return;
        }
        self.slots[slot] = psr.raw();
    }

    /// SPSR of an arbitrary mode (state inspection).
    #[inline]
    pub fn spsr_of(&self, mode: Mode) -> Psr {
        Psr(self.slots[SLOT_SPSR[mode.bank()]])
    }

    /// Set the SPSR of an arbitrary mode (exception entry targets a
    /// mode that is not yet current).
    #[inline]
    pub fn set_spsr_of(&mut self, mode: Mode, psr: Psr) {
        let slot = SLOT_SPSR[mode.bank()];
        if slot != SLOT_CPSR {
            self.slots[slot] = psr.raw();
        }
    }

    /// Read a register through an arbitrary mode's view (state
    /// inspection / exception entry).
    #[inline]
    pub fn read_of(&self, mode: Mode, r: usize) -> u32 {
        self.slots[VIEW[mode.bank()][r]]
    }

    #[inline]
    pub fn write_of(&mut self, mode: Mode, r: usize, val: u32) {
        self.slots[VIEW[mode.bank()][r]] = val;
    }

    /// Swap the active view to `mode`. No register data moves; the
    /// permutation table is the banking.
    #[inline]
    pub fn switch_mode(&mut self, mode: Mode) {
        self.bank = mode.bank();
    }

    /// Mode the active view belongs to, derived from the bank index.
    pub fn view_mode(&self) -> Mode {
        match self.bank {
            0 => Mode::User,
            1 => Mode::Fiq,
            2 => Mode::Irq,
            3 => Mode::Supervisor,
            4 => Mode::Abort,
            5 => Mode::Undefined,
            _ => Mode::System,
        }
    }

    /// Direct slot access for the state interface.
    #[inline]
    pub fn slot(&self, i: usize) -> u32 {
        self.slots[i]
    }

    #[inline]
    pub fn set_slot(&mut self, i: usize, val: u32) {
        self.slots[i] = val;
    }

    /// Number of backing slots.
    pub const SLOT_COUNT: usize = 37;
}

impl Default for RegisterFile {
    fn default() -> Self {
        Self::new()
    }
}

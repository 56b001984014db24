//! Exception model
//!
//! Kinds, priorities, target modes and vector offsets for the seven
//! architectural exceptions, plus the pending-exception latch the
//! execute loop polls before each instruction.
//!
//! Priority order (highest first): Reset, Data Abort, FIQ, IRQ,
//! Prefetch Abort, Undefined/SWI.

use super::psr::Mode;

/// Architectural exception kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exception {
    Reset,
    DataAbort,
    Fiq,
    Irq,
    PrefetchAbort,
    Undefined,
    Swi,
}

impl Exception {
    /// Mode entered when the exception is taken.
    pub fn target_mode(self) -> Mode {
        match self {
            Exception::Reset => Mode::Supervisor,
            Exception::DataAbort => Mode::Abort,
            Exception::Fiq => Mode::Fiq,
            Exception::Irq => Mode::Irq,
            Exception::PrefetchAbort => Mode::Abort,
            Exception::Undefined => Mode::Undefined,
            Exception::Swi => Mode::Supervisor,
        }
    }

    /// Offset of the exception vector from the vector base.
    pub fn vector_offset(self) -> u32 {
        match self {
            Exception::Reset => 0x00,
            Exception::Undefined => 0x04,
            Exception::Swi => 0x08,
            Exception::PrefetchAbort => 0x0C,
            Exception::DataAbort => 0x10,
            Exception::Irq => 0x18,
            Exception::Fiq => 0x1C,
        }
    }

    /// Whether entry masks FIQ in addition to IRQ.
    pub fn disables_fiq(self) -> bool {
        matches!(self, Exception::Reset | Exception::Fiq)
    }
}

/// Latched pending exceptions with an aggregate fast-check.
///
/// `any` must always equal the disjunction of the individual flags;
/// every mutation goes through `set`/`clear` to keep that invariant.
#[derive(Debug, Clone, Copy, Default)]
pub struct Pending {
    pub irq: bool,
    pub fiq: bool,
    pub data_abort: bool,
    pub prefetch_abort: bool,
    pub undefined: bool,
    pub swi: bool,
    /// Aggregate of all the above.
    pub any: bool,
}

impl Pending {
    pub fn clear_all(&mut self) {
        *self = Pending::default();
    }

    #[inline]
    fn recompute_any(&mut self) {
        self.any = self.irq
            || self.fiq
            || self.data_abort
            || self.prefetch_abort
            || self.undefined
            || self.swi;
    }

    /// Latch or release one exception kind. Reset is handled by the
    /// device wrapper, not the latch.
    pub fn set(&mut self, kind: Exception, state: bool) {
        match kind {
            Exception::Irq => self.irq = state,
            Exception::Fiq => self.fiq = state,
            Exception::DataAbort => self.data_abort = state,
            Exception::PrefetchAbort => self.prefetch_abort = state,
            Exception::Undefined => self.undefined = state,
            Exception::Swi => self.swi = state,
            Exception::Reset => {}
        }
        self.recompute_any();
    }

    /// Highest-priority pending exception, honoring the CPSR masks for
    /// IRQ/FIQ. Aborts and traps are never maskable.
    pub fn next(&self, irq_masked: bool, fiq_masked: bool) -> Option<Exception> {
        if self.data_abort {
            Some(Exception::DataAbort)
        } else if self.fiq && !fiq_masked {
            Some(Exception::Fiq)
        } else if self.irq && !irq_masked {
            Some(Exception::Irq)
        } else if self.prefetch_abort {
            Some(Exception::PrefetchAbort)
        } else if self.undefined {
            Some(Exception::Undefined)
        } else if self.swi {
            Some(Exception::Swi)
        } else {
            None
        }
    }
}

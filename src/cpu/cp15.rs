//! CP15 system-control coprocessor
//!
//! Register bank and write side effects: control register, translation
//! table base, domain access control, fault status/address, FCSE PID,
//! and the ARM946ES tightly-coupled-memory region registers. Cache and
//! TLB maintenance ops are accepted and ignored; this core does not
//! cache translations.
//!
//! CP14 is a clock-counter stub (XScale-style CCNT read).

use bitflags::bitflags;
use log::{debug, trace, warn};

use super::mmu::{self, Fault};
use super::Cpu;

bitflags! {
    /// CP15 register 1, the system control register.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Control: u32 {
        /// M: MMU enable
        const MMU = 1 << 0;
        /// A: alignment fault checking
        const ALIGN = 1 << 1;
        /// C: data cache enable (architectural bit only)
        const DCACHE = 1 << 2;
        /// W: write buffer enable (architectural bit only)
        const WRITE_BUFFER = 1 << 3;
        /// B: big-endian override
        const ENDIAN = 1 << 7;
        /// S: system protection (AP interpretation)
        const SYSTEM = 1 << 8;
        /// R: ROM protection (AP interpretation)
        const ROM = 1 << 9;
        /// I: instruction cache enable (architectural bit only)
        const ICACHE = 1 << 12;
        /// V: exception vectors at 0xFFFF0000
        const VECTORS = 1 << 13;
        /// DTCM enable (ARM946ES)
        const DTCM = 1 << 16;
        /// ITCM enable (ARM946ES)
        const ITCM = 1 << 18;
    }
}

/// Translation table base alignment mask (16 KiB).
pub const TTB_MASK: u32 = 0xFFFF_C000;

/// Window base used when a TCM is disabled; no address can match.
const TCM_DISABLED: u32 = 0xFFFF_FFFF;

/// One tightly-coupled-memory window (ITCM or DTCM).
pub struct Tcm {
    /// First address covered, or the disabled sentinel.
    pub base: u32,
    /// One past the last address covered.
    pub end: u32,
    /// Raw region register value.
    pub reg: u32,
    data: Vec<u8>,
}

impl Tcm {
    fn new(size: usize) -> Self {
        Self {
            base: TCM_DISABLED,
            end: TCM_DISABLED,
            reg: 0,
            data: vec![0; size],
        }
    }

    /// Recompute the window from the region register and enable bit.
    /// `size = 512 << ((reg & 0x3F) >> 1)`, base in the top bits.
    fn recalc(&mut self, enabled: bool) {
        if enabled {
            self.base = self.reg & 0xFFFF_F000;
            let size = 512u32 << ((self.reg & 0x3F) >> 1);
            self.end = self.base.wrapping_add(size);
        } else {
            self.base = TCM_DISABLED;
            self.end = TCM_DISABLED;
        }
    }

    /// Whether `addr` falls inside the enabled window.
    #[inline]
    pub fn hits(&self, addr: u32) -> bool {
        addr >= self.base && addr < self.end
    }

    /// Offset into the backing RAM, wrapping if the programmed window
    /// exceeds the physical TCM size.
    #[inline]
    fn offset(&self, addr: u32) -> usize {
        (addr.wrapping_sub(self.base) as usize) & (self.data.len() - 1)
    }

    #[inline]
    pub fn read_byte(&self, addr: u32) -> u8 {
        self.data[self.offset(addr)]
    }

    #[inline]
    pub fn read_half(&self, addr: u32) -> u16 {
        let i = self.offset(addr & !1);
        u16::from_le_bytes([self.data[i], self.data[(i + 1) & (self.data.len() - 1)]])
    }

    #[inline]
    pub fn read_word(&self, addr: u32) -> u32 {
        let m = self.data.len() - 1;
        let i = self.offset(addr & !3);
        u32::from_le_bytes([
            self.data[i],
            self.data[(i + 1) & m],
            self.data[(i + 2) & m],
            self.data[(i + 3) & m],
        ])
    }

    #[inline]
    pub fn write_byte(&mut self, addr: u32, val: u8) {
        let i = self.offset(addr);
        self.data[i] = val;
    }

    #[inline]
    pub fn write_half(&mut self, addr: u32, val: u16) {
        let m = self.data.len() - 1;
        let i = self.offset(addr & !1);
        let b = val.to_le_bytes();
        self.data[i] = b[0];
        self.data[(i + 1) & m] = b[1];
    }

    #[inline]
    pub fn write_word(&mut self, addr: u32, val: u32) {
        let m = self.data.len() - 1;
        let i = self.offset(addr & !3);
        for (k, byte) in val.to_le_bytes().iter().enumerate() {
            self.data[(i + k) & m] = *byte;
        }
    }

    /// Backing RAM for the state interface.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut Vec<u8> {
        &mut self.data
    }
}

/// CP15 state.
pub struct Cp15 {
    /// System control register.
    pub control: Control,
    /// Translation table base (physical, 16 KiB aligned).
    pub ttb: u32,
    /// Domain access control register, 16 domains × 2 bits.
    pub dacr: u32,
    /// Per-domain access codes derived from `dacr`.
    pub domain_access: [u8; 16],
    /// Data fault status.
    pub fsr_data: u32,
    /// Prefetch fault status.
    pub fsr_prefetch: u32,
    /// Fault address.
    pub far: u32,
    /// FCSE process ID register (raw).
    pub fcse_pid: u32,
    /// Derived remap offset: `((pid >> 25) & 0x7F) * 0x0200_0000`.
    pub fcse_offset: u32,
    /// 512-entry permission decision table, rebuilt on control writes.
    pub fault_table: [Fault; 512],
    /// Main ID register value (device variant).
    pub id: u32,
    /// Cache type register value.
    pub cache_type: u32,
    /// TCM type register value (ARM946ES).
    pub tcm_type: u32,
    /// Instruction TCM (present on ARM946ES/IGS036 only).
    pub itcm: Tcm,
    /// Data TCM.
    pub dtcm: Tcm,
}

/// Physical ITCM size on the ARM946ES (32 KiB).
const ITCM_SIZE: usize = 0x8000;
/// Physical DTCM size on the ARM946ES (16 KiB).
const DTCM_SIZE: usize = 0x4000;

impl Cp15 {
    pub fn new(id: u32, cache_type: u32, tcm_type: u32) -> Self {
        Self {
            control: Control::empty(),
            ttb: 0,
            dacr: 0,
            domain_access: [0; 16],
            fsr_data: 0,
            fsr_prefetch: 0,
            far: 0,
            fcse_pid: 0,
            fcse_offset: 0,
            fault_table: mmu::build_fault_table(false, false),
            id,
            cache_type,
            tcm_type,
            itcm: Tcm::new(ITCM_SIZE),
            dtcm: Tcm::new(DTCM_SIZE),
        }
    }

    /// Reset to the architectural post-reset state: MMU off, TCMs
    /// disabled, fault state cleared.
    pub fn reset(&mut self) {
        self.control = Control::empty();
        self.ttb = 0;
        self.dacr = 0;
        self.domain_access = [0; 16];
        self.fsr_data = 0;
        self.fsr_prefetch = 0;
        self.far = 0;
        self.fcse_pid = 0;
        self.fcse_offset = 0;
        self.fault_table = mmu::build_fault_table(false, false);
        self.itcm.reg = 0;
        self.dtcm.reg = 0;
        self.itcm.recalc(false);
        self.dtcm.recalc(false);
    }

    #[inline]
    pub fn mmu_enabled(&self) -> bool {
        self.control.contains(Control::MMU)
    }

    fn rebuild_domain_table(&mut self) {
        for d in 0..16 {
            self.domain_access[d] = ((self.dacr >> (d * 2)) & 3) as u8;
        }
    }
}

impl Cpu {
    /// MRC p15 — read a CP15 register.
    pub(super) fn cp15_read(&mut self, crn: u32, crm: u32, op2: u32) -> u32 {
        let cp15 = &self.cp15;
        match crn {
            0 => match op2 {
                0 => cp15.id,
                1 => cp15.cache_type,
                2 => cp15.tcm_type,
                _ => cp15.id,
            },
            1 => cp15.control.bits(),
            2 => cp15.ttb,
            3 => cp15.dacr,
            5 => {
                if op2 == 1 {
                    cp15.fsr_prefetch
                } else {
                    cp15.fsr_data
                }
            }
            6 => cp15.far,
            7 | 8 => 0,
            9 if crm == 1 => {
                if op2 == 1 {
                    cp15.itcm.reg
                } else {
                    cp15.dtcm.reg
                }
            }
            13 => cp15.fcse_pid,
            _ => {
                debug!("unhandled CP15 read c{crn},c{crm},{op2}");
                0
            }
        }
    }

    /// MCR p15 — write a CP15 register and apply its side effects.
    pub(super) fn cp15_write(&mut self, crn: u32, crm: u32, op2: u32, val: u32) {
        match crn {
            0 => {} // ID registers are read-only
            1 => {
                let old = self.cp15.control;
                self.cp15.control = Control::from_bits_truncate(val);
                self.cp15.fault_table = mmu::build_fault_table(
                    self.cp15.control.contains(Control::SYSTEM),
                    self.cp15.control.contains(Control::ROM),
                );
                let itcm_on = self.cp15.control.contains(Control::ITCM);
                let dtcm_on = self.cp15.control.contains(Control::DTCM);
                self.cp15.itcm.recalc(itcm_on);
                self.cp15.dtcm.recalc(dtcm_on);
                // MMU or vector-base toggles invalidate the dispatch
                // specialization and any prefetched words.
                if old != self.cp15.control {
                    self.note_dispatch_change();
                }
                trace!("CP15 control <- {:08X}", val);
            }
            2 => {
                self.cp15.ttb = val & TTB_MASK;
                self.flush_prefetch();
            }
            3 => {
                self.cp15.dacr = val;
                self.cp15.rebuild_domain_table();
                self.flush_prefetch();
            }
            5 => {
                if op2 == 1 {
                    self.cp15.fsr_prefetch = val;
                } else {
                    self.cp15.fsr_data = val;
                }
            }
            6 => self.cp15.far = val,
            7 => trace!("CP15 cache op c7,c{crm},{op2} ignored"),
            8 => trace!("CP15 TLB op c8,c{crm},{op2} ignored"),
            9 if crm == 1 => {
                if !self.config.has_tcm() {
                    warn!("TCM region write on a core without TCM");
                    return;
                }
                if op2 == 1 {
                    self.cp15.itcm.reg = val;
                    let on = self.cp15.control.contains(Control::ITCM);
                    self.cp15.itcm.recalc(on);
                } else {
                    self.cp15.dtcm.reg = val;
                    let on = self.cp15.control.contains(Control::DTCM);
                    self.cp15.dtcm.recalc(on);
                }
                self.flush_prefetch();
            }
            13 => {
                self.cp15.fcse_pid = val;
                self.cp15.fcse_offset = ((val >> 25) & 0x7F) * 0x0200_0000;
                self.flush_prefetch();
            }
            _ => debug!("unhandled CP15 write c{crn},c{crm},{op2} <- {val:08X}"),
        }
    }

    /// MRC p14 — clock-counter stub: returns cycles executed so far.
    pub(super) fn cp14_read(&self, crn: u32, _crm: u32, _op2: u32) -> u32 {
        match crn {
            1 => self.total_cycles as u32,
            _ => 0,
        }
    }

    /// MCR p14 — accepted and ignored.
    pub(super) fn cp14_write(&mut self, crn: u32, crm: u32, op2: u32, _val: u32) {
        trace!("CP14 write c{crn},c{crm},{op2} ignored");
    }
}

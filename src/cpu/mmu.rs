//! Simulated MMU
//!
//! Two-level translation-table walk with fast-context (FCSE) remapping
//! and table-driven permission resolution. The walk supports section
//! (1 MiB), large (64 KiB), small (4 KiB) and tiny (1 KiB) mappings
//! through coarse and fine second-level tables.
//!
//! Permission checks never branch on the five inputs at access time:
//! a 512-entry decision table keyed
//! `(write << 8) | (domain_access << 6) | (ap << 4) | mode_low_4`
//! is rebuilt whenever the control register's S/R bits change.
//!
//! Fault status codes follow the architectural FSR encoding, with the
//! domain number in bits 7..4.

use log::error;

use super::psr::MODE_MASK;
use super::Cpu;
use crate::bus::{AccessKind, Bus};

/// Outcome of a permission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Access permitted.
    None,
    /// Domain fault (access-control code 0 or 2).
    Domain,
    /// Permission fault (AP bits deny the access).
    Permission,
}

/// FSR status codes (low nibble).
pub mod fsr {
    /// Alignment fault
    pub const ALIGNMENT: u32 = 0x1;
    /// Translation fault, section
    pub const TRANSLATION_SECTION: u32 = 0x5;
    /// Translation fault, page
    pub const TRANSLATION_PAGE: u32 = 0x7;
    /// Domain fault, section
    pub const DOMAIN_SECTION: u32 = 0x9;
    /// Domain fault, page
    pub const DOMAIN_PAGE: u32 = 0xB;
    /// Permission fault, section
    pub const PERMISSION_SECTION: u32 = 0xD;
    /// Permission fault, page
    pub const PERMISSION_PAGE: u32 = 0xF;
}

/// A translation failure: the FSR value to report (code | domain << 4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MmuFault {
    pub fsr: u32,
}

impl MmuFault {
    #[inline]
    fn new(code: u32, domain: u32) -> Self {
        Self {
            fsr: code | (domain << 4),
        }
    }
}

/// Domain access-control codes from the DACR.
const DOMAIN_CLIENT: u8 = 1;
const DOMAIN_MANAGER: u8 = 3;

/// The five-variable permission function the decision table caches.
///
/// `access` is the 2-bit domain access-control code, `ap` the 2-bit
/// access-permission field, `mode_low4` the low nibble of the CPSR
/// mode field (0 means User), `s`/`r` the control-register protection
/// bits.
pub fn reference_check(write: bool, access: u8, ap: u8, mode_low4: u8, s: bool, r: bool) -> Fault {
    match access {
        DOMAIN_MANAGER => Fault::None,
        DOMAIN_CLIENT => {
            let user = mode_low4 == 0;
            match ap {
                0 => match (s, r) {
                    // S=0 R=0: no access for anyone.
                    (false, false) => Fault::Permission,
                    // S=1 R=0: privileged read-only.
                    (true, false) => {
                        if user || write {
                            Fault::Permission
                        } else {
                            Fault::None
                        }
                    }
                    // S=0 R=1: read-only for everyone.
                    (false, true) => {
                        if write {
                            Fault::Permission
                        } else {
                            Fault::None
                        }
                    }
                    // S=1 R=1 is architecturally unpredictable; deny.
                    (true, true) => Fault::Permission,
                },
                1 => {
                    if user {
                        Fault::Permission
                    } else {
                        Fault::None
                    }
                }
                2 => {
                    if user && write {
                        Fault::Permission
                    } else {
                        Fault::None
                    }
                }
                _ => Fault::None,
            }
        }
        // Codes 0 (no access) and 2 (reserved) fault on the domain.
        _ => Fault::Domain,
    }
}

/// Materialize the permission function over all 512 keys.
pub fn build_fault_table(s: bool, r: bool) -> [Fault; 512] {
    let mut table = [Fault::None; 512];
    for (key, entry) in table.iter_mut().enumerate() {
        let write = key & 0x100 != 0;
        let access = ((key >> 6) & 3) as u8;
        let ap = ((key >> 4) & 3) as u8;
        let mode_low4 = (key & 0xF) as u8;
        *entry = reference_check(write, access, ap, mode_low4, s, r);
    }
    table
}

/// Decision-table key for one access.
#[inline]
fn fault_key(write: bool, access: u8, ap: u8, mode_low4: u32) -> usize {
    ((write as usize) << 8) | ((access as usize) << 6) | ((ap as usize) << 4) | mode_low4 as usize
}

impl Cpu {
    /// Low nibble of the current mode field, or 0 when the access is
    /// forced to user permissions (LDRT/STRT).
    #[inline]
    fn mode_low4(&self, force_user: bool) -> u32 {
        if force_user {
            0
        } else {
            self.regs.cpsr().raw() & MODE_MASK & 0xF
        }
    }

    /// Walk the translation tables for `vaddr`. No fault side effects;
    /// the caller decides whether to report.
    pub(super) fn mmu_walk<B: Bus>(
        &mut self,
        bus: &mut B,
        vaddr: u32,
        write: bool,
        force_user: bool,
    ) -> Result<u32, MmuFault> {
        // Fast-context-switch remap of the low 32 MiB.
        let vaddr = if vaddr < 0x0200_0000 {
            vaddr.wrapping_add(self.cp15.fcse_offset)
        } else {
            vaddr
        };

        let mode_low4 = self.mode_low4(force_user);
        let desc1_addr = self.cp15.ttb | ((vaddr >> 20) << 2);
        let desc1 = bus.read_word(desc1_addr);
        let domain = (desc1 >> 5) & 0xF;
        let access = self.cp15.domain_access[domain as usize];

        match desc1 & 3 {
            // Unmapped first-level entry.
            0 => Err(MmuFault::new(fsr::TRANSLATION_SECTION, domain)),
            // Section: 1 MiB, AP in bits 11..10.
            2 => {
                let ap = ((desc1 >> 10) & 3) as u8;
                match self.cp15.fault_table[fault_key(write, access, ap, mode_low4)] {
                    Fault::None => Ok((desc1 & 0xFFF0_0000) | (vaddr & 0x000F_FFFF)),
                    Fault::Domain => Err(MmuFault::new(fsr::DOMAIN_SECTION, domain)),
                    Fault::Permission => Err(MmuFault::new(fsr::PERMISSION_SECTION, domain)),
                }
            }
            // Coarse (1) and fine (3) page tables.
            kind => {
                if access != DOMAIN_CLIENT && access != DOMAIN_MANAGER {
                    return Err(MmuFault::new(fsr::DOMAIN_PAGE, domain));
                }
                let desc2_addr = if kind == 1 {
                    (desc1 & 0xFFFF_FC00) | (((vaddr >> 12) & 0xFF) << 2)
                } else {
                    (desc1 & 0xFFFF_F000) | (((vaddr >> 10) & 0x3FF) << 2)
                };
                let desc2 = bus.read_word(desc2_addr);

                let (paddr, ap) = match desc2 & 3 {
                    0 => return Err(MmuFault::new(fsr::TRANSLATION_PAGE, domain)),
                    // Large page: 64 KiB, per-subpage AP.
                    1 => (
                        (desc2 & 0xFFFF_0000) | (vaddr & 0xFFFF),
                        ((desc2 >> (4 + 2 * ((vaddr >> 14) & 3))) & 3) as u8,
                    ),
                    // Small page: 4 KiB, per-subpage AP.
                    2 => (
                        (desc2 & 0xFFFF_F000) | (vaddr & 0xFFF),
                        ((desc2 >> (4 + 2 * ((vaddr >> 10) & 3))) & 3) as u8,
                    ),
                    // Tiny page: 1 KiB, fine tables only.
                    _ => {
                        if kind == 1 {
                            // A tiny-page descriptor inside a coarse
                            // table has no defined translation.
                            error!(
                                "tiny-page descriptor {desc2:08X} in coarse table for {vaddr:08X}"
                            );
                            return Err(MmuFault::new(fsr::TRANSLATION_PAGE, domain));
                        }
                        (
                            (desc2 & 0xFFFF_FC00) | (vaddr & 0x3FF),
                            ((desc2 >> 4) & 3) as u8,
                        )
                    }
                };

                match self.cp15.fault_table[fault_key(write, access, ap, mode_low4)] {
                    Fault::None => Ok(paddr),
                    Fault::Domain => Err(MmuFault::new(fsr::DOMAIN_PAGE, domain)),
                    Fault::Permission => Err(MmuFault::new(fsr::PERMISSION_PAGE, domain)),
                }
            }
        }
    }

    /// Translate a data access, recording FSR/FAR and latching the
    /// data abort on failure. With the MMU disabled, virtual equals
    /// physical.
    pub(super) fn translate_data<B: Bus>(
        &mut self,
        bus: &mut B,
        vaddr: u32,
        kind: AccessKind,
        force_user: bool,
    ) -> Result<u32, ()> {
        if !self.cp15.mmu_enabled() {
            return Ok(vaddr);
        }
        match self.mmu_walk(bus, vaddr, kind.is_write(), force_user) {
            Ok(paddr) => Ok(paddr),
            Err(fault) => {
                self.raise_data_abort(fault.fsr, vaddr);
                Err(())
            }
        }
    }

    /// Translation probe for the prefetch pipeline: no side effects.
    /// The returned fault, if any, is latched in the queue slot and
    /// reported only if that slot reaches execute.
    pub(super) fn translate_fetch<B: Bus>(
        &mut self,
        bus: &mut B,
        vaddr: u32,
    ) -> Result<u32, MmuFault> {
        if !self.cp15.mmu_enabled() {
            return Ok(vaddr);
        }
        self.mmu_walk(bus, vaddr, false, false)
    }

    /// Record a data-abort fault: FSR and FAR are captured before any
    /// mode switch happens at exception entry.
    pub(super) fn raise_data_abort(&mut self, fsr: u32, vaddr: u32) {
        self.cp15.fsr_data = fsr;
        self.cp15.far = vaddr;
        self.pending.set(super::Exception::DataAbort, true);
    }

    /// Record a prefetch-abort fault when a poisoned queue slot is
    /// consumed.
    pub(super) fn raise_prefetch_abort(&mut self, fsr: u32, vaddr: u32) {
        self.cp15.fsr_prefetch = fsr;
        self.cp15.far = vaddr;
        self.pending.set(super::Exception::PrefetchAbort, true);
    }
}

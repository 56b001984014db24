//! CPU test suite
//!
//! Organized by area:
//! - `instructions.rs`: ARM instruction semantics and boundary cases
//! - `thumb.rs`: Thumb instruction semantics and interworking
//! - `modes.rs`: banking, exceptions, PSR behavior
//! - `mmu.rs`: translation, faults, FCSE, the fault decision table,
//!   and the TCM overlay

use super::*;
use crate::bus::{Bus, Endian};
use crate::emu::Config;
use crate::memory::LinearMemory;

mod instructions;
mod modes;
mod thumb;

/// 4 MiB of RAM at physical 0, enough for programs plus page tables.
const TEST_RAM: usize = 0x40_0000;

/// ARM7 (v4T) CPU over a little-endian flat RAM.
fn arm7() -> (Cpu, LinearMemory) {
    (
        Cpu::new(Config::arm7()),
        LinearMemory::new(0, TEST_RAM, Endian::Little),
    )
}

/// ARM9 (v5TE) CPU for the v5 extension tests.
fn arm9() -> (Cpu, LinearMemory) {
    (
        Cpu::new(Config::arm9()),
        LinearMemory::new(0, TEST_RAM, Endian::Little),
    )
}

/// ARM946ES for TCM tests.
fn arm946es() -> (Cpu, LinearMemory) {
    (
        Cpu::new(Config::arm946es()),
        LinearMemory::new(0, TEST_RAM, Endian::Little),
    )
}

/// Store a program as consecutive words at `base`.
fn load_program(mem: &mut LinearMemory, base: u32, words: &[u32]) {
    for (i, word) in words.iter().enumerate() {
        mem.poke_word(base + i as u32 * 4, *word);
    }
}

/// Execute `n` instructions.
fn run(cpu: &mut Cpu, mem: &mut LinearMemory, n: usize) {
    for _ in 0..n {
        cpu.step(mem);
    }
}

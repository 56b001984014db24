//! ARM v3/v4/v4T/v5/v5TE Emulator Core
//!
//! A cycle-approximate interpreter core for the 32-bit ARM
//! architecture family, including the Thumb instruction set and the
//! XScale/StrongARM derivatives. The crate advances architectural
//! state only: register banks, program counter, condition flags,
//! processor mode, CP15 (system control with the simulated MMU), and
//! the ARM946ES tightly-coupled memories. The embedding host supplies
//! the memory map, interrupt wiring and scheduling.
//!
//! # Architecture
//!
//! - `bus`: the host memory interface (physical addresses, infallible)
//! - `memory`: a flat test RAM implementing `bus::Bus`
//! - `cpu`: the CPU core — register file, decoder/dispatch for ARM and
//!   Thumb, exception engine, prefetch queue, MMU walker, CP15
//! - `emu`: device wrapper — configuration, nine device variants,
//!   execution history, run driver
//!
//! # Example
//!
//! ```
//! use arm_core::{Config, Endian, LinearMemory, Machine};
//!
//! let mut mem = LinearMemory::new(0, 0x1000, Endian::Little);
//! mem.poke_word(0x0, 0xE3A0_1001); // MOV R1, #1
//! let mut machine = Machine::new(Config::arm7(), mem);
//! machine.run_cycles(1);
//! assert_eq!(machine.cpu().read_reg(1), 1);
//! ```

pub mod bus;
pub mod cpu;
pub mod emu;
pub mod memory;

pub use bus::{AccessKind, Bus, Endian};
pub use cpu::{Cpu, Exception, InputLine, Mode, Psr, StateError};
pub use emu::{ArchFlags, Config, Machine, StopReason};
pub use memory::LinearMemory;

#[cfg(test)]
mod tests {
    use super::*;

    fn machine_with(words: &[u32]) -> Machine<LinearMemory> {
        let mut mem = LinearMemory::new(0, 0x1_0000, Endian::Little);
        for (i, word) in words.iter().enumerate() {
            mem.poke_word(i as u32 * 4, *word);
        }
        Machine::new(Config::arm7(), mem)
    }

    #[test]
    fn test_reset_state() {
        let machine = machine_with(&[]);
        let cpu = machine.cpu();
        assert_eq!(cpu.pc(), 0);
        assert_eq!(cpu.mode(), Mode::Supervisor);
        assert!(cpu.cpsr().irq_disabled());
        assert!(cpu.cpsr().fiq_disabled());
        assert!(!cpu.cpsr().thumb());
    }

    #[test]
    fn test_run_and_history() {
        let mut machine = machine_with(&[
            0xE3A0_0001, // MOV R0, #1
            0xE3A0_1002, // MOV R1, #2
            0xE080_2001, // ADD R2, R0, R1
        ]);
        machine.set_history_enabled(true);
        machine.run_cycles(3);
        assert_eq!(machine.cpu().read_reg(2), 3);
        let history = machine.history();
        assert_eq!(history[0].pc, 0);
        assert_eq!(history[0].opcode, 0xE3A0_0001);
    }

    #[test]
    fn test_state_round_trip() {
        let mut machine = machine_with(&[0xE3A0_0042]); // MOV R0, #0x42
        machine.run_cycles(1);
        let mut state = Vec::new();
        machine.save_state(&mut state);

        let mut other = machine_with(&[]);
        other.load_state(&state).expect("state loads");
        assert_eq!(other.cpu().read_reg(0), 0x42);
        assert_eq!(other.cpu().pc(), machine.cpu().pc());
        assert_eq!(other.cpu().cpsr(), machine.cpu().cpsr());
    }

    #[test]
    fn test_reg_by_name() {
        let mut machine = machine_with(&[0xE3A0_D01C]); // MOV R13, #0x1C
        machine.run_cycles(1);
        // Supervisor mode: R13 lands in the banked SVC slot.
        assert_eq!(machine.cpu().reg_by_name("r13_svc"), Some(0x1C));
        assert_eq!(machine.cpu().reg_by_name("r13"), Some(0));
        assert!(machine.cpu().reg_by_name("r99").is_none());
    }
}

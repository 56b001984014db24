//! Device wrapper
//!
//! Couples a `Cpu` with a host bus and the device-level debugging
//! conveniences: an execution-history ring buffer for crash
//! diagnostics, a stop reason, and the run-until-budget driver.
//! Also home to `Config` and the nine concrete device variants.

use bitflags::bitflags;

use crate::bus::{Bus, Endian};
use crate::cpu::{Cpu, InputLine, StateError};

bitflags! {
    /// Architecture feature flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ArchFlags: u32 {
        /// Thumb instruction set (v4T and later).
        const THUMB = 1 << 0;
        /// Enhanced-DSP (v5TE) saturating and halfword-multiply ops.
        const ENHANCED_DSP = 1 << 1;
        /// Intel XScale derivative.
        const XSCALE = 1 << 2;
        /// DEC/Intel StrongARM derivative.
        const STRONGARM = 1 << 3;
        /// 26-bit compatibility (ARM7500-class parts).
        const MODE26 = 1 << 4;
        /// ARM946ES-style tightly coupled memories.
        const TCM = 1 << 5;
    }
}

/// Construction-time CPU configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Device name, for logs and hosts.
    pub name: &'static str,
    /// Core clock in Hz; the host converts cycles to time with this.
    pub clock_hz: u32,
    /// Bus/CPU endianness.
    pub endian: Endian,
    /// Architecture revision: 4 or 5.
    pub arch_version: u8,
    /// Feature flags.
    pub flags: ArchFlags,
    /// Exception vectors at 0xFFFF0000 instead of 0.
    pub high_vectors: bool,
    /// Prefetch queue depth, 1..=3. 1 disables prefetching.
    pub prefetch_depth: usize,
    /// CP15 main ID register value.
    pub id: u32,
    /// CP15 cache-type register value.
    pub cache_type: u32,
    /// CP15 TCM-type register value.
    pub tcm_type: u32,
}

impl Config {
    #[inline]
    pub fn has_thumb(&self) -> bool {
        self.flags.contains(ArchFlags::THUMB)
    }

    #[inline]
    pub fn has_v5(&self) -> bool {
        self.arch_version >= 5
    }

    #[inline]
    pub fn has_dsp(&self) -> bool {
        self.flags.contains(ArchFlags::ENHANCED_DSP)
    }

    #[inline]
    pub fn has_tcm(&self) -> bool {
        self.flags.contains(ArchFlags::TCM)
    }

    fn base(name: &'static str, clock_hz: u32, arch_version: u8, flags: ArchFlags) -> Self {
        Self {
            name,
            clock_hz,
            endian: Endian::Little,
            arch_version,
            flags,
            high_vectors: false,
            prefetch_depth: 3,
            id: 0,
            cache_type: 0,
            tcm_type: 0,
        }
    }

    /// ARM7TDMI, little-endian.
    pub fn arm7() -> Self {
        let mut c = Self::base("arm7", 20_000_000, 4, ArchFlags::THUMB);
        c.id = 0x4100_7700;
        c
    }

    /// ARM7TDMI, big-endian.
    pub fn arm7_be() -> Self {
        let mut c = Self::arm7();
        c.name = "arm7_be";
        c.endian = Endian::Big;
        c
    }

    /// ARM7500 (26-bit-compatible ARM7 derivative, no Thumb).
    pub fn arm7500() -> Self {
        let mut c = Self::base("arm7500", 33_000_000, 4, ArchFlags::MODE26);
        c.id = 0x4102_7100;
        c
    }

    /// Generic ARM9 (v5).
    pub fn arm9() -> Self {
        let mut c = Self::base("arm9", 200_000_000, 5, ArchFlags::THUMB | ArchFlags::ENHANCED_DSP);
        c.id = 0x4101_9200;
        c.cache_type = 0x0F0D_2112;
        c
    }

    /// ARM920T (v4T MMU core).
    pub fn arm920t() -> Self {
        let mut c = Self::base("arm920t", 200_000_000, 4, ArchFlags::THUMB);
        c.id = 0x4112_9200;
        c.cache_type = 0x0D17_2172;
        c
    }

    /// ARM946E-S (v5TE, TCM, no MMU page tables in typical use).
    pub fn arm946es() -> Self {
        let mut c = Self::base(
            "arm946es",
            200_000_000,
            5,
            ArchFlags::THUMB | ArchFlags::ENHANCED_DSP | ArchFlags::TCM,
        );
        c.id = 0x4105_9461;
        c.cache_type = 0x0F0D_2112;
        c.tcm_type = 0x0014_0014;
        c
    }

    /// IGS036 (ARM946ES-based SoC).
    pub fn igs036() -> Self {
        let mut c = Self::arm946es();
        c.name = "igs036";
        c
    }

    /// Intel PXA255 (XScale, v5TE).
    pub fn pxa255() -> Self {
        let mut c = Self::base(
            "pxa255",
            400_000_000,
            5,
            ArchFlags::THUMB | ArchFlags::ENHANCED_DSP | ArchFlags::XSCALE,
        );
        c.id = 0x6905_2D06;
        c.cache_type = 0x0B1A_A1AA;
        c
    }

    /// Intel SA1110 (StrongARM, v4, no Thumb).
    pub fn sa1110() -> Self {
        let mut c = Self::base("sa1110", 206_000_000, 4, ArchFlags::STRONGARM);
        c.id = 0x6901_B119;
        c
    }
}

/// Number of entries in the execution-history ring buffer.
const HISTORY_SIZE: usize = 64;

/// Single entry in the execution history.
#[derive(Clone, Copy, Default)]
pub struct HistoryEntry {
    /// Program counter before the instruction.
    pub pc: u32,
    /// Raw opcode (low 16 bits for Thumb).
    pub opcode: u32,
    /// Thumb state at execution.
    pub thumb: bool,
}

/// Execution-history ring buffer for crash diagnostics.
struct ExecutionHistory {
    entries: [HistoryEntry; HISTORY_SIZE],
    write_idx: usize,
    count: usize,
}

impl ExecutionHistory {
    fn new() -> Self {
        Self {
            entries: [HistoryEntry::default(); HISTORY_SIZE],
            write_idx: 0,
            count: 0,
        }
    }

    fn record(&mut self, entry: HistoryEntry) {
        self.entries[self.write_idx] = entry;
        self.write_idx = (self.write_idx + 1) % HISTORY_SIZE;
        if self.count < HISTORY_SIZE {
            self.count += 1;
        }
    }

    /// Entries in execution order, oldest first.
    fn iter(&self) -> impl Iterator<Item = &HistoryEntry> {
        let start = if self.count < HISTORY_SIZE {
            0
        } else {
            self.write_idx
        };
        (0..self.count).map(move |i| &self.entries[(start + i) % HISTORY_SIZE])
    }

    fn clear(&mut self) {
        self.write_idx = 0;
        self.count = 0;
    }
}

/// Reason the last `run_cycles` call returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The cycle budget ran out.
    CyclesComplete,
}

/// A CPU bound to a host bus.
pub struct Machine<B: Bus> {
    cpu: Cpu,
    bus: B,
    history: ExecutionHistory,
    history_enabled: bool,
    last_stop: StopReason,
}

impl<B: Bus> Machine<B> {
    /// Build a machine from a device configuration and a host bus.
    pub fn new(config: Config, bus: B) -> Self {
        Self {
            cpu: Cpu::new(config),
            bus,
            history: ExecutionHistory::new(),
            history_enabled: false,
            last_stop: StopReason::CyclesComplete,
        }
    }

    /// Reset the CPU (the host resets its own devices).
    pub fn reset(&mut self) {
        self.cpu.reset();
        self.history.clear();
    }

    /// Run for `cycles` cycles. With history disabled this uses the
    /// specialized inner loops; with history enabled it steps one
    /// instruction at a time and records (pc, opcode) pairs.
    pub fn run_cycles(&mut self, cycles: u32) -> u32 {
        let executed = if self.history_enabled {
            let mut spent = 0u32;
            while spent < cycles {
                let pc = self.cpu.pc();
                let thumb = self.cpu.cpsr().thumb();
                spent += self.cpu.step(&mut self.bus);
                self.history.record(HistoryEntry {
                    pc,
                    opcode: self.cpu.last_opcode(),
                    thumb,
                });
            }
            spent
        } else {
            self.cpu.run(&mut self.bus, cycles)
        };
        self.last_stop = StopReason::CyclesComplete;
        executed
    }

    /// Execute a single instruction.
    pub fn step(&mut self) -> u32 {
        self.run_cycles(1)
    }

    /// Raise or lower an interrupt/abort input line.
    pub fn set_input_line(&mut self, line: InputLine, state: bool) {
        self.cpu.set_input_line(line, state);
    }

    /// Enable or disable execution-history recording.
    pub fn set_history_enabled(&mut self, enabled: bool) {
        self.history_enabled = enabled;
        if !enabled {
            self.history.clear();
        }
    }

    /// Recorded history entries, oldest first.
    pub fn history(&self) -> Vec<HistoryEntry> {
        self.history.iter().copied().collect()
    }

    pub fn last_stop(&self) -> StopReason {
        self.last_stop
    }

    pub fn cpu(&self) -> &Cpu {
        &self.cpu
    }

    pub fn cpu_mut(&mut self) -> &mut Cpu {
        &mut self.cpu
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    /// Serialize CPU state as named (key, value) pairs.
    pub fn save_state(&self, out: &mut Vec<u8>) {
        self.cpu.save_state(out);
    }

    /// Restore CPU state saved by `save_state`.
    pub fn load_state(&mut self, data: &[u8]) -> Result<(), StateError> {
        self.cpu.load_state(data)
    }
}

//! Flat test memory
//!
//! `LinearMemory` is a minimal `Bus` implementation: one contiguous RAM
//! window at a configurable base. Reads outside the window return an
//! open-bus pattern, writes outside are dropped. The CPU test suite and
//! simple embedders use it; real hosts bring their own memory map.

use crate::bus::{Bus, Endian};

/// Value returned for reads outside the RAM window.
const OPEN_BUS: u8 = 0xFF;

/// A single linear RAM window with endianness-aware word access.
pub struct LinearMemory {
    base: u32,
    data: Vec<u8>,
    endian: Endian,
}

impl LinearMemory {
    /// Create a window of `size` bytes starting at `base`.
    pub fn new(base: u32, size: usize, endian: Endian) -> Self {
        Self {
            base,
            data: vec![0; size],
            endian,
        }
    }

    #[inline]
    fn index(&self, addr: u32) -> Option<usize> {
        let off = addr.wrapping_sub(self.base) as usize;
        if off < self.data.len() {
            Some(off)
        } else {
            None
        }
    }

    /// Store a word without going through the bus byte order twice;
    /// used by tests to assemble programs and page tables.
    pub fn poke_word(&mut self, addr: u32, val: u32) {
        self.write_word(addr, val);
    }

    /// Store a halfword (Thumb opcodes in tests).
    pub fn poke_half(&mut self, addr: u32, val: u16) {
        self.write_half(addr, val);
    }

    /// Raw view of the backing storage.
    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

impl Bus for LinearMemory {
    fn read_byte(&mut self, addr: u32) -> u8 {
        match self.index(addr) {
            Some(i) => self.data[i],
            None => OPEN_BUS,
        }
    }

    fn read_half(&mut self, addr: u32) -> u16 {
        let (b0, b1) = (self.read_byte(addr), self.read_byte(addr.wrapping_add(1)));
        match self.endian {
            Endian::Little => u16::from_le_bytes([b0, b1]),
            Endian::Big => u16::from_be_bytes([b0, b1]),
        }
    }

    fn read_word(&mut self, addr: u32) -> u32 {
        let b = [
            self.read_byte(addr),
            self.read_byte(addr.wrapping_add(1)),
            self.read_byte(addr.wrapping_add(2)),
            self.read_byte(addr.wrapping_add(3)),
        ];
        match self.endian {
            Endian::Little => u32::from_le_bytes(b),
            Endian::Big => u32::from_be_bytes(b),
        }
    }

    fn write_byte(&mut self, addr: u32, val: u8) {
        if let Some(i) = self.index(addr) {
            self.data[i] = val;
        }
    }

    fn write_half(&mut self, addr: u32, val: u16) {
        let b = match self.endian {
            Endian::Little => val.to_le_bytes(),
            Endian::Big => val.to_be_bytes(),
        };
        self.write_byte(addr, b[0]);
        self.write_byte(addr.wrapping_add(1), b[1]);
    }

    fn write_word(&mut self, addr: u32, val: u32) {
        let b = match self.endian {
            Endian::Little => val.to_le_bytes(),
            Endian::Big => val.to_be_bytes(),
        };
        for (i, byte) in b.iter().enumerate() {
            self.write_byte(addr.wrapping_add(i as u32), *byte);
        }
    }
}

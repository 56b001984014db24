//! Program status registers
//!
//! Bit layout of the CPSR/SPSR and the seven processor modes.
//!
//! ```text
//! 31 30 29 28 27 ......... 7 6 5 4....0
//!  N  Z  C  V  Q            I F T  mode
//! ```
//!
//! The Q (sticky saturation) bit exists on v5E cores only; the T bit on
//! Thumb-capable cores. Mode field values are the architectural 5-bit
//! encodings (0x10 User .. 0x1F System).

/// Sign flag (bit 31)
pub const N: u32 = 1 << 31;
/// Zero flag (bit 30)
pub const Z: u32 = 1 << 30;
/// Carry / not-borrow flag (bit 29)
pub const C: u32 = 1 << 29;
/// Overflow flag (bit 28)
pub const V: u32 = 1 << 28;
/// Sticky saturation flag (bit 27, v5E)
pub const Q: u32 = 1 << 27;
/// IRQ disable (bit 7)
pub const I: u32 = 1 << 7;
/// FIQ disable (bit 6)
pub const F: u32 = 1 << 6;
/// Thumb state (bit 5)
pub const T: u32 = 1 << 5;
/// Mode field mask (bits 4..0)
pub const MODE_MASK: u32 = 0x1F;

/// Processor modes with their CPSR mode-field encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Mode {
    User = 0x10,
    Fiq = 0x11,
    Irq = 0x12,
    Supervisor = 0x13,
    Abort = 0x17,
    Undefined = 0x1B,
    System = 0x1F,
}

impl Mode {
    /// Decode a CPSR mode field. Returns `None` for the reserved
    /// encodings.
    pub fn from_bits(bits: u32) -> Option<Mode> {
        match bits & MODE_MASK {
            0x10 => Some(Mode::User),
            0x11 => Some(Mode::Fiq),
            0x12 => Some(Mode::Irq),
            0x13 => Some(Mode::Supervisor),
            0x17 => Some(Mode::Abort),
            0x1B => Some(Mode::Undefined),
            0x1F => Some(Mode::System),
            _ => None,
        }
    }

    /// Mode field value for this mode.
    #[inline]
    pub fn bits(self) -> u32 {
        self as u32
    }

    /// Index into the register-view and SPSR tables.
    ///
    /// User and System share a view but get distinct indices so the
    /// 7×16 table matches the architectural mode count.
    #[inline]
    pub fn bank(self) -> usize {
        match self {
            Mode::User => 0,
            Mode::Fiq => 1,
            Mode::Irq => 2,
            Mode::Supervisor => 3,
            Mode::Abort => 4,
            Mode::Undefined => 5,
            Mode::System => 6,
        }
    }

    /// True for every mode except User.
    #[inline]
    pub fn is_privileged(self) -> bool {
        !matches!(self, Mode::User)
    }

    /// True for the modes that have a banked SPSR.
    #[inline]
    pub fn has_spsr(self) -> bool {
        !matches!(self, Mode::User | Mode::System)
    }
}

/// A CPSR or SPSR value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Psr(pub u32);

impl Psr {
    #[inline]
    pub fn raw(self) -> u32 {
        self.0
    }

    #[inline]
    pub fn n(self) -> bool {
        self.0 & N != 0
    }

    #[inline]
    pub fn z(self) -> bool {
        self.0 & Z != 0
    }

    #[inline]
    pub fn c(self) -> bool {
        self.0 & C != 0
    }

    #[inline]
    pub fn v(self) -> bool {
        self.0 & V != 0
    }

    #[inline]
    pub fn q(self) -> bool {
        self.0 & Q != 0
    }

    #[inline]
    pub fn irq_disabled(self) -> bool {
        self.0 & I != 0
    }

    #[inline]
    pub fn fiq_disabled(self) -> bool {
        self.0 & F != 0
    }

    #[inline]
    pub fn thumb(self) -> bool {
        self.0 & T != 0
    }

    /// Decoded mode field; reserved encodings yield `None`.
    #[inline]
    pub fn mode(self) -> Option<Mode> {
        Mode::from_bits(self.0)
    }

    #[inline]
    pub fn set_flag(&mut self, flag: u32, on: bool) {
        if on {
            self.0 |= flag;
        } else {
            self.0 &= !flag;
        }
    }

    /// Replace the N/Z/C/V group in one store.
    #[inline]
    pub fn set_nzcv(&mut self, n: bool, z: bool, c: bool, v: bool) {
        let mut bits = self.0 & !(N | Z | C | V);
        if n {
            bits |= N;
        }
        if z {
            bits |= Z;
        }
        if c {
            bits |= C;
        }
        if v {
            bits |= V;
        }
        self.0 = bits;
    }

    /// N and Z from a result value, leaving C/V alone.
    #[inline]
    pub fn set_nz(&mut self, result: u32) {
        self.set_flag(N, result & 0x8000_0000 != 0);
        self.set_flag(Z, result == 0);
    }

    #[inline]
    pub fn with_mode(self, mode: Mode) -> Psr {
        Psr((self.0 & !MODE_MASK) | mode.bits())
    }
}

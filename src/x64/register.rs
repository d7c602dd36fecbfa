//! Register and flag definitions.
//!
//! General purpose registers are identified by their architectural index
//! (`rax` = 0 through `r15` = 15) plus the accessed width. The legacy high
//! byte registers (`ah`, `ch`, `dh`, `bh`) alias bits 8..16 of indices 0..4.
//! Vector registers are `xmm` (128 bit) or `ymm` (256 bit) views of the same
//! 256-bit register file.

use std::fmt;

use strum::{Display, EnumIter, EnumString, IntoEnumIterator};

const GP64: [&str; 16] = [
    "rax", "rcx", "rdx", "rbx", "rsp", "rbp", "rsi", "rdi", "r8", "r9", "r10", "r11", "r12",
    "r13", "r14", "r15",
];
const GP32: [&str; 16] = [
    "eax", "ecx", "edx", "ebx", "esp", "ebp", "esi", "edi", "r8d", "r9d", "r10d", "r11d", "r12d",
    "r13d", "r14d", "r15d",
];
const GP16: [&str; 16] = [
    "ax", "cx", "dx", "bx", "sp", "bp", "si", "di", "r8w", "r9w", "r10w", "r11w", "r12w", "r13w",
    "r14w", "r15w",
];
const GP8: [&str; 16] = [
    "al", "cl", "dl", "bl", "spl", "bpl", "sil", "dil", "r8b", "r9b", "r10b", "r11b", "r12b",
    "r13b", "r14b", "r15b",
];
const GP8H: [&str; 4] = ["ah", "ch", "dh", "bh"];

/// Index of the stack pointer in the general purpose register file.
pub const RSP: u8 = 4;
/// Index of the frame pointer in the general purpose register file.
pub const RBP: u8 = 5;

/// A general purpose register view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GpRegister {
    index: u8,
    width: u16,
    high: bool,
}

impl GpRegister {
    /// Creates a low register view of `width` bits (8, 16, 32 or 64).
    #[must_use]
    pub const fn new(index: u8, width: u16) -> Self {
        Self {
            index,
            width,
            high: false,
        }
    }

    /// Creates the 64-bit register with the given index.
    #[must_use]
    pub const fn r64(index: u8) -> Self {
        Self::new(index, 64)
    }

    /// Creates one of `ah`, `ch`, `dh`, `bh` (index 0..4).
    #[must_use]
    pub const fn high_byte(index: u8) -> Self {
        Self {
            index,
            width: 8,
            high: true,
        }
    }

    /// Architectural index of the full register.
    #[must_use]
    pub const fn index(&self) -> u8 {
        self.index
    }

    /// Width of this view in bits.
    #[must_use]
    pub const fn width(&self) -> u16 {
        self.width
    }

    /// `true` for the legacy high byte registers.
    #[must_use]
    pub const fn is_high(&self) -> bool {
        self.high
    }

    /// Bit offset of this view inside the 64-bit register.
    #[must_use]
    pub const fn offset(&self) -> u16 {
        if self.high {
            8
        } else {
            0
        }
    }

    /// The 64-bit register this view belongs to.
    #[must_use]
    pub const fn full(&self) -> GpRegister {
        GpRegister::r64(self.index)
    }

    /// Returns the same register at another width (never a high byte view).
    #[must_use]
    pub const fn resize(&self, width: u16) -> GpRegister {
        GpRegister::new(self.index, width)
    }

    /// Looks a register up by its AT&T name without the `%` sigil.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        let find = |table: &[&str]| table.iter().position(|n| *n == name);
        if let Some(i) = find(&GP64) {
            return Some(Self::new(i as u8, 64));
        }
        if let Some(i) = find(&GP32) {
            return Some(Self::new(i as u8, 32));
        }
        if let Some(i) = find(&GP16) {
            return Some(Self::new(i as u8, 16));
        }
        if let Some(i) = find(&GP8) {
            return Some(Self::new(i as u8, 8));
        }
        find(&GP8H).map(|i| Self::high_byte(i as u8))
    }

    /// The AT&T name of this register.
    #[must_use]
    pub fn name(&self) -> &'static str {
        let i = self.index as usize;
        match (self.width, self.high) {
            (8, true) => GP8H[i],
            (8, false) => GP8[i],
            (16, _) => GP16[i],
            (32, _) => GP32[i],
            _ => GP64[i],
        }
    }

    /// All sixteen 64-bit registers in index order.
    pub fn all64() -> impl Iterator<Item = GpRegister> {
        (0..16).map(GpRegister::r64)
    }
}

impl fmt::Display for GpRegister {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.name())
    }
}

/// A vector register view (`xmm` or `ymm`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SseRegister {
    index: u8,
    width: u16,
}

impl SseRegister {
    /// Creates `xmm<index>`.
    #[must_use]
    pub const fn xmm(index: u8) -> Self {
        Self { index, width: 128 }
    }

    /// Creates `ymm<index>`.
    #[must_use]
    pub const fn ymm(index: u8) -> Self {
        Self { index, width: 256 }
    }

    /// Architectural index.
    #[must_use]
    pub const fn index(&self) -> u8 {
        self.index
    }

    /// Width in bits (128 or 256).
    #[must_use]
    pub const fn width(&self) -> u16 {
        self.width
    }

    /// The full 256-bit register.
    #[must_use]
    pub const fn full(&self) -> SseRegister {
        SseRegister::ymm(self.index)
    }

    /// Parses `xmmN` / `ymmN` without the sigil.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        let (width, rest) = if let Some(rest) = name.strip_prefix("xmm") {
            (128, rest)
        } else if let Some(rest) = name.strip_prefix("ymm") {
            (256, rest)
        } else {
            return None;
        };
        let index: u8 = rest.parse().ok()?;
        (index < 16).then_some(Self { index, width })
    }
}

impl fmt::Display for SseRegister {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = if self.width == 256 { "ymm" } else { "xmm" };
        write!(f, "%{}{}", prefix, self.index)
    }
}

/// Status flags tracked by the symbolic state.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumString, EnumIter,
)]
#[strum(serialize_all = "lowercase")]
pub enum Flag {
    /// Carry
    Cf,
    /// Parity
    Pf,
    /// Adjust
    Af,
    /// Zero
    Zf,
    /// Sign
    Sf,
    /// Overflow
    Of,
}

impl Flag {
    /// Position of the flag in the `rflags` register.
    #[must_use]
    pub const fn bit(&self) -> u8 {
        match self {
            Flag::Cf => 0,
            Flag::Pf => 2,
            Flag::Af => 4,
            Flag::Zf => 6,
            Flag::Sf => 7,
            Flag::Of => 11,
        }
    }

    /// Dense index usable for arrays.
    #[must_use]
    pub const fn index(&self) -> usize {
        *self as usize
    }

    /// All flags in index order.
    pub fn all() -> impl Iterator<Item = Flag> {
        Flag::iter()
    }
}

/// A set of registers and flags, used for def-ins and live-outs.
///
/// General purpose and vector registers carry the widest width that is part
/// of the set, so `%eax` in a live-out set means only the low 32 bits of
/// `%rax` are observable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct RegSet {
    gp: [u16; 16],
    sse: [u16; 16],
    flags: u8,
}

impl RegSet {
    /// Empty set.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// All 64-bit general purpose registers, all `ymm` registers and all flags.
    #[must_use]
    pub fn universe() -> Self {
        let mut set = Self::empty();
        for i in 0..16 {
            set.gp[i] = 64;
            set.sse[i] = 256;
        }
        for flag in Flag::all() {
            set = set.with_flag(flag);
        }
        set
    }

    /// The usual System V live-outs: `%rax`, `%rdx` and the callee-saved registers.
    #[must_use]
    pub fn linux_call_return() -> Self {
        [0u8, 2, 3, 4, 5, 12, 13, 14, 15]
            .into_iter()
            .fold(Self::empty(), |s, i| s.with_gp(GpRegister::r64(i)))
    }

    /// Adds a general purpose register view.
    #[must_use]
    pub fn with_gp(mut self, reg: GpRegister) -> Self {
        let width = reg.width() + reg.offset();
        let slot = &mut self.gp[reg.index() as usize];
        *slot = (*slot).max(width);
        self
    }

    /// Adds a vector register view.
    #[must_use]
    pub fn with_sse(mut self, reg: SseRegister) -> Self {
        let slot = &mut self.sse[reg.index() as usize];
        *slot = (*slot).max(reg.width());
        self
    }

    /// Adds a flag.
    #[must_use]
    pub fn with_flag(mut self, flag: Flag) -> Self {
        self.flags |= 1 << flag.index();
        self
    }

    /// Set union.
    #[must_use]
    pub fn union(&self, other: &RegSet) -> RegSet {
        let mut out = self.clone();
        for i in 0..16 {
            out.gp[i] = out.gp[i].max(other.gp[i]);
            out.sse[i] = out.sse[i].max(other.sse[i]);
        }
        out.flags |= other.flags;
        out
    }

    /// General purpose registers in the set at their widest member width.
    pub fn gp_registers(&self) -> impl Iterator<Item = GpRegister> + '_ {
        self.gp
            .iter()
            .enumerate()
            .filter(|(_, w)| **w > 0)
            .map(|(i, w)| GpRegister::new(i as u8, round_width(*w)))
    }

    /// Vector registers in the set.
    pub fn sse_registers(&self) -> impl Iterator<Item = SseRegister> + '_ {
        self.sse
            .iter()
            .enumerate()
            .filter(|(_, w)| **w > 0)
            .map(|(i, w)| {
                if *w > 128 {
                    SseRegister::ymm(i as u8)
                } else {
                    SseRegister::xmm(i as u8)
                }
            })
    }

    /// Flags in the set.
    pub fn flags(&self) -> impl Iterator<Item = Flag> + '_ {
        Flag::all().filter(|f| self.flags & (1 << f.index()) != 0)
    }

    /// `true` if `reg`'s full register is in the set.
    #[must_use]
    pub fn contains_gp(&self, reg: GpRegister) -> bool {
        self.gp[reg.index() as usize] > 0
    }

    /// `true` if the flag is in the set.
    #[must_use]
    pub fn contains_flag(&self, flag: Flag) -> bool {
        self.flags & (1 << flag.index()) != 0
    }

    /// `true` if nothing is in the set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.flags == 0 && self.gp.iter().all(|w| *w == 0) && self.sse.iter().all(|w| *w == 0)
    }
}

fn round_width(w: u16) -> u16 {
    match w {
        0..=8 => 8,
        9..=16 => 16,
        17..=32 => 32,
        _ => 64,
    }
}

impl fmt::Display for RegSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<String> = self.gp_registers().map(|r| r.to_string()).collect();
        names.extend(self.sse_registers().map(|r| r.to_string()));
        names.extend(self.flags().map(|fl| format!("%{}", fl)));
        write!(f, "{{ {} }}", names.join(" "))
    }
}

//! Concrete machine states.

use std::{collections::BTreeMap, fmt};

use crate::x64::register::{Flag, GpRegister, RegSet, SseRegister};

/// A concrete register file, flag set and sparse memory image.
///
/// Memory cells that were never written read as zero. Counterexamples
/// returned by the validators are values of this type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct CpuState {
    /// 64-bit general purpose registers in index order.
    pub gp: [u64; 16],
    /// 256-bit vector registers as four little-endian 64-bit lanes.
    pub sse: [[u64; 4]; 16],
    /// Status flags in [`Flag::index`] order.
    pub flags: [bool; 6],
    /// Sparse byte-addressed memory.
    pub memory: BTreeMap<u64, u8>,
}

impl CpuState {
    /// An all-zero state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads a general purpose register view, zero extended to 64 bits.
    #[must_use]
    pub fn get_gp(&self, reg: GpRegister) -> u64 {
        let full = self.gp[reg.index() as usize];
        (full >> reg.offset()) & mask(reg.width())
    }

    /// Writes a general purpose register view, leaving the other bits alone.
    pub fn set_gp(&mut self, reg: GpRegister, value: u64) {
        let slot = &mut self.gp[reg.index() as usize];
        let m = mask(reg.width()) << reg.offset();
        *slot = (*slot & !m) | ((value << reg.offset()) & m);
    }

    /// Reads a vector register view.
    #[must_use]
    pub fn get_sse(&self, reg: SseRegister) -> [u64; 4] {
        let mut lanes = self.sse[reg.index() as usize];
        if reg.width() == 128 {
            lanes[2] = 0;
            lanes[3] = 0;
        }
        lanes
    }

    /// Writes a vector register view (upper lanes untouched for `xmm`).
    pub fn set_sse(&mut self, reg: SseRegister, lanes: [u64; 4]) {
        let slot = &mut self.sse[reg.index() as usize];
        let count = (reg.width() / 64) as usize;
        slot[..count].copy_from_slice(&lanes[..count]);
    }

    /// Reads a flag.
    #[must_use]
    pub fn get_flag(&self, flag: Flag) -> bool {
        self.flags[flag.index()]
    }

    /// Writes a flag.
    pub fn set_flag(&mut self, flag: Flag, value: bool) {
        self.flags[flag.index()] = value;
    }

    /// Reads one byte of memory.
    #[must_use]
    pub fn read_byte(&self, addr: u64) -> u8 {
        self.memory.get(&addr).copied().unwrap_or(0)
    }

    /// Reads `bytes` little-endian bytes (at most 8).
    #[must_use]
    pub fn read_u64(&self, addr: u64, bytes: u16) -> u64 {
        (0..bytes.min(8)).fold(0u64, |acc, i| {
            acc | (u64::from(self.read_byte(addr.wrapping_add(u64::from(i)))) << (8 * i))
        })
    }

    /// Writes `bytes` little-endian bytes (at most 8).
    pub fn write_u64(&mut self, addr: u64, value: u64, bytes: u16) {
        for i in 0..bytes.min(8) {
            self.memory
                .insert(addr.wrapping_add(u64::from(i)), (value >> (8 * i)) as u8);
        }
    }

    /// Compares the locations in `regs` and, if `memory` is set, the union of
    /// both memory images. Returns the name of the first differing location.
    #[must_use]
    pub fn first_difference(
        &self,
        other: &CpuState,
        regs: &RegSet,
        memory: bool,
    ) -> Option<String> {
        for reg in regs.gp_registers() {
            if self.get_gp(reg) != other.get_gp(reg) {
                return Some(reg.to_string());
            }
        }
        for reg in regs.sse_registers() {
            if self.get_sse(reg) != other.get_sse(reg) {
                return Some(reg.to_string());
            }
        }
        for flag in regs.flags() {
            if self.get_flag(flag) != other.get_flag(flag) {
                return Some(format!("%{}", flag));
            }
        }
        if memory {
            return self.first_byte_difference(other, |_| true);
        }
        None
    }

    /// The first byte at or above `floor` on which the memory images differ.
    ///
    /// An address is below `floor` when `addr - floor` is negative as a
    /// signed 64-bit value, so a push at a stack pointer near zero stays
    /// below it.
    #[must_use]
    pub fn first_memory_difference(&self, other: &CpuState, floor: u64) -> Option<String> {
        self.first_byte_difference(other, |addr| addr.wrapping_sub(floor) as i64 >= 0)
    }

    fn first_byte_difference(
        &self,
        other: &CpuState,
        keep: impl Fn(u64) -> bool,
    ) -> Option<String> {
        self.memory
            .keys()
            .chain(other.memory.keys())
            .copied()
            .filter(|addr| keep(*addr))
            .find(|addr| self.read_byte(*addr) != other.read_byte(*addr))
            .map(|addr| format!("mem[0x{:x}]", addr))
    }
}

/// Low `width` bits set.
#[must_use]
pub fn mask(width: u16) -> u64 {
    if width >= 64 {
        u64::MAX
    } else {
        (1u64 << width) - 1
    }
}

impl fmt::Display for CpuState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for reg in GpRegister::all64() {
            writeln!(f, "{:>6} 0x{:016x}", reg.to_string(), self.gp[reg.index() as usize])?;
        }
        for (i, lanes) in self.sse.iter().enumerate() {
            if lanes.iter().any(|l| *l != 0) {
                writeln!(
                    f,
                    "%ymm{:<2} 0x{:016x}{:016x}{:016x}{:016x}",
                    i, lanes[3], lanes[2], lanes[1], lanes[0]
                )?;
            }
        }
        let flags: Vec<String> = Flag::all()
            .map(|fl| format!("{}={}", fl, u8::from(self.get_flag(fl))))
            .collect();
        writeln!(f, "{}", flags.join(" "))?;
        for (addr, byte) in &self.memory {
            writeln!(f, "  [0x{:016x}] 0x{:02x}", addr, byte)?;
        }
        Ok(())
    }
}

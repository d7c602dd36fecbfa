//! Instruction operands.

use std::fmt;

use crate::x64::register::{GpRegister, SseRegister};

/// A memory operand in `disp(base, index, scale)` form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Memory {
    /// Base register, if any.
    pub base: Option<GpRegister>,
    /// Index register, if any.
    pub index: Option<GpRegister>,
    /// Scale applied to the index (1, 2, 4 or 8).
    pub scale: u8,
    /// Signed displacement.
    pub disp: i64,
    /// Size of the access in bits.
    pub size: u16,
}

impl Memory {
    /// `disp(base)`
    #[must_use]
    pub fn base_disp(base: GpRegister, disp: i64, size: u16) -> Self {
        Self {
            base: Some(base),
            index: None,
            scale: 1,
            disp,
            size,
        }
    }

    /// Returns `true` for the addressing forms the handlers model: 64-bit
    /// base and index registers and a valid scale.
    #[must_use]
    pub fn is_typical(&self) -> bool {
        let reg_ok = |r: &Option<GpRegister>| r.is_none_or(|r| r.width() == 64 && !r.is_high());
        reg_ok(&self.base)
            && reg_ok(&self.index)
            && matches!(self.scale, 1 | 2 | 4 | 8)
            && i32::try_from(self.disp).is_ok()
    }

    /// Same address, different access size.
    #[must_use]
    pub fn with_size(&self, size: u16) -> Memory {
        Memory {
            size,
            ..self.clone()
        }
    }
}

impl fmt::Display for Memory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.disp != 0 || (self.base.is_none() && self.index.is_none()) {
            if self.disp < 0 {
                write!(f, "-0x{:x}", self.disp.unsigned_abs())?;
            } else {
                write!(f, "0x{:x}", self.disp)?;
            }
        }
        if self.base.is_none() && self.index.is_none() {
            return Ok(());
        }
        write!(f, "(")?;
        if let Some(base) = self.base {
            write!(f, "{}", base)?;
        }
        if let Some(index) = self.index {
            write!(f, ",{},{}", index, self.scale)?;
        }
        write!(f, ")")
    }
}

/// An immediate operand with its encoded width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Immediate {
    /// The value, sign-extended to 64 bits.
    pub value: i64,
    /// Encoded width in bits (8, 16, 32 or 64).
    pub width: u16,
}

/// An instruction operand.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Operand {
    /// General purpose register
    Gp(GpRegister),
    /// Vector register
    Sse(SseRegister),
    /// Memory reference
    Mem(Memory),
    /// Immediate constant
    Imm(Immediate),
    /// Jump or call target
    Label(String),
}

impl Operand {
    /// Width of the operand in bits; labels have width 0.
    #[must_use]
    pub fn width(&self) -> u16 {
        match self {
            Operand::Gp(r) => r.width(),
            Operand::Sse(r) => r.width(),
            Operand::Mem(m) => m.size,
            Operand::Imm(i) => i.width,
            Operand::Label(_) => 0,
        }
    }

    /// Classifies the operand.
    #[must_use]
    pub fn kind(&self) -> OperandKind {
        match self {
            Operand::Gp(r) => match r.width() {
                8 => OperandKind::R8,
                16 => OperandKind::R16,
                32 => OperandKind::R32,
                _ => OperandKind::R64,
            },
            Operand::Sse(r) if r.width() == 256 => OperandKind::Ymm,
            Operand::Sse(_) => OperandKind::Xmm,
            Operand::Mem(m) => match m.size {
                8 => OperandKind::M8,
                16 => OperandKind::M16,
                32 => OperandKind::M32,
                64 => OperandKind::M64,
                128 => OperandKind::M128,
                _ => OperandKind::M256,
            },
            Operand::Imm(i) => match i.width {
                8 => OperandKind::Imm8,
                16 => OperandKind::Imm16,
                32 => OperandKind::Imm32,
                _ => OperandKind::Imm64,
            },
            Operand::Label(_) => OperandKind::Label,
        }
    }

    /// Returns the general purpose register, if this is one.
    #[must_use]
    pub fn as_gp(&self) -> Option<GpRegister> {
        match self {
            Operand::Gp(r) => Some(*r),
            _ => None,
        }
    }

    /// Returns the vector register, if this is one.
    #[must_use]
    pub fn as_sse(&self) -> Option<SseRegister> {
        match self {
            Operand::Sse(r) => Some(*r),
            _ => None,
        }
    }

    /// Returns the memory reference, if this is one.
    #[must_use]
    pub fn as_mem(&self) -> Option<&Memory> {
        match self {
            Operand::Mem(m) => Some(m),
            _ => None,
        }
    }

    /// Returns the immediate value, if this is one.
    #[must_use]
    pub fn as_imm(&self) -> Option<i64> {
        match self {
            Operand::Imm(i) => Some(i.value),
            _ => None,
        }
    }

    /// Returns the label name, if this is one.
    #[must_use]
    pub fn as_label(&self) -> Option<&str> {
        match self {
            Operand::Label(l) => Some(l),
            _ => None,
        }
    }

    /// `true` for memory operands.
    #[must_use]
    pub fn is_mem(&self) -> bool {
        matches!(self, Operand::Mem(_))
    }

    /// `true` for immediates.
    #[must_use]
    pub fn is_imm(&self) -> bool {
        matches!(self, Operand::Imm(_))
    }

    /// `true` for register, memory and immediate operands the handlers can model.
    #[must_use]
    pub fn is_modelable(&self) -> bool {
        match self {
            Operand::Gp(_) | Operand::Sse(_) | Operand::Imm(_) => true,
            Operand::Mem(m) => m.is_typical(),
            Operand::Label(_) => false,
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Gp(r) => write!(f, "{}", r),
            Operand::Sse(r) => write!(f, "{}", r),
            Operand::Mem(m) => write!(f, "{}", m),
            Operand::Imm(i) if i.value < 0 => write!(f, "$-0x{:x}", i.value.unsigned_abs()),
            Operand::Imm(i) => write!(f, "$0x{:x}", i.value),
            Operand::Label(l) => write!(f, "{}", l),
        }
    }
}

/// Operand classification used to build opcode names.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "lowercase")]
pub enum OperandKind {
    /// 8-bit register
    R8,
    /// 16-bit register
    R16,
    /// 32-bit register
    R32,
    /// 64-bit register
    R64,
    /// 128-bit vector register
    Xmm,
    /// 256-bit vector register
    Ymm,
    /// 8-bit memory
    M8,
    /// 16-bit memory
    M16,
    /// 32-bit memory
    M32,
    /// 64-bit memory
    M64,
    /// 128-bit memory
    M128,
    /// 256-bit memory
    M256,
    /// 8-bit immediate
    Imm8,
    /// 16-bit immediate
    Imm16,
    /// 32-bit immediate
    Imm32,
    /// 64-bit immediate
    Imm64,
    /// Label
    Label,
}

impl OperandKind {
    /// Width in bits; labels have width 0.
    #[must_use]
    pub const fn width(&self) -> u16 {
        match self {
            OperandKind::R8 | OperandKind::M8 | OperandKind::Imm8 => 8,
            OperandKind::R16 | OperandKind::M16 | OperandKind::Imm16 => 16,
            OperandKind::R32 | OperandKind::M32 | OperandKind::Imm32 => 32,
            OperandKind::R64 | OperandKind::M64 | OperandKind::Imm64 => 64,
            OperandKind::Xmm | OperandKind::M128 => 128,
            OperandKind::Ymm | OperandKind::M256 => 256,
            OperandKind::Label => 0,
        }
    }

    /// `true` for memory kinds.
    #[must_use]
    pub const fn is_mem(&self) -> bool {
        matches!(
            self,
            OperandKind::M8
                | OperandKind::M16
                | OperandKind::M32
                | OperandKind::M64
                | OperandKind::M128
                | OperandKind::M256
        )
    }

    /// `true` for immediate kinds.
    #[must_use]
    pub const fn is_imm(&self) -> bool {
        matches!(
            self,
            OperandKind::Imm8 | OperandKind::Imm16 | OperandKind::Imm32 | OperandKind::Imm64
        )
    }

    /// `true` for register kinds.
    #[must_use]
    pub const fn is_reg(&self) -> bool {
        matches!(
            self,
            OperandKind::R8
                | OperandKind::R16
                | OperandKind::R32
                | OperandKind::R64
                | OperandKind::Xmm
                | OperandKind::Ymm
        )
    }

    /// The register kind of the same width.
    #[must_use]
    pub const fn as_register_kind(&self) -> OperandKind {
        match self.width() {
            8 => OperandKind::R8,
            16 => OperandKind::R16,
            32 => OperandKind::R32,
            64 => OperandKind::R64,
            128 => OperandKind::Xmm,
            256 => OperandKind::Ymm,
            _ => OperandKind::Label,
        }
    }
}

//! Mnemonics, condition codes and opcodes.
//!
//! A [`Mnemonic`] names an operation independent of operand types. An
//! [`Opcode`] is a mnemonic together with its condition code (for `jcc`,
//! `setcc`, `cmovcc`) and the kinds of its operands, so `addq %rax, %rbx`
//! and `addl $1, (%rsp)` share a mnemonic but have different opcodes
//! (`add_r64_r64` and `add_m32_imm8`).

use std::{fmt, str::FromStr};

use strum::{Display, EnumString};

use crate::{x64::operand::OperandKind, Error};

/// Operation names understood by the instruction model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
#[allow(missing_docs)]
pub enum Mnemonic {
    // data movement
    Mov,
    Movzx,
    Movsx,
    Movsxd,
    Lea,
    Xchg,
    Push,
    Pop,
    Leave,
    // arithmetic
    Add,
    Adc,
    Sub,
    Sbb,
    Cmp,
    Inc,
    Dec,
    Neg,
    Imul,
    Mul,
    Div,
    Idiv,
    // logic and bit manipulation
    And,
    Or,
    Xor,
    Not,
    Andn,
    Test,
    Bt,
    Bts,
    Btr,
    Btc,
    Bsf,
    Bsr,
    Popcnt,
    Bextr,
    Blsr,
    Blsi,
    Blsmsk,
    // shifts
    Shl,
    Shr,
    Sar,
    Rol,
    Ror,
    Shld,
    Shrd,
    // sign extension of the accumulator
    Cbw,
    Cwde,
    Cdqe,
    Cwd,
    Cdq,
    Cqo,
    // conditional
    Setcc,
    Cmovcc,
    Clc,
    Stc,
    Cmc,
    // control
    Nop,
    Jcc,
    Jmp,
    Call,
    Ret,
    // vector
    Movd,
    #[strum(serialize = "movq_sse")]
    MovqSse,
    Movaps,
    Movups,
    Movapd,
    Movupd,
    Movdqa,
    Movdqu,
    Pand,
    Pandn,
    Por,
    Pxor,
    Paddb,
    Paddw,
    Paddd,
    Paddq,
    Psubb,
    Psubw,
    Psubd,
    Psubq,
    Pshufd,
    Shufps,
    Palignr,
    Pmovmskb,
    Movss,
    Movsd,
    Addss,
    Addsd,
    Subss,
    Subsd,
    Mulss,
    Mulsd,
    Divss,
    Divsd,
    Minss,
    Maxss,
    Minsd,
    Maxsd,
    Vzeroall,
    Vzeroupper,
    Vbroadcastss,
    Vbroadcastsd,
    Vfmadd132ss,
    Vfmadd213ss,
    Vfmadd231ss,
    Vfmadd132sd,
    Vfmadd213sd,
    Vfmadd231sd,
    /// A label definition pseudo instruction (`.L1:`).
    #[strum(disabled)]
    LabelDefn,
}

impl Mnemonic {
    /// `true` for mnemonics that carry a condition code.
    #[must_use]
    pub const fn is_conditional(&self) -> bool {
        matches!(self, Mnemonic::Jcc | Mnemonic::Setcc | Mnemonic::Cmovcc)
    }

    /// `true` for vector mnemonics whose memory operands are full vector width.
    #[must_use]
    pub const fn is_packed(&self) -> bool {
        matches!(
            self,
            Mnemonic::Movaps
                | Mnemonic::Movups
                | Mnemonic::Movapd
                | Mnemonic::Movupd
                | Mnemonic::Movdqa
                | Mnemonic::Movdqu
                | Mnemonic::Pand
                | Mnemonic::Pandn
                | Mnemonic::Por
                | Mnemonic::Pxor
                | Mnemonic::Paddb
                | Mnemonic::Paddw
                | Mnemonic::Paddd
                | Mnemonic::Paddq
                | Mnemonic::Psubb
                | Mnemonic::Psubw
                | Mnemonic::Psubd
                | Mnemonic::Psubq
                | Mnemonic::Pshufd
                | Mnemonic::Shufps
                | Mnemonic::Palignr
        )
    }

    /// Width of the memory operand for scalar vector mnemonics.
    #[must_use]
    pub const fn scalar_width(&self) -> Option<u16> {
        match self {
            Mnemonic::Movd
            | Mnemonic::Movss
            | Mnemonic::Addss
            | Mnemonic::Subss
            | Mnemonic::Mulss
            | Mnemonic::Divss
            | Mnemonic::Minss
            | Mnemonic::Maxss
            | Mnemonic::Vbroadcastss
            | Mnemonic::Vfmadd132ss
            | Mnemonic::Vfmadd213ss
            | Mnemonic::Vfmadd231ss => Some(32),
            Mnemonic::MovqSse
            | Mnemonic::Movsd
            | Mnemonic::Addsd
            | Mnemonic::Subsd
            | Mnemonic::Mulsd
            | Mnemonic::Divsd
            | Mnemonic::Minsd
            | Mnemonic::Maxsd
            | Mnemonic::Vbroadcastsd
            | Mnemonic::Vfmadd132sd
            | Mnemonic::Vfmadd213sd
            | Mnemonic::Vfmadd231sd => Some(64),
            _ => None,
        }
    }

    /// The AT&T spelling used when printing (without size suffix).
    #[must_use]
    pub fn att_name(&self) -> String {
        match self {
            Mnemonic::MovqSse => "movq".to_string(),
            Mnemonic::Movzx => "movz".to_string(),
            Mnemonic::Movsx => "movs".to_string(),
            Mnemonic::Movsxd => "movslq".to_string(),
            _ => self.to_string(),
        }
    }
}

/// Condition codes used by `jcc`, `setcc` and `cmovcc`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display)]
#[strum(serialize_all = "lowercase")]
pub enum Condition {
    /// Equal (ZF=1)
    E,
    /// Not equal (ZF=0)
    Ne,
    /// Less than (SF!=OF)
    L,
    /// Greater than or equal (SF=OF)
    Ge,
    /// Less than or equal (ZF=1 or SF!=OF)
    Le,
    /// Greater than (ZF=0 and SF=OF)
    G,
    /// Below (CF=1)
    B,
    /// Above or equal (CF=0)
    Ae,
    /// Below or equal (CF=1 or ZF=1)
    Be,
    /// Above (CF=0 and ZF=0)
    A,
    /// Sign (SF=1)
    S,
    /// Not sign (SF=0)
    Ns,
    /// Overflow (OF=1)
    O,
    /// Not overflow (OF=0)
    No,
    /// Parity even (PF=1)
    P,
    /// Parity odd (PF=0)
    Np,
}

impl Condition {
    /// Returns the negation of this condition.
    #[must_use]
    pub fn negate(&self) -> Self {
        match self {
            Condition::E => Condition::Ne,
            Condition::Ne => Condition::E,
            Condition::L => Condition::Ge,
            Condition::Ge => Condition::L,
            Condition::Le => Condition::G,
            Condition::G => Condition::Le,
            Condition::B => Condition::Ae,
            Condition::Ae => Condition::B,
            Condition::Be => Condition::A,
            Condition::A => Condition::Be,
            Condition::S => Condition::Ns,
            Condition::Ns => Condition::S,
            Condition::O => Condition::No,
            Condition::No => Condition::O,
            Condition::P => Condition::Np,
            Condition::Np => Condition::P,
        }
    }

    /// Parses a condition suffix, including the common aliases (`z`, `nz`, `c`, ...).
    #[must_use]
    pub fn from_suffix(s: &str) -> Option<Self> {
        Some(match s {
            "e" | "z" => Condition::E,
            "ne" | "nz" => Condition::Ne,
            "l" | "nge" => Condition::L,
            "ge" | "nl" => Condition::Ge,
            "le" | "ng" => Condition::Le,
            "g" | "nle" => Condition::G,
            "b" | "c" | "nae" => Condition::B,
            "ae" | "nc" | "nb" => Condition::Ae,
            "be" | "na" => Condition::Be,
            "a" | "nbe" => Condition::A,
            "s" => Condition::S,
            "ns" => Condition::Ns,
            "o" => Condition::O,
            "no" => Condition::No,
            "p" | "pe" => Condition::P,
            "np" | "po" => Condition::Np,
            _ => return None,
        })
    }
}

/// A mnemonic with its condition code and operand kinds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Opcode {
    /// The operation.
    pub mnemonic: Mnemonic,
    /// Condition code for conditional mnemonics.
    pub condition: Option<Condition>,
    /// Operand kinds in destination-first order.
    pub kinds: Vec<OperandKind>,
}

impl Opcode {
    /// Creates an opcode.
    #[must_use]
    pub fn new(mnemonic: Mnemonic, condition: Option<Condition>, kinds: Vec<OperandKind>) -> Self {
        Self {
            mnemonic,
            condition,
            kinds,
        }
    }

    /// Number of operands.
    #[must_use]
    pub fn arity(&self) -> usize {
        self.kinds.len()
    }

    /// `true` if the opcode takes an 8-bit immediate.
    #[must_use]
    pub fn has_imm8(&self) -> bool {
        self.kinds.contains(&OperandKind::Imm8)
    }

    /// `true` if any operand is a memory reference.
    #[must_use]
    pub fn has_mem(&self) -> bool {
        self.kinds.iter().any(OperandKind::is_mem)
    }

    /// Returns a copy with operand `i` replaced.
    #[must_use]
    pub fn with_kind(&self, i: usize, kind: OperandKind) -> Opcode {
        let mut out = self.clone();
        out.kinds[i] = kind;
        out
    }

    /// The mnemonic as written, conditions included (`jne`, `cmovge`).
    #[must_use]
    pub fn base_name(&self) -> String {
        match (self.mnemonic, self.condition) {
            (Mnemonic::Jcc, Some(c)) => format!("j{}", c),
            (Mnemonic::Setcc, Some(c)) => format!("set{}", c),
            (Mnemonic::Cmovcc, Some(c)) => format!("cmov{}", c),
            (m, _) => m.to_string(),
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.base_name())?;
        for kind in &self.kinds {
            write!(f, "_{}", kind)?;
        }
        Ok(())
    }
}

/// Splits a written mnemonic (`add`, `cmovne`, `movq_sse`) into the
/// operation and its condition code.
fn parse_base_name(name: &str) -> Option<(Mnemonic, Option<Condition>)> {
    if let Ok(mnemonic) = Mnemonic::from_str(name) {
        return (!mnemonic.is_conditional()).then_some((mnemonic, None));
    }
    [
        ("cmov", Mnemonic::Cmovcc),
        ("set", Mnemonic::Setcc),
        ("j", Mnemonic::Jcc),
    ]
    .into_iter()
    .find_map(|(prefix, mnemonic)| {
        let condition = Condition::from_suffix(name.strip_prefix(prefix)?)?;
        Some((mnemonic, Some(condition)))
    })
}

impl FromStr for Opcode {
    type Err = Error;

    /// Parses the form produced by `Display`, e.g. `add_r64_m64` or
    /// `cmovne_r32_r32`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || Error::Parse {
            line: 1,
            message: format!("invalid opcode {}", s),
        };
        let tokens: Vec<&str> = s.split('_').collect();
        // mnemonics may contain an underscore themselves (`movq_sse`)
        for split in (1..=tokens.len()).rev() {
            let Some((mnemonic, condition)) = parse_base_name(&tokens[..split].join("_")) else {
                continue;
            };
            let kinds = tokens[split..]
                .iter()
                .map(|t| OperandKind::from_str(t))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|_| err())?;
            return Ok(Opcode::new(mnemonic, condition, kinds));
        }
        Err(err())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mnemonic_parse() {
        assert_eq!(Mnemonic::from_str("pandn").unwrap(), Mnemonic::Pandn);
        assert_eq!(Mnemonic::from_str("movq_sse").unwrap(), Mnemonic::MovqSse);
        assert!(Mnemonic::from_str("labeldefn").is_err());
    }

    #[test]
    fn test_opcode_display() {
        let op = Opcode::new(
            Mnemonic::Add,
            None,
            vec![OperandKind::R64, OperandKind::M64],
        );
        assert_eq!(op.to_string(), "add_r64_m64");
        let jcc = Opcode::new(Mnemonic::Jcc, Some(Condition::Ne), vec![OperandKind::Label]);
        assert_eq!(jcc.to_string(), "jne_label");
    }

    #[test]
    fn test_opcode_parse() {
        for text in ["add_r64_m64", "cmovne_r32_r32", "movq_sse_xmm_r64", "jmp_label"] {
            assert_eq!(Opcode::from_str(text).unwrap().to_string(), text);
        }
        let shuffle = Opcode::from_str("pshufd_xmm_xmm_imm8").unwrap();
        assert!(shuffle.has_imm8());
        assert!(Opcode::from_str("retq").is_err());
        assert!(Opcode::from_str("add_r64_q99").is_err());
        assert!(Opcode::from_str("cmovcc_r64_r64").is_err());
    }

    #[test]
    fn test_condition_aliases() {
        assert_eq!(Condition::from_suffix("nz"), Some(Condition::Ne));
        assert_eq!(Condition::from_suffix("c"), Some(Condition::B));
        assert_eq!(Condition::L.negate(), Condition::Ge);
        assert!(Condition::from_suffix("q").is_none());
    }
}

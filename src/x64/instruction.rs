//! Instructions and instruction sequences.

use std::{fmt, ops::Index, str::FromStr};

use crate::{
    x64::{
        opcode::{Condition, Mnemonic, Opcode},
        operand::Operand,
        parser,
    },
    Error, Result,
};

/// A single instruction with operands in destination-first order.
///
/// The AT&T text form lists the destination last; [`Code`]'s parser
/// reverses operands on the way in and [`fmt::Display`] reverses them on the
/// way out.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Instruction {
    mnemonic: Mnemonic,
    condition: Option<Condition>,
    operands: Vec<Operand>,
}

impl Instruction {
    /// Creates an instruction.
    #[must_use]
    pub fn new(mnemonic: Mnemonic, operands: Vec<Operand>) -> Self {
        Self {
            mnemonic,
            condition: None,
            operands,
        }
    }

    /// Creates a `jcc`, `setcc` or `cmovcc` instruction.
    #[must_use]
    pub fn conditional(mnemonic: Mnemonic, condition: Condition, operands: Vec<Operand>) -> Self {
        Self {
            mnemonic,
            condition: Some(condition),
            operands,
        }
    }

    /// Creates a label definition.
    #[must_use]
    pub fn label(name: impl Into<String>) -> Self {
        Self::new(Mnemonic::LabelDefn, vec![Operand::Label(name.into())])
    }

    /// The operation.
    #[must_use]
    pub fn mnemonic(&self) -> Mnemonic {
        self.mnemonic
    }

    /// The condition code for conditional instructions.
    #[must_use]
    pub fn condition(&self) -> Option<Condition> {
        self.condition
    }

    /// Operands in destination-first order.
    #[must_use]
    pub fn operands(&self) -> &[Operand] {
        &self.operands
    }

    /// Operand `i` in destination-first order.
    #[must_use]
    pub fn operand(&self, i: usize) -> Option<&Operand> {
        self.operands.get(i)
    }

    /// Number of operands.
    #[must_use]
    pub fn arity(&self) -> usize {
        self.operands.len()
    }

    /// The opcode (mnemonic, condition and operand kinds).
    #[must_use]
    pub fn opcode(&self) -> Opcode {
        Opcode::new(
            self.mnemonic,
            self.condition,
            self.operands.iter().map(Operand::kind).collect(),
        )
    }

    /// Replaces operand `i`.
    pub fn set_operand(&mut self, i: usize, operand: Operand) {
        if let Some(slot) = self.operands.get_mut(i) {
            *slot = operand;
        }
    }

    /// `true` for label definitions.
    #[must_use]
    pub fn is_label_defn(&self) -> bool {
        self.mnemonic == Mnemonic::LabelDefn
    }

    /// `true` for conditional jumps.
    #[must_use]
    pub fn is_jcc(&self) -> bool {
        self.mnemonic == Mnemonic::Jcc
    }

    /// `true` for unconditional jumps.
    #[must_use]
    pub fn is_jmp(&self) -> bool {
        self.mnemonic == Mnemonic::Jmp
    }

    /// `true` for any jump.
    #[must_use]
    pub fn is_jump(&self) -> bool {
        self.is_jcc() || self.is_jmp()
    }

    /// `true` for returns.
    #[must_use]
    pub fn is_ret(&self) -> bool {
        self.mnemonic == Mnemonic::Ret
    }

    /// `true` for calls.
    #[must_use]
    pub fn is_call(&self) -> bool {
        self.mnemonic == Mnemonic::Call
    }

    /// `true` if the instruction ends a basic block.
    #[must_use]
    pub fn is_terminator(&self) -> bool {
        self.is_jump() || self.is_ret()
    }

    /// The label operand of a jump, call or label definition.
    #[must_use]
    pub fn target_label(&self) -> Option<&str> {
        self.operands.first().and_then(Operand::as_label)
    }

    /// `true` if any operand is a memory reference.
    #[must_use]
    pub fn touches_memory(&self) -> bool {
        self.operands.iter().any(Operand::is_mem)
            || matches!(
                self.mnemonic,
                Mnemonic::Push | Mnemonic::Pop | Mnemonic::Leave | Mnemonic::Call | Mnemonic::Ret
            )
    }

    fn suffix(&self) -> &'static str {
        let explicit = matches!(
            self.mnemonic,
            Mnemonic::Push
                | Mnemonic::Pop
                | Mnemonic::Inc
                | Mnemonic::Dec
                | Mnemonic::Neg
                | Mnemonic::Not
                | Mnemonic::Mul
                | Mnemonic::Div
                | Mnemonic::Idiv
        ) || (self.operands.iter().any(Operand::is_mem)
            && !self.operands.iter().any(|o| matches!(o, Operand::Gp(_) | Operand::Sse(_)))
            && self.mnemonic.scalar_width().is_none()
            && !self.mnemonic.is_packed());
        if !explicit {
            return "";
        }
        if matches!(self.mnemonic, Mnemonic::Push | Mnemonic::Pop) {
            return match self.operands.first() {
                Some(Operand::Gp(r)) if r.width() == 16 => "w",
                Some(Operand::Mem(m)) if m.size == 16 => "w",
                _ => "q",
            };
        }
        match self.operands.first().map(Operand::width) {
            Some(8) => "b",
            Some(16) => "w",
            Some(32) => "l",
            _ => "q",
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_label_defn() {
            return write!(f, "{}:", self.target_label().unwrap_or_default());
        }
        match self.mnemonic {
            Mnemonic::Movzx | Mnemonic::Movsx => {
                let w = |o: Option<&Operand>| match o.map(Operand::width) {
                    Some(8) => 'b',
                    Some(16) => 'w',
                    Some(32) => 'l',
                    _ => 'q',
                };
                write!(
                    f,
                    "{}{}{}",
                    self.mnemonic.att_name(),
                    w(self.operands.get(1)),
                    w(self.operands.first())
                )?;
            }
            _ => {
                let name = match (self.mnemonic, self.condition) {
                    (Mnemonic::Jcc, Some(c)) => format!("j{}", c),
                    (Mnemonic::Setcc, Some(c)) => format!("set{}", c),
                    (Mnemonic::Cmovcc, Some(c)) => format!("cmov{}", c),
                    (m, _) => m.att_name(),
                };
                write!(f, "{}{}", name, self.suffix())?;
            }
        }
        for (i, op) in self.operands.iter().rev().enumerate() {
            if i == 0 {
                write!(f, " {}", op)?;
            } else {
                write!(f, ", {}", op)?;
            }
        }
        Ok(())
    }
}

impl FromStr for Instruction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let code: Code = s.parse()?;
        match code.instructions.as_slice() {
            [single] => Ok(single.clone()),
            _ => Err(Error::Parse {
                line: 1,
                message: format!("expected exactly one instruction in '{}'", s.trim()),
            }),
        }
    }
}

/// An ordered sequence of instructions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Code {
    instructions: Vec<Instruction>,
}

impl Code {
    /// Creates code from a list of instructions.
    #[must_use]
    pub fn new(instructions: Vec<Instruction>) -> Self {
        Self { instructions }
    }

    /// Number of instructions, label definitions included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    /// `true` if there are no instructions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Appends an instruction.
    pub fn push(&mut self, instr: Instruction) {
        self.instructions.push(instr);
    }

    /// Iterates over the instructions.
    pub fn iter(&self) -> std::slice::Iter<'_, Instruction> {
        self.instructions.iter()
    }

    /// The instructions as a slice.
    #[must_use]
    pub fn as_slice(&self) -> &[Instruction] {
        &self.instructions
    }
}

impl Index<usize> for Code {
    type Output = Instruction;

    fn index(&self, index: usize) -> &Self::Output {
        &self.instructions[index]
    }
}

impl FromIterator<Instruction> for Code {
    fn from_iter<T: IntoIterator<Item = Instruction>>(iter: T) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a Code {
    type Item = &'a Instruction;
    type IntoIter = std::slice::Iter<'a, Instruction>;

    fn into_iter(self) -> Self::IntoIter {
        self.instructions.iter()
    }
}

impl FromStr for Code {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        parser::parse_code(s)
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for instr in &self.instructions {
            writeln!(f, "{}", instr)?;
        }
        Ok(())
    }
}

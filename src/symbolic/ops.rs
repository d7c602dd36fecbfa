//! Operator kinds carried by expression nodes.

use strum::Display;

/// Bit-vector operators producing a bit-vector of the operand width
/// (except [`BinOp::Concat`], whose result width is the sum).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum BinOp {
    /// Wrapping addition
    #[strum(serialize = "bvadd")]
    Add,
    /// Wrapping subtraction
    #[strum(serialize = "bvsub")]
    Sub,
    /// Wrapping multiplication
    #[strum(serialize = "bvmul")]
    Mul,
    /// Unsigned division
    #[strum(serialize = "bvudiv")]
    UDiv,
    /// Signed division
    #[strum(serialize = "bvsdiv")]
    SDiv,
    /// Unsigned remainder
    #[strum(serialize = "bvurem")]
    URem,
    /// Signed remainder
    #[strum(serialize = "bvsrem")]
    SRem,
    /// Bitwise and
    #[strum(serialize = "bvand")]
    And,
    /// Bitwise or
    #[strum(serialize = "bvor")]
    Or,
    /// Bitwise xor
    #[strum(serialize = "bvxor")]
    Xor,
    /// Shift left
    #[strum(serialize = "bvshl")]
    Shl,
    /// Logical shift right
    #[strum(serialize = "bvlshr")]
    LShr,
    /// Arithmetic shift right
    #[strum(serialize = "bvashr")]
    AShr,
    /// Rotate left by a symbolic amount
    #[strum(serialize = "rotl")]
    RotL,
    /// Rotate right by a symbolic amount
    #[strum(serialize = "rotr")]
    RotR,
    /// Concatenation, left operand in the high bits
    #[strum(serialize = "concat")]
    Concat,
}

impl BinOp {
    /// `true` if `a op b == b op a`.
    #[must_use]
    pub const fn is_commutative(&self) -> bool {
        matches!(
            self,
            BinOp::Add | BinOp::Mul | BinOp::And | BinOp::Or | BinOp::Xor
        )
    }
}

/// Bit-vector unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum UnOp {
    /// Bitwise complement
    #[strum(serialize = "bvnot")]
    Not,
    /// Two's complement negation
    #[strum(serialize = "bvneg")]
    Neg,
}

/// Comparisons producing a boolean.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum CmpOp {
    /// Equality of any two same-sorted expressions
    #[strum(serialize = "=")]
    Eq,
    /// Unsigned less than
    #[strum(serialize = "bvult")]
    Ult,
    /// Unsigned less or equal
    #[strum(serialize = "bvule")]
    Ule,
    /// Unsigned greater than
    #[strum(serialize = "bvugt")]
    Ugt,
    /// Unsigned greater or equal
    #[strum(serialize = "bvuge")]
    Uge,
    /// Signed less than
    #[strum(serialize = "bvslt")]
    Slt,
    /// Signed less or equal
    #[strum(serialize = "bvsle")]
    Sle,
    /// Signed greater than
    #[strum(serialize = "bvsgt")]
    Sgt,
    /// Signed greater or equal
    #[strum(serialize = "bvsge")]
    Sge,
}

/// Boolean connectives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum BoolOp {
    /// Conjunction
    #[strum(serialize = "and")]
    And,
    /// Disjunction
    #[strum(serialize = "or")]
    Or,
    /// Exclusive or
    #[strum(serialize = "xor")]
    Xor,
    /// Implication
    #[strum(serialize = "=>")]
    Implies,
    /// Equivalence
    #[strum(serialize = "iff")]
    Iff,
}

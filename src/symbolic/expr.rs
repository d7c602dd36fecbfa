//! Symbolic expression DAG.
//!
//! A [`SymExpr`] is an immutable, reference counted node with a cached sort
//! and structural hash. Children are always built before their parents, so
//! the expression graph is acyclic by construction and subtrees can be
//! shared freely between registers, flags and memory.
//!
//! Every builder validates the sorts of its operands and returns
//! [`Error::WidthMismatch`] on violation. Builders do not rewrite; see
//! [`crate::symbolic::Simplifier`] for that.

use std::{
    fmt,
    hash::{Hash, Hasher},
    rc::Rc,
    sync::atomic::{AtomicU64, Ordering},
};

use rustc_hash::FxHasher;

use crate::{
    symbolic::{
        ops::{BinOp, BoolOp, CmpOp, UnOp},
        value::{check_width, BitValue, MAX_WIDTH},
    },
    Error, Result,
};

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// The sort of an expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sort {
    /// Boolean
    Bool,
    /// Bit-vector of the given width
    Bv(u16),
    /// Array from `key`-bit indices to `value`-bit elements
    Array {
        /// Index width
        key: u16,
        /// Element width
        value: u16,
    },
}

impl fmt::Display for Sort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sort::Bool => write!(f, "Bool"),
            Sort::Bv(w) => write!(f, "(_ BitVec {})", w),
            Sort::Array { key, value } => {
                write!(f, "(Array (_ BitVec {}) (_ BitVec {}))", key, value)
            }
        }
    }
}

/// Node payloads.
#[derive(Debug, PartialEq, Eq, Hash)]
pub enum Node {
    /// Bit-vector constant
    Constant(BitValue),
    /// Boolean constant
    BoolConstant(bool),
    /// Free variable of any sort
    Variable {
        /// Unique name
        name: String,
        /// Sort
        sort: Sort,
    },
    /// Binary bit-vector operation
    Binop {
        /// Operator
        op: BinOp,
        /// Left operand
        left: SymExpr,
        /// Right operand
        right: SymExpr,
    },
    /// Unary bit-vector operation
    Unop {
        /// Operator
        op: UnOp,
        /// Operand
        operand: SymExpr,
    },
    /// Comparison
    Compare {
        /// Operator
        op: CmpOp,
        /// Left operand
        left: SymExpr,
        /// Right operand
        right: SymExpr,
    },
    /// Bits `hi..=lo` of the operand
    Extract {
        /// Operand
        operand: SymExpr,
        /// Most significant extracted bit
        hi: u16,
        /// Least significant extracted bit
        lo: u16,
    },
    /// Sign extension to `width` bits
    SignExtend {
        /// Operand
        operand: SymExpr,
        /// Result width
        width: u16,
    },
    /// If-then-else
    Ite {
        /// Boolean condition
        cond: SymExpr,
        /// Value when the condition holds
        then: SymExpr,
        /// Value otherwise
        otherwise: SymExpr,
    },
    /// Array read
    ArrayLookup {
        /// Array
        array: SymExpr,
        /// Index
        index: SymExpr,
    },
    /// Array write, producing a new array
    ArrayStore {
        /// Array
        array: SymExpr,
        /// Index
        index: SymExpr,
        /// Stored value
        value: SymExpr,
    },
    /// Uninterpreted function application
    Uf {
        /// Function name; equal names denote the same function
        name: String,
        /// Return width
        width: u16,
        /// Arguments
        args: Vec<SymExpr>,
    },
    /// Universal quantification over variables
    ForAll {
        /// Bound variables
        vars: Vec<SymExpr>,
        /// Body
        body: SymExpr,
    },
    /// Boolean negation
    Not(SymExpr),
    /// Boolean connective
    BoolOp {
        /// Connective
        op: BoolOp,
        /// Left operand
        left: SymExpr,
        /// Right operand
        right: SymExpr,
    },
}

/// A shared, immutable symbolic expression.
#[derive(Clone)]
pub struct SymExpr {
    node: Rc<Node>,
    sort: Sort,
    hash: u64,
}

impl PartialEq for SymExpr {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.node, &other.node)
            || (self.hash == other.hash && self.sort == other.sort && self.node == other.node)
    }
}

impl Eq for SymExpr {}

impl Hash for SymExpr {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

impl fmt::Debug for SymExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

fn mismatch(op: &'static str, left: Sort, right: impl fmt::Display) -> Error {
    Error::WidthMismatch {
        op,
        left: left.to_string(),
        right: right.to_string(),
    }
}

#[allow(clippy::should_implement_trait)]
impl SymExpr {
    fn mk(node: Node, sort: Sort) -> Self {
        let mut hasher = FxHasher::default();
        node.hash(&mut hasher);
        sort.hash(&mut hasher);
        Self {
            hash: hasher.finish(),
            node: Rc::new(node),
            sort,
        }
    }

    /// Rebuilds a node after checking its sort.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WidthMismatch`] if the children do not fit the node.
    pub fn from_node(node: Node) -> Result<Self> {
        match node {
            Node::Constant(v) => Ok(Self::bits(v)),
            Node::BoolConstant(b) => Ok(Self::bool(b)),
            Node::Variable { name, sort } => {
                match sort {
                    Sort::Bv(w) => {
                        check_width("variable", w)?;
                    }
                    Sort::Array { key, value } => {
                        check_width("array key", key)?;
                        check_width("array value", value)?;
                    }
                    Sort::Bool => {}
                }
                Ok(Self::mk(Node::Variable { name, sort }, sort))
            }
            Node::Binop { op, left, right } => left.binop(op, &right),
            Node::Unop { op, operand } => operand.unop(op),
            Node::Compare { op, left, right } => left.compare(op, &right),
            Node::Extract { operand, hi, lo } => operand.extract(hi, lo),
            Node::SignExtend { operand, width } => operand.sign_extend(width),
            Node::Ite {
                cond,
                then,
                otherwise,
            } => cond.ite(&then, &otherwise),
            Node::ArrayLookup { array, index } => array.select(&index),
            Node::ArrayStore {
                array,
                index,
                value,
            } => array.store(&index, &value),
            Node::Uf { name, width, args } => Self::uf(&name, width, &args),
            Node::ForAll { vars, body } => Self::forall(&vars, &body),
            Node::Not(operand) => operand.not(),
            Node::BoolOp { op, left, right } => left.boolop(op, &right),
        }
    }

    // ====================================================================
    // Leaves
    // ====================================================================

    /// A bit-vector constant of `width` bits (truncating `value`).
    #[must_use]
    pub fn constant(value: u128, width: u16) -> Self {
        Self::bits(BitValue::new(value, width))
    }

    /// A bit-vector constant from a [`BitValue`].
    #[must_use]
    pub fn bits(value: BitValue) -> Self {
        Self::mk(Node::Constant(value), Sort::Bv(value.width()))
    }

    /// A boolean constant.
    #[must_use]
    pub fn bool(value: bool) -> Self {
        Self::mk(Node::BoolConstant(value), Sort::Bool)
    }

    /// A bit-vector variable.
    #[must_use]
    pub fn var(name: impl Into<String>, width: u16) -> Self {
        let sort = Sort::Bv(width);
        Self::mk(
            Node::Variable {
                name: name.into(),
                sort,
            },
            sort,
        )
    }

    /// A boolean variable.
    #[must_use]
    pub fn bool_var(name: impl Into<String>) -> Self {
        Self::mk(
            Node::Variable {
                name: name.into(),
                sort: Sort::Bool,
            },
            Sort::Bool,
        )
    }

    /// An array variable.
    #[must_use]
    pub fn array_var(name: impl Into<String>, key: u16, value: u16) -> Self {
        let sort = Sort::Array { key, value };
        Self::mk(
            Node::Variable {
                name: name.into(),
                sort,
            },
            sort,
        )
    }

    fn fresh_name(prefix: &str) -> String {
        format!("{}_{}", prefix, TMP_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// A fresh bit-vector variable with a process-unique name.
    #[must_use]
    pub fn tmp_var(width: u16) -> Self {
        Self::var(Self::fresh_name("TMP_BV"), width)
    }

    /// A fresh boolean variable.
    #[must_use]
    pub fn tmp_bool() -> Self {
        Self::bool_var(Self::fresh_name("TMP_BOOL"))
    }

    /// A fresh array variable.
    #[must_use]
    pub fn tmp_array(key: u16, value: u16) -> Self {
        Self::array_var(Self::fresh_name("TMP_ARRAY"), key, value)
    }

    // ====================================================================
    // Accessors
    // ====================================================================

    /// The node payload.
    #[must_use]
    pub fn node(&self) -> &Node {
        &self.node
    }

    /// The sort.
    #[must_use]
    pub fn sort(&self) -> Sort {
        self.sort
    }

    /// Bit width, or 0 for booleans and arrays.
    #[must_use]
    pub fn width(&self) -> u16 {
        match self.sort {
            Sort::Bv(w) => w,
            _ => 0,
        }
    }

    /// `true` for boolean expressions.
    #[must_use]
    pub fn is_bool(&self) -> bool {
        self.sort == Sort::Bool
    }

    /// The constant value, if this is a bit-vector constant.
    #[must_use]
    pub fn as_constant(&self) -> Option<BitValue> {
        match &*self.node {
            Node::Constant(v) => Some(*v),
            _ => None,
        }
    }

    /// The constant value, if this is a boolean constant.
    #[must_use]
    pub fn as_bool_constant(&self) -> Option<bool> {
        match &*self.node {
            Node::BoolConstant(b) => Some(*b),
            _ => None,
        }
    }

    /// The variable name, if this is a variable.
    #[must_use]
    pub fn as_variable(&self) -> Option<&str> {
        match &*self.node {
            Node::Variable { name, .. } => Some(name),
            _ => None,
        }
    }

    /// `true` for the boolean constant `true`.
    #[must_use]
    pub fn is_true(&self) -> bool {
        self.as_bool_constant() == Some(true)
    }

    /// `true` for the boolean constant `false`.
    #[must_use]
    pub fn is_false(&self) -> bool {
        self.as_bool_constant() == Some(false)
    }

    /// Stable identity of the shared node, used for memoization.
    #[must_use]
    pub fn id(&self) -> usize {
        Rc::as_ptr(&self.node) as usize
    }

    // ====================================================================
    // Bit-vector operations
    // ====================================================================

    /// Applies a binary bit-vector operator.
    ///
    /// # Errors
    ///
    /// [`Error::WidthMismatch`] unless both operands are bit-vectors of equal
    /// width (any widths for concatenation, up to 256 bits in total).
    pub fn binop(&self, op: BinOp, other: &SymExpr) -> Result<SymExpr> {
        let name = "binop";
        let (Sort::Bv(a), Sort::Bv(b)) = (self.sort, other.sort) else {
            return Err(mismatch(name, self.sort, other.sort));
        };
        let width = if op == BinOp::Concat {
            if a + b > MAX_WIDTH {
                return Err(mismatch("concat", self.sort, other.sort));
            }
            a + b
        } else {
            if a != b {
                return Err(mismatch(name, self.sort, other.sort));
            }
            a
        };
        Ok(Self::mk(
            Node::Binop {
                op,
                left: self.clone(),
                right: other.clone(),
            },
            Sort::Bv(width),
        ))
    }

    fn unop(&self, op: UnOp) -> Result<SymExpr> {
        if !matches!(self.sort, Sort::Bv(_)) {
            return Err(mismatch("unop", self.sort, "bit-vector"));
        }
        Ok(Self::mk(
            Node::Unop {
                op,
                operand: self.clone(),
            },
            self.sort,
        ))
    }

    /// Wrapping addition.
    ///
    /// # Errors
    ///
    /// [`Error::WidthMismatch`] on differing widths.
    pub fn add(&self, other: &SymExpr) -> Result<SymExpr> {
        self.binop(BinOp::Add, other)
    }

    /// Wrapping subtraction.
    ///
    /// # Errors
    ///
    /// [`Error::WidthMismatch`] on differing widths.
    pub fn sub(&self, other: &SymExpr) -> Result<SymExpr> {
        self.binop(BinOp::Sub, other)
    }

    /// Wrapping multiplication.
    ///
    /// # Errors
    ///
    /// [`Error::WidthMismatch`] on differing widths.
    pub fn mul(&self, other: &SymExpr) -> Result<SymExpr> {
        self.binop(BinOp::Mul, other)
    }

    /// Unsigned division.
    ///
    /// # Errors
    ///
    /// [`Error::WidthMismatch`] on differing widths.
    pub fn udiv(&self, other: &SymExpr) -> Result<SymExpr> {
        self.binop(BinOp::UDiv, other)
    }

    /// Signed division.
    ///
    /// # Errors
    ///
    /// [`Error::WidthMismatch`] on differing widths.
    pub fn sdiv(&self, other: &SymExpr) -> Result<SymExpr> {
        self.binop(BinOp::SDiv, other)
    }

    /// Unsigned remainder.
    ///
    /// # Errors
    ///
    /// [`Error::WidthMismatch`] on differing widths.
    pub fn urem(&self, other: &SymExpr) -> Result<SymExpr> {
        self.binop(BinOp::URem, other)
    }

    /// Signed remainder.
    ///
    /// # Errors
    ///
    /// [`Error::WidthMismatch`] on differing widths.
    pub fn srem(&self, other: &SymExpr) -> Result<SymExpr> {
        self.binop(BinOp::SRem, other)
    }

    /// Bitwise (bit-vectors) or logical (booleans) and.
    ///
    /// # Errors
    ///
    /// [`Error::WidthMismatch`] on differing sorts.
    pub fn and(&self, other: &SymExpr) -> Result<SymExpr> {
        if self.is_bool() {
            self.boolop(BoolOp::And, other)
        } else {
            self.binop(BinOp::And, other)
        }
    }

    /// Bitwise (bit-vectors) or logical (booleans) or.
    ///
    /// # Errors
    ///
    /// [`Error::WidthMismatch`] on differing sorts.
    pub fn or(&self, other: &SymExpr) -> Result<SymExpr> {
        if self.is_bool() {
            self.boolop(BoolOp::Or, other)
        } else {
            self.binop(BinOp::Or, other)
        }
    }

    /// Bitwise (bit-vectors) or logical (booleans) exclusive or.
    ///
    /// # Errors
    ///
    /// [`Error::WidthMismatch`] on differing sorts.
    pub fn xor(&self, other: &SymExpr) -> Result<SymExpr> {
        if self.is_bool() {
            self.boolop(BoolOp::Xor, other)
        } else {
            self.binop(BinOp::Xor, other)
        }
    }

    /// Shift left by a same-width amount.
    ///
    /// # Errors
    ///
    /// [`Error::WidthMismatch`] on differing widths.
    pub fn shl(&self, amount: &SymExpr) -> Result<SymExpr> {
        self.binop(BinOp::Shl, amount)
    }

    /// Logical shift right by a same-width amount.
    ///
    /// # Errors
    ///
    /// [`Error::WidthMismatch`] on differing widths.
    pub fn lshr(&self, amount: &SymExpr) -> Result<SymExpr> {
        self.binop(BinOp::LShr, amount)
    }

    /// Arithmetic shift right by a same-width amount.
    ///
    /// # Errors
    ///
    /// [`Error::WidthMismatch`] on differing widths.
    pub fn ashr(&self, amount: &SymExpr) -> Result<SymExpr> {
        self.binop(BinOp::AShr, amount)
    }

    /// Rotate left by a same-width amount.
    ///
    /// # Errors
    ///
    /// [`Error::WidthMismatch`] on differing widths.
    pub fn rotl(&self, amount: &SymExpr) -> Result<SymExpr> {
        self.binop(BinOp::RotL, amount)
    }

    /// Rotate right by a same-width amount.
    ///
    /// # Errors
    ///
    /// [`Error::WidthMismatch`] on differing widths.
    pub fn rotr(&self, amount: &SymExpr) -> Result<SymExpr> {
        self.binop(BinOp::RotR, amount)
    }

    /// Concatenation with `self` in the high bits.
    ///
    /// # Errors
    ///
    /// [`Error::WidthMismatch`] for non bit-vectors or results over 256 bits.
    pub fn concat(&self, low: &SymExpr) -> Result<SymExpr> {
        self.binop(BinOp::Concat, low)
    }

    /// Bitwise complement (bit-vectors) or negation (booleans).
    ///
    /// # Errors
    ///
    /// [`Error::WidthMismatch`] for arrays.
    pub fn not(&self) -> Result<SymExpr> {
        match self.sort {
            Sort::Bool => Ok(Self::mk(Node::Not(self.clone()), Sort::Bool)),
            _ => self.unop(UnOp::Not),
        }
    }

    /// Two's complement negation.
    ///
    /// # Errors
    ///
    /// [`Error::WidthMismatch`] for non bit-vectors.
    pub fn neg(&self) -> Result<SymExpr> {
        self.unop(UnOp::Neg)
    }

    /// Bits `hi..=lo`.
    ///
    /// # Errors
    ///
    /// [`Error::WidthMismatch`] if the range does not fit the operand.
    pub fn extract(&self, hi: u16, lo: u16) -> Result<SymExpr> {
        let width = self.width();
        if !matches!(self.sort, Sort::Bv(_)) || hi < lo || hi >= width {
            return Err(mismatch("extract", self.sort, format!("[{}:{}]", hi, lo)));
        }
        Ok(Self::mk(
            Node::Extract {
                operand: self.clone(),
                hi,
                lo,
            },
            Sort::Bv(hi - lo + 1),
        ))
    }

    /// Low `width` bits.
    ///
    /// # Errors
    ///
    /// [`Error::WidthMismatch`] if `width` exceeds the operand width.
    pub fn low(&self, width: u16) -> Result<SymExpr> {
        self.extract(width.saturating_sub(1), 0)
    }

    /// Bit `i` as a boolean.
    ///
    /// # Errors
    ///
    /// [`Error::WidthMismatch`] if `i` is out of range.
    pub fn bit(&self, i: u16) -> Result<SymExpr> {
        self.extract(i, i)?.eq(&SymExpr::constant(1, 1))
    }

    /// The most significant bit as a boolean.
    ///
    /// # Errors
    ///
    /// [`Error::WidthMismatch`] for non bit-vectors.
    pub fn msb(&self) -> Result<SymExpr> {
        self.bit(self.width().saturating_sub(1))
    }

    /// Sign extension to `width` bits.
    ///
    /// # Errors
    ///
    /// [`Error::WidthMismatch`] if `width` is smaller than the operand.
    pub fn sign_extend(&self, width: u16) -> Result<SymExpr> {
        if !matches!(self.sort, Sort::Bv(_)) || width < self.width() || width > MAX_WIDTH {
            return Err(mismatch("sign_extend", self.sort, width));
        }
        Ok(Self::mk(
            Node::SignExtend {
                operand: self.clone(),
                width,
            },
            Sort::Bv(width),
        ))
    }

    /// Zero extension to `width` bits.
    ///
    /// # Errors
    ///
    /// [`Error::WidthMismatch`] if `width` is smaller than the operand.
    pub fn zero_extend(&self, width: u16) -> Result<SymExpr> {
        let w = self.width();
        if !matches!(self.sort, Sort::Bv(_)) || width < w || width > MAX_WIDTH {
            return Err(mismatch("zero_extend", self.sort, width));
        }
        if width == w {
            return Ok(self.clone());
        }
        SymExpr::constant(0, width - w).concat(self)
    }

    // ====================================================================
    // Comparisons
    // ====================================================================

    /// Applies a comparison.
    ///
    /// # Errors
    ///
    /// [`Error::WidthMismatch`] unless both sides have the same sort (and are
    /// bit-vectors for ordering comparisons).
    pub fn compare(&self, op: CmpOp, other: &SymExpr) -> Result<SymExpr> {
        if self.sort != other.sort || (op != CmpOp::Eq && !matches!(self.sort, Sort::Bv(_))) {
            return Err(mismatch("compare", self.sort, other.sort));
        }
        Ok(Self::mk(
            Node::Compare {
                op,
                left: self.clone(),
                right: other.clone(),
            },
            Sort::Bool,
        ))
    }

    /// Equality.
    ///
    /// # Errors
    ///
    /// [`Error::WidthMismatch`] on differing sorts.
    pub fn eq(&self, other: &SymExpr) -> Result<SymExpr> {
        self.compare(CmpOp::Eq, other)
    }

    /// Disequality.
    ///
    /// # Errors
    ///
    /// [`Error::WidthMismatch`] on differing sorts.
    pub fn ne(&self, other: &SymExpr) -> Result<SymExpr> {
        self.eq(other)?.not()
    }

    /// Unsigned `<`.
    ///
    /// # Errors
    ///
    /// [`Error::WidthMismatch`] on differing widths.
    pub fn ult(&self, other: &SymExpr) -> Result<SymExpr> {
        self.compare(CmpOp::Ult, other)
    }

    /// Unsigned `<=`.
    ///
    /// # Errors
    ///
    /// [`Error::WidthMismatch`] on differing widths.
    pub fn ule(&self, other: &SymExpr) -> Result<SymExpr> {
        self.compare(CmpOp::Ule, other)
    }

    /// Unsigned `>`.
    ///
    /// # Errors
    ///
    /// [`Error::WidthMismatch`] on differing widths.
    pub fn ugt(&self, other: &SymExpr) -> Result<SymExpr> {
        self.compare(CmpOp::Ugt, other)
    }

    /// Unsigned `>=`.
    ///
    /// # Errors
    ///
    /// [`Error::WidthMismatch`] on differing widths.
    pub fn uge(&self, other: &SymExpr) -> Result<SymExpr> {
        self.compare(CmpOp::Uge, other)
    }

    /// Signed `<`.
    ///
    /// # Errors
    ///
    /// [`Error::WidthMismatch`] on differing widths.
    pub fn slt(&self, other: &SymExpr) -> Result<SymExpr> {
        self.compare(CmpOp::Slt, other)
    }

    /// Signed `<=`.
    ///
    /// # Errors
    ///
    /// [`Error::WidthMismatch`] on differing widths.
    pub fn sle(&self, other: &SymExpr) -> Result<SymExpr> {
        self.compare(CmpOp::Sle, other)
    }

    /// Signed `>`.
    ///
    /// # Errors
    ///
    /// [`Error::WidthMismatch`] on differing widths.
    pub fn sgt(&self, other: &SymExpr) -> Result<SymExpr> {
        self.compare(CmpOp::Sgt, other)
    }

    /// Signed `>=`.
    ///
    /// # Errors
    ///
    /// [`Error::WidthMismatch`] on differing widths.
    pub fn sge(&self, other: &SymExpr) -> Result<SymExpr> {
        self.compare(CmpOp::Sge, other)
    }

    /// `true` iff the bit-vector is zero.
    ///
    /// # Errors
    ///
    /// [`Error::WidthMismatch`] for non bit-vectors.
    pub fn is_zero(&self) -> Result<SymExpr> {
        self.eq(&SymExpr::constant(0, self.width().max(1)))
    }

    // ====================================================================
    // Booleans
    // ====================================================================

    fn boolop(&self, op: BoolOp, other: &SymExpr) -> Result<SymExpr> {
        if !self.is_bool() || !other.is_bool() {
            return Err(mismatch("boolean connective", self.sort, other.sort));
        }
        Ok(Self::mk(
            Node::BoolOp {
                op,
                left: self.clone(),
                right: other.clone(),
            },
            Sort::Bool,
        ))
    }

    /// Implication.
    ///
    /// # Errors
    ///
    /// [`Error::WidthMismatch`] for non booleans.
    pub fn implies(&self, other: &SymExpr) -> Result<SymExpr> {
        self.boolop(BoolOp::Implies, other)
    }

    /// Equivalence.
    ///
    /// # Errors
    ///
    /// [`Error::WidthMismatch`] for non booleans.
    pub fn iff(&self, other: &SymExpr) -> Result<SymExpr> {
        self.boolop(BoolOp::Iff, other)
    }

    /// Conjunction of all terms (`true` when empty).
    ///
    /// # Errors
    ///
    /// [`Error::WidthMismatch`] if a term is not boolean.
    pub fn and_all<'a>(terms: impl IntoIterator<Item = &'a SymExpr>) -> Result<SymExpr> {
        let mut iter = terms.into_iter();
        let Some(first) = iter.next() else {
            return Ok(SymExpr::bool(true));
        };
        iter.try_fold(first.clone(), |acc, t| acc.boolop(BoolOp::And, t))
    }

    /// Disjunction of all terms (`false` when empty).
    ///
    /// # Errors
    ///
    /// [`Error::WidthMismatch`] if a term is not boolean.
    pub fn or_all<'a>(terms: impl IntoIterator<Item = &'a SymExpr>) -> Result<SymExpr> {
        let mut iter = terms.into_iter();
        let Some(first) = iter.next() else {
            return Ok(SymExpr::bool(false));
        };
        iter.try_fold(first.clone(), |acc, t| acc.boolop(BoolOp::Or, t))
    }

    /// Converts a boolean to a one-bit vector.
    ///
    /// # Errors
    ///
    /// [`Error::WidthMismatch`] for non booleans.
    pub fn to_bit(&self) -> Result<SymExpr> {
        self.ite(&SymExpr::constant(1, 1), &SymExpr::constant(0, 1))
    }

    /// If-then-else with `self` as the condition.
    ///
    /// # Errors
    ///
    /// [`Error::WidthMismatch`] unless `self` is boolean and both branches
    /// share a sort.
    pub fn ite(&self, then: &SymExpr, otherwise: &SymExpr) -> Result<SymExpr> {
        if !self.is_bool() {
            return Err(mismatch("ite condition", self.sort, Sort::Bool));
        }
        if then.sort != otherwise.sort {
            return Err(mismatch("ite", then.sort, otherwise.sort));
        }
        Ok(Self::mk(
            Node::Ite {
                cond: self.clone(),
                then: then.clone(),
                otherwise: otherwise.clone(),
            },
            then.sort,
        ))
    }

    // ====================================================================
    // Arrays, functions, quantifiers
    // ====================================================================

    /// Reads `array[index]`.
    ///
    /// # Errors
    ///
    /// [`Error::WidthMismatch`] if `self` is not an array or the index width differs.
    pub fn select(&self, index: &SymExpr) -> Result<SymExpr> {
        let Sort::Array { key, value } = self.sort else {
            return Err(mismatch("select", self.sort, "array"));
        };
        if index.sort != Sort::Bv(key) {
            return Err(mismatch("select index", index.sort, Sort::Bv(key)));
        }
        Ok(Self::mk(
            Node::ArrayLookup {
                array: self.clone(),
                index: index.clone(),
            },
            Sort::Bv(value),
        ))
    }

    /// Returns the array with `array[index] = value`.
    ///
    /// # Errors
    ///
    /// [`Error::WidthMismatch`] on sort violations.
    pub fn store(&self, index: &SymExpr, value: &SymExpr) -> Result<SymExpr> {
        let Sort::Array { key, value: vw } = self.sort else {
            return Err(mismatch("store", self.sort, "array"));
        };
        if index.sort != Sort::Bv(key) || value.sort != Sort::Bv(vw) {
            return Err(mismatch("store", index.sort, value.sort));
        }
        Ok(Self::mk(
            Node::ArrayStore {
                array: self.clone(),
                index: index.clone(),
                value: value.clone(),
            },
            self.sort,
        ))
    }

    /// Applies the uninterpreted function `name` returning `width` bits.
    ///
    /// # Errors
    ///
    /// [`Error::WidthMismatch`] if an argument is not a bit-vector or
    /// `width` is not in `1..=MAX_WIDTH`.
    pub fn uf(name: &str, width: u16, args: &[SymExpr]) -> Result<SymExpr> {
        if let Some(bad) = args.iter().find(|a| !matches!(a.sort, Sort::Bv(_))) {
            return Err(mismatch("uninterpreted function", bad.sort, name));
        }
        check_width("uninterpreted function", width)?;
        Ok(Self::mk(
            Node::Uf {
                name: name.to_string(),
                width,
                args: args.to_vec(),
            },
            Sort::Bv(width),
        ))
    }

    /// Universal quantification of a boolean body.
    ///
    /// # Errors
    ///
    /// [`Error::WidthMismatch`] if the body is not boolean or a bound term is
    /// not a variable.
    pub fn forall(vars: &[SymExpr], body: &SymExpr) -> Result<SymExpr> {
        if !body.is_bool() {
            return Err(mismatch("forall", body.sort, Sort::Bool));
        }
        if let Some(bad) = vars.iter().find(|v| v.as_variable().is_none()) {
            return Err(mismatch("forall binder", bad.sort, "variable"));
        }
        Ok(Self::mk(
            Node::ForAll {
                vars: vars.to_vec(),
                body: body.clone(),
            },
            Sort::Bool,
        ))
    }
}

impl fmt::Display for SymExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.node {
            Node::Constant(v) => write!(f, "{}", v),
            Node::BoolConstant(b) => write!(f, "{}", b),
            Node::Variable { name, .. } => write!(f, "{}", name),
            Node::Binop { op, left, right } => write!(f, "({} {} {})", op, left, right),
            Node::Unop { op, operand } => write!(f, "({} {})", op, operand),
            Node::Compare { op, left, right } => write!(f, "({} {} {})", op, left, right),
            Node::Extract { operand, hi, lo } => {
                write!(f, "((_ extract {} {}) {})", hi, lo, operand)
            }
            Node::SignExtend { operand, width } => write!(
                f,
                "((_ sign_extend {}) {})",
                width - operand.width(),
                operand
            ),
            Node::Ite {
                cond,
                then,
                otherwise,
            } => write!(f, "(ite {} {} {})", cond, then, otherwise),
            Node::ArrayLookup { array, index } => write!(f, "(select {} {})", array, index),
            Node::ArrayStore {
                array,
                index,
                value,
            } => write!(f, "(store {} {} {})", array, index, value),
            Node::Uf { name, args, .. } => {
                write!(f, "({}", name)?;
                for a in args {
                    write!(f, " {}", a)?;
                }
                write!(f, ")")
            }
            Node::ForAll { vars, body } => {
                write!(f, "(forall (")?;
                for v in vars {
                    write!(f, " ({} {})", v, v.sort())?;
                }
                write!(f, " ) {})", body)
            }
            Node::Not(operand) => write!(f, "(not {})", operand),
            Node::BoolOp { op, left, right } => write!(f, "({} {} {})", op, left, right),
        }
    }
}

//! Concrete evaluation of symbolic expressions under a variable assignment.
//!
//! Evaluation backs the concrete executor and test-case filtering of
//! invariant candidates. Uninterpreted functions are given their intended
//! meaning through [`builtin_uf`], so the division and floating-point
//! circuits produced by the handlers evaluate to what the hardware computes.

use std::collections::BTreeMap;

use rustc_hash::FxHashMap;

use crate::{
    symbolic::{
        expr::{Node, Sort, SymExpr},
        ops::{BinOp, BoolOp, CmpOp, UnOp},
        value::BitValue,
    },
    Error, Result,
};

/// A concrete array: explicit entries over a default element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArrayValue {
    /// Value of every index not in `entries`
    pub default: BitValue,
    /// Explicit entries keyed by index
    pub entries: BTreeMap<u128, BitValue>,
}

impl ArrayValue {
    /// An array filled with `default`.
    #[must_use]
    pub fn filled(default: BitValue) -> Self {
        Self {
            default,
            entries: BTreeMap::new(),
        }
    }

    /// Reads one element.
    #[must_use]
    pub fn get(&self, index: u128) -> BitValue {
        self.entries.get(&index).copied().unwrap_or(self.default)
    }

    /// Extensional equality: same default and same element at every
    /// explicitly stored index of either array.
    #[must_use]
    pub fn equivalent(&self, other: &ArrayValue) -> bool {
        self.default == other.default
            && self
                .entries
                .keys()
                .chain(other.entries.keys())
                .all(|k| self.get(*k) == other.get(*k))
    }
}

/// A concrete value of any sort.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// Boolean
    Bool(bool),
    /// Bit-vector
    Bv(BitValue),
    /// Array
    Array(ArrayValue),
}

impl Value {
    fn bv(&self) -> Result<BitValue> {
        match self {
            Value::Bv(v) => Ok(*v),
            _ => Err(validator_error!("expected a bit-vector value")),
        }
    }

    fn boolean(&self) -> Result<bool> {
        match self {
            Value::Bool(b) => Ok(*b),
            _ => Err(validator_error!("expected a boolean value")),
        }
    }

    fn array(&self) -> Result<&ArrayValue> {
        match self {
            Value::Array(a) => Ok(a),
            _ => Err(validator_error!("expected an array value")),
        }
    }
}

/// An assignment of concrete values to variable names.
///
/// Variables missing from the model evaluate to zero (or `false`, or an
/// all-zero array).
#[derive(Debug, Clone, Default)]
pub struct Model {
    values: FxHashMap<String, Value>,
}

impl Model {
    /// An empty model.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Assigns a bit-vector variable.
    pub fn set_bv(&mut self, name: impl Into<String>, value: BitValue) {
        self.values.insert(name.into(), Value::Bv(value));
    }

    /// Assigns a boolean variable.
    pub fn set_bool(&mut self, name: impl Into<String>, value: bool) {
        self.values.insert(name.into(), Value::Bool(value));
    }

    /// Assigns an array variable.
    pub fn set_array(&mut self, name: impl Into<String>, value: ArrayValue) {
        self.values.insert(name.into(), Value::Array(value));
    }

    /// Looks up a bit-vector variable.
    #[must_use]
    pub fn get_bv(&self, name: &str) -> Option<BitValue> {
        match self.values.get(name) {
            Some(Value::Bv(v)) => Some(*v),
            _ => None,
        }
    }

    /// Looks up a boolean variable.
    #[must_use]
    pub fn get_bool(&self, name: &str) -> Option<bool> {
        match self.values.get(name) {
            Some(Value::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    /// Looks up an array variable.
    #[must_use]
    pub fn get_array(&self, name: &str) -> Option<&ArrayValue> {
        match self.values.get(name) {
            Some(Value::Array(a)) => Some(a),
            _ => None,
        }
    }

    fn lookup(&self, name: &str, sort: Sort) -> Value {
        if let Some(v) = self.values.get(name) {
            return v.clone();
        }
        match sort {
            Sort::Bool => Value::Bool(false),
            Sort::Bv(w) => Value::Bv(BitValue::zero(w)),
            Sort::Array { value, .. } => Value::Array(ArrayValue::filled(BitValue::zero(value))),
        }
    }
}

/// Memoizing evaluator over a [`Model`].
pub struct Evaluator<'a> {
    model: &'a Model,
    cache: FxHashMap<usize, (SymExpr, Value)>,
}

impl<'a> Evaluator<'a> {
    /// Creates an evaluator for `model`.
    #[must_use]
    pub fn new(model: &'a Model) -> Self {
        Self {
            model,
            cache: FxHashMap::default(),
        }
    }

    /// Evaluates a bit-vector expression.
    ///
    /// # Errors
    ///
    /// See [`Evaluator::eval`].
    pub fn eval_bv(&mut self, expr: &SymExpr) -> Result<BitValue> {
        self.eval(expr)?.bv()
    }

    /// Evaluates a boolean expression.
    ///
    /// # Errors
    ///
    /// See [`Evaluator::eval`].
    pub fn eval_bool(&mut self, expr: &SymExpr) -> Result<bool> {
        self.eval(expr)?.boolean()
    }

    /// Evaluates any expression.
    ///
    /// # Errors
    ///
    /// [`Error::Unsupported`] for quantifiers, unknown uninterpreted functions
    /// and arithmetic wider than 128 bits.
    pub fn eval(&mut self, expr: &SymExpr) -> Result<Value> {
        if let Some((_, v)) = self.cache.get(&expr.id()) {
            return Ok(v.clone());
        }

        let value = match expr.node() {
            Node::Constant(v) => Value::Bv(*v),
            Node::BoolConstant(b) => Value::Bool(*b),
            Node::Variable { name, sort } => self.model.lookup(name, *sort),
            Node::Binop { op, left, right } => {
                let a = self.eval_bv(left)?;
                let b = self.eval_bv(right)?;
                Value::Bv(binop(*op, &a, &b)?)
            }
            Node::Unop { op, operand } => {
                let a = self.eval_bv(operand)?;
                Value::Bv(match op {
                    UnOp::Not => a.not(),
                    UnOp::Neg => a
                        .neg()
                        .ok_or_else(|| unsupported!("negation of {} bits", a.width()))?,
                })
            }
            Node::Compare { op, left, right } => {
                let a = self.eval(left)?;
                let b = self.eval(right)?;
                Value::Bool(match (a, b) {
                    (Value::Bv(a), Value::Bv(b)) => compare(*op, &a, &b)?,
                    (Value::Array(a), Value::Array(b)) if *op == CmpOp::Eq => a.equivalent(&b),
                    (a, b) if *op == CmpOp::Eq => a == b,
                    _ => return Err(validator_error!("ordering comparison on non bit-vectors")),
                })
            }
            Node::Extract { operand, hi, lo } => {
                Value::Bv(self.eval_bv(operand)?.extract(*hi, *lo))
            }
            Node::SignExtend { operand, width } => {
                Value::Bv(self.eval_bv(operand)?.sign_extend(*width))
            }
            Node::Ite {
                cond,
                then,
                otherwise,
            } => {
                if self.eval_bool(cond)? {
                    self.eval(then)?
                } else {
                    self.eval(otherwise)?
                }
            }
            Node::ArrayLookup { array, index } => {
                let i = self.eval_bv(index)?;
                let a = self.eval(array)?;
                Value::Bv(a.array()?.get(i.low()))
            }
            Node::ArrayStore {
                array,
                index,
                value,
            } => {
                let i = self.eval_bv(index)?;
                let v = self.eval_bv(value)?;
                let mut a = self.eval(array)?.array()?.clone();
                a.entries.insert(i.low(), v);
                Value::Array(a)
            }
            Node::Uf { name, width, args } => {
                let args = args
                    .iter()
                    .map(|a| self.eval_bv(a))
                    .collect::<Result<Vec<_>>>()?;
                Value::Bv(builtin_uf(name, *width, &args)?)
            }
            Node::ForAll { .. } => return Err(unsupported!("evaluation of quantifiers")),
            Node::Not(operand) => Value::Bool(!self.eval_bool(operand)?),
            Node::BoolOp { op, left, right } => {
                let a = self.eval_bool(left)?;
                let b = self.eval_bool(right)?;
                Value::Bool(match op {
                    BoolOp::And => a && b,
                    BoolOp::Or => a || b,
                    BoolOp::Xor => a != b,
                    BoolOp::Implies => !a || b,
                    BoolOp::Iff => a == b,
                })
            }
        };

        self.cache.insert(expr.id(), (expr.clone(), value.clone()));
        Ok(value)
    }
}

fn binop(op: BinOp, a: &BitValue, b: &BitValue) -> Result<BitValue> {
    let wide = || unsupported!("{} on {} bits", op, a.width());
    Ok(match op {
        BinOp::Add => a.add(b).ok_or_else(wide)?,
        BinOp::Sub => a.sub(b).ok_or_else(wide)?,
        BinOp::Mul => a.mul(b).ok_or_else(wide)?,
        BinOp::UDiv => a.udiv(b).ok_or_else(wide)?,
        BinOp::SDiv => a.sdiv(b).ok_or_else(wide)?,
        BinOp::URem => a.urem(b).ok_or_else(wide)?,
        BinOp::SRem => a.srem(b).ok_or_else(wide)?,
        BinOp::And => a.and(b),
        BinOp::Or => a.or(b),
        BinOp::Xor => a.xor(b),
        BinOp::Shl => a.shl(b.as_amount()),
        BinOp::LShr => a.lshr(b.as_amount()),
        BinOp::AShr => a.ashr(b.as_amount()),
        BinOp::RotL => a.rotl(b.as_amount() % u128::from(a.width())),
        BinOp::RotR => a.rotr(b.as_amount() % u128::from(a.width())),
        BinOp::Concat => a.concat(b),
    })
}

fn compare(op: CmpOp, a: &BitValue, b: &BitValue) -> Result<bool> {
    let unsigned = matches!(op, CmpOp::Eq | CmpOp::Ult | CmpOp::Ule | CmpOp::Ugt | CmpOp::Uge);
    if a.width() > 128 && !unsigned {
        return Err(unsupported!("signed comparison on {} bits", a.width()));
    }
    Ok(match op {
        CmpOp::Eq => a == b,
        CmpOp::Ult => a.ult(b),
        CmpOp::Ule => !b.ult(a),
        CmpOp::Ugt => b.ult(a),
        CmpOp::Uge => !a.ult(b),
        CmpOp::Slt => a.slt(b),
        CmpOp::Sle => !b.slt(a),
        CmpOp::Sgt => b.slt(a),
        CmpOp::Sge => !a.slt(b),
    })
}

fn float_op(name: &str, args: &[BitValue], double: bool) -> Option<BitValue> {
    let op = name.rsplit_once('_').map_or(name, |(head, _)| head);
    if double {
        let f = |i: usize| f64::from_bits(args[i].as_u64());
        let bits = |v: f64| Some(BitValue::new(u128::from(v.to_bits()), 64));
        let flag = |b: bool| Some(BitValue::new(u128::from(b), 1));
        match (op, args.len()) {
            ("add", 2) => bits(f(0) + f(1)),
            ("sub", 2) => bits(f(0) - f(1)),
            ("mul", 2) => bits(f(0) * f(1)),
            ("div", 2) => bits(f(0) / f(1)),
            ("mincmp", 2) => flag(f(0) < f(1)),
            ("maxcmp", 2) => flag(f(0) > f(1)),
            ("fma", 3) => bits(f(0).mul_add(f(1), f(2))),
            _ => None,
        }
    } else {
        let f = |i: usize| f32::from_bits(args[i].as_u64() as u32);
        let bits = |v: f32| Some(BitValue::new(u128::from(v.to_bits()), 32));
        let flag = |b: bool| Some(BitValue::new(u128::from(b), 1));
        match (op, args.len()) {
            ("add", 2) => bits(f(0) + f(1)),
            ("sub", 2) => bits(f(0) - f(1)),
            ("mul", 2) => bits(f(0) * f(1)),
            ("div", 2) => bits(f(0) / f(1)),
            ("mincmp", 2) => flag(f(0) < f(1)),
            ("maxcmp", 2) => flag(f(0) > f(1)),
            ("fma", 3) => bits(f(0).mul_add(f(1), f(2))),
            _ => None,
        }
    }
}

fn division(name: &str, width: u16, args: &[BitValue]) -> Option<BitValue> {
    let [dividend, divisor] = args else {
        return None;
    };
    if divisor.is_zero() {
        return Some(BitValue::zero(width));
    }
    let quotient = name.starts_with("div_quotient");
    let raw = if name.contains("_int") {
        let (n, d) = (dividend.as_i128(), divisor.as_i128());
        if quotient {
            n.wrapping_div(d) as u128
        } else {
            n.wrapping_rem(d) as u128
        }
    } else {
        let (n, d) = (dividend.low(), divisor.low());
        if quotient {
            n / d
        } else {
            n % d
        }
    };
    Some(BitValue::new(raw, width))
}

/// Interprets the uninterpreted functions emitted by the handlers.
///
/// Supported families:
///
/// - `div_quotient_{int,uint}{8,16,32,64}` and `div_remainder_*`: a double
///   width dividend and a divisor; a zero divisor yields zero (the circuit
///   raises the divide-error signal separately)
/// - `{add,sub,mul,div,mincmp,maxcmp,fma}_{single,double}`: IEEE-754 scalar
///   arithmetic in the default rounding mode; the comparisons return one bit
///
/// # Errors
///
/// [`Error::Unsupported`] for any other function name.
pub fn builtin_uf(name: &str, width: u16, args: &[BitValue]) -> Result<BitValue> {
    let result = if name.starts_with("div_quotient_") || name.starts_with("div_remainder_") {
        division(name, width, args)
    } else if name.ends_with("_single") {
        float_op(name, args, false)
    } else if name.ends_with("_double") {
        float_op(name, args, true)
    } else {
        None
    };
    result
        .map(|v| v.zero_extend(width))
        .filter(|v| v.width() == width)
        .ok_or_else(|| Error::Unsupported(format!("uninterpreted function {}", name)))
}

/// Evaluates a bit-vector expression with a fresh evaluator.
///
/// # Errors
///
/// See [`Evaluator::eval`].
pub fn eval_bv(expr: &SymExpr, model: &Model) -> Result<BitValue> {
    Evaluator::new(model).eval_bv(expr)
}

/// Evaluates a boolean expression with a fresh evaluator.
///
/// # Errors
///
/// See [`Evaluator::eval`].
pub fn eval_bool(expr: &SymExpr, model: &Model) -> Result<bool> {
    Evaluator::new(model).eval_bool(expr)
}

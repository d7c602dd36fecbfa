//! Local, sound rewriting of symbolic expressions.
//!
//! The [`Simplifier`] rebuilds an expression bottom-up, memoized on node
//! identity so shared subtrees are visited once. Each rebuilt node goes
//! through a small set of local rules:
//!
//! - constant folding for every operator with concrete operands
//! - neutral and absorbing elements (`x + 0`, `x & 0`, `x | ~0`, ...)
//! - canonical `x + c` form for address arithmetic, with nested constant
//!   offsets merged
//! - extract of extract, extract of concatenation, full-width extracts and
//!   concatenation of adjacent extracts
//! - array reads over stores whose indices are equal or provably distinct
//!   (same base, different constant offset)
//! - boolean identities and `ite` over a constant condition
//!
//! The memory models build reads as concatenations of byte selects, so a
//! read after a write of the same width and address simplifies back to the
//! written value.

use rustc_hash::FxHashMap;

use crate::{
    symbolic::{
        expr::{Node, SymExpr},
        ops::{BinOp, BoolOp, CmpOp, UnOp},
        value::BitValue,
    },
    Result,
};

/// Memoizing bottom-up simplifier.
#[derive(Default)]
pub struct Simplifier {
    cache: FxHashMap<usize, (SymExpr, SymExpr)>,
}

impl Simplifier {
    /// Creates a simplifier with an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Simplifies `expr`.
    ///
    /// # Errors
    ///
    /// Only fails if `expr` was ill-sorted to begin with.
    pub fn simplify(&mut self, expr: &SymExpr) -> Result<SymExpr> {
        if let Some((_, done)) = self.cache.get(&expr.id()) {
            return Ok(done.clone());
        }

        let out = match expr.node() {
            Node::Constant(_) | Node::BoolConstant(_) | Node::Variable { .. } => expr.clone(),
            Node::Binop { op, left, right } => {
                let l = self.simplify(left)?;
                let r = self.simplify(right)?;
                binop(*op, &l, &r)?
            }
            Node::Unop { op, operand } => {
                let x = self.simplify(operand)?;
                unop(*op, &x)?
            }
            Node::Compare { op, left, right } => {
                let l = self.simplify(left)?;
                let r = self.simplify(right)?;
                compare(*op, &l, &r)?
            }
            Node::Extract { operand, hi, lo } => {
                let x = self.simplify(operand)?;
                extract(&x, *hi, *lo)?
            }
            Node::SignExtend { operand, width } => {
                let x = self.simplify(operand)?;
                match x.as_constant() {
                    Some(v) => SymExpr::bits(v.sign_extend(*width)),
                    None if x.width() == *width => x,
                    None => x.sign_extend(*width)?,
                }
            }
            Node::Ite {
                cond,
                then,
                otherwise,
            } => {
                let c = self.simplify(cond)?;
                let t = self.simplify(then)?;
                let e = self.simplify(otherwise)?;
                ite(&c, &t, &e)?
            }
            Node::ArrayLookup { array, index } => {
                let a = self.simplify(array)?;
                let i = self.simplify(index)?;
                select(&a, &i)?
            }
            Node::ArrayStore {
                array,
                index,
                value,
            } => {
                let a = self.simplify(array)?;
                let i = self.simplify(index)?;
                let v = self.simplify(value)?;
                match a.node() {
                    Node::ArrayStore {
                        array: inner,
                        index: j,
                        ..
                    } if *j == i => inner.store(&i, &v)?,
                    _ => a.store(&i, &v)?,
                }
            }
            Node::Uf { name, width, args } => {
                let args = args
                    .iter()
                    .map(|a| self.simplify(a))
                    .collect::<Result<Vec<_>>>()?;
                SymExpr::uf(name, *width, &args)?
            }
            Node::ForAll { vars, body } => {
                let b = self.simplify(body)?;
                if b.as_bool_constant().is_some() {
                    b
                } else {
                    SymExpr::forall(vars, &b)?
                }
            }
            Node::Not(operand) => {
                let x = self.simplify(operand)?;
                not(&x)?
            }
            Node::BoolOp { op, left, right } => {
                let l = self.simplify(left)?;
                let r = self.simplify(right)?;
                boolop(*op, &l, &r)?
            }
        };

        self.cache.insert(expr.id(), (expr.clone(), out.clone()));
        Ok(out)
    }
}

/// Simplifies a single expression with a fresh [`Simplifier`].
///
/// # Errors
///
/// Only fails if `expr` was ill-sorted to begin with.
pub fn simplify(expr: &SymExpr) -> Result<SymExpr> {
    Simplifier::new().simplify(expr)
}

fn fold_binop(op: BinOp, a: &BitValue, b: &BitValue) -> Option<BitValue> {
    match op {
        BinOp::Add => a.add(b),
        BinOp::Sub => a.sub(b),
        BinOp::Mul => a.mul(b),
        BinOp::UDiv => a.udiv(b),
        BinOp::SDiv => a.sdiv(b),
        BinOp::URem => a.urem(b),
        BinOp::SRem => a.srem(b),
        BinOp::And => Some(a.and(b)),
        BinOp::Or => Some(a.or(b)),
        BinOp::Xor => Some(a.xor(b)),
        BinOp::Shl => Some(a.shl(b.as_amount())),
        BinOp::LShr => Some(a.lshr(b.as_amount())),
        BinOp::AShr => Some(a.ashr(b.as_amount())),
        BinOp::RotL => Some(a.rotl(b.as_amount() % u128::from(a.width()))),
        BinOp::RotR => Some(a.rotr(b.as_amount() % u128::from(a.width()))),
        BinOp::Concat => Some(a.concat(b)),
    }
}

fn is_zero(e: &SymExpr) -> bool {
    e.as_constant().is_some_and(|v| v.is_zero())
}

fn is_ones(e: &SymExpr) -> bool {
    e.as_constant().is_some_and(|v| v.is_ones())
}

fn is_one(e: &SymExpr) -> bool {
    e.as_constant()
        .is_some_and(|v| v == BitValue::new(1, v.width()))
}

pub(crate) fn binop(op: BinOp, l: &SymExpr, r: &SymExpr) -> Result<SymExpr> {
    if let (Some(a), Some(b)) = (l.as_constant(), r.as_constant()) {
        if let Some(v) = fold_binop(op, &a, &b) {
            return Ok(SymExpr::bits(v));
        }
    }

    let width = l.width();
    let zero = || SymExpr::constant(0, width);

    match op {
        BinOp::Add => {
            if is_zero(r) {
                return Ok(l.clone());
            }
            if is_zero(l) {
                return Ok(r.clone());
            }
            if l.as_constant().is_some() {
                return binop(BinOp::Add, r, l);
            }
            if let (
                Some(c2),
                Node::Binop {
                    op: BinOp::Add,
                    left: x,
                    right: c1,
                },
            ) = (r.as_constant(), l.node())
            {
                if let Some(sum) = c1.as_constant().and_then(|c1| c1.add(&c2)) {
                    return binop(BinOp::Add, x, &SymExpr::bits(sum));
                }
            }
        }
        BinOp::Sub => {
            if is_zero(r) {
                return Ok(l.clone());
            }
            if l == r {
                return Ok(zero());
            }
            if let Some(neg) = r.as_constant().and_then(|c| c.neg()) {
                return binop(BinOp::Add, l, &SymExpr::bits(neg));
            }
        }
        BinOp::Mul => {
            if is_zero(l) || is_zero(r) {
                return Ok(zero());
            }
            if is_one(r) {
                return Ok(l.clone());
            }
            if is_one(l) {
                return Ok(r.clone());
            }
        }
        BinOp::UDiv | BinOp::SDiv => {
            if is_one(r) {
                return Ok(l.clone());
            }
        }
        BinOp::And => {
            if is_zero(l) || is_zero(r) {
                return Ok(zero());
            }
            if is_ones(r) || l == r {
                return Ok(l.clone());
            }
            if is_ones(l) {
                return Ok(r.clone());
            }
        }
        BinOp::Or => {
            if is_ones(l) {
                return Ok(l.clone());
            }
            if is_ones(r) {
                return Ok(r.clone());
            }
            if is_zero(r) || l == r {
                return Ok(l.clone());
            }
            if is_zero(l) {
                return Ok(r.clone());
            }
        }
        BinOp::Xor => {
            if l == r {
                return Ok(zero());
            }
            if is_zero(r) {
                return Ok(l.clone());
            }
            if is_zero(l) {
                return Ok(r.clone());
            }
        }
        BinOp::Shl | BinOp::LShr => {
            if is_zero(r) {
                return Ok(l.clone());
            }
            if r.as_constant()
                .is_some_and(|c| c.as_amount() >= u128::from(width))
            {
                return Ok(zero());
            }
        }
        BinOp::AShr | BinOp::RotL | BinOp::RotR => {
            if is_zero(r) {
                return Ok(l.clone());
            }
        }
        BinOp::Concat => {
            if let (
                Node::Extract {
                    operand: a,
                    hi: h1,
                    lo: l1,
                },
                Node::Extract {
                    operand: b,
                    hi: h2,
                    lo: l2,
                },
            ) = (l.node(), r.node())
            {
                if a == b && *l1 == h2 + 1 {
                    return extract(a, *h1, *l2);
                }
            }
        }
        BinOp::URem | BinOp::SRem => {}
    }

    l.binop(op, r)
}

fn unop(op: UnOp, x: &SymExpr) -> Result<SymExpr> {
    if let Some(v) = x.as_constant() {
        let folded = match op {
            UnOp::Not => Some(v.not()),
            UnOp::Neg => v.neg(),
        };
        if let Some(v) = folded {
            return Ok(SymExpr::bits(v));
        }
    }
    if let Node::Unop { op: inner, operand } = x.node() {
        if *inner == op {
            return Ok(operand.clone());
        }
    }
    match op {
        UnOp::Not => x.not(),
        UnOp::Neg => x.neg(),
    }
}

fn fold_compare(op: CmpOp, a: &BitValue, b: &BitValue) -> Option<bool> {
    let signed = a.width() <= 128;
    Some(match op {
        CmpOp::Eq => a == b,
        CmpOp::Ult => a.ult(b),
        CmpOp::Ule => !b.ult(a),
        CmpOp::Ugt => b.ult(a),
        CmpOp::Uge => !a.ult(b),
        CmpOp::Slt if signed => a.slt(b),
        CmpOp::Sle if signed => !b.slt(a),
        CmpOp::Sgt if signed => b.slt(a),
        CmpOp::Sge if signed => !a.slt(b),
        _ => return None,
    })
}

fn compare(op: CmpOp, l: &SymExpr, r: &SymExpr) -> Result<SymExpr> {
    if let (Some(a), Some(b)) = (l.as_constant(), r.as_constant()) {
        if let Some(v) = fold_compare(op, &a, &b) {
            return Ok(SymExpr::bool(v));
        }
    }
    if l == r {
        return Ok(SymExpr::bool(matches!(
            op,
            CmpOp::Eq | CmpOp::Ule | CmpOp::Uge | CmpOp::Sle | CmpOp::Sge
        )));
    }
    if op == CmpOp::Eq && l.is_bool() {
        match (l.as_bool_constant(), r.as_bool_constant()) {
            (Some(a), Some(b)) => return Ok(SymExpr::bool(a == b)),
            (Some(true), None) => return Ok(r.clone()),
            (None, Some(true)) => return Ok(l.clone()),
            (Some(false), None) => return not(r),
            (None, Some(false)) => return not(l),
            _ => {}
        }
    }
    // a one-bit `ite(c, 1, 0) == 1` is just `c`
    if op == CmpOp::Eq && l.width() == 1 {
        if let (
            Node::Ite {
                cond,
                then,
                otherwise,
            },
            Some(k),
        ) = (l.node(), r.as_constant())
        {
            if let (Some(t), Some(e)) = (then.as_constant(), otherwise.as_constant()) {
                if t == k && e != k {
                    return Ok(cond.clone());
                }
                if e == k && t != k {
                    return not(cond);
                }
            }
        }
    }
    l.compare(op, r)
}

fn extract(x: &SymExpr, hi: u16, lo: u16) -> Result<SymExpr> {
    if lo == 0 && hi + 1 == x.width() {
        return Ok(x.clone());
    }
    if let Some(v) = x.as_constant() {
        return Ok(SymExpr::bits(v.extract(hi, lo)));
    }
    match x.node() {
        Node::Extract {
            operand,
            lo: inner_lo,
            ..
        } => return extract(operand, hi + inner_lo, lo + inner_lo),
        Node::Binop {
            op: BinOp::Concat,
            left,
            right,
        } => {
            let split = right.width();
            if hi < split {
                return extract(right, hi, lo);
            }
            if lo >= split {
                return extract(left, hi - split, lo - split);
            }
        }
        Node::SignExtend { operand, .. } if hi < operand.width() => {
            return extract(operand, hi, lo);
        }
        Node::Ite {
            cond,
            then,
            otherwise,
        } if then.as_constant().is_some() && otherwise.as_constant().is_some() => {
            let t = extract(then, hi, lo)?;
            let e = extract(otherwise, hi, lo)?;
            return ite(cond, &t, &e);
        }
        _ => {}
    }
    x.extract(hi, lo)
}

fn ite(c: &SymExpr, t: &SymExpr, e: &SymExpr) -> Result<SymExpr> {
    match c.as_bool_constant() {
        Some(true) => return Ok(t.clone()),
        Some(false) => return Ok(e.clone()),
        None => {}
    }
    if t == e {
        return Ok(t.clone());
    }
    if t.is_true() && e.is_false() {
        return Ok(c.clone());
    }
    if t.is_false() && e.is_true() {
        return not(c);
    }
    if let Node::Not(inner) = c.node() {
        return inner.ite(e, t);
    }
    c.ite(t, e)
}

fn not(x: &SymExpr) -> Result<SymExpr> {
    if let Some(b) = x.as_bool_constant() {
        return Ok(SymExpr::bool(!b));
    }
    if let Node::Not(inner) = x.node() {
        return Ok(inner.clone());
    }
    x.not()
}

fn boolop(op: BoolOp, l: &SymExpr, r: &SymExpr) -> Result<SymExpr> {
    let (a, b) = (l.as_bool_constant(), r.as_bool_constant());
    match op {
        BoolOp::And => {
            if a == Some(false) || b == Some(false) {
                return Ok(SymExpr::bool(false));
            }
            if a == Some(true) || l == r {
                return Ok(r.clone());
            }
            if b == Some(true) {
                return Ok(l.clone());
            }
        }
        BoolOp::Or => {
            if a == Some(true) || b == Some(true) {
                return Ok(SymExpr::bool(true));
            }
            if a == Some(false) || l == r {
                return Ok(r.clone());
            }
            if b == Some(false) {
                return Ok(l.clone());
            }
        }
        BoolOp::Xor => {
            if l == r {
                return Ok(SymExpr::bool(false));
            }
            match (a, b) {
                (Some(x), Some(y)) => return Ok(SymExpr::bool(x != y)),
                (Some(false), None) => return Ok(r.clone()),
                (None, Some(false)) => return Ok(l.clone()),
                (Some(true), None) => return not(r),
                (None, Some(true)) => return not(l),
                _ => {}
            }
        }
        BoolOp::Implies => {
            if a == Some(false) || b == Some(true) || l == r {
                return Ok(SymExpr::bool(true));
            }
            if a == Some(true) {
                return Ok(r.clone());
            }
            if b == Some(false) {
                return not(l);
            }
        }
        BoolOp::Iff => {
            if l == r {
                return Ok(SymExpr::bool(true));
            }
            match (a, b) {
                (Some(x), Some(y)) => return Ok(SymExpr::bool(x == y)),
                (Some(true), None) => return Ok(r.clone()),
                (None, Some(true)) => return Ok(l.clone()),
                (Some(false), None) => return not(r),
                (None, Some(false)) => return not(l),
                _ => {}
            }
        }
    }
    match op {
        BoolOp::And => l.and(r),
        BoolOp::Or => l.or(r),
        BoolOp::Xor => l.xor(r),
        BoolOp::Implies => l.implies(r),
        BoolOp::Iff => l.iff(r),
    }
}

/// Splits an address into a symbolic base and a constant offset.
pub(crate) fn base_offset(e: &SymExpr) -> (Option<SymExpr>, BitValue) {
    if let Some(v) = e.as_constant() {
        return (None, v);
    }
    if let Node::Binop {
        op: BinOp::Add,
        left,
        right,
    } = e.node()
    {
        if let Some(c) = right.as_constant() {
            return (Some(left.clone()), c);
        }
    }
    (Some(e.clone()), BitValue::zero(e.width()))
}

/// `true` if `a` and `b` can never be equal.
pub(crate) fn provably_distinct(a: &SymExpr, b: &SymExpr) -> bool {
    let (base_a, off_a) = base_offset(a);
    let (base_b, off_b) = base_offset(b);
    base_a == base_b && off_a != off_b
}

fn select(array: &SymExpr, index: &SymExpr) -> Result<SymExpr> {
    let mut current = array.clone();
    loop {
        let next = match current.node() {
            Node::ArrayStore {
                array: inner,
                index: stored,
                value,
            } => {
                if stored == index {
                    return Ok(value.clone());
                }
                if !provably_distinct(stored, index) {
                    break;
                }
                inner.clone()
            }
            _ => break,
        };
        current = next;
    }
    current.select(index)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c64(v: u128) -> SymExpr {
        SymExpr::constant(v, 64)
    }

    #[test]
    fn test_constant_folding() {
        let e = c64(2).add(&c64(3)).unwrap().mul(&c64(4)).unwrap();
        assert_eq!(simplify(&e).unwrap().as_constant().unwrap().low(), 20);

        let cmp = c64(1).slt(&c64(u128::from(u64::MAX))).unwrap();
        assert!(simplify(&cmp).unwrap().is_false());
    }

    #[test]
    fn test_offset_normalization() {
        let x = SymExpr::var("x", 64);
        let e = x.add(&c64(8)).unwrap().sub(&c64(3)).unwrap();
        let expected = x.add(&c64(5)).unwrap();
        assert_eq!(simplify(&e).unwrap(), expected);

        let e = c64(0).add(&x).unwrap();
        assert_eq!(simplify(&e).unwrap(), x);
    }

    #[test]
    fn test_extract_rules() {
        let x = SymExpr::var("x", 64);
        let y = SymExpr::var("y", 32);
        let cat = x.concat(&y).unwrap();
        assert_eq!(simplify(&cat.extract(31, 0).unwrap()).unwrap(), y);
        assert_eq!(
            simplify(&cat.extract(95, 32).unwrap()).unwrap(),
            x
        );
        let inner = x.extract(47, 8).unwrap().extract(15, 8).unwrap();
        assert_eq!(simplify(&inner).unwrap(), x.extract(23, 16).unwrap());

        let merged = x
            .extract(15, 8)
            .unwrap()
            .concat(&x.extract(7, 0).unwrap())
            .unwrap();
        assert_eq!(simplify(&merged).unwrap(), x.extract(15, 0).unwrap());
    }

    #[test]
    fn test_read_over_write() {
        let mem = SymExpr::array_var("mem", 64, 8);
        let p = SymExpr::var("p", 64);
        let v = SymExpr::var("v", 8);
        let w = SymExpr::var("w", 8);
        let stored = mem
            .store(&p, &v)
            .unwrap()
            .store(&p.add(&c64(1)).unwrap(), &w)
            .unwrap();

        assert_eq!(simplify(&stored.select(&p).unwrap()).unwrap(), v);

        let q = SymExpr::var("q", 64);
        let unknown = simplify(&stored.select(&q).unwrap()).unwrap();
        assert!(matches!(unknown.node(), Node::ArrayLookup { .. }));
    }

    #[test]
    fn test_boolean_identities() {
        let a = SymExpr::bool_var("a");
        let t = SymExpr::bool(true);
        assert_eq!(simplify(&a.and(&t).unwrap()).unwrap(), a);
        assert!(simplify(&a.implies(&a).unwrap()).unwrap().is_true());
        assert_eq!(simplify(&a.not().unwrap().not().unwrap()).unwrap(), a);
        let bit = a.to_bit().unwrap();
        assert_eq!(simplify(&bit.eq(&SymExpr::constant(1, 1)).unwrap()).unwrap(), a);
    }

    #[test]
    fn test_xor_self_is_zero() {
        let x = SymExpr::var("x", 32);
        let e = x.xor(&x).unwrap();
        assert!(simplify(&e).unwrap().as_constant().unwrap().is_zero());
    }
}

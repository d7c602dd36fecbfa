//! Traversals over expression DAGs: variable collection and substitution.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::{
    symbolic::expr::{Node, SymExpr},
    Error, Result,
};

/// Returns the children of a node in operand order.
#[must_use]
pub fn children(expr: &SymExpr) -> Vec<&SymExpr> {
    match expr.node() {
        Node::Constant(_) | Node::BoolConstant(_) | Node::Variable { .. } => Vec::new(),
        Node::Binop { left, right, .. }
        | Node::Compare { left, right, .. }
        | Node::BoolOp { left, right, .. } => vec![left, right],
        Node::Unop { operand, .. }
        | Node::Extract { operand, .. }
        | Node::SignExtend { operand, .. }
        | Node::Not(operand) => vec![operand],
        Node::Ite {
            cond,
            then,
            otherwise,
        } => vec![cond, then, otherwise],
        Node::ArrayLookup { array, index } => vec![array, index],
        Node::ArrayStore {
            array,
            index,
            value,
        } => vec![array, index, value],
        Node::Uf { args, .. } => args.iter().collect(),
        Node::ForAll { vars, body } => vars.iter().chain(std::iter::once(body)).collect(),
    }
}

/// Collects the distinct variables of `exprs`, in first-seen order.
#[must_use]
pub fn variables<'a>(exprs: impl IntoIterator<Item = &'a SymExpr>) -> Vec<SymExpr> {
    let mut seen = FxHashSet::default();
    let mut names = FxHashSet::default();
    let mut out = Vec::new();
    let mut stack: Vec<SymExpr> = exprs.into_iter().cloned().collect();
    stack.reverse();

    while let Some(e) = stack.pop() {
        if !seen.insert(e.id()) {
            continue;
        }
        if let Some(name) = e.as_variable() {
            if names.insert(name.to_string()) {
                out.push(e.clone());
            }
            continue;
        }
        for child in children(&e).into_iter().rev() {
            stack.push(child.clone());
        }
    }
    out
}

/// Number of distinct nodes reachable from `expr`.
#[must_use]
pub fn dag_size(expr: &SymExpr) -> usize {
    let mut seen = FxHashSet::default();
    let mut stack = vec![expr.clone()];
    while let Some(e) = stack.pop() {
        if seen.insert(e.id()) {
            stack.extend(children(&e).into_iter().cloned());
        }
    }
    seen.len()
}

/// Replaces variables by name, rebuilding the DAG with memoization.
#[derive(Default)]
pub struct Substitution {
    map: FxHashMap<String, SymExpr>,
    cache: FxHashMap<usize, (SymExpr, SymExpr)>,
}

impl Substitution {
    /// An empty substitution.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Maps `name` to `replacement`.
    pub fn insert(&mut self, name: impl Into<String>, replacement: SymExpr) {
        self.map.insert(name.into(), replacement);
        self.cache.clear();
    }

    /// `true` if nothing is mapped.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Applies the substitution.
    ///
    /// # Errors
    ///
    /// [`Error::WidthMismatch`] if a replacement has a different sort than the
    /// variable it replaces.
    pub fn apply(&mut self, expr: &SymExpr) -> Result<SymExpr> {
        if let Some((_, done)) = self.cache.get(&expr.id()) {
            return Ok(done.clone());
        }

        let out = match expr.node() {
            Node::Constant(_) | Node::BoolConstant(_) => expr.clone(),
            Node::Variable { name, sort } => match self.map.get(name) {
                Some(r) if r.sort() != *sort => {
                    return Err(Error::WidthMismatch {
                        op: "substitution",
                        left: sort.to_string(),
                        right: r.sort().to_string(),
                    })
                }
                Some(r) => r.clone(),
                None => expr.clone(),
            },
            Node::Binop { op, left, right } => self.apply(left)?.binop(*op, &self.apply(right)?)?,
            Node::Unop { op, operand } => SymExpr::from_node(Node::Unop {
                op: *op,
                operand: self.apply(operand)?,
            })?,
            Node::Compare { op, left, right } => {
                self.apply(left)?.compare(*op, &self.apply(right)?)?
            }
            Node::Extract { operand, hi, lo } => self.apply(operand)?.extract(*hi, *lo)?,
            Node::SignExtend { operand, width } => self.apply(operand)?.sign_extend(*width)?,
            Node::Ite {
                cond,
                then,
                otherwise,
            } => {
                let c = self.apply(cond)?;
                let t = self.apply(then)?;
                let e = self.apply(otherwise)?;
                c.ite(&t, &e)?
            }
            Node::ArrayLookup { array, index } => self.apply(array)?.select(&self.apply(index)?)?,
            Node::ArrayStore {
                array,
                index,
                value,
            } => {
                let a = self.apply(array)?;
                let i = self.apply(index)?;
                let v = self.apply(value)?;
                a.store(&i, &v)?
            }
            Node::Uf { name, width, args } => {
                let args = args
                    .iter()
                    .map(|a| self.apply(a))
                    .collect::<Result<Vec<_>>>()?;
                SymExpr::uf(name, *width, &args)?
            }
            Node::ForAll { vars, body } => SymExpr::forall(vars, &self.apply(body)?)?,
            Node::Not(operand) => self.apply(operand)?.not()?,
            Node::BoolOp { op, left, right } => SymExpr::from_node(Node::BoolOp {
                op: *op,
                left: self.apply(left)?,
                right: self.apply(right)?,
            })?,
        };

        self.cache.insert(expr.id(), (expr.clone(), out.clone()));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variables_are_deduplicated() {
        let x = SymExpr::var("x", 64);
        let y = SymExpr::var("y", 64);
        let e = x.add(&y).unwrap().mul(&SymExpr::var("x", 64)).unwrap();
        let vars = variables([&e]);
        let names: Vec<_> = vars.iter().filter_map(|v| v.as_variable()).collect();
        assert_eq!(names, vec!["x", "y"]);
    }

    #[test]
    fn test_substitution() {
        let x = SymExpr::var("x", 64);
        let e = x.add(&x).unwrap();
        let mut sub = Substitution::new();
        sub.insert("x", SymExpr::constant(3, 64));
        let out = sub.apply(&e).unwrap();
        assert_eq!(
            out,
            SymExpr::constant(3, 64).add(&SymExpr::constant(3, 64)).unwrap()
        );
        assert_eq!(dag_size(&e), 2);

        let mut bad = Substitution::new();
        bad.insert("x", SymExpr::constant(3, 32));
        assert!(matches!(bad.apply(&e), Err(Error::WidthMismatch { .. })));
    }
}

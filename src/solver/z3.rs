//! z3 backend.
//!
//! Expressions are translated bottom-up into z3 terms. Translations are
//! memoized per session, so a DAG shared between the two sides of an
//! obligation is translated once. Variables are declared on first use and
//! live until [`SmtSolver::reset`].

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use rustc_hash::FxHashMap;
use z3::{
    ast::{Array, Ast, Bool, Dynamic, BV},
    Context, DeclKind, FuncDecl, Model, Params, SatResult, Solver, Sort as Z3Sort,
};

use crate::{
    solver::{SmtSolver, SolverSession},
    symbolic::{ArrayValue, BinOp, BitValue, BoolOp, CmpOp, Node, Sort, SymExpr, UnOp},
    Error, Result,
};

/// How often a running query looks at the interrupt flag.
const INTERRUPT_POLL: Duration = Duration::from_millis(5);

/// A translated term.
#[derive(Clone)]
enum Term {
    Bool(Bool),
    Bv(BV),
    Array(Array),
}

impl Term {
    fn bv(&self) -> Result<&BV> {
        match self {
            Term::Bv(bv) => Ok(bv),
            _ => Err(Error::Solver("expected a bit-vector term".to_string())),
        }
    }

    fn boolean(&self) -> Result<&Bool> {
        match self {
            Term::Bool(b) => Ok(b),
            _ => Err(Error::Solver("expected a boolean term".to_string())),
        }
    }

    fn array(&self) -> Result<&Array> {
        match self {
            Term::Array(a) => Ok(a),
            _ => Err(Error::Solver("expected an array term".to_string())),
        }
    }

    fn dynamic(&self) -> Dynamic {
        match self {
            Term::Bool(b) => Dynamic::from_ast(b),
            Term::Bv(bv) => Dynamic::from_ast(bv),
            Term::Array(a) => Dynamic::from_ast(a),
        }
    }

    fn from_dynamic(value: &Dynamic, sort: Sort) -> Result<Self> {
        let term = match sort {
            Sort::Bool => value.as_bool().map(Term::Bool),
            Sort::Bv(_) => value.as_bv().map(Term::Bv),
            Sort::Array { .. } => value.as_array().map(Term::Array),
        };
        term.ok_or_else(|| Error::Solver(format!("z3 returned a term that is not a {}", sort)))
    }
}

fn z3_sort(sort: Sort) -> Z3Sort {
    match sort {
        Sort::Bool => Z3Sort::bool(),
        Sort::Bv(w) => Z3Sort::bitvector(u32::from(w)),
        Sort::Array { key, value } => Z3Sort::array(
            &Z3Sort::bitvector(u32::from(key)),
            &Z3Sort::bitvector(u32::from(value)),
        ),
    }
}

/// Builds a constant of any width from 64-bit chunks.
fn constant(value: &BitValue) -> BV {
    let width = value.width();
    let words = value.words();
    if width <= 64 {
        return BV::from_u64(words[0], u32::from(width));
    }
    let mut out = BV::from_u64(words[0], 64);
    let mut done = 64;
    for word in &words[1..] {
        if done >= width {
            break;
        }
        let chunk = (width - done).min(64);
        out = BV::from_u64(*word, u32::from(chunk)).concat(&out);
        done += chunk;
    }
    out
}

/// Reads a concrete term of `width` bits back into a [`BitValue`].
fn read_constant(bv: &BV, width: u16) -> Option<BitValue> {
    if width <= 64 {
        return Some(BitValue::new(u128::from(bv.as_u64()?), width));
    }
    let mut words = [0u64; 4];
    let mut lo = 0u16;
    for word in &mut words {
        if lo >= width {
            break;
        }
        let hi = (lo + 63).min(width - 1);
        *word = bv
            .extract(u32::from(hi), u32::from(lo))
            .simplify()
            .as_u64()?;
        lo += 64;
    }
    Some(BitValue::from_words(&words, width))
}

/// Solver sessions backed by z3.
pub struct Z3Solver {
    session: SolverSession,
    variables: FxHashMap<String, Term>,
    functions: FxHashMap<String, FuncDecl>,
    cache: FxHashMap<usize, (SymExpr, Term)>,
    model: Option<Model>,
}

impl Default for Z3Solver {
    fn default() -> Self {
        Self::new()
    }
}

impl Z3Solver {
    /// Creates a solver with the default timeout.
    #[must_use]
    pub fn new() -> Self {
        Self {
            session: SolverSession::new(),
            variables: FxHashMap::default(),
            functions: FxHashMap::default(),
            cache: FxHashMap::default(),
            model: None,
        }
    }

    fn variable(&mut self, name: &str, sort: Sort) -> Term {
        if let Some(term) = self.variables.get(name) {
            return term.clone();
        }
        let term = match sort {
            Sort::Bool => Term::Bool(Bool::new_const(name)),
            Sort::Bv(w) => Term::Bv(BV::new_const(name, u32::from(w))),
            Sort::Array { key, value } => Term::Array(Array::new_const(
                name,
                &Z3Sort::bitvector(u32::from(key)),
                &Z3Sort::bitvector(u32::from(value)),
            )),
        };
        self.variables.insert(name.to_string(), term.clone());
        term
    }

    fn function(&mut self, name: &str, args: &[SymExpr], width: u16) -> FuncDecl {
        let key = format!("{}/{}", name, args.len());
        self.functions
            .entry(key)
            .or_insert_with(|| {
                let domain: Vec<Z3Sort> = args.iter().map(|a| z3_sort(a.sort())).collect();
                let domain: Vec<&Z3Sort> = domain.iter().collect();
                FuncDecl::new(name, &domain, &Z3Sort::bitvector(u32::from(width)))
            })
            .clone()
    }

    fn translate(&mut self, expr: &SymExpr) -> Result<Term> {
        if let Some((_, term)) = self.cache.get(&expr.id()) {
            return Ok(term.clone());
        }
        let term = self.translate_node(expr)?;
        self.cache.insert(expr.id(), (expr.clone(), term.clone()));
        Ok(term)
    }

    fn translate_node(&mut self, expr: &SymExpr) -> Result<Term> {
        Ok(match expr.node() {
            Node::Constant(v) => Term::Bv(constant(v)),
            Node::BoolConstant(b) => Term::Bool(Bool::from_bool(*b)),
            Node::Variable { name, sort } => self.variable(name, *sort),
            Node::Binop { op, left, right } => {
                let a = self.translate(left)?;
                let b = self.translate(right)?;
                let (a, b) = (a.bv()?, b.bv()?);
                Term::Bv(match op {
                    BinOp::Add => a.bvadd(b),
                    BinOp::Sub => a.bvsub(b),
                    BinOp::Mul => a.bvmul(b),
                    BinOp::UDiv => a.bvudiv(b),
                    BinOp::SDiv => a.bvsdiv(b),
                    BinOp::URem => a.bvurem(b),
                    BinOp::SRem => a.bvsrem(b),
                    BinOp::And => a.bvand(b),
                    BinOp::Or => a.bvor(b),
                    BinOp::Xor => a.bvxor(b),
                    BinOp::Shl => a.bvshl(b),
                    BinOp::LShr => a.bvlshr(b),
                    BinOp::AShr => a.bvashr(b),
                    BinOp::RotL => a.bvrotl(b),
                    BinOp::RotR => a.bvrotr(b),
                    BinOp::Concat => a.concat(b),
                })
            }
            Node::Unop { op, operand } => {
                let a = self.translate(operand)?;
                let a = a.bv()?;
                Term::Bv(match op {
                    UnOp::Not => a.bvnot(),
                    UnOp::Neg => a.bvneg(),
                })
            }
            Node::Compare { op, left, right } => {
                let a = self.translate(left)?;
                let b = self.translate(right)?;
                if *op == CmpOp::Eq {
                    return Ok(Term::Bool(match (&a, &b) {
                        (Term::Bool(a), Term::Bool(b)) => a.eq(b),
                        (Term::Array(a), Term::Array(b)) => a.eq(b),
                        _ => a.bv()?.eq(b.bv()?),
                    }));
                }
                let (a, b) = (a.bv()?, b.bv()?);
                Term::Bool(match op {
                    CmpOp::Ult => a.bvult(b),
                    CmpOp::Ule => a.bvule(b),
                    CmpOp::Ugt => a.bvugt(b),
                    CmpOp::Uge => a.bvuge(b),
                    CmpOp::Slt => a.bvslt(b),
                    CmpOp::Sle => a.bvsle(b),
                    CmpOp::Sgt => a.bvsgt(b),
                    CmpOp::Sge => a.bvsge(b),
                    CmpOp::Eq => a.eq(b),
                })
            }
            Node::Extract { operand, hi, lo } => {
                let a = self.translate(operand)?;
                Term::Bv(a.bv()?.extract(u32::from(*hi), u32::from(*lo)))
            }
            Node::SignExtend { operand, width } => {
                let extra = width - operand.width();
                let a = self.translate(operand)?;
                Term::Bv(a.bv()?.sign_ext(u32::from(extra)))
            }
            Node::Ite {
                cond,
                then,
                otherwise,
            } => {
                let c = self.translate(cond)?;
                let t = self.translate(then)?;
                let e = self.translate(otherwise)?;
                let c = c.boolean()?;
                match (&t, &e) {
                    (Term::Bool(t), Term::Bool(e)) => Term::Bool(c.ite(t, e)),
                    (Term::Array(t), Term::Array(e)) => Term::Array(c.ite(t, e)),
                    _ => Term::Bv(c.ite(t.bv()?, e.bv()?)),
                }
            }
            Node::ArrayLookup { array, index } => {
                let a = self.translate(array)?;
                let i = self.translate(index)?;
                let value = a.array()?.select(i.bv()?);
                Term::from_dynamic(&value, expr.sort())?
            }
            Node::ArrayStore {
                array,
                index,
                value,
            } => {
                let a = self.translate(array)?;
                let i = self.translate(index)?;
                let v = self.translate(value)?;
                Term::Array(a.array()?.store(i.bv()?, v.bv()?))
            }
            Node::Uf { name, width, args } => {
                let decl = self.function(name, args, *width);
                let terms = args
                    .iter()
                    .map(|a| Ok(self.translate(a)?.dynamic()))
                    .collect::<Result<Vec<_>>>()?;
                let refs: Vec<&dyn Ast> = terms.iter().map(|t| t as &dyn Ast).collect();
                Term::from_dynamic(&decl.apply(&refs), expr.sort())?
            }
            Node::ForAll { vars, body } => {
                let bound = vars
                    .iter()
                    .map(|v| Ok(self.translate(v)?.dynamic()))
                    .collect::<Result<Vec<_>>>()?;
                let body = self.translate(body)?;
                let refs: Vec<&dyn Ast> = bound.iter().map(|t| t as &dyn Ast).collect();
                Term::Bool(z3::ast::forall_const(&refs, &[], body.boolean()?))
            }
            Node::Not(operand) => {
                let a = self.translate(operand)?;
                Term::Bool(a.boolean()?.not())
            }
            Node::BoolOp { op, left, right } => {
                let a = self.translate(left)?;
                let b = self.translate(right)?;
                let (a, b) = (a.boolean()?, b.boolean()?);
                Term::Bool(match op {
                    BoolOp::And => Bool::and(&[a, b]),
                    BoolOp::Or => Bool::or(&[a, b]),
                    BoolOp::Xor => a.xor(b),
                    BoolOp::Implies => a.implies(b),
                    BoolOp::Iff => a.iff(b),
                })
            }
        })
    }

    fn model(&self) -> Result<&Model> {
        self.model
            .as_ref()
            .ok_or_else(|| Error::Solver("no model available".to_string()))
    }

    fn query(&mut self, constraints: &[SymExpr]) -> Result<bool> {
        let solver = Solver::new();
        let mut params = Params::new();
        let millis = u32::try_from(self.session.timeout().as_millis()).unwrap_or(u32::MAX);
        params.set_u32("timeout", millis);
        solver.set_params(&params);

        for constraint in constraints {
            let term = self.translate(constraint)?;
            solver.assert(term.boolean()?);
        }
        self.session.check_interrupt()?;

        let result = check_interruptibly(&solver, &self.session.interrupt_handle());
        self.session.check_interrupt()?;
        match result {
            SatResult::Sat => {
                self.model = solver.get_model();
                Ok(true)
            }
            SatResult::Unsat => Ok(false),
            SatResult::Unknown => {
                let reason = solver.get_reason_unknown().unwrap_or_default();
                if reason.contains("timeout") || reason.contains("canceled") {
                    Err(Error::SolverTimeout(u64::from(millis)))
                } else {
                    Err(Error::Solver(format!("unknown: {}", reason)))
                }
            }
        }
    }

    fn array_entries(value: &Dynamic, out: &mut ArrayValue, width: u16) -> Result<()> {
        let not_explicit = || Error::Solver("array model is not in store form".to_string());
        let children = value.children();
        match value.decl().kind() {
            DeclKind::STORE => {
                let [inner, index, element] = children.as_slice() else {
                    return Err(not_explicit());
                };
                let index = index.as_bv().ok_or_else(not_explicit)?;
                let element = element.as_bv().ok_or_else(not_explicit)?;
                let key_width = u16::try_from(index.get_size()).map_err(|_| not_explicit())?;
                let index = read_constant(&index, key_width).ok_or_else(not_explicit)?;
                let element = read_constant(&element, width).ok_or_else(not_explicit)?;
                out.entries.entry(index.low()).or_insert(element);
                Self::array_entries(inner, out, width)
            }
            DeclKind::CONST_ARRAY => {
                let default = children
                    .first()
                    .and_then(Dynamic::as_bv)
                    .and_then(|bv| read_constant(&bv, width))
                    .ok_or_else(not_explicit)?;
                out.default = default;
                Ok(())
            }
            _ => Err(not_explicit()),
        }
    }
}

/// Runs `solver.check()` while a watcher thread forwards `interrupt` to z3.
fn check_interruptibly(solver: &Solver, interrupt: &AtomicBool) -> SatResult {
    let context = Context::thread_local();
    let handle = context.handle();
    let finished = AtomicBool::new(false);
    thread::scope(|scope| {
        scope.spawn(|| {
            while !finished.load(Ordering::SeqCst) {
                if interrupt.load(Ordering::SeqCst) {
                    handle.interrupt();
                    return;
                }
                thread::sleep(INTERRUPT_POLL);
            }
        });
        let result = solver.check();
        finished.store(true, Ordering::SeqCst);
        result
    })
}

impl SmtSolver for Z3Solver {
    fn set_timeout(&mut self, timeout: Duration) {
        self.session.set_timeout(timeout);
    }

    fn get_timeout(&self) -> Duration {
        self.session.timeout()
    }

    fn is_sat(&mut self, constraints: &[SymExpr]) -> Result<bool> {
        self.model = None;
        self.session.clear_error();
        self.session.check_interrupt()?;
        log::trace!("z3: query with {} constraints", constraints.len());
        self.query(constraints).map_err(|e| match e {
            Error::SolverInterrupted => e,
            e => self.session.fail(e),
        })
    }

    fn has_model(&self) -> bool {
        self.model.is_some()
    }

    fn eval_bv(&mut self, expr: &SymExpr) -> Result<BitValue> {
        let term = self.translate(expr)?;
        let value = self
            .model()?
            .eval(term.bv()?, true)
            .and_then(|bv| read_constant(&bv, expr.width()));
        value.ok_or_else(|| Error::Solver(format!("cannot evaluate {}", expr)))
    }

    fn eval_bool(&mut self, expr: &SymExpr) -> Result<bool> {
        let term = self.translate(expr)?;
        let value = self
            .model()?
            .eval(term.boolean()?, true)
            .and_then(|b| b.as_bool());
        value.ok_or_else(|| Error::Solver(format!("cannot evaluate {}", expr)))
    }

    fn get_model_array(&mut self, name: &str, key: u16, value: u16) -> Result<ArrayValue> {
        let term = self.variable(name, Sort::Array { key, value });
        let evaluated = self
            .model()?
            .eval(term.array()?, true)
            .ok_or_else(|| Error::Solver(format!("cannot evaluate {}", name)))?;
        let mut out = ArrayValue::filled(BitValue::zero(value));
        Self::array_entries(&Dynamic::from_ast(&evaluated), &mut out, value)?;
        Ok(out)
    }

    fn interrupt_handle(&self) -> Arc<AtomicBool> {
        self.session.interrupt_handle()
    }

    fn reset(&mut self) {
        self.session.reset();
        self.variables.clear();
        self.functions.clear();
        self.cache.clear();
        self.model = None;
    }

    fn get_error(&self) -> Option<&str> {
        self.session.error()
    }
}
